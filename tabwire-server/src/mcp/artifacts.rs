//! Screenshot artifact files
//!
//! Captures returned in artifact mode are written under a per-user cache
//! directory and referenced by path, keeping large base64 payloads out of
//! the MCP transport. Cleanup deletes files past a caller-chosen age.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use uuid::Uuid;

use tabwire_utils::{paths, Result};

/// What `artifact_cleanup` did
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub deleted_files: u64,
    pub deleted_bytes: u64,
    pub kept_files: u64,
    pub kept_bytes: u64,
}

/// Resolve the artifact directory: explicit override or the platform cache
pub fn resolve_dir(dir: Option<&str>) -> PathBuf {
    dir.map(PathBuf::from).unwrap_or_else(paths::artifact_dir)
}

/// Write one capture to a fresh file, returning its path
pub async fn write_artifact(dir: &Path, data: &[u8], extension: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("tab-{}.{}", Uuid::new_v4(), extension));
    tokio::fs::write(&path, data).await?;
    Ok(path)
}

/// Delete artifacts older than `max_age`; everything else is counted as kept
pub async fn cleanup(dir: &Path, max_age: Duration) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e.into()),
    };

    let now = SystemTime::now();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let size = metadata.len();
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or(Duration::ZERO);

        if age > max_age {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    report.deleted_files += 1;
                    report.deleted_bytes += size;
                }
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Failed to delete artifact");
                    report.kept_files += 1;
                    report.kept_bytes += size;
                }
            }
        } else {
            report.kept_files += 1;
            report.kept_bytes += size;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_dir_and_unique_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("artifacts");

        let a = write_artifact(&dir, b"png-bytes", "png").await.unwrap();
        let b = write_artifact(&dir, b"png-bytes", "png").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(tokio::fs::read(&a).await.unwrap(), b"png-bytes");
        assert!(a.extension().unwrap() == "png");
    }

    #[tokio::test]
    async fn test_cleanup_missing_dir_reports_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let report = cleanup(&tmp.path().join("absent"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(report, CleanupReport::default());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_fresh_files() {
        let tmp = tempfile::tempdir().unwrap();
        write_artifact(tmp.path(), b"abcd", "png").await.unwrap();

        let report = cleanup(tmp.path(), Duration::from_secs(3600)).await.unwrap();
        assert_eq!(report.deleted_files, 0);
        assert_eq!(report.kept_files, 1);
        assert_eq!(report.kept_bytes, 4);
    }

    #[tokio::test]
    async fn test_cleanup_deletes_old_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_artifact(tmp.path(), b"abcdef", "jpg").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // everything is "old" relative to a zero age limit
        let report = cleanup(tmp.path(), Duration::ZERO).await.unwrap();
        assert_eq!(report.deleted_files, 1);
        assert_eq!(report.deleted_bytes, 6);
        assert!(!path.exists());
    }

    #[test]
    fn test_resolve_dir_override() {
        assert_eq!(resolve_dir(Some("/tmp/x")), PathBuf::from("/tmp/x"));
        assert_eq!(resolve_dir(None), paths::artifact_dir());
    }
}
