//! Durable key-value seam for supervisor preferences
//!
//! Two entries live here: the user-configured endpoint URL and the sticky
//! endpoint written on every successful OPEN. Writes are best-effort; a
//! failing store must never take down the supervisor.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use tabwire_utils::Result;

/// Storage key for the user-configured endpoint URL (comma list allowed)
pub const CONFIGURED_URL_KEY: &str = "tabwire.ws_url";

/// Storage key for the last endpoint that reached OPEN
pub const STICKY_ENDPOINT_KEY: &str = "tabwire.sticky_endpoint";

/// Durable string-to-string storage
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store for tests and embedders that persist elsewhere
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Single-file JSON store
///
/// The file holds one flat JSON object. Reads tolerate a missing file;
/// writes rewrite the whole object.
#[derive(Debug)]
pub struct JsonFileKv {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonFileKv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<HashMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(serde_json::from_str(&text).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KvStore for JsonFileKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(&entries)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_kv_roundtrip() {
        let kv = MemoryKv::new();
        assert!(kv.get(STICKY_ENDPOINT_KEY).await.unwrap().is_none());

        kv.set(STICKY_ENDPOINT_KEY, "ws://localhost:8767")
            .await
            .unwrap();
        assert_eq!(
            kv.get(STICKY_ENDPOINT_KEY).await.unwrap().as_deref(),
            Some("ws://localhost:8767")
        );
    }

    #[tokio::test]
    async fn test_memory_kv_overwrite() {
        let kv = MemoryKv::new();
        kv.set("k", "a").await.unwrap();
        kv.set("k", "b").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_json_file_kv_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let kv = JsonFileKv::new(dir.path().join("prefs.json"));
        assert!(kv.get("anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_file_kv_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let kv = JsonFileKv::new(&path);
        kv.set(CONFIGURED_URL_KEY, "ws://a.lan:9000").await.unwrap();
        kv.set(STICKY_ENDPOINT_KEY, "ws://a.lan:9000").await.unwrap();

        let reopened = JsonFileKv::new(&path);
        assert_eq!(
            reopened.get(CONFIGURED_URL_KEY).await.unwrap().as_deref(),
            Some("ws://a.lan:9000")
        );
        assert_eq!(
            reopened.get(STICKY_ENDPOINT_KEY).await.unwrap().as_deref(),
            Some("ws://a.lan:9000")
        );
    }

    #[tokio::test]
    async fn test_json_file_kv_corrupt_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        tokio::fs::write(&path, "{corrupt").await.unwrap();

        let kv = JsonFileKv::new(&path);
        assert!(kv.get("k").await.unwrap().is_none());

        // a write recovers the file
        kv.set("k", "v").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
