//! Path utilities for tabwire
//!
//! Handles XDG Base Directory compliance for state, cache and log
//! directories.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Application identifier for XDG directories
const APP_NAME: &str = "tabwire";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the state directory
///
/// Location: `$XDG_STATE_HOME/tabwire` or `~/.local/state/tabwire`
pub fn state_dir() -> PathBuf {
    project_dirs()
        .and_then(|p| p.state_dir().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| fallback_home().join(".local").join("state").join(APP_NAME))
}

/// Get the cache directory (temporary data, safe to delete)
///
/// Location: `$XDG_CACHE_HOME/tabwire` or `~/.cache/tabwire`
pub fn cache_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.cache_dir().to_path_buf())
        .unwrap_or_else(|| fallback_home().join(".cache").join(APP_NAME))
}

/// Get the log directory
///
/// Location: `$XDG_STATE_HOME/tabwire/log`
pub fn log_dir() -> PathBuf {
    state_dir().join("log")
}

/// Get the default screenshot artifact directory
///
/// Location: `$XDG_CACHE_HOME/tabwire/artifacts`
pub fn artifact_dir() -> PathBuf {
    cache_dir().join("artifacts")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

fn fallback_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
