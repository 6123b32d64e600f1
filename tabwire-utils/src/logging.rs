//! Logging infrastructure for tabwire
//!
//! Provides unified logging setup using the tracing ecosystem. The server
//! binary must never log to stdout: that stream carries the MCP stdio
//! transport, so server logs go to a file (or stderr during development).

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::{paths, BridgeError, Result};

/// Log output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Log to stderr
    Stderr,
    /// Log to file (for the bridge server, whose stdout is the MCP stream)
    File,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output destination
    pub output: LogOutput,
    /// Log level filter (e.g. "info", "tabwire=debug,tokio=warn")
    pub filter: String,
    /// Optional custom log file name (defaults to "tabwire-server.log")
    pub file_name: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "info".into(),
            file_name: None,
        }
    }
}

impl LogConfig {
    /// Create config for the bridge server binary (file logging)
    pub fn server() -> Self {
        Self {
            output: LogOutput::File,
            filter: std::env::var("TABWIRE_LOG").unwrap_or_else(|_| "info".into()),
            file_name: None,
        }
    }

    /// Create config for development (verbose stderr)
    pub fn development() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "debug".into(),
            file_name: None,
        }
    }
}

/// Initialize logging with default configuration
///
/// Uses TABWIRE_LOG env var for filter, defaults to "info"
pub fn init_logging() -> Result<()> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize logging with custom configuration
pub fn init_logging_with_config(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| BridgeError::config(format!("Invalid log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    match config.output {
        LogOutput::Stderr => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| BridgeError::config(format!("Failed to init logging: {}", e)))?;
        }
        LogOutput::File => {
            let log_dir = paths::log_dir();
            std::fs::create_dir_all(&log_dir)?;

            let file_name = config.file_name.as_deref().unwrap_or("tabwire-server.log");
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_dir.join(file_name))?;

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.with_writer(file).with_ansi(false))
                .try_init()
                .map_err(|e| BridgeError::config(format!("Failed to init logging: {}", e)))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.output, LogOutput::Stderr);
        assert_eq!(config.filter, "info");
        assert!(config.file_name.is_none());
    }

    #[test]
    fn test_log_config_server_uses_file() {
        let config = LogConfig::server();
        assert_eq!(config.output, LogOutput::File);
    }

    #[test]
    fn test_log_config_server_with_env() {
        let original = env::var("TABWIRE_LOG").ok();
        env::set_var("TABWIRE_LOG", "debug");

        let config = LogConfig::server();
        assert_eq!(config.filter, "debug");

        match original {
            Some(val) => env::set_var("TABWIRE_LOG", val),
            None => env::remove_var("TABWIRE_LOG"),
        }
    }

    #[test]
    fn test_log_config_development() {
        let config = LogConfig::development();
        assert_eq!(config.output, LogOutput::Stderr);
        assert_eq!(config.filter, "debug");
    }

    #[test]
    fn test_log_output_equality() {
        assert_eq!(LogOutput::Stderr, LogOutput::Stderr);
        assert_ne!(LogOutput::Stderr, LogOutput::File);
    }

    // init_logging() itself is exercised by integration tests; the global
    // subscriber can only be installed once per process.
}
