//! Error types for tabwire
//!
//! Provides a unified error type used across all tabwire crates.

/// Main error type for tabwire operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to bind {addr}: {code}")]
    PortInUse { addr: String, code: String },

    // === Dispatch Errors ===

    #[error("No extension connected at {endpoint}")]
    NoClient { endpoint: String },

    #[error("Request timeout after {ms}ms for command {cmd}")]
    Timeout { cmd: String, ms: u64 },

    #[error("Server stopped")]
    ServerStopped,

    // === Queue Errors ===

    #[error("Request {id} timed out waiting in the extension queue")]
    QueueWaitTimeout { id: String },

    #[error("Extension command queue is full")]
    QueueOverflow,

    #[error("Duplicate request id: {id}")]
    DuplicateRequestId { id: String },

    #[error("Socket closed while request was queued")]
    SocketClosed,

    // === Boundary Errors ===

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // === Extension-reported Errors ===

    #[error("{message}")]
    Extension {
        message: String,
        reason: Option<String>,
        code: Option<String>,
        retryable: bool,
    },
}

impl BridgeError {
    /// Create a `NoClient` error for the given external endpoint
    pub fn no_client(endpoint: impl Into<String>) -> Self {
        Self::NoClient {
            endpoint: endpoint.into(),
        }
    }

    /// Create a `Timeout` error
    pub fn timeout(cmd: impl Into<String>, ms: u64) -> Self {
        Self::Timeout {
            cmd: cmd.into(),
            ms,
        }
    }

    /// Create an `InvalidUrl` error
    pub fn invalid_url(msg: impl Into<String>) -> Self {
        Self::InvalidUrl(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an extension-reported error carrying the full quadruple
    pub fn extension(
        message: impl Into<String>,
        reason: Option<String>,
        code: Option<String>,
        retryable: bool,
    ) -> Self {
        Self::Extension {
            message: message.into(),
            reason,
            code,
            retryable,
        }
    }

    /// Check whether the dispatcher may redispatch a request that failed
    /// with this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::QueueWaitTimeout { .. }
            | Self::QueueOverflow
            | Self::SocketClosed => true,
            Self::Extension { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
