//! Wire envelopes exchanged between the bridge server and extensions
//!
//! Frames are JSON objects carried in WebSocket text frames, discriminated
//! by a `type` field. Unknown `type` values decode to [`Frame::Unknown`] so
//! receivers can skip them; senders never produce it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tabwire_utils::BridgeError;

/// Structured error shape carried in the `error` field of a `res` frame
///
/// `message` is always present; `reason`, `code` and `retryable` are
/// additive and preserved verbatim across the boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reason: None,
            code: None,
            retryable: None,
        }
    }

    pub fn with_details(
        message: impl Into<String>,
        reason: impl Into<String>,
        code: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            message: message.into(),
            reason: Some(reason.into()),
            code: Some(code.into()),
            retryable: Some(retryable),
        }
    }

    /// Map an internal error to its wire shape
    pub fn from_error(err: &BridgeError) -> Self {
        match err {
            BridgeError::QueueWaitTimeout { .. } => Self::with_details(
                err.to_string(),
                reasons::QUEUE_WAIT_TIMEOUT,
                codes::QUEUE_WAIT_TIMEOUT,
                true,
            ),
            BridgeError::QueueOverflow => Self::with_details(
                err.to_string(),
                reasons::QUEUE_OVERFLOW,
                codes::QUEUE_OVERFLOW,
                true,
            ),
            BridgeError::DuplicateRequestId { .. } => Self::with_details(
                err.to_string(),
                reasons::DUPLICATE_REQUEST_ID,
                codes::DUPLICATE_REQUEST_ID,
                false,
            ),
            BridgeError::SocketClosed => Self::with_details(
                err.to_string(),
                reasons::SOCKET_CLOSED,
                codes::SOCKET_CLOSED,
                true,
            ),
            BridgeError::Extension {
                message,
                reason,
                code,
                retryable,
            } => Self {
                message: message.clone(),
                reason: reason.clone(),
                code: code.clone(),
                retryable: Some(*retryable),
            },
            other => Self::new(other.to_string()),
        }
    }

    /// Map the wire shape back to an internal error, preserving the
    /// quadruple for callers that branch on reason/code
    pub fn into_error(self) -> BridgeError {
        BridgeError::Extension {
            message: self.message,
            reason: self.reason,
            code: self.code,
            retryable: self.retryable.unwrap_or(false),
        }
    }
}

/// Wire reason strings (lower snake case)
pub mod reasons {
    pub const QUEUE_WAIT_TIMEOUT: &str = "queue_wait_timeout";
    pub const QUEUE_OVERFLOW: &str = "queue_overflow";
    pub const DUPLICATE_REQUEST_ID: &str = "duplicate_request_id";
    pub const SOCKET_CLOSED: &str = "socket_closed";
    pub const UNKNOWN_COMMAND: &str = "unknown_command";
}

/// Wire code strings (upper snake case)
pub mod codes {
    pub const QUEUE_WAIT_TIMEOUT: &str = "QUEUE_WAIT_TIMEOUT";
    pub const QUEUE_OVERFLOW: &str = "QUEUE_OVERFLOW";
    pub const DUPLICATE_REQUEST_ID: &str = "DUPLICATE_REQUEST_ID";
    pub const SOCKET_CLOSED: &str = "SOCKET_CLOSED";
    pub const UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";
}

/// WebSocket close codes used by both sides
pub mod close_codes {
    /// Client-imposed close when OPEN was not reached in time
    pub const OPEN_TIMEOUT: u16 = 4001;
    /// Server-imposed close when a client stopped answering pings
    pub const PONG_TIMEOUT: u16 = 4002;
}

/// Command names the extension accepts from the server
pub mod commands {
    pub const LIST_TABS: &str = "listTabs";
    pub const OPEN_URL: &str = "openUrl";
    pub const SCREENSHOT: &str = "screenshot";
}

/// A single wire envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame on each socket, client to server
    Hello {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "extensionVersion")]
        extension_version: String,
    },

    /// Server accepts the client
    HelloAck {},

    /// Server rejects the connection before acceptance, then closes
    Error { message: String },

    /// Server to client request; `id` is opaque
    Cmd {
        id: String,
        cmd: String,
        #[serde(default)]
        params: Value,
    },

    /// Client to server response
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },

    /// Liveness probe; either side may initiate
    Ping {},

    /// Liveness answer carrying the responder's clock in unix millis
    Pong { t: u64 },

    /// Forward compatibility: any unrecognized `type`
    #[serde(other)]
    Unknown,
}

impl Frame {
    /// Build a successful `res` frame
    pub fn res_ok(id: impl Into<String>, result: Value) -> Self {
        Frame::Res {
            id: id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Build a failed `res` frame
    pub fn res_err(id: impl Into<String>, error: ErrorBody) -> Self {
        Frame::Res {
            id: id.into(),
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    /// Serialize to the JSON text carried in a WebSocket frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse the JSON text of a WebSocket frame
    ///
    /// Unknown `type` values yield [`Frame::Unknown`]; malformed JSON is an
    /// error for the caller to log and drop.
    pub fn decode(text: &str) -> Result<Frame, serde_json::Error> {
        serde_json::from_str(text)
    }
}
