//! Seam to the browser control surface
//!
//! The supervisor never touches tab or capture APIs directly; it drives a
//! [`TabHost`] implementation supplied by the embedding runtime. Tests
//! inject fakes.

use async_trait::async_trait;
use serde_json::Value;

use tabwire_protocol::{codes, commands, reasons};
use tabwire_utils::{BridgeError, Result};

/// Browser operations the bridge can invoke
///
/// Each method receives the verbatim `params` object from the `cmd` frame
/// and returns the value placed in the `result` field of the `res` frame.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// Enumerate open tabs
    async fn list_tabs(&self) -> Result<Value>;

    /// Focus an existing tab matching the URL or open a new one
    async fn open_url(&self, params: Value) -> Result<Value>;

    /// Capture the visible viewport of a tab
    async fn screenshot(&self, params: Value) -> Result<Value>;
}

/// Route a command name to the host operation
///
/// Unknown commands produce a terminal error envelope rather than closing
/// the socket, so newer servers can probe for support.
pub async fn dispatch(host: &dyn TabHost, cmd: &str, params: Value) -> Result<Value> {
    match cmd {
        commands::LIST_TABS => host.list_tabs().await,
        commands::OPEN_URL => host.open_url(params).await,
        commands::SCREENSHOT => host.screenshot(params).await,
        other => Err(BridgeError::extension(
            format!("Unknown command: {}", other),
            Some(reasons::UNKNOWN_COMMAND.into()),
            Some(codes::UNKNOWN_COMMAND.into()),
            false,
        )),
    }
}
