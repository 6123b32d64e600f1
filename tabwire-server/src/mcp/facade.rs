//! Tool-call facade
//!
//! Thin layer between validated tool arguments and the dispatcher. Results
//! and extension errors pass through verbatim so MCP callers can branch on
//! the `{message, reason, code, retryable}` quadruple.

use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};

use tabwire_protocol::commands;
use tabwire_utils::{BridgeError, Result};

use crate::dispatcher::BridgeServer;
use crate::mcp::artifacts;
use crate::mcp::tools::{CleanupArgs, OpenUrlArgs, ReturnMode, ScreenshotArgs};

/// Bridge call deadline for `list_tabs`, which carries no user timeout
const LIST_TABS_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Headroom on top of the browser-side wait so the extension times out
/// first and can report the richer error
const CALL_TIMEOUT_MARGIN: Duration = Duration::from_millis(2_000);

/// Facade over the dispatcher for the four MCP tools
#[derive(Clone)]
pub struct ToolFacade {
    server: BridgeServer,
}

impl ToolFacade {
    pub fn new(server: BridgeServer) -> Self {
        Self { server }
    }

    /// `list_tabs`: no arguments
    pub async fn list_tabs(&self) -> Result<Value> {
        self.server
            .call(commands::LIST_TABS, json!({}), LIST_TABS_TIMEOUT)
            .await
    }

    /// `open_url`: validate, then forward
    pub async fn open_url(&self, args: &Value) -> Result<Value> {
        let args = OpenUrlArgs::parse(args)?;
        let timeout = Duration::from_millis(args.timeout_ms) + CALL_TIMEOUT_MARGIN;
        self.server
            .call(commands::OPEN_URL, args.to_params(), timeout)
            .await
    }

    /// `screenshot`: forward the capture, then either return the image
    /// payload verbatim or spill it to an artifact file
    pub async fn screenshot(&self, args: &Value) -> Result<Value> {
        let args = ScreenshotArgs::parse(args)?;
        let timeout = Duration::from_millis(args.timeout_ms + args.extra_wait_ms)
            + CALL_TIMEOUT_MARGIN;
        let result = self
            .server
            .call(commands::SCREENSHOT, args.to_params(), timeout)
            .await?;

        match args.return_mode {
            ReturnMode::Image => Ok(result),
            ReturnMode::Artifact => {
                let data = result
                    .get("data")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        BridgeError::extension(
                            "screenshot result carried no image data",
                            None,
                            None,
                            false,
                        )
                    })?;
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| {
                        BridgeError::extension(
                            format!("screenshot payload was not valid base64: {}", e),
                            None,
                            None,
                            false,
                        )
                    })?;

                let dir = artifacts::resolve_dir(args.artifact_dir.as_deref());
                let path =
                    artifacts::write_artifact(&dir, &bytes, args.format.extension()).await?;

                Ok(json!({
                    "mimeType": args.format.mime_type(),
                    "path": path.to_string_lossy(),
                    "bytes": bytes.len(),
                    "savedAt": tabwire_utils::time::unix_millis(),
                }))
            }
        }
    }

    /// `artifact_cleanup`: local filesystem only, never touches the bridge
    pub async fn artifact_cleanup(&self, args: &Value) -> Result<Value> {
        let args = CleanupArgs::parse(args);
        let dir = artifacts::resolve_dir(args.artifact_dir.as_deref());
        let max_age = Duration::from_secs(args.max_age_hours * 3600);
        let report = artifacts::cleanup(&dir, max_age).await?;
        serde_json::to_value(report).map_err(|e| {
            BridgeError::extension(format!("serialization failed: {}", e), None, None, false)
        })
    }
}
