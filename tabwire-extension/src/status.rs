//! Aggregate connection status published to observers

use serde::{Deserialize, Serialize};

/// A disconnected endpoint and the last error observed on it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointFailure {
    pub ws_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Snapshot of the supervisor's collective connection state
///
/// Published to the observer sink whenever any field changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// True when at least one endpoint is OPEN
    pub connected: bool,
    /// First open endpoint, else the configured head, else the default
    pub ws_url: String,
    /// Open endpoints in candidate order
    pub connected_endpoints: Vec<String>,
    /// Endpoints currently failing, with their last errors
    pub disconnected_endpoints: Vec<EndpointFailure>,
    /// Most recent error across all endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Unix millis of the last status change
    pub last_change_at: u64,
}
