//! Candidate endpoint resolution
//!
//! The supervisor does not know where the bridge server bound, so it derives
//! an ordered candidate list from the user-configured URL (if any), host
//! equivalents of each seed, and a default sweep over the server's port
//! range. A previously successful ("sticky") endpoint is moved to the head.

use url::Url;

use tabwire_utils::{BridgeError, Result};

/// Default endpoint assumed when nothing is configured
pub const DEFAULT_WS_URL: &str = "ws://localhost:8766";

/// Hosts crossed with the default port sweep
const SWEEP_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "wsl.localhost"];

/// Port range of the default sweep, matching the server's bind walk
const SWEEP_PORTS: std::ops::Range<u16> = 8766..8776;

/// Canonicalize a WebSocket URL to `ws[s]://host:port`
///
/// Requires a `ws:`/`wss:` scheme and an explicit port. Path, query and
/// fragment are stripped; the host is lowercased by the parser.
pub fn normalize_ws_url(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let url = Url::parse(trimmed)
        .map_err(|e| BridgeError::invalid_url(format!("{}: {}", trimmed, e)))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(BridgeError::invalid_url(format!(
                "{}: unsupported scheme {}",
                trimmed, other
            )))
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| BridgeError::invalid_url(format!("{}: missing host", trimmed)))?;

    let port = url
        .port()
        .ok_or_else(|| BridgeError::invalid_url(format!("{}: missing port", trimmed)))?;

    Ok(format!("{}://{}:{}", url.scheme(), host, port))
}

/// Host spellings that are interchangeable with the given one on this machine
fn host_equivalents(host: &str) -> Vec<&'static str> {
    match host {
        "0.0.0.0" => vec!["localhost", "127.0.0.1", "wsl.localhost"],
        "localhost" => vec!["127.0.0.1", "wsl.localhost"],
        "127.0.0.1" => vec!["localhost", "wsl.localhost"],
        _ => Vec::new(),
    }
}

/// Expand one normalized seed into itself plus its host equivalents
fn expand_seed(normalized: &str) -> Vec<String> {
    let mut out = vec![normalized.to_string()];
    if let Ok(url) = Url::parse(normalized) {
        if let (Some(host), Some(port)) = (url.host_str(), url.port()) {
            for eq in host_equivalents(host) {
                out.push(format!("{}://{}:{}", url.scheme(), eq, port));
            }
        }
    }
    out
}

/// Produce the ordered candidate list
///
/// `configured` is the user's URL setting, possibly a comma-separated list.
/// The bare default (`ws://localhost:8766`) contributes no seed so the
/// default sweep alone decides the order. Entries that fail to normalize are
/// skipped. `sticky` is moved to the head when present.
pub fn resolve_candidates(configured: Option<&str>, sticky: Option<&str>) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    if let Some(configured) = configured {
        let is_bare_default = configured.trim() == DEFAULT_WS_URL;
        if !is_bare_default {
            for entry in configured.split(',') {
                if entry.trim().is_empty() {
                    continue;
                }
                match normalize_ws_url(entry) {
                    Ok(seed) => candidates.extend(expand_seed(&seed)),
                    Err(err) => {
                        tracing::warn!(entry = entry.trim(), error = %err, "Skipping unusable endpoint entry");
                    }
                }
            }
        }
    }

    for port in SWEEP_PORTS {
        for host in SWEEP_HOSTS {
            candidates.push(format!("ws://{}:{}", host, port));
        }
    }

    dedupe_preserving_order(&mut candidates);

    if let Some(sticky) = sticky {
        if let Ok(sticky) = normalize_ws_url(sticky) {
            candidates.retain(|c| c != &sticky);
            candidates.insert(0, sticky);
        }
    }

    candidates
}

/// First usable configured endpoint, used as the reported URL while nothing
/// is open
pub fn configured_head(configured: Option<&str>) -> Option<String> {
    let configured = configured?;
    if configured.trim() == DEFAULT_WS_URL {
        return None;
    }
    configured
        .split(',')
        .filter_map(|entry| normalize_ws_url(entry).ok())
        .next()
}

fn dedupe_preserving_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}
