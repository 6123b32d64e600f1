//! Process environment discovery for the bridge server
//!
//! The server binary reads its bind address from the environment so that the
//! MCP host can configure it without flags: `WS_HOST`, `WS_PORT` and
//! `WS_ENDPOINT_HOSTS`. Under WSL the loopback interface is not reachable
//! from the Windows browser, so the default bind host widens to `0.0.0.0`.

/// Default WebSocket port when `WS_PORT` is unset or invalid
pub const DEFAULT_WS_PORT: u16 = 8766;

/// Resolve the bind host: `WS_HOST` if set, otherwise the platform default
pub fn ws_host() -> String {
    match std::env::var("WS_HOST") {
        Ok(host) if !host.trim().is_empty() => host.trim().to_string(),
        _ => default_bind_host(),
    }
}

/// Resolve the bind port: `WS_PORT` in 1..=65535, otherwise 8766
pub fn ws_port() -> u16 {
    std::env::var("WS_PORT")
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|&p| (1..=65535).contains(&p))
        .map(|p| p as u16)
        .unwrap_or(DEFAULT_WS_PORT)
}

/// Hosts to advertise to extensions, from `WS_ENDPOINT_HOSTS` (comma list)
pub fn endpoint_hosts() -> Vec<String> {
    std::env::var("WS_ENDPOINT_HOSTS")
        .map(|v| {
            v.split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Default bind host: `0.0.0.0` under WSL, loopback elsewhere
pub fn default_bind_host() -> String {
    if is_wsl() {
        "0.0.0.0".to_string()
    } else {
        "127.0.0.1".to_string()
    }
}

/// Detect Windows Subsystem for Linux
///
/// Linux plus any of: `WSL_DISTRO_NAME`, `WSL_INTEROP`, or a kernel release
/// containing "microsoft".
pub fn is_wsl() -> bool {
    if !cfg!(target_os = "linux") {
        return false;
    }
    if std::env::var_os("WSL_DISTRO_NAME").is_some()
        || std::env::var_os("WSL_INTEROP").is_some()
    {
        return true;
    }
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|release| release.to_lowercase().contains("microsoft"))
        .unwrap_or(false)
}
