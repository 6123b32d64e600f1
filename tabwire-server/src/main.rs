//! tabwire-server binary
//!
//! Binds the bridge endpoint, walking a small sequential port range when the
//! preferred port is taken, then runs until interrupted. Logs go to a file
//! by default because stdout belongs to the MCP stdio transport.

use std::process::ExitCode;

use clap::Parser;

use tabwire_server::{BridgeServer, ServerConfig};
use tabwire_utils::{env, init_logging_with_config, BridgeError, LogConfig};

/// Bridge between an MCP tool host and a browser extension.
#[derive(Parser, Debug)]
#[command(name = "tabwire-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind host (default: WS_HOST, or the platform default)
    #[arg(long)]
    host: Option<String>,

    /// First port to try (default: WS_PORT, or 8766)
    #[arg(long)]
    port: Option<u16>,

    /// How many sequential ports to try when the first is taken
    #[arg(long, default_value_t = 10)]
    port_range: u16,

    /// Log to stderr instead of the log file
    #[arg(long)]
    stderr_log: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_config = if args.stderr_log {
        LogConfig::development()
    } else {
        LogConfig::server()
    };
    if let Err(e) = init_logging_with_config(log_config) {
        eprintln!("tabwire-server: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let host = args.host.unwrap_or_else(env::ws_host);
    let base_port = args.port.unwrap_or_else(env::ws_port);

    let mut running = None;
    for offset in 0..args.port_range.max(1) {
        let Some(port) = base_port.checked_add(offset) else {
            break;
        };
        let server = BridgeServer::new(ServerConfig {
            host: host.clone(),
            port,
            ..ServerConfig::default()
        });
        match server.start().await {
            Ok(addr) => {
                running = Some((server, addr));
                break;
            }
            Err(BridgeError::PortInUse { addr, code }) => {
                tracing::warn!(addr = %addr, code = %code, "Port taken, trying the next one");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start bridge server");
                return ExitCode::FAILURE;
            }
        }
    }

    let Some((server, addr)) = running else {
        tracing::error!(
            host = %host,
            base_port,
            range = args.port_range,
            "No free port in range"
        );
        return ExitCode::FAILURE;
    };

    tracing::info!(addr = %addr, endpoint = %server.external_url(), "tabwire bridge ready");

    let advertised: Vec<String> = env::endpoint_hosts()
        .into_iter()
        .map(|h| format!("ws://{}:{}", h, addr.port()))
        .collect();
    if !advertised.is_empty() {
        tracing::info!(endpoints = ?advertised, "Advertising additional endpoints");
    }

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received shutdown signal, stopping bridge");
    server.stop().await;

    ExitCode::SUCCESS
}
