//! Per-endpoint connection handling
//!
//! Each candidate endpoint cycles through IDLE, CONNECTING, OPEN and CLOSED.
//! Sockets are never reused: every attempt gets a fresh socket-session key
//! and a fresh client identifier, so stale frames from a replaced socket can
//! be recognized and dropped.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

use tabwire_protocol::Frame;

/// Connection tuning; defaults match the production constants
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long an attempt may stay in CONNECTING before it is abandoned
    pub connect_timeout: Duration,
    /// Reconnect delay after the first failure
    pub base_reconnect: Duration,
    /// Reconnect delay ceiling
    pub max_reconnect: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(4),
            base_reconnect: Duration::from_millis(500),
            max_reconnect: Duration::from_secs(10),
        }
    }
}

/// Lifecycle state of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Result of a single connect attempt, before any frames flow
#[derive(Debug)]
pub enum ConnectOutcome {
    /// Socket reached OPEN
    Open,
    /// Handshake or transport failed
    Failed(String),
    /// OPEN was not reached within the configured window (local 4001)
    TimedOut,
}

impl ConnectOutcome {
    /// The close reason recorded on the endpoint, if the attempt failed
    pub fn close_reason(self) -> Option<String> {
        match self {
            ConnectOutcome::Open => None,
            ConnectOutcome::TimedOut => Some("open_timeout".into()),
            ConnectOutcome::Failed(reason) => Some(reason),
        }
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Resolve a connect attempt to a single typed outcome
async fn attempt_open(
    ws_url: &str,
    connect_timeout: Duration,
) -> (ConnectOutcome, Option<WsStream>) {
    match tokio::time::timeout(connect_timeout, connect_async(ws_url)).await {
        Err(_) => (ConnectOutcome::TimedOut, None),
        Ok(Err(e)) => (ConnectOutcome::Failed(e.to_string()), None),
        Ok(Ok((stream, _response))) => (ConnectOutcome::Open, Some(stream)),
    }
}

/// Messages from connection tasks to the supervisor
#[derive(Debug)]
pub(crate) enum SocketEvent {
    Opened {
        ws_url: String,
        session: Uuid,
        writer: mpsc::UnboundedSender<Message>,
    },
    Closed {
        ws_url: String,
        session: Uuid,
        reason: Option<String>,
    },
    FrameReceived {
        ws_url: String,
        session: Uuid,
        frame: Frame,
    },
    ReconnectDue {
        ws_url: String,
        generation: u64,
    },
}

/// Drive one connect attempt to completion
///
/// Emits `Opened` once the socket is up, `FrameReceived` per inbound frame,
/// and always finishes with exactly one `Closed`.
pub(crate) async fn run_attempt(
    ws_url: String,
    session: Uuid,
    client_id: String,
    extension_version: String,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    tracing::debug!(ws_url = %ws_url, session = %session, "connect_start");

    let (outcome, stream) = attempt_open(&ws_url, connect_timeout).await;
    let Some(connected) = stream else {
        let _ = events.send(SocketEvent::Closed {
            ws_url,
            session,
            reason: outcome.close_reason(),
        });
        return;
    };

    let (mut sink, mut stream) = connected.split();

    let hello = Frame::Hello {
        client_id,
        extension_version,
    };
    let hello_text = match hello.encode() {
        Ok(text) => text,
        Err(e) => {
            let _ = events.send(SocketEvent::Closed {
                ws_url,
                session,
                reason: Some(format!("encode hello: {}", e)),
            });
            return;
        }
    };
    if let Err(e) = sink.send(Message::Text(hello_text)).await {
        let _ = events.send(SocketEvent::Closed {
            ws_url,
            session,
            reason: Some(e.to_string()),
        });
        return;
    }

    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();
    let _ = events.send(SocketEvent::Opened {
        ws_url: ws_url.clone(),
        session,
        writer: writer_tx,
    });
    tracing::info!(ws_url = %ws_url, session = %session, "connect_open");

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = writer_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut close_reason = None;
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match Frame::decode(&text) {
                Ok(Frame::Unknown) => {
                    tracing::debug!(ws_url = %ws_url, "Ignoring unknown frame type");
                }
                Ok(frame) => {
                    let _ = events.send(SocketEvent::FrameReceived {
                        ws_url: ws_url.clone(),
                        session,
                        frame,
                    });
                }
                Err(e) => {
                    tracing::warn!(ws_url = %ws_url, error = %e, "Dropping unparseable frame");
                }
            },
            Ok(Message::Close(frame)) => {
                close_reason = frame.map(|f| format!("close {} {}", u16::from(f.code), f.reason));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                close_reason = Some(e.to_string());
                break;
            }
        }
    }

    writer_task.abort();
    tracing::info!(ws_url = %ws_url, session = %session, reason = ?close_reason, "connect_close");
    let _ = events.send(SocketEvent::Closed {
        ws_url,
        session,
        reason: close_reason,
    });
}

/// Next reconnect delay: doubles from the base, capped
pub fn next_backoff(current: Duration, config: &ConnectionConfig) -> Duration {
    (current * 2).min(config.max_reconnect)
}
