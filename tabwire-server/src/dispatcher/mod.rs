//! Bridge server dispatcher
//!
//! Listens for WebSocket connections from extensions, gates each socket on a
//! `hello` handshake, and multiplexes `call()` requests across the connected
//! clients in round-robin order. Failed dispatches are retried on a capped
//! exponential backoff, possibly against a different client. A single
//! heartbeat loop evicts clients that stop answering pings.

mod pending;
mod registry;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use tabwire_protocol::{close_codes, Frame};
use tabwire_utils::time::unix_millis;
use tabwire_utils::{BridgeError, Result};

use pending::{PendingOutcome, PendingTable};
use registry::{ClientEntry, ClientRegistry};

/// Base delay of the dispatch retry backoff
const BASE_RETRY_BACKOFF: Duration = Duration::from_millis(150);
/// Ceiling of the dispatch retry backoff
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(2);
/// How often retries poll the client pool while waiting for one to appear
const CLIENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Dispatcher configuration
///
/// The timer fields exist so tests can tighten them; production uses the
/// defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host; also embedded in `NoClient` messages
    pub host: String,
    /// Bind port; 0 lets the OS choose (tests)
    pub port: u16,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    /// Upper bound of the uniform jitter added to each retry delay
    pub retry_jitter_max: Duration,
    /// How long internal retries wait for a client before giving up
    pub retry_wait_for_client: Duration,
    /// Total dispatch attempts per call
    pub max_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8766,
            heartbeat_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(25),
            retry_jitter_max: Duration::from_millis(100),
            retry_wait_for_client: Duration::from_millis(1200),
            max_attempts: 3,
        }
    }
}

/// The bridge server; cheap to clone, all clones share one dispatcher
#[derive(Clone)]
pub struct BridgeServer {
    inner: Arc<ServerInner>,
}

impl BridgeServer {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(ServerInner {
                config,
                registry: ClientRegistry::new(),
                pending: PendingTable::new(),
                stopped: AtomicBool::new(false),
                shutdown_tx,
                bound_addr: StdMutex::new(None),
                accept_task: StdMutex::new(None),
                heartbeat_task: StdMutex::new(None),
            }),
        }
    }

    /// Bind the listener and start accepting extensions
    ///
    /// Fails with [`BridgeError::PortInUse`] when the address is taken; the
    /// caller decides whether to walk the port range.
    pub async fn start(&self) -> Result<SocketAddr> {
        self.inner.start(Arc::clone(&self.inner)).await
    }

    /// Dispatch a command to a connected extension and await its result
    ///
    /// Retries retryable failures up to `max_attempts` total dispatches,
    /// re-running client selection each time so the request can move to a
    /// different extension.
    pub async fn call(&self, cmd: &str, params: Value, timeout: Duration) -> Result<Value> {
        self.inner.call(cmd, params, timeout).await
    }

    /// Stop accepting, evict all clients, reject all pending requests
    ///
    /// Idempotent; later `call()`s fail with `ServerStopped`.
    pub async fn stop(&self) {
        self.inner.stop().await
    }

    /// The endpoint URL extensions are expected to reach
    pub fn external_url(&self) -> String {
        self.inner.external_url()
    }

    /// Number of authenticated clients
    pub fn client_count(&self) -> usize {
        self.inner.registry.count()
    }
}

struct ServerInner {
    config: ServerConfig,
    registry: ClientRegistry,
    pending: PendingTable,
    stopped: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    bound_addr: StdMutex<Option<SocketAddr>>,
    accept_task: StdMutex<Option<JoinHandle<()>>>,
    heartbeat_task: StdMutex<Option<JoinHandle<()>>>,
}

impl ServerInner {
    async fn start(&self, this: Arc<ServerInner>) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                BridgeError::PortInUse {
                    addr: addr.clone(),
                    code: "EADDRINUSE".into(),
                }
            } else {
                BridgeError::Io(e)
            }
        })?;

        let bound = listener.local_addr()?;
        *self.bound_addr.lock().unwrap() = Some(bound);
        tracing::info!(addr = %bound, "Bridge server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, peer)) => {
                            tracing::debug!(peer = %peer, "Extension connecting");
                            let conn = Arc::clone(&this);
                            tokio::spawn(handle_connection(conn, stream));
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Accept failed");
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Accept loop stopping");
                        break;
                    }
                }
            }
        });
        *self.accept_task.lock().unwrap() = Some(task);

        Ok(bound)
    }

    fn external_url(&self) -> String {
        let port = self
            .bound_addr
            .lock()
            .unwrap()
            .map(|a| a.port())
            .unwrap_or(self.config.port);
        format!("ws://{}:{}", self.config.host, port)
    }

    async fn call(&self, cmd: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = Uuid::new_v4().to_string();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u32 = 1;

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return Err(BridgeError::ServerStopped);
            }

            // the first attempt fails fast; retries grant the pool a grace
            // window since the triggering failure often just killed a socket
            let wait = if attempt == 1 {
                Duration::ZERO
            } else {
                self.config.retry_wait_for_client
            };
            let Some((client_key, sender)) = self.select_client(wait).await else {
                tracing::warn!(id = %id, attempt, "retry no_client");
                return Err(BridgeError::no_client(self.external_url()));
            };

            let outcome = self
                .dispatch_once(&id, client_key, sender, cmd, params.clone(), timeout)
                .await;

            match outcome {
                PendingOutcome::Resolved(value) => return Ok(value),
                PendingOutcome::Failed(err) => {
                    if err.is_retryable() && attempt < max_attempts {
                        let delay = retry_delay(attempt + 1, self.config.retry_jitter_max);
                        tracing::info!(
                            id = %id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retry schedule"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        tracing::info!(id = %id, attempt, "retry dispatch");
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// One dispatch attempt: register pending, send the frame, await the
    /// response or the per-call timer
    async fn dispatch_once(
        &self,
        id: &str,
        client_key: Uuid,
        sender: mpsc::UnboundedSender<Message>,
        cmd: &str,
        params: Value,
        timeout: Duration,
    ) -> PendingOutcome {
        let (tx, mut rx) = oneshot::channel();
        self.pending.insert(id.to_string(), client_key, tx);

        let frame = Frame::Cmd {
            id: id.to_string(),
            cmd: cmd.to_string(),
            params,
        };
        let sent = match frame.encode() {
            Ok(text) => sender.send(Message::Text(text)).is_ok(),
            Err(e) => {
                tracing::error!(id = %id, error = %e, "Failed to encode cmd frame");
                false
            }
        };
        if !sent {
            // writer gone between selection and send
            self.pending.take(id);
            return PendingOutcome::Failed(BridgeError::SocketClosed);
        }

        tokio::select! {
            outcome = &mut rx => {
                outcome.unwrap_or(PendingOutcome::Failed(BridgeError::SocketClosed))
            }
            _ = tokio::time::sleep(timeout) => {
                if self.pending.take(id).is_some() {
                    tracing::warn!(id = %id, cmd = %cmd, timeout_ms = timeout.as_millis() as u64, "call timeout");
                    PendingOutcome::Failed(BridgeError::timeout(cmd, timeout.as_millis() as u64))
                } else {
                    // a resolution raced the timer and owns the entry
                    rx.await.unwrap_or(PendingOutcome::Failed(BridgeError::SocketClosed))
                }
            }
        }
    }

    /// Round-robin selection with an optional bounded wait for a client
    async fn select_client(
        &self,
        wait: Duration,
    ) -> Option<(Uuid, mpsc::UnboundedSender<Message>)> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(found) = self.registry.next_round_robin() {
                return Some(found);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(CLIENT_POLL_INTERVAL).await;
        }
    }

    fn handle_res(
        &self,
        client_key: Uuid,
        id: &str,
        ok: bool,
        result: Option<Value>,
        error: Option<tabwire_protocol::ErrorBody>,
    ) {
        // drops responses whose id is unknown and stale responses from a
        // socket the request no longer belongs to
        let Some(pending) = self.pending.take_if_client(id, client_key) else {
            tracing::debug!(id = %id, key = %client_key, "Ignoring stale or unknown res");
            return;
        };

        let outcome = if ok {
            PendingOutcome::Resolved(result.unwrap_or(Value::Null))
        } else {
            let err = error.map(|body| body.into_error()).unwrap_or_else(|| {
                BridgeError::extension("extension reported an unnamed error", None, None, false)
            });
            PendingOutcome::Failed(err)
        };
        let _ = pending.tx.send(outcome);
    }

    /// Detach a lost client and push its outstanding requests back through
    /// the retry path
    fn finalize_client(&self, key: Uuid) {
        if !self.registry.remove(key) {
            return;
        }
        for pending in self.pending.take_for_client(key) {
            let _ = pending
                .tx
                .send(PendingOutcome::Failed(BridgeError::SocketClosed));
        }
    }

    /// Start the process-wide heartbeat loop on first use
    fn ensure_heartbeat(&self, this: &Arc<ServerInner>) {
        let mut guard = self.heartbeat_task.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let server = Arc::clone(this);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(server.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => server.heartbeat_sweep(),
                    _ = shutdown_rx.recv() => break,
                }
            }
        }));
    }

    /// Ping live clients; evict the ones whose pong went missing
    fn heartbeat_sweep(&self) {
        let now = Instant::now();
        for (key, sender, last_pong_at) in self.registry.heartbeat_view() {
            if now.duration_since(last_pong_at) > self.config.pong_timeout {
                tracing::warn!(key = %key, "heartbeat timeout");
                let _ = sender.send(Message::Close(Some(CloseFrame {
                    code: CloseCode::from(close_codes::PONG_TIMEOUT),
                    reason: "pong_timeout".into(),
                })));
                self.finalize_client(key);
            } else if let Ok(text) = (Frame::Ping {}).encode() {
                let _ = sender.send(Message::Text(text));
            }
        }
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Bridge server stopping");

        let _ = self.shutdown_tx.send(());

        for pending in self.pending.drain() {
            let _ = pending
                .tx
                .send(PendingOutcome::Failed(BridgeError::ServerStopped));
        }
        for sender in self.registry.clear() {
            let _ = sender.send(Message::Close(None));
        }

        let accept = self.accept_task.lock().unwrap().take();
        if let Some(task) = accept {
            if tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .is_err()
            {
                tracing::warn!("Accept loop did not stop in time");
            }
        }
        let heartbeat = self.heartbeat_task.lock().unwrap().take();
        if let Some(task) = heartbeat {
            task.abort();
        }
    }
}

/// Drive one extension socket from accept to finalization
async fn handle_connection(server: Arc<ServerInner>, stream: TcpStream) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket handshake failed");
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();

    // handshake gate: the first frame must be hello
    let (client_id, extension_version) = loop {
        let Some(msg) = stream.next().await else {
            return;
        };
        match msg {
            Ok(Message::Text(text)) => match Frame::decode(&text) {
                Ok(Frame::Hello {
                    client_id,
                    extension_version,
                }) => break (client_id, extension_version),
                Ok(other) => {
                    tracing::warn!(frame = ?other, "First frame was not hello, rejecting");
                    let reject = Frame::Error {
                        message: "expected hello".into(),
                    };
                    if let Ok(text) = reject.encode() {
                        let _ = sink.send(Message::Text(text)).await;
                    }
                    let _ = sink.close().await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping unparseable frame before hello");
                }
            },
            Ok(Message::Close(_)) | Err(_) => return,
            Ok(_) => {}
        }
    };

    let key = Uuid::new_v4();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();
    server.registry.register(ClientEntry {
        key,
        client_id,
        extension_version,
        sender: writer_tx.clone(),
        last_pong_at: Instant::now(),
    });

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = writer_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    if let Ok(text) = (Frame::HelloAck {}).encode() {
        let _ = writer_tx.send(Message::Text(text));
    }
    server.ensure_heartbeat(&server);

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match Frame::decode(&text) {
                Ok(Frame::Res {
                    id,
                    ok,
                    result,
                    error,
                }) => server.handle_res(key, &id, ok, result, error),
                Ok(Frame::Ping {}) => {
                    if let Ok(text) = (Frame::Pong { t: unix_millis() }).encode() {
                        let _ = writer_tx.send(Message::Text(text));
                    }
                }
                Ok(Frame::Pong { .. }) => server.registry.record_pong(key),
                Ok(Frame::Unknown) => {
                    tracing::debug!(key = %key, "Ignoring unknown frame type");
                }
                Ok(other) => {
                    tracing::debug!(key = %key, frame = ?other, "Ignoring unexpected frame");
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Dropping unparseable frame");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Socket error");
                break;
            }
        }
    }

    writer_task.abort();
    server.finalize_client(key);
}

/// Delay before dispatch attempt `attempt` (1-indexed): doubling backoff
/// from the base, capped, plus uniform jitter
fn retry_delay(attempt: u32, jitter_max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let backoff = BASE_RETRY_BACKOFF
        .saturating_mul(1u32 << exponent)
        .min(MAX_RETRY_BACKOFF);
    let jitter_ms = if jitter_max.is_zero() {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_max.as_millis() as u64)
    };
    backoff + Duration::from_millis(jitter_ms)
}
