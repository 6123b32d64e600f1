//! Endpoint supervisor
//!
//! Owns the candidate endpoint set, runs one connection state machine per
//! endpoint, serializes all inbound commands through the process-global
//! queue, and publishes an aggregate status snapshot whenever anything
//! changes. All endpoint table mutations happen on the supervisor task;
//! connection tasks only send [`SocketEvent`] messages.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use tabwire_protocol::{ErrorBody, Frame};
use tabwire_utils::time::unix_millis;
use tabwire_utils::BridgeError;

use crate::browser::{dispatch, TabHost};
use crate::connection::{
    next_backoff, run_attempt, ConnectionConfig, EndpointState, SocketEvent,
};
use crate::endpoints::{configured_head, resolve_candidates, DEFAULT_WS_URL};
use crate::queue::{CommandQueue, QueueConfig};
use crate::status::{EndpointFailure, StatusSnapshot};
use crate::storage::{KvStore, CONFIGURED_URL_KEY, STICKY_ENDPOINT_KEY};

/// Supervisor tuning
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Endpoint URL override; when `None` the durable store is consulted
    pub configured_url: Option<String>,
    /// Version advertised in `hello`
    pub extension_version: String,
    pub connection: ConnectionConfig,
    pub queue: QueueConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            configured_url: None,
            extension_version: env!("CARGO_PKG_VERSION").to_string(),
            connection: ConnectionConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

enum Control {
    UpdateConfiguredUrl(Option<String>),
    Shutdown,
}

/// Handle to a running supervisor
pub struct Supervisor {
    control_tx: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl Supervisor {
    /// Start the supervisor: resolve candidates, open connections, start the
    /// queue worker
    pub fn start(
        config: SupervisorConfig,
        host: Arc<dyn TabHost>,
        kv: Arc<dyn KvStore>,
        status_tx: mpsc::UnboundedSender<StatusSnapshot>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let queue = Arc::new(CommandQueue::new(config.queue.clone()));
        let writers: Arc<StdMutex<HashMap<Uuid, mpsc::UnboundedSender<Message>>>> =
            Arc::new(StdMutex::new(HashMap::new()));

        let worker = tokio::spawn(run_worker(
            Arc::clone(&queue),
            host,
            Arc::clone(&writers),
        ));

        let runner = Runner {
            config,
            kv,
            queue,
            writers,
            events_tx,
            status_tx,
            endpoints: Vec::new(),
            configured_head: None,
            last_error: None,
            last_status: None,
        };
        let task = tokio::spawn(runner.run(events_rx, control_rx));

        Self {
            control_tx,
            task,
            worker,
        }
    }

    /// Replace the configured endpoint URL and reconcile connections
    pub fn update_configured_url(&self, url: Option<String>) {
        let _ = self.control_tx.send(Control::UpdateConfiguredUrl(url));
    }

    /// Stop all connections and the worker
    pub async fn shutdown(self) {
        let _ = self.control_tx.send(Control::Shutdown);
        if tokio::time::timeout(Duration::from_secs(1), self.task)
            .await
            .is_err()
        {
            tracing::warn!("Supervisor task did not stop in time");
        }
        self.worker.abort();
    }
}

struct EndpointEntry {
    ws_url: String,
    state: EndpointState,
    session: Option<Uuid>,
    backoff: Duration,
    last_error: Option<String>,
    generation: u64,
    attempt_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl EndpointEntry {
    fn new(ws_url: String, base_backoff: Duration) -> Self {
        Self {
            ws_url,
            state: EndpointState::Idle,
            session: None,
            backoff: base_backoff,
            last_error: None,
            generation: 0,
            attempt_task: None,
            reconnect_task: None,
        }
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.attempt_task.take() {
            task.abort();
        }
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }
}

struct Runner {
    config: SupervisorConfig,
    kv: Arc<dyn KvStore>,
    queue: Arc<CommandQueue>,
    writers: Arc<StdMutex<HashMap<Uuid, mpsc::UnboundedSender<Message>>>>,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    status_tx: mpsc::UnboundedSender<StatusSnapshot>,
    endpoints: Vec<EndpointEntry>,
    configured_head: Option<String>,
    last_error: Option<String>,
    last_status: Option<StatusSnapshot>,
}

impl Runner {
    async fn run(
        mut self,
        mut events_rx: mpsc::UnboundedReceiver<SocketEvent>,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
    ) {
        let configured = match self.config.configured_url.clone() {
            Some(url) => Some(url),
            None => self
                .kv
                .get(CONFIGURED_URL_KEY)
                .await
                .unwrap_or_default(),
        };
        let sticky = self.kv.get(STICKY_ENDPOINT_KEY).await.unwrap_or_default();

        self.apply_candidates(configured.as_deref(), sticky.as_deref());
        self.publish();

        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => self.handle_event(event),
                control = control_rx.recv() => match control {
                    Some(Control::UpdateConfiguredUrl(url)) => {
                        self.update_configured(url).await;
                    }
                    Some(Control::Shutdown) | None => break,
                },
            }
        }

        for entry in &mut self.endpoints {
            entry.abort_tasks();
        }
        let mut writers = self.writers.lock().unwrap();
        for (_, writer) in writers.drain() {
            let _ = writer.send(Message::Close(None));
        }
    }

    /// Rebuild the endpoint table against a new candidate list; connections
    /// to surviving endpoints are left untouched
    fn apply_candidates(&mut self, configured: Option<&str>, sticky: Option<&str>) {
        let candidates = resolve_candidates(configured, sticky);
        self.configured_head = configured_head(configured);

        let mut existing: HashMap<String, EndpointEntry> = self
            .endpoints
            .drain(..)
            .map(|e| (e.ws_url.clone(), e))
            .collect();

        for ws_url in candidates {
            let entry = existing.remove(&ws_url).unwrap_or_else(|| {
                EndpointEntry::new(ws_url.clone(), self.config.connection.base_reconnect)
            });
            self.endpoints.push(entry);
        }

        // anything left was removed from the set: back to IDLE, socket closed
        for (_, mut removed) in existing {
            removed.abort_tasks();
            self.finalize_session(&mut removed);
            removed.state = EndpointState::Idle;
            tracing::info!(ws_url = %removed.ws_url, "Endpoint removed from candidate set");
        }

        for index in 0..self.endpoints.len() {
            if self.endpoints[index].state == EndpointState::Idle {
                self.spawn_attempt(index);
            }
        }
    }

    async fn update_configured(&mut self, url: Option<String>) {
        if let Some(url) = &url {
            if let Err(e) = self.kv.set(CONFIGURED_URL_KEY, url).await {
                tracing::warn!(error = %e, "Failed to persist configured URL");
            }
        }
        let sticky = self.kv.get(STICKY_ENDPOINT_KEY).await.unwrap_or_default();
        self.apply_candidates(url.as_deref(), sticky.as_deref());
        self.publish();
    }

    fn spawn_attempt(&mut self, index: usize) {
        let events_tx = self.events_tx.clone();
        let connect_timeout = self.config.connection.connect_timeout;
        let extension_version = self.config.extension_version.clone();

        let entry = &mut self.endpoints[index];
        let session = Uuid::new_v4();
        let client_id = Uuid::new_v4().to_string();

        entry.generation += 1;
        entry.session = Some(session);
        entry.state = EndpointState::Connecting;
        entry.attempt_task = Some(tokio::spawn(run_attempt(
            entry.ws_url.clone(),
            session,
            client_id,
            extension_version,
            connect_timeout,
            events_tx,
        )));
    }

    fn handle_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Opened {
                ws_url,
                session,
                writer,
            } => self.on_opened(ws_url, session, writer),
            SocketEvent::Closed {
                ws_url,
                session,
                reason,
            } => self.on_closed(ws_url, session, reason),
            SocketEvent::FrameReceived {
                ws_url,
                session,
                frame,
            } => self.on_frame(ws_url, session, frame),
            SocketEvent::ReconnectDue { ws_url, generation } => {
                self.on_reconnect_due(ws_url, generation)
            }
        }
    }

    fn on_opened(
        &mut self,
        ws_url: String,
        session: Uuid,
        writer: mpsc::UnboundedSender<Message>,
    ) {
        let Some(index) = self.index_of(&ws_url) else {
            return;
        };
        if self.endpoints[index].session != Some(session) {
            return;
        }

        let base = self.config.connection.base_reconnect;
        let entry = &mut self.endpoints[index];
        entry.state = EndpointState::Open;
        entry.backoff = base;
        entry.last_error = None;
        self.writers.lock().unwrap().insert(session, writer);

        let kv = Arc::clone(&self.kv);
        let sticky_url = ws_url.clone();
        tokio::spawn(async move {
            if let Err(e) = kv.set(STICKY_ENDPOINT_KEY, &sticky_url).await {
                tracing::warn!(error = %e, "Failed to persist sticky endpoint");
            }
        });

        self.publish();
    }

    fn on_closed(&mut self, ws_url: String, session: Uuid, reason: Option<String>) {
        // the session owns queue entries and a writer slot even when the
        // endpoint has already moved on
        self.writers.lock().unwrap().remove(&session);
        for dropped in self.queue.purge_session(session) {
            tracing::debug!(
                id = %dropped.id,
                cmd = %dropped.cmd,
                "Dropped queued command from closed socket"
            );
        }

        let Some(index) = self.index_of(&ws_url) else {
            return;
        };
        if self.endpoints[index].session != Some(session) {
            return;
        }

        let config = self.config.connection.clone();
        let entry = &mut self.endpoints[index];
        entry.state = EndpointState::Closed;
        entry.session = None;
        entry.last_error = reason.clone();
        entry.attempt_task = None;
        if reason.is_some() {
            self.last_error = reason;
        }

        let delay = entry.backoff;
        entry.backoff = next_backoff(entry.backoff, &config);
        entry.generation += 1;
        let generation = entry.generation;
        let events_tx = self.events_tx.clone();
        let url = entry.ws_url.clone();
        entry.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events_tx.send(SocketEvent::ReconnectDue {
                ws_url: url,
                generation,
            });
        }));

        self.publish();
    }

    fn on_reconnect_due(&mut self, ws_url: String, generation: u64) {
        let Some(index) = self.index_of(&ws_url) else {
            return;
        };
        let entry = &self.endpoints[index];
        if entry.generation != generation || entry.state != EndpointState::Closed {
            return;
        }
        self.spawn_attempt(index);
    }

    fn on_frame(&mut self, ws_url: String, session: Uuid, frame: Frame) {
        let Some(index) = self.index_of(&ws_url) else {
            return;
        };
        if self.endpoints[index].session != Some(session) {
            return;
        }

        match frame {
            Frame::Cmd { id, cmd, params } => {
                if let Err(err) = self.queue.admit(&id, session, &cmd, params) {
                    tracing::warn!(id = %id, cmd = %cmd, error = %err, "Refused inbound command");
                    self.send_to_session(session, Frame::res_err(id, ErrorBody::from_error(&err)));
                }
            }
            Frame::Ping {} => {
                self.send_to_session(session, Frame::Pong { t: unix_millis() });
            }
            Frame::HelloAck {} => {
                tracing::debug!(ws_url = %ws_url, "Server accepted hello");
            }
            Frame::Error { message } => {
                tracing::warn!(ws_url = %ws_url, message = %message, "Server rejected connection");
                self.endpoints[index].last_error = Some(message.clone());
                self.last_error = Some(message);
                self.publish();
            }
            // server-originated frames only; anything else is noise
            _ => {}
        }
    }

    fn send_to_session(&self, session: Uuid, frame: Frame) {
        let writer = self.writers.lock().unwrap().get(&session).cloned();
        if let Some(writer) = writer {
            send_frame(&writer, frame);
        }
    }

    fn finalize_session(&self, entry: &mut EndpointEntry) {
        if let Some(session) = entry.session.take() {
            if let Some(writer) = self.writers.lock().unwrap().remove(&session) {
                let _ = writer.send(Message::Close(None));
            }
            for dropped in self.queue.purge_session(session) {
                tracing::debug!(id = %dropped.id, "Dropped queued command from retired endpoint");
            }
        }
    }

    fn index_of(&self, ws_url: &str) -> Option<usize> {
        self.endpoints.iter().position(|e| e.ws_url == ws_url)
    }

    fn publish(&mut self) {
        let connected_endpoints: Vec<String> = self
            .endpoints
            .iter()
            .filter(|e| e.state == EndpointState::Open)
            .map(|e| e.ws_url.clone())
            .collect();

        let disconnected_endpoints: Vec<EndpointFailure> = self
            .endpoints
            .iter()
            .filter(|e| e.state != EndpointState::Open)
            .map(|e| EndpointFailure {
                ws_url: e.ws_url.clone(),
                last_error: e.last_error.clone(),
            })
            .collect();

        let ws_url = connected_endpoints
            .first()
            .cloned()
            .or_else(|| self.configured_head.clone())
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());

        let mut snapshot = StatusSnapshot {
            connected: !connected_endpoints.is_empty(),
            ws_url,
            connected_endpoints,
            disconnected_endpoints,
            last_error: self.last_error.clone(),
            last_change_at: self
                .last_status
                .as_ref()
                .map(|s| s.last_change_at)
                .unwrap_or(0),
        };

        if self.last_status.as_ref() != Some(&snapshot) {
            snapshot.last_change_at = unix_millis();
            self.last_status = Some(snapshot.clone());
            let _ = self.status_tx.send(snapshot);
        }
    }
}

/// Single queue consumer: at most one browser operation in flight
async fn run_worker(
    queue: Arc<CommandQueue>,
    host: Arc<dyn TabHost>,
    writers: Arc<StdMutex<HashMap<Uuid, mpsc::UnboundedSender<Message>>>>,
) {
    loop {
        let item = queue.pop().await;

        let writer = writers.lock().unwrap().get(&item.session).cloned();
        let Some(writer) = writer else {
            tracing::debug!(id = %item.id, "Skipping command for finalized socket");
            queue.mark_completed(&item.id);
            continue;
        };

        if Instant::now() > item.deadline {
            tracing::warn!(id = %item.id, cmd = %item.cmd, "queue_wait_timeout");
            let err = BridgeError::QueueWaitTimeout {
                id: item.id.clone(),
            };
            send_frame(
                &writer,
                Frame::res_err(item.id.clone(), ErrorBody::from_error(&err)),
            );
            queue.mark_completed(&item.id);
            continue;
        }

        let result = dispatch(host.as_ref(), &item.cmd, item.params.clone()).await;
        let frame = match result {
            Ok(value) => Frame::res_ok(item.id.clone(), value),
            Err(err) => Frame::res_err(item.id.clone(), ErrorBody::from_error(&err)),
        };
        send_frame(&writer, frame);
        queue.mark_completed(&item.id);
    }
}

fn send_frame(writer: &mpsc::UnboundedSender<Message>, frame: Frame) {
    match frame.encode() {
        Ok(text) => {
            let _ = writer.send(Message::Text(text));
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode outbound frame"),
    }
}
