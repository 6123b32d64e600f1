//! Authenticated client registry
//!
//! Tracks extensions that completed the `hello` handshake and hands out
//! clients for dispatch in round-robin order. Selection order is stable
//! across inserts; removing a client shifts the cursor so the rotation stays
//! fair.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// One authenticated extension socket
pub(crate) struct ClientEntry {
    pub key: Uuid,
    /// Identifier the extension advertised in `hello`
    pub client_id: String,
    pub extension_version: String,
    /// Writer task feed for this socket
    pub sender: mpsc::UnboundedSender<Message>,
    pub last_pong_at: Instant,
}

struct RegistryInner {
    /// Selection order, oldest first
    order: Vec<Uuid>,
    clients: HashMap<Uuid, ClientEntry>,
    /// Next index to try in round-robin selection
    cursor: usize,
}

/// Registry of connected clients with a round-robin cursor
pub(crate) struct ClientRegistry {
    inner: Mutex<RegistryInner>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                order: Vec::new(),
                clients: HashMap::new(),
                cursor: 0,
            }),
        }
    }

    pub fn register(&self, entry: ClientEntry) {
        let mut inner = self.inner.lock().unwrap();
        tracing::info!(
            key = %entry.key,
            client_id = %entry.client_id,
            extension_version = %entry.extension_version,
            "Client authenticated"
        );
        inner.order.push(entry.key);
        inner.clients.insert(entry.key, entry);
    }

    /// Remove a client; the cursor shifts so remaining clients keep their
    /// relative turn order
    pub fn remove(&self, key: Uuid) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(position) = inner.order.iter().position(|k| *k == key) else {
            return false;
        };
        inner.order.remove(position);
        if position < inner.cursor {
            inner.cursor -= 1;
        }
        if inner.cursor >= inner.order.len() {
            inner.cursor = 0;
        }
        inner.clients.remove(&key);
        tracing::info!(key = %key, "Client removed");
        true
    }

    /// Pick the next live client in rotation
    pub fn next_round_robin(&self) -> Option<(Uuid, mpsc::UnboundedSender<Message>)> {
        let mut inner = self.inner.lock().unwrap();
        let len = inner.order.len();
        for _ in 0..len {
            let cursor = inner.cursor;
            let key = inner.order[cursor];
            inner.cursor = (cursor + 1) % len;
            if let Some(entry) = inner.clients.get(&key) {
                if !entry.sender.is_closed() {
                    return Some((key, entry.sender.clone()));
                }
            }
        }
        None
    }

    pub fn record_pong(&self, key: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.clients.get_mut(&key) {
            entry.last_pong_at = Instant::now();
        }
    }

    /// Snapshot for the heartbeat loop
    pub fn heartbeat_view(&self) -> Vec<(Uuid, mpsc::UnboundedSender<Message>, Instant)> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|key| {
                inner
                    .clients
                    .get(key)
                    .map(|e| (e.key, e.sender.clone(), e.last_pong_at))
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().clients.len()
    }

    /// Remove every client, returning their writer handles
    pub fn clear(&self) -> Vec<mpsc::UnboundedSender<Message>> {
        let mut inner = self.inner.lock().unwrap();
        inner.order.clear();
        inner.cursor = 0;
        inner
            .clients
            .drain()
            .map(|(_, entry)| entry.sender)
            .collect()
    }
}
