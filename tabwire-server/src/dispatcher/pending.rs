//! Pending request table
//!
//! Every in-flight `call()` owns exactly one entry here while an attempt is
//! outstanding. Whoever removes the entry owns its resolution: the reader
//! task on a matching `res`, the per-call timer on expiry, the connection
//! finalizer on client loss, or `stop()`. This makes "exactly one of
//! resolve/reject" a structural property rather than a convention.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use tabwire_utils::BridgeError;

/// Terminal state of one dispatch attempt
#[derive(Debug)]
pub(crate) enum PendingOutcome {
    Resolved(Value),
    Failed(BridgeError),
}

pub(crate) struct Pending {
    /// Client the attempt was sent to; responses from anyone else are stale
    pub client_key: Uuid,
    pub tx: oneshot::Sender<PendingOutcome>,
}

/// Concurrent table of outstanding requests keyed by request id
pub(crate) struct PendingTable {
    entries: DashMap<String, Pending>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn insert(&self, id: String, client_key: Uuid, tx: oneshot::Sender<PendingOutcome>) {
        self.entries.insert(id, Pending { client_key, tx });
    }

    /// Detach unconditionally (timer path, send-failure path)
    pub fn take(&self, id: &str) -> Option<Pending> {
        self.entries.remove(id).map(|(_, pending)| pending)
    }

    /// Detach only when the response came from the client the request is
    /// attached to; stale responses from a replaced socket stay unclaimed
    pub fn take_if_client(&self, id: &str, client_key: Uuid) -> Option<Pending> {
        self.entries
            .remove_if(id, |_, pending| pending.client_key == client_key)
            .map(|(_, pending)| pending)
    }

    /// Detach every request attached to a lost client
    pub fn take_for_client(&self, client_key: Uuid) -> Vec<Pending> {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().client_key == client_key)
            .map(|entry| entry.key().clone())
            .collect();

        ids.into_iter()
            .filter_map(|id| self.take_if_client(&id, client_key))
            .collect()
    }

    /// Detach everything (shutdown)
    pub fn drain(&self) -> Vec<Pending> {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.into_iter().filter_map(|id| self.take(&id)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
