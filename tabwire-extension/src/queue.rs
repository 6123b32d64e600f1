//! Process-global command queue
//!
//! Every inbound `cmd` from every socket lands here, and a single worker
//! drains it, so at most one browser operation runs at a time regardless of
//! how many endpoints are connected. The queue also owns duplicate
//! suppression: ids currently queued or executing, plus ids completed within
//! a recent window, are rejected at admission.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;

use tabwire_utils::{BridgeError, Result};

/// Queue tuning; defaults match the production constants
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Hard cap on queued commands across all sockets
    pub max_size: usize,
    /// How long an item may wait before the worker refuses it
    pub wait_timeout: Duration,
    /// Cap on remembered completed ids
    pub completed_max: usize,
    /// How long a completed id keeps rejecting duplicates
    pub completed_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 200,
            wait_timeout: Duration::from_secs(20),
            completed_max: 2000,
            completed_ttl: Duration::from_secs(120),
        }
    }
}

/// One admitted command awaiting serial execution
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub id: String,
    /// Socket session the command arrived on; replies go back there
    pub session: Uuid,
    pub cmd: String,
    pub params: Value,
    pub enqueued_at: Instant,
    pub deadline: Instant,
}

struct QueueInner {
    items: VecDeque<QueuedCommand>,
    /// Ids currently queued or executing
    active: HashSet<String>,
    /// Completed ids in insertion order, with completion time
    completed: VecDeque<(String, Instant)>,
    completed_lookup: HashSet<String>,
}

/// FIFO queue shared between socket readers (producers) and the single
/// worker (consumer)
pub struct CommandQueue {
    config: QueueConfig,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl CommandQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                active: HashSet::new(),
                completed: VecDeque::new(),
                completed_lookup: HashSet::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Admit an inbound command
    ///
    /// Checks run in order: duplicate id, then capacity. On success the id
    /// becomes active and the worker is woken.
    pub fn admit(&self, id: &str, session: Uuid, cmd: &str, params: Value) -> Result<()> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        Self::prune_completed(&mut inner, &self.config, now);

        if inner.active.contains(id) || inner.completed_lookup.contains(id) {
            return Err(BridgeError::DuplicateRequestId { id: id.to_string() });
        }

        if inner.items.len() >= self.config.max_size {
            return Err(BridgeError::QueueOverflow);
        }

        inner.active.insert(id.to_string());
        inner.items.push_back(QueuedCommand {
            id: id.to_string(),
            session,
            cmd: cmd.to_string(),
            params,
            enqueued_at: now,
            deadline: now + self.config.wait_timeout,
        });
        drop(inner);

        self.notify.notify_one();
        Ok(())
    }

    /// Take the next command, waiting if the queue is empty
    pub async fn pop(&self) -> QueuedCommand {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.inner.lock().unwrap().items.pop_front() {
                return item;
            }
            notified.await;
        }
    }

    /// Record that an id finished (executed, refused or dropped); the id
    /// keeps rejecting duplicates for the configured window
    pub fn mark_completed(&self, id: &str) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        inner.active.remove(id);
        if inner.completed_lookup.insert(id.to_string()) {
            inner.completed.push_back((id.to_string(), now));
        }

        Self::prune_completed(&mut inner, &self.config, now);
    }

    /// Drop every queued item owned by a finalized socket
    ///
    /// Their ids are marked completed so late duplicates are still refused.
    /// Returns the removed items for logging.
    pub fn purge_session(&self, session: Uuid) -> Vec<QueuedCommand> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        let mut removed = Vec::new();
        inner.items.retain(|item| {
            if item.session == session {
                removed.push(item.clone());
                false
            } else {
                true
            }
        });

        for item in &removed {
            inner.active.remove(&item.id);
            if inner.completed_lookup.insert(item.id.clone()) {
                inner.completed.push_back((item.id.clone(), now));
            }
        }

        Self::prune_completed(&mut inner, &self.config, now);
        removed
    }

    /// Number of items waiting (excludes the one executing)
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune_completed(inner: &mut QueueInner, config: &QueueConfig, now: Instant) {
        while let Some((id, at)) = inner.completed.front() {
            let expired = now.duration_since(*at) > config.completed_ttl;
            if expired || inner.completed.len() > config.completed_max {
                let id = id.clone();
                inner.completed.pop_front();
                inner.completed_lookup.remove(&id);
            } else {
                break;
            }
        }
    }
}
