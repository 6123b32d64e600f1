//! tabwire-extension: the extension side of the tabwire bridge
//!
//! A supervisor that discovers candidate bridge-server endpoints, keeps one
//! WebSocket connection state machine per endpoint with exponential-backoff
//! reconnects, funnels every inbound command through a process-global FIFO
//! queue with duplicate-id suppression, and executes commands against a
//! [`browser::TabHost`] seam supplied by the embedding runtime.

pub mod browser;
pub mod connection;
pub mod endpoints;
pub mod queue;
pub mod status;
pub mod storage;
pub mod supervisor;

pub use browser::TabHost;
pub use connection::{ConnectionConfig, EndpointState};
pub use endpoints::{normalize_ws_url, resolve_candidates, DEFAULT_WS_URL};
pub use queue::{CommandQueue, QueueConfig};
pub use status::{EndpointFailure, StatusSnapshot};
pub use storage::{JsonFileKv, KvStore, MemoryKv, CONFIGURED_URL_KEY, STICKY_ENDPOINT_KEY};
pub use supervisor::{Supervisor, SupervisorConfig};
