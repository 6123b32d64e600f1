//! tabwire-utils: shared infrastructure for the tabwire workspace
//!
//! Error type, logging setup, environment discovery and filesystem paths
//! used by both the bridge server and the extension supervisor.

pub mod env;
pub mod error;
pub mod logging;
pub mod paths;
pub mod time;

pub use error::{BridgeError, Result};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogOutput};
