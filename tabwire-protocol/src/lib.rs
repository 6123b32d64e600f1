//! tabwire-protocol: wire definitions shared by the bridge server and the
//! extension supervisor
//!
//! The wire is JSON objects in WebSocket text frames, discriminated by a
//! `type` field. Additive fields are tolerated; unknown frame types are
//! skipped by receivers.

pub mod frames;

pub use frames::{close_codes, codes, commands, reasons, ErrorBody, Frame};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;
