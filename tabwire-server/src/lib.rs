//! tabwire-server: the process side of the tabwire bridge
//!
//! A WebSocket dispatcher that authenticates browser extensions, fans
//! `call()` requests out across them in round-robin order with retry and
//! heartbeat handling, plus the tool-call facade consumed by the MCP host
//! adapter.

pub mod dispatcher;
pub mod mcp;

pub use dispatcher::{BridgeServer, ServerConfig};
pub use mcp::{tool_definitions, Tool, ToolFacade};
