//! MCP-facing surface of the bridge server
//!
//! Tool definitions, argument validation and the facade that turns tool
//! calls into dispatcher calls. The stdio JSON-RPC transport itself lives in
//! the MCP host adapter, not here.

pub mod artifacts;
pub mod facade;
pub mod tools;

pub use facade::ToolFacade;
pub use tools::{tool_definitions, Tool};
