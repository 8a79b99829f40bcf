//! mcpbridge core: forwarding pipeline and upstream health monitoring.
//!
//! This library holds everything the `mcpbridge` binary needs between reading
//! a JSON-RPC line from stdin and writing replies back to stdout:
//!
//! - [`jsonrpc`]: the message model used to validate traffic in both directions
//! - [`session`]: the adopt-once `Mcp-Session-Id` token
//! - [`transport`]: HTTP forwarding with retry, response decoding and SSE framing
//! - [`error`]: forwarding errors and their translation into JSON-RPC replies
//! - [`health`]: the upstream health monitor and its restart/recovery state machine
//! - [`config`]: URL and timing validation shared by the CLI layer

pub mod config;
pub mod error;
pub mod health;
pub mod jsonrpc;
pub mod session;
pub mod transport;

pub use error::ForwardError;
pub use jsonrpc::{JsonRpcError, JsonRpcMessage};
pub use session::SessionState;
