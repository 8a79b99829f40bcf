//! Translation of forwarding failures into JSON-RPC error replies.

use serde_json::Value;

use super::ForwardError;
use crate::jsonrpc::{INTERNAL_ERROR, JsonRpcMessage};

/// Build the reply sent when forwarding a message with `id` failed.
///
/// Always code -32603, message `Internal error: <cause>`. The id is copied
/// through untouched, including `null`.
#[must_use]
pub fn error_reply(id: Value, err: &ForwardError) -> JsonRpcMessage {
    JsonRpcMessage::error_reply(id, INTERNAL_ERROR, format!("Internal error: {err}"))
}

/// [`error_reply`] serialized as one newline-terminated output line.
///
/// # Errors
///
/// Propagates `serde_json` serialization failures.
pub fn error_reply_line(id: Value, err: &ForwardError) -> Result<String, serde_json::Error> {
    error_reply(id, err).to_line()
}
