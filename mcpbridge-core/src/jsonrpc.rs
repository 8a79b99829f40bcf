//! JSON-RPC 2.0 message model.
//!
//! The bridge never re-serializes forwarded traffic: messages are decoded only
//! to prove they are well-formed and to read the `id` used for error replies.
//! The `id` is kept as an opaque [`serde_json::Value`] and is never compared,
//! ordered or interpreted numerically.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Version tag written on replies the bridge synthesizes itself.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC "Internal error" code, used for every forwarding failure.
pub const INTERNAL_ERROR: i64 = -32603;

/// A JSON-RPC 2.0 request, notification or response.
///
/// Classification follows field presence:
/// - `method` present: request (with `id`) or notification (without)
/// - `result` or `error` present: response
///
/// An explicit `"id": null` counts as present. Unknown fields are ignored and
/// the `jsonrpc` tag is not validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    /// Protocol version tag (normally `"2.0"`).
    #[serde(default)]
    pub jsonrpc: String,

    /// Correlation id; absent for notifications.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Coarse message classification, used for logging and reply decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Has `method` and `id`; a reply is expected.
    Request,
    /// Has `method` but no `id`; no reply is ever sent.
    Notification,
    /// Has `result` or `error`.
    Response,
    /// Decoded, but carries none of the distinguishing fields.
    Unclassified,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Notification => "notification",
            Self::Response => "response",
            Self::Unclassified => "unclassified",
        }
    }
}

impl JsonRpcMessage {
    /// Decode a message from text.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error when the text is not a JSON
    /// object or a typed field has the wrong shape.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Decode a message from raw bytes (response bodies, SSE frames).
    ///
    /// # Errors
    ///
    /// Same as [`JsonRpcMessage::parse`], plus invalid UTF-8 inside strings.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match (&self.method, &self.id) {
            (Some(_), Some(_)) => MessageKind::Request,
            (Some(_), None) => MessageKind::Notification,
            (None, _) if self.result.is_some() || self.error.is_some() => MessageKind::Response,
            (None, _) => MessageKind::Unclassified,
        }
    }

    /// Whether a failure to deliver this message must be answered.
    ///
    /// Only the presence of `id` matters; notifications never get a reply.
    #[must_use]
    pub fn expects_reply(&self) -> bool {
        self.id.is_some()
    }

    /// Build an error response carrying `id` unchanged.
    #[must_use]
    pub fn error_reply(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            ..Self::default()
        }
    }

    /// Serialize as a single NDJSON line, including the trailing newline.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` serialization failures.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Wrap whatever value is present (including `null`) in `Some`.
///
/// Combined with `#[serde(default)]`, a missing field stays `None` while an
/// explicit `null` becomes `Some(Value::Null)`.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
