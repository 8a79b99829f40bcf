//! NDJSON line decoding for the stdin side.
//!
//! Pure functions only; the async read loop lives in [`super::reader`].

use mcpbridge_core::jsonrpc::JsonRpcMessage;

use crate::error::FramingError;

/// Maximum NDJSON message size (10 MB).
///
/// Lines exceeding this limit are rejected before JSON parsing.
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Remove a trailing `\n` or `\r\n`.
#[must_use]
pub fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Decode one line (terminator already removed) into a message.
///
/// Returns `Ok(None)` for blank or whitespace-only lines, which are skipped
/// silently.
///
/// # Errors
///
/// - `MessageTooLarge`: checked before any parsing
/// - `InvalidUtf8`: the bytes are not UTF-8
/// - `MalformedJson`: not a JSON object, or a typed field has the wrong shape
pub fn decode_line(line: &[u8]) -> Result<Option<(&str, JsonRpcMessage)>, FramingError> {
    if line.len() > MAX_MESSAGE_BYTES {
        return Err(FramingError::MessageTooLarge {
            max_bytes: MAX_MESSAGE_BYTES,
        });
    }

    let text = std::str::from_utf8(line).map_err(|_| FramingError::InvalidUtf8)?;
    Ok(parse_line(text)?.map(|message| (text, message)))
}

/// Parse a UTF-8 line into a message.
///
/// # Errors
///
/// `MalformedJson` when the text is not a single JSON-RPC object.
pub fn parse_line(text: &str) -> Result<Option<JsonRpcMessage>, FramingError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    JsonRpcMessage::parse(trimmed)
        .map(Some)
        .map_err(|e| FramingError::MalformedJson {
            reason: e.to_string(),
        })
}
