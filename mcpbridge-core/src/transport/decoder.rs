//! Response decoding: turns one upstream HTTP response into zero or more
//! output lines.
//!
//! The declared content type picks the path:
//! - `text/event-stream`: the body is streamed through [`SseParser`] and every
//!   event that decodes as a protocol message is emitted; bad or oversized
//!   events are dropped with a warning and the stream continues.
//! - anything else: the body is read in full (bounded) and must be exactly one
//!   protocol message, otherwise the whole response is a decode failure.
//!
//! Emitted payloads are the upstream's own bytes with raw line breaks removed,
//! so each message occupies exactly one output line. Valid JSON cannot carry a
//! raw line break inside a string, so this never changes the message.

use reqwest::Response;
use reqwest::header::CONTENT_TYPE;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::sse::SseParser;
use crate::error::ForwardError;
use crate::jsonrpc::{JsonRpcMessage, MessageKind};

const EVENT_STREAM: &str = "text/event-stream";

/// How a response body is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// One JSON document.
    Json,
    /// Server-Sent Events.
    EventStream,
}

impl BodyKind {
    /// Substring match, so parameters like `; charset=utf-8` are tolerated.
    #[must_use]
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.to_ascii_lowercase().contains(EVENT_STREAM) => Self::EventStream,
            _ => Self::Json,
        }
    }

    #[must_use]
    pub fn of(response: &Response) -> Self {
        Self::from_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        )
    }
}

/// Decode `response` and write every message it carries to `out`.
///
/// Returns the number of messages emitted. `expects_reply` is whether the
/// forwarded message was a request: only then must the body contain a
/// response. Otherwise a JSON body may be empty (e.g. `202 Accepted` for a
/// notification or a client's response).
///
/// # Errors
///
/// - `ForwardError::Request`: the body could not be read before anything
///   was emitted
/// - `ForwardError::Decode`: nothing was emitted and the body was oversized,
///   malformed, empty, or carried no response when one was expected
/// - `ForwardError::Interrupted`: messages were already emitted but the
///   stream broke or ended before a response arrived
/// - `ForwardError::Output`: writing to `out` failed
pub async fn decode_response<W>(
    response: Response,
    max_bytes: usize,
    expects_reply: bool,
    out: &mut W,
) -> Result<usize, ForwardError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    match BodyKind::of(&response) {
        BodyKind::EventStream => {
            decode_event_stream(response, max_bytes, expects_reply, out).await
        }
        BodyKind::Json => decode_json(response, max_bytes, expects_reply, out).await,
    }
}

async fn decode_json<W>(
    response: Response,
    max_bytes: usize,
    expects_reply: bool,
    out: &mut W,
) -> Result<usize, ForwardError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let body = read_body_limited(response, max_bytes).await?;
    if body.iter().all(u8::is_ascii_whitespace) {
        if expects_reply {
            return Err(ForwardError::decode("empty response body"));
        }
        debug!("Upstream returned an empty body, nothing to relay");
        return Ok(0);
    }

    JsonRpcMessage::from_slice(&body)
        .map_err(|e| ForwardError::decode(format!("malformed JSON-RPC response: {e}")))?;

    emit_line(out, &body).await?;
    Ok(1)
}

/// Messages written so far for one event stream.
#[derive(Debug, Default, Clone, Copy)]
struct Relayed {
    messages: usize,
    responses: usize,
}

/// Stream SSE events to `out` as they complete.
///
/// Once anything has been written the request is never retried: a broken
/// stream either ends quietly (a response was already relayed) or becomes
/// `Interrupted`.
async fn decode_event_stream<W>(
    mut response: Response,
    max_bytes: usize,
    expects_reply: bool,
    out: &mut W,
) -> Result<usize, ForwardError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut parser = SseParser::new(max_bytes);
    let mut relayed = Relayed::default();

    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) if relayed.messages == 0 => return Err(e.into()),
            Err(e) if relayed.responses > 0 => {
                warn!(
                    error = %e,
                    messages = relayed.messages,
                    "SSE stream broke after the response was relayed"
                );
                return Ok(relayed.messages);
            }
            Err(e) => {
                return Err(ForwardError::Interrupted {
                    emitted: relayed.messages,
                    reason: e.to_string(),
                });
            }
        };
        emit_frames(out, parser.feed(&chunk), &mut relayed).await?;
    }
    emit_frames(out, parser.finish(), &mut relayed).await?;

    if parser.dropped() > 0 {
        warn!(dropped = parser.dropped(), max_bytes, "SSE events dropped for size");
    }
    debug!(messages = relayed.messages, "SSE stream complete");

    if expects_reply && relayed.responses == 0 {
        let reason = "event stream ended without a response";
        return Err(if relayed.messages == 0 {
            ForwardError::decode(reason)
        } else {
            ForwardError::Interrupted {
                emitted: relayed.messages,
                reason: reason.to_string(),
            }
        });
    }
    Ok(relayed.messages)
}

async fn emit_frames<W>(
    out: &mut W,
    frames: Vec<Vec<u8>>,
    relayed: &mut Relayed,
) -> Result<(), ForwardError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    for frame in frames {
        let message = match JsonRpcMessage::from_slice(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    error = %e,
                    frame_bytes = frame.len(),
                    "Dropping SSE event that is not a valid JSON-RPC message"
                );
                continue;
            }
        };
        emit_line(out, &frame).await?;
        relayed.messages += 1;
        if message.kind() == MessageKind::Response {
            relayed.responses += 1;
        }
    }
    Ok(())
}

/// Write `payload` as one line and flush.
async fn emit_line<W>(out: &mut W, payload: &[u8]) -> Result<(), ForwardError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut line = Vec::with_capacity(payload.len() + 1);
    line.extend(
        payload
            .iter()
            .copied()
            .filter(|b| !matches!(b, b'\n' | b'\r')),
    );
    line.push(b'\n');

    out.write_all(&line).await.map_err(ForwardError::Output)?;
    out.flush().await.map_err(ForwardError::Output)
}

/// Read the response body with a size limit.
///
/// Checks the `Content-Length` header first (if present) for early rejection,
/// then streams the body chunk by chunk so a chunked response without a
/// length cannot grow past `max_bytes`.
async fn read_body_limited(
    mut response: Response,
    max_bytes: usize,
) -> Result<Vec<u8>, ForwardError> {
    if let Some(content_length) = response.content_length() {
        if content_length > max_bytes as u64 {
            warn!(
                content_length,
                max_bytes, "Upstream response exceeds size limit (Content-Length)"
            );
            return Err(ForwardError::decode(format!(
                "response too large: {content_length} bytes exceeds {max_bytes} byte limit"
            )));
        }
    }

    let mut buf = Vec::with_capacity(
        response
            .content_length()
            .map_or(8192, |cl| cl as usize)
            .min(max_bytes),
    );

    while let Some(chunk) = response.chunk().await? {
        if buf.len() + chunk.len() > max_bytes {
            warn!(
                accumulated = buf.len(),
                chunk_size = chunk.len(),
                max_bytes,
                "Upstream response exceeds size limit during streaming"
            );
            return Err(ForwardError::decode(format!(
                "response too large: >={} bytes exceeds {max_bytes} byte limit",
                buf.len() + chunk.len()
            )));
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LIMIT: usize = 64 * 1024;

    async fn fetch(template: ResponseTemplate) -> (MockServer, Response) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(template)
            .mount(&mock_server)
            .await;
        let response = reqwest::Client::new()
            .post(mock_server.uri())
            .send()
            .await
            .unwrap();
        (mock_server, response)
    }

    fn lines(out: &[u8]) -> Vec<String> {
        String::from_utf8(out.to_vec())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_body_kind_from_content_type() {
        assert_eq!(
            BodyKind::from_content_type(Some("text/event-stream")),
            BodyKind::EventStream
        );
        assert_eq!(
            BodyKind::from_content_type(Some("text/event-stream; charset=utf-8")),
            BodyKind::EventStream
        );
        assert_eq!(
            BodyKind::from_content_type(Some("application/json")),
            BodyKind::Json
        );
        assert_eq!(BodyKind::from_content_type(None), BodyKind::Json);
    }

    #[tokio::test]
    async fn test_json_body_emitted_as_one_line() {
        let (_server, response) = fetch(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#, "application/json"),
        )
        .await;

        let mut out = Vec::new();
        let emitted = decode_response(response, LIMIT, true, &mut out).await.unwrap();

        assert_eq!(emitted, 1);
        assert_eq!(
            lines(&out),
            vec![r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#]
        );
    }

    #[tokio::test]
    async fn test_pretty_printed_json_flattened() {
        let body = "{\n  \"jsonrpc\": \"2.0\",\n  \"id\": 2,\n  \"result\": {}\n}\n";
        let (_server, response) =
            fetch(ResponseTemplate::new(200).set_body_raw(body, "application/json")).await;

        let mut out = Vec::new();
        decode_response(response, LIMIT, true, &mut out).await.unwrap();

        let emitted = lines(&out);
        assert_eq!(emitted.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&emitted[0]).unwrap();
        assert_eq!(value["id"], 2);
    }

    #[tokio::test]
    async fn test_malformed_json_is_decode_error() {
        let (_server, response) =
            fetch(ResponseTemplate::new(200).set_body_raw("<html>oops</html>", "text/html")).await;

        let mut out = Vec::new();
        let err = decode_response(response, LIMIT, true, &mut out).await.unwrap_err();

        assert!(matches!(err, ForwardError::Decode { .. }), "got {err:?}");
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_without_id_emits_nothing() {
        let (_server, response) = fetch(ResponseTemplate::new(202)).await;

        let mut out = Vec::new();
        let emitted = decode_response(response, LIMIT, false, &mut out).await.unwrap();

        assert_eq!(emitted, 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_json_rejected() {
        let body = format!(r#"{{"jsonrpc":"2.0","id":1,"result":"{}"}}"#, "x".repeat(2048));
        let (_server, response) =
            fetch(ResponseTemplate::new(200).set_body_raw(body, "application/json")).await;

        let mut out = Vec::new();
        let err = decode_response(response, 1024, true, &mut out).await.unwrap_err();

        match err {
            ForwardError::Decode { reason } => assert!(reason.contains("too large"), "{reason}"),
            other => panic!("expected Decode, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sse_events_emitted_in_order() {
        let body = concat!(
            ": stream open\n",
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n",
            "\n",
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n",
            "\n",
        );
        let (_server, response) =
            fetch(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")).await;

        let mut out = Vec::new();
        let emitted = decode_response(response, LIMIT, true, &mut out).await.unwrap();

        assert_eq!(emitted, 2);
        assert_eq!(
            lines(&out),
            vec![
                r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#,
                r#"{"jsonrpc":"2.0","id":1,"result":{}}"#,
            ]
        );
    }

    #[tokio::test]
    async fn test_sse_split_payload_emitted_once() {
        let body = "data: {\"a\":\ndata: 1}\n\n";
        let (_server, response) =
            fetch(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")).await;

        let mut out = Vec::new();
        let emitted = decode_response(response, LIMIT, false, &mut out).await.unwrap();

        assert_eq!(emitted, 1);
        assert_eq!(lines(&out), vec![r#"{"a":1}"#]);
    }

    #[tokio::test]
    async fn test_sse_invalid_event_dropped_stream_continues() {
        let body = concat!(
            "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":1}\n\n",
            "data: not json at all\n\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":2}\n\n",
        );
        let (_server, response) =
            fetch(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")).await;

        let mut out = Vec::new();
        let emitted = decode_response(response, LIMIT, true, &mut out).await.unwrap();

        assert_eq!(emitted, 2);
        let ids: Vec<i64> = lines(&out)
            .iter()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_sse_trailing_event_flushed_at_eof() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":9,\"result\":null}";
        let (_server, response) =
            fetch(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")).await;

        let mut out = Vec::new();
        let emitted = decode_response(response, LIMIT, true, &mut out).await.unwrap();

        assert_eq!(emitted, 1);
    }

    #[tokio::test]
    async fn test_empty_body_for_request_is_decode_error() {
        let (_server, response) = fetch(ResponseTemplate::new(200)).await;

        let mut out = Vec::new();
        let err = decode_response(response, LIMIT, true, &mut out).await.unwrap_err();

        assert!(matches!(err, ForwardError::Decode { .. }), "got {err:?}");
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_sse_oversized_event_dropped_neighbours_kept() {
        let body = format!(
            "data: {}\n\ndata: {{\"jsonrpc\":\"2.0\",\"id\":\"{}\",\"result\":0}}\n\ndata: {}\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#,
            "x".repeat(4096),
            r#"{"jsonrpc":"2.0","id":3,"result":{}}"#,
        );
        let (_server, response) =
            fetch(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")).await;

        let mut out = Vec::new();
        let emitted = decode_response(response, 1024, true, &mut out).await.unwrap();

        assert_eq!(emitted, 2);
        assert_eq!(
            lines(&out),
            vec![
                r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#,
                r#"{"jsonrpc":"2.0","id":3,"result":{}}"#,
            ]
        );
    }

    #[tokio::test]
    async fn test_sse_without_response_is_decode_error() {
        let (_server, response) = fetch(
            ResponseTemplate::new(200).set_body_raw(": keepalive\n\n", "text/event-stream"),
        )
        .await;

        let mut out = Vec::new();
        let err = decode_response(response, LIMIT, true, &mut out).await.unwrap_err();

        assert!(matches!(err, ForwardError::Decode { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_sse_notifications_only_is_interrupted() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n";
        let (_server, response) =
            fetch(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")).await;

        let mut out = Vec::new();
        let err = decode_response(response, LIMIT, true, &mut out).await.unwrap_err();

        assert!(!err.is_retriable());
        match err {
            ForwardError::Interrupted { emitted, .. } => assert_eq!(emitted, 1),
            other => panic!("expected Interrupted, got {other:?}"),
        }
        assert_eq!(lines(&out).len(), 1);
    }
}
