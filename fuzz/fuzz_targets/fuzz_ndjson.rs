#![no_main]

//! Fuzz target for stdin line decoding and error-reply construction.
//!
//! # Goal
//! Verify that decoding an input line does not:
//! - Panic on malformed JSON, invalid UTF-8 or stray line endings
//! - Accept anything that is not a single JSON object
//! - Produce an error reply that is not exactly one JSON line

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use mcpbridge::bridge::ndjson::{decode_line, strip_line_ending};
use mcpbridge_core::error::{ForwardError, error_reply_line};
use mcpbridge_core::jsonrpc::MessageKind;

/// Fuzz input for line decoding
#[derive(Arbitrary, Debug)]
struct FuzzLineInput {
    /// Raw bytes to decode
    raw_bytes: Vec<u8>,
    /// Structured input for valid-ish JSON-RPC
    structured: Option<StructuredMessage>,
    /// Upstream error text carried into the reply
    error_body: String,
}

#[derive(Arbitrary, Debug)]
struct StructuredMessage {
    id: FuzzId,
    method: Option<String>,
    has_result: bool,
    crlf: bool,
}

#[derive(Arbitrary, Debug)]
enum FuzzId {
    Integer(i64),
    String(String),
    Null,
    Missing,
}

fuzz_target!(|input: FuzzLineInput| {
    fuzz_line(input);
});

fn fuzz_line(input: FuzzLineInput) {
    check(strip_line_ending(&input.raw_bytes), &input.error_body);

    if let Some(structured) = &input.structured {
        let line = build_line(structured);
        check(strip_line_ending(line.as_bytes()), &input.error_body);
    }
}

fn check(line: &[u8], error_body: &str) {
    let Ok(Some((raw, message))) = decode_line(line) else {
        return;
    };
    assert_eq!(raw.as_bytes(), line);

    let Some(id) = message.id.clone() else {
        return;
    };
    assert_ne!(message.kind(), MessageKind::Notification);

    let err = ForwardError::status(500, error_body);
    if let Ok(reply) = error_reply_line(id, &err) {
        assert!(reply.ends_with('\n'));
        assert_eq!(reply.matches('\n').count(), 1);
    }
}

fn build_line(input: &StructuredMessage) -> String {
    let mut fields = vec![r#""jsonrpc":"2.0""#.to_string()];

    match &input.id {
        FuzzId::Integer(n) => fields.push(format!(r#""id":{n}"#)),
        FuzzId::String(s) => fields.push(format!(r#""id":{}"#, serde_json::Value::from(s.as_str()))),
        FuzzId::Null => fields.push(r#""id":null"#.to_string()),
        FuzzId::Missing => {}
    }
    if let Some(method) = &input.method {
        fields.push(format!(r#""method":{}"#, serde_json::Value::from(method.as_str())));
    }
    if input.has_result {
        fields.push(r#""result":{}"#.to_string());
    }

    let ending = if input.crlf { "\r\n" } else { "\n" };
    format!("{{{}}}{ending}", fields.join(","))
}
