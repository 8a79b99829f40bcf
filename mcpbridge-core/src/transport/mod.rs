//! Upstream transport: HTTP forwarding, response decoding and SSE framing.
//!
//! `upstream` owns the request side (retry, session header), `decoder` picks a
//! body framing from the content type, and `sse` reassembles event payloads.

pub mod decoder;
pub mod sse;
pub mod upstream;

pub use decoder::{BodyKind, decode_response};
pub use sse::{SseError, SseParser};
pub use upstream::{MessageForwarder, RetryPolicy, UpstreamClient, UpstreamConfig};
