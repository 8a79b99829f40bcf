//! Forwarding errors.
//!
//! Every failure between handing a message to the upstream and writing the
//! reply back out is a [`ForwardError`]. Errors that reach the bridge for a
//! message carrying an `id` are turned into a JSON-RPC reply by
//! [`translate::error_reply_line`].

pub mod translate;

use std::io;
use thiserror::Error;

pub use translate::{error_reply, error_reply_line};

/// Longest upstream error body kept in a [`ForwardError::Status`].
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Failure to deliver one message upstream or to relay its reply.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Transport failure: connect, DNS, timeout, TLS, reset mid-body.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Upstream answered with a status >= 400.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not a well-formed protocol message, or broke
    /// framing limits.
    #[error("invalid upstream response: {reason}")]
    Decode { reason: String },

    /// The reply stream stopped after some messages were already relayed,
    /// and before a response arrived. Never retried, so nothing is written
    /// twice.
    #[error("reply stream interrupted after {emitted} messages: {reason}")]
    Interrupted { emitted: usize, reason: String },

    /// Writing to the local output channel failed.
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),

    /// Every attempt failed; `last` is the final attempt's error.
    #[error("failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<ForwardError>,
    },
}

impl ForwardError {
    /// Build a `Status` error, truncating very long bodies.
    #[must_use]
    pub fn status(status: u16, body: &str) -> Self {
        let body = match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
            Some((cut, _)) => format!("{}...", &body[..cut]),
            None => body.to_string(),
        };
        Self::Status {
            status,
            body: body.trim().to_string(),
        }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Whether another attempt may succeed.
    ///
    /// Connection failures, error statuses and malformed bodies share one
    /// retry budget. A broken output channel never recovers, and a partly
    /// relayed stream is not repeated.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::Output(_) | Self::Interrupted { .. })
    }
}
