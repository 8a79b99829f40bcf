//! Error types for the stdio side of the bridge.
//!
//! `FramingError` covers a single input line that cannot be turned into a
//! message. Every variant except `Io` is recoverable: the line is skipped.
//!
//! `BridgeError` ends the process: bad configuration, a dead stdin, or a
//! stdout that can no longer be written.

use std::io;

use mcpbridge_core::config::ConfigError;

/// Errors that can occur when reading one NDJSON-framed message.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// A single line exceeds the configured maximum size.
    ///
    /// The rest of the line is drained so the next read starts cleanly.
    #[error("Message exceeds maximum size of {max_bytes} bytes")]
    MessageTooLarge {
        /// The configured maximum message size in bytes.
        max_bytes: usize,
    },

    #[error("Message is not valid UTF-8")]
    InvalidUtf8,

    /// The line is not a JSON object, or a JSON-RPC field has the wrong type.
    #[error("Malformed JSON: {reason}")]
    MalformedJson {
        /// Human-readable description of the parse failure.
        reason: String,
    },

    /// An underlying IO error occurred while reading stdin.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Fatal bridge errors.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to read input: {0}")]
    Input(#[source] io::Error),

    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
}
