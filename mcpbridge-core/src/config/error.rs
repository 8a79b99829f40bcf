//! Configuration error types.

use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors.
///
/// Raised while turning command-line input into an upstream or health
/// configuration, before any task is started.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ─────────────────────────────────────────────────────────────────────────
    // Address validation
    // ─────────────────────────────────────────────────────────────────────────
    /// URL is not an absolute `http://` or `https://` address.
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Timing validation
    // ─────────────────────────────────────────────────────────────────────────
    /// Upstream request timeout must be non-zero.
    #[error("request timeout must be greater than zero")]
    InvalidRequestTimeout,

    /// Health check interval below the minimum.
    #[error("health check interval {interval:?} is below the minimum of {min:?}")]
    IntervalTooShort { interval: Duration, min: Duration },

    /// Health probe timeout must be at least `min` and strictly below the interval.
    #[error("health check timeout {timeout:?} must be at least {min:?} and less than the interval {interval:?}")]
    TimeoutOutOfRange {
        timeout: Duration,
        min: Duration,
        interval: Duration,
    },

    /// Recovery wait below the minimum.
    #[error("recovery wait {wait:?} is below the minimum of {min:?}")]
    RecoveryWaitTooShort { wait: Duration, min: Duration },

    // ─────────────────────────────────────────────────────────────────────────
    // Client construction
    // ─────────────────────────────────────────────────────────────────────────
    #[error("failed to build HTTP client: {reason}")]
    HttpClient { reason: String },
}
