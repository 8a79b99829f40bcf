//! Command-line arguments and their validated form.
//!
//! Kept out of `main.rs` so tests can parse and validate argument vectors
//! directly.

use std::time::Duration;

use clap::Parser;

use mcpbridge_core::config::{ConfigError, origin_of};
use mcpbridge_core::health::HealthConfig;
use mcpbridge_core::transport::UpstreamConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

/// Bridge a stdio MCP client to a Streamable HTTP MCP server.
///
/// Reads newline-delimited JSON-RPC from stdin, POSTs each message to URL,
/// and writes every reply to stdout as one JSON line.
#[derive(Parser, Debug)]
#[command(name = "mcpbridge", version)]
pub struct Cli {
    /// Enable debug logging (same as --verbose).
    #[arg(long)]
    pub debug: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Overall HTTP request timeout in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 120)]
    pub timeout: u64,

    /// Probe the upstream periodically and restart it once when unhealthy.
    #[arg(long)]
    pub health_check: bool,

    /// Seconds between health probes (minimum 5).
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub health_interval: u64,

    /// Health probe timeout in seconds (at least 1, below the interval).
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub health_timeout: u64,

    /// Seconds to wait after a restart before probing again (minimum 5).
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub recovery_wait: u64,

    /// Base address for /api/health and /api/restart [default: origin of URL].
    #[arg(long, value_name = "URL")]
    pub health_base_url: Option<String>,

    /// Upstream MCP endpoint (http:// or https://).
    pub url: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Validated Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Everything `main` needs, after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub upstream: UpstreamConfig,
    /// `None` unless `--health-check` was given.
    pub health: Option<HealthConfig>,
    pub verbose: bool,
}

impl Cli {
    /// Validate the arguments into a [`BridgeConfig`].
    ///
    /// `debug_env` is whether `DEBUG=1` is set; it enables debug logging like
    /// `--debug`.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] from the upstream URL, the request timeout, or
    /// (when enabled) the health timings.
    pub fn into_config(self, debug_env: bool) -> Result<BridgeConfig, ConfigError> {
        let upstream = UpstreamConfig {
            timeout: Duration::from_secs(self.timeout),
            ..UpstreamConfig::with_url(self.url)
        };
        let endpoint = upstream.validate()?;

        let health = if self.health_check {
            let base_url = self
                .health_base_url
                .unwrap_or_else(|| origin_of(&endpoint));
            let health = HealthConfig {
                interval: Duration::from_secs(self.health_interval),
                timeout: Duration::from_secs(self.health_timeout),
                recovery_wait: Duration::from_secs(self.recovery_wait),
                ..HealthConfig::new(base_url)
            };
            health.validate()?;
            Some(health)
        } else {
            None
        };

        Ok(BridgeConfig {
            upstream,
            health,
            verbose: self.debug || self.verbose || debug_env,
        })
    }
}
