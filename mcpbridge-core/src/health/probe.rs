//! Health probe and restart calls against the upstream's control endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::join_path;

pub const HEALTH_PATH: &str = "/api/health";
pub const RESTART_PATH: &str = "/api/restart";

/// Why a probe or restart call did not succeed.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("invalid health response: {reason}")]
    Body { reason: String },

    #[error("upstream not ready (state={state:?}, status={status:?})")]
    NotReady { state: String, status: String },
}

/// Body of `GET /api/health`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HealthReport {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub status: String,
}

impl HealthReport {
    /// Ready means `state == "ready"` and `status == "ok"`, exactly.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == "ready" && self.status == "ok"
    }
}

/// Probe and restart operations used by the monitor (enables mocking in tests).
#[async_trait]
pub trait HealthProber: Send + Sync {
    /// One bounded health check.
    async fn probe(&self) -> Result<(), ProbeError>;

    /// Ask the upstream to restart itself.
    async fn restart(&self) -> Result<(), ProbeError>;
}

/// [`HealthProber`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpHealthProber {
    client: Client,
    health_url: String,
    restart_url: String,
    timeout: Duration,
}

impl HttpHealthProber {
    /// Build a prober for `base_url` (scheme://host[:port]).
    ///
    /// Every call is bounded by `timeout`.
    #[must_use]
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            health_url: join_path(base_url, HEALTH_PATH),
            restart_url: join_path(base_url, RESTART_PATH),
            timeout,
        }
    }

    #[must_use]
    pub fn health_url(&self) -> &str {
        &self.health_url
    }

    #[must_use]
    pub fn restart_url(&self) -> &str {
        &self.restart_url
    }
}

#[async_trait]
impl HealthProber for HttpHealthProber {
    async fn probe(&self) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(&self.health_url)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ProbeError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let report: HealthReport =
            serde_json::from_slice(&body).map_err(|e| ProbeError::Body {
                reason: e.to_string(),
            })?;

        if !report.is_ready() {
            return Err(ProbeError::NotReady {
                state: report.state,
                status: report.status,
            });
        }

        debug!(url = %self.health_url, "Health probe passed");
        Ok(())
    }

    async fn restart(&self) -> Result<(), ProbeError> {
        let response = self
            .client
            .post(&self.restart_url)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(ProbeError::Status {
                status: status.as_u16(),
            });
        }

        debug!(url = %self.restart_url, status = status.as_u16(), "Restart accepted");
        Ok(())
    }
}
