//! Upstream MCP client with session continuity and retry.
//!
//! Each local message becomes one HTTP POST to the configured endpoint. The
//! body is the caller's raw line, never re-serialized. The reply is decoded
//! by [`decode_response`] and written straight to the output channel.
//!
//! # Retry
//!
//! Connection failures, timeouts, error statuses and malformed bodies all
//! draw from one attempt budget ([`RetryPolicy`], default 3 attempts with
//! 100ms / 200ms backoff). A failed write to the output channel is never
//! retried.
//!
//! # Session
//!
//! The first non-empty `Mcp-Session-Id` seen on any response (even an error
//! status) is adopted and sent on every later request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, Url};
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use super::decoder::decode_response;
use crate::config::{ConfigError, defaults, validate_http_url};
use crate::error::ForwardError;
use crate::jsonrpc::{JsonRpcMessage, MessageKind};
use crate::session::{SESSION_HEADER, SessionState};

/// Media types the bridge can relay.
const ACCEPT_VALUE: &str = "application/json, text/event-stream";

// ============================================================================
// Configuration
// ============================================================================

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// `backoff[n]` is slept before attempt `n + 2`; the last entry repeats.
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ],
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep before 1-based `attempt`. Zero for the first attempt.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let idx = (attempt - 2) as usize;
        self.backoff
            .get(idx)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Single attempt, no backoff.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Vec::new(),
        }
    }
}

/// Configuration for the upstream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// Full message endpoint (e.g. `http://localhost:8080/mcp`).
    pub url: String,
    /// Overall request timeout, including reading the body.
    pub timeout: Duration,
    /// Largest JSON body, SSE line or SSE event accepted.
    pub max_response_bytes: usize,
    pub retry: RetryPolicy,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: defaults::REQUEST_TIMEOUT,
            max_response_bytes: defaults::MAX_RESPONSE_BYTES,
            retry: RetryPolicy::default(),
        }
    }
}

impl UpstreamConfig {
    /// Default settings for `url`.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Check the URL and timeout; returns the parsed endpoint.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidUrl` or `ConfigError::InvalidRequestTimeout`.
    pub fn validate(&self) -> Result<Url, ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidRequestTimeout);
        }
        validate_http_url(&self.url)
    }
}

// ============================================================================
// Forwarding seam
// ============================================================================

/// Delivers one message upstream and relays the reply (enables mocking in tests).
#[async_trait]
pub trait MessageForwarder: Send {
    /// Forward `raw` (the exact input line) and write every reply message to
    /// `out`. Returns the number of messages written.
    async fn forward(
        &mut self,
        raw: &str,
        message: &JsonRpcMessage,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<usize, ForwardError>;
}

// ============================================================================
// HTTP client
// ============================================================================

/// HTTP forwarder for a single upstream endpoint.
///
/// Owns the session token; calls are strictly sequential (`&mut self`).
#[derive(Debug)]
pub struct UpstreamClient {
    client: Client,
    url: Url,
    config: UpstreamConfig,
    session: SessionState,
}

impl UpstreamClient {
    /// Validate `config` and build the underlying HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for an invalid URL or timeout, or
    /// `ConfigError::HttpClient` if the TLS stack cannot be initialised.
    pub fn new(config: UpstreamConfig) -> Result<Self, ConfigError> {
        let url = config.validate()?;

        let client = Client::builder()
            .timeout(config.timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ConfigError::HttpClient {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            url,
            config,
            session: SessionState::new(),
        })
    }

    #[must_use]
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    #[must_use]
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Forward `raw` with retry, writing replies to `out`.
    ///
    /// `expects_reply` is whether `raw` is a request, which must get a
    /// response back.
    ///
    /// # Errors
    ///
    /// - `ForwardError::Output` as soon as writing to `out` fails
    /// - `ForwardError::Interrupted` when a reply stream broke after part of
    ///   it was relayed
    /// - `ForwardError::Exhausted` once every attempt has failed
    pub async fn forward_with_retry<W>(
        &mut self,
        raw: &str,
        expects_reply: bool,
        out: &mut W,
    ) -> Result<usize, ForwardError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.forward_once(raw, expects_reply, &mut *out).await {
                Ok(emitted) => return Ok(emitted),
                Err(e) if !e.is_retriable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    warn!(attempt, error = %e, "Upstream attempt failed, no attempts left");
                    return Err(ForwardError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    attempt += 1;
                    let backoff = self.config.retry.delay_before(attempt);
                    warn!(
                        attempt = attempt - 1,
                        max_attempts,
                        error = %e,
                        "Upstream attempt failed"
                    );
                    debug!(
                        next_attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Retry scheduled"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// One POST, single attempt.
    async fn forward_once<W>(
        &mut self,
        raw: &str,
        expects_reply: bool,
        out: &mut W,
    ) -> Result<usize, ForwardError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_VALUE)
            .body(raw.to_owned());
        if let Some(token) = self.session.token() {
            request = request.header(SESSION_HEADER, token);
        }

        let response = request.send().await.map_err(|e| self.classify_error(e))?;
        self.observe_session(&response);

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            return Err(ForwardError::status(status.as_u16(), &body));
        }

        debug!(status = status.as_u16(), "Upstream accepted message");
        decode_response(response, self.config.max_response_bytes, expects_reply, out).await
    }

    /// Adopt the session header from `response` if none is held yet.
    fn observe_session(&mut self, response: &Response) {
        let Some(candidate) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };

        if self.session.adopt(candidate) {
            info!(session_id = %candidate, "Upstream session established");
        } else if self.session.token() != Some(candidate) {
            debug!(
                session_id = %candidate,
                "Ignoring session header, a session is already established"
            );
        }
    }

    /// Log a transport failure by kind and wrap it.
    fn classify_error(&self, error: reqwest::Error) -> ForwardError {
        if error.is_timeout() {
            warn!(
                url = %self.url,
                timeout_secs = self.config.timeout.as_secs(),
                "Upstream request timed out"
            );
        } else if error.is_connect() {
            warn!(url = %self.url, "Failed to connect to upstream");
        }
        ForwardError::Request(error)
    }
}

#[async_trait]
impl MessageForwarder for UpstreamClient {
    async fn forward(
        &mut self,
        raw: &str,
        message: &JsonRpcMessage,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<usize, ForwardError> {
        debug!(
            kind = message.kind().as_str(),
            method = message.method.as_deref().unwrap_or(""),
            "Forwarding message upstream"
        );
        let awaits_response = message.kind() == MessageKind::Request;
        self.forward_with_retry(raw, awaits_response, out).await
    }
}
