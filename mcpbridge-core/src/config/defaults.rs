//! Centralized default values and lower bounds for bridge timing.
//!
//! The CLI layer, the upstream client and the health monitor all read their
//! defaults from here so the documented values only live in one place.

use std::time::Duration;

/// Overall upstream request timeout (connect + full response).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum accepted upstream response body, and maximum single SSE line.
pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Delay between periodic health probes.
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Timeout applied to each probe and to the restart call.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between a successful restart and the recovery probe.
pub const RECOVERY_WAIT: Duration = Duration::from_secs(10);

/// Smallest accepted health interval.
pub const MIN_HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// Smallest accepted probe timeout.
pub const MIN_HEALTH_TIMEOUT: Duration = Duration::from_secs(1);

/// Smallest accepted recovery wait.
pub const MIN_RECOVERY_WAIT: Duration = Duration::from_secs(5);
