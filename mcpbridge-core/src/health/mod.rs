//! Upstream health monitor.
//!
//! A single task owns the [`HealthState`] and the one-shot [`RestartLatch`].
//! It probes the upstream on a fixed interval (first probe after one full
//! interval), feeds each result through [`transition`], and performs the
//! requested action:
//!
//! - `Restart`: call the restart endpoint once per process lifetime
//! - `ScheduleRecovery`: spawn a detached task that sleeps for the recovery
//!   wait, probes again and reports back over an `mpsc` channel, so recovery
//!   results are serialized through the owner like periodic ones
//! - `GiveUp`: log and stop probing; `Failed` is terminal
//!
//! State changes are published on a `watch` channel. Shutdown goes through a
//! `CancellationToken` observed by both the tick loop and any pending
//! recovery wait; [`HealthMonitorHandle::stop`] cancels and joins the task.

pub mod machine;
pub mod probe;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, defaults, validate_http_url};

pub use machine::{
    HealthAction, HealthEvent, HealthState, ProbeSource, RestartLatch, Transition, transition,
};
pub use probe::{HealthProber, HealthReport, HttpHealthProber, ProbeError};

// ============================================================================
// Configuration
// ============================================================================

/// Health monitor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// `scheme://host[:port]` serving `/api/health` and `/api/restart`.
    pub base_url: String,
    /// Delay between periodic probes.
    pub interval: Duration,
    /// Bound on each probe and on the restart call.
    pub timeout: Duration,
    /// Delay between a successful restart and the recovery probe.
    pub recovery_wait: Duration,
}

impl HealthConfig {
    /// Default timings for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            interval: defaults::HEALTH_INTERVAL,
            timeout: defaults::HEALTH_TIMEOUT,
            recovery_wait: defaults::RECOVERY_WAIT,
        }
    }

    /// Enforce the timing bounds.
    ///
    /// # Errors
    ///
    /// - `InvalidUrl`: base URL is not http(s)
    /// - `IntervalTooShort`: interval below 5s
    /// - `TimeoutOutOfRange`: timeout below 1s or not shorter than the interval
    /// - `RecoveryWaitTooShort`: recovery wait below 5s
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url(&self.base_url)?;

        if self.interval < defaults::MIN_HEALTH_INTERVAL {
            return Err(ConfigError::IntervalTooShort {
                interval: self.interval,
                min: defaults::MIN_HEALTH_INTERVAL,
            });
        }
        if self.timeout < defaults::MIN_HEALTH_TIMEOUT || self.timeout >= self.interval {
            return Err(ConfigError::TimeoutOutOfRange {
                timeout: self.timeout,
                min: defaults::MIN_HEALTH_TIMEOUT,
                interval: self.interval,
            });
        }
        if self.recovery_wait < defaults::MIN_RECOVERY_WAIT {
            return Err(ConfigError::RecoveryWaitTooShort {
                wait: self.recovery_wait,
                min: defaults::MIN_RECOVERY_WAIT,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Owner-side handle to a running monitor.
#[derive(Debug)]
pub struct HealthMonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    state_rx: watch::Receiver<HealthState>,
}

impl HealthMonitorHandle {
    /// Latest published state.
    #[must_use]
    pub fn state(&self) -> HealthState {
        *self.state_rx.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.state_rx.clone()
    }

    /// Cancel the monitor and wait for its task to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Health monitor task ended abnormally");
        }
    }
}

// ============================================================================
// Monitor task
// ============================================================================

/// State-owning monitor task. Created through [`HealthMonitor::spawn`].
pub struct HealthMonitor {
    config: HealthConfig,
    prober: Arc<dyn HealthProber>,
    state: HealthState,
    latch: RestartLatch,
    state_tx: watch::Sender<HealthState>,
    recovery_tx: mpsc::Sender<bool>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    /// Start monitoring with the HTTP prober.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `config` is invalid or the HTTP client cannot
    /// be built.
    pub fn start(config: HealthConfig) -> Result<HealthMonitorHandle, ConfigError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient {
                reason: e.to_string(),
            })?;
        let prober = HttpHealthProber::new(client, &config.base_url, config.timeout);
        Self::spawn(config, Arc::new(prober))
    }

    /// Start monitoring with a caller-supplied prober.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `config` is invalid.
    pub fn spawn(
        config: HealthConfig,
        prober: Arc<dyn HealthProber>,
    ) -> Result<HealthMonitorHandle, ConfigError> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(HealthState::Healthy);
        let (recovery_tx, recovery_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let monitor = Self {
            config,
            prober,
            state: HealthState::Healthy,
            latch: RestartLatch::new(),
            state_tx,
            recovery_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(monitor.run(recovery_rx));

        Ok(HealthMonitorHandle {
            cancel,
            task,
            state_rx,
        })
    }

    async fn run(mut self, mut recovery_rx: mpsc::Receiver<bool>) {
        info!(
            base_url = %self.config.base_url,
            interval_secs = self.config.interval.as_secs(),
            timeout_secs = self.config.timeout.as_secs(),
            recovery_wait_secs = self.config.recovery_wait.as_secs(),
            "Health monitor started"
        );

        let cancel = self.cancel.clone();
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(passed) = recovery_rx.recv() => {
                    self.apply(probe_event(ProbeSource::Recovery, passed)).await;
                }
                _ = ticker.tick() => {
                    if self.state.is_terminal() {
                        debug!("Health monitoring disabled, skipping probe");
                        continue;
                    }
                    let passed = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        passed = run_probe(self.prober.as_ref(), self.config.timeout, ProbeSource::Periodic) => passed,
                    };
                    self.apply(probe_event(ProbeSource::Periodic, passed)).await;
                }
            }
        }

        info!(state = %self.state, "Health monitor stopped");
    }

    /// Drive the machine until no follow-up event remains.
    async fn apply(&mut self, event: HealthEvent) {
        let mut pending = Some(event);
        while let Some(event) = pending.take() {
            let Transition { next, action } = transition(self.state, event);
            self.set_state(next);

            pending = match action {
                HealthAction::NoOp => None,
                HealthAction::Restart => self.restart().await,
                HealthAction::ScheduleRecovery => {
                    self.schedule_recovery();
                    None
                }
                HealthAction::Recovered => {
                    info!("Upstream recovered");
                    None
                }
                HealthAction::GiveUp => {
                    error!(
                        "Upstream still unhealthy, health monitoring disabled, manual intervention required"
                    );
                    None
                }
            };
        }
    }

    fn set_state(&mut self, next: HealthState) {
        if next == self.state {
            return;
        }
        info!(from = %self.state, to = %next, "Health state changed");
        self.state = next;
        self.state_tx.send_replace(next);
    }

    /// Perform the one-shot restart; returns its outcome as an event.
    async fn restart(&mut self) -> Option<HealthEvent> {
        if !self.latch.try_acquire() {
            warn!(state = %self.state, "Restart already attempted, not retrying");
            return None;
        }

        info!("Requesting upstream restart");
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                info!("Monitor stopping, abandoning restart request");
                return None;
            }
            outcome = tokio::time::timeout(self.config.timeout, self.prober.restart()) => outcome,
        };
        match outcome {
            Ok(Ok(())) => Some(HealthEvent::RestartSucceeded),
            Ok(Err(e)) => {
                error!(error = %e, "Upstream restart failed");
                Some(HealthEvent::RestartFailed)
            }
            Err(_) => {
                error!(
                    timeout_secs = self.config.timeout.as_secs(),
                    "Upstream restart timed out"
                );
                Some(HealthEvent::RestartFailed)
            }
        }
    }

    /// Probe again after the recovery wait, reporting back to the owner.
    fn schedule_recovery(&self) {
        let prober = Arc::clone(&self.prober);
        let recovery_tx = self.recovery_tx.clone();
        let cancel = self.cancel.clone();
        let wait = self.config.recovery_wait;
        let timeout = self.config.timeout;

        debug!(wait_secs = wait.as_secs(), "Recovery probe scheduled");
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(wait) => {
                    let passed = run_probe(prober.as_ref(), timeout, ProbeSource::Recovery).await;
                    let _ = recovery_tx.send(passed).await;
                }
            }
        });
    }
}

fn probe_event(source: ProbeSource, passed: bool) -> HealthEvent {
    if passed {
        HealthEvent::ProbePassed(source)
    } else {
        HealthEvent::ProbeFailed(source)
    }
}

async fn run_probe(prober: &dyn HealthProber, timeout: Duration, source: ProbeSource) -> bool {
    match tokio::time::timeout(timeout, prober.probe()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(?source, error = %e, "Health probe failed");
            false
        }
        Err(_) => {
            warn!(?source, timeout_secs = timeout.as_secs(), "Health probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INTERVAL: Duration = Duration::from_secs(30);
    const RECOVERY_WAIT: Duration = Duration::from_secs(10);

    /// Prober that replays scripted probe results, then repeats `fallback`.
    struct ScriptedProber {
        script: Mutex<VecDeque<bool>>,
        fallback: bool,
        restart_ok: bool,
        probes: AtomicUsize,
        restarts: AtomicUsize,
    }

    impl ScriptedProber {
        fn new(script: &[bool], fallback: bool, restart_ok: bool) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                fallback,
                restart_ok,
                probes: AtomicUsize::new(0),
                restarts: AtomicUsize::new(0),
            })
        }

        fn probes(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }

        fn restarts(&self) -> usize {
            self.restarts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthProber for ScriptedProber {
        async fn probe(&self) -> Result<(), ProbeError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let passed = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback);
            if passed {
                Ok(())
            } else {
                Err(ProbeError::Status { status: 503 })
            }
        }

        async fn restart(&self) -> Result<(), ProbeError> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            if self.restart_ok {
                Ok(())
            } else {
                Err(ProbeError::Status { status: 500 })
            }
        }
    }

    fn config() -> HealthConfig {
        HealthConfig {
            base_url: "http://127.0.0.1:8080".to_string(),
            interval: INTERVAL,
            timeout: Duration::from_secs(5),
            recovery_wait: RECOVERY_WAIT,
        }
    }

    async fn wait_for_state(rx: &mut watch::Receiver<HealthState>, target: HealthState) {
        tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(|s| *s == target))
            .await
            .expect("state not reached")
            .expect("monitor dropped");
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    #[test]
    fn test_config_validation() {
        let with = |f: fn(&mut HealthConfig)| {
            let mut c = HealthConfig {
                interval: Duration::from_secs(60),
                recovery_wait: Duration::from_secs(10),
                ..HealthConfig::new("http://localhost:8080")
            };
            f(&mut c);
            c.validate()
        };

        assert!(with(|_| {}).is_ok());
        assert!(HealthConfig::new("http://localhost:8080").validate().is_ok());
        assert!(matches!(
            with(|c| c.interval = Duration::from_secs(4)),
            Err(ConfigError::IntervalTooShort { .. })
        ));
        assert!(matches!(
            with(|c| c.timeout = Duration::from_millis(500)),
            Err(ConfigError::TimeoutOutOfRange { .. })
        ));
        assert!(matches!(
            with(|c| c.timeout = Duration::from_secs(60)),
            Err(ConfigError::TimeoutOutOfRange { .. })
        ));
        assert!(matches!(
            with(|c| c.recovery_wait = Duration::from_secs(4)),
            Err(ConfigError::RecoveryWaitTooShort { .. })
        ));
        assert!(matches!(
            with(|c| c.base_url = "localhost:8080".to_string()),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_config() {
        let prober = ScriptedProber::new(&[], true, true);
        let bad = HealthConfig {
            interval: Duration::from_secs(1),
            ..config()
        };
        assert!(HealthMonitor::spawn(bad, prober).is_err());
    }

    // ========================================================================
    // Monitor behaviour (paused clock)
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_first_probe_after_full_interval() {
        let prober = ScriptedProber::new(&[], true, true);
        let handle = HealthMonitor::spawn(config(), prober.clone()).unwrap();

        tokio::time::sleep(INTERVAL - Duration::from_secs(1)).await;
        assert_eq!(prober.probes(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(prober.probes(), 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_upstream_never_restarted() {
        let prober = ScriptedProber::new(&[], true, true);
        let handle = HealthMonitor::spawn(config(), prober.clone()).unwrap();

        tokio::time::sleep(INTERVAL * 3 + Duration::from_secs(5)).await;

        assert_eq!(prober.probes(), 3);
        assert_eq!(prober.restarts(), 0);
        assert_eq!(handle.state(), HealthState::Healthy);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_probe_restarts_once_then_fails() {
        let prober = ScriptedProber::new(&[], false, true);
        let handle = HealthMonitor::spawn(config(), prober.clone()).unwrap();
        let mut rx = handle.subscribe();

        wait_for_state(&mut rx, HealthState::Failed).await;
        tokio::time::sleep(INTERVAL * 5).await;

        assert_eq!(prober.restarts(), 1);
        assert_eq!(handle.state(), HealthState::Failed);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_failure_is_terminal_and_stops_probing() {
        let prober = ScriptedProber::new(&[], false, false);
        let handle = HealthMonitor::spawn(config(), prober.clone()).unwrap();
        let mut rx = handle.subscribe();

        wait_for_state(&mut rx, HealthState::Failed).await;
        let probes_at_failure = prober.probes();
        tokio::time::sleep(INTERVAL * 5).await;

        assert_eq!(probes_at_failure, 1);
        assert_eq!(prober.probes(), 1);
        assert_eq!(prober.restarts(), 1);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_within_recovery_wait() {
        let prober = ScriptedProber::new(&[false], true, true);
        let handle = HealthMonitor::spawn(config(), prober.clone()).unwrap();
        let mut rx = handle.subscribe();

        wait_for_state(&mut rx, HealthState::RestartAttempted).await;
        let restarted_at = Instant::now();

        wait_for_state(&mut rx, HealthState::Healthy).await;
        let recovered_after = restarted_at.elapsed();

        assert!(
            recovered_after <= RECOVERY_WAIT + Duration::from_secs(1),
            "recovered after {recovered_after:?}"
        );
        assert!(recovered_after < INTERVAL);
        assert_eq!(prober.restarts(), 1);
        assert_eq!(prober.probes(), 2);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_degradation_does_not_restart_again() {
        // t=30 fail -> restart, t=40 recovery pass, t=60 fail, t=90 fail.
        let prober = ScriptedProber::new(&[false, true, false, false], false, true);
        let handle = HealthMonitor::spawn(config(), prober.clone()).unwrap();
        let mut rx = handle.subscribe();

        wait_for_state(&mut rx, HealthState::RestartAttempted).await;
        wait_for_state(&mut rx, HealthState::Healthy).await;
        wait_for_state(&mut rx, HealthState::Unhealthy).await;
        wait_for_state(&mut rx, HealthState::Failed).await;

        assert_eq!(prober.restarts(), 1);
        assert_eq!(prober.probes(), 4);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_idle_is_bounded() {
        let prober = ScriptedProber::new(&[], true, true);
        let handle = HealthMonitor::spawn(config(), prober).unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(1), handle.stop()).await;
        assert!(stopped.is_ok());
    }

    /// Upstream whose restart call never completes.
    struct HungRestart {
        restarts: AtomicUsize,
    }

    #[async_trait]
    impl HealthProber for HungRestart {
        async fn probe(&self) -> Result<(), ProbeError> {
            Err(ProbeError::Status { status: 503 })
        }

        async fn restart(&self) -> Result<(), ProbeError> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_restart_is_not_held_by_restart_timeout() {
        let upstream = Arc::new(HungRestart {
            restarts: AtomicUsize::new(0),
        });
        let handle = HealthMonitor::spawn(config(), upstream.clone()).unwrap();

        tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(upstream.restarts.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), HealthState::Unhealthy);

        // The restart call still has 4s of its 5s timeout left.
        let stopped = tokio::time::timeout(Duration::from_secs(1), handle.stop()).await;
        assert!(stopped.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_recovery_wait_cancels_probe() {
        let prober = ScriptedProber::new(&[false], true, true);
        let handle = HealthMonitor::spawn(config(), prober.clone()).unwrap();
        let mut rx = handle.subscribe();

        wait_for_state(&mut rx, HealthState::RestartAttempted).await;
        let stopped = tokio::time::timeout(Duration::from_secs(1), handle.stop()).await;
        assert!(stopped.is_ok());

        tokio::time::sleep(RECOVERY_WAIT * 2).await;
        assert_eq!(prober.probes(), 1);
    }
}
