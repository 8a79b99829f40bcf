//! Pure health state machine.
//!
//! `transition(state, event)` decides the next state and the side effect the
//! monitor must perform. It performs no I/O, so the whole table is covered by
//! plain unit tests.

use std::fmt;

/// Health of the upstream as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthState {
    /// Last probe succeeded (initial state).
    Healthy,
    /// A periodic probe failed; a restart may be in flight.
    Unhealthy,
    /// Restart succeeded; waiting for the recovery probe.
    RestartAttempted,
    /// Terminal. Monitoring has given up.
    Failed,
}

impl HealthState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Failed
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::RestartAttempted => write!(f, "restart_attempted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Where a probe result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeSource {
    /// Interval tick.
    Periodic,
    /// Follow-up probe after a restart.
    Recovery,
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    ProbePassed(ProbeSource),
    ProbeFailed(ProbeSource),
    RestartSucceeded,
    RestartFailed,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    NoOp,
    /// Call the restart endpoint (subject to the one-shot latch).
    Restart,
    /// Probe again after the recovery wait.
    ScheduleRecovery,
    /// Back to healthy after a degradation.
    Recovered,
    /// Monitoring disabled for the rest of the process.
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: HealthState,
    pub action: HealthAction,
}

impl Transition {
    const fn to(next: HealthState, action: HealthAction) -> Self {
        Self { next, action }
    }

    const fn stay(state: HealthState) -> Self {
        Self::to(state, HealthAction::NoOp)
    }
}

/// The transition table.
///
/// | Current          | Event                  | Next             | Action           |
/// |------------------|------------------------|------------------|------------------|
/// | Failed           | any                    | Failed           | NoOp             |
/// | Healthy          | probe passed           | Healthy          | NoOp             |
/// | Unhealthy        | probe passed           | Healthy          | Recovered        |
/// | RestartAttempted | probe passed           | Healthy          | Recovered        |
/// | Healthy          | periodic probe failed  | Unhealthy        | Restart          |
/// | Unhealthy        | probe failed           | Failed           | GiveUp           |
/// | RestartAttempted | recovery probe failed  | RestartAttempted | NoOp             |
/// | RestartAttempted | periodic probe failed  | Failed           | GiveUp           |
/// | Unhealthy        | restart succeeded      | RestartAttempted | ScheduleRecovery |
/// | Unhealthy        | restart failed         | Failed           | GiveUp           |
///
/// Everything else (a stale recovery result while `Healthy`, a restart outcome
/// outside `Unhealthy`) leaves the state unchanged.
#[must_use]
pub fn transition(state: HealthState, event: HealthEvent) -> Transition {
    use HealthAction as A;
    use HealthEvent as E;
    use HealthState as S;

    match (state, event) {
        (S::Failed, _) => Transition::stay(S::Failed),

        (S::Healthy, E::ProbePassed(_)) => Transition::stay(S::Healthy),
        (S::Unhealthy | S::RestartAttempted, E::ProbePassed(_)) => {
            Transition::to(S::Healthy, A::Recovered)
        }

        (S::Healthy, E::ProbeFailed(ProbeSource::Periodic)) => {
            Transition::to(S::Unhealthy, A::Restart)
        }
        (S::Unhealthy, E::ProbeFailed(_)) => Transition::to(S::Failed, A::GiveUp),
        (S::RestartAttempted, E::ProbeFailed(ProbeSource::Recovery)) => {
            Transition::stay(S::RestartAttempted)
        }
        (S::RestartAttempted, E::ProbeFailed(ProbeSource::Periodic)) => {
            Transition::to(S::Failed, A::GiveUp)
        }

        (S::Unhealthy, E::RestartSucceeded) => {
            Transition::to(S::RestartAttempted, A::ScheduleRecovery)
        }
        (S::Unhealthy, E::RestartFailed) => Transition::to(S::Failed, A::GiveUp),

        (state, _) => Transition::stay(state),
    }
}

/// One-shot guard for the restart action.
///
/// Owned by the monitor task; once spent it stays spent for the process
/// lifetime.
#[derive(Debug, Default)]
pub struct RestartLatch {
    spent: bool,
}

impl RestartLatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once.
    pub fn try_acquire(&mut self) -> bool {
        !std::mem::replace(&mut self.spent, true)
    }

    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.spent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use HealthAction as A;
    use HealthEvent as E;
    use HealthState as S;
    use ProbeSource::{Periodic, Recovery};

    const ALL_STATES: [HealthState; 4] = [S::Healthy, S::Unhealthy, S::RestartAttempted, S::Failed];
    const ALL_EVENTS: [HealthEvent; 6] = [
        E::ProbePassed(Periodic),
        E::ProbePassed(Recovery),
        E::ProbeFailed(Periodic),
        E::ProbeFailed(Recovery),
        E::RestartSucceeded,
        E::RestartFailed,
    ];

    fn check(state: HealthState, event: HealthEvent, next: HealthState, action: HealthAction) {
        assert_eq!(
            transition(state, event),
            Transition { next, action },
            "{state} + {event:?}"
        );
    }

    #[test]
    fn test_degradation_path() {
        check(S::Healthy, E::ProbeFailed(Periodic), S::Unhealthy, A::Restart);
        check(S::Unhealthy, E::RestartSucceeded, S::RestartAttempted, A::ScheduleRecovery);
        check(S::RestartAttempted, E::ProbePassed(Recovery), S::Healthy, A::Recovered);
    }

    #[test]
    fn test_give_up_paths() {
        check(S::Unhealthy, E::RestartFailed, S::Failed, A::GiveUp);
        check(S::Unhealthy, E::ProbeFailed(Periodic), S::Failed, A::GiveUp);
        check(S::RestartAttempted, E::ProbeFailed(Periodic), S::Failed, A::GiveUp);
    }

    #[test]
    fn test_failed_recovery_probe_keeps_waiting() {
        check(S::RestartAttempted, E::ProbeFailed(Recovery), S::RestartAttempted, A::NoOp);
    }

    #[test]
    fn test_periodic_success_recovers_from_any_degraded_state() {
        check(S::Healthy, E::ProbePassed(Periodic), S::Healthy, A::NoOp);
        check(S::Unhealthy, E::ProbePassed(Periodic), S::Healthy, A::Recovered);
        check(S::RestartAttempted, E::ProbePassed(Periodic), S::Healthy, A::Recovered);
    }

    #[test]
    fn test_stale_events_ignored() {
        check(S::Healthy, E::ProbeFailed(Recovery), S::Healthy, A::NoOp);
        check(S::Healthy, E::RestartSucceeded, S::Healthy, A::NoOp);
        check(S::RestartAttempted, E::RestartFailed, S::RestartAttempted, A::NoOp);
    }

    #[test]
    fn test_failed_is_absorbing() {
        for event in ALL_EVENTS {
            check(S::Failed, event, S::Failed, A::NoOp);
        }
    }

    #[test]
    fn test_only_healthy_periodic_failure_requests_restart() {
        for state in ALL_STATES {
            for event in ALL_EVENTS {
                let t = transition(state, event);
                if t.action == A::Restart {
                    assert_eq!((state, event), (S::Healthy, E::ProbeFailed(Periodic)));
                }
            }
        }
    }

    #[test]
    fn test_latch_fires_once() {
        let mut latch = RestartLatch::new();
        assert!(!latch.is_spent());
        assert!(latch.try_acquire());
        assert!(latch.is_spent());
        assert!(!latch.try_acquire());
        assert!(!latch.try_acquire());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(S::Healthy.to_string(), "healthy");
        assert_eq!(S::RestartAttempted.to_string(), "restart_attempted");
        assert!(S::Failed.is_terminal());
        assert!(!S::Unhealthy.is_terminal());
    }
}
