//! Recovery decisions for failed attempts.
//!
//! [`decide`] is a pure state machine: given the configured policy, the
//! attempt state so far, and the latest outcome, it says what happens next.
//! It never sleeps, probes, or spawns anything; [`wait_for_recovery`] does
//! the waiting and probing once the decision is `RetryAfterBackoff`.
//!
//! Two failure families get retried:
//! - Context overflow restarts in a fresh session with a note telling the
//!   agent to keep the change minimal, at most
//!   `context_overflow_max_retries` times per task.
//! - Transient API failures (rate limit, overload, timeout, process error)
//!   wait out the backoff schedule, probing agent health between delays,
//!   then resume the same session.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RecoveryConfigSection;
use crate::outcome::{ErrorKind, Outcome};
use crate::testing::HealthProbe;

// ============================================================
// Policy
// ============================================================

/// Runtime recovery policy, resolved from configuration and CLI flags.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Master switch; off means every non-success outcome is final.
    pub enabled: bool,
    /// Backoff schedule for transient failures.
    pub backoff_delays: Vec<Duration>,
    /// Fresh-session retries allowed per task after context overflow.
    pub context_overflow_max_retries: u32,
    /// Backoff cycles allowed per task for transient failures.
    pub max_transient_retries: u32,
    /// Kinds fatal to the whole queue beyond AUTH_ERROR.
    pub also_fatal: Vec<ErrorKind>,
}

impl RecoveryConfig {
    /// Build from the config file section.
    #[must_use]
    pub fn from_section(section: &RecoveryConfigSection) -> Self {
        Self {
            enabled: section.enabled,
            backoff_delays: section
                .backoff_delays
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
            context_overflow_max_retries: section.context_overflow_max_retries,
            max_transient_retries: section.backoff_delays.len() as u32,
            also_fatal: section.also_fatal.clone(),
        }
    }

    /// True when this kind must halt the remaining queue.
    #[must_use]
    pub fn is_fatal(&self, kind: ErrorKind) -> bool {
        kind.is_fatal() || self.also_fatal.contains(&kind)
    }
}

// ============================================================
// Per-task attempt state
// ============================================================

/// Mutable state carried across one task's attempts.
#[derive(Debug, Clone, Default)]
pub struct AttemptState {
    /// Fresh-session retries consumed after context overflow.
    pub context_overflow_attempts: u32,
    /// Backoff cycles consumed for transient failures.
    pub transient_attempts: u32,
    /// Session to resume on the next attempt, when set.
    pub resume_session_id: Option<String>,
    /// Note prepended to the next attempt's prompt, when set.
    pub recovery_note: Option<String>,
}

/// What the pipeline should do after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryStep {
    /// Task is resolved; no further attempts.
    Done,
    /// Retry immediately in a fresh session.
    RetryFresh,
    /// Wait out the backoff schedule, then retry resuming the session.
    RetryAfterBackoff,
    /// Retries exhausted or not applicable; the failure stands.
    Exhausted,
}

/// Decide the next step for a task given its latest outcome.
///
/// Updates `state` with the retry bookkeeping (counters, resume session,
/// recovery note) when a retry is granted.
pub fn decide(config: &RecoveryConfig, state: &mut AttemptState, outcome: &Outcome) -> RecoveryStep {
    match outcome.kind {
        ErrorKind::Success | ErrorKind::OnHold => RecoveryStep::Done,

        kind if config.is_fatal(kind) => RecoveryStep::Exhausted,

        _ if !config.enabled => RecoveryStep::Exhausted,

        ErrorKind::ContextOverflow => {
            if state.context_overflow_attempts >= config.context_overflow_max_retries {
                warn!(
                    "Context overflow retry limit reached ({} attempts)",
                    state.context_overflow_attempts
                );
                return RecoveryStep::Exhausted;
            }
            state.context_overflow_attempts += 1;
            state.resume_session_id = None;
            state.recovery_note = Some(
                "Previous attempt failed with context overflow. \
                 Focus on essential changes only."
                    .to_string(),
            );
            debug!(
                "Granting fresh-session retry {} of {}",
                state.context_overflow_attempts, config.context_overflow_max_retries
            );
            RecoveryStep::RetryFresh
        }

        kind if kind.is_transient() => {
            if state.transient_attempts >= config.max_transient_retries {
                warn!(
                    "Transient retry limit reached ({} attempts)",
                    state.transient_attempts
                );
                return RecoveryStep::Exhausted;
            }
            state.transient_attempts += 1;
            state.resume_session_id = outcome.session_id.clone();
            state.recovery_note = Some(format!(
                "Previous attempt was interrupted by {}. \
                 This is a recovery resume. Continue where you left off.",
                kind
            ));
            RecoveryStep::RetryAfterBackoff
        }

        _ => RecoveryStep::Exhausted,
    }
}

// ============================================================
// Backoff and health probing
// ============================================================

/// Events emitted while waiting out a backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryEvent {
    /// About to wait `delay` before probe number `attempt`.
    Waiting { attempt: u32, delay: Duration },
    /// A probe reported the agent healthy.
    ProbeHealthy,
    /// A probe reported the agent still unhealthy.
    ProbeUnhealthy(ErrorKind),
}

/// Wait for the agent to become viable again.
///
/// Probes immediately, then once after each configured delay. Returns `true`
/// as soon as a probe succeeds; `false` when the whole schedule passes
/// without one. `on_event` receives progress for logs and notifications.
pub async fn wait_for_recovery(
    config: &RecoveryConfig,
    probe: &dyn HealthProbe,
    mut on_event: impl FnMut(RecoveryEvent),
) -> bool {
    match probe.check().await {
        Ok(()) => {
            on_event(RecoveryEvent::ProbeHealthy);
            return true;
        }
        Err(kind) => on_event(RecoveryEvent::ProbeUnhealthy(kind)),
    }

    for (index, delay) in config.backoff_delays.iter().enumerate() {
        let attempt = index as u32 + 1;
        info!("Waiting {}s before recovery probe {attempt}", delay.as_secs());
        on_event(RecoveryEvent::Waiting {
            attempt,
            delay: *delay,
        });
        tokio::time::sleep(*delay).await;

        match probe.check().await {
            Ok(()) => {
                on_event(RecoveryEvent::ProbeHealthy);
                return true;
            }
            Err(kind) => on_event(RecoveryEvent::ProbeUnhealthy(kind)),
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHealthProbe;

    fn config() -> RecoveryConfig {
        RecoveryConfig {
            enabled: true,
            backoff_delays: vec![Duration::from_secs(1), Duration::from_secs(2)],
            context_overflow_max_retries: 2,
            max_transient_retries: 2,
            also_fatal: Vec::new(),
        }
    }

    #[test]
    fn test_success_and_on_hold_are_done() {
        let config = config();
        let mut state = AttemptState::default();
        let success = Outcome::new(ErrorKind::Success, "done");
        assert_eq!(decide(&config, &mut state, &success), RecoveryStep::Done);
        let on_hold = Outcome::new(ErrorKind::OnHold, "deferred");
        assert_eq!(decide(&config, &mut state, &on_hold), RecoveryStep::Done);
        assert_eq!(state.context_overflow_attempts, 0);
    }

    #[test]
    fn test_auth_error_exhausts_immediately() {
        let config = config();
        let mut state = AttemptState::default();
        let outcome = Outcome::new(ErrorKind::AuthError, "401");
        assert_eq!(decide(&config, &mut state, &outcome), RecoveryStep::Exhausted);
    }

    #[test]
    fn test_also_fatal_kinds_exhaust() {
        let mut config = config();
        config.also_fatal.push(ErrorKind::RateLimited);
        let mut state = AttemptState::default();
        let outcome = Outcome::new(ErrorKind::RateLimited, "429");
        assert_eq!(decide(&config, &mut state, &outcome), RecoveryStep::Exhausted);
    }

    #[test]
    fn test_disabled_recovery_exhausts_everything() {
        let mut config = config();
        config.enabled = false;
        let mut state = AttemptState::default();
        for kind in [
            ErrorKind::RateLimited,
            ErrorKind::ContextOverflow,
            ErrorKind::Timeout,
        ] {
            let outcome = Outcome::new(kind, "fail");
            assert_eq!(decide(&config, &mut state, &outcome), RecoveryStep::Exhausted);
        }
    }

    #[test]
    fn test_context_overflow_retries_fresh_then_exhausts() {
        let config = config();
        let mut state = AttemptState::default();
        state.resume_session_id = Some("old".to_string());
        let outcome = Outcome::new(ErrorKind::ContextOverflow, "too long");

        assert_eq!(decide(&config, &mut state, &outcome), RecoveryStep::RetryFresh);
        assert_eq!(state.context_overflow_attempts, 1);
        assert!(state.resume_session_id.is_none());
        assert!(state
            .recovery_note
            .as_deref()
            .unwrap()
            .contains("context overflow"));

        assert_eq!(decide(&config, &mut state, &outcome), RecoveryStep::RetryFresh);
        assert_eq!(state.context_overflow_attempts, 2);

        assert_eq!(decide(&config, &mut state, &outcome), RecoveryStep::Exhausted);
        assert_eq!(state.context_overflow_attempts, 2);
    }

    #[test]
    fn test_transient_failure_gets_backoff_with_resume() {
        let config = config();
        let mut state = AttemptState::default();
        let outcome =
            Outcome::new(ErrorKind::RateLimited, "429 rate limited").with_session_id("sess-9");

        assert_eq!(
            decide(&config, &mut state, &outcome),
            RecoveryStep::RetryAfterBackoff
        );
        assert_eq!(state.resume_session_id.as_deref(), Some("sess-9"));
        let note = state.recovery_note.as_deref().unwrap();
        assert!(note.contains("RATE_LIMITED"));
        assert!(note.contains("recovery resume"));
    }

    #[test]
    fn test_transient_retry_limit() {
        let config = config();
        let mut state = AttemptState::default();
        let outcome = Outcome::new(ErrorKind::Overloaded, "529");
        assert_eq!(
            decide(&config, &mut state, &outcome),
            RecoveryStep::RetryAfterBackoff
        );
        assert_eq!(
            decide(&config, &mut state, &outcome),
            RecoveryStep::RetryAfterBackoff
        );
        assert_eq!(decide(&config, &mut state, &outcome), RecoveryStep::Exhausted);
    }

    #[test]
    fn test_unknown_is_not_retried() {
        let config = config();
        let mut state = AttemptState::default();
        let outcome = Outcome::new(ErrorKind::Unknown, "no result record");
        assert_eq!(decide(&config, &mut state, &outcome), RecoveryStep::Exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_recovery_immediate_health_skips_delays() {
        let config = config();
        let probe = MockHealthProbe::healthy();
        let mut events = Vec::new();
        let start = tokio::time::Instant::now();
        let healthy = wait_for_recovery(&config, &probe, |e| events.push(e)).await;
        assert!(healthy);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(events, vec![RecoveryEvent::ProbeHealthy]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_recovery_waits_through_schedule() {
        let config = config();
        let probe = MockHealthProbe::with_results(vec![
            Err(ErrorKind::RateLimited),
            Err(ErrorKind::RateLimited),
            Ok(()),
        ]);
        let mut events = Vec::new();
        let start = tokio::time::Instant::now();
        let healthy = wait_for_recovery(&config, &probe, |e| events.push(e)).await;
        assert!(healthy);
        // One second, then two.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(
            events,
            vec![
                RecoveryEvent::ProbeUnhealthy(ErrorKind::RateLimited),
                RecoveryEvent::Waiting {
                    attempt: 1,
                    delay: Duration::from_secs(1)
                },
                RecoveryEvent::ProbeUnhealthy(ErrorKind::RateLimited),
                RecoveryEvent::Waiting {
                    attempt: 2,
                    delay: Duration::from_secs(2)
                },
                RecoveryEvent::ProbeHealthy,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_recovery_gives_up_after_schedule() {
        let config = config();
        let probe = MockHealthProbe::with_results(vec![
            Err(ErrorKind::Overloaded),
            Err(ErrorKind::Overloaded),
            Err(ErrorKind::Overloaded),
        ]);
        let healthy = wait_for_recovery(&config, &probe, |_| {}).await;
        assert!(!healthy);
    }
}
