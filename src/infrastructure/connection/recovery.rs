//! Recovery Policy
//!
//! Bounded exponential backoff with jitter, plus the circuit breaker that
//! stops automatic retries once the attempt budget is spent. The types
//! here are pure decision logic; the connection manager owns the timers
//! and the actual reconnect attempts.
//!
//! The breaker only walks forward: CLOSED opens when attempts run out,
//! OPEN admits exactly one half-open probe on explicit user action, and
//! the probe either closes the breaker on success or reopens it.

use std::time::Duration;

use rand::Rng;

use crate::domain::connection::CircuitBreakerState;
use crate::infrastructure::config::RecoverySettings;

// =============================================================================
// Backoff Policy
// =============================================================================

/// Exponential backoff schedule with jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    settings: RecoverySettings,
    attempt_count: u32,
    current_delay: Duration,
}

impl BackoffPolicy {
    /// Create a policy with the given settings.
    #[must_use]
    pub const fn new(settings: RecoverySettings) -> Self {
        let initial = settings.initial_delay;
        Self {
            settings,
            attempt_count: 0,
            current_delay: initial,
        }
    }

    /// Number of attempts consumed since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Consume one attempt and return the base delay to wait before it.
    ///
    /// The first call yields the initial delay; each subsequent call
    /// multiplies it, capped at the configured maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay;
        self.attempt_count += 1;

        let next_ms = self.current_delay.as_millis() as f64 * self.settings.multiplier;
        let capped_ms = next_ms.min(self.settings.max_delay.as_millis() as f64);
        self.current_delay = Duration::from_millis(capped_ms as u64);

        delay
    }

    /// Reset to the initial schedule after a successful connection or an
    /// explicit manual reconnect.
    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.current_delay = self.settings.initial_delay;
    }

    /// Spread a base delay by the configured jitter factor.
    #[must_use]
    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.settings.jitter_factor <= 0.0 {
            return delay;
        }

        let base_ms = delay.as_millis() as f64;
        let spread = base_ms * self.settings.jitter_factor;
        if spread <= 0.0 {
            return delay;
        }
        let jittered = base_ms + rand::rng().random_range(-spread..=spread);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

// =============================================================================
// Circuit Breaker
// =============================================================================

/// Attempted circuit breaker transition that the state machine forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal circuit breaker transition: {from:?} -> {to:?}")]
pub struct CircuitTransitionError {
    /// State the breaker was in.
    pub from: CircuitBreakerState,
    /// State that was requested.
    pub to: CircuitBreakerState,
}

/// Circuit breaker over automatic recovery.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    state: CircuitBreakerState,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: CircuitBreakerState::Closed,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> CircuitBreakerState {
        self.state
    }

    /// Move to `next`, enforcing the legal transition graph.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitTransitionError`] for any transition the graph
    /// forbids; the breaker state is left unchanged.
    pub fn transition_to(
        &mut self,
        next: CircuitBreakerState,
    ) -> Result<(), CircuitTransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(CircuitTransitionError {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = ?self.state, to = ?next, "Circuit breaker transition");
        self.state = next;
        Ok(())
    }
}

// =============================================================================
// Recovery Manager
// =============================================================================

/// Why a recovery attempt was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    /// No valid credentials; recovery cannot authenticate.
    #[error("recovery refused: not authenticated")]
    NotAuthenticated,

    /// Already connected; nothing to recover.
    #[error("recovery refused: already connected")]
    AlreadyConnected,

    /// The circuit breaker is open; only a manual reconnect may proceed.
    #[error("recovery halted: circuit breaker is open")]
    CircuitOpen,

    /// The attempt budget is spent; the breaker has just opened.
    #[error("recovery halted: {max_attempts} attempts exhausted")]
    AttemptsExhausted {
        /// Configured attempt budget.
        max_attempts: u32,
    },
}

/// One scheduled recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Jittered delay to wait before trying.
    pub delay: Duration,
}

/// Gates and schedules automatic recovery attempts.
#[derive(Debug)]
pub struct RecoveryManager {
    policy: BackoffPolicy,
    breaker: CircuitBreaker,
    max_attempts: u32,
}

impl RecoveryManager {
    /// Create a manager with the given settings.
    #[must_use]
    pub const fn new(settings: RecoverySettings) -> Self {
        let max_attempts = settings.max_attempts;
        Self {
            policy: BackoffPolicy::new(settings),
            breaker: CircuitBreaker::new(),
            max_attempts,
        }
    }

    /// Current circuit breaker state.
    #[must_use]
    pub const fn breaker_state(&self) -> CircuitBreakerState {
        self.breaker.state()
    }

    /// Attempts consumed in the current recovery episode.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.policy.attempt_count()
    }

    /// Schedule the next automatic attempt, or refuse.
    ///
    /// # Errors
    ///
    /// Refuses when unauthenticated, already connected, or the breaker is
    /// open. When the attempt budget is spent the breaker opens and
    /// [`RecoveryError::AttemptsExhausted`] is returned.
    pub fn next_attempt(
        &mut self,
        authenticated: bool,
        already_connected: bool,
    ) -> Result<ScheduledAttempt, RecoveryError> {
        if already_connected {
            return Err(RecoveryError::AlreadyConnected);
        }
        if !authenticated {
            return Err(RecoveryError::NotAuthenticated);
        }
        if self.breaker.state() == CircuitBreakerState::Open {
            return Err(RecoveryError::CircuitOpen);
        }
        if self.policy.attempt_count() >= self.max_attempts {
            // HalfOpen probes that fail reopen the breaker the same way.
            let _ = self.breaker.transition_to(CircuitBreakerState::Open);
            return Err(RecoveryError::AttemptsExhausted {
                max_attempts: self.max_attempts,
            });
        }

        let base = self.policy.next_delay();
        Ok(ScheduledAttempt {
            attempt: self.policy.attempt_count(),
            delay: self.policy.apply_jitter(base),
        })
    }

    /// Record a successful connection: resets the schedule and closes a
    /// half-open breaker.
    pub fn on_success(&mut self) {
        self.policy.reset();
        if self.breaker.state() == CircuitBreakerState::HalfOpen {
            let _ = self.breaker.transition_to(CircuitBreakerState::Closed);
        }
    }

    /// Record a failed connection attempt while half-open: the probe did
    /// not restore service, so the breaker reopens.
    pub fn on_probe_failure(&mut self) {
        if self.breaker.state() == CircuitBreakerState::HalfOpen {
            let _ = self.breaker.transition_to(CircuitBreakerState::Open);
        }
    }

    /// Record an explicit user-initiated reconnect: resets the attempt
    /// counter and, if the breaker is open, admits one half-open probe.
    pub fn on_manual_reconnect(&mut self) {
        self.policy.reset();
        if self.breaker.state() == CircuitBreakerState::Open {
            let _ = self.breaker.transition_to(CircuitBreakerState::HalfOpen);
        }
    }
}
