//! Resilience primitives: per-tool circuit breakers and retry backoff.

use std::time::{Duration, Instant};

use crate::error::{AgentError, Result};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow; failures accumulate.
    Closed,
    /// Calls are rejected until the reset timeout passes.
    Open,
    /// One probe call is allowed through.
    HalfOpen,
}

/// A per-tool failure isolator.
///
/// CLOSED accumulates failures; at the threshold the breaker opens and
/// rejects calls until the reset timeout passes, after which one probe is
/// allowed (HALF_OPEN). A probe success closes the breaker and resets the
/// count; a probe failure re-opens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    failure_count: u32,
    failure_threshold: u32,
    reset_timeout: Duration,
    next_attempt: Option<Instant>,
    tool_name: String,
}

impl CircuitBreaker {
    /// Create a breaker for `tool_name`.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            failure_threshold,
            reset_timeout,
            next_attempt: None,
            tool_name: tool_name.into(),
        }
    }

    /// Current state, after applying any due OPEN → HALF_OPEN transition.
    pub fn state(&mut self) -> BreakerState {
        if self.state == BreakerState::Open
            && self.next_attempt.is_some_and(|at| Instant::now() > at)
        {
            self.state = BreakerState::HalfOpen;
            self.next_attempt = None;
        }
        self.state
    }

    /// Check whether a call may proceed.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::CircuitOpen`] while the breaker is open.
    pub fn check(&mut self) -> Result<()> {
        match self.state() {
            BreakerState::Open => Err(AgentError::CircuitOpen { tool_name: self.tool_name.clone() }),
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.state = BreakerState::Closed;
        self.next_attempt = None;
    }

    /// Record a failed call.
    pub fn record_failure(&mut self) {
        match self.state() {
            BreakerState::HalfOpen => self.open(),
            BreakerState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.failure_threshold {
                    self.open();
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Force the breaker open, e.g. from an ethics tripwire.
    pub fn force_open(&mut self) {
        self.open();
    }

    fn open(&mut self) {
        self.state = BreakerState::Open;
        self.next_attempt = Some(Instant::now() + self.reset_timeout);
        tracing::warn!(tool = %self.tool_name, "circuit opened");
    }
}

/// Exponential backoff with jitter.
///
/// `delay(attempt) = min(initial · multiplierᵃ, max_delay)` plus a uniform
/// jitter of `± jitter · delay`. Once `attempt ≥ max_attempts`, `delay`
/// returns `None` and the caller stops retrying.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of retries.
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub initial: Duration,
    /// Exponential multiplier.
    pub multiplier: f64,
    /// Cap on the computed delay (before jitter).
    pub max_delay: Duration,
    /// Jitter fraction in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 0,
            initial: Duration::from_millis(0),
            multiplier: 1.0,
            max_delay: Duration::from_millis(0),
            jitter: 0.0,
        }
    }

    /// Delay before retry `attempt` (0-indexed), or `None` to stop.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let base = self.initial.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let jittered = if self.jitter > 0.0 {
            let spread = self.jitter * capped;
            (capped + fastrand::f64().mul_add(2.0 * spread, -spread)).max(0.0)
        } else {
            capped
        };
        Some(Duration::from_millis(jittered.round() as u64))
    }
}
