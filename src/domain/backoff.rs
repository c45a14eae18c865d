//! Backoff state machines.
//!
//! - [`RetryPolicy`] - Fixed-budget exponential retry for contract-call jobs
//! - [`Backoff`] - Open-ended reconnect backoff with jitter and a circuit breaker

use std::time::{Duration, Instant};

use rand::Rng;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry { delay: Duration },
    /// The attempt budget is spent.
    Exhausted,
}

/// Exponential retry with a fixed attempt budget.
///
/// The delay before retry `n` (the `n`-th failure) is `base · 2^(n−1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Decide what follows failed attempt `attempt` (1-based).
    #[must_use]
    pub fn after_failure(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry {
                delay: self.delay_after(attempt),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(5_000))
    }
}

/// Circuit state of a [`Backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Attempts are paused until the instant passes.
    Open { until: Instant },
}

/// Exponential backoff with up to 20% jitter.
///
/// After `trip_after` consecutive failures the circuit opens for `cooldown`,
/// during which [`next_delay`](Self::next_delay) returns the remaining
/// cooldown instead of the exponential delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    trip_after: u32,
    cooldown: Duration,
    current: Duration,
    consecutive_failures: u32,
    circuit: CircuitState,
}

impl Backoff {
    #[must_use]
    pub fn new(
        initial: Duration,
        max: Duration,
        multiplier: f64,
        trip_after: u32,
        cooldown: Duration,
    ) -> Self {
        Self {
            initial,
            max,
            multiplier: multiplier.max(1.0),
            trip_after,
            cooldown,
            current: initial,
            consecutive_failures: 0,
            circuit: CircuitState::Closed,
        }
    }

    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    #[must_use]
    pub const fn circuit(&self) -> CircuitState {
        self.circuit
    }

    /// Clear the failure count and delay after a success.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.current = self.initial;
        self.circuit = CircuitState::Closed;
    }

    /// Record a failure; returns `true` if it tripped the circuit breaker.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.trip_after > 0
            && self.consecutive_failures >= self.trip_after
            && self.circuit == CircuitState::Closed
        {
            self.circuit = CircuitState::Open {
                until: Instant::now() + self.cooldown,
            };
            return true;
        }
        false
    }

    /// Delay before the next attempt; advances the exponential state.
    pub fn next_delay(&mut self) -> Duration {
        if let CircuitState::Open { until } = self.circuit {
            let now = Instant::now();
            if now < until {
                return until - now;
            }
            self.reset();
        }
        let base = self.current;
        let next = base.mul_f64(self.multiplier);
        self.current = next.min(self.max);
        base + jitter(base)
    }
}

fn jitter(base: Duration) -> Duration {
    let range_ms = u64::try_from(base.as_millis() / 5).unwrap_or(u64::MAX);
    if range_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=range_ms))
}
