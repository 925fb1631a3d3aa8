//! Circuit breaker guarding outbound calls.
//!
//! After `failure_threshold` consecutive failures the circuit opens and
//! every call is rejected with [`Error::CircuitOpen`] until
//! `reset_timeout` elapses. The circuit then half-opens, admitting up to
//! `half_open_requests` probes: if they all succeed the circuit closes,
//! any failure re-opens it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Tuning for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing.
    pub reset_timeout: Duration,
    /// Probes admitted while half-open.
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_requests: 1,
        }
    }
}

#[derive(Debug)]
enum State {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { admitted: u32, successes: u32 },
}

/// A consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    /// Create a breaker in the closed state.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::Closed { failures: 0 }),
        }
    }

    /// Admit or reject a call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] while the circuit is open, carrying
    /// the remaining time until a probe will be admitted.
    pub fn admit(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match *state {
            State::Closed { .. } => Ok(()),
            State::Open { opened_at } => {
                let elapsed = opened_at.elapsed();
                if elapsed >= self.config.reset_timeout {
                    *state = State::HalfOpen {
                        admitted: 1,
                        successes: 0,
                    };
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        reset_in: self.config.reset_timeout - elapsed,
                    })
                }
            }
            State::HalfOpen {
                ref mut admitted, ..
            } => {
                if *admitted < self.config.half_open_requests {
                    *admitted += 1;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        reset_in: Duration::ZERO,
                    })
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match *state {
            State::Closed { ref mut failures } => *failures = 0,
            State::HalfOpen {
                ref mut successes, ..
            } => {
                *successes += 1;
                if *successes >= self.config.half_open_requests {
                    *state = State::Closed { failures: 0 };
                }
            }
            State::Open { .. } => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match *state {
            State::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.config.failure_threshold {
                    *state = State::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            State::HalfOpen { .. } => {
                *state = State::Open {
                    opened_at: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }

    /// Whether the circuit is currently rejecting calls.
    #[must_use]
    pub fn is_open(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match *state {
            State::Open { opened_at } => opened_at.elapsed() < self.config.reset_timeout,
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset: Duration, probes: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: reset,
            half_open_requests: probes,
        })
    }

    #[test]
    fn closed_admits_and_resets_on_success() {
        let cb = breaker(3, Duration::from_secs(60), 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        // Two consecutive failures after the reset; still under threshold.
        assert!(cb.admit().is_ok());
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = breaker(2, Duration::from_secs(60), 1);
        cb.record_failure();
        cb.record_failure();
        let err = cb.admit().unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { .. }));
        assert!(cb.is_open());
    }

    #[test]
    fn half_open_admits_limited_probes() {
        let cb = breaker(1, Duration::ZERO, 2);
        cb.record_failure();
        // reset_timeout of zero half-opens immediately.
        assert!(cb.admit().is_ok());
        assert!(cb.admit().is_ok());
        assert!(cb.admit().is_err());
    }

    #[test]
    fn half_open_closes_after_successful_probes() {
        let cb = breaker(1, Duration::ZERO, 1);
        cb.record_failure();
        assert!(cb.admit().is_ok());
        cb.record_success();
        assert!(cb.admit().is_ok());
        assert!(!cb.is_open());
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(0), 1);
        cb.record_failure();
        assert!(cb.admit().is_ok());
        cb.record_failure();
        // Re-opened with a fresh window; zero timeout half-opens again.
        assert!(cb.admit().is_ok());
    }

    #[test]
    fn open_error_reports_remaining_time() {
        let cb = breaker(1, Duration::from_secs(30), 1);
        cb.record_failure();
        match cb.admit().unwrap_err() {
            Error::CircuitOpen { reset_in } => assert!(reset_in <= Duration::from_secs(30)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
