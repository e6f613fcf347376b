//! Circuit breaker: closed/half-open/open, with a failure threshold and a
//! reset timeout (spec §4.5).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tracks consecutive failures against a threshold; once the threshold is
/// crossed the breaker opens and rejects calls until `reset_timeout` has
/// elapsed, at which point a single probe call is allowed through
/// (half-open) to decide whether to close again.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
    half_open_probe_in_flight: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            half_open_probe_in_flight: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> CircuitState {
        let opened_at = *self.opened_at.lock();
        match opened_at {
            None => CircuitState::Closed,
            Some(at) if at.elapsed() >= self.reset_timeout => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }

    /// Returns `true` if a call should be allowed through right now. In the
    /// half-open state, only one probe call is allowed at a time.
    pub fn allow_call(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self
                .half_open_probe_in_flight
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        *self.opened_at.lock() = None;
        self.half_open_probe_in_flight.store(0, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.failure_threshold {
            let mut opened_at = self.opened_at.lock();
            if opened_at.is_none() {
                *opened_at = Some(Instant::now());
            }
        }
        self.half_open_probe_in_flight.store(0, Ordering::Release);
    }
}
