//! Retry and backoff scheduling shared by both transfer strategies.
//!
//! Attempt `n` (0-based) that fails with a retryable error waits
//! `base_delay * (n + 1)` before attempt `n + 1`. The optimistic path adds a
//! random extra of up to `factor` times that delay so that racing writers
//! drift apart instead of colliding again on the next round.
//!
//! Waiting happens on a [`CancellationToken`], so a caller can abort a
//! transfer that is sleeping between attempts. Attempts themselves are never
//! cut short.

use crate::error::SettlementError;
use log::{error, warn};
use rand::Rng;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Random extra delay added on top of the linear backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    None,
    /// Uniform extra in `[0, factor * linear_delay)`.
    Proportional(f64),
}

/// Attempt ceiling plus delay growth.
///
/// # Examples
///
/// ```
/// use settlement_engine::settlement::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(50, Duration::from_millis(200));
/// assert_eq!(policy.delay_for(0), Duration::from_millis(200));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(600));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    jitter: Jitter,
    timeout: Option<Duration>,
}

/// A value produced by [`RetryPolicy::run`] and the number of retries spent
/// getting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            jitter: Jitter::None,
            timeout: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Give up once the next wait would push the whole operation past
    /// `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The deterministic part of the wait after attempt `attempt`.
    pub fn linear_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_add(1))
    }

    /// Wait after attempt `attempt`, jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let linear = self.linear_delay(attempt);
        match self.jitter {
            Jitter::Proportional(factor) if factor.is_finite() && factor > 0.0 => {
                let extra = linear.as_secs_f64() * factor * rng.gen::<f64>();
                linear.saturating_add(Duration::try_from_secs_f64(extra).unwrap_or(Duration::MAX))
            }
            _ => linear,
        }
    }

    /// Drive `attempt` until it succeeds, fails with a non-retryable error,
    /// or the policy runs out.
    ///
    /// `attempt` receives the 0-based attempt index. Errors for which
    /// `is_retryable` returns false are returned untouched. Running out of
    /// attempts yields [`SettlementError::Overload`], running out of time
    /// [`SettlementError::DeadlineExceeded`], and cancellation
    /// [`SettlementError::Interrupted`].
    pub fn run<T, F, P>(
        &self,
        cancel: &CancellationToken,
        label: &str,
        is_retryable: P,
        mut attempt: F,
    ) -> Result<Retried<T>, SettlementError>
    where
        F: FnMut(u32) -> Result<T, SettlementError>,
        P: Fn(&SettlementError) -> bool,
    {
        let started = Instant::now();
        for n in 0..self.max_attempts {
            if cancel.is_cancelled() {
                warn!("{label}: cancelled before attempt {}", n + 1);
                return Err(SettlementError::Interrupted);
            }
            let err = match attempt(n) {
                Ok(value) => return Ok(Retried { value, retries: n }),
                Err(e) if is_retryable(&e) => e,
                Err(e) => return Err(e),
            };

            let tried = n + 1;
            warn!("{label}: {err}; attempt {tried}/{}", self.max_attempts);
            if tried == self.max_attempts {
                break;
            }

            let delay = self.delay_for(n);
            if let Some(timeout) = self.timeout {
                if started.elapsed().saturating_add(delay) > timeout {
                    error!("{label}: deadline of {timeout:?} exceeded after {tried} attempts");
                    return Err(SettlementError::DeadlineExceeded { attempts: tried });
                }
            }
            if cancel.sleep(delay).is_err() {
                error!("{label}: interrupted while backing off after {tried} attempts");
                return Err(SettlementError::Interrupted);
            }
        }
        error!("{label}: giving up after {} attempts", self.max_attempts);
        Err(SettlementError::Overload {
            attempts: self.max_attempts,
        })
    }
}

/// Returned by [`CancellationToken::sleep`] when the token fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sleep interrupted by cancellation")]
pub struct Interrupted;

/// Shared flag that wakes every sleeper when set.
///
/// Clones share state, so one clone can be handed to the executor and
/// another kept by whoever enforces the caller-level timeout.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, wake) = &*self.inner;
        *flag.lock() = true;
        wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block for `duration` unless cancelled first.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let (flag, wake) = &*self.inner;
        let mut cancelled = flag.lock();
        let Some(deadline) = Instant::now().checked_add(duration) else {
            while !*cancelled {
                wake.wait(&mut cancelled);
            }
            return Err(Interrupted);
        };
        while !*cancelled {
            if wake.wait_until(&mut cancelled, deadline).timed_out() {
                return if *cancelled { Err(Interrupted) } else { Ok(()) };
            }
        }
        Err(Interrupted)
    }
}
