//! Contention retry policy
//!
//! Another process may hold the database write lock. Busy/locked errors
//! are retried after a pause; every other error is returned at once.
//!
//! The policy is bounded by default: the pause doubles after each attempt
//! (capped at `max_interval`) and the operation is abandoned after
//! `max_attempts`. `max_attempts == 0` restores the unbounded loop with a
//! fixed pause, which can spin forever under sustained contention.

use crate::{Error, Result};
use rusqlite::ErrorCode;
use std::cell::Cell;
use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(300);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_BACKOFF: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    /// 0 means retry forever
    pub max_attempts: u32,
    pub backoff: f64,
    retries: Cell<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bounded(DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Exponential backoff starting at `interval`, giving up after `max_attempts`
    pub fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_attempts,
            backoff: DEFAULT_BACKOFF,
            retries: Cell::new(0),
        }
    }

    /// Fixed pause, no attempt limit
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            max_attempts: 0,
            backoff: 1.0,
            retries: Cell::new(0),
        }
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    pub fn with_backoff(mut self, backoff: f64) -> Self {
        self.backoff = backoff.max(1.0);
        self
    }

    /// Total retries performed over the lifetime of this policy
    pub fn retries(&self) -> u64 {
        self.retries.get()
    }

    /// Pause before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.max_attempts == 0 {
            return self.interval;
        }
        let factor = self.backoff.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.interval.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_interval)
    }

    /// Run `op`, retrying while the store reports contention
    pub fn run<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> rusqlite::Result<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if is_contention(&err) => {
                    if self.max_attempts != 0 && attempt >= self.max_attempts {
                        tracing::error!("Giving up after {} attempts: {}", attempt, err);
                        return Err(Error::ContentionExhausted {
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!("Database busy ({}), retrying in {:?}", err, delay);
                    self.retries.set(self.retries.get() + 1);
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Transient lock contention, as opposed to a genuine data error
pub fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}
