//! Bounded, fixed-delay retries for fallible filesystem and network steps.

use std::fmt;
use std::time::Duration;

use log::Level;

use crate::events::EventSink;

/// Default number of attempts for a retried step.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

/// Result of a retryable step.
#[derive(Debug)]
pub enum OperationOutcome<T, E> {
    /// The step completed.
    Success(T),
    /// Every attempt failed; carries the last error.
    FailedExhausted { attempts: u32, last_error: E },
    /// The step was rejected before any attempt (e.g. a missing source).
    FailedFatal(E),
}

impl<T, E> OperationOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success(_))
    }

    /// Collapse into a `Result`, mapping both failure kinds through `f`.
    /// `f` receives `Some(attempts)` for exhausted retries and `None` for fatal.
    pub fn into_result<F, E2>(self, f: F) -> Result<T, E2>
    where
        F: FnOnce(Option<u32>, E) -> E2,
    {
        match self {
            OperationOutcome::Success(value) => Ok(value),
            OperationOutcome::FailedExhausted {
                attempts,
                last_error,
            } => Err(f(Some(attempts), last_error)),
            OperationOutcome::FailedFatal(err) => Err(f(None, err)),
        }
    }
}

/// Strictly sequential retry policy: no jitter, no backoff growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `op` until it succeeds or `max_attempts` is reached, sleeping
    /// `delay` between attempts. Every failed attempt is reported to `sink`.
    ///
    /// All errors are treated alike. Callers that can detect a permanent
    /// failure cheaply should check before calling this.
    pub fn execute<T, E, F>(&self, what: &str, sink: &dyn EventSink, mut op: F) -> OperationOutcome<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        sink.record(
                            Level::Info,
                            &format!("{}: succeeded on attempt {}/{}", what, attempt, attempts),
                        );
                    }
                    return OperationOutcome::Success(value);
                }
                Err(err) => {
                    sink.record(
                        Level::Warn,
                        &format!("{}: attempt {}/{} failed: {}", what, attempt, attempts, err),
                    );
                    if attempt >= attempts {
                        return OperationOutcome::FailedExhausted {
                            attempts,
                            last_error: err,
                        };
                    }
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
