//! Fixed-interval retry under a deadline
//!
//! The upload readiness wait, the upload transfer and the artifact wait all
//! share this loop. Each call site supplies a classifier that maps the
//! outcome of one attempt to [`Verdict`].

use crate::error::CaibError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Classification of one attempt
#[derive(Debug)]
pub enum Verdict<T, E> {
    /// Stop and return the value
    Success(T),
    /// Try again after the interval; the string describes why
    Transient(String),
    /// Stop and return the error
    Fatal(E),
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    Fatal(E),
    DeadlineExceeded {
        operation: String,
        waited: Duration,
        last: Option<String>,
    },
}

impl From<RetryError<CaibError>> for CaibError {
    fn from(err: RetryError<CaibError>) -> Self {
        match err {
            RetryError::Fatal(e) => e,
            RetryError::DeadlineExceeded {
                operation,
                waited,
                last,
            } => CaibError::Timeout {
                operation,
                waited,
                last,
            },
        }
    }
}

/// Interval and deadline for one retried operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    operation: String,
    interval: Duration,
    deadline: Duration,
}

impl RetryPolicy {
    pub fn new(operation: impl Into<String>, interval: Duration, deadline: Duration) -> Self {
        Self {
            operation: operation.into(),
            interval,
            deadline,
        }
    }

    /// Run `attempt` until `classify` reports success or a fatal error, or
    /// until the deadline passes.
    ///
    /// Each attempt is bounded by the time left before the deadline; an
    /// attempt cut off that way counts as transient. The first transient
    /// outcome is logged at warn level, later ones only at debug.
    pub async fn run<O, T, E, F, Fut, C>(&self, mut attempt: F, mut classify: C) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = O>,
        C: FnMut(O) -> Verdict<T, E>,
    {
        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut last = None;

        loop {
            attempts += 1;
            let remaining = self.deadline.saturating_sub(started.elapsed());
            let why = match tokio::time::timeout(remaining, attempt()).await {
                Ok(outcome) => match classify(outcome) {
                    Verdict::Success(value) => {
                        debug!(operation = %self.operation, attempts, "Operation succeeded");
                        return Ok(value);
                    }
                    Verdict::Fatal(e) => return Err(RetryError::Fatal(e)),
                    Verdict::Transient(why) => why,
                },
                Err(_) => "no response before the deadline".to_string(),
            };
            if attempts == 1 {
                warn!("{}: {}. Retrying...", self.operation, why);
            } else {
                debug!(operation = %self.operation, attempts, "Still waiting: {}", why);
            }
            last = Some(why);

            let waited = started.elapsed();
            if waited >= self.deadline {
                return Err(RetryError::DeadlineExceeded {
                    operation: self.operation.clone(),
                    waited,
                    last,
                });
            }
            let remaining = self.deadline - waited;
            tokio::time::sleep(self.interval.min(remaining)).await;
        }
    }
}
