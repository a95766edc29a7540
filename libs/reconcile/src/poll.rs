//! Bounded polling.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// Answer of one checker invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// The awaited condition holds.
    Success,
    /// Not there yet; try again after the interval.
    InProgress,
    /// The subject went away; stop polling without failing.
    Exit,
}

/// How a poll that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed { attempts: u32 },
    Exited { attempts: u32 },
}

impl PollOutcome {
    /// Number of checker invocations made.
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Completed { attempts } | PollOutcome::Exited { attempts } => *attempts,
        }
    }

    pub fn is_exited(&self) -> bool {
        matches!(self, PollOutcome::Exited { .. })
    }

    /// Turns a cooperative exit into a `Cancelled` error naming `subject`.
    pub fn into_cancellation(self, subject: impl Into<String>) -> Result<u32, Cancelled> {
        match self {
            PollOutcome::Completed { attempts } => Ok(attempts),
            PollOutcome::Exited { .. } => Err(Cancelled::new(subject)),
        }
    }
}

/// A bounded wait ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timed out waiting for {condition} after {attempts} attempts ({interval:?} interval)")]
pub struct PollTimeout {
    pub condition: String,
    pub attempts: u32,
    pub interval: Duration,
}

/// Errors produced by `PollingService::poll_with_timeout`.
#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error(transparent)]
    Timeout(PollTimeout),

    /// The checker itself failed; polling stopped at that attempt.
    #[error("checking {condition} failed")]
    Check {
        condition: String,
        #[source]
        source: E,
    },
}

impl<E> PollError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::Timeout(_))
    }
}

/// Work was abandoned because its subject entered a cancelled lifecycle.
///
/// Callers detect it anywhere in an error chain with `find_cancellation`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{subject} cancelled")]
pub struct Cancelled {
    pub subject: String,
}

impl Cancelled {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }
}

/// Returns the first `Cancelled` found while walking `err` and its sources.
pub fn find_cancellation<'a>(
    err: &'a (dyn std::error::Error + 'static),
) -> Option<&'a Cancelled> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(cancelled) = e.downcast_ref::<Cancelled>() {
            return Some(cancelled);
        }
        current = e.source();
    }
    None
}

/// Pluggable check evaluated by the polling loop.
#[async_trait]
pub trait CheckerTask<T: Sync>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Human-readable name of the awaited condition, used in timeouts.
    fn condition(&self, context: &T) -> String;

    async fn call(&self, context: &T) -> Result<PollStatus, Self::Error>;
}

/// Repeatedly invokes a checker until it succeeds, exits or runs out of attempts.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollingService;

impl PollingService {
    pub fn new() -> Self {
        Self
    }

    /// Polls `checker` at most `max_attempts` times, sleeping `interval`
    /// between attempts.
    ///
    /// A checker error ends the poll immediately. `max_attempts == 0` times
    /// out without invoking the checker.
    pub async fn poll_with_timeout<T, C>(
        &self,
        checker: &C,
        context: &T,
        interval: Duration,
        max_attempts: u32,
    ) -> Result<PollOutcome, PollError<C::Error>>
    where
        T: Sync,
        C: CheckerTask<T> + ?Sized,
    {
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;

            let status = checker
                .call(context)
                .await
                .map_err(|source| PollError::Check {
                    condition: checker.condition(context),
                    source,
                })?;

            match status {
                PollStatus::Success => {
                    debug!(attempts, "poll condition met");
                    return Ok(PollOutcome::Completed { attempts });
                }
                PollStatus::Exit => {
                    debug!(attempts, "poll exited");
                    return Ok(PollOutcome::Exited { attempts });
                }
                PollStatus::InProgress if attempts < max_attempts => {
                    tokio::time::sleep(interval).await;
                }
                PollStatus::InProgress => {}
            }
        }

        let condition = checker.condition(context);
        warn!(%condition, attempts, "poll attempts exhausted");
        Err(PollError::Timeout(PollTimeout {
            condition,
            attempts,
            interval,
        }))
    }
}
