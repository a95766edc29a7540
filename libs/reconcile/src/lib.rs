//! Polling and reconciliation primitives.
//!
//! This library provides the pieces the provisioning engine uses to wait for
//! external convergence and to reconcile requested topology against what
//! actually came up:
//!
//! - **Polling**: `PollingService` repeatedly invokes a `CheckerTask` with a
//!   fixed interval and a bounded number of attempts.
//! - **Cancellation**: a checker answering `PollStatus::Exit` ends the poll
//!   without error; callers convert that into a `Cancelled` error which stays
//!   recognizable anywhere in an error chain.
//! - **Failure collection**: de-duplicated, per-group selection of failed
//!   per-instance results.
//!
//! # Invariants
//!
//! - A checker error is never swallowed; it ends the poll at that attempt
//! - An exit is not a failure
//! - Failure collection is idempotent per key (first failure wins)

mod collect;
mod poll;

use std::time::Duration;

pub use collect::collect_group_failures;
pub use poll::{
    find_cancellation, Cancelled, CheckerTask, PollError, PollOutcome, PollStatus, PollTimeout,
    PollingService,
};

/// Default interval between polling attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Default upper bound on polling attempts.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 100;
