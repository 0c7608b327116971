//! Deadline-bound execution.
//!
//! Every unit of work is wrapped exactly once at its entry point with
//! [`with_deadline`]. When the deadline elapses the work future is dropped,
//! which abandons the in-flight statement and runs the destructors of any
//! transaction or pooled connection it holds. The same [`Deadline`] is
//! threaded through pool acquisition and the store so that the database
//! aborts the statement on its side as well.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Default budget for point reads and single-row writes.
pub const POINT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default budget for scan-heavy reads.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// The bounded operation did not finish in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline of {budget:?} exceeded")]
pub struct DeadlineExceeded {
    /// Budget the operation was given.
    pub budget: Duration,
}

/// Absolute point in time by which a unit of work must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires_at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
            budget,
        }
    }

    /// Deadline `budget` from now, but never later than `self`.
    #[must_use]
    pub fn child(&self, budget: Duration) -> Self {
        let own = Self::after(budget);
        if own.expires_at <= self.expires_at {
            own
        } else {
            *self
        }
    }

    /// Instant at which the deadline elapses.
    #[must_use]
    pub const fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Budget this deadline was created with.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left, saturating at zero.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Returns `true` once the deadline has elapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Error value describing this deadline's expiry.
    #[must_use]
    pub const fn exceeded(&self) -> DeadlineExceeded {
        DeadlineExceeded {
            budget: self.budget,
        }
    }
}

/// Class of operation, selecting its budget from [`Timeouts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Point reads, single-row writes and the mutation protocols.
    Point,
    /// Scan-heavy reads.
    Scan,
}

/// Per-operation budgets, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Budget for [`OperationKind::Point`].
    pub point: Duration,
    /// Budget for [`OperationKind::Scan`].
    pub scan: Duration,
}

impl Timeouts {
    /// Returns the budget for `kind`.
    #[must_use]
    pub const fn budget(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Point => self.point,
            OperationKind::Scan => self.scan,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            point: POINT_TIMEOUT,
            scan: SCAN_TIMEOUT,
        }
    }
}

/// Runs `work` under a deadline of `budget`, clamped to `parent` if given.
///
/// `work` receives the effective [`Deadline`] so it can hand it to the pool
/// and the store. If the deadline elapses first the work future is dropped
/// and [`DeadlineExceeded`] is returned; work is never started when the
/// parent has already expired.
///
/// # Errors
///
/// Returns whatever `work` returns, or [`DeadlineExceeded`] converted into
/// `E` when the deadline elapses.
pub async fn with_deadline<T, E, F, Fut>(
    parent: Option<&Deadline>,
    budget: Duration,
    work: F,
) -> Result<T, E>
where
    F: FnOnce(Deadline) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<DeadlineExceeded>,
{
    let deadline = match parent {
        Some(parent) => parent.child(budget),
        None => Deadline::after(budget),
    };
    if deadline.is_expired() {
        return Err(deadline.exceeded().into());
    }

    match tokio::time::timeout_at(deadline.expires_at(), work(deadline)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(deadline.exceeded().into()),
    }
}
