//! Scoped transaction handle for the mutation protocols.
//!
//! A [`TxGuard`] walks `Idle → Began → Mutating(n) → {Committed | RolledBack}`.
//! Every failed step rolls the transaction back before the error leaves the
//! guard. If the guard is dropped mid-protocol (a deadline cut the work
//! future, or the caller bailed out with `?`), the wrapped store transaction
//! is dropped with it and the store rolls it back.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::domain::{CounterpartyId, MutationRequest, MutationStep};
use crate::error::GatewayError;
use crate::persistence::{LedgerStore, LedgerTransaction, StoreError};
use crate::service::Deadline;

/// Records the protocol step currently in flight.
///
/// Shared by reference between the work future and the code that awaits it,
/// so the step is still known after a deadline has dropped the future.
#[derive(Debug, Default)]
pub struct StepTracker(AtomicU8);

impl StepTracker {
    /// Marks `step` as in flight.
    pub fn set(&self, step: MutationStep) {
        self.0.store(step as u8, Ordering::Release);
    }

    /// Step most recently marked as in flight.
    #[must_use]
    pub fn current(&self) -> MutationStep {
        MutationStep::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Lifecycle of a guarded transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Nothing acquired yet.
    Idle,
    /// Transaction open, no statement issued.
    Began,
    /// `n` mutation steps entered.
    Mutating(u8),
    /// Committed. Terminal.
    Committed,
    /// Rolled back, explicitly or because commit failed. Terminal.
    RolledBack,
}

impl TxState {
    /// Returns `true` for [`TxState::Committed`] and [`TxState::RolledBack`].
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

/// Owns an open store transaction for the length of one protocol run.
#[derive(Debug)]
pub struct TxGuard<'a, T: LedgerTransaction> {
    tx: Option<T>,
    state: TxState,
    tracker: &'a StepTracker,
    counterparty_id: CounterpartyId,
    budget: Duration,
}

impl<'a, T: LedgerTransaction> TxGuard<'a, T> {
    /// Acquires a connection from `store` and opens a transaction on it.
    ///
    /// The tracker reads [`MutationStep::Acquire`] while waiting on the pool
    /// and [`MutationStep::Begin`] while the transaction is being opened.
    ///
    /// # Errors
    ///
    /// The classified [`StoreError`] from [`LedgerStore::acquire`] or
    /// [`LedgerStore::begin_on`].
    pub async fn begin<S>(
        store: &S,
        deadline: &Deadline,
        request: &MutationRequest,
        tracker: &'a StepTracker,
    ) -> Result<Self, GatewayError>
    where
        S: LedgerStore<Tx = T>,
    {
        let budget = deadline.budget();
        let fail = |step, err| classify(step, err, request.counterparty_id, budget);

        tracker.set(MutationStep::Acquire);
        let conn = store
            .acquire(deadline)
            .await
            .map_err(|err| fail(MutationStep::Acquire, err))?;

        tracker.set(MutationStep::Begin);
        let tx = store
            .begin_on(conn, deadline)
            .await
            .map_err(|err| fail(MutationStep::Begin, err))?;

        Ok(Self {
            tx: Some(tx),
            state: TxState::Began,
            tracker,
            counterparty_id: request.counterparty_id,
            budget,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TxState {
        self.state
    }

    /// Marks `step` as in flight and hands out the transaction for it.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Internal`] if the transaction already ended.
    pub fn enter(&mut self, step: MutationStep) -> Result<&mut T, GatewayError> {
        self.tracker.set(step);
        self.state = match self.state {
            TxState::Began => TxState::Mutating(1),
            TxState::Mutating(n) => TxState::Mutating(n.saturating_add(1)),
            other => other,
        };
        self.tx
            .as_mut()
            .ok_or_else(|| GatewayError::Internal(format!("{step} entered after transaction ended")))
    }

    /// Passes a successful step result through; on failure rolls the
    /// transaction back and returns the classified error.
    ///
    /// # Errors
    ///
    /// The classified form of `result`'s error.
    pub async fn settle<V>(&mut self, result: Result<V, StoreError>) -> Result<V, GatewayError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                let step = self.tracker.current();
                tracing::debug!(%step, error = %err, "mutation step failed");
                Err(self
                    .abort(classify(step, err, self.counterparty_id, self.budget))
                    .await)
            }
        }
    }

    /// Rolls the transaction back and returns `err` unchanged.
    pub async fn abort(&mut self, err: GatewayError) -> GatewayError {
        self.rollback().await;
        err
    }

    /// Rolls back if still open. A failed rollback is logged; the store
    /// closes the connection in that case.
    pub async fn rollback(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        self.state = TxState::RolledBack;
        if let Err(err) = tx.rollback().await {
            tracing::error!(step = %self.tracker.current(), error = %err, "rollback failed");
        }
    }

    /// Commits every step.
    ///
    /// # Errors
    ///
    /// [`GatewayError::CommitFailed`] when the store rejects or cancels the
    /// commit. The transaction is rolled back either way.
    pub async fn commit(mut self) -> Result<(), GatewayError> {
        self.tracker.set(MutationStep::Commit);
        let Some(tx) = self.tx.take() else {
            return Err(GatewayError::Internal(
                "commit after transaction ended".to_string(),
            ));
        };
        match tx.commit().await {
            Ok(()) => {
                self.state = TxState::Committed;
                Ok(())
            }
            Err(err) => {
                self.state = TxState::RolledBack;
                Err(classify(
                    MutationStep::Commit,
                    err,
                    self.counterparty_id,
                    self.budget,
                ))
            }
        }
    }
}

impl<T: LedgerTransaction> Drop for TxGuard<'_, T> {
    fn drop(&mut self) {
        if self.tx.is_some() && !self.state.is_terminal() {
            tracing::warn!(
                step = %self.tracker.current(),
                state = ?self.state,
                "transaction abandoned before commit, rolling back"
            );
        }
    }
}

/// Maps a store failure at `step` to the error reported to callers.
#[must_use]
pub fn classify(
    step: MutationStep,
    err: StoreError,
    counterparty_id: CounterpartyId,
    budget: Duration,
) -> GatewayError {
    let at_lock = step == MutationStep::LockCounterparty;
    match err {
        // The outcome of a failed commit is unknown, so it is never retryable.
        other if step == MutationStep::Commit => GatewayError::CommitFailed(other.to_string()),
        StoreError::PoolExhausted => GatewayError::PoolExhausted,
        StoreError::ContextExpired => GatewayError::DeadlineExceeded(budget),
        StoreError::LockNotAvailable => GatewayError::LockTimeout(budget),
        StoreError::StatementCancelled if at_lock => GatewayError::LockTimeout(budget),
        StoreError::StatementCancelled => GatewayError::DeadlineExceeded(budget),
        StoreError::NotFound if at_lock => GatewayError::CounterpartyNotFound(counterparty_id),
        StoreError::UniqueViolation { ref constraint }
            if step == MutationStep::InsertEntry
                && constraint
                    .as_deref()
                    .is_none_or(|name| name.contains("reference_code")) =>
        {
            GatewayError::ReferenceCollision
        }
        StoreError::Database(cause)
            if matches!(step, MutationStep::Acquire | MutationStep::Begin) =>
        {
            GatewayError::PersistenceError(cause)
        }
        other => GatewayError::WriteFailed {
            step,
            cause: other.to_string(),
        },
    }
}
