//! Transactional mutation engine.
//!
//! Runs the two write protocols against a [`LedgerStore`], each as one
//! transaction under one point deadline:
//!
//! - **with activity**: insert ledger entry, touch actor, commit.
//! - **full process**: lock counterparty, insert ledger entry, touch actor,
//!   debit counterparty, commit.
//!
//! The counterparty row lock is the only concurrency control. Nothing is
//! retried here; callers decide whether a retryable error is worth another
//! attempt.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::Instant;

use super::tx_guard::{StepTracker, TxGuard};
use super::{Deadline, OperationKind, Timeouts, with_deadline};
use crate::domain::{MutationOutcome, MutationRequest, MutationStep, Protocol};
use crate::error::GatewayError;
use crate::persistence::{LedgerStore, LedgerTransaction, PoolStats, StoreError};

/// Entry point for both mutation protocols.
///
/// Holds the store handle and the operation budgets; no per-request state
/// lives here, so one engine is shared by every request task.
#[derive(Debug)]
pub struct MutationEngine<S: LedgerStore> {
    store: S,
    timeouts: Timeouts,
}

impl<S: LedgerStore> MutationEngine<S> {
    /// Creates an engine over `store`.
    #[must_use]
    pub const fn new(store: S, timeouts: Timeouts) -> Self {
        Self { store, timeouts }
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Current connection pool population.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.store.pool_stats()
    }

    /// Checks that a pooled connection answers within the point budget.
    ///
    /// # Errors
    ///
    /// [`GatewayError::PoolExhausted`] when no connection frees up in time,
    /// [`GatewayError::DeadlineExceeded`] when the ping itself is too slow,
    /// otherwise [`GatewayError::PersistenceError`].
    pub async fn ping(&self) -> Result<(), GatewayError> {
        let budget = self.timeouts.budget(OperationKind::Point);
        let acquired = AtomicBool::new(false);
        let flag = &acquired;

        with_deadline(None, budget, |deadline| async move {
            let to_gateway = |err| match err {
                StoreError::PoolExhausted => GatewayError::PoolExhausted,
                StoreError::ContextExpired | StoreError::StatementCancelled => {
                    GatewayError::DeadlineExceeded(deadline.budget())
                }
                other => GatewayError::PersistenceError(other.to_string()),
            };
            let conn = self.store.acquire(&deadline).await.map_err(to_gateway)?;
            flag.store(true, Ordering::Release);
            self.store.ping(conn, &deadline).await.map_err(to_gateway)
        })
        .await
        .map_err(|err| match err {
            // The deadline and the pool wait expire together; either way no
            // connection was free.
            GatewayError::DeadlineExceeded(_) if !acquired.load(Ordering::Acquire) => {
                GatewayError::PoolExhausted
            }
            other => other,
        })
    }

    /// Records a ledger entry and touches the actor in one transaction.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] for non-positive identifiers,
    /// otherwise the failure of whichever step did not complete. Nothing is
    /// committed on error.
    pub async fn create_ledger_entry_with_activity(
        &self,
        request: MutationRequest,
    ) -> Result<MutationOutcome, GatewayError> {
        self.run(Protocol::WithActivity, request).await
    }

    /// Locks the counterparty, records a ledger entry, touches the actor and
    /// debits the counterparty in one transaction.
    ///
    /// The reported `balance_remaining` is the balance read under the lock
    /// minus the amount. It may be negative.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] for non-positive identifiers,
    /// [`GatewayError::CounterpartyNotFound`] when the counterparty does not
    /// exist, [`GatewayError::LockTimeout`] when the row lock is not granted
    /// in time, otherwise the failure of whichever step did not complete.
    /// Nothing is committed on error.
    pub async fn create_ledger_entry_full(
        &self,
        request: MutationRequest,
    ) -> Result<MutationOutcome, GatewayError> {
        self.run(Protocol::FullProcess, request).await
    }

    async fn run(
        &self,
        protocol: Protocol,
        request: MutationRequest,
    ) -> Result<MutationOutcome, GatewayError> {
        validate(&request)?;

        let started = Instant::now();
        let tracker = StepTracker::default();
        let budget = self.timeouts.budget(OperationKind::Point);

        let result = with_deadline(None, budget, |deadline| {
            self.execute(protocol, request, deadline, &tracker)
        })
        .await
        .map_err(|err| match err {
            // The deadline fired while a step was still in flight: attribute
            // it to that step.
            GatewayError::DeadlineExceeded(budget) => match tracker.current() {
                MutationStep::Acquire => GatewayError::PoolExhausted,
                MutationStep::LockCounterparty => GatewayError::LockTimeout(budget),
                MutationStep::Commit => {
                    GatewayError::CommitFailed("deadline elapsed during commit".to_string())
                }
                _ => GatewayError::DeadlineExceeded(budget),
            },
            other => other,
        });

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(outcome) => tracing::info!(
                %protocol,
                actor_id = %request.actor_id,
                counterparty_id = %request.counterparty_id,
                ledger_entry_id = %outcome.ledger_entry_id,
                elapsed_ms,
                "mutation committed"
            ),
            Err(GatewayError::LockTimeout(_)) => tracing::warn!(
                %protocol,
                actor_id = %request.actor_id,
                counterparty_id = %request.counterparty_id,
                step = %tracker.current(),
                reason = "lock_contention",
                elapsed_ms,
                "counterparty row lock not granted in time"
            ),
            Err(err @ GatewayError::CommitFailed(_)) => tracing::error!(
                %protocol,
                actor_id = %request.actor_id,
                counterparty_id = %request.counterparty_id,
                step = %tracker.current(),
                error = %err,
                elapsed_ms,
                "commit failed, final state must be reconciled"
            ),
            Err(err) => tracing::warn!(
                %protocol,
                actor_id = %request.actor_id,
                counterparty_id = %request.counterparty_id,
                step = %tracker.current(),
                category = err.category(),
                error = %err,
                elapsed_ms,
                "mutation rolled back"
            ),
        }
        result
    }

    async fn execute(
        &self,
        protocol: Protocol,
        request: MutationRequest,
        deadline: Deadline,
        tracker: &StepTracker,
    ) -> Result<MutationOutcome, GatewayError> {
        let mut guard = TxGuard::begin(&self.store, &deadline, &request, tracker).await?;

        // The lock comes before any read of the balance and before any
        // other write.
        let balance_remaining = match protocol {
            Protocol::FullProcess => {
                let locked = guard.enter(MutationStep::LockCounterparty)?;
                let result = locked
                    .lock_counterparty_balance(request.counterparty_id)
                    .await;
                let balance = guard.settle(result).await?;
                match balance.checked_sub(request.amount) {
                    Some(remaining) => Some(remaining),
                    None => {
                        return Err(guard
                            .abort(GatewayError::InvalidRequest(
                                "amount overflows counterparty balance".to_string(),
                            ))
                            .await);
                    }
                }
            }
            Protocol::WithActivity => None,
        };

        let entry = protocol.ledger_entry(&request);
        let result = guard
            .enter(MutationStep::InsertEntry)?
            .insert_ledger_entry(&entry)
            .await;
        let ledger_entry_id = guard.settle(result).await?;

        let result = guard
            .enter(MutationStep::TouchActor)?
            .touch_actor(request.actor_id)
            .await;
        guard.settle(result).await?;

        if protocol == Protocol::FullProcess {
            let result = guard
                .enter(MutationStep::DebitCounterparty)?
                .debit_counterparty(request.counterparty_id, request.amount)
                .await;
            guard.settle(result).await?;
        }

        guard.commit().await?;

        Ok(MutationOutcome {
            protocol,
            ledger_entry_id,
            status: entry.status,
            entities_touched: protocol.entities_touched(),
            balance_remaining,
        })
    }
}

fn validate(request: &MutationRequest) -> Result<(), GatewayError> {
    if !request.actor_id.is_valid() {
        return Err(GatewayError::InvalidRequest(format!(
            "user_id must be positive, got {}",
            request.actor_id
        )));
    }
    if !request.counterparty_id.is_valid() {
        return Err(GatewayError::InvalidRequest(format!(
            "corporate_id must be positive, got {}",
            request.counterparty_id
        )));
    }
    Ok(())
}
