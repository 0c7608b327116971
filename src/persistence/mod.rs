//! Persistence layer: the store seam used by the mutation engine.
//!
//! [`LedgerStore`] hands out [`LedgerTransaction`]s, each bound to one pooled
//! connection for its whole lifetime. The PostgreSQL implementation sits on
//! top of [`DbPool`]. With the `test-util` feature, `MemoryLedgerStore`
//! reproduces the same locking and visibility rules in process.

#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod pool;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{ActorId, CounterpartyId, LedgerEntryId, NewLedgerEntry};
use crate::service::Deadline;

#[cfg(any(test, feature = "test-util"))]
pub use memory::{FaultPoint, MemoryLedgerStore, StoredLedgerEntry};
pub use pool::{DbPool, PoolSettings, PoolStats};
pub use postgres::PgLedgerStore;

/// Failures reported by a [`LedgerStore`] or its transactions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No connection became available before the deadline.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// The caller's deadline had already elapsed.
    #[error("context deadline already expired")]
    ContextExpired,

    /// The row lock could not be obtained in time (`55P03`).
    #[error("row lock not available")]
    LockNotAvailable,

    /// The store aborted the statement on timeout (`57014`).
    #[error("statement cancelled by the store")]
    StatementCancelled,

    /// The addressed row does not exist.
    #[error("row not found")]
    NotFound,

    /// A unique constraint rejected the write (`23505`).
    #[error("unique constraint violated: {}", .constraint.as_deref().unwrap_or("unknown"))]
    UniqueViolation {
        /// Name of the violated constraint, when reported.
        constraint: Option<String>,
    },

    /// Any other store failure.
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::PoolExhausted,
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("55P03") => Self::LockNotAvailable,
                Some("57014") => Self::StatementCancelled,
                Some("23505") => Self::UniqueViolation {
                    constraint: db.constraint().map(str::to_owned),
                },
                _ => Self::Database(db.to_string()),
            },
            other => Self::Database(other.to_string()),
        }
    }
}

/// A source of transactions over the ledger tables.
///
/// Acquiring a connection and opening a transaction on it are separate
/// calls so that a caller can tell a saturated pool apart from a slow store.
#[async_trait]
pub trait LedgerStore: std::fmt::Debug + Send + Sync + 'static {
    /// Pooled connection handle, returned to the pool when dropped.
    type Conn: Send + 'static;

    /// Transaction handle type.
    type Tx: LedgerTransaction + 'static;

    /// Waits for a pooled connection until `deadline`.
    ///
    /// # Errors
    ///
    /// [`StoreError::PoolExhausted`] if no connection frees up before
    /// `deadline`, [`StoreError::ContextExpired`] if it has already passed.
    async fn acquire(&self, deadline: &Deadline) -> Result<Self::Conn, StoreError>;

    /// Opens a transaction on `conn`.
    ///
    /// # Errors
    ///
    /// Returns the store's failure to open the transaction; the connection
    /// is released.
    async fn begin_on(&self, conn: Self::Conn, deadline: &Deadline)
    -> Result<Self::Tx, StoreError>;

    /// Acquires a connection and opens a transaction on it.
    ///
    /// # Errors
    ///
    /// Same conditions as [`LedgerStore::acquire`] and
    /// [`LedgerStore::begin_on`].
    async fn begin(&self, deadline: &Deadline) -> Result<Self::Tx, StoreError> {
        let conn = self.acquire(deadline).await?;
        self.begin_on(conn, deadline).await
    }

    /// Round-trips a ping on an acquired connection.
    ///
    /// # Errors
    ///
    /// [`StoreError::StatementCancelled`] if no answer arrives before
    /// `deadline`, or the ping failure itself.
    async fn ping(&self, conn: Self::Conn, deadline: &Deadline) -> Result<(), StoreError>;

    /// Point-in-time view of the connection pool population.
    fn pool_stats(&self) -> PoolStats;
}

/// An open transaction. Dropping it without calling
/// [`commit`](LedgerTransaction::commit) rolls it back and releases its
/// connection.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Reads a counterparty balance under an exclusive row lock held until
    /// the transaction ends.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for an unknown counterparty,
    /// [`StoreError::LockNotAvailable`] when the lock wait times out.
    async fn lock_counterparty_balance(
        &mut self,
        counterparty_id: CounterpartyId,
    ) -> Result<Decimal, StoreError>;

    /// Inserts a ledger entry stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns the store's rejection of the row.
    async fn insert_ledger_entry(
        &mut self,
        entry: &NewLedgerEntry,
    ) -> Result<LedgerEntryId, StoreError>;

    /// Sets the actor's last-active timestamp to now.
    ///
    /// # Errors
    ///
    /// Returns the store's rejection of the update.
    async fn touch_actor(&mut self, actor_id: ActorId) -> Result<(), StoreError>;

    /// Subtracts `amount` from the counterparty balance and stamps its
    /// modification time. No lower bound is enforced.
    ///
    /// # Errors
    ///
    /// Returns the store's rejection of the update.
    async fn debit_counterparty(
        &mut self,
        counterparty_id: CounterpartyId,
        amount: Decimal,
    ) -> Result<(), StoreError>;

    /// Commits every write made through this handle.
    ///
    /// # Errors
    ///
    /// Returns the commit failure; the transaction is then rolled back.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discards every write made through this handle.
    ///
    /// # Errors
    ///
    /// Returns the store's failure to roll back; the connection is then
    /// closed instead of being reused.
    async fn rollback(self) -> Result<(), StoreError>;
}
