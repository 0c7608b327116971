//! PostgreSQL implementation of the ledger store.
//!
//! Schema assumed (owned elsewhere): `transaction_record`, `app_user` and
//! `corporate`, with `transaction_record.user_id` / `corporate_id` and
//! `app_user.corporate_id` referencing their parents.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Connection, Postgres};
use sqlx::pool::PoolConnection;

use super::{DbPool, LedgerStore, LedgerTransaction, PoolStats, StoreError};
use crate::domain::{ActorId, CounterpartyId, LedgerEntryId, NewLedgerEntry};
use crate::service::Deadline;

/// PostgreSQL-backed ledger store over a shared [`DbPool`].
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: DbPool,
}

impl PgLedgerStore {
    /// Creates a store over the given pool.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Conn = PoolConnection<Postgres>;
    type Tx = PgLedgerTx;

    async fn acquire(&self, deadline: &Deadline) -> Result<PoolConnection<Postgres>, StoreError> {
        self.pool.acquire(deadline).await
    }

    async fn begin_on(
        &self,
        mut conn: PoolConnection<Postgres>,
        deadline: &Deadline,
    ) -> Result<PgLedgerTx, StoreError> {
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql("BEGIN")).await?;
        let mut tx = PgLedgerTx { conn: Some(conn) };

        // Let the server abort a statement or lock wait that outlives the
        // caller's deadline. Zero would disable the timeouts.
        let budget_ms = deadline.remaining().as_millis().max(1).to_string();
        sqlx::query(
            "SELECT set_config('statement_timeout', $1, true), set_config('lock_timeout', $1, true)",
        )
        .bind(&budget_ms)
        .execute(tx.conn()?)
        .await?;

        Ok(tx)
    }

    async fn ping(
        &self,
        mut conn: PoolConnection<Postgres>,
        deadline: &Deadline,
    ) -> Result<(), StoreError> {
        match tokio::time::timeout_at(deadline.expires_at(), conn.ping()).await {
            Ok(result) => Ok(result?),
            Err(_elapsed) => Err(StoreError::StatementCancelled),
        }
    }

    fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

/// An open PostgreSQL transaction holding one pooled connection.
///
/// If dropped while still open, a `ROLLBACK` is issued on a background task
/// before the connection returns to the pool; a connection whose rollback
/// fails is closed instead.
#[derive(Debug)]
pub struct PgLedgerTx {
    conn: Option<PoolConnection<Postgres>>,
}

impl PgLedgerTx {
    fn conn(&mut self) -> Result<&mut sqlx::PgConnection, StoreError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| StoreError::Database("transaction already finished".to_string()))
    }

    async fn finish(&mut self, statement: &'static str) -> Result<(), StoreError> {
        let Some(mut conn) = self.conn.take() else {
            return Err(StoreError::Database("transaction already finished".to_string()));
        };
        match sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(statement)).await {
            Ok(_) => Ok(()),
            Err(err) => {
                discard(conn, statement).await;
                Err(err.into())
            }
        }
    }
}

/// Rolls back what is left of a failed transaction and closes its
/// connection so it never re-enters the idle set mid-transaction.
async fn discard(mut conn: PoolConnection<Postgres>, failed: &'static str) {
    if failed != "ROLLBACK" {
        let _ = sqlx::Executor::execute(&mut *conn, sqlx::raw_sql("ROLLBACK")).await;
    }
    if let Err(err) = conn.close().await {
        tracing::debug!(error = %err, "closing discarded connection failed");
    }
}

#[async_trait]
impl LedgerTransaction for PgLedgerTx {
    async fn lock_counterparty_balance(
        &mut self,
        counterparty_id: CounterpartyId,
    ) -> Result<Decimal, StoreError> {
        let balance = sqlx::query_scalar::<_, Decimal>(
            "SELECT credit_limit FROM corporate WHERE id = $1 FOR UPDATE",
        )
        .bind(counterparty_id.get())
        .fetch_one(self.conn()?)
        .await?;
        Ok(balance)
    }

    async fn insert_ledger_entry(
        &mut self,
        entry: &NewLedgerEntry,
    ) -> Result<LedgerEntryId, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO transaction_record \
                 (user_id, corporate_id, amount, currency, tx_type, status, description, created_at, reference_code) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), $8) \
             RETURNING id",
        )
        .bind(entry.actor_id.get())
        .bind(entry.counterparty_id.get())
        .bind(entry.amount)
        .bind(entry.currency)
        .bind(entry.kind)
        .bind(entry.status.as_str())
        .bind(entry.description)
        .bind(entry.reference_code.as_str())
        .fetch_one(self.conn()?)
        .await?;
        Ok(LedgerEntryId::new(id))
    }

    async fn touch_actor(&mut self, actor_id: ActorId) -> Result<(), StoreError> {
        sqlx::query("UPDATE app_user SET last_login_at = NOW() WHERE id = $1")
            .bind(actor_id.get())
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn debit_counterparty(
        &mut self,
        counterparty_id: CounterpartyId,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE corporate SET credit_limit = credit_limit - $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(amount)
        .bind(counterparty_id.get())
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PgLedgerTx {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // No runtime to run the rollback on; the server rolls back when
            // the connection closes.
            conn.close_on_drop();
            return;
        };
        runtime.spawn(async move {
            // Any statement cut off by the deadline is drained first; the
            // server-side statement_timeout bounds how long that takes.
            if let Err(err) = sqlx::Executor::execute(&mut *conn, sqlx::raw_sql("ROLLBACK")).await {
                tracing::warn!(error = %err, "rollback of abandoned transaction failed");
                let _ = conn.close().await;
            }
        });
    }
}
