//! In-process ledger store.
//!
//! Mirrors the guarantees the PostgreSQL store gets from the database:
//! a bounded connection budget, exclusive counterparty row locks held until
//! the transaction ends, writes invisible until commit and discarded on
//! rollback or drop. Faults and hangs can be injected at any step.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

use super::{LedgerStore, LedgerTransaction, PoolStats, StoreError};
use crate::domain::{ActorId, CounterpartyId, LedgerEntryId, LedgerStatus, NewLedgerEntry};
use crate::service::Deadline;

/// Step at which a fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Opening the transaction, after the connection is acquired.
    Begin,
    /// Reading the counterparty under lock, after the lock is granted.
    LockCounterparty,
    /// Inserting the ledger entry.
    InsertEntry,
    /// Updating the actor timestamp.
    TouchActor,
    /// Debiting the counterparty.
    DebitCounterparty,
    /// Committing.
    Commit,
}

#[derive(Debug, Clone)]
enum Fault {
    Fail(StoreError),
    Delay(Duration),
    Hang,
}

/// A committed ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLedgerEntry {
    /// Assigned identity.
    pub id: LedgerEntryId,
    /// Owning actor.
    pub actor_id: ActorId,
    /// Owning counterparty.
    pub counterparty_id: CounterpartyId,
    /// Recorded amount.
    pub amount: Decimal,
    /// Recorded status.
    pub status: LedgerStatus,
    /// Reference code.
    pub reference_code: String,
    /// Insert timestamp.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CounterpartyRow {
    balance: Decimal,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct ActorRow {
    last_active_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Tables {
    counterparties: HashMap<CounterpartyId, CounterpartyRow>,
    actors: HashMap<ActorId, ActorRow>,
    entries: BTreeMap<LedgerEntryId, StoredLedgerEntry>,
    reference_codes: HashSet<String>,
}

#[derive(Debug)]
struct Shared {
    max_connections: u32,
    connections: Arc<Semaphore>,
    peak_acquired: AtomicU32,
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<CounterpartyId, Arc<tokio::sync::Mutex<()>>>>,
    faults: Mutex<HashMap<FaultPoint, Fault>>,
    next_entry_id: AtomicI64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn acquired(&self) -> u32 {
        let idle = u32::try_from(self.connections.available_permits()).unwrap_or(u32::MAX);
        self.max_connections.saturating_sub(idle)
    }

    fn row_lock(&self, counterparty_id: CounterpartyId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(locked(&self.row_locks).entry(counterparty_id).or_default())
    }

    async fn checkpoint(&self, point: FaultPoint) -> Result<(), StoreError> {
        let fault = locked(&self.faults).get(&point).cloned();
        match fault {
            Some(Fault::Fail(err)) => Err(err),
            Some(Fault::Delay(pause)) => {
                tokio::time::sleep(pause).await;
                Ok(())
            }
            Some(Fault::Hang) => std::future::pending().await,
            None => Ok(()),
        }
    }
}

/// In-process [`LedgerStore`] with the same isolation and locking rules as
/// the PostgreSQL store.
#[derive(Debug, Clone)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
}

impl MemoryLedgerStore {
    /// Creates an empty store allowing `max_connections` concurrent
    /// transactions.
    #[must_use]
    pub fn new(max_connections: u32) -> Self {
        let permits = usize::try_from(max_connections).unwrap_or(usize::MAX);
        Self {
            shared: Arc::new(Shared {
                max_connections,
                connections: Arc::new(Semaphore::new(permits)),
                peak_acquired: AtomicU32::new(0),
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                faults: Mutex::new(HashMap::new()),
                next_entry_id: AtomicI64::new(1),
                commits: AtomicU64::new(0),
                rollbacks: AtomicU64::new(0),
            }),
        }
    }

    /// Seeds a counterparty with the given balance.
    pub fn add_counterparty(&self, id: CounterpartyId, balance: Decimal) {
        locked(&self.shared.tables).counterparties.insert(
            id,
            CounterpartyRow {
                balance,
                updated_at: None,
            },
        );
    }

    /// Seeds an actor that has never been active.
    pub fn add_actor(&self, id: ActorId) {
        locked(&self.shared.tables)
            .actors
            .insert(id, ActorRow { last_active_at: None });
    }

    /// Makes every later transaction fail at `point` with `error`.
    pub fn fail_at(&self, point: FaultPoint, error: StoreError) {
        locked(&self.shared.faults).insert(point, Fault::Fail(error));
    }

    /// Makes every later transaction pause for `pause` at `point`.
    pub fn delay_at(&self, point: FaultPoint, pause: Duration) {
        locked(&self.shared.faults).insert(point, Fault::Delay(pause));
    }

    /// Makes every later transaction block forever at `point`.
    pub fn hang_at(&self, point: FaultPoint) {
        locked(&self.shared.faults).insert(point, Fault::Hang);
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        locked(&self.shared.faults).clear();
    }

    /// Committed balance of a counterparty.
    #[must_use]
    pub fn balance(&self, id: CounterpartyId) -> Option<Decimal> {
        locked(&self.shared.tables)
            .counterparties
            .get(&id)
            .map(|row| row.balance)
    }

    /// Committed modification time of a counterparty.
    #[must_use]
    pub fn counterparty_updated_at(&self, id: CounterpartyId) -> Option<DateTime<Utc>> {
        locked(&self.shared.tables)
            .counterparties
            .get(&id)
            .and_then(|row| row.updated_at)
    }

    /// Committed last-active time of an actor.
    #[must_use]
    pub fn actor_last_active(&self, id: ActorId) -> Option<DateTime<Utc>> {
        locked(&self.shared.tables)
            .actors
            .get(&id)
            .and_then(|row| row.last_active_at)
    }

    /// All committed ledger entries in identity order.
    #[must_use]
    pub fn ledger_entries(&self) -> Vec<StoredLedgerEntry> {
        locked(&self.shared.tables).entries.values().cloned().collect()
    }

    /// Number of committed transactions.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Number of transactions rolled back, explicitly or by drop.
    #[must_use]
    pub fn rollbacks(&self) -> u64 {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously acquired connections seen.
    #[must_use]
    pub fn peak_acquired(&self) -> u32 {
        self.shared.peak_acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Conn = OwnedSemaphorePermit;
    type Tx = MemoryLedgerTx;

    async fn acquire(&self, deadline: &Deadline) -> Result<OwnedSemaphorePermit, StoreError> {
        if deadline.is_expired() {
            return Err(StoreError::ContextExpired);
        }
        let permit = tokio::time::timeout_at(
            deadline.expires_at(),
            Arc::clone(&self.shared.connections).acquire_owned(),
        )
        .await
        .map_err(|_elapsed| StoreError::PoolExhausted)?
        .map_err(|_closed| StoreError::Database("pool closed".to_string()))?;

        self.shared
            .peak_acquired
            .fetch_max(self.shared.acquired(), Ordering::SeqCst);
        Ok(permit)
    }

    async fn begin_on(
        &self,
        permit: OwnedSemaphorePermit,
        _deadline: &Deadline,
    ) -> Result<MemoryLedgerTx, StoreError> {
        let tx = MemoryLedgerTx {
            shared: Arc::clone(&self.shared),
            _permit: permit,
            row_locks: Vec::new(),
            staged: Vec::new(),
            open: true,
        };
        self.shared.checkpoint(FaultPoint::Begin).await?;
        Ok(tx)
    }

    async fn ping(
        &self,
        _permit: OwnedSemaphorePermit,
        _deadline: &Deadline,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn pool_stats(&self) -> PoolStats {
        let acquired = self.shared.acquired();
        PoolStats {
            total: self.shared.max_connections,
            idle: self.shared.max_connections.saturating_sub(acquired),
            acquired,
            max: self.shared.max_connections,
        }
    }
}

#[derive(Debug)]
enum StagedWrite {
    Insert(StoredLedgerEntry),
    Touch(ActorId, DateTime<Utc>),
    Debit(CounterpartyId, Decimal, DateTime<Utc>),
}

/// Transaction on a [`MemoryLedgerStore`]. Holds one connection permit and
/// any row locks it took until it ends.
#[derive(Debug)]
pub struct MemoryLedgerTx {
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
    row_locks: Vec<(CounterpartyId, OwnedMutexGuard<()>)>,
    staged: Vec<StagedWrite>,
    open: bool,
}

impl MemoryLedgerTx {
    fn holds_lock(&self, counterparty_id: CounterpartyId) -> bool {
        self.row_locks.iter().any(|(id, _)| *id == counterparty_id)
    }

    fn end(&mut self) {
        self.open = false;
        self.staged.clear();
        self.row_locks.clear();
    }
}

#[async_trait]
impl LedgerTransaction for MemoryLedgerTx {
    async fn lock_counterparty_balance(
        &mut self,
        counterparty_id: CounterpartyId,
    ) -> Result<Decimal, StoreError> {
        if !locked(&self.shared.tables)
            .counterparties
            .contains_key(&counterparty_id)
        {
            return Err(StoreError::NotFound);
        }
        if !self.holds_lock(counterparty_id) {
            let guard = self.shared.row_lock(counterparty_id).lock_owned().await;
            self.row_locks.push((counterparty_id, guard));
        }
        self.shared.checkpoint(FaultPoint::LockCounterparty).await?;

        // Under the row lock nothing else can change the committed balance.
        locked(&self.shared.tables)
            .counterparties
            .get(&counterparty_id)
            .map(|row| row.balance)
            .ok_or(StoreError::NotFound)
    }

    async fn insert_ledger_entry(
        &mut self,
        entry: &NewLedgerEntry,
    ) -> Result<LedgerEntryId, StoreError> {
        self.shared.checkpoint(FaultPoint::InsertEntry).await?;
        {
            let tables = locked(&self.shared.tables);
            if !tables.actors.contains_key(&entry.actor_id)
                || !tables.counterparties.contains_key(&entry.counterparty_id)
            {
                return Err(StoreError::Database(
                    "insert on table \"transaction_record\" violates foreign key constraint"
                        .to_string(),
                ));
            }
            if tables.reference_codes.contains(entry.reference_code.as_str()) {
                return Err(StoreError::UniqueViolation {
                    constraint: Some("transaction_record_reference_code_key".to_string()),
                });
            }
        }

        // Like a sequence, identities are consumed even if the insert is
        // later rolled back.
        let id = LedgerEntryId::new(self.shared.next_entry_id.fetch_add(1, Ordering::SeqCst));
        self.staged.push(StagedWrite::Insert(StoredLedgerEntry {
            id,
            actor_id: entry.actor_id,
            counterparty_id: entry.counterparty_id,
            amount: entry.amount,
            status: entry.status,
            reference_code: entry.reference_code.as_str().to_owned(),
            created_at: Utc::now(),
        }));
        Ok(id)
    }

    async fn touch_actor(&mut self, actor_id: ActorId) -> Result<(), StoreError> {
        self.shared.checkpoint(FaultPoint::TouchActor).await?;
        self.staged.push(StagedWrite::Touch(actor_id, Utc::now()));
        Ok(())
    }

    async fn debit_counterparty(
        &mut self,
        counterparty_id: CounterpartyId,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        self.shared.checkpoint(FaultPoint::DebitCounterparty).await?;
        if !self.holds_lock(counterparty_id) {
            let guard = self.shared.row_lock(counterparty_id).lock_owned().await;
            self.row_locks.push((counterparty_id, guard));
        }
        self.staged
            .push(StagedWrite::Debit(counterparty_id, amount, Utc::now()));
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        if let Err(err) = self.shared.checkpoint(FaultPoint::Commit).await {
            self.end();
            self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(err);
        }

        {
            let mut tables = locked(&self.shared.tables);
            for write in self.staged.drain(..) {
                match write {
                    StagedWrite::Insert(entry) => {
                        tables.reference_codes.insert(entry.reference_code.clone());
                        tables.entries.insert(entry.id, entry);
                    }
                    StagedWrite::Touch(actor_id, at) => {
                        // Zero rows affected is not an error.
                        if let Some(actor) = tables.actors.get_mut(&actor_id) {
                            actor.last_active_at = Some(at);
                        }
                    }
                    StagedWrite::Debit(counterparty_id, amount, at) => {
                        if let Some(row) = tables.counterparties.get_mut(&counterparty_id) {
                            row.balance -= amount;
                            row.updated_at = Some(at);
                        }
                    }
                }
            }
        }

        self.end();
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.end();
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MemoryLedgerTx {
    fn drop(&mut self) {
        if self.open {
            self.end();
            self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;
    use crate::domain::{MutationRequest, Protocol};

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(3))
    }

    fn seeded(max_connections: u32) -> MemoryLedgerStore {
        let store = MemoryLedgerStore::new(max_connections);
        store.add_counterparty(CounterpartyId::new(7), Decimal::new(50_000, 2));
        store.add_actor(ActorId::new(42));
        store
    }

    fn entry() -> NewLedgerEntry {
        Protocol::FullProcess.ledger_entry(&MutationRequest {
            actor_id: ActorId::new(42),
            counterparty_id: CounterpartyId::new(7),
            amount: Decimal::new(15_000, 2),
        })
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = seeded(2);
        let Ok(mut tx) = store.begin(&deadline()).await else {
            panic!("begin");
        };
        assert_ok!(tx.insert_ledger_entry(&entry()).await);
        assert_ok!(tx.debit_counterparty(CounterpartyId::new(7), Decimal::ONE).await);

        assert!(store.ledger_entries().is_empty());
        assert_eq!(store.balance(CounterpartyId::new(7)), Some(Decimal::new(50_000, 2)));

        assert_ok!(tx.commit().await);
        assert_eq!(store.ledger_entries().len(), 1);
        assert_eq!(store.balance(CounterpartyId::new(7)), Some(Decimal::new(49_900, 2)));
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back_and_frees_connection() {
        let store = seeded(1);
        {
            let Ok(mut tx) = store.begin(&deadline()).await else {
                panic!("begin");
            };
            assert_ok!(tx.insert_ledger_entry(&entry()).await);
            assert_eq!(store.pool_stats().acquired, 1);
        }
        assert_eq!(store.pool_stats().acquired, 0);
        assert_eq!(store.rollbacks(), 1);
        assert!(store.ledger_entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_waits_until_deadline() {
        let store = seeded(1);
        let Ok(_held) = store.begin(&deadline()).await else {
            panic!("begin");
        };
        let short = Deadline::after(Duration::from_millis(100));
        let result = store.begin(&short).await;
        assert!(matches!(result, Err(StoreError::PoolExhausted)));
    }

    #[tokio::test(start_paused = true)]
    async fn row_lock_blocks_second_transaction() {
        let store = seeded(2);
        let Ok(mut first) = store.begin(&deadline()).await else {
            panic!("begin");
        };
        assert_ok!(first.lock_counterparty_balance(CounterpartyId::new(7)).await);

        let Ok(mut second) = store.begin(&deadline()).await else {
            panic!("begin");
        };
        let waited = tokio::time::timeout(
            Duration::from_millis(200),
            second.lock_counterparty_balance(CounterpartyId::new(7)),
        )
        .await;
        assert!(waited.is_err());

        assert_ok!(first.rollback().await);
        let balance = second.lock_counterparty_balance(CounterpartyId::new(7)).await;
        assert_eq!(balance, Ok(Decimal::new(50_000, 2)));
    }

    #[tokio::test]
    async fn unknown_counterparty_is_not_found() {
        let store = seeded(1);
        let Ok(mut tx) = store.begin(&deadline()).await else {
            panic!("begin");
        };
        let result = tx.lock_counterparty_balance(CounterpartyId::new(99)).await;
        assert_eq!(result, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn injected_fault_is_returned() {
        let store = seeded(1);
        store.fail_at(FaultPoint::TouchActor, StoreError::Database("boom".to_string()));
        let Ok(mut tx) = store.begin(&deadline()).await else {
            panic!("begin");
        };
        assert_eq!(
            tx.touch_actor(ActorId::new(42)).await,
            Err(StoreError::Database("boom".to_string()))
        );

        store.clear_faults();
        assert_ok!(tx.touch_actor(ActorId::new(42)).await);
    }
}
