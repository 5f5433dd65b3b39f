//! In-memory balance store
//!
//! Same locking discipline as the PostgreSQL store: one async mutex per
//! account row, held by the unit until it ends, with a bounded wait. Writes
//! are staged in the unit and land on commit. Used by tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use uuid::Uuid;

use super::{checked_balance, BalanceStore, BalanceStoreError, BalanceUnit, ProcessedEvent};
use crate::domain::{
    Account, AccountNumber, AccountType, Currency, DomainError, NewAccount, TransactionKind,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Shared {
    rows: Mutex<HashMap<AccountNumber, Arc<RowLock<Account>>>>,
    processed: Mutex<HashMap<Uuid, ProcessedEvent>>,
    failing_begins: AtomicU32,
    corrupt_begins: AtomicU32,
    failing_commits: AtomicU32,
}

impl Shared {
    fn row(&self, number: &AccountNumber) -> Option<Arc<RowLock<Account>>> {
        self.rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(number)
            .cloned()
    }

    fn processed(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ProcessedEvent>> {
        self.processed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Take one injected fault if any remain
fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Clone)]
pub struct MemoryBalanceStore {
    shared: Arc<Shared>,
    lock_timeout: Duration,
}

impl Default for MemoryBalanceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBalanceStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Insert an account as-is, replacing any with the same number
    pub fn insert_account(&self, account: Account) {
        let number = account.account_number.clone();
        self.shared
            .rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(number, Arc::new(RowLock::new(account)));
    }

    /// Insert a checking account with a given balance
    pub fn seed_account(
        &self,
        number: &str,
        currency: &str,
        balance: Decimal,
    ) -> Result<Account, DomainError> {
        let mut account = Account::open(
            Uuid::new_v4(),
            AccountNumber::new(number)?,
            AccountType::Checking,
            Currency::new(currency)?,
        );
        account.balance = balance;
        self.insert_account(account.clone());
        Ok(account)
    }

    /// Committed balance; waits for any unit holding the row
    pub async fn balance_of(&self, number: &AccountNumber) -> Option<Decimal> {
        let row = self.shared.row(number)?;
        let account = row.lock().await;
        Some(account.balance)
    }

    /// Make the next `n` calls to `begin` fail as if the store were down
    pub fn fail_next_begins(&self, n: u32) {
        self.shared.failing_begins.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` calls to `begin` fail with an unreadable row, an
    /// error that neither a retry nor the event itself can resolve
    pub fn corrupt_next_begins(&self, n: u32) {
        self.shared.corrupt_begins.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` commits fail; the unit's writes are discarded
    pub fn fail_next_commits(&self, n: u32) {
        self.shared.failing_commits.store(n, Ordering::SeqCst);
    }

    pub fn processed_count(&self) -> usize {
        self.shared.processed().len()
    }

    pub fn is_audited(&self, event_id: Uuid) -> bool {
        self.shared
            .processed()
            .get(&event_id)
            .map(|p| p.audited_at.is_some())
            .unwrap_or(false)
    }

    /// Backdate a processed event, for reconciliation tests
    pub fn set_processed_at(&self, event_id: Uuid, processed_at: DateTime<Utc>) {
        if let Some(p) = self.shared.processed().get_mut(&event_id) {
            p.processed_at = processed_at;
        }
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    async fn begin(&self) -> Result<Box<dyn BalanceUnit>, BalanceStoreError> {
        if take_fault(&self.shared.failing_begins) {
            return Err(BalanceStoreError::Unavailable(
                "injected connection failure".to_string(),
            ));
        }
        if take_fault(&self.shared.corrupt_begins) {
            return Err(BalanceStoreError::InvalidRow(
                "injected corrupt row".to_string(),
            ));
        }
        Ok(Box::new(MemoryBalanceUnit {
            shared: Arc::clone(&self.shared),
            lock_timeout: self.lock_timeout,
            held: BTreeMap::new(),
            staged: HashMap::new(),
            processed: Vec::new(),
        }))
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account, BalanceStoreError> {
        let mut rows = self
            .shared
            .rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let number = match new.account_number {
            Some(number) => {
                if rows.contains_key(&number) {
                    return Err(BalanceStoreError::DuplicateAccount(number));
                }
                number
            }
            None => loop {
                let candidate = AccountNumber::generate();
                if !rows.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let account = Account::open(new.owner_id, number.clone(), new.account_type, new.currency);
        rows.insert(number, Arc::new(RowLock::new(account.clone())));
        Ok(account)
    }

    async fn find_account(
        &self,
        number: &AccountNumber,
    ) -> Result<Option<Account>, BalanceStoreError> {
        match self.shared.row(number) {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn accounts_for_owner(&self, owner_id: Uuid) -> Result<Vec<Account>, BalanceStoreError> {
        let rows: Vec<_> = self
            .shared
            .rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        let mut accounts = Vec::new();
        for row in rows {
            let account = row.lock().await;
            if account.owner_id == owner_id {
                accounts.push(account.clone());
            }
        }
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(accounts)
    }

    async fn mark_audited(&self, event_id: Uuid) -> Result<(), BalanceStoreError> {
        if let Some(p) = self.shared.processed().get_mut(&event_id) {
            p.audited_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }

    async fn unaudited_events(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessedEvent>, BalanceStoreError> {
        let mut events: Vec<ProcessedEvent> = self
            .shared
            .processed()
            .values()
            .filter(|p| p.audited_at.is_none() && p.processed_at <= older_than)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.processed_at.cmp(&b.processed_at));
        events.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(events)
    }
}

struct MemoryBalanceUnit {
    shared: Arc<Shared>,
    lock_timeout: Duration,
    held: BTreeMap<AccountNumber, OwnedMutexGuard<Account>>,
    staged: HashMap<AccountNumber, Decimal>,
    processed: Vec<ProcessedEvent>,
}

#[async_trait]
impl BalanceUnit for MemoryBalanceUnit {
    async fn lock_account_for_update(
        &mut self,
        number: &AccountNumber,
    ) -> Result<Account, BalanceStoreError> {
        if let Some(guard) = self.held.get(number) {
            let mut account = (**guard).clone();
            if let Some(balance) = self.staged.get(number) {
                account.balance = *balance;
            }
            return Ok(account);
        }

        let row = self
            .shared
            .row(number)
            .ok_or_else(|| BalanceStoreError::AccountNotFound(number.clone()))?;

        let guard = tokio::time::timeout(self.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| BalanceStoreError::LockTimeout(number.clone()))?;

        let account = (*guard).clone();
        self.held.insert(number.clone(), guard);
        Ok(account)
    }

    async fn apply_delta(
        &mut self,
        number: &AccountNumber,
        delta: Decimal,
    ) -> Result<Decimal, BalanceStoreError> {
        let guard = self
            .held
            .get(number)
            .ok_or_else(|| BalanceStoreError::NotLocked(number.clone()))?;
        let current = self.staged.get(number).copied().unwrap_or(guard.balance);

        let next = checked_balance(number, current, delta)?;
        self.staged.insert(number.clone(), next);
        Ok(next)
    }

    async fn is_processed(&mut self, event_id: Uuid) -> Result<bool, BalanceStoreError> {
        Ok(self.processed.iter().any(|p| p.event_id == event_id)
            || self.shared.processed().contains_key(&event_id))
    }

    async fn record_processed(
        &mut self,
        event_id: Uuid,
        kind: TransactionKind,
    ) -> Result<(), BalanceStoreError> {
        if self.is_processed(event_id).await? {
            return Err(BalanceStoreError::DuplicateEvent(event_id));
        }
        self.processed.push(ProcessedEvent {
            event_id,
            kind,
            processed_at: Utc::now(),
            audited_at: None,
        });
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), BalanceStoreError> {
        if take_fault(&self.shared.failing_commits) {
            return Err(BalanceStoreError::Unavailable(
                "injected commit failure".to_string(),
            ));
        }

        let now = Utc::now();
        for (number, balance) in self.staged.drain() {
            if let Some(guard) = self.held.get_mut(&number) {
                guard.balance = balance;
                guard.updated_at = now;
            }
        }

        // Recorded while the row locks are still held
        let mut processed = self.shared.processed();
        for p in self.processed.drain(..) {
            processed.insert(p.event_id, p);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BalanceStoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance_store::max_balance;
    use rust_decimal_macros::dec;

    fn n(s: &str) -> AccountNumber {
        AccountNumber::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_create_account_generates_number() {
        let store = MemoryBalanceStore::new();
        let owner = Uuid::new_v4();
        let account = store
            .create_account(NewAccount {
                owner_id: owner,
                account_number: None,
                account_type: AccountType::Savings,
                currency: Currency::new("EUR").unwrap(),
            })
            .await
            .unwrap();

        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.account_number.as_str().len(), 12);
        assert_eq!(store.accounts_for_owner(owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_account_number() {
        let store = MemoryBalanceStore::new();
        store.seed_account("100", "USD", dec!(0)).unwrap();
        let result = store
            .create_account(NewAccount {
                owner_id: Uuid::new_v4(),
                account_number: Some(n("100")),
                account_type: AccountType::Business,
                currency: Currency::new("USD").unwrap(),
            })
            .await;
        assert!(matches!(result, Err(BalanceStoreError::DuplicateAccount(_))));
    }

    #[tokio::test]
    async fn test_uncommitted_unit_changes_nothing() {
        let store = MemoryBalanceStore::new();
        store.seed_account("100", "USD", dec!(50)).unwrap();

        let mut unit = store.begin().await.unwrap();
        unit.lock_account_for_update(&n("100")).await.unwrap();
        assert_eq!(unit.apply_delta(&n("100"), dec!(25)).await.unwrap(), dec!(75));
        drop(unit);

        assert_eq!(store.balance_of(&n("100")).await, Some(dec!(50)));
    }

    #[tokio::test]
    async fn test_balance_past_column_limit_overflows() {
        let store = MemoryBalanceStore::new();
        store.seed_account("100", "USD", max_balance()).unwrap();

        let mut unit = store.begin().await.unwrap();
        unit.lock_account_for_update(&n("100")).await.unwrap();
        let err = unit.apply_delta(&n("100"), dec!(0.0001)).await.unwrap_err();
        assert!(matches!(err, BalanceStoreError::Overflow(_)));
        assert!(err.is_business());
    }

    #[tokio::test]
    async fn test_apply_delta_requires_lock() {
        let store = MemoryBalanceStore::new();
        store.seed_account("100", "USD", dec!(50)).unwrap();

        let mut unit = store.begin().await.unwrap();
        let result = unit.apply_delta(&n("100"), dec!(1)).await;
        assert!(matches!(result, Err(BalanceStoreError::NotLocked(_))));
    }

    #[tokio::test]
    async fn test_lock_wait_is_bounded() {
        let store = MemoryBalanceStore::new().with_lock_timeout(Duration::from_millis(20));
        store.seed_account("100", "USD", dec!(50)).unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.lock_account_for_update(&n("100")).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let result = waiter.lock_account_for_update(&n("100")).await;
        assert!(matches!(result, Err(BalanceStoreError::LockTimeout(_))));
        assert!(result.unwrap_err().is_transient());

        holder.commit().await.unwrap();
        assert!(waiter.lock_account_for_update(&n("100")).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_begin_failure_is_transient() {
        let store = MemoryBalanceStore::new();
        store.fail_next_begins(1);

        let err = store.begin().await.err().unwrap();
        assert!(err.is_transient());
        assert!(store.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_unaudited_events() {
        let store = MemoryBalanceStore::new();
        store.seed_account("100", "USD", dec!(0)).unwrap();

        let event_id = Uuid::new_v4();
        let mut unit = store.begin().await.unwrap();
        unit.lock_account_for_update(&n("100")).await.unwrap();
        unit.apply_delta(&n("100"), dec!(5)).await.unwrap();
        unit.record_processed(event_id, TransactionKind::Deposit).await.unwrap();
        unit.commit().await.unwrap();

        let pending = store.unaudited_events(Utc::now(), 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_id, event_id);

        store.mark_audited(event_id).await.unwrap();
        assert!(store.is_audited(event_id));
        assert!(store.unaudited_events(Utc::now(), 10).await.unwrap().is_empty());
    }
}
