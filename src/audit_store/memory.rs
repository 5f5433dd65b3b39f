//! In-memory audit store with fault injection

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{AuditStore, AuditStoreError};
use crate::domain::{AccountNumber, LedgerRecord};

#[derive(Default)]
struct Shared {
    records: Mutex<Vec<LedgerRecord>>,
    failing: AtomicU32,
    stalling: AtomicU32,
    attempts: AtomicU64,
}

#[derive(Clone, Default)]
pub struct MemoryAuditStore {
    shared: Arc<Shared>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` appends fail as if the store were down
    pub fn fail_next(&self, n: u32) {
        self.shared.failing.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` appends hang as if the store stopped answering
    pub fn stall_next(&self, n: u32) {
        self.shared.stalling.store(n, Ordering::SeqCst);
    }

    /// Appends attempted, including failed ones
    pub fn append_attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn all(&self) -> Vec<LedgerRecord> {
        self.records().clone()
    }

    fn records(&self) -> MutexGuard<'_, Vec<LedgerRecord>> {
        self.shared
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: &LedgerRecord) -> Result<Uuid, AuditStoreError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        let stalled = self
            .shared
            .stalling
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stalled {
            std::future::pending::<()>().await;
        }

        let injected = self
            .shared
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(AuditStoreError::Unavailable(
                "injected audit outage".to_string(),
            ));
        }

        let mut records = self.records();
        if let Some(existing) = records.iter().find(|r| r.event_id == record.event_id) {
            return Ok(existing.id);
        }
        records.push(record.clone());
        Ok(record.id)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<LedgerRecord>, AuditStoreError> {
        Ok(self.records().iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_event_id(
        &self,
        event_id: Uuid,
    ) -> Result<Option<LedgerRecord>, AuditStoreError> {
        Ok(self.records().iter().find(|r| r.event_id == event_id).cloned())
    }

    async fn find_by_account(
        &self,
        account: &AccountNumber,
        limit: i64,
    ) -> Result<Vec<LedgerRecord>, AuditStoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .records()
            .iter()
            .rev()
            .filter(|r| r.involves(account))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionEvent;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_append_is_idempotent_on_event_id() {
        let store = MemoryAuditStore::new();
        let event = TransactionEvent::deposit(Uuid::new_v4(), "100", dec!(10), "USD").unwrap();

        let first = LedgerRecord::completed(&event);
        let second = LedgerRecord::completed(&event);
        assert_ne!(first.id, second.id);

        let id1 = store.append(&first).await.unwrap();
        let id2 = store.append(&second).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_history_by_account_newest_first() {
        let store = MemoryAuditStore::new();
        let a = AccountNumber::new("100").unwrap();

        let deposit = TransactionEvent::deposit(Uuid::new_v4(), "100", dec!(10), "USD").unwrap();
        let transfer =
            TransactionEvent::transfer(Uuid::new_v4(), "200", "100", dec!(5), "USD").unwrap();
        let other = TransactionEvent::deposit(Uuid::new_v4(), "300", dec!(1), "USD").unwrap();

        for event in [&deposit, &transfer, &other] {
            store.append(&LedgerRecord::completed(event)).await.unwrap();
        }

        let history = store.find_by_account(&a, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event_id, transfer.event_id());
        assert_eq!(history[1].event_id, deposit.event_id());
    }
}
