//! Audit Store
//!
//! Append-only store of ledger records, independent of the balance store's
//! transaction boundary. Appends are idempotent on `event_id`: appending a
//! second record for the same event returns the first record's id and
//! stores nothing.

pub mod memory;
pub mod postgres;
mod retry;

pub use memory::MemoryAuditStore;
pub use postgres::PgAuditStore;
pub use retry::{append_with_retry, AuditRetryPolicy, RetryExhausted};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{AccountNumber, LedgerRecord};

#[derive(Debug, thiserror::Error)]
pub enum AuditStoreError {
    #[error("Audit store unavailable: {0}")]
    Unavailable(String),

    #[error("Audit store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a record, returning its id (or the id already stored for the
    /// record's event)
    async fn append(&self, record: &LedgerRecord) -> Result<Uuid, AuditStoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<LedgerRecord>, AuditStoreError>;

    async fn find_by_event_id(
        &self,
        event_id: Uuid,
    ) -> Result<Option<LedgerRecord>, AuditStoreError>;

    /// Newest first
    async fn find_by_account(
        &self,
        account: &AccountNumber,
        limit: i64,
    ) -> Result<Vec<LedgerRecord>, AuditStoreError>;
}
