//! Balance Store
//!
//! Authoritative, row-locking store of account balances. Mutations happen
//! inside a [`BalanceUnit`]: one atomic unit holding exclusive row locks on
//! every account it touched until commit or rollback.

mod error;
pub mod lock_order;
pub mod memory;
mod mutation;
pub mod postgres;

pub use error::BalanceStoreError;
pub(crate) use error::{is_data_violation, is_unique_violation};
pub use memory::MemoryBalanceStore;
pub use mutation::{apply_mutation, BalanceMutation, Leg, MutationOutcome};
pub use postgres::PgBalanceStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{Account, AccountNumber, NewAccount, TransactionKind};

/// An event id whose balance mutation has been committed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedEvent {
    pub event_id: Uuid,
    pub kind: TransactionKind,
    pub processed_at: DateTime<Utc>,
    /// Set once the audit store is known to hold the record
    pub audited_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Open an atomic unit
    async fn begin(&self) -> Result<Box<dyn BalanceUnit>, BalanceStoreError>;

    /// Open an account with zero balance. A random account number is
    /// assigned when none is supplied.
    async fn create_account(&self, new: NewAccount) -> Result<Account, BalanceStoreError>;

    /// Unlocked read
    async fn find_account(
        &self,
        number: &AccountNumber,
    ) -> Result<Option<Account>, BalanceStoreError>;

    async fn accounts_for_owner(&self, owner_id: Uuid) -> Result<Vec<Account>, BalanceStoreError>;

    /// Record that the audit trail holds this event
    async fn mark_audited(&self, event_id: Uuid) -> Result<(), BalanceStoreError>;

    /// Processed events not yet confirmed in the audit trail, oldest first
    async fn unaudited_events(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessedEvent>, BalanceStoreError>;
}

/// An open atomic unit. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait BalanceUnit: Send {
    /// Take the exclusive row lock on an account, held until the unit ends
    async fn lock_account_for_update(
        &mut self,
        number: &AccountNumber,
    ) -> Result<Account, BalanceStoreError>;

    /// Add a signed delta to a locked account, returning the new balance.
    /// Fails with `InsufficientFunds` when the balance would go negative.
    async fn apply_delta(
        &mut self,
        number: &AccountNumber,
        delta: Decimal,
    ) -> Result<Decimal, BalanceStoreError>;

    async fn is_processed(&mut self, event_id: Uuid) -> Result<bool, BalanceStoreError>;

    async fn record_processed(
        &mut self,
        event_id: Uuid,
        kind: TransactionKind,
    ) -> Result<(), BalanceStoreError>;

    async fn commit(self: Box<Self>) -> Result<(), BalanceStoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), BalanceStoreError>;
}

/// Largest balance the `NUMERIC(20,4)` column holds
pub fn max_balance() -> Decimal {
    Decimal::from_i128_with_scale(99_999_999_999_999_999_999, 4)
}

/// Balance after applying `delta`, or the reason it cannot be applied
pub(crate) fn checked_balance(
    number: &AccountNumber,
    current: Decimal,
    delta: Decimal,
) -> Result<Decimal, BalanceStoreError> {
    let next = current
        .checked_add(delta)
        .filter(|next| *next <= max_balance())
        .ok_or_else(|| BalanceStoreError::Overflow(number.clone()))?;
    if next < Decimal::ZERO {
        return Err(BalanceStoreError::InsufficientFunds {
            account: number.clone(),
            required: -delta,
            available: current,
        });
    }
    Ok(next)
}
