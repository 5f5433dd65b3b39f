//! Ledger records
//!
//! The audit store's document: a finalized transaction event plus its
//! outcome. Written once, never updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{AccountNumber, Amount, Currency, TransactionEvent, TransactionKind};

/// Outcome of a transaction as recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: Uuid,
    /// Idempotency key carried from the originating event
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Amount,
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_number: Option<AccountNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_account: Option<AccountNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_account: Option<AccountNumber>,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRecord {
    /// Record for an event whose balance mutation has been committed
    pub fn completed(event: &TransactionEvent) -> Self {
        Self::from_event(event, RecordStatus::Completed, None)
    }

    /// Record for an event refused by a business rule
    pub fn failed(event: &TransactionEvent, reason: impl Into<String>) -> Self {
        Self::from_event(event, RecordStatus::Failed, Some(reason.into()))
    }

    fn from_event(
        event: &TransactionEvent,
        status: RecordStatus,
        failure_reason: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let (account_number, source_account, destination_account) = match event {
            TransactionEvent::Deposit { account_number, .. }
            | TransactionEvent::Withdrawal { account_number, .. } => {
                (Some(account_number.clone()), None, None)
            }
            TransactionEvent::Transfer {
                source_account,
                destination_account,
                ..
            } => (
                None,
                Some(source_account.clone()),
                Some(destination_account.clone()),
            ),
        };

        Self {
            id: Uuid::new_v4(),
            event_id: event.event_id(),
            kind: event.kind(),
            amount: event.amount(),
            currency: event.currency().clone(),
            account_number,
            source_account,
            destination_account,
            status,
            failure_reason,
            created_at: now,
            updated_at: now,
        }
    }

    /// Accounts this record is listed under in history queries
    pub fn account_numbers(&self) -> Vec<&AccountNumber> {
        [
            self.account_number.as_ref(),
            self.source_account.as_ref(),
            self.destination_account.as_ref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn involves(&self, account: &AccountNumber) -> bool {
        self.account_numbers().contains(&account)
    }
}
