//! Command definitions
//!
//! Commands represent intentions to change the ledger. Amounts are exact
//! decimals read straight from JSON numbers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::AccountNumber;

// =========================================================================
// TransferCommand
// =========================================================================

/// Move funds between two accounts synchronously
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    pub source_account: String,
    pub destination_account: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    pub currency: String,
}

impl TransferCommand {
    pub fn new(
        source_account: impl Into<String>,
        destination_account: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            source_account: source_account.into(),
            destination_account: destination_account.into(),
            amount,
            currency: currency.into(),
        }
    }
}

/// Where the audit record of a committed transfer stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDispatch {
    /// Handed to the event channel; the worker appends it
    Queued,
    /// Channel unavailable; appended directly
    Recorded,
    /// Neither path succeeded; reconciliation will surface the gap
    PendingReconciliation,
}

/// Result of a committed transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: Uuid,
    pub status: String,
    pub source_account: AccountNumber,
    pub destination_account: AccountNumber,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub source_balance: Decimal,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub destination_balance: Decimal,
    pub audit: AuditDispatch,
}

// =========================================================================
// SubmitTransactionCommand
// =========================================================================

/// Publish a single-account deposit or withdrawal for the worker to apply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTransactionCommand {
    #[serde(rename = "type")]
    pub kind: String,
    pub account_number: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    pub currency: String,
}

impl SubmitTransactionCommand {
    pub fn new(
        kind: impl Into<String>,
        account_number: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            account_number: account_number.into(),
            amount,
            currency: currency.into(),
        }
    }
}

/// Accepted for asynchronous application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub event_id: Uuid,
    pub message_id: Uuid,
    pub status: String,
}
