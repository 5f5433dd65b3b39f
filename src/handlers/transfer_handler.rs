//! Transfer Executor
//!
//! Synchronous transfer path: validate, move funds under row locks in one
//! atomic unit, commit, then hand the fact to the audit trail.

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit_store::AuditStore;
use crate::balance_store::{
    apply_mutation, BalanceMutation, BalanceStore, BalanceStoreError, MutationOutcome,
};
use crate::channel::Publisher;
use crate::domain::{AccountNumber, DomainError, LedgerRecord, OperationContext, TransactionEvent};

use super::{AuditDispatch, TransferCommand, TransferReceipt};

/// Typed failure of a transfer. Every variant means no balance changed.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Cannot transfer to the same account")]
    SameAccount,

    #[error(transparent)]
    Invalid(DomainError),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        account: AccountNumber,
        required: Decimal,
        available: Decimal,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountNumber),

    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),

    /// Principal does not own the source account
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Transient store failure; nothing was committed, retry later
    #[error("Ledger temporarily unavailable, retry later: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for TransferError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidAmount(msg) => TransferError::InvalidAmount(msg),
            DomainError::SameAccountTransfer => TransferError::SameAccount,
            DomainError::Forbidden(msg) => TransferError::Forbidden(msg),
            other => TransferError::Invalid(other),
        }
    }
}

impl From<BalanceStoreError> for TransferError {
    fn from(err: BalanceStoreError) -> Self {
        match err {
            BalanceStoreError::InsufficientFunds {
                account,
                required,
                available,
            } => TransferError::InsufficientFunds {
                account,
                required,
                available,
            },
            BalanceStoreError::AccountNotFound(number) => TransferError::AccountNotFound(number),
            e @ BalanceStoreError::CurrencyMismatch { .. } => {
                TransferError::CurrencyMismatch(e.to_string())
            }
            e if e.is_transient() => TransferError::Unavailable(e.to_string()),
            e => TransferError::Internal(e.to_string()),
        }
    }
}

// =========================================================================
// TransferExecutor
// =========================================================================

pub struct TransferExecutor {
    balances: Arc<dyn BalanceStore>,
    audit: Arc<dyn AuditStore>,
    publisher: Publisher,
}

impl TransferExecutor {
    pub fn new(
        balances: Arc<dyn BalanceStore>,
        audit: Arc<dyn AuditStore>,
        publisher: Publisher,
    ) -> Self {
        Self {
            balances,
            audit,
            publisher,
        }
    }

    /// Execute on behalf of the request's principal, who must own the
    /// source account
    pub async fn execute_as(
        &self,
        command: TransferCommand,
        context: &OperationContext,
    ) -> Result<TransferReceipt, TransferError> {
        let principal = context
            .request_user_id
            .ok_or_else(|| TransferError::Forbidden("no authenticated principal".to_string()))?;

        let source = AccountNumber::new(&command.source_account)?;
        let account = self
            .balances
            .find_account(&source)
            .await?
            .ok_or_else(|| TransferError::AccountNotFound(source.clone()))?;

        if !account.is_owned_by(principal) {
            tracing::warn!(
                principal = %principal,
                account_number = %source,
                "Transfer from account not owned by principal"
            );
            return Err(TransferError::Forbidden(
                "source account does not belong to the requesting user".to_string(),
            ));
        }

        self.execute(command).await
    }

    /// Execute the transfer.
    ///
    /// Once the balance change commits this returns success; a failure to
    /// record the audit trail afterwards is reported in `audit`, never as
    /// an error.
    pub async fn execute(&self, command: TransferCommand) -> Result<TransferReceipt, TransferError> {
        let transfer_id = Uuid::new_v4();
        let source = AccountNumber::new(&command.source_account)?;
        let destination = AccountNumber::new(&command.destination_account)?;
        let event = TransactionEvent::transfer(
            transfer_id,
            source.as_str(),
            destination.as_str(),
            command.amount,
            &command.currency,
        )?;

        let mutation = BalanceMutation::from_event(&event);
        let balances = match apply_mutation(self.balances.as_ref(), &mutation).await {
            Ok(MutationOutcome::Applied(balances)) => balances,
            Ok(MutationOutcome::AlreadyApplied) => {
                return Err(TransferError::Internal(format!(
                    "transfer id {transfer_id} already applied"
                )))
            }
            Err(e) => {
                if e.is_business() {
                    tracing::info!(transfer_id = %transfer_id, error = %e, "Transfer rejected");
                } else {
                    tracing::warn!(transfer_id = %transfer_id, error = %e, "Transfer failed");
                }
                return Err(e.into());
            }
        };

        // Committed. Nothing below may turn this into a failure.
        let audit = self.dispatch_audit(&event).await;

        let source_balance = balances.get(&source).copied().unwrap_or_default();
        let destination_balance = balances.get(&destination).copied().unwrap_or_default();

        tracing::info!(
            transfer_id = %transfer_id,
            source_account = %source,
            destination_account = %destination,
            amount = %event.amount(),
            audit = ?audit,
            "Transfer completed"
        );

        Ok(TransferReceipt {
            transfer_id,
            status: "success".to_string(),
            source_account: source,
            destination_account: destination,
            amount: event.amount().value(),
            currency: event.currency().to_string(),
            source_balance,
            destination_balance,
            audit,
        })
    }

    /// Queue the audit event; fall back to appending directly
    async fn dispatch_audit(&self, event: &TransactionEvent) -> AuditDispatch {
        let publish_err = match self.publisher.publish_event(event).await {
            Ok(_) => return AuditDispatch::Queued,
            Err(e) => e,
        };

        tracing::warn!(
            event_id = %event.event_id(),
            error = %publish_err,
            "Audit event could not be queued, appending directly"
        );

        let record = LedgerRecord::completed(event);
        match self.audit.append(&record).await {
            Ok(record_id) => {
                if let Err(e) = self.balances.mark_audited(event.event_id()).await {
                    tracing::warn!(event_id = %event.event_id(), error = %e, "Could not mark event audited");
                }
                tracing::debug!(event_id = %event.event_id(), record_id = %record_id, "Audit record appended");
                AuditDispatch::Recorded
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.event_id(),
                    error = %e,
                    reconciliation_required = true,
                    "Committed transfer has no audit record"
                );
                AuditDispatch::PendingReconciliation
            }
        }
    }
}
