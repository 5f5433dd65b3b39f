//! Transaction Submission
//!
//! Single-account deposits and withdrawals are not applied here: the
//! intent is validated, authorized and published for the ledger worker.

use std::sync::Arc;
use uuid::Uuid;

use crate::balance_store::BalanceStore;
use crate::channel::Publisher;
use crate::domain::{AccountNumber, OperationContext, TransactionEvent, TransactionKind};
use crate::error::{AppError, AppResult};

use super::{SubmissionReceipt, SubmitTransactionCommand};

pub struct TransactionSubmitter {
    balances: Arc<dyn BalanceStore>,
    publisher: Publisher,
}

impl TransactionSubmitter {
    pub fn new(balances: Arc<dyn BalanceStore>, publisher: Publisher) -> Self {
        Self {
            balances,
            publisher,
        }
    }

    pub async fn submit(
        &self,
        command: SubmitTransactionCommand,
        context: &OperationContext,
    ) -> AppResult<SubmissionReceipt> {
        let principal = context
            .request_user_id
            .ok_or_else(|| AppError::MissingHeader("X-Request-User-Id".to_string()))?;

        let event_id = Uuid::new_v4();
        let event = match command.kind.parse::<TransactionKind>()? {
            TransactionKind::Deposit => TransactionEvent::deposit(
                event_id,
                &command.account_number,
                command.amount,
                &command.currency,
            )?,
            TransactionKind::Withdrawal => TransactionEvent::withdrawal(
                event_id,
                &command.account_number,
                command.amount,
                &command.currency,
            )?,
            TransactionKind::Transfer => {
                return Err(AppError::InvalidRequest(
                    "transfers are submitted through /transfers".to_string(),
                ))
            }
        };

        let number = AccountNumber::new(&command.account_number)?;
        let account = self
            .balances
            .find_account(&number)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(number.to_string()))?;

        if !account.is_owned_by(principal) {
            return Err(AppError::Forbidden(
                "account does not belong to the requesting user".to_string(),
            ));
        }
        if &account.currency != event.currency() {
            return Err(AppError::InvalidRequest(format!(
                "account {} holds {}, not {}",
                number,
                account.currency,
                event.currency()
            )));
        }

        let message_id = self.publisher.publish_event(&event).await.map_err(|e| {
            tracing::error!(event_id = %event_id, error = %e, "Failed to publish transaction");
            AppError::ServiceUnavailable(
                "Event channel is unavailable. Please try again later.".to_string(),
            )
        })?;

        tracing::info!(
            event_id = %event_id,
            kind = %event.kind(),
            account_number = %number,
            "Transaction accepted"
        );

        Ok(SubmissionReceipt {
            event_id,
            message_id,
            status: "accepted".to_string(),
        })
    }
}
