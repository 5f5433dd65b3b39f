//! Handler tests against in-memory stores

#[cfg(test)]
mod tests {
    use crate::audit_store::{AuditStore, MemoryAuditStore};
    use crate::balance_store::MemoryBalanceStore;
    use crate::channel::{EventChannel, MemoryChannel, Publisher};
    use crate::domain::{AccountNumber, OperationContext, RecordStatus, TransactionEvent};
    use crate::error::AppError;
    use crate::handlers::{
        AuditDispatch, SubmitTransactionCommand, TransactionSubmitter, TransferCommand,
        TransferError, TransferExecutor,
    };
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Fixture {
        balances: MemoryBalanceStore,
        audit: MemoryAuditStore,
        channel: Arc<MemoryChannel>,
        executor: TransferExecutor,
        submitter: TransactionSubmitter,
    }

    fn fixture() -> Fixture {
        let balances = MemoryBalanceStore::new();
        let audit = MemoryAuditStore::new();
        let channel = Arc::new(MemoryChannel::new());
        let publisher = Publisher::new(channel.clone());
        let executor = TransferExecutor::new(
            Arc::new(balances.clone()),
            Arc::new(audit.clone()),
            publisher.clone(),
        );
        let submitter = TransactionSubmitter::new(Arc::new(balances.clone()), publisher);
        Fixture {
            balances,
            audit,
            channel,
            executor,
            submitter,
        }
    }

    fn n(s: &str) -> AccountNumber {
        AccountNumber::new(s).unwrap()
    }

    // =========================================================================
    // Transfer executor
    // =========================================================================

    #[tokio::test]
    async fn test_transfer_moves_funds_and_queues_audit() {
        let f = fixture();
        f.balances.seed_account("A-100", "USD", dec!(150)).unwrap();
        f.balances.seed_account("B-200", "USD", dec!(10)).unwrap();

        let receipt = f
            .executor
            .execute(TransferCommand::new("A-100", "B-200", dec!(50), "USD"))
            .await
            .unwrap();

        assert_eq!(receipt.status, "success");
        assert_eq!(receipt.source_balance, dec!(100));
        assert_eq!(receipt.destination_balance, dec!(60));
        assert_eq!(receipt.audit, AuditDispatch::Queued);

        let delivery = f.channel.receive().await.unwrap();
        let event = TransactionEvent::decode(&delivery.payload, delivery.message_id).unwrap();
        assert_eq!(event.event_id(), receipt.transfer_id);
    }

    #[tokio::test]
    async fn test_insufficient_funds_changes_nothing() {
        let f = fixture();
        f.balances.seed_account("A-100", "USD", dec!(150)).unwrap();
        f.balances.seed_account("B-200", "USD", dec!(0)).unwrap();

        let err = f
            .executor
            .execute(TransferCommand::new("A-100", "B-200", dec!(200), "USD"))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::InsufficientFunds { .. }));
        assert_eq!(f.balances.balance_of(&n("A-100")).await, Some(dec!(150)));
        assert_eq!(f.balances.balance_of(&n("B-200")).await, Some(dec!(0)));
        assert!(f.audit.is_empty());
        assert_eq!(f.channel.ready_count(), 0);
    }

    #[tokio::test]
    async fn test_self_transfer_rejected() {
        let f = fixture();
        f.balances.seed_account("A-100", "USD", dec!(150)).unwrap();

        let err = f
            .executor
            .execute(TransferCommand::new("A-100", "A-100", dec!(1), "USD"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SameAccount));
    }

    #[tokio::test]
    async fn test_invalid_amount_and_unknown_account() {
        let f = fixture();
        f.balances.seed_account("A-100", "USD", dec!(150)).unwrap();

        let err = f
            .executor
            .execute(TransferCommand::new("A-100", "B-200", dec!(-5), "USD"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidAmount(_)));

        let err = f
            .executor
            .execute(TransferCommand::new("A-100", "B-200", dec!(5), "USD"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::AccountNotFound(_)));
        assert_eq!(f.balances.balance_of(&n("A-100")).await, Some(dec!(150)));
    }

    #[tokio::test]
    async fn test_transient_store_failure_is_retry_later() {
        let f = fixture();
        f.balances.seed_account("A-100", "USD", dec!(150)).unwrap();
        f.balances.seed_account("B-200", "USD", dec!(0)).unwrap();
        f.balances.fail_next_begins(1);

        let err = f
            .executor
            .execute(TransferCommand::new("A-100", "B-200", dec!(5), "USD"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_channel_outage_falls_back_to_direct_append() {
        let f = fixture();
        f.balances.seed_account("A-100", "USD", dec!(150)).unwrap();
        f.balances.seed_account("B-200", "USD", dec!(0)).unwrap();
        f.channel.fail_next_publishes(1);

        let receipt = f
            .executor
            .execute(TransferCommand::new("A-100", "B-200", dec!(20), "USD"))
            .await
            .unwrap();

        assert_eq!(receipt.audit, AuditDispatch::Recorded);
        let record = f
            .audit
            .find_by_event_id(receipt.transfer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, RecordStatus::Completed);
        assert!(f.balances.is_audited(receipt.transfer_id));
    }

    #[tokio::test]
    async fn test_commit_is_never_reported_as_failure() {
        let f = fixture();
        f.balances.seed_account("A-100", "USD", dec!(150)).unwrap();
        f.balances.seed_account("B-200", "USD", dec!(0)).unwrap();
        f.channel.fail_next_publishes(1);
        f.audit.fail_next(1);

        let receipt = f
            .executor
            .execute(TransferCommand::new("A-100", "B-200", dec!(20), "USD"))
            .await
            .unwrap();

        assert_eq!(receipt.audit, AuditDispatch::PendingReconciliation);
        assert_eq!(f.balances.balance_of(&n("A-100")).await, Some(dec!(130)));
        assert!(!f.balances.is_audited(receipt.transfer_id));
    }

    #[tokio::test]
    async fn test_execute_as_requires_ownership() {
        let f = fixture();
        let source = f.balances.seed_account("A-100", "USD", dec!(150)).unwrap();
        f.balances.seed_account("B-200", "USD", dec!(0)).unwrap();

        let stranger = OperationContext::new().with_request_user(Uuid::new_v4());
        let err = f
            .executor
            .execute_as(TransferCommand::new("A-100", "B-200", dec!(1), "USD"), &stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Forbidden(_)));

        let owner = OperationContext::new().with_request_user(source.owner_id);
        assert!(f
            .executor
            .execute_as(TransferCommand::new("A-100", "B-200", dec!(1), "USD"), &owner)
            .await
            .is_ok());
    }

    // =========================================================================
    // Transaction submitter
    // =========================================================================

    #[tokio::test]
    async fn test_submit_publishes_without_applying() {
        let f = fixture();
        let account = f.balances.seed_account("A-100", "USD", dec!(50)).unwrap();
        let context = OperationContext::new().with_request_user(account.owner_id);

        let receipt = f
            .submitter
            .submit(
                SubmitTransactionCommand::new("deposit", "A-100", dec!(100), "USD"),
                &context,
            )
            .await
            .unwrap();

        assert_eq!(receipt.status, "accepted");
        assert_eq!(f.channel.ready_count(), 1);
        assert_eq!(f.balances.balance_of(&n("A-100")).await, Some(dec!(50)));
    }

    #[tokio::test]
    async fn test_submit_rejects_transfer_type_and_bad_currency() {
        let f = fixture();
        let account = f.balances.seed_account("A-100", "USD", dec!(50)).unwrap();
        let context = OperationContext::new().with_request_user(account.owner_id);

        let err = f
            .submitter
            .submit(
                SubmitTransactionCommand::new("transfer", "A-100", dec!(1), "USD"),
                &context,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));

        let err = f
            .submitter
            .submit(
                SubmitTransactionCommand::new("withdrawal", "A-100", dec!(1), "EUR"),
                &context,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(f.channel.ready_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_channel_outage_is_unavailable() {
        let f = fixture();
        let account = f.balances.seed_account("A-100", "USD", dec!(50)).unwrap();
        let context = OperationContext::new().with_request_user(account.owner_id);
        f.channel.fail_next_publishes(1);

        let err = f
            .submitter
            .submit(
                SubmitTransactionCommand::new("withdrawal", "A-100", dec!(10), "USD"),
                &context,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_submit_for_foreign_account_is_forbidden() {
        let f = fixture();
        f.balances.seed_account("A-100", "USD", dec!(50)).unwrap();
        let context = OperationContext::new().with_request_user(Uuid::new_v4());

        let err = f
            .submitter
            .submit(
                SubmitTransactionCommand::new("deposit", "A-100", dec!(10), "USD"),
                &context,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
