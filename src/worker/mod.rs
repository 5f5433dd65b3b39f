//! Ledger Worker
//!
//! Consumes transaction events from the event channel and drives each one
//! through `Received -> Validating -> Applying -> Auditing -> Acked`:
//!
//! - a payload that does not decode or validate is rejected, never retried;
//! - a business-rule failure while applying is rejected (a Failed record is
//!   appended on a best-effort basis);
//! - any other failure while applying requeues the event, until a
//!   non-transient failure reaches the delivery limit and the event is
//!   rejected;
//! - the audit append is retried with fixed backoff; when the bound is
//!   exhausted the balance change stands, the event is acked and the gap is
//!   logged for reconciliation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::audit_store::{append_with_retry, AuditRetryPolicy, AuditStore};
use crate::balance_store::{apply_mutation, BalanceMutation, BalanceStore, MutationOutcome};
use crate::channel::{ChannelError, Delivery, EventChannel};
use crate::domain::{LedgerRecord, TransactionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub audit_retry: AuditRetryPolicy,
    /// How long a requeued event stays invisible
    pub requeue_delay: Duration,
    /// Deliveries allowed before a non-transient store failure is rejected
    pub max_deliveries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            audit_retry: AuditRetryPolicy::default(),
            requeue_delay: Duration::from_secs(1),
            max_deliveries: 5,
        }
    }
}

/// Processing stage of one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Received,
    Validating,
    Applying,
    Auditing,
    RetryingAudit,
    Acked,
    Rejected,
    Requeued,
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Received => "received",
            WorkerState::Validating => "validating",
            WorkerState::Applying => "applying",
            WorkerState::Auditing => "auditing",
            WorkerState::RetryingAudit => "retrying_audit",
            WorkerState::Acked => "acked",
            WorkerState::Rejected => "rejected",
            WorkerState::Requeued => "requeued",
            WorkerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What happened to a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Applied (or already applied) and audited
    Acked { event_id: Uuid, audit_attempts: u32 },
    /// Dead-lettered; will not be redelivered
    Rejected { reason: String },
    /// Returned to the channel for another attempt
    Requeued { reason: String },
    /// Applied but the audit append was exhausted; acked anyway
    AuditFailed { event_id: Uuid, attempts: u32 },
}

impl Disposition {
    pub fn state(&self) -> WorkerState {
        match self {
            Disposition::Acked { .. } => WorkerState::Acked,
            Disposition::Rejected { .. } => WorkerState::Rejected,
            Disposition::Requeued { .. } => WorkerState::Requeued,
            Disposition::AuditFailed { .. } => WorkerState::Failed,
        }
    }
}

/// Counts of dispositions over a worker run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub acked: u64,
    pub rejected: u64,
    pub requeued: u64,
    pub audit_failed: u64,
}

impl WorkerStats {
    fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Acked { .. } => self.acked += 1,
            Disposition::Rejected { .. } => self.rejected += 1,
            Disposition::Requeued { .. } => self.requeued += 1,
            Disposition::AuditFailed { .. } => self.audit_failed += 1,
        }
    }
}

pub struct LedgerWorker {
    channel: Arc<dyn EventChannel>,
    balances: Arc<dyn BalanceStore>,
    audit: Arc<dyn AuditStore>,
    config: WorkerConfig,
}

impl LedgerWorker {
    pub fn new(
        channel: Arc<dyn EventChannel>,
        balances: Arc<dyn BalanceStore>,
        audit: Arc<dyn AuditStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            channel,
            balances,
            audit,
            config,
        }
    }

    /// Consume until shutdown is signalled or the channel closes.
    ///
    /// Shutdown only interrupts the wait for the next message; an event
    /// already received is carried through to ack, requeue or reject.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerStats {
        let mut stats = WorkerStats::default();
        tracing::info!("Ledger worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delivery = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.channel.receive() => match received {
                    Ok(delivery) => delivery,
                    Err(ChannelError::Closed) => {
                        tracing::info!("Event channel closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Receive failed");
                        tokio::time::sleep(self.config.requeue_delay).await;
                        continue;
                    }
                },
            };

            let disposition = self.handle(delivery).await;
            stats.record(&disposition);
        }

        tracing::info!(
            acked = stats.acked,
            rejected = stats.rejected,
            requeued = stats.requeued,
            audit_failed = stats.audit_failed,
            "Ledger worker stopped"
        );
        stats
    }

    /// Process one delivery and settle it with the channel
    pub async fn handle(&self, delivery: Delivery) -> Disposition {
        let disposition = self.process(&delivery).await;

        let settled = match &disposition {
            Disposition::Acked { .. } | Disposition::AuditFailed { .. } => {
                self.channel.ack(&delivery).await
            }
            Disposition::Rejected { reason } => self.channel.reject(&delivery, reason).await,
            Disposition::Requeued { .. } => {
                self.channel
                    .requeue(&delivery, self.config.requeue_delay)
                    .await
            }
        };

        // An unsettled delivery is redelivered once its lease expires; the
        // processed-events check makes that harmless.
        if let Err(e) = settled {
            tracing::warn!(
                message_id = %delivery.message_id,
                state = %disposition.state(),
                error = %e,
                "Could not settle delivery"
            );
        }

        disposition
    }

    async fn process(&self, delivery: &Delivery) -> Disposition {
        tracing::debug!(
            message_id = %delivery.message_id,
            delivery_count = delivery.delivery_count,
            state = %WorkerState::Received,
        );

        tracing::debug!(message_id = %delivery.message_id, state = %WorkerState::Validating);
        let event = match TransactionEvent::decode(&delivery.payload, delivery.message_id) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    message_id = %delivery.message_id,
                    error = %e,
                    "Rejecting invalid event"
                );
                return Disposition::Rejected {
                    reason: e.to_string(),
                };
            }
        };
        let event_id = event.event_id();

        tracing::debug!(event_id = %event_id, state = %WorkerState::Applying);
        let mutation = BalanceMutation::from_event(&event);
        match apply_mutation(self.balances.as_ref(), &mutation).await {
            Ok(MutationOutcome::Applied(balances)) => {
                for (account, balance) in &balances {
                    tracing::debug!(event_id = %event_id, account_number = %account, balance = %balance, "Balance updated");
                }
            }
            Ok(MutationOutcome::AlreadyApplied) => {
                tracing::debug!(event_id = %event_id, "Balance change already committed, auditing only");
            }
            Err(e) if e.is_business() => {
                tracing::warn!(event_id = %event_id, error = %e, "Rejecting event");
                self.record_failure(&event, &e.to_string()).await;
                return Disposition::Rejected {
                    reason: e.to_string(),
                };
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(event_id = %event_id, error = %e, "Transient store failure, requeueing");
                return Disposition::Requeued {
                    reason: e.to_string(),
                };
            }
            Err(e) if delivery.delivery_count >= self.config.max_deliveries => {
                tracing::error!(
                    event_id = %event_id,
                    delivery_count = delivery.delivery_count,
                    error = %e,
                    "Delivery limit reached, rejecting event"
                );
                self.record_failure(&event, &e.to_string()).await;
                return Disposition::Rejected {
                    reason: e.to_string(),
                };
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event_id,
                    delivery_count = delivery.delivery_count,
                    error = %e,
                    "Unexpected store failure, requeueing"
                );
                return Disposition::Requeued {
                    reason: e.to_string(),
                };
            }
        }

        tracing::debug!(event_id = %event_id, state = %WorkerState::Auditing);
        let record = LedgerRecord::completed(&event);
        match append_with_retry(self.audit.as_ref(), &record, self.config.audit_retry).await {
            Ok((record_id, attempts)) => {
                if let Err(e) = self.balances.mark_audited(event_id).await {
                    tracing::warn!(event_id = %event_id, error = %e, "Could not mark event audited");
                }
                tracing::info!(
                    event_id = %event_id,
                    record_id = %record_id,
                    kind = %event.kind(),
                    audit_attempts = attempts,
                    "Event applied"
                );
                Disposition::Acked {
                    event_id,
                    audit_attempts: attempts,
                }
            }
            Err(exhausted) => {
                tracing::error!(
                    event_id = %event_id,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    state = %WorkerState::Failed,
                    reconciliation_required = true,
                    "Balance change committed without audit record"
                );
                Disposition::AuditFailed {
                    event_id,
                    attempts: exhausted.attempts,
                }
            }
        }
    }

    /// Best-effort Failed record for a refused event
    async fn record_failure(&self, event: &TransactionEvent, reason: &str) {
        let record = LedgerRecord::failed(event, reason);
        if let Err(e) = append_with_retry(self.audit.as_ref(), &record, self.config.audit_retry).await
        {
            tracing::warn!(
                event_id = %event.event_id(),
                error = %e,
                "Could not record failed transaction"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.audit_retry.max_attempts, 3);
        assert_eq!(config.audit_retry.backoff, Duration::from_secs(2));
        assert_eq!(config.requeue_delay, Duration::from_secs(1));
        assert_eq!(config.max_deliveries, 5);
    }

    #[test]
    fn test_disposition_states() {
        let id = Uuid::new_v4();
        assert_eq!(
            Disposition::AuditFailed { event_id: id, attempts: 3 }.state(),
            WorkerState::Failed
        );
        assert_eq!(
            Disposition::Rejected { reason: "x".into() }.state().to_string(),
            "rejected"
        );
    }
}
