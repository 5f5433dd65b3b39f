//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance: returning abandoned channel
//! messages to the queue and surfacing committed balance changes that have
//! no audit record.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::audit_store::{AuditStore, AuditStoreError};
use crate::balance_store::{BalanceStore, BalanceStoreError};
use crate::channel::{ChannelError, EventChannel};

// =========================================================================
// Lease Reclaim Job
// =========================================================================

/// Make in-flight messages of crashed consumers visible again
pub async fn reclaim_expired_leases(channel: &dyn EventChannel) -> Result<u64, JobError> {
    let reclaimed = channel.reclaim_expired().await?;

    if reclaimed > 0 {
        tracing::warn!(reclaimed = reclaimed, "Reclaimed messages with expired leases");
    }

    Ok(reclaimed)
}

/// Reclaim expired leases every `period` until the handle is aborted.
///
/// The worker binary runs this itself so a deployment without the API
/// process still recovers messages abandoned in flight.
pub fn spawn_lease_reclaimer(
    channel: Arc<dyn EventChannel>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = reclaim_expired_leases(channel.as_ref()).await {
                tracing::error!(error = %e, "Lease reclaim failed");
            }
        }
    })
}

// =========================================================================
// Audit Reconciliation Job
// =========================================================================

/// Check processed events older than `grace` against the audit store.
///
/// Events found in the audit store are marked audited. Missing ones are
/// logged at error level for out-of-band repair; they stay unaudited so the
/// next run reports them again.
pub async fn reconcile_audit_trail(
    balances: &dyn BalanceStore,
    audit: &dyn AuditStore,
    grace: Duration,
    batch_size: i64,
) -> Result<ReconciliationReport, JobError> {
    let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
    let cutoff = Utc::now() - grace;
    let pending = balances.unaudited_events(cutoff, batch_size).await?;

    let mut report = ReconciliationReport {
        checked: pending.len() as u64,
        ..ReconciliationReport::default()
    };

    for processed in pending {
        match audit.find_by_event_id(processed.event_id).await? {
            Some(_) => {
                balances.mark_audited(processed.event_id).await?;
                report.confirmed += 1;
            }
            None => {
                tracing::error!(
                    event_id = %processed.event_id,
                    kind = %processed.kind,
                    processed_at = %processed.processed_at,
                    reconciliation_required = true,
                    "Committed balance change has no audit record"
                );
                report.missing.push(processed.event_id);
            }
        }
    }

    if report.checked > 0 {
        tracing::info!(
            checked = report.checked,
            confirmed = report.confirmed,
            missing = report.missing.len(),
            "Audit reconciliation finished"
        );
    }

    Ok(report)
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationReport {
    pub checked: u64,
    pub confirmed: u64,
    pub missing: Vec<uuid::Uuid>,
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for lease reclaim (default: 30 seconds)
    pub lease_reclaim_interval: Duration,
    /// Interval for audit reconciliation (default: 5 minutes)
    pub reconciliation_interval: Duration,
    /// Age before an unaudited event counts as a gap (default: 5 minutes)
    pub reconciliation_grace: Duration,
    pub reconciliation_batch_size: i64,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            lease_reclaim_interval: Duration::from_secs(30),
            reconciliation_interval: Duration::from_secs(300),
            reconciliation_grace: Duration::from_secs(300),
            reconciliation_batch_size: 500,
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    channel: Arc<dyn EventChannel>,
    balances: Arc<dyn BalanceStore>,
    audit: Arc<dyn AuditStore>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(
        channel: Arc<dyn EventChannel>,
        balances: Arc<dyn BalanceStore>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self::with_config(channel, balances, audit, JobSchedulerConfig::default())
    }

    pub fn with_config(
        channel: Arc<dyn EventChannel>,
        balances: Arc<dyn BalanceStore>,
        audit: Arc<dyn AuditStore>,
        config: JobSchedulerConfig,
    ) -> Self {
        Self {
            channel,
            balances,
            audit,
            config,
        }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut lease_interval = interval(self.config.lease_reclaim_interval);
        let mut reconciliation_interval = interval(self.config.reconciliation_interval);

        loop {
            tokio::select! {
                _ = lease_interval.tick() => {
                    if let Err(e) = reclaim_expired_leases(self.channel.as_ref()).await {
                        tracing::error!(error = %e, "Lease reclaim failed");
                    }
                }
                _ = reconciliation_interval.tick() => {
                    if let Err(e) = self.reconcile().await {
                        tracing::error!(error = %e, "Audit reconciliation failed");
                    }
                }
            }
        }
    }

    async fn reconcile(&self) -> Result<ReconciliationReport, JobError> {
        reconcile_audit_trail(
            self.balances.as_ref(),
            self.audit.as_ref(),
            self.config.reconciliation_grace,
            self.config.reconciliation_batch_size,
        )
        .await
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match reclaim_expired_leases(self.channel.as_ref()).await {
            Ok(count) => report.leases_reclaimed = count,
            Err(e) => report.errors.push(format!("Lease reclaim: {}", e)),
        }

        match self.reconcile().await {
            Ok(result) => report.reconciliation = result,
            Err(e) => report.errors.push(format!("Audit reconciliation: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub leases_reclaimed: u64,
    pub reconciliation: ReconciliationReport,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Balance store error: {0}")]
    BalanceStore(#[from] BalanceStoreError),

    #[error("Audit store error: {0}")]
    AuditStore(#[from] AuditStoreError),
}

// =========================================================================
// Tests
// =========================================================================
