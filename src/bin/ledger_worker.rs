//! Ledger worker
//!
//! Consumes deposit, withdrawal and transfer events from the event channel,
//! applies them to the balance store and records them in the audit store.
//! SIGINT/SIGTERM stops the wait for the next event; an event already
//! being processed is finished first. Expired channel leases are reclaimed
//! here as well, so workers do not depend on the API process for it.

use banking_ledger::bootstrap::{self, shutdown_signal};
use banking_ledger::jobs::spawn_lease_reclaimer;
use banking_ledger::worker::LedgerWorker;
use banking_ledger::Config;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    bootstrap::init_tracing(config.log_format);

    tracing::info!(
        queue = %config.queue_name,
        audit_max_attempts = config.audit_max_attempts,
        max_deliveries = config.max_deliveries,
        "Starting ledger worker"
    );

    let (pools, stores) = bootstrap::connect(&config).await?;

    let reclaimer = spawn_lease_reclaimer(stores.channel.clone(), config.lease_reclaim_interval);

    let worker = LedgerWorker::new(
        stores.channel,
        stores.balances,
        stores.audit,
        config.worker_config(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;

    reclaimer.abort();
    pools.close().await;
    Ok(())
}
