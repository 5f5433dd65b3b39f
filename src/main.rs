//! banking_ledger - Ledger HTTP API
//!
//! Serves account, transfer and transaction endpoints and runs the
//! maintenance jobs. Deposits and withdrawals are applied by the separate
//! `ledger_worker` binary.

use std::net::SocketAddr;

use banking_ledger::api::{build_router, AppState};
use banking_ledger::bootstrap::{self, shutdown_signal};
use banking_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use banking_ledger::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    bootstrap::init_tracing(config.log_format);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting banking_ledger server");

    let (pools, stores) = bootstrap::connect(&config).await?;

    let scheduler = JobScheduler::with_config(
        stores.channel.clone(),
        stores.balances.clone(),
        stores.audit.clone(),
        JobSchedulerConfig {
            lease_reclaim_interval: config.lease_reclaim_interval,
            ..JobSchedulerConfig::default()
        },
    )
    .start();

    let app = build_router(AppState::new(stores.balances, stores.audit, stores.channel));

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    scheduler.abort();
    pools.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}
