//! Process bootstrap shared by the binaries: tracing, store wiring and
//! shutdown signals.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::audit_store::{AuditStore, PgAuditStore};
use crate::balance_store::{BalanceStore, PgBalanceStore};
use crate::channel::{EventChannel, PgChannel};
use crate::config::{Config, LogFormat};
use crate::db::Pools;

const DEFAULT_LOG_FILTER: &str = "banking_ledger=debug,tower_http=debug";

/// Initialize tracing/logging
pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// The three PostgreSQL-backed stores behind their trait seams
#[derive(Clone)]
pub struct Stores {
    pub balances: Arc<dyn BalanceStore>,
    pub audit: Arc<dyn AuditStore>,
    pub channel: Arc<dyn EventChannel>,
}

impl Stores {
    pub fn from_pools(pools: &Pools, config: &Config) -> Self {
        Self {
            balances: Arc::new(PgBalanceStore::new(
                pools.balances.clone(),
                config.lock_timeout,
                config.store_timeout,
            )),
            audit: Arc::new(PgAuditStore::new(pools.audit.clone())),
            channel: Arc::new(PgChannel::new(
                pools.queue.clone(),
                config.queue_name.clone(),
                config.queue_poll_interval,
                config.queue_lease,
            )),
        }
    }
}

/// Connect every pool and refuse to start against an unmigrated schema
pub async fn connect(config: &Config) -> anyhow::Result<(Pools, Stores)> {
    tracing::info!("Connecting to database...");
    let pools = Pools::connect(config).await?;

    if !pools.check_schema().await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }
    tracing::info!("Database connected successfully");

    let stores = Stores::from_pools(&pools, config);
    Ok((pools, stores))
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
