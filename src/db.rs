//! Database module
//!
//! Connection pools and schema checks for the three stores.

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::config::Config;

/// One pool per store. They may point at the same database.
#[derive(Debug, Clone)]
pub struct Pools {
    pub balances: PgPool,
    pub audit: PgPool,
    pub queue: PgPool,
}

/// Every session gets `statement_timeout`, so no store call on the pool
/// can hang longer than `store_timeout`
async fn connect(
    url: &str,
    max_connections: u32,
    store_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(url)?
        .options([("statement_timeout", store_timeout.as_millis().to_string())]);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(store_timeout)
        .connect_with(options)
        .await
}

impl Pools {
    pub async fn connect(config: &Config) -> Result<Self, sqlx::Error> {
        let max = config.database_max_connections;
        let timeout = config.store_timeout;
        let balances = connect(&config.database_url, max, timeout).await?;
        let audit = if config.audit_database_url == config.database_url {
            balances.clone()
        } else {
            connect(&config.audit_database_url, max, timeout).await?
        };
        let queue = if config.queue_database_url == config.database_url {
            balances.clone()
        } else {
            connect(&config.queue_database_url, max, timeout).await?
        };

        Ok(Self {
            balances,
            audit,
            queue,
        })
    }

    /// Verify every store has its tables
    pub async fn check_schema(&self) -> Result<bool, sqlx::Error> {
        Ok(check_tables(&self.balances, &["accounts", "processed_events"]).await?
            && check_tables(&self.audit, &["ledger_records"]).await?
            && check_tables(&self.queue, &["channel_messages"]).await?)
    }

    /// Close every pool; shared pools close once
    pub async fn close(&self) {
        self.balances.close().await;
        self.audit.close().await;
        self.queue.close().await;
    }
}

/// Check if required tables exist
async fn check_tables(pool: &PgPool, required_tables: &[&str]) -> Result<bool, sqlx::Error> {
    for table in required_tables {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(*table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}
