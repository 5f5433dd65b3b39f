//! Common test utilities
//!
//! In-memory wiring of the three stores, the worker and the HTTP router.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use banking_ledger::api::{build_router, AppState};
use banking_ledger::audit_store::{AuditRetryPolicy, MemoryAuditStore};
use banking_ledger::balance_store::MemoryBalanceStore;
use banking_ledger::channel::{EventChannel, MemoryChannel, Publisher};
use banking_ledger::domain::{Account, AccountNumber};
use banking_ledger::handlers::TransferExecutor;
use banking_ledger::worker::{LedgerWorker, WorkerConfig};
use rust_decimal::Decimal;
use serde_json::Value;

/// Millisecond timings so retry paths do not slow the suite down
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        audit_retry: AuditRetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
            attempt_timeout: Duration::from_millis(50),
        },
        requeue_delay: Duration::from_millis(1),
        max_deliveries: 3,
    }
}

pub struct Harness {
    pub balances: MemoryBalanceStore,
    pub audit: MemoryAuditStore,
    pub channel: Arc<MemoryChannel>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            balances: MemoryBalanceStore::new(),
            audit: MemoryAuditStore::new(),
            channel: Arc::new(MemoryChannel::new()),
        }
    }

    pub fn seed(&self, number: &str, currency: &str, balance: Decimal) -> Account {
        self.balances
            .seed_account(number, currency, balance)
            .expect("valid seed account")
    }

    pub async fn balance(&self, number: &str) -> Decimal {
        self.balances
            .balance_of(&AccountNumber::new(number).unwrap())
            .await
            .expect("account exists")
    }

    pub fn worker(&self) -> LedgerWorker {
        self.worker_with(fast_worker_config())
    }

    pub fn worker_with(&self, config: WorkerConfig) -> LedgerWorker {
        LedgerWorker::new(
            self.channel.clone(),
            Arc::new(self.balances.clone()),
            Arc::new(self.audit.clone()),
            config,
        )
    }

    pub fn executor(&self) -> TransferExecutor {
        TransferExecutor::new(
            Arc::new(self.balances.clone()),
            Arc::new(self.audit.clone()),
            Publisher::new(self.channel.clone()),
        )
    }

    pub fn router(&self) -> axum::Router {
        build_router(AppState::new(
            Arc::new(self.balances.clone()),
            Arc::new(self.audit.clone()),
            self.channel.clone(),
        ))
    }

    /// Publish a raw JSON payload as a producer outside this crate would
    pub async fn publish_json(&self, payload: Value) -> uuid::Uuid {
        self.channel
            .publish(serde_json::to_vec(&payload).unwrap())
            .await
            .expect("publish")
    }

    pub async fn publish_raw(&self, payload: &[u8]) -> uuid::Uuid {
        self.channel.publish(payload.to_vec()).await.expect("publish")
    }
}
