//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::audit_store::AuditStore;
use crate::balance_store::BalanceStore;
use crate::channel::{EventChannel, Publisher};
use crate::handlers::{TransactionSubmitter, TransferExecutor};

pub use routes::create_router;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub balances: Arc<dyn BalanceStore>,
    pub audit: Arc<dyn AuditStore>,
    pub transfers: Arc<TransferExecutor>,
    pub submitter: Arc<TransactionSubmitter>,
}

impl AppState {
    pub fn new(
        balances: Arc<dyn BalanceStore>,
        audit: Arc<dyn AuditStore>,
        channel: Arc<dyn EventChannel>,
    ) -> Self {
        let publisher = Publisher::new(channel);
        Self {
            transfers: Arc::new(TransferExecutor::new(
                balances.clone(),
                audit.clone(),
                publisher.clone(),
            )),
            submitter: Arc::new(TransactionSubmitter::new(balances.clone(), publisher)),
            balances,
            audit,
        }
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // Layers run last-added first: logging -> request context -> handler
    let protected_routes = create_router()
        .layer(axum_middleware::from_fn(middleware::request_context_middleware))
        .layer(axum_middleware::from_fn(middleware::logging_middleware));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
