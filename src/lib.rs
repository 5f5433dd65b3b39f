//! banking_ledger Library
//!
//! Ledger consistency engine: a row-locking balance store, an append-only
//! audit store and a durable event channel, tied together by the
//! synchronous transfer executor and the asynchronous ledger worker.

pub mod api;
pub mod audit_store;
pub mod balance_store;
pub mod bootstrap;
pub mod channel;
pub mod domain;
pub mod handlers;
pub mod jobs;
pub mod worker;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use domain::{Amount, AmountError, Balance, DomainError, OperationContext};
pub use domain::{LedgerRecord, TransactionEvent, TransactionKind};
pub use error::{AppError, AppResult};
