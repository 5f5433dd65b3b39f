//! Domain module
//!
//! Core domain types and validation rules shared by every entry point.

pub mod account;
pub mod amount;
pub mod context;
pub mod currency;
pub mod error;
pub mod events;
pub mod record;

pub use account::{Account, AccountNumber, AccountType, NewAccount};
pub use amount::{Amount, AmountError, Balance};
pub use context::OperationContext;
pub use currency::{Currency, SUPPORTED_CURRENCIES};
pub use error::DomainError;
pub use events::{DecodeError, TransactionEvent, TransactionKind, WireEvent};
pub use record::{LedgerRecord, RecordStatus};
