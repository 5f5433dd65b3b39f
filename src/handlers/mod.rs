//! Command Handlers module
//!
//! Entry points that turn validated commands into ledger effects: the
//! synchronous transfer executor and the asynchronous transaction
//! submitter.

mod commands;
mod submit_handler;
mod transfer_handler;

#[cfg(test)]
mod tests;

pub use commands::*;
pub use submit_handler::TransactionSubmitter;
pub use transfer_handler::{TransferError, TransferExecutor};
