//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

/// Validation and business-rule errors.
///
/// Every entry point (HTTP request, channel payload, executor command) runs
/// the same checks and reports failures through this type. None of these
/// are worth retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid amount (zero, negative, too precise, or exceeds limit)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unsupported currency: {0:?}")]
    InvalidCurrency(String),

    #[error("Invalid account number: {0}")]
    InvalidAccountNumber(String),

    #[error("Invalid account type: {0:?}")]
    InvalidAccountType(String),

    #[error("Unknown transaction type: {0:?}")]
    UnknownTransactionType(String),

    /// A field required for this transaction type is absent
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A field not allowed for this transaction type is present
    #[error("Field not allowed for this transaction type: {0}")]
    UnexpectedField(&'static str),

    /// Transfer to same account
    #[error("Cannot transfer to the same account")]
    SameAccountTransfer,

    /// Principal does not own the account it tried to use
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl DomainError {
    /// Check if this is a client error (user's fault)
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Forbidden(_))
    }

    /// Check if the error is about the shape of the input rather than a rule
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_)
                | Self::InvalidCurrency(_)
                | Self::InvalidAccountNumber(_)
                | Self::InvalidAccountType(_)
                | Self::UnknownTransactionType(_)
                | Self::MissingField(_)
                | Self::UnexpectedField(_)
        )
    }
}
