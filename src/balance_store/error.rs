//! Balance Store Errors

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{AccountNumber, Currency};

/// Errors raised by the balance store and the mutation routine
#[derive(Debug, thiserror::Error)]
pub enum BalanceStoreError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountNumber),

    #[error("Insufficient funds in {account}: required {required}, available {available}")]
    InsufficientFunds {
        account: AccountNumber,
        required: Decimal,
        available: Decimal,
    },

    /// No conversion is performed between currencies
    #[error("Currency mismatch on {account}: account holds {account_currency}, event is in {event_currency}")]
    CurrencyMismatch {
        account: AccountNumber,
        account_currency: Currency,
        event_currency: Currency,
    },

    #[error("Account already exists: {0}")]
    DuplicateAccount(AccountNumber),

    #[error("Balance overflow on {0}")]
    Overflow(AccountNumber),

    /// A delta was applied to an account the unit never locked
    #[error("Account {0} is not locked in this unit")]
    NotLocked(AccountNumber),

    /// Event id recorded twice; the other writer won
    #[error("Event already processed: {0}")]
    DuplicateEvent(Uuid),

    #[error("Timed out waiting for row lock on {0}")]
    LockTimeout(AccountNumber),

    #[error("Balance store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid account row: {0}")]
    InvalidRow(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BalanceStoreError {
    /// Business-rule failures: retrying cannot change the outcome
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            Self::AccountNotFound(_)
                | Self::InsufficientFunds { .. }
                | Self::CurrencyMismatch { .. }
                | Self::DuplicateAccount(_)
                | Self::Overflow(_)
        ) || matches!(self, Self::Database(e) if is_data_violation(e))
    }

    /// Infrastructure failures that are expected to clear on retry
    pub fn is_transient(&self) -> bool {
        match self {
            Self::LockTimeout(_) | Self::Unavailable(_) | Self::DuplicateEvent(_) => true,
            Self::Database(e) => is_transient_sqlx(e),
            _ => false,
        }
    }
}

/// Pool exhaustion, dropped connections, lock/statement timeouts,
/// deadlocks and serialization failures
pub(crate) fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("55P03") | Some("40P01") | Some("40001") | Some("57014")
        ),
        _ => false,
    }
}

/// Numeric out of range or a CHECK constraint: the row cannot hold the
/// requested value no matter how often it is retried
pub(crate) fn is_data_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("22003") | Some("23514"))
        }
        _ => false,
    }
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(s: &str) -> AccountNumber {
        AccountNumber::new(s).unwrap()
    }

    #[test]
    fn test_business_errors_are_not_transient() {
        let err = BalanceStoreError::InsufficientFunds {
            account: number("1"),
            required: Decimal::new(200, 0),
            available: Decimal::new(150, 0),
        };
        assert!(err.is_business());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("150"));

        assert!(BalanceStoreError::AccountNotFound(number("2")).is_business());
    }

    #[test]
    fn test_lock_timeout_is_transient() {
        let err = BalanceStoreError::LockTimeout(number("1"));
        assert!(err.is_transient());
        assert!(!err.is_business());
    }

    #[test]
    fn test_invalid_row_is_neither_business_nor_transient() {
        let err = BalanceStoreError::InvalidRow("unknown account type".into());
        assert!(!err.is_business());
        assert!(!err.is_transient());
        assert!(BalanceStoreError::Overflow(number("1")).is_business());
    }

    #[test]
    fn test_pool_errors_are_transient() {
        assert!(BalanceStoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!BalanceStoreError::Database(sqlx::Error::RowNotFound).is_transient());
    }
}
