//! Account model
//!
//! Accounts live in the balance store. The account number is the
//! externally addressable key and the row-lock ordering key.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Currency, DomainError};

/// Longest account number accepted (IBAN length)
const MAX_ACCOUNT_NUMBER_LEN: usize = 34;

/// Digits in a generated account number
const GENERATED_ACCOUNT_NUMBER_LEN: usize = 12;

/// Externally addressable account number.
///
/// Ordering is plain lexicographic ordering of the string; the balance
/// store relies on it to acquire row locks deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountNumber(String);

impl AccountNumber {
    pub fn new(value: &str) -> Result<Self, DomainError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(DomainError::InvalidAccountNumber(
                "account number is empty".to_string(),
            ));
        }
        if value.len() > MAX_ACCOUNT_NUMBER_LEN {
            return Err(DomainError::InvalidAccountNumber(format!(
                "account number longer than {MAX_ACCOUNT_NUMBER_LEN} characters"
            )));
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(DomainError::InvalidAccountNumber(format!(
                "account number {value:?} contains invalid characters"
            )));
        }
        Ok(Self(value.to_string()))
    }

    /// Random numeric account number for accounts opened without one
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let digits: String = (0..GENERATED_ACCOUNT_NUMBER_LEN)
            .map(|i| {
                // No leading zero
                let low = if i == 0 { 1 } else { 0 };
                char::from(b'0' + rng.gen_range(low..10u8))
            })
            .collect();
        Self(digits)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountNumber::new(s)
    }
}

impl TryFrom<String> for AccountNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccountNumber::new(&value)
    }
}

impl From<AccountNumber> for String {
    fn from(number: AccountNumber) -> Self {
        number.0
    }
}

/// Account type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Savings,
    Checking,
    Business,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Savings => "savings",
            AccountType::Checking => "checking",
            AccountType::Business => "business",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "savings" => Ok(AccountType::Savings),
            "checking" => Ok(AccountType::Checking),
            "business" => Ok(AccountType::Business),
            other => Err(DomainError::InvalidAccountType(other.to_string())),
        }
    }
}

/// Account row as held by the balance store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub account_number: AccountNumber,
    pub account_type: AccountType,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub balance: Decimal,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// A freshly opened account with zero balance
    pub fn open(
        owner_id: Uuid,
        account_number: AccountNumber,
        account_type: AccountType,
        currency: Currency,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            account_number,
            account_type,
            balance: Decimal::ZERO,
            currency,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, principal: Uuid) -> bool {
        self.owner_id == principal
    }
}

/// Request to open an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub owner_id: Uuid,
    /// Assigned by the store when absent
    pub account_number: Option<AccountNumber>,
    pub account_type: AccountType,
    pub currency: Currency,
}
