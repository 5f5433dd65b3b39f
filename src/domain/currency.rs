//! Currency code
//!
//! ISO-4217 alphabetic codes accepted by the ledger.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// Currencies the ledger holds balances in.
pub const SUPPORTED_CURRENCIES: &[&str] = &["USD", "EUR", "GBP", "INR", "JPY"];

/// A validated, upper-case 3-letter currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, DomainError> {
        let well_formed = code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase());
        if !well_formed || !SUPPORTED_CURRENCIES.contains(&code) {
            return Err(DomainError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_currency() {
        let usd = Currency::new("USD").unwrap();
        assert_eq!(usd.as_str(), "USD");
    }

    #[test]
    fn test_lowercase_rejected() {
        assert!(matches!(Currency::new("usd"), Err(DomainError::InvalidCurrency(_))));
    }

    #[test]
    fn test_unknown_code_rejected() {
        assert!(Currency::new("XYZ").is_err());
        assert!(Currency::new("US").is_err());
        assert!(Currency::new("").is_err());
    }

    #[test]
    fn test_serde_validates() {
        let ok: Currency = serde_json::from_str("\"EUR\"").unwrap();
        assert_eq!(ok.to_string(), "EUR");
        assert!(serde_json::from_str::<Currency>("\"eur\"").is_err());
    }
}
