//! Transaction events
//!
//! The unit flowing through the event channel. On the wire an event is one
//! flat JSON object; in memory it is a tagged variant whose required fields
//! are enforced when it is decoded.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{AccountNumber, Amount, Currency, DomainError};

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Transfer => "transfer",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "transfer" => Ok(TransactionKind::Transfer),
            other => Err(DomainError::UnknownTransactionType(other.to_string())),
        }
    }
}

/// Wire shape of a transaction event.
///
/// Every field is optional here so that a structurally valid JSON object
/// always decodes; business validation happens in
/// `TryFrom<WireEvent> for TransactionEvent`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,

    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    #[serde(
        default,
        with = "rust_decimal::serde::arbitrary_precision_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount: Option<Decimal>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_account: Option<String>,
}

/// A validated transaction intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub enum TransactionEvent {
    Deposit {
        event_id: Uuid,
        account_number: AccountNumber,
        amount: Amount,
        currency: Currency,
    },
    Withdrawal {
        event_id: Uuid,
        account_number: AccountNumber,
        amount: Amount,
        currency: Currency,
    },
    Transfer {
        event_id: Uuid,
        source_account: AccountNumber,
        destination_account: AccountNumber,
        amount: Amount,
        currency: Currency,
    },
}

impl TransactionEvent {
    /// Build a deposit from raw inputs, applying the same validation as the worker
    pub fn deposit(
        event_id: Uuid,
        account_number: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<Self, DomainError> {
        Ok(TransactionEvent::Deposit {
            event_id,
            account_number: AccountNumber::new(account_number)?,
            amount: validated_amount(amount)?,
            currency: Currency::new(currency)?,
        })
    }

    /// Build a withdrawal from raw inputs
    pub fn withdrawal(
        event_id: Uuid,
        account_number: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<Self, DomainError> {
        Ok(TransactionEvent::Withdrawal {
            event_id,
            account_number: AccountNumber::new(account_number)?,
            amount: validated_amount(amount)?,
            currency: Currency::new(currency)?,
        })
    }

    /// Build a transfer from raw inputs. Source and destination must differ.
    pub fn transfer(
        event_id: Uuid,
        source_account: &str,
        destination_account: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<Self, DomainError> {
        let source_account = AccountNumber::new(source_account)?;
        let destination_account = AccountNumber::new(destination_account)?;
        if source_account == destination_account {
            return Err(DomainError::SameAccountTransfer);
        }
        Ok(TransactionEvent::Transfer {
            event_id,
            source_account,
            destination_account,
            amount: validated_amount(amount)?,
            currency: Currency::new(currency)?,
        })
    }

    pub fn event_id(&self) -> Uuid {
        match self {
            TransactionEvent::Deposit { event_id, .. }
            | TransactionEvent::Withdrawal { event_id, .. }
            | TransactionEvent::Transfer { event_id, .. } => *event_id,
        }
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            TransactionEvent::Deposit { .. } => TransactionKind::Deposit,
            TransactionEvent::Withdrawal { .. } => TransactionKind::Withdrawal,
            TransactionEvent::Transfer { .. } => TransactionKind::Transfer,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            TransactionEvent::Deposit { amount, .. }
            | TransactionEvent::Withdrawal { amount, .. }
            | TransactionEvent::Transfer { amount, .. } => *amount,
        }
    }

    pub fn currency(&self) -> &Currency {
        match self {
            TransactionEvent::Deposit { currency, .. }
            | TransactionEvent::Withdrawal { currency, .. }
            | TransactionEvent::Transfer { currency, .. } => currency,
        }
    }

    /// Every account this event touches
    pub fn accounts(&self) -> Vec<&AccountNumber> {
        match self {
            TransactionEvent::Deposit { account_number, .. }
            | TransactionEvent::Withdrawal { account_number, .. } => vec![account_number],
            TransactionEvent::Transfer {
                source_account,
                destination_account,
                ..
            } => vec![source_account, destination_account],
        }
    }

    /// Decode and validate a channel payload.
    ///
    /// `fallback_id` is used as the event id when the producer did not set one.
    pub fn decode(payload: &[u8], fallback_id: Uuid) -> Result<Self, DecodeError> {
        let mut wire: WireEvent =
            serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        wire.event_id.get_or_insert(fallback_id);
        TransactionEvent::try_from(wire).map_err(DecodeError::Invalid)
    }
}

fn validated_amount(amount: Decimal) -> Result<Amount, DomainError> {
    Amount::new(amount).map_err(|e| DomainError::InvalidAmount(e.to_string()))
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, DomainError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or(DomainError::MissingField(field))
}

fn forbidden(value: &Option<String>, field: &'static str) -> Result<(), DomainError> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Err(DomainError::UnexpectedField(field)),
        _ => Ok(()),
    }
}

impl TryFrom<WireEvent> for TransactionEvent {
    type Error = DomainError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let event_id = wire.event_id.ok_or(DomainError::MissingField("event_id"))?;
        let kind: TransactionKind = required(&wire.kind, "type")?.parse()?;
        let amount = wire.amount.ok_or(DomainError::MissingField("amount"))?;
        let currency = required(&wire.currency, "currency")?;

        match kind {
            TransactionKind::Deposit | TransactionKind::Withdrawal => {
                forbidden(&wire.source_account, "source_account")?;
                forbidden(&wire.destination_account, "destination_account")?;
                let account_number = required(&wire.account_number, "account_number")?;
                if kind == TransactionKind::Deposit {
                    TransactionEvent::deposit(event_id, account_number, amount, currency)
                } else {
                    TransactionEvent::withdrawal(event_id, account_number, amount, currency)
                }
            }
            TransactionKind::Transfer => {
                forbidden(&wire.account_number, "account_number")?;
                let source = required(&wire.source_account, "source_account")?;
                let destination = required(&wire.destination_account, "destination_account")?;
                TransactionEvent::transfer(event_id, source, destination, amount, currency)
            }
        }
    }
}

impl From<TransactionEvent> for WireEvent {
    fn from(event: TransactionEvent) -> Self {
        let mut wire = WireEvent {
            event_id: Some(event.event_id()),
            kind: Some(event.kind().as_str().to_string()),
            amount: Some(event.amount().value()),
            currency: Some(event.currency().to_string()),
            ..WireEvent::default()
        };
        match event {
            TransactionEvent::Deposit { account_number, .. }
            | TransactionEvent::Withdrawal { account_number, .. } => {
                wire.account_number = Some(account_number.into());
            }
            TransactionEvent::Transfer {
                source_account,
                destination_account,
                ..
            } => {
                wire.source_account = Some(source_account.into());
                wire.destination_account = Some(destination_account.into());
            }
        }
        wire
    }
}

/// Why a channel payload could not become a `TransactionEvent`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// Not a JSON object of the expected shape
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Well-formed but fails business validation
    #[error("Invalid event: {0}")]
    Invalid(DomainError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn test_decode_valid_deposit() {
        let payload = br#"{"type":"deposit","account_number":"12345","amount":100.00,"currency":"USD"}"#;
        let event = TransactionEvent::decode(payload, id()).unwrap();
        assert_eq!(event.kind(), TransactionKind::Deposit);
        assert_eq!(event.amount().value(), Decimal::new(100, 0));
        assert_eq!(event.accounts().len(), 1);
    }

    #[test]
    fn test_decode_uses_payload_event_id_over_fallback() {
        let event_id = id();
        let payload = format!(
            r#"{{"event_id":"{event_id}","type":"withdrawal","account_number":"67890","amount":200,"currency":"EUR"}}"#
        );
        let event = TransactionEvent::decode(payload.as_bytes(), id()).unwrap();
        assert_eq!(event.event_id(), event_id);
    }

    #[test]
    fn test_decode_falls_back_to_message_id() {
        let fallback = id();
        let payload = br#"{"type":"deposit","account_number":"1","amount":1,"currency":"USD"}"#;
        let event = TransactionEvent::decode(payload, fallback).unwrap();
        assert_eq!(event.event_id(), fallback);
    }

    #[test]
    fn test_decode_malformed() {
        let result = TransactionEvent::decode(b"not json", id());
        assert!(matches!(result, Err(DecodeError::Malformed(_))));

        let result = TransactionEvent::decode(br#"{"type":"deposit","amount":"lots"}"#, id());
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_deposit_missing_account_number() {
        let payload = br#"{"type":"deposit","amount":50,"currency":"USD"}"#;
        let result = TransactionEvent::decode(payload, id());
        assert_eq!(
            result,
            Err(DecodeError::Invalid(DomainError::MissingField("account_number")))
        );
    }

    #[test]
    fn test_withdrawal_negative_amount() {
        let payload = br#"{"type":"withdrawal","account_number":"67890","amount":-50,"currency":"USD"}"#;
        let result = TransactionEvent::decode(payload, id());
        assert!(matches!(
            result,
            Err(DecodeError::Invalid(DomainError::InvalidAmount(_)))
        ));
    }

    #[test]
    fn test_valid_transfer() {
        let payload = br#"{"type":"transfer","source_account":"12345","destination_account":"67890","amount":300,"currency":"GBP"}"#;
        let event = TransactionEvent::decode(payload, id()).unwrap();
        assert_eq!(event.kind(), TransactionKind::Transfer);
        assert_eq!(event.accounts().len(), 2);
    }

    #[test]
    fn test_transfer_same_account() {
        let payload = br#"{"type":"transfer","source_account":"11111","destination_account":"11111","amount":100,"currency":"USD"}"#;
        let result = TransactionEvent::decode(payload, id());
        assert_eq!(result, Err(DecodeError::Invalid(DomainError::SameAccountTransfer)));
    }

    #[test]
    fn test_transfer_with_account_number_rejected() {
        let payload = br#"{"type":"transfer","account_number":"1","source_account":"2","destination_account":"3","amount":1,"currency":"USD"}"#;
        let result = TransactionEvent::decode(payload, id());
        assert_eq!(
            result,
            Err(DecodeError::Invalid(DomainError::UnexpectedField("account_number")))
        );
    }

    #[test]
    fn test_unknown_type() {
        let payload = br#"{"type":"exchange","account_number":"12345","amount":50,"currency":"USD"}"#;
        let result = TransactionEvent::decode(payload, id());
        assert!(matches!(
            result,
            Err(DecodeError::Invalid(DomainError::UnknownTransactionType(_)))
        ));
    }

    #[test]
    fn test_invalid_currency() {
        let payload = br#"{"type":"deposit","account_number":"1","amount":5,"currency":"usd"}"#;
        let result = TransactionEvent::decode(payload, id());
        assert!(matches!(
            result,
            Err(DecodeError::Invalid(DomainError::InvalidCurrency(_)))
        ));
    }

    #[test]
    fn test_wire_encoding_is_flat_and_numeric() {
        let event = TransactionEvent::deposit(id(), "12345", Decimal::new(2550, 2), "USD").unwrap();
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "deposit");
        assert_eq!(json["account_number"], "12345");
        assert!(json["amount"].is_number());
        assert!(json.get("source_account").is_none());

        let bytes = serde_json::to_vec(&event).unwrap();
        let decoded = TransactionEvent::decode(&bytes, id()).unwrap();
        assert_eq!(decoded, event);
    }
}
