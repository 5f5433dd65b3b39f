//! Balance mutation routine
//!
//! The one place balances change. The transfer executor and the ledger
//! worker both describe their effect as a [`BalanceMutation`] and hand it to
//! [`apply_mutation`].

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{lock_order, BalanceStore, BalanceStoreError, BalanceUnit};
use crate::domain::{AccountNumber, Currency, TransactionEvent, TransactionKind};

/// One signed change to one account
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub account: AccountNumber,
    pub delta: Decimal,
}

/// The balance effect of one event
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceMutation {
    pub event_id: Uuid,
    pub kind: TransactionKind,
    pub currency: Currency,
    /// Applied in order; debits come first
    pub legs: Vec<Leg>,
}

impl BalanceMutation {
    pub fn from_event(event: &TransactionEvent) -> Self {
        let amount = event.amount();
        let legs = match event {
            TransactionEvent::Deposit { account_number, .. } => vec![Leg {
                account: account_number.clone(),
                delta: amount.as_credit(),
            }],
            TransactionEvent::Withdrawal { account_number, .. } => vec![Leg {
                account: account_number.clone(),
                delta: amount.as_debit(),
            }],
            TransactionEvent::Transfer {
                source_account,
                destination_account,
                ..
            } => vec![
                Leg {
                    account: source_account.clone(),
                    delta: amount.as_debit(),
                },
                Leg {
                    account: destination_account.clone(),
                    delta: amount.as_credit(),
                },
            ],
        };

        Self {
            event_id: event.event_id(),
            kind: event.kind(),
            currency: event.currency().clone(),
            legs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// Committed; new balance of every touched account
    Applied(BTreeMap<AccountNumber, Decimal>),
    /// The event id was already processed; nothing changed
    AlreadyApplied,
}

/// Apply a mutation in one atomic unit.
///
/// Locks every touched account in deterministic order, short-circuits when
/// the event id has been processed, refuses legs whose account holds another
/// currency, then applies legs, records the event id and commits. Any error
/// rolls the unit back.
pub async fn apply_mutation(
    store: &dyn BalanceStore,
    mutation: &BalanceMutation,
) -> Result<MutationOutcome, BalanceStoreError> {
    let mut unit = store.begin().await?;

    match apply_in_unit(unit.as_mut(), mutation).await {
        Ok(Some(balances)) => {
            unit.commit().await?;
            tracing::debug!(
                event_id = %mutation.event_id,
                kind = %mutation.kind,
                legs = mutation.legs.len(),
                "Balance mutation committed"
            );
            Ok(MutationOutcome::Applied(balances))
        }
        Ok(None) => {
            unit.rollback().await?;
            tracing::info!(event_id = %mutation.event_id, "Event already applied, skipping");
            Ok(MutationOutcome::AlreadyApplied)
        }
        Err(e) => {
            if let Err(rollback_err) = unit.rollback().await {
                tracing::warn!(
                    event_id = %mutation.event_id,
                    error = %rollback_err,
                    "Rollback failed"
                );
            }
            Err(e)
        }
    }
}

async fn apply_in_unit(
    unit: &mut dyn BalanceUnit,
    mutation: &BalanceMutation,
) -> Result<Option<BTreeMap<AccountNumber, Decimal>>, BalanceStoreError> {
    let sequence = lock_order::lock_sequence(mutation.legs.iter().map(|leg| &leg.account));

    for number in &sequence {
        let account = unit.lock_account_for_update(number).await?;
        if account.currency != mutation.currency {
            return Err(BalanceStoreError::CurrencyMismatch {
                account: number.clone(),
                account_currency: account.currency,
                event_currency: mutation.currency.clone(),
            });
        }
    }

    // Checked under the locks so a concurrent redelivery sees our commit
    if unit.is_processed(mutation.event_id).await? {
        return Ok(None);
    }

    let mut balances = BTreeMap::new();
    for leg in &mutation.legs {
        let balance = unit.apply_delta(&leg.account, leg.delta).await?;
        balances.insert(leg.account.clone(), balance);
    }

    unit.record_processed(mutation.event_id, mutation.kind).await?;
    Ok(Some(balances))
}
