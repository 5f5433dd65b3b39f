//! PostgreSQL balance store
//!
//! Row locks are `SELECT ... FOR UPDATE` inside a transaction whose waits
//! are bounded by `SET LOCAL lock_timeout` and `statement_timeout`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::{
    checked_balance, is_data_violation, is_unique_violation, BalanceStore, BalanceStoreError,
    BalanceUnit, ProcessedEvent,
};
use crate::domain::{Account, AccountNumber, NewAccount, TransactionKind};

/// Attempts at drawing an unused random account number
const ACCOUNT_NUMBER_ATTEMPTS: u32 = 5;

type AccountRow = (
    Uuid,
    Uuid,
    String,
    String,
    Decimal,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
);

const ACCOUNT_COLUMNS: &str =
    "id, owner_id, account_number, account_type, balance, currency, created_at, updated_at";

fn row_to_account(row: AccountRow) -> Result<Account, BalanceStoreError> {
    let (id, owner_id, number, account_type, balance, currency, created_at, updated_at) = row;
    let invalid = |e: crate::domain::DomainError| BalanceStoreError::InvalidRow(e.to_string());
    Ok(Account {
        id,
        owner_id,
        account_number: AccountNumber::new(&number).map_err(invalid)?,
        account_type: account_type.parse().map_err(invalid)?,
        balance,
        currency: currency.parse().map_err(invalid)?,
        created_at,
        updated_at,
    })
}

#[derive(Debug, Clone)]
pub struct PgBalanceStore {
    pool: PgPool,
    lock_timeout: Duration,
    statement_timeout: Duration,
}

impl PgBalanceStore {
    pub fn new(pool: PgPool, lock_timeout: Duration, statement_timeout: Duration) -> Self {
        Self {
            pool,
            lock_timeout,
            statement_timeout,
        }
    }

    async fn insert_account(
        &self,
        new: &NewAccount,
        number: &AccountNumber,
    ) -> Result<Account, sqlx::Error> {
        let row: AccountRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO accounts (owner_id, account_number, account_type, balance, currency)
            VALUES ($1, $2, $3, 0, $4)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(new.owner_id)
        .bind(number.as_str())
        .bind(new.account_type.as_str())
        .bind(new.currency.as_str())
        .fetch_one(&self.pool)
        .await?;

        row_to_account(row).map_err(|e| sqlx::Error::Decode(e.to_string().into()))
    }
}

#[async_trait]
impl BalanceStore for PgBalanceStore {
    async fn begin(&self) -> Result<Box<dyn BalanceUnit>, BalanceStoreError> {
        let mut tx = self.pool.begin().await?;

        // SET LOCAL takes no bind parameters; values are integers
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = '{}ms'",
            self.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        Ok(Box::new(PgBalanceUnit {
            tx,
            locked: HashMap::new(),
        }))
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account, BalanceStoreError> {
        if let Some(number) = &new.account_number {
            return match self.insert_account(&new, number).await {
                Ok(account) => Ok(account),
                Err(e) if is_unique_violation(&e) => {
                    Err(BalanceStoreError::DuplicateAccount(number.clone()))
                }
                Err(e) => Err(e.into()),
            };
        }

        for attempt in 1..=ACCOUNT_NUMBER_ATTEMPTS {
            let number = AccountNumber::generate();
            match self.insert_account(&new, &number).await {
                Ok(account) => return Ok(account),
                Err(e) if is_unique_violation(&e) => {
                    tracing::debug!(attempt, "Generated account number collided, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(BalanceStoreError::Unavailable(
            "could not allocate a unique account number".to_string(),
        ))
    }

    async fn find_account(
        &self,
        number: &AccountNumber,
    ) -> Result<Option<Account>, BalanceStoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_number = $1"
        ))
        .bind(number.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_account).transpose()
    }

    async fn accounts_for_owner(&self, owner_id: Uuid) -> Result<Vec<Account>, BalanceStoreError> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE owner_id = $1 ORDER BY created_at"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_account).collect()
    }

    async fn mark_audited(&self, event_id: Uuid) -> Result<(), BalanceStoreError> {
        sqlx::query(
            r#"
            UPDATE processed_events
            SET audited_at = NOW()
            WHERE event_id = $1 AND audited_at IS NULL
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unaudited_events(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessedEvent>, BalanceStoreError> {
        let rows: Vec<(Uuid, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT event_id, kind, processed_at
            FROM processed_events
            WHERE audited_at IS NULL AND processed_at <= $1
            ORDER BY processed_at
            LIMIT $2
            "#,
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(event_id, kind, processed_at)| {
                let kind: TransactionKind = kind
                    .parse()
                    .map_err(|e: crate::domain::DomainError| {
                        BalanceStoreError::InvalidRow(e.to_string())
                    })?;
                Ok(ProcessedEvent {
                    event_id,
                    kind,
                    processed_at,
                    audited_at: None,
                })
            })
            .collect()
    }
}

struct PgBalanceUnit {
    tx: Transaction<'static, Postgres>,
    /// Balances of rows this transaction holds locks on
    locked: HashMap<AccountNumber, Decimal>,
}

#[async_trait]
impl BalanceUnit for PgBalanceUnit {
    async fn lock_account_for_update(
        &mut self,
        number: &AccountNumber,
    ) -> Result<Account, BalanceStoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_number = $1 FOR UPDATE"
        ))
        .bind(number.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| {
            let lock_not_available = matches!(
                &e,
                sqlx::Error::Database(db) if db.code().as_deref() == Some("55P03")
            );
            if lock_not_available {
                BalanceStoreError::LockTimeout(number.clone())
            } else {
                BalanceStoreError::Database(e)
            }
        })?;

        let account = row
            .map(row_to_account)
            .transpose()?
            .ok_or_else(|| BalanceStoreError::AccountNotFound(number.clone()))?;

        self.locked.insert(number.clone(), account.balance);
        Ok(account)
    }

    async fn apply_delta(
        &mut self,
        number: &AccountNumber,
        delta: Decimal,
    ) -> Result<Decimal, BalanceStoreError> {
        let current = *self
            .locked
            .get(number)
            .ok_or_else(|| BalanceStoreError::NotLocked(number.clone()))?;
        let next = checked_balance(number, current, delta)?;

        sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $2, updated_at = NOW()
            WHERE account_number = $1
            "#,
        )
        .bind(number.as_str())
        .bind(next)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_data_violation(&e) {
                BalanceStoreError::Overflow(number.clone())
            } else {
                BalanceStoreError::Database(e)
            }
        })?;

        self.locked.insert(number.clone(), next);
        Ok(next)
    }

    async fn is_processed(&mut self, event_id: Uuid) -> Result<bool, BalanceStoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn record_processed(
        &mut self,
        event_id: Uuid,
        kind: TransactionKind,
    ) -> Result<(), BalanceStoreError> {
        sqlx::query("INSERT INTO processed_events (event_id, kind) VALUES ($1, $2)")
            .bind(event_id)
            .bind(kind.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    BalanceStoreError::DuplicateEvent(event_id)
                } else {
                    BalanceStoreError::Database(e)
                }
            })?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), BalanceStoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BalanceStoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
