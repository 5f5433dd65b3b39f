//! PostgreSQL audit store
//!
//! Records are JSONB documents in `ledger_records`. The table rejects
//! UPDATE and DELETE through a trigger, and `event_id` is unique.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{AuditStore, AuditStoreError};
use crate::domain::{AccountNumber, LedgerRecord};

#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, record: &LedgerRecord) -> Result<Uuid, AuditStoreError> {
        let account_numbers: Vec<String> = record
            .account_numbers()
            .into_iter()
            .map(|n| n.to_string())
            .collect();

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO ledger_records (id, event_id, account_numbers, status, document, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(record.event_id)
        .bind(&account_numbers)
        .bind(record.status.as_str())
        .bind(Json(record))
        .bind(record.created_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(id);
        }

        let existing: Uuid =
            sqlx::query_scalar("SELECT id FROM ledger_records WHERE event_id = $1")
                .bind(record.event_id)
                .fetch_one(&self.pool)
                .await?;

        tracing::debug!(
            event_id = %record.event_id,
            record_id = %existing,
            "Audit record already present"
        );
        Ok(existing)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<LedgerRecord>, AuditStoreError> {
        let document: Option<Json<LedgerRecord>> =
            sqlx::query_scalar("SELECT document FROM ledger_records WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(document.map(|Json(record)| record))
    }

    async fn find_by_event_id(
        &self,
        event_id: Uuid,
    ) -> Result<Option<LedgerRecord>, AuditStoreError> {
        let document: Option<Json<LedgerRecord>> =
            sqlx::query_scalar("SELECT document FROM ledger_records WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(document.map(|Json(record)| record))
    }

    async fn find_by_account(
        &self,
        account: &AccountNumber,
        limit: i64,
    ) -> Result<Vec<LedgerRecord>, AuditStoreError> {
        let documents: Vec<Json<LedgerRecord>> = sqlx::query_scalar(
            r#"
            SELECT document
            FROM ledger_records
            WHERE $1 = ANY(account_numbers)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(account.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(documents.into_iter().map(|Json(record)| record).collect())
    }
}
