//! Bounded audit append retry

use std::time::Duration;
use uuid::Uuid;

use super::{AuditStore, AuditStoreError};
use crate::domain::LedgerRecord;

/// Fixed-backoff retry bound for audit appends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditRetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    /// An attempt still pending after this counts as failed
    pub attempt_timeout: Duration,
}

impl Default for AuditRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

/// Every attempt failed
#[derive(Debug, thiserror::Error)]
#[error("Audit append failed after {attempts} attempts: {last_error}")]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: AuditStoreError,
}

/// Append a record, retrying with fixed backoff.
///
/// Returns the record id and the number of attempts it took.
pub async fn append_with_retry(
    store: &dyn AuditStore,
    record: &LedgerRecord,
    policy: AuditRetryPolicy,
) -> Result<(Uuid, u32), RetryExhausted> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = tokio::time::timeout(policy.attempt_timeout, store.append(record))
            .await
            .unwrap_or(Err(AuditStoreError::Timeout(policy.attempt_timeout)));

        match result {
            Ok(id) => return Ok((id, attempt)),
            Err(e) if attempt < max_attempts => {
                tracing::warn!(
                    event_id = %record.event_id,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Audit append failed, retrying"
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: e,
                })
            }
        }
    }
}
