//! PostgreSQL event channel
//!
//! A durable queue in the `channel_messages` table. Consumers claim rows
//! with `FOR UPDATE SKIP LOCKED` and hold them under a lease; several worker
//! processes can poll the same queue.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use super::{ChannelError, Delivery, EventChannel};

#[derive(Debug, Clone)]
pub struct PgChannel {
    pool: PgPool,
    queue: String,
    poll_interval: Duration,
    lease: Duration,
}

impl PgChannel {
    pub fn new(
        pool: PgPool,
        queue: impl Into<String>,
        poll_interval: Duration,
        lease: Duration,
    ) -> Self {
        Self {
            pool,
            queue: queue.into(),
            poll_interval,
            lease,
        }
    }

    async fn try_claim(&self) -> Result<Option<Delivery>, ChannelError> {
        let delivery_tag = Uuid::new_v4();
        let row: Option<(Uuid, Vec<u8>, i32)> = sqlx::query_as(
            r#"
            UPDATE channel_messages
            SET status = 'in_flight',
                delivery_count = delivery_count + 1,
                delivery_tag = $2,
                leased_until = NOW() + make_interval(secs => $3)
            WHERE message_id = (
                SELECT message_id
                FROM channel_messages
                WHERE queue = $1 AND status = 'ready' AND visible_at <= NOW()
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING message_id, payload, delivery_count
            "#,
        )
        .bind(&self.queue)
        .bind(delivery_tag)
        .bind(self.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(message_id, payload, delivery_count)| Delivery {
            delivery_tag,
            message_id,
            payload,
            delivery_count: u32::try_from(delivery_count).unwrap_or(0),
        }))
    }
}

/// Zero rows means the lease expired and the message was reclaimed
fn settled(delivery: &Delivery, rows_affected: u64) -> Result<(), ChannelError> {
    if rows_affected == 0 {
        return Err(ChannelError::UnknownDelivery(delivery.delivery_tag));
    }
    Ok(())
}

#[async_trait]
impl EventChannel for PgChannel {
    async fn publish(&self, payload: Vec<u8>) -> Result<Uuid, ChannelError> {
        let message_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO channel_messages (message_id, queue, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(message_id)
        .bind(&self.queue)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(message_id)
    }

    async fn receive(&self) -> Result<Delivery, ChannelError> {
        loop {
            if let Some(delivery) = self.try_claim().await? {
                return Ok(delivery);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let result = sqlx::query(
            "DELETE FROM channel_messages WHERE message_id = $1 AND delivery_tag = $2",
        )
        .bind(delivery.message_id)
        .bind(delivery.delivery_tag)
        .execute(&self.pool)
        .await?;
        settled(delivery, result.rows_affected())
    }

    async fn requeue(&self, delivery: &Delivery, delay: Duration) -> Result<(), ChannelError> {
        let result = sqlx::query(
            r#"
            UPDATE channel_messages
            SET status = 'ready',
                delivery_tag = NULL,
                leased_until = NULL,
                visible_at = NOW() + make_interval(secs => $3)
            WHERE message_id = $1 AND delivery_tag = $2
            "#,
        )
        .bind(delivery.message_id)
        .bind(delivery.delivery_tag)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;
        settled(delivery, result.rows_affected())
    }

    async fn reject(&self, delivery: &Delivery, reason: &str) -> Result<(), ChannelError> {
        let result = sqlx::query(
            r#"
            UPDATE channel_messages
            SET status = 'rejected',
                delivery_tag = NULL,
                leased_until = NULL,
                reject_reason = $3
            WHERE message_id = $1 AND delivery_tag = $2
            "#,
        )
        .bind(delivery.message_id)
        .bind(delivery.delivery_tag)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        settled(delivery, result.rows_affected())
    }

    async fn reclaim_expired(&self) -> Result<u64, ChannelError> {
        let result = sqlx::query(
            r#"
            UPDATE channel_messages
            SET status = 'ready',
                delivery_tag = NULL,
                leased_until = NULL,
                visible_at = NOW()
            WHERE queue = $1 AND status = 'in_flight' AND leased_until < NOW()
            "#,
        )
        .bind(&self.queue)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
