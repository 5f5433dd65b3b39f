//! Event Channel
//!
//! Durable, at-least-once queue carrying transaction events from producers
//! to the ledger worker. A received message stays in flight until it is
//! acked (removed), requeued (visible again after a delay) or rejected
//! (dead-lettered, never redelivered). In-flight messages whose lease runs
//! out are reclaimed and redelivered.

pub mod memory;
pub mod postgres;
mod publisher;

pub use memory::MemoryChannel;
pub use postgres::PgChannel;
pub use publisher::Publisher;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// A message handed to a consumer.
///
/// The payload is kept as raw bytes; decoding is the consumer's job so that
/// malformed messages can still be rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Identifies this particular delivery for ack/requeue/reject
    pub delivery_tag: Uuid,
    pub message_id: Uuid,
    pub payload: Vec<u8>,
    /// 1 on first delivery
    pub delivery_count: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// No further messages will arrive
    #[error("Channel closed")]
    Closed,

    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    /// Ack/requeue/reject for a delivery the channel no longer tracks
    #[error("Unknown delivery: {0}")]
    UnknownDelivery(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Durably enqueue a payload, returning its message id
    async fn publish(&self, payload: Vec<u8>) -> Result<Uuid, ChannelError>;

    /// Wait for the next visible message
    async fn receive(&self) -> Result<Delivery, ChannelError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError>;

    /// Return the message to the queue, visible again after `delay`
    async fn requeue(&self, delivery: &Delivery, delay: Duration) -> Result<(), ChannelError>;

    /// Dead-letter the message
    async fn reject(&self, delivery: &Delivery, reason: &str) -> Result<(), ChannelError>;

    /// Make in-flight messages with an expired lease visible again.
    /// Returns how many were reclaimed.
    async fn reclaim_expired(&self) -> Result<u64, ChannelError>;
}
