//! Event publisher

use std::sync::Arc;
use uuid::Uuid;

use super::{ChannelError, EventChannel};
use crate::domain::TransactionEvent;

/// Serializes events to the wire format and enqueues them
#[derive(Clone)]
pub struct Publisher {
    channel: Arc<dyn EventChannel>,
}

impl Publisher {
    pub fn new(channel: Arc<dyn EventChannel>) -> Self {
        Self { channel }
    }

    /// Publish an event; the payload always carries `event_id`
    pub async fn publish_event(&self, event: &TransactionEvent) -> Result<Uuid, ChannelError> {
        let payload = serde_json::to_vec(event)?;
        let message_id = self.channel.publish(payload).await?;

        tracing::debug!(
            event_id = %event.event_id(),
            message_id = %message_id,
            kind = %event.kind(),
            "Event published"
        );
        Ok(message_id)
    }
}
