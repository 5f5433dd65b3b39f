//! In-memory event channel
//!
//! Keeps the channel's delivery contract (leases, delayed requeue, dead
//! letters) in process. Used by tests and by single-process local runs.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::{ChannelError, Delivery, EventChannel};

const DEFAULT_LEASE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Message {
    message_id: Uuid,
    payload: Vec<u8>,
    delivery_count: u32,
    visible_at: Instant,
}

#[derive(Debug)]
struct InFlight {
    message: Message,
    leased_until: Instant,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Message>,
    in_flight: HashMap<Uuid, InFlight>,
    dead_letters: Vec<(Uuid, String)>,
    acked: Vec<Uuid>,
    closed: bool,
}

pub struct MemoryChannel {
    state: Mutex<State>,
    notify: Notify,
    lease: Duration,
    failing_publishes: AtomicU32,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::with_lease(DEFAULT_LEASE)
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            lease,
            failing_publishes: AtomicU32::new(0),
        }
    }

    /// Stop handing out messages once the queue has drained.
    /// Consumers then see `ChannelError::Closed`.
    pub fn close(&self) {
        self.state().closed = true;
        self.notify.notify_waiters();
    }

    /// Make the next `n` publishes fail as if the broker were down
    pub fn fail_next_publishes(&self, n: u32) {
        self.failing_publishes.store(n, Ordering::SeqCst);
    }

    /// Messages waiting for a consumer, including delayed ones
    pub fn ready_count(&self) -> usize {
        self.state().ready.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state().in_flight.len()
    }

    pub fn acked(&self) -> Vec<Uuid> {
        self.state().acked.clone()
    }

    /// Rejected message ids with their reasons
    pub fn dead_letters(&self) -> Vec<(Uuid, String)> {
        self.state().dead_letters.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_in_flight(&self, delivery: &Delivery) -> Result<Message, ChannelError> {
        self.state()
            .in_flight
            .remove(&delivery.delivery_tag)
            .map(|f| f.message)
            .ok_or(ChannelError::UnknownDelivery(delivery.delivery_tag))
    }

    /// Next delivery if one is visible, otherwise when to look again
    fn try_claim(&self) -> Result<Result<Delivery, Option<Instant>>, ChannelError> {
        let mut state = self.state();
        let now = Instant::now();

        if let Some(pos) = state.ready.iter().position(|m| m.visible_at <= now) {
            if let Some(mut message) = state.ready.remove(pos) {
                message.delivery_count += 1;
                let delivery = Delivery {
                    delivery_tag: Uuid::new_v4(),
                    message_id: message.message_id,
                    payload: message.payload.clone(),
                    delivery_count: message.delivery_count,
                };
                state.in_flight.insert(
                    delivery.delivery_tag,
                    InFlight {
                        message,
                        leased_until: now + self.lease,
                    },
                );
                return Ok(Ok(delivery));
            }
        }

        if state.closed && state.ready.is_empty() {
            return Err(ChannelError::Closed);
        }
        Ok(Err(state.ready.iter().map(|m| m.visible_at).min()))
    }
}

#[async_trait]
impl EventChannel for MemoryChannel {
    async fn publish(&self, payload: Vec<u8>) -> Result<Uuid, ChannelError> {
        let injected = self
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ChannelError::Unavailable(
                "injected broker outage".to_string(),
            ));
        }

        let message_id = Uuid::new_v4();
        {
            let mut state = self.state();
            if state.closed {
                return Err(ChannelError::Closed);
            }
            state.ready.push_back(Message {
                message_id,
                payload,
                delivery_count: 0,
                visible_at: Instant::now(),
            });
        }
        self.notify.notify_one();
        Ok(message_id)
    }

    async fn receive(&self) -> Result<Delivery, ChannelError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);

            match self.try_claim()? {
                Ok(delivery) => return Ok(delivery),
                Err(Some(next_visible)) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(next_visible) => {}
                    }
                }
                Err(None) => notified.await,
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let message = self.take_in_flight(delivery)?;
        self.state().acked.push(message.message_id);
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery, delay: Duration) -> Result<(), ChannelError> {
        let mut message = self.take_in_flight(delivery)?;
        message.visible_at = Instant::now() + delay;
        self.state().ready.push_back(message);
        self.notify.notify_one();
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, reason: &str) -> Result<(), ChannelError> {
        let message = self.take_in_flight(delivery)?;
        self.state()
            .dead_letters
            .push((message.message_id, reason.to_string()));
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<u64, ChannelError> {
        let reclaimed = {
            let mut state = self.state();
            let now = Instant::now();
            let expired: Vec<Uuid> = state
                .in_flight
                .iter()
                .filter(|(_, f)| f.leased_until <= now)
                .map(|(tag, _)| *tag)
                .collect();
            for tag in &expired {
                if let Some(mut f) = state.in_flight.remove(tag) {
                    f.message.visible_at = now;
                    state.ready.push_back(f.message);
                }
            }
            expired.len() as u64
        };

        if reclaimed > 0 {
            self.notify.notify_waiters();
        }
        Ok(reclaimed)
    }
}
