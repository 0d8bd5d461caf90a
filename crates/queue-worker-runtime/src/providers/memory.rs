//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory queue that:
//! - Hands out messages in FIFO order under a peek-lock
//! - Redelivers abandoned messages and messages whose lock expired
//! - Reports a receive timeout when nothing arrives within the wait window
//! - Wakes a waiting receiver as soon as a message is sent
//!
//! Clones share the same queue, so a test can keep one handle for sending
//! and inspection while the consumer owns another.

use crate::error::QueueError;
use crate::message::{
    Delivery, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp,
};
use crate::provider::{InMemoryConfig, ProviderType};
use crate::receiver::{MessageSettler, QueueReceiver, ReceiveOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// State shared by every clone of a provider
struct SharedQueue {
    state: Mutex<QueueState>,
    arrivals: Notify,
    config: InMemoryConfig,
}

#[derive(Default)]
struct QueueState {
    /// Messages visible to receivers (FIFO order)
    pending: VecDeque<StoredMessage>,
    /// Locked messages keyed by lock token
    in_flight: HashMap<String, InFlightMessage>,
    /// Ids of completed messages in completion order
    completed: Vec<MessageId>,
    next_sequence: u64,
}

#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    sequence_number: u64,
    enqueued_at: Timestamp,
    delivery_count: u32,
}

struct InFlightMessage {
    message: StoredMessage,
    lock_expires_at: Instant,
}

impl SharedQueue {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the next visible message, returning expired locks to the queue first
    fn lock_next(&self) -> Option<ReceivedMessage> {
        let mut state = self.state();
        state.release_expired_locks();

        let mut message = state.pending.pop_front()?;
        message.delivery_count += 1;

        let lock_token = uuid::Uuid::new_v4().to_string();
        let lock_duration = self.config.lock_duration;
        let now = chrono::Utc::now();
        let expires_at = Timestamp::from_datetime(
            chrono::Duration::from_std(lock_duration)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC),
        );

        let received = ReceivedMessage {
            message_id: message.message_id.clone(),
            body: message.body.clone(),
            properties: HashMap::new(),
            receipt_handle: ReceiptHandle::new(
                message.message_id.clone(),
                lock_token.clone(),
                expires_at,
                ProviderType::InMemory,
            ),
            delivery_count: message.delivery_count,
            sequence_number: Some(message.sequence_number),
            enqueued_at: Some(message.enqueued_at.clone()),
        };

        state.in_flight.insert(
            lock_token,
            InFlightMessage {
                message,
                lock_expires_at: instant_after(lock_duration),
            },
        );

        Some(received)
    }

    /// Earliest instant at which a held lock expires
    fn next_lock_expiry(&self) -> Option<Instant> {
        self.state()
            .in_flight
            .values()
            .map(|m| m.lock_expires_at)
            .min()
    }

    /// Remove a live lock, failing if it is unknown or already expired
    fn take_lock(&self, receipt: &ReceiptHandle) -> Result<StoredMessage, QueueError> {
        let mut state = self.state();
        state.release_expired_locks();

        state
            .in_flight
            .remove(receipt.handle())
            .map(|in_flight| in_flight.message)
            .ok_or_else(|| QueueError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            })
    }
}

impl QueueState {
    fn release_expired_locks(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.lock_expires_at <= now)
            .map(|(token, _)| token.clone())
            .collect();

        let mut released: Vec<StoredMessage> = expired
            .iter()
            .filter_map(|token| self.in_flight.remove(token))
            .map(|in_flight| in_flight.message)
            .collect();

        // Newest first, so that the oldest ends up at the front
        released.sort_by_key(|m| std::cmp::Reverse(m.sequence_number));
        for message in released {
            debug!(
                message_id = %message.message_id,
                sequence_number = message.sequence_number,
                "Lock expired; message visible again"
            );
            self.pending.push_front(message);
        }
    }
}

/// Instant `duration` from now, clamped to a far-future instant on overflow
fn instant_after(duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(duration).unwrap_or_else(|| now + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[async_trait]
impl MessageSettler for SharedQueue {
    async fn complete(
        &self,
        receipt: &ReceiptHandle,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        let message = self.take_lock(receipt)?;
        self.state().completed.push(message.message_id);
        Ok(())
    }

    async fn abandon(
        &self,
        receipt: &ReceiptHandle,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        let message = self.take_lock(receipt)?;
        self.state().pending.push_front(message);
        self.arrivals.notify_one();
        Ok(())
    }
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider implementation
#[derive(Clone)]
pub struct InMemoryProvider {
    shared: Arc<SharedQueue>,
    queue_name: QueueName,
    receive_timeout: Duration,
}

impl InMemoryProvider {
    /// Create new in-memory queue with configuration
    pub fn new(config: InMemoryConfig, queue_name: QueueName, receive_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(SharedQueue {
                state: Mutex::new(QueueState::default()),
                arrivals: Notify::new(),
                config,
            }),
            queue_name,
            receive_timeout,
        }
    }

    /// Enqueue a message and wake a waiting receiver
    pub fn send(&self, body: impl Into<Bytes>) -> MessageId {
        let message_id = MessageId::new();
        {
            let mut state = self.shared.state();
            let sequence_number = state.next_sequence;
            state.next_sequence += 1;
            state.pending.push_back(StoredMessage {
                message_id: message_id.clone(),
                body: body.into(),
                sequence_number,
                enqueued_at: Timestamp::now(),
                delivery_count: 0,
            });
        }
        self.shared.arrivals.notify_one();
        message_id
    }

    /// Number of messages visible to receivers
    pub fn pending_count(&self) -> usize {
        self.shared.state().pending.len()
    }

    /// Number of messages currently locked
    pub fn in_flight_count(&self) -> usize {
        self.shared.state().in_flight.len()
    }

    /// Ids of completed messages in completion order
    pub fn completed(&self) -> Vec<MessageId> {
        self.shared.state().completed.clone()
    }

    async fn try_receive(&self, cancel: &CancellationToken) -> Result<Delivery, QueueError> {
        let deadline = instant_after(self.receive_timeout);

        loop {
            // Register for wake-ups before checking so a concurrent send is not missed.
            let notified = self.shared.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.shared.lock_next() {
                let settler: Arc<dyn MessageSettler> = self.shared.clone();
                return Ok(Delivery::new(message, settler));
            }

            if Instant::now() >= deadline {
                return Err(QueueError::Timeout {
                    duration: self.receive_timeout,
                });
            }

            let wake_at = match self.shared.next_lock_expiry() {
                Some(expiry) if expiry < deadline => expiry,
                _ => deadline,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }
}

#[async_trait]
impl QueueReceiver for InMemoryProvider {
    async fn receive_one(&self, cancel: &CancellationToken) -> ReceiveOutcome {
        ReceiveOutcome::classify(self.try_receive(cancel).await.map(Some))
    }

    fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
