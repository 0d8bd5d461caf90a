//! Receiver traits, receive outcome classification and the receiver factory.

use crate::error::QueueError;
use crate::message::{Delivery, QueueName, ReceiptHandle};
use crate::provider::{ProviderConfig, ProviderType, ReceiverConfig};
use crate::providers::{AzureServiceBusProvider, InMemoryProvider};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "receiver_tests.rs"]
mod tests;

/// Result of a single receive attempt.
///
/// Produced once per loop iteration and consumed immediately.
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// A message was locked and handed out
    Delivered(Delivery),
    /// The broker-side wait elapsed with no message available
    TimedOut,
    /// The receive call failed for any other reason
    Fatal(QueueError),
}

impl ReceiveOutcome {
    /// Classify the raw result of a provider receive call.
    ///
    /// An empty wait window, whether reported as `Ok(None)` or as
    /// [`QueueError::Timeout`], is a timeout; every other error is fatal.
    pub fn classify(result: Result<Option<Delivery>, QueueError>) -> Self {
        match result {
            Ok(Some(delivery)) => Self::Delivered(delivery),
            Ok(None) => Self::TimedOut,
            Err(e) if e.is_receive_timeout() => Self::TimedOut,
            Err(e) => Self::Fatal(e),
        }
    }
}

/// A queue endpoint that hands out one locked message at a time.
///
/// Implementations hold one broker session and are not meant to be shared by
/// more than one receive loop.
#[async_trait]
pub trait QueueReceiver: Send + Sync {
    /// Wait up to the configured broker-side timeout for the next message
    async fn receive_one(&self, cancel: &CancellationToken) -> ReceiveOutcome;

    /// Get the queue this receiver pulls from
    fn queue_name(&self) -> &QueueName;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Settlement operations against the session that locked a message
#[async_trait]
pub trait MessageSettler: Send + Sync {
    /// Mark message as successfully processed
    async fn complete(
        &self,
        receipt: &ReceiptHandle,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError>;

    /// Release the lock so the message becomes available again
    async fn abandon(
        &self,
        receipt: &ReceiptHandle,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError>;
}

/// Factory for creating receivers for the configured provider
pub struct ReceiverFactory;

impl ReceiverFactory {
    /// Create queue receiver from configuration
    pub async fn create_receiver(
        config: ReceiverConfig,
    ) -> Result<Box<dyn QueueReceiver>, QueueError> {
        let receiver: Box<dyn QueueReceiver> = match config.provider {
            ProviderConfig::AzureServiceBus(azure_config) => Box::new(
                AzureServiceBusProvider::new(
                    azure_config,
                    config.queue_name,
                    config.receive_timeout,
                )
                .map_err(|e| e.to_queue_error())?,
            ),
            ProviderConfig::InMemory(memory_config) => Box::new(InMemoryProvider::new(
                memory_config,
                config.queue_name,
                config.receive_timeout,
            )),
        };

        Ok(receiver)
    }
}
