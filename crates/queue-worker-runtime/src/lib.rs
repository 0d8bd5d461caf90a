//! # Queue Worker Runtime
//!
//! Queue endpoint abstraction used by the queue worker to pull messages one at
//! a time and settle them once processed.
//!
//! This library provides:
//! - Peek-lock receive with a bounded broker-side wait
//! - A typed receive outcome, classified once at the transport boundary
//! - Single-settlement deliveries (complete or abandon, consumed on use)
//! - Cancellation of every blocking broker call
//!
//! ## Module Organization
//!
//! - [error] - Error types for all queue operations
//! - [message] - Message identifiers, receipt handles and deliveries
//! - [provider] - Provider types and configuration
//! - [receiver] - Receiver and settlement traits, receive outcome, factory
//! - [providers] - In-memory and Azure Service Bus implementations

// Module declarations
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;
pub mod receiver;

// Re-export commonly used types at crate root for convenience
pub use error::{ConfigurationError, QueueError, ValidationError};
pub use message::{Delivery, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp};
pub use provider::{
    AzureServiceBusConfig, InMemoryConfig, ProviderConfig, ProviderType, ReceiverConfig,
};
pub use providers::{AzureServiceBusProvider, InMemoryProvider, ServiceBusConnectionString};
pub use receiver::{MessageSettler, QueueReceiver, ReceiveOutcome, ReceiverFactory};

pub use tokio_util::sync::CancellationToken;
