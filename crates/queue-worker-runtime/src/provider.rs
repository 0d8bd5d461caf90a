//! Provider types and configuration.

use crate::message::QueueName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    AzureServiceBus,
    InMemory,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AzureServiceBus => write!(f, "AzureServiceBus"),
            Self::InMemory => write!(f, "InMemory"),
        }
    }
}

/// Configuration for creating a queue receiver
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub queue_name: QueueName,
    /// Broker-side wait per receive attempt before reporting a timeout
    pub receive_timeout: Duration,
    pub provider: ProviderConfig,
}

impl ReceiverConfig {
    pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a receiver configuration with the default receive timeout
    pub fn new(queue_name: QueueName, provider: ProviderConfig) -> Self {
        Self {
            queue_name,
            receive_timeout: Self::DEFAULT_RECEIVE_TIMEOUT,
            provider,
        }
    }

    /// Set the broker-side wait per receive attempt
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    AzureServiceBus(AzureServiceBusConfig),
    InMemory(InMemoryConfig),
}

/// Azure Service Bus configuration
#[derive(Clone)]
pub struct AzureServiceBusConfig {
    pub connection_string: String,
    /// Lifetime of generated shared access signatures
    pub sas_token_ttl: Duration,
}

impl AzureServiceBusConfig {
    /// Create configuration from a namespace connection string
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            sas_token_ttl: Duration::from_secs(60 * 60),
        }
    }
}

// The connection string embeds the shared access key.
impl fmt::Debug for AzureServiceBusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureServiceBusConfig")
            .field("connection_string", &"<redacted>")
            .field("sas_token_ttl", &self.sas_token_ttl)
            .finish()
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// How long a received message stays locked before it becomes visible again
    pub lock_duration: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
