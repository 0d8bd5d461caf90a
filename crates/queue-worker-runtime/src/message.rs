//! Message types for queue operations including core domain identifiers.

use crate::error::{QueueError, ValidationError};
use crate::provider::ProviderType;
use crate::receiver::MessageSettler;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > 260 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-260 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, underscores, periods and slashes allowed"
                    .to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Broker-assigned identifier of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parse an RFC 1123 / RFC 2822 date as sent in HTTP headers
    pub fn parse_http_date(s: &str) -> Option<Self> {
        DateTime::parse_from_rfc2822(s)
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc)))
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message received from the queue with its broker metadata
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub properties: HashMap<String, String>,
    pub receipt_handle: ReceiptHandle,
    pub delivery_count: u32,
    pub sequence_number: Option<u64>,
    pub enqueued_at: Option<Timestamp>,
}

/// Opaque lock token for settling a received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle {
    message_id: MessageId,
    handle: String,
    expires_at: Timestamp,
    provider_type: ProviderType,
}

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(
        message_id: MessageId,
        handle: String,
        expires_at: Timestamp,
        provider_type: ProviderType,
    ) -> Self {
        Self {
            message_id,
            handle,
            expires_at,
            provider_type,
        }
    }

    /// Get the id of the message this handle settles
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Get handle string
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Get the time at which the broker lock expires
    pub fn expires_at(&self) -> &Timestamp {
        &self.expires_at
    }

    /// Check if receipt handle is expired
    pub fn is_expired(&self) -> bool {
        Timestamp::now() >= self.expires_at
    }

    /// Get provider type
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// A received message bound to the broker session that locked it.
///
/// Settling consumes the delivery, so a message can be completed or abandoned
/// at most once. A delivery dropped without settlement is left to the broker:
/// its lock expires and the message is redelivered.
pub struct Delivery {
    message: ReceivedMessage,
    settler: Arc<dyn MessageSettler>,
    settled: bool,
}

impl Delivery {
    /// Bind a received message to the settler that owns its lock
    pub fn new(message: ReceivedMessage, settler: Arc<dyn MessageSettler>) -> Self {
        Self {
            message,
            settler,
            settled: false,
        }
    }

    /// Get the received message
    pub fn message(&self) -> &ReceivedMessage {
        &self.message
    }

    /// Get the message payload
    pub fn body(&self) -> &Bytes {
        &self.message.body
    }

    /// Get the broker message id
    pub fn message_id(&self) -> &MessageId {
        &self.message.message_id
    }

    /// Acknowledge the message, removing it from the queue permanently
    pub async fn complete(mut self, cancel: &CancellationToken) -> Result<(), QueueError> {
        self.settled = true;
        self.settler
            .complete(&self.message.receipt_handle, cancel)
            .await
    }

    /// Release the lock so the broker can redeliver the message
    pub async fn abandon(mut self, cancel: &CancellationToken) -> Result<(), QueueError> {
        self.settled = true;
        self.settler
            .abandon(&self.message.receipt_handle, cancel)
            .await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("settled", &self.settled)
            .finish()
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                message_id = %self.message.message_id,
                lock_expires_at = %self.message.receipt_handle.expires_at(),
                "Delivery dropped without being settled; the broker will redeliver it once the lock expires"
            );
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
