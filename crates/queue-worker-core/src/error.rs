//! Error and exit types for the receive loop.

use queue_worker_runtime::QueueError;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a message handler
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Processing failed: {message}")]
    Processing { message: String },

    /// Completing or abandoning the message failed at the broker
    #[error("Settlement failed: {0}")]
    Settlement(#[from] QueueError),
}

impl HandlerError {
    /// Create a processing failure
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
        }
    }
}

/// Failure that ends the receive loop
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Receive failed: {0}")]
    Receive(#[source] QueueError),

    #[error("Message handler failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("Message processing exceeded {duration:?}")]
    ProcessingTimedOut { duration: Duration },
}

/// Why the receive loop stopped
#[derive(Debug)]
pub enum ExitReason {
    /// The shutdown token was cancelled
    Cancelled,
    /// An unrecoverable error occurred
    FatalError(ConsumerError),
}

impl ExitReason {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
