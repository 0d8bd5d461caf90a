//! Message handler contract and the built-in handlers.

use crate::error::HandlerError;
use async_trait::async_trait;
use queue_worker_runtime::Delivery;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;

/// Processes one message and owns the decision to acknowledge it.
///
/// The handler receives the delivery by value. On success it must complete
/// the delivery with the given token; on failure it returns an error, and the
/// consumer treats that error as fatal. A handler that returns an error
/// without settling leaves the message locked until the broker redelivers it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        delivery: Delivery,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;
}

// ============================================================================
// Simulated Work Handler
// ============================================================================

/// Stands in for real processing: logs the payload, waits, then acknowledges
#[derive(Debug, Clone)]
pub struct SimulatedWorkHandler {
    work_duration: Duration,
}

impl SimulatedWorkHandler {
    pub const DEFAULT_WORK_DURATION: Duration = Duration::from_secs(5);

    pub fn new(work_duration: Duration) -> Self {
        Self { work_duration }
    }

    pub fn work_duration(&self) -> Duration {
        self.work_duration
    }
}

impl Default for SimulatedWorkHandler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WORK_DURATION)
    }
}

#[async_trait]
impl MessageHandler for SimulatedWorkHandler {
    async fn handle(
        &self,
        delivery: Delivery,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let body = String::from_utf8_lossy(delivery.body()).into_owned();
        info!(
            message_id = %delivery.message_id(),
            delivery_count = delivery.message().delivery_count,
            body = %body,
            "Received message"
        );

        tokio::time::sleep(self.work_duration).await;

        info!(
            message_id = %delivery.message_id(),
            body = %body,
            "Finished processing message"
        );

        delivery.complete(cancel).await?;
        Ok(())
    }
}

// ============================================================================
// Function Handler
// ============================================================================

/// Adapts an async function into a [`MessageHandler`]
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure taking the delivery and a cancellation token.
///
/// ```
/// use queue_worker_core::{handler_fn, HandlerError};
///
/// let handler = handler_fn(|delivery, cancel| async move {
///     delivery.complete(&cancel).await?;
///     Ok::<(), HandlerError>(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Delivery, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Delivery, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        delivery: Delivery,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        (self.f)(delivery, cancel.clone()).await
    }
}
