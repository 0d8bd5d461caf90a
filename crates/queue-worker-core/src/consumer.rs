//! The receive-process-acknowledge loop.
//!
//! One message is received, handled and acknowledged before the next receive
//! starts. Receive timeouts restart the iteration; any other failure ends the
//! loop. Shutdown cancellation is observed while waiting for a message but
//! never while a message is being handled.

use crate::error::{ConsumerError, ExitReason};
use crate::handler::MessageHandler;
use queue_worker_runtime::{Delivery, QueueError, QueueReceiver, ReceiveOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// Consumer tuning
#[derive(Debug, Clone, Default)]
pub struct ConsumerConfig {
    /// Upper bound on handling a single message, `None` for unbounded
    pub processing_timeout: Option<Duration>,
}

impl ConsumerConfig {
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = Some(timeout);
        self
    }
}

/// Drives a [`QueueReceiver`] and a [`MessageHandler`] one message at a time
pub struct QueueConsumer {
    receiver: Arc<dyn QueueReceiver>,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
}

impl QueueConsumer {
    pub fn new(
        receiver: Arc<dyn QueueReceiver>,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            receiver,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Run until `shutdown` is cancelled or an unrecoverable error occurs.
    ///
    /// A message that has already been received is always handled to the end,
    /// even if `shutdown` fires meanwhile; the loop then exits before the next
    /// receive.
    #[instrument(
        skip(self, shutdown),
        fields(
            queue = %self.receiver.queue_name(),
            provider = %self.receiver.provider_type(),
        )
    )]
    pub async fn run(&self, shutdown: &CancellationToken) -> ExitReason {
        info!("Starting receive loop");

        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested; stopping receive loop");
                return ExitReason::Cancelled;
            }

            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested while waiting for messages; stopping receive loop");
                    return ExitReason::Cancelled;
                }
                outcome = self.receiver.receive_one(shutdown) => outcome,
            };

            match outcome {
                ReceiveOutcome::TimedOut => {
                    info!("Timeout waiting for messages; entering next loop");
                }
                ReceiveOutcome::Fatal(QueueError::Cancelled) if shutdown.is_cancelled() => {
                    info!("Receive cancelled by shutdown; stopping receive loop");
                    return ExitReason::Cancelled;
                }
                ReceiveOutcome::Fatal(e) => {
                    error!(
                        error = %e,
                        transient = e.is_transient(),
                        "Receive failed; stopping receive loop"
                    );
                    return ExitReason::FatalError(ConsumerError::Receive(e));
                }
                ReceiveOutcome::Delivered(delivery) => {
                    if let Err(e) = self.process(delivery).await {
                        error!(error = %e, "Message processing failed; stopping receive loop");
                        return ExitReason::FatalError(e);
                    }
                }
            }
        }
    }

    /// Hand one delivery to the handler under a scope of its own
    async fn process(&self, delivery: Delivery) -> Result<(), ConsumerError> {
        let message_id = delivery.message_id().clone();
        let scope = CancellationToken::new();
        let handling = self.handler.handle(delivery, &scope);

        let result = match self.config.processing_timeout {
            None => handling.await,
            Some(duration) => match tokio::time::timeout(duration, handling).await {
                Ok(result) => result,
                Err(_) => {
                    scope.cancel();
                    error!(
                        message_id = %message_id,
                        timeout = ?duration,
                        "Message processing timed out"
                    );
                    return Err(ConsumerError::ProcessingTimedOut { duration });
                }
            },
        };

        result?;
        debug!(message_id = %message_id, "Message handled");
        Ok(())
    }
}
