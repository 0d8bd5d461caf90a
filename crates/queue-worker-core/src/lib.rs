//! # Queue Worker Core
//!
//! The receive-process-acknowledge loop of the queue worker.
//!
//! A [`QueueConsumer`] pulls one message at a time from a
//! [`QueueReceiver`](queue_worker_runtime::QueueReceiver), hands it to a
//! [`MessageHandler`] and moves on to the next receive only once the handler
//! has returned. Receive timeouts keep the loop going; every other failure
//! ends it with [`ExitReason::FatalError`]. Cancelling the shutdown token ends
//! it with [`ExitReason::Cancelled`] without interrupting a message that is
//! already being processed.
//!
//! ## Example
//!
//! ```no_run
//! use queue_worker_core::{ConsumerConfig, QueueConsumer, SimulatedWorkHandler};
//! use queue_worker_runtime::{CancellationToken, InMemoryConfig, InMemoryProvider, QueueName};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = InMemoryProvider::new(
//!     InMemoryConfig::default(),
//!     QueueName::new("orders".to_string())?,
//!     Duration::from_secs(60),
//! );
//! queue.send("A");
//!
//! let consumer = QueueConsumer::new(
//!     Arc::new(queue),
//!     Arc::new(SimulatedWorkHandler::default()),
//!     ConsumerConfig::default(),
//! );
//!
//! let shutdown = CancellationToken::new();
//! let exit = consumer.run(&shutdown).await;
//! # Ok(())
//! # }
//! ```

pub mod consumer;
pub mod error;
pub mod handler;

pub use consumer::{ConsumerConfig, QueueConsumer};
pub use error::{ConsumerError, ExitReason, HandlerError};
pub use handler::{handler_fn, HandlerFn, MessageHandler, SimulatedWorkHandler};
