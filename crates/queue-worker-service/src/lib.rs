//! # Queue Worker Service
//!
//! Process-level wiring for the queue worker: command line, configuration,
//! logging, signal handling and exit codes around a
//! [`QueueConsumer`](queue_worker_core::QueueConsumer).

pub mod config;

use clap::Parser;
use queue_worker_core::{ExitReason, QueueConsumer, SimulatedWorkHandler};
use queue_worker_runtime::{QueueError, ReceiverFactory};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::{load_dotenv, ConfigError, WorkerConfig, WorkerSettings};

/// Exit code after a clean, signal-driven shutdown
pub const EXIT_OK: i32 = 0;
/// Exit code when the receive loop stops on an unrecoverable error
pub const EXIT_RUNTIME_ERROR: i32 = 1;
/// Exit code when the worker cannot start because of its configuration
pub const EXIT_CONFIGURATION_ERROR: i32 = 3;

const DEFAULT_LOG_FILTER: &str =
    "queue_worker_service=info,queue_worker_core=info,queue_worker_runtime=info";

// ============================================================================
// Command Line
// ============================================================================

/// Queue worker - processes messages from an Azure Service Bus queue one at a time
#[derive(Debug, Parser)]
#[command(name = "queue-worker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Receives, processes and acknowledges queue messages one at a time")]
pub struct Cli {
    /// YAML configuration file; environment variables override its values
    #[arg(short, long, env = "QUEUE_WORKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,
}

// ============================================================================
// Errors
// ============================================================================

/// Failures that prevent the worker from starting
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Failed to connect to the queue: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to initialize logging: {message}")]
    Logging { message: String },
}

impl ServiceError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => EXIT_CONFIGURATION_ERROR,
            Self::Queue(QueueError::ConfigurationError(_) | QueueError::ValidationError(_)) => {
                EXIT_CONFIGURATION_ERROR
            }
            Self::Queue(_) | Self::Logging { .. } => EXIT_RUNTIME_ERROR,
        }
    }
}

/// Process exit code for the way the receive loop ended
pub fn exit_code(reason: &ExitReason) -> i32 {
    match reason {
        ExitReason::Cancelled => EXIT_OK,
        ExitReason::FatalError(_) => EXIT_RUNTIME_ERROR,
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_logging(json: bool) -> Result<(), ServiceError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| ServiceError::Logging {
        message: e.to_string(),
    })
}

// ============================================================================
// Shutdown
// ============================================================================

/// Cancel `shutdown` on SIGINT (Ctrl+C) or, on Unix, SIGTERM
pub fn spawn_signal_listener(shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C signal handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM signal handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), shutting down after the current message");
            },
            _ = terminate => {
                info!("Received SIGTERM, shutting down after the current message");
            },
            _ = shutdown.cancelled() => return,
        }

        shutdown.cancel();
    })
}

// ============================================================================
// Worker
// ============================================================================

/// Build the receiver and run the consumer until `shutdown` fires or the loop fails
pub async fn run_worker(
    config: WorkerConfig,
    shutdown: &CancellationToken,
) -> Result<ExitReason, ServiceError> {
    info!(
        queue = %config.receiver.queue_name,
        receive_timeout = ?config.receiver.receive_timeout,
        processing_delay = ?config.processing_delay,
        processing_timeout = ?config.consumer.processing_timeout,
        "Starting queue worker"
    );

    let receiver = ReceiverFactory::create_receiver(config.receiver).await?;
    let consumer = QueueConsumer::new(
        Arc::from(receiver),
        Arc::new(SimulatedWorkHandler::new(config.processing_delay)),
        config.consumer,
    );

    Ok(consumer.run(shutdown).await)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
