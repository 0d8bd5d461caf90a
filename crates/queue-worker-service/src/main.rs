//! # Queue Worker
//!
//! Binary entry point. Loads `.env` and configuration, installs logging and
//! signal handling, then runs the receive loop until it is cancelled or fails.
//!
//! Exit codes: 0 after a signal-driven shutdown, 1 when the loop stops on an
//! error, 3 when the configuration is unusable.

use clap::Parser;
use queue_worker_core::ExitReason;
use queue_worker_service::{
    exit_code, init_logging, load_dotenv, run_worker, spawn_signal_listener, Cli, WorkerSettings,
    EXIT_CONFIGURATION_ERROR,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // .env may set RUST_LOG and QUEUE_WORKER_CONFIG, so it is read first
    let dotenv = load_dotenv();
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.json_logs) {
        eprintln!("{}", e);
        std::process::exit(e.exit_code());
    }

    if let Err(e) = dotenv {
        error!(error = %e, "Could not load .env file; aborting");
        std::process::exit(EXIT_CONFIGURATION_ERROR);
    }

    let config = match WorkerSettings::load(cli.config.as_deref()).and_then(|s| s.validate()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Worker configuration is invalid; aborting");
            std::process::exit(EXIT_CONFIGURATION_ERROR);
        }
    };

    let shutdown = CancellationToken::new();
    let signals = spawn_signal_listener(shutdown.clone());

    let code = match run_worker(config, &shutdown).await {
        Ok(reason) => {
            match &reason {
                ExitReason::Cancelled => info!("Queue worker stopped"),
                ExitReason::FatalError(e) => {
                    error!(error = %e, "Queue worker stopped on an unrecoverable error")
                }
            }
            exit_code(&reason)
        }
        Err(e) => {
            error!(error = %e, "Queue worker failed to start");
            e.exit_code()
        }
    };

    signals.abort();
    std::process::exit(code);
}
