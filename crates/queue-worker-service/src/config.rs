//! Worker configuration.
//!
//! Values are read, later sources overriding earlier ones, from:
//!  1. an optional YAML file given with `--config` / `QUEUE_WORKER_CONFIG`
//!  2. the process environment, without prefix
//!     (e.g. `QUEUE_NAME=orders` sets `queue_name`)
//!
//! A `.env` file in the working directory is merged into the process
//! environment first by [`load_dotenv`].

use queue_worker_core::ConsumerConfig;
use queue_worker_runtime::{
    AzureServiceBusConfig, ProviderConfig, QueueName, ReceiverConfig, ServiceBusConnectionString,
};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Configuration failures; all of them stop the worker before it receives
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required configuration value '{key}' is not set")]
    Missing { key: String },

    #[error("Invalid value for '{key}': {message}")]
    Invalid { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to read .env file: {message}")]
    DotEnv { message: String },
}

/// Merge `.env` from the working directory into the process environment.
///
/// Returns the path that was loaded, or `None` when there is no `.env`.
/// Variables already present in the environment are not overridden.
pub fn load_dotenv() -> Result<Option<std::path::PathBuf>, ConfigError> {
    match dotenvy::dotenv() {
        Ok(path) => {
            debug!(path = %path.display(), "Loaded .env file");
            Ok(Some(path))
        }
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(ConfigError::DotEnv {
            message: e.to_string(),
        }),
    }
}

/// Raw settings as they appear in files and the environment
#[derive(Clone, Deserialize)]
pub struct WorkerSettings {
    #[serde(default)]
    pub servicebus_connection_string: Option<String>,

    #[serde(default)]
    pub queue_name: Option<String>,

    #[serde(default = "default_receive_timeout_seconds")]
    pub receive_timeout_seconds: u64,

    #[serde(default = "default_processing_delay_seconds")]
    pub processing_delay_seconds: u64,

    #[serde(default)]
    pub processing_timeout_seconds: Option<u64>,
}

/// Longest broker-side wait accepted for a single receive
pub const MAX_RECEIVE_TIMEOUT_SECONDS: u64 = 60 * 60;

fn default_receive_timeout_seconds() -> u64 {
    60
}

fn default_processing_delay_seconds() -> u64 {
    5
}

impl fmt::Debug for WorkerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSettings")
            .field(
                "servicebus_connection_string",
                &self.servicebus_connection_string.as_ref().map(|_| "<redacted>"),
            )
            .field("queue_name", &self.queue_name)
            .field("receive_timeout_seconds", &self.receive_timeout_seconds)
            .field("processing_delay_seconds", &self.processing_delay_seconds)
            .field("processing_timeout_seconds", &self.processing_timeout_seconds)
            .finish()
    }
}

impl WorkerSettings {
    /// Load settings from the optional file and the process environment
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_environment(config_file, None)
    }

    /// Load settings, reading environment values from `environment` instead
    /// of the process environment when it is given
    pub fn load_with_environment(
        config_file: Option<&Path>,
        environment: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_file {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let settings: WorkerSettings = builder
            .add_source(config::Environment::default().source(environment))
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Check required values and convert to the typed configuration
    pub fn validate(&self) -> Result<WorkerConfig, ConfigError> {
        let connection_string = required(
            "servicebus_connection_string",
            &self.servicebus_connection_string,
        )?;
        let queue_name = required("queue_name", &self.queue_name)?;

        // Surface malformed connection strings as configuration errors up front
        ServiceBusConnectionString::parse(connection_string).map_err(|e| {
            ConfigError::Invalid {
                key: "servicebus_connection_string".to_string(),
                message: e.to_string(),
            }
        })?;

        let queue_name =
            QueueName::new(queue_name.to_string()).map_err(|e| ConfigError::Invalid {
                key: "queue_name".to_string(),
                message: e.to_string(),
            })?;

        if !(1..=MAX_RECEIVE_TIMEOUT_SECONDS).contains(&self.receive_timeout_seconds) {
            return Err(ConfigError::Invalid {
                key: "receive_timeout_seconds".to_string(),
                message: format!("must be between 1 and {}", MAX_RECEIVE_TIMEOUT_SECONDS),
            });
        }

        if self.processing_timeout_seconds == Some(0) {
            return Err(ConfigError::Invalid {
                key: "processing_timeout_seconds".to_string(),
                message: "must be at least 1 when set".to_string(),
            });
        }

        Ok(WorkerConfig {
            receiver: ReceiverConfig::new(
                queue_name,
                ProviderConfig::AzureServiceBus(AzureServiceBusConfig::new(connection_string)),
            )
            .with_receive_timeout(Duration::from_secs(self.receive_timeout_seconds)),
            processing_delay: Duration::from_secs(self.processing_delay_seconds),
            consumer: ConsumerConfig {
                processing_timeout: self.processing_timeout_seconds.map(Duration::from_secs),
            },
        })
    }
}

/// Empty strings count as unset
fn required<'a>(key: &str, value: &'a Option<String>) -> Result<&'a str, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing {
            key: key.to_string(),
        }),
    }
}

/// Validated worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub receiver: ReceiverConfig,
    /// Simulated work per message
    pub processing_delay: Duration,
    pub consumer: ConsumerConfig,
}
