//! Azure Service Bus provider implementation using the HTTP REST API.
//!
//! Messages are received with peek-lock semantics: the broker locks the message
//! at the head of the queue and hands out a lock token, which is later used to
//! complete (delete) or abandon (unlock) the message.
//!
//! ## Authentication
//!
//! Requests carry a Shared Access Signature derived from the key in the
//! namespace connection string:
//!
//! ```text
//! SharedAccessSignature sr=<uri>&sig=<signature>&se=<expiry>&skn=<key name>
//! ```
//!
//! where `signature = base64(HMAC-SHA256(key, url_encode(uri) + "\n" + expiry))`.
//! Tokens are cached and regenerated shortly before they expire.
//!
//! ## Operations
//!
//! | Operation | Request | Success |
//! |---|---|---|
//! | Receive | `POST /{queue}/messages/head?timeout=N` | `201` message, `204` empty wait |
//! | Complete | `DELETE /{queue}/messages/{id}/{lock}` | `200` |
//! | Abandon | `PUT /{queue}/messages/{id}/{lock}` | `200` |
//!
//! ## Example
//!
//! ```no_run
//! use queue_worker_runtime::{
//!     AzureServiceBusConfig, ProviderConfig, QueueName, ReceiverConfig, ReceiverFactory,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ReceiverConfig::new(
//!     QueueName::new("orders".to_string())?,
//!     ProviderConfig::AzureServiceBus(AzureServiceBusConfig::new(
//!         "Endpoint=sb://my-ns.servicebus.windows.net/;SharedAccessKeyName=listen;SharedAccessKey=...",
//!     )),
//! );
//!
//! let receiver = ReceiverFactory::create_receiver(config).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{ConfigurationError, QueueError};
use crate::message::{
    Delivery, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp,
};
use crate::provider::{AzureServiceBusConfig, ProviderType};
use crate::receiver::{MessageSettler, QueueReceiver, ReceiveOutcome};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client as HttpClient, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

type HmacSha256 = Hmac<Sha256>;

const PROVIDER_NAME: &str = "AzureServiceBus";

/// Extra time on top of the broker-side wait before the HTTP request is abandoned
const RECEIVE_REQUEST_SLACK: Duration = Duration::from_secs(10);

/// Timeout for settlement requests
const SETTLE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Regenerate SAS tokens this many seconds before they expire
const SAS_RENEWAL_MARGIN_SECS: i64 = 300;

// ============================================================================
// Error Types
// ============================================================================

/// Azure Service Bus specific errors
#[derive(Debug, thiserror::Error)]
pub enum AzureError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Service Bus error: HTTP {status} - {message}")]
    ServiceBusError { status: u16, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Message lock lost: {0}")]
    MessageLockLost(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Malformed broker response: {0}")]
    SerializationError(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl AzureError {
    /// Map Azure error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::AuthenticationError(message) => QueueError::AuthenticationFailed { message },
            Self::NetworkError(message) => QueueError::ConnectionFailed { message },
            Self::ServiceBusError { status, message } => QueueError::ProviderError {
                provider: PROVIDER_NAME.to_string(),
                code: status.to_string(),
                message,
            },
            Self::QueueNotFound(queue_name) => QueueError::QueueNotFound { queue_name },
            Self::MessageLockLost(receipt) => QueueError::MessageNotFound { receipt },
            Self::ConfigurationError(message) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message })
            }
            Self::SerializationError(message) => QueueError::ProviderError {
                provider: PROVIDER_NAME.to_string(),
                code: "MalformedResponse".to_string(),
                message,
            },
            Self::Cancelled => QueueError::Cancelled,
        }
    }
}

// ============================================================================
// Connection String
// ============================================================================

/// Parsed Service Bus namespace connection string
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceBusConnectionString {
    endpoint: Url,
    shared_access_key_name: String,
    shared_access_key: String,
    entity_path: Option<String>,
}

impl ServiceBusConnectionString {
    /// Parse a `Key=Value;` connection string.
    ///
    /// `sb://` endpoints are addressed over `https://`; `http://` and
    /// `https://` endpoints are used unchanged.
    pub fn parse(s: &str) -> Result<Self, ConfigurationError> {
        let mut parts: HashMap<String, String> = HashMap::new();
        for segment in s.split(';').map(str::trim).filter(|seg| !seg.is_empty()) {
            let (key, value) =
                segment
                    .split_once('=')
                    .ok_or_else(|| ConfigurationError::Invalid {
                        message: "connection string segment is not Key=Value".to_string(),
                    })?;
            parts.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let required = |key: &str, name: &str| {
            parts
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| ConfigurationError::Missing {
                    key: name.to_string(),
                })
        };

        let raw_endpoint = required("endpoint", "Endpoint")?;
        let shared_access_key_name = required("sharedaccesskeyname", "SharedAccessKeyName")?;
        let shared_access_key = required("sharedaccesskey", "SharedAccessKey")?;
        let entity_path = parts.get("entitypath").filter(|v| !v.is_empty()).cloned();

        let http_endpoint = if let Some(rest) = raw_endpoint.strip_prefix("sb://") {
            format!("https://{}", rest)
        } else {
            raw_endpoint.clone()
        };
        let endpoint = Url::parse(&http_endpoint).map_err(|e| ConfigurationError::Invalid {
            message: format!("invalid Endpoint '{}': {}", http_endpoint, e),
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigurationError::Invalid {
                message: format!("unsupported Endpoint scheme '{}'", endpoint.scheme()),
            });
        }

        Ok(Self {
            endpoint,
            shared_access_key_name,
            shared_access_key,
            entity_path,
        })
    }

    /// Namespace base address without a trailing slash
    pub fn base_url(&self) -> String {
        self.endpoint.as_str().trim_end_matches('/').to_string()
    }

    pub fn shared_access_key_name(&self) -> &str {
        &self.shared_access_key_name
    }

    pub fn entity_path(&self) -> Option<&str> {
        self.entity_path.as_deref()
    }

    /// Resource the shared access key is scoped to
    fn resource_uri(&self) -> String {
        match &self.entity_path {
            Some(entity) => format!("{}/{}", self.base_url(), entity),
            None => self.base_url(),
        }
    }
}

impl FromStr for ServiceBusConnectionString {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for ServiceBusConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusConnectionString")
            .field("endpoint", &self.endpoint.as_str())
            .field("shared_access_key_name", &self.shared_access_key_name)
            .field("shared_access_key", &"<redacted>")
            .field("entity_path", &self.entity_path)
            .finish()
    }
}

// ============================================================================
// Shared Access Signature
// ============================================================================

struct CachedToken {
    value: String,
    expires_at: i64,
}

/// Generates and caches SAS authorization header values
struct SasTokenProvider {
    resource_uri: String,
    key_name: String,
    key: String,
    ttl: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl SasTokenProvider {
    fn new(connection: &ServiceBusConnectionString, ttl: Duration) -> Self {
        Self {
            resource_uri: connection.resource_uri(),
            key_name: connection.shared_access_key_name.clone(),
            key: connection.shared_access_key.clone(),
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Current authorization header value, regenerated near expiry
    fn authorization(&self) -> Result<String, AzureError> {
        let now = Utc::now().timestamp();
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(token) = cached.as_ref() {
            if token.expires_at - SAS_RENEWAL_MARGIN_SECS > now {
                return Ok(token.value.clone());
            }
        }

        let ttl_secs = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(ttl_secs);
        let value = generate_sas_token(&self.resource_uri, &self.key_name, &self.key, expires_at)?;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at,
        });

        Ok(value)
    }
}

/// Build a `SharedAccessSignature` token for a resource
pub fn generate_sas_token(
    resource_uri: &str,
    key_name: &str,
    key: &str,
    expires_at: i64,
) -> Result<String, AzureError> {
    let encoded_uri = urlencoding::encode(resource_uri);
    let string_to_sign = format!("{}\n{}", encoded_uri, expires_at);

    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| AzureError::ConfigurationError(format!("invalid SharedAccessKey: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
        encoded_uri,
        urlencoding::encode(&signature),
        expires_at,
        key_name
    ))
}

// ============================================================================
// Broker Properties
// ============================================================================

/// Message metadata sent by the broker in the `BrokerProperties` header
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BrokerProperties {
    message_id: String,
    lock_token: String,
    #[serde(default)]
    sequence_number: Option<u64>,
    #[serde(default)]
    delivery_count: u32,
    #[serde(default)]
    enqueued_time_utc: Option<String>,
    #[serde(default)]
    locked_until_utc: Option<String>,
}

// ============================================================================
// HTTP Client
// ============================================================================

/// Authenticated REST client bound to one namespace
struct ServiceBusClient {
    http: HttpClient,
    base_url: String,
    sas: SasTokenProvider,
}

impl ServiceBusClient {
    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, AzureError> {
        Ok(self
            .http
            .request(method, url)
            .header(AUTHORIZATION, self.sas.authorization()?))
    }

    fn message_url(&self, queue: &str, receipt: &ReceiptHandle) -> String {
        format!(
            "{}/{}/messages/{}/{}",
            self.base_url,
            queue,
            urlencoding::encode(receipt.message_id().as_str()),
            urlencoding::encode(receipt.handle())
        )
    }

    /// Send a request, aborting it if the token is cancelled first
    async fn send(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Response, AzureError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AzureError::Cancelled),
            result = request.send() => result.map_err(|e| {
                if e.is_timeout() {
                    AzureError::NetworkError(format!("Request timeout: {}", e))
                } else if e.is_connect() {
                    AzureError::NetworkError(format!("Connection failed: {}", e))
                } else {
                    AzureError::NetworkError(format!("HTTP request failed: {}", e))
                }
            }),
        }
    }

    async fn settle(
        &self,
        method: Method,
        queue: &str,
        receipt: &ReceiptHandle,
        cancel: &CancellationToken,
    ) -> Result<(), AzureError> {
        let url = self.message_url(queue, receipt);
        let request = self
            .request(method, &url)?
            .header(CONTENT_LENGTH, 0)
            .timeout(SETTLE_REQUEST_TIMEOUT);

        let response = self.send(request, cancel).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                AzureError::MessageLockLost(receipt.handle().to_string())
            }
            _ => status_error(status, queue, body),
        })
    }
}

/// Map a non-success status to an error
fn status_error(status: StatusCode, queue: &str, body: String) -> AzureError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AzureError::AuthenticationError(
            format!("HTTP {}: {}", status.as_u16(), body),
        ),
        StatusCode::NOT_FOUND => AzureError::QueueNotFound(queue.to_string()),
        _ => AzureError::ServiceBusError {
            status: status.as_u16(),
            message: body,
        },
    }
}

// ============================================================================
// Settlement
// ============================================================================

/// Settles messages locked by one receiver
struct AzureSettler {
    client: Arc<ServiceBusClient>,
    queue_name: QueueName,
}

#[async_trait]
impl MessageSettler for AzureSettler {
    async fn complete(
        &self,
        receipt: &ReceiptHandle,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        debug!(message_id = %receipt.message_id(), "Completing message");
        self.client
            .settle(Method::DELETE, self.queue_name.as_str(), receipt, cancel)
            .await
            .map_err(AzureError::to_queue_error)
    }

    async fn abandon(
        &self,
        receipt: &ReceiptHandle,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        debug!(message_id = %receipt.message_id(), "Abandoning message");
        self.client
            .settle(Method::PUT, self.queue_name.as_str(), receipt, cancel)
            .await
            .map_err(AzureError::to_queue_error)
    }
}

// ============================================================================
// Azure Service Bus Provider
// ============================================================================

/// Azure Service Bus queue receiver.
///
/// Holds a single HTTP session to the namespace; one receive loop per instance.
pub struct AzureServiceBusProvider {
    client: Arc<ServiceBusClient>,
    settler: Arc<AzureSettler>,
    queue_name: QueueName,
    receive_timeout: Duration,
}

impl AzureServiceBusProvider {
    /// Create new Azure Service Bus receiver
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The connection string is malformed or incomplete
    /// - The HTTP client cannot be created
    pub fn new(
        config: AzureServiceBusConfig,
        queue_name: QueueName,
        receive_timeout: Duration,
    ) -> Result<Self, AzureError> {
        let connection = ServiceBusConnectionString::parse(&config.connection_string)
            .map_err(|e| AzureError::ConfigurationError(e.to_string()))?;

        if let Some(entity) = connection.entity_path() {
            if entity != queue_name.as_str() {
                warn!(
                    entity_path = %entity,
                    queue = %queue_name,
                    "Connection string EntityPath differs from the configured queue name"
                );
            }
        }

        let http = HttpClient::builder()
            .build()
            .map_err(|e| AzureError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        let client = Arc::new(ServiceBusClient {
            http,
            base_url: connection.base_url(),
            sas: SasTokenProvider::new(&connection, config.sas_token_ttl),
        });
        let settler = Arc::new(AzureSettler {
            client: Arc::clone(&client),
            queue_name: queue_name.clone(),
        });

        Ok(Self {
            client,
            settler,
            queue_name,
            receive_timeout,
        })
    }

    async fn try_receive(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>, AzureError> {
        let wait_secs = self.receive_timeout.as_secs().max(1);
        let url = format!(
            "{}/{}/messages/head?timeout={}",
            self.client.base_url, self.queue_name, wait_secs
        );
        let request = self
            .client
            .request(Method::POST, &url)?
            .header(CONTENT_LENGTH, 0)
            .timeout(Duration::from_secs(wait_secs).saturating_add(RECEIVE_REQUEST_SLACK));

        let response = self.client.send(request, cancel).await?;
        let status = response.status();

        match status {
            StatusCode::CREATED | StatusCode::OK => {
                let received = self.read_message(response).await?;
                let settler: Arc<dyn MessageSettler> = self.settler.clone();
                Ok(Some(Delivery::new(received, settler)))
            }
            StatusCode::NO_CONTENT => Ok(None),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(status_error(status, self.queue_name.as_str(), body))
            }
        }
    }

    async fn read_message(&self, response: Response) -> Result<ReceivedMessage, AzureError> {
        let raw_properties = response
            .headers()
            .get("BrokerProperties")
            .ok_or_else(|| {
                AzureError::SerializationError("missing BrokerProperties header".to_string())
            })?
            .to_str()
            .map_err(|e| AzureError::SerializationError(e.to_string()))?
            .to_string();
        let broker: BrokerProperties = serde_json::from_str(&raw_properties)
            .map_err(|e| AzureError::SerializationError(format!("BrokerProperties: {}", e)))?;

        let mut properties = HashMap::new();
        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            properties.insert("content-type".to_string(), content_type.to_string());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AzureError::NetworkError(format!("Failed to read message body: {}", e)))?;

        let message_id = MessageId::from_str(&broker.message_id)
            .map_err(|e| AzureError::SerializationError(e.to_string()))?;
        let locked_until = broker
            .locked_until_utc
            .as_deref()
            .and_then(Timestamp::parse_http_date)
            .unwrap_or_else(Timestamp::now);

        Ok(ReceivedMessage {
            receipt_handle: ReceiptHandle::new(
                message_id.clone(),
                broker.lock_token,
                locked_until,
                ProviderType::AzureServiceBus,
            ),
            message_id,
            body,
            properties,
            delivery_count: broker.delivery_count,
            sequence_number: broker.sequence_number,
            enqueued_at: broker
                .enqueued_time_utc
                .as_deref()
                .and_then(Timestamp::parse_http_date),
        })
    }
}

#[async_trait]
impl QueueReceiver for AzureServiceBusProvider {
    async fn receive_one(&self, cancel: &CancellationToken) -> ReceiveOutcome {
        ReceiveOutcome::classify(
            self.try_receive(cancel)
                .await
                .map_err(AzureError::to_queue_error),
        )
    }

    fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureServiceBus
    }
}
