//! Tests for the Azure Service Bus provider.

use super::*;
use wiremock::matchers::{header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "c2VjcmV0LWtleQ==";

fn queue() -> QueueName {
    QueueName::new("orders".to_string()).unwrap()
}

fn connection_string_for(server: &MockServer) -> String {
    format!(
        "Endpoint={}/;SharedAccessKeyName=listen;SharedAccessKey={}",
        server.uri(),
        KEY
    )
}

fn provider_for(server: &MockServer, receive_timeout: Duration) -> AzureServiceBusProvider {
    AzureServiceBusProvider::new(
        AzureServiceBusConfig::new(connection_string_for(server)),
        queue(),
        receive_timeout,
    )
    .expect("provider should build from a valid connection string")
}

fn broker_properties(message_id: &str, lock_token: &str, delivery_count: u32) -> String {
    serde_json::json!({
        "MessageId": message_id,
        "LockToken": lock_token,
        "SequenceNumber": 7,
        "DeliveryCount": delivery_count,
        "EnqueuedTimeUtc": "Sun, 06 Nov 1994 08:49:37 GMT",
        "LockedUntilUtc": "Sun, 06 Nov 1994 08:50:37 GMT",
    })
    .to_string()
}

fn expect_delivery(outcome: ReceiveOutcome) -> Delivery {
    match outcome {
        ReceiveOutcome::Delivered(delivery) => delivery,
        other => panic!("Expected a delivery, got: {:?}", other),
    }
}

// ============================================================================
// Connection String Tests
// ============================================================================

mod connection_string {
    use super::*;

    #[test]
    fn test_parse_namespace_connection_string() {
        let parsed = ServiceBusConnectionString::parse(
            "Endpoint=sb://my-ns.servicebus.windows.net/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=abc+def/ghi=",
        )
        .unwrap();

        assert_eq!(parsed.base_url(), "https://my-ns.servicebus.windows.net");
        assert_eq!(parsed.shared_access_key_name(), "RootManageSharedAccessKey");
        assert_eq!(parsed.entity_path(), None);
        assert_eq!(parsed.resource_uri(), "https://my-ns.servicebus.windows.net");
    }

    #[test]
    fn test_key_keeps_trailing_padding() {
        let parsed = ServiceBusConnectionString::parse(
            "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=listen;SharedAccessKey=YWJj==",
        )
        .unwrap();

        assert_eq!(parsed.shared_access_key, "YWJj==");
    }

    #[test]
    fn test_entity_path_scopes_the_resource_uri() {
        let parsed = ServiceBusConnectionString::parse(
            "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=listen;SharedAccessKey=YWJj;EntityPath=orders",
        )
        .unwrap();

        assert_eq!(parsed.entity_path(), Some("orders"));
        assert_eq!(parsed.resource_uri(), "https://ns.servicebus.windows.net/orders");
    }

    #[test]
    fn test_keys_are_case_insensitive_and_order_free() {
        let parsed: ServiceBusConnectionString =
            "sharedaccesskey=YWJj; ENDPOINT=https://localhost:5300/ ;SharedAccessKeyName=listen;"
                .parse()
                .unwrap();

        assert_eq!(parsed.base_url(), "https://localhost:5300");
    }

    #[test]
    fn test_missing_key_is_reported_by_name() {
        let result = ServiceBusConnectionString::parse(
            "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=listen",
        );

        match result {
            Err(ConfigurationError::Missing { key }) => assert_eq!(key, "SharedAccessKey"),
            other => panic!("Expected Missing error, got: {:?}", other),
        }
    }

    #[test]
    fn test_segment_without_separator_is_invalid() {
        let result = ServiceBusConnectionString::parse("Endpoint=sb://ns/;garbage");

        assert!(matches!(result, Err(ConfigurationError::Invalid { .. })));
    }

    #[test]
    fn test_unsupported_scheme_is_invalid() {
        let result = ServiceBusConnectionString::parse(
            "Endpoint=amqp://ns.servicebus.windows.net/;SharedAccessKeyName=listen;SharedAccessKey=YWJj",
        );

        assert!(matches!(result, Err(ConfigurationError::Invalid { .. })));
    }

    #[test]
    fn test_debug_output_redacts_key() {
        let parsed = ServiceBusConnectionString::parse(
            "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=listen;SharedAccessKey=super-secret",
        )
        .unwrap();

        let rendered = format!("{:?}", parsed);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("listen"));
    }
}

// ============================================================================
// Shared Access Signature Tests
// ============================================================================

mod sas_token {
    use super::*;

    #[test]
    fn test_token_layout() {
        let token = generate_sas_token(
            "https://ns.servicebus.windows.net/orders",
            "listen",
            KEY,
            1_700_000_000,
        )
        .unwrap();

        assert!(token.starts_with(
            "SharedAccessSignature sr=https%3A%2F%2Fns.servicebus.windows.net%2Forders&sig="
        ));
        assert!(token.ends_with("&se=1700000000&skn=listen"));
    }

    #[test]
    fn test_signature_is_a_url_encoded_sha256_mac() {
        let token = generate_sas_token("https://ns/orders", "listen", KEY, 1_700_000_000).unwrap();

        let sig = token
            .split('&')
            .find_map(|part| part.strip_prefix("sig="))
            .expect("token should carry a signature");
        let decoded_sig = urlencoding::decode(sig).unwrap();
        let raw = STANDARD.decode(decoded_sig.as_bytes()).unwrap();

        assert_eq!(raw.len(), 32, "HMAC-SHA256 output is 32 bytes");
    }

    #[test]
    fn test_signature_depends_on_key_and_expiry() {
        let base = generate_sas_token("https://ns/orders", "listen", KEY, 1).unwrap();
        let other_key = generate_sas_token("https://ns/orders", "listen", "b3RoZXI=", 1).unwrap();
        let other_expiry = generate_sas_token("https://ns/orders", "listen", KEY, 2).unwrap();

        assert_ne!(base, other_key);
        assert_ne!(base, other_expiry);
    }

    #[test]
    fn test_provider_caches_token_until_near_expiry() {
        let connection = ServiceBusConnectionString::parse(
            "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=listen;SharedAccessKey=YWJj",
        )
        .unwrap();
        let provider = SasTokenProvider::new(&connection, Duration::from_secs(3600));

        let first = provider.authorization().unwrap();
        let second = provider.authorization().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_short_lived_tokens_are_regenerated() {
        let connection = ServiceBusConnectionString::parse(
            "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=listen;SharedAccessKey=YWJj",
        )
        .unwrap();
        // A TTL inside the renewal margin is never served from the cache.
        let provider = SasTokenProvider::new(&connection, Duration::from_secs(10));

        provider.authorization().unwrap();
        let cached_expiry = provider.cached.lock().unwrap().as_ref().unwrap().expires_at;
        let now = Utc::now().timestamp();

        assert!(cached_expiry - SAS_RENEWAL_MARGIN_SECS <= now);
    }

    #[test]
    fn test_oversized_ttl_saturates_expiry() {
        let connection = ServiceBusConnectionString::parse(
            "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=listen;SharedAccessKey=YWJj",
        )
        .unwrap();
        let provider = SasTokenProvider::new(&connection, Duration::MAX);

        let token = provider.authorization().unwrap();
        let cached_expiry = provider.cached.lock().unwrap().as_ref().unwrap().expires_at;

        assert_eq!(cached_expiry, i64::MAX);
        assert!(token.contains(&format!("&se={}&", i64::MAX)));
    }
}

// ============================================================================
// Receive Tests
// ============================================================================

mod receive {
    use super::*;

    #[tokio::test]
    async fn test_created_response_becomes_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/messages/head"))
            .and(query_param("timeout", "60"))
            .and(header_regex("Authorization", "^SharedAccessSignature sr=.+&sig=.+&se=\\d+&skn=listen$"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("BrokerProperties", broker_properties("msg-1", "lock-1", 1).as_str())
                    .insert_header("Content-Type", "text/plain")
                    .set_body_string("A"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server, Duration::from_secs(60));
        let delivery = expect_delivery(provider.receive_one(&CancellationToken::new()).await);

        assert_eq!(delivery.body(), &bytes::Bytes::from("A"));
        assert_eq!(delivery.message_id().as_str(), "msg-1");
        let message = delivery.message();
        assert_eq!(message.receipt_handle.handle(), "lock-1");
        assert_eq!(message.receipt_handle.provider_type(), ProviderType::AzureServiceBus);
        assert_eq!(message.delivery_count, 1);
        assert_eq!(message.sequence_number, Some(7));
        assert!(message.enqueued_at.is_some());
        assert_eq!(
            message.properties.get("content-type").map(String::as_str),
            Some("text/plain")
        );

        // Leave the lock to expire; the drop only logs.
        drop(delivery);
    }

    #[tokio::test]
    async fn test_no_content_is_a_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/messages/head"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let provider = provider_for(&server, Duration::from_secs(5));
        let outcome = provider.receive_one(&CancellationToken::new()).await;

        assert!(matches!(outcome, ReceiveOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_sub_second_wait_is_rounded_up_to_one_second() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/messages/head"))
            .and(query_param("timeout", "1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server, Duration::from_millis(200));

        assert!(matches!(
            provider.receive_one(&CancellationToken::new()).await,
            ReceiveOutcome::TimedOut
        ));
    }

    #[tokio::test]
    async fn test_unbounded_receive_timeout_does_not_overflow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/messages/head"))
            .and(query_param("timeout", u64::MAX.to_string().as_str()))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server, Duration::MAX);

        assert!(matches!(
            provider.receive_one(&CancellationToken::new()).await,
            ReceiveOutcome::TimedOut
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/messages/head"))
            .respond_with(ResponseTemplate::new(401).set_body_string("InvalidSignature"))
            .mount(&server)
            .await;

        let provider = provider_for(&server, Duration::from_secs(5));

        match provider.receive_one(&CancellationToken::new()).await {
            ReceiveOutcome::Fatal(QueueError::AuthenticationFailed { message }) => {
                assert!(message.contains("InvalidSignature"));
            }
            other => panic!("Expected AuthenticationFailed, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_queue_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/messages/head"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = provider_for(&server, Duration::from_secs(5));

        match provider.receive_one(&CancellationToken::new()).await {
            ReceiveOutcome::Fatal(QueueError::QueueNotFound { queue_name }) => {
                assert_eq!(queue_name, "orders");
            }
            other => panic!("Expected QueueNotFound, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_fatal_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/messages/head"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let provider = provider_for(&server, Duration::from_secs(5));

        match provider.receive_one(&CancellationToken::new()).await {
            ReceiveOutcome::Fatal(QueueError::ProviderError { code, message, .. }) => {
                assert_eq!(code, "500");
                assert_eq!(message, "boom");
            }
            other => panic!("Expected ProviderError, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_message_without_broker_properties_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/messages/head"))
            .respond_with(ResponseTemplate::new(201).set_body_string("A"))
            .mount(&server)
            .await;

        let provider = provider_for(&server, Duration::from_secs(5));

        match provider.receive_one(&CancellationToken::new()).await {
            ReceiveOutcome::Fatal(QueueError::ProviderError { code, .. }) => {
                assert_eq!(code, "MalformedResponse");
            }
            other => panic!("Expected malformed response error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_namespace_is_connection_failure() {
        let provider = AzureServiceBusProvider::new(
            AzureServiceBusConfig::new(
                "Endpoint=http://127.0.0.1:1/;SharedAccessKeyName=listen;SharedAccessKey=YWJj",
            ),
            queue(),
            Duration::from_secs(1),
        )
        .unwrap();

        match provider.receive_one(&CancellationToken::new()).await {
            ReceiveOutcome::Fatal(QueueError::ConnectionFailed { .. }) => {}
            other => panic!("Expected ConnectionFailed, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_receive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/messages/head"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let provider = provider_for(&server, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = provider.receive_one(&cancel).await;

        assert!(matches!(outcome, ReceiveOutcome::Fatal(QueueError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

// ============================================================================
// Settlement Tests
// ============================================================================

mod settlement {
    use super::*;

    async fn mount_message(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/orders/messages/head"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("BrokerProperties", broker_properties("msg-1", "lock-1", 1).as_str())
                    .set_body_string("A"),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_complete_deletes_locked_message() {
        let server = MockServer::start().await;
        mount_message(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/orders/messages/msg-1/lock-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let delivery = expect_delivery(provider.receive_one(&cancel).await);

        delivery
            .complete(&cancel)
            .await
            .expect("complete should succeed");
    }

    #[tokio::test]
    async fn test_abandon_unlocks_message() {
        let server = MockServer::start().await;
        mount_message(&server).await;
        Mock::given(method("PUT"))
            .and(path("/orders/messages/msg-1/lock-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let delivery = expect_delivery(provider.receive_one(&cancel).await);

        delivery
            .abandon(&cancel)
            .await
            .expect("abandon should succeed");
    }

    #[tokio::test]
    async fn test_complete_after_lock_loss_reports_message_not_found() {
        let server = MockServer::start().await;
        mount_message(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/orders/messages/msg-1/lock-1"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let provider = provider_for(&server, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let delivery = expect_delivery(provider.receive_one(&cancel).await);

        match delivery.complete(&cancel).await {
            Err(QueueError::MessageNotFound { receipt }) => assert_eq!(receipt, "lock-1"),
            other => panic!("Expected MessageNotFound, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_with_rejected_credentials_is_authentication_failure() {
        let server = MockServer::start().await;
        mount_message(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/orders/messages/msg-1/lock-1"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let provider = provider_for(&server, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let delivery = expect_delivery(provider.receive_one(&cancel).await);

        assert!(matches!(
            delivery.complete(&cancel).await,
            Err(QueueError::AuthenticationFailed { .. })
        ));
    }
}

// ============================================================================
// Construction Tests
// ============================================================================

#[test]
fn test_invalid_connection_string_fails_construction() {
    let result = AzureServiceBusProvider::new(
        AzureServiceBusConfig::new("not a connection string"),
        queue(),
        Duration::from_secs(60),
    );

    assert!(matches!(result, Err(AzureError::ConfigurationError(_))));
}

#[test]
fn test_error_mapping_to_queue_error() {
    assert!(matches!(
        AzureError::Cancelled.to_queue_error(),
        QueueError::Cancelled
    ));
    assert!(matches!(
        AzureError::NetworkError("reset".to_string()).to_queue_error(),
        QueueError::ConnectionFailed { .. }
    ));
    assert!(matches!(
        AzureError::MessageLockLost("lock".to_string()).to_queue_error(),
        QueueError::MessageNotFound { .. }
    ));
}
