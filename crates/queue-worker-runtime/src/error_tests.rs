//! Tests for error types.

use super::*;

#[test]
fn test_only_timeout_is_a_receive_timeout() {
    assert!(QueueError::Timeout {
        duration: Duration::from_secs(60),
    }
    .is_receive_timeout());

    assert!(!QueueError::Cancelled.is_receive_timeout());
    assert!(!QueueError::ConnectionFailed {
        message: "reset by peer".to_string(),
    }
    .is_receive_timeout());
    assert!(!QueueError::ProviderError {
        provider: "AzureServiceBus".to_string(),
        code: "500".to_string(),
        message: "internal".to_string(),
    }
    .is_receive_timeout());
}

#[test]
fn test_cancelled_detection() {
    assert!(QueueError::Cancelled.is_cancelled());
    assert!(!QueueError::AuthenticationFailed {
        message: "bad key".to_string(),
    }
    .is_cancelled());
}

#[test]
fn test_error_transience() {
    assert!(QueueError::ConnectionFailed {
        message: "network error".to_string(),
    }
    .is_transient());

    assert!(!QueueError::QueueNotFound {
        queue_name: "orders".to_string(),
    }
    .is_transient());

    assert!(!QueueError::AuthenticationFailed {
        message: "bad signature".to_string(),
    }
    .is_transient());

    assert!(!QueueError::from(ConfigurationError::Missing {
        key: "queue_name".to_string(),
    })
    .is_transient());
}

#[test]
fn test_error_messages_name_the_cause() {
    let err = QueueError::from(ConfigurationError::Missing {
        key: "SharedAccessKey".to_string(),
    });
    assert_eq!(
        err.to_string(),
        "Configuration error: Missing required configuration: SharedAccessKey"
    );

    let err = QueueError::MessageNotFound {
        receipt: "lock-1".to_string(),
    };
    assert!(err.to_string().contains("lock-1"));
}
