use coldstored::core::errors::{ColdStoreError, ErrorKind};
use std::time::Duration;

#[test]
fn test_validation_class() {
    assert_eq!(
        ColdStoreError::Validation("bad version".into()).kind(),
        ErrorKind::Validation
    );
    assert_eq!(
        ColdStoreError::PathEscape("../x".into()).kind(),
        ErrorKind::Validation
    );
}

#[test]
fn test_auth_class() {
    assert_eq!(ColdStoreError::AuthRequired.kind(), ErrorKind::Auth);
    assert_eq!(ColdStoreError::TokenExpired.kind(), ErrorKind::Auth);
    assert_eq!(
        ColdStoreError::TokenInvalid("unknown token".into()).kind(),
        ErrorKind::Auth
    );
    assert_eq!(
        ColdStoreError::Forbidden("other user".into()).kind(),
        ErrorKind::Auth
    );
}

#[test]
fn test_busy_class_covers_rate_limit() {
    assert_eq!(
        ColdStoreError::Busy("node 3".into()).kind(),
        ErrorKind::Busy
    );
    assert_eq!(
        ColdStoreError::RateLimited(Duration::from_secs(1)).kind(),
        ErrorKind::Busy
    );
}

#[test]
fn test_transient_remote_class_is_retryable() {
    let ssh_timeout = ColdStoreError::Timeout("ssh".into());
    let s3_hiccup = ColdStoreError::ObjectStore("503".into());
    let refused = ColdStoreError::ConnectionRefused("10.0.0.9:22".into());
    for error in [&ssh_timeout, &s3_hiccup, &refused] {
        assert_eq!(error.kind(), ErrorKind::TransientRemote);
        assert!(error.is_transient());
    }
    assert!(!ColdStoreError::AuthRequired.is_transient());
}

#[test]
fn test_partial_fanout_message_and_class() {
    let error = ColdStoreError::PartialFanout { failed: 2, total: 3 };
    assert_eq!(error.kind(), ErrorKind::PartialFanout);
    assert_eq!(error.to_string(), "too many nodes failed (2/3)");
}

#[test]
fn test_destructive_failure_carries_recovery_key() {
    let error = ColdStoreError::RestoreFailed {
        message: "psql reported errors".into(),
        pre_restore_key: "pre-restore/2026/08/01/cold_prerestore_20260801_101542.sql".into(),
    };
    assert_eq!(error.kind(), ErrorKind::DestructiveFailure);
}

#[test]
fn test_rate_limited_wait_formatting() {
    assert_eq!(
        ColdStoreError::RateLimited(Duration::from_secs(1)).to_string(),
        "rate limited, wait 00:00:01"
    );
    assert_eq!(
        ColdStoreError::RateLimited(Duration::from_secs(299)).to_string(),
        "rate limited, wait 00:04:59"
    );
}

#[test]
fn test_unknown_class_catches_the_rest() {
    assert_eq!(
        ColdStoreError::Internal("boom".into()).kind(),
        ErrorKind::Unknown
    );
    assert_eq!(
        ColdStoreError::Database("connection reset".into()).kind(),
        ErrorKind::Unknown
    );
}
