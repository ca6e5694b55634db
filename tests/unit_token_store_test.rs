use coldstored::core::errors::ColdStoreError;
use coldstored::core::restore::tokens::{RestoreTokenStore, TOKEN_TTL};
use coldstored::core::snapshot::SnapshotClass;
use std::time::{Duration, Instant};

const KEY: &str = "base/2026/08/01/10/cold_db_20260801_101500.sql";

#[test]
fn test_token_is_128_bit_hex() {
    let store = RestoreTokenStore::default();
    let token = store.issue(KEY, SnapshotClass::Cloud, "u1").unwrap();
    assert_eq!(token.token.len(), 32);
    assert!(token.token.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_token_single_use() {
    let store = RestoreTokenStore::default();
    let token = store.issue(KEY, SnapshotClass::Cloud, "u1").unwrap();
    store
        .consume(&token.token, KEY, SnapshotClass::Cloud, "u1")
        .unwrap();
    let err = store
        .consume(&token.token, KEY, SnapshotClass::Cloud, "u1")
        .unwrap_err();
    assert!(matches!(err, ColdStoreError::TokenInvalid(_)));
}

#[test]
fn test_token_accepted_one_second_before_expiry() {
    let store = RestoreTokenStore::default();
    let issued = Instant::now();
    let token = store
        .issue_at(KEY, SnapshotClass::Cloud, "u1", issued)
        .unwrap();
    let just_in_time = issued + TOKEN_TTL - Duration::from_secs(1);
    store
        .consume_at(&token.token, KEY, SnapshotClass::Cloud, "u1", just_in_time)
        .unwrap();
}

#[test]
fn test_token_rejected_after_expiry() {
    let store = RestoreTokenStore::default();
    let issued = Instant::now();
    let token = store
        .issue_at(KEY, SnapshotClass::Cloud, "u1", issued)
        .unwrap();
    let too_late = issued + TOKEN_TTL + Duration::from_secs(1);
    let err = store
        .consume_at(&token.token, KEY, SnapshotClass::Cloud, "u1", too_late)
        .unwrap_err();
    assert!(matches!(err, ColdStoreError::TokenExpired));
    // Expiry consumed the entry.
    assert_eq!(store.pending(), 0);
}

#[test]
fn test_token_bound_to_key_user_and_source() {
    let store = RestoreTokenStore::default();

    let token = store.issue(KEY, SnapshotClass::Cloud, "u1").unwrap();
    let err = store
        .consume(&token.token, "base/other.sql", SnapshotClass::Cloud, "u1")
        .unwrap_err();
    assert!(matches!(err, ColdStoreError::TokenInvalid(_)));

    let err = store
        .consume(&token.token, KEY, SnapshotClass::Cloud, "u2")
        .unwrap_err();
    assert!(matches!(err, ColdStoreError::Forbidden(_)));

    let err = store
        .consume(&token.token, KEY, SnapshotClass::Local, "u1")
        .unwrap_err();
    assert!(matches!(err, ColdStoreError::TokenInvalid(_)));

    // A failed claim does not consume the token.
    store
        .consume(&token.token, KEY, SnapshotClass::Cloud, "u1")
        .unwrap();
}

#[test]
fn test_janitor_sweeps_only_expired() {
    let store = RestoreTokenStore::default();
    let issued = Instant::now();
    store
        .issue_at(KEY, SnapshotClass::Cloud, "u1", issued)
        .unwrap();
    store
        .issue_at(KEY, SnapshotClass::Local, "u2", issued + TOKEN_TTL)
        .unwrap();

    let swept = store.sweep_expired_at(issued + TOKEN_TTL + Duration::from_secs(1));
    assert_eq!(swept, 1);
    assert_eq!(store.pending(), 1);
}
