// src/core/restore/tokens.rs

//! Single-use, time-bound, user-bound confirmation tokens for destructive
//! restores. Kept in memory only; a process restart voids all pending
//! confirmations.

use crate::core::errors::ColdStoreError;
use crate::core::snapshot::SnapshotClass;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tokens expire five minutes after issue.
pub const TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct ConfirmationToken {
    pub token: String,
    pub snapshot_key: String,
    pub source: SnapshotClass,
    pub user_id: String,
    pub issued_at: Instant,
}

impl ConfirmationToken {
    fn expired_at(&self, now: Instant) -> bool {
        now.duration_since(self.issued_at) >= TOKEN_TTL
    }

    pub fn seconds_remaining_at(&self, now: Instant) -> u64 {
        TOKEN_TTL
            .saturating_sub(now.duration_since(self.issued_at))
            .as_secs()
    }
}

/// The pending-token map, guarded by a reader/writer lock. A janitor task
/// sweeps expired entries periodically.
#[derive(Debug, Default)]
pub struct RestoreTokenStore {
    tokens: RwLock<HashMap<String, ConfirmationToken>>,
}

impl RestoreTokenStore {
    /// Issues a fresh 128-bit random token bound to (key, source, user).
    pub fn issue(
        &self,
        snapshot_key: &str,
        source: SnapshotClass,
        user_id: &str,
    ) -> Result<ConfirmationToken, ColdStoreError> {
        self.issue_at(snapshot_key, source, user_id, Instant::now())
    }

    pub fn issue_at(
        &self,
        snapshot_key: &str,
        source: SnapshotClass,
        user_id: &str,
        now: Instant,
    ) -> Result<ConfirmationToken, ColdStoreError> {
        let mut raw = [0u8; 16];
        getrandom::fill(&mut raw)
            .map_err(|e| ColdStoreError::Internal(format!("token generation: {e}")))?;
        let token = ConfirmationToken {
            token: hex::encode(raw),
            snapshot_key: snapshot_key.to_string(),
            source,
            user_id: user_id.to_string(),
            issued_at: now,
        };
        self.tokens
            .write()
            .insert(token.token.clone(), token.clone());
        Ok(token)
    }

    /// Validates a token against the caller's claims and consumes it on
    /// success. No token is ever accepted twice.
    pub fn consume(
        &self,
        token: &str,
        snapshot_key: &str,
        source: SnapshotClass,
        user_id: &str,
    ) -> Result<(), ColdStoreError> {
        self.consume_at(token, snapshot_key, source, user_id, Instant::now())
    }

    pub fn consume_at(
        &self,
        token: &str,
        snapshot_key: &str,
        source: SnapshotClass,
        user_id: &str,
        now: Instant,
    ) -> Result<(), ColdStoreError> {
        let mut tokens = self.tokens.write();
        let entry = tokens
            .get(token)
            .ok_or_else(|| ColdStoreError::TokenInvalid("unknown token".to_string()))?;

        if entry.expired_at(now) {
            tokens.remove(token);
            return Err(ColdStoreError::TokenExpired);
        }
        if entry.snapshot_key != snapshot_key {
            return Err(ColdStoreError::TokenInvalid(
                "token was issued for a different snapshot".to_string(),
            ));
        }
        if entry.user_id != user_id {
            return Err(ColdStoreError::Forbidden(
                "token belongs to another user".to_string(),
            ));
        }
        if entry.source != source {
            return Err(ColdStoreError::TokenInvalid(
                "token was issued for a different source".to_string(),
            ));
        }

        tokens.remove(token);
        Ok(())
    }

    /// Removes every expired entry; returns how many were swept.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, entry| !entry.expired_at(now));
        before - tokens.len()
    }

    pub fn pending(&self) -> usize {
        self.tokens.read().len()
    }
}
