// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum ColdStoreError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Database Error: {0}")]
    Database(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid confirmation token: {0}")]
    TokenInvalid(String),

    #[error("token expired")]
    TokenExpired,

    #[error("{0} is busy")]
    Busy(String),

    #[error("rate limited, wait {}", format_wait(.0))]
    RateLimited(Duration),

    // --- Remote shell errors. Callers need these separately. ---
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("SSH authentication failed for {0}")]
    SshAuthFailed(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Remote command exited with status {exit_code}: {stderr}")]
    RemoteCommandFailed { exit_code: u32, stderr: String },

    #[error("Operation cancelled")]
    Cancelled,

    // --- Object store errors ---
    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Key escapes storage root: {0}")]
    PathEscape(String),

    // --- Pipeline errors ---
    #[error("too many nodes failed ({failed}/{total})")]
    PartialFanout { failed: usize, total: usize },

    #[error("Migration Error: {0}")]
    Migration(String),

    /// A destructive restore step failed after data was mutated. The
    /// pre-restore snapshot key is the documented recovery path.
    #[error("Restore failed: {message}")]
    RestoreFailed {
        message: String,
        pre_restore_key: String,
    },

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

fn format_wait(wait: &Duration) -> String {
    let secs = wait.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

/// The coarse classification used by the API layer to pick a status code
/// and by retry logic to decide whether an operation is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    NotFound,
    Busy,
    TransientRemote,
    PartialFanout,
    DestructiveFailure,
    Cancelled,
    Unknown,
}

impl ColdStoreError {
    /// Classifies the error before it propagates to the operator. Low-level
    /// error text must never leak unmodified for `Unknown` errors.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ColdStoreError::Validation(_) | ColdStoreError::PathEscape(_) => ErrorKind::Validation,
            ColdStoreError::NotFound(_) => ErrorKind::NotFound,
            ColdStoreError::AuthRequired
            | ColdStoreError::Forbidden(_)
            | ColdStoreError::TokenInvalid(_)
            | ColdStoreError::TokenExpired => ErrorKind::Auth,
            ColdStoreError::Busy(_) | ColdStoreError::RateLimited(_) => ErrorKind::Busy,
            ColdStoreError::ConnectionRefused(_)
            | ColdStoreError::Timeout(_)
            | ColdStoreError::ObjectStore(_) => ErrorKind::TransientRemote,
            ColdStoreError::PartialFanout { .. } => ErrorKind::PartialFanout,
            ColdStoreError::RestoreFailed { .. } => ErrorKind::DestructiveFailure,
            ColdStoreError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Unknown,
        }
    }

    /// Whether a bounded retry may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientRemote
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for ColdStoreError {
    fn from(e: std::io::Error) -> Self {
        ColdStoreError::Io(Arc::new(e))
    }
}

impl From<sqlx::Error> for ColdStoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => ColdStoreError::NotFound("row".to_string()),
            other => ColdStoreError::Database(other.to_string()),
        }
    }
}

// Authentication and timeout failures are classified explicitly at the
// call sites; everything else from the SSH layer is an IO failure.
impl From<russh::Error> for ColdStoreError {
    fn from(e: russh::Error) -> Self {
        ColdStoreError::Io(Arc::new(std::io::Error::other(e)))
    }
}

impl From<serde_json::Error> for ColdStoreError {
    fn from(e: serde_json::Error) -> Self {
        ColdStoreError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for ColdStoreError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ColdStoreError::Timeout("operation deadline exceeded".to_string())
    }
}
