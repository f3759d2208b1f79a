//! Error taxonomy for device integration and synchronization.
//!
//! Every caller-facing operation returns [`SyncResult`]. Infrastructure code
//! (SQLite, encryption, config) works with `anyhow` internally and is mapped
//! onto these variants at the domain boundary.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

/// Result type for device and sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by connect, disconnect, sync and query operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Unknown provider type or malformed input
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown device or credential
    #[error("not found: {0}")]
    NotFound(String),

    /// Strict-mode connect for a provider the user already connected
    #[error("provider '{provider}' is already connected as device {device_id}")]
    DuplicateConnection { provider: String, device_id: String },

    /// Credential invalid or expired and not refreshable
    #[error("auth error: {0}")]
    Auth(String),

    /// Provider unreachable or timed out
    #[error("network error: {0}")]
    Network(String),

    /// Device already has a sync in flight
    #[error("device {0} is already syncing")]
    Busy(String),

    /// Persistence read/write failure
    #[error("storage error: {0}")]
    Storage(String),
}

/// Serializable discriminant of [`SyncError`], used in sync reports and API bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    DuplicateConnection,
    Auth,
    Network,
    Busy,
    Storage,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::DuplicateConnection { .. } => ErrorKind::DuplicateConnection,
            SyncError::Auth(_) => ErrorKind::Auth,
            SyncError::Network(_) => ErrorKind::Network,
            SyncError::Busy(_) => ErrorKind::Busy,
            SyncError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Wraps an infrastructure failure (keeps the full `anyhow` context chain).
    pub fn storage(e: impl Display) -> Self {
        SyncError::Storage(format!("{:#}", e))
    }

    /// Device that the caller asked for does not exist for that user.
    pub fn device_not_found(device_id: &str) -> Self {
        SyncError::NotFound(format!("device {}", device_id))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Storage(format!("serialization failed: {}", e))
    }
}
