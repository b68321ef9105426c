//! Error taxonomy for a reconciliation pass
//!
//! Leaf components (Gmail client, stores, sinks) report `anyhow` errors with
//! context. The reconciler and the push layer classify them here so the HTTP
//! layer can decide between acknowledging and asking for redelivery.

use std::time::Duration;

/// Errors that end a pass or an operation
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Required configuration is missing or invalid (fatal at startup)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider could not be reached or refused the request
    #[error("Provider request failed: {0:#}")]
    TransientProvider(#[source] anyhow::Error),

    /// The inbound push envelope could not be decoded
    #[error("Malformed notification: {0}")]
    MalformedNotification(String),

    /// The cursor store (or another required store) is unreachable
    #[error("Storage unavailable: {0:#}")]
    StorageUnavailable(#[source] anyhow::Error),

    /// The pass ran out of time before all messages resolved
    #[error("Pass exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl SyncError {
    /// Whether the push delivery should be retried by the provider
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::TransientProvider(_)
            | SyncError::StorageUnavailable(_)
            | SyncError::DeadlineExceeded(_) => true,
            SyncError::Configuration(_) | SyncError::MalformedNotification(_) => false,
        }
    }
}

/// Result alias for pass-level operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;
