//! Error types for reconciliation.

use crate::types::ScopeId;
use thiserror::Error;

/// Failures reported by the transport collaborator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected by server: {0}")]
    Rejected(String),

    #[error("Connection closed")]
    Closed,
}

/// Main error type for reconciliation operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to fetch page for {scope} at offset {offset} (search {search:?}): {source}")]
    FetchFailure {
        scope: ScopeId,
        offset: u64,
        search: String,
        #[source]
        source: TransportError,
    },

    #[error("Live subscription for {scope} failed: {source}")]
    SubscriptionFailure {
        scope: ScopeId,
        #[source]
        source: TransportError,
    },

    #[error("Failed to send message to {scope}: {source}")]
    SendFailure {
        scope: ScopeId,
        #[source]
        source: TransportError,
    },

    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Scope not active: {0}")]
    ScopeNotActive(ScopeId),

    #[error("Result for {scope} discarded: scope was reset or deactivated")]
    Cancelled { scope: ScopeId },
}

impl SyncError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::FetchFailure { source, .. }
            | SyncError::SubscriptionFailure { source, .. }
            | SyncError::SendFailure { source, .. } => {
                matches!(source, TransportError::Network(_) | TransportError::Closed)
            }
            _ => false,
        }
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, SyncError>;
