//! HTTP client for the canonical backend.
//!
//! The backend owns the canonical user records; this module carries bearer
//! tokens to it and maps its payloads into crate-native types:
//! - [`SyncClient`] - the typed API surface (sync mutations, current user,
//!   reference data)
//! - [`RetryPolicy`] - bounded retry for the two sync mutations only
//!
//! Requests attach `Authorization: Bearer <token>` exactly when a token is
//! supplied; without one the header is omitted entirely, never sent empty.

pub mod client;
pub mod models;
pub mod retry;

// Re-exports
pub use client::SyncClient;
pub use models::{LoginSyncRequest, ReferenceItem, RegisterSyncRequest};
pub use retry::RetryPolicy;

/// Errors from backend synchronization calls.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The backend answered but synchronization did not produce a usable
    /// payload, or all retry attempts were exhausted.
    #[error("Backend sync failed: {0}")]
    SyncFailed(String),

    /// The bearer token was missing, expired or rejected.
    #[error("Backend rejected credentials: {0}")]
    Unauthorized(String),

    /// The backend has no record for this identity.
    #[error("No backend record: {0}")]
    NotFound(String),

    /// Transport-level failure.
    #[error("Backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("Backend error {status}: {message}")]
    Api { status: u16, message: String },
}

impl SyncError {
    /// HTTP status carried by this error, when one applies.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
