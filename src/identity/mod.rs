//! Credential provider adapter for the external identity service.
//!
//! Wraps the identity provider behind the [`IdentityProvider`] trait:
//! - [`RestIdentityProvider`] - Production client for the hosted identity
//!   REST API (password grant, signup, refresh-token grant)
//! - [`StaticIdentityProvider`] - In-memory provider for tests and offline runs
//!
//! The adapter is a pure pass-through: no retries, no compensating logic.
//! Failures propagate immediately to the caller, and an interactive login
//! resolves or rejects exactly once.

pub mod rest;
pub mod static_provider;

// Re-exports
pub use rest::{RestIdentityProvider, RestProviderConfig};
pub use static_provider::StaticIdentityProvider;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Safety margin for token expiry checks (60 seconds).
const EXPIRY_SAFETY_MARGIN_SECS: i64 = 60;

/// Proactive refresh buffer (5 minutes / 300 seconds).
const REFRESH_BUFFER_SECS: i64 = 300;

// =============================================================================
// IdentityError
// =============================================================================

/// Errors that can occur when talking to the identity provider.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The email/password pair was rejected.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Registration was rejected because the email is already taken.
    #[error("An account with this email already exists")]
    EmailInUse,

    /// The provider could not be reached or answered with a server error.
    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A bearer token could not be issued or refreshed.
    #[error("Token fetch failed: {0}")]
    TokenFetchFailed(String),

    /// The provider response could not be decoded.
    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

// =============================================================================
// IdentityHandle
// =============================================================================

/// The identity provider's view of a signed-in user.
///
/// Carries the provider-issued user id plus the token material needed to
/// mint bearer tokens. Handles are ephemeral: they are never persisted and
/// are rehydrated per process from provider session events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityHandle {
    /// Provider-assigned user id.
    pub uid: String,

    /// Email address registered with the provider.
    pub email: String,

    /// Optional display name from the provider profile.
    pub display_name: Option<String>,

    /// Current access token issued by the provider.
    pub access_token: String,

    /// Refresh token, if the provider issued one.
    pub refresh_token: Option<String>,

    /// Unix timestamp when the access token expires, if known.
    pub expires_at: Option<i64>,
}

impl IdentityHandle {
    /// Create a handle with an expiry duration relative to now.
    pub fn new(
        uid: impl Into<String>,
        email: impl Into<String>,
        display_name: Option<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Option<i64>,
    ) -> Self {
        let expires_at = expires_in.map(|ei| chrono::Utc::now().timestamp() + ei);
        Self {
            uid: uid.into(),
            email: email.into(),
            display_name,
            access_token: access_token.into(),
            refresh_token,
            expires_at,
        }
    }

    /// Create a handle with a specific expiration timestamp.
    pub fn with_expires_at(
        uid: impl Into<String>,
        email: impl Into<String>,
        display_name: Option<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            uid: uid.into(),
            email: email.into(),
            display_name,
            access_token: access_token.into(),
            refresh_token,
            expires_at,
        }
    }

    /// Check if the access token is expired or about to expire.
    ///
    /// Returns `true` if the token has expired or will expire within the
    /// safety margin (60 seconds). Returns `false` if no expiry is set.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => {
                let now = chrono::Utc::now().timestamp();
                exp <= now + EXPIRY_SAFETY_MARGIN_SECS
            }
            None => false,
        }
    }

    /// Check if the token should be proactively refreshed.
    ///
    /// Returns `true` if the token will expire within 5 minutes.
    /// Returns `false` if no expiry is set.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        match self.expires_at {
            Some(exp) => {
                let now = chrono::Utc::now().timestamp();
                exp <= now + REFRESH_BUFFER_SECS
            }
            None => false,
        }
    }

    /// Get the duration until the access token expires.
    ///
    /// Returns `Duration::ZERO` if the token has already expired or has no
    /// expiry set.
    pub fn time_until_expiry(&self) -> Duration {
        match self.expires_at {
            Some(exp) => {
                let now = chrono::Utc::now().timestamp();
                let remaining = exp - now;
                if remaining > 0 {
                    Duration::from_secs(remaining as u64)
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        }
    }
}

// =============================================================================
// Registration
// =============================================================================

/// Discriminant on a registration result.
///
/// Providers report whether a registration call actually created a fresh
/// account (with a sign-in side effect) or merely restored an existing
/// session. Backend registration sync must run once per fresh account, never
/// on a restoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    /// A fresh account was created and signed in.
    SignIn,
    /// An existing session was restored without creating an account.
    Restored,
}

/// Result of a successful registration call.
#[derive(Debug, Clone)]
pub struct Registration {
    /// The signed-in handle for the (new or restored) account.
    pub handle: IdentityHandle,
    /// What the provider actually did.
    pub operation: OperationType,
}

impl Registration {
    /// True when the provider created a fresh account.
    pub fn is_sign_in(&self) -> bool {
        self.operation == OperationType::SignIn
    }
}

// =============================================================================
// SessionEvent
// =============================================================================

/// Session-change notification from the identity provider.
///
/// Events are delivered one at a time and handled to completion by the
/// session synchronizer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The provider reports an active session for this handle.
    Present(IdentityHandle),
    /// The provider reports no active session.
    Absent,
}

// =============================================================================
// IdentityProvider trait
// =============================================================================

/// Trait for identity provider backends.
///
/// All implementations must be thread-safe (`Send + Sync`). The contract is
/// pass-through: implementations do not retry, and every operation either
/// resolves or rejects exactly once.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Sign in with email and password.
    async fn login(&self, email: &str, password: &str) -> Result<IdentityHandle, IdentityError>;

    /// Create a new account.
    ///
    /// Returns the handle plus an [`OperationType`] discriminant telling the
    /// caller whether a fresh account was actually created.
    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Registration, IdentityError>;

    /// Get a bearer token for the handle.
    ///
    /// With `force_refresh == false` the current access token is returned as
    /// long as it is not near expiry; otherwise a refresh is performed.
    async fn fetch_token(
        &self,
        handle: &IdentityHandle,
        force_refresh: bool,
    ) -> Result<String, IdentityError>;

    /// End the provider-side session.
    async fn sign_out(&self) -> Result<(), IdentityError>;
}
