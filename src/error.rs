use crate::backend::SyncError;
use crate::identity::IdentityError;
use crate::session::StoreError;

/// Unified error for the explicit session flows.
///
/// Wraps the stage-specific errors so callers see one type from `login`,
/// `register` and `logout`, while the variant still says which half of the
/// pipeline failed.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Identity provider error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Backend sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

impl FlowError {
    /// Short message suitable for showing directly to the user.
    ///
    /// Transport and backend details stay in the logs; the user sees what to
    /// do about it.
    pub fn user_message(&self) -> String {
        match self {
            Self::Identity(IdentityError::InvalidCredentials) => {
                "Invalid email or password".to_string()
            }
            Self::Identity(IdentityError::EmailInUse) => {
                "An account with this email already exists".to_string()
            }
            Self::Identity(IdentityError::ProviderUnavailable(_)) => {
                "The sign-in service is unavailable right now. Please try again later.".to_string()
            }
            Self::Identity(e) => e.to_string(),
            Self::Sync(SyncError::Unauthorized(_)) => {
                "Your session has expired. Please sign in again.".to_string()
            }
            Self::Sync(SyncError::NotFound(_)) => {
                "We could not find your account. Please register first.".to_string()
            }
            Self::Sync(_) => "Could not sync your account. Please try again.".to_string(),
            Self::Store(_) => "Could not save your session on this device.".to_string(),
        }
    }

    /// True when the failure came from the backend rejecting credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Sync(SyncError::Unauthorized(_)))
    }
}
