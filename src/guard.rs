//! Route guard decisions over session state.
//!
//! The guard is pure: it looks at a [`SessionState`] snapshot and says what
//! a protected surface should do. Hosts map [`GuardOutcome`] onto their own
//! rendering or routing primitives.

use serde::Serialize;

use crate::session::{SessionState, SessionStatus};

/// Default path unauthenticated visitors are sent to.
const DEFAULT_LOGIN_PATH: &str = "/login";

/// What a protected surface should do for the current session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "outcome")]
pub enum GuardOutcome {
    /// Session resolution is still in flight: show a placeholder, never the
    /// protected content.
    Loading,
    /// Render the protected content.
    Allow,
    /// Send the visitor to the sign-in surface.
    Redirect {
        /// Target path.
        to: String,
    },
}

/// Protects content that requires an authenticated session.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    login_path: String,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self {
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }
}

impl RouteGuard {
    /// Guard redirecting to the default sign-in path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard redirecting to a custom sign-in path.
    pub fn with_login_path(login_path: impl Into<String>) -> Self {
        Self {
            login_path: login_path.into(),
        }
    }

    /// Decide what to do for the given session state.
    ///
    /// `Idle` counts as still-resolving: before the first sync settles the
    /// guard must not reveal protected content, and it must also not bounce
    /// a possibly-authenticated visitor to the sign-in page. A failed sync
    /// keeps prior user data visible rather than ejecting the user.
    pub fn evaluate(&self, state: &SessionState) -> GuardOutcome {
        match state.status {
            SessionStatus::Idle | SessionStatus::Loading => GuardOutcome::Loading,
            SessionStatus::Authenticated => GuardOutcome::Allow,
            SessionStatus::Unauthenticated => self.redirect(),
            SessionStatus::Error => {
                if state.is_authenticated() {
                    GuardOutcome::Allow
                } else {
                    self.redirect()
                }
            }
        }
    }

    fn redirect(&self) -> GuardOutcome {
        GuardOutcome::Redirect {
            to: self.login_path.clone(),
        }
    }
}
