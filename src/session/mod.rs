//! Session state model and persistence.
//!
//! The session is the single source of truth the rest of the crate reads:
//! - [`SessionState`] - current user, identity handle, bearer token, status
//! - [`SessionStore`] - mutation surface with write-through persistence
//! - [`SessionStorage`] - pluggable storage backends (file, keyring, memory)
//!
//! Derived facts (`is_authenticated`, `profile_complete`) are computed from
//! the user record on demand. They are written into the persisted document
//! for external consumers but are never stored as independent state and are
//! recomputed, not trusted, on load.

pub mod storage;
pub mod store;

// Re-exports
pub use storage::{FileSessionStorage, MemorySessionStorage, SessionStorage};
#[cfg(feature = "system-keyring")]
pub use storage::KeyringSessionStorage;
pub use store::SessionStore;

use serde::{Deserialize, Serialize};

use crate::identity::IdentityHandle;

/// Storage key for the persisted session document.
pub const STORAGE_KEY: &str = "auth-storage";

// =============================================================================
// StoreError
// =============================================================================

/// Errors from the session store and its storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage backend failed.
    #[error("Session storage error: {0}")]
    Storage(String),

    /// The persisted document could not be encoded or decoded.
    #[error("Session serialization error: {0}")]
    Serde(String),
}

// =============================================================================
// SessionStatus
// =============================================================================

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Nothing has happened yet.
    #[default]
    Idle,
    /// A sync or an explicit flow is in flight.
    Loading,
    /// A canonical user is loaded.
    Authenticated,
    /// There is definitively no session.
    Unauthenticated,
    /// The last sync failed; prior user data may still be present.
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Unauthenticated => write!(f, "unauthenticated"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "loading" => Ok(Self::Loading),
            "authenticated" => Ok(Self::Authenticated),
            "unauthenticated" => Ok(Self::Unauthenticated),
            "error" => Ok(Self::Error),
            _ => Err(format!("unknown session status: {s}")),
        }
    }
}

// =============================================================================
// EntityTypeRef
// =============================================================================

/// Reference to an entity type in a user's profile.
///
/// The backend serializes these either as bare code strings (`"owner"`) or
/// as full objects (`{"id": 3, "code": "owner"}`). Both decode to the same
/// canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeRef {
    /// Backend id, when the backend sent the full object.
    pub id: Option<i64>,
    /// Stable entity-type code, e.g. `owner` or `veterinarian`.
    pub code: String,
}

impl EntityTypeRef {
    /// Build a reference from a bare code.
    pub fn from_code(code: impl Into<String>) -> Self {
        Self {
            id: None,
            code: code.into(),
        }
    }
}

impl Serialize for EntityTypeRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self.id {
            Some(id) => {
                use serde::ser::SerializeStruct;
                let mut s = serializer.serialize_struct("EntityTypeRef", 2)?;
                s.serialize_field("id", &id)?;
                s.serialize_field("code", &self.code)?;
                s.end()
            }
            None => serializer.serialize_str(&self.code),
        }
    }
}

impl<'de> Deserialize<'de> for EntityTypeRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Code(String),
            Full {
                id: Option<i64>,
                #[serde(alias = "name")]
                code: String,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Code(code) => Self { id: None, code },
            Repr::Full { id, code } => Self { id, code },
        })
    }
}

// =============================================================================
// CanonicalUser
// =============================================================================

/// The backend's canonical user record, in crate-native shape.
///
/// Wire payloads arrive with `user_id` and a nested entity object; decoding
/// renames the id and flattens the entity into `name` and `entity_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalUser {
    /// Backend user id (the wire's `user_id`).
    pub id: i64,
    /// Email address.
    pub email: String,
    /// Display name, flattened from the wire's entity object.
    pub name: String,
    /// Entity-type references, flattened from the wire's entity object.
    #[serde(default)]
    pub entity_type: Vec<EntityTypeRef>,
    /// Opaque profile payload, passed through untouched.
    #[serde(default)]
    pub profile: Option<serde_json::Value>,
    /// Whether onboarding produced a complete profile.
    #[serde(default)]
    pub profile_complete: bool,
}

// =============================================================================
// SessionState
// =============================================================================

/// Snapshot of the session at one point in time.
///
/// `user`, `token` and `status` move together through the compound
/// transitions on [`SessionStore`]; reading a snapshot always observes a
/// consistent combination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// Canonical backend user, if authenticated.
    pub user: Option<CanonicalUser>,
    /// Provider handle for the current session. Never persisted.
    pub identity_handle: Option<IdentityHandle>,
    /// Bearer token for backend calls.
    pub token: Option<String>,
    /// Lifecycle phase.
    pub status: SessionStatus,
    /// Human-readable message from the last failed sync.
    pub error: Option<String>,
}

impl SessionState {
    /// True exactly when a canonical user is loaded.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// True when the loaded user finished onboarding.
    ///
    /// `false` whenever no user is loaded.
    #[must_use]
    pub fn profile_complete(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.profile_complete)
    }
}

// =============================================================================
// PersistedSession
// =============================================================================

/// The on-disk session document stored under [`STORAGE_KEY`].
///
/// A deliberate subset of [`SessionState`]: `status`, `error` and the
/// identity handle are process-local and never written. The two boolean
/// fields exist for consumers of the raw document; loading recomputes them
/// from `user` instead of trusting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Canonical user record.
    pub user: Option<CanonicalUser>,
    /// Bearer token.
    pub token: Option<String>,
    /// Derived from `user` at write time.
    #[serde(rename = "isAuthenticated", default)]
    pub is_authenticated: bool,
    /// Derived from `user` at write time.
    #[serde(rename = "profileComplete", default)]
    pub profile_complete: bool,
}

impl PersistedSession {
    /// Project the persistable subset out of a state snapshot.
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            user: state.user.clone(),
            token: state.token.clone(),
            is_authenticated: state.is_authenticated(),
            profile_complete: state.profile_complete(),
        }
    }

    /// Rebuild process state from a persisted document.
    ///
    /// Status is seeded from the presence of a user record, not from the
    /// stored booleans. A restored session starts `Authenticated` so route
    /// guards keep protected content visible while the first sync confirms
    /// it; an empty document starts `Idle`.
    pub fn into_state(self) -> SessionState {
        let status = if self.user.is_some() {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Idle
        };
        SessionState {
            user: self.user,
            identity_handle: None,
            token: self.token,
            status,
            error: None,
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn entity_type_strategy() -> impl Strategy<Value = EntityTypeRef> {
        (proptest::option::of(0i64..1000), "[a-z]{3,12}")
            .prop_map(|(id, code)| EntityTypeRef { id, code })
    }

    fn user_strategy() -> impl Strategy<Value = CanonicalUser> {
        (
            1i64..100_000,
            "[a-z]{1,8}@[a-z]{1,8}\\.com",
            "[A-Za-z]{1,16}",
            proptest::collection::vec(entity_type_strategy(), 0..3),
            proptest::bool::ANY,
        )
            .prop_map(|(id, email, name, entity_type, profile_complete)| CanonicalUser {
                id,
                email,
                name,
                entity_type,
                profile: None,
                profile_complete,
            })
    }

    fn status_strategy() -> impl Strategy<Value = SessionStatus> {
        prop_oneof![
            Just(SessionStatus::Idle),
            Just(SessionStatus::Loading),
            Just(SessionStatus::Authenticated),
            Just(SessionStatus::Unauthenticated),
            Just(SessionStatus::Error),
        ]
    }

    fn state_strategy() -> impl Strategy<Value = SessionState> {
        (
            proptest::option::of(user_strategy()),
            proptest::option::of("[a-zA-Z0-9-]{4,24}"),
            status_strategy(),
            proptest::option::of("[a-z ]{4,32}"),
        )
            .prop_map(|(user, token, status, error)| SessionState {
                user,
                identity_handle: None,
                token,
                status,
                error,
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_persisted_booleans_are_derived(state in state_strategy()) {
            let doc = PersistedSession::from_state(&state);
            prop_assert_eq!(
                doc.is_authenticated,
                state.user.is_some(),
                "isAuthenticated must track user presence"
            );
            prop_assert_eq!(
                doc.profile_complete,
                state.user.as_ref().is_some_and(|u| u.profile_complete),
                "profileComplete must track the user's flag"
            );
        }

        #[test]
        fn prop_rehydrated_status_follows_user(
            user in proptest::option::of(user_strategy()),
            token in proptest::option::of("[a-zA-Z0-9-]{4,24}"),
            lies in proptest::bool::ANY,
        ) {
            // Stored booleans may disagree with the user record; rehydration
            // must ignore them.
            let doc = PersistedSession {
                user: user.clone(),
                token,
                is_authenticated: lies,
                profile_complete: lies,
            };
            let state = doc.into_state();
            let expected = if user.is_some() {
                SessionStatus::Authenticated
            } else {
                SessionStatus::Idle
            };
            prop_assert_eq!(state.status, expected);
            prop_assert_eq!(state.is_authenticated(), user.is_some());
            prop_assert_eq!(
                state.profile_complete(),
                user.as_ref().is_some_and(|u| u.profile_complete)
            );
            prop_assert!(state.error.is_none());
            prop_assert!(state.identity_handle.is_none());
        }
    }
}
