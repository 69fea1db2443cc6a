//! Mutation surface over [`SessionState`] with write-through persistence.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::identity::IdentityHandle;

use super::{
    CanonicalUser, PersistedSession, SessionState, SessionStatus, SessionStorage, StoreError,
};

/// Owns the session state and keeps the storage backend in sync with it.
///
/// Every mutation rewrites the persisted document under the write lock, so
/// documents reach storage in mutation order and a reader never observes a
/// document ahead of the in-process state. The document is rewritten even
/// when the persisted subset did not change.
///
/// Stores are handed around as `Arc<SessionStore>`; there is no process-wide
/// instance, and independent stores (say, one per test) never share state.
pub struct SessionStore {
    state: RwLock<SessionState>,
    storage: Arc<dyn SessionStorage>,
}

impl SessionStore {
    /// Create a store with fresh state, ignoring any persisted document.
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            state: RwLock::new(SessionState::default()),
            storage,
        }
    }

    /// Create a store, rehydrating state from the storage backend.
    ///
    /// Rehydration completes before the store accepts any mutation. A
    /// missing document yields fresh `Idle` state; a corrupt document is
    /// discarded with a warning rather than failing the open.
    pub async fn open(storage: Arc<dyn SessionStorage>) -> Result<Self, StoreError> {
        let state = match storage.load().await {
            Ok(Some(doc)) => {
                let state = doc.into_state();
                debug!(
                    backend = storage.name(),
                    authenticated = state.is_authenticated(),
                    "rehydrated session"
                );
                state
            }
            Ok(None) => SessionState::default(),
            Err(StoreError::Serde(e)) => {
                warn!(error = %e, "discarding corrupt session document");
                SessionState::default()
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            state: RwLock::new(state),
            storage,
        })
    }

    /// Clone the current state.
    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Current lifecycle status.
    pub async fn status(&self) -> SessionStatus {
        self.state.read().await.status
    }

    async fn persist(&self, state: &SessionState) -> Result<(), StoreError> {
        self.storage.save(&PersistedSession::from_state(state)).await
    }

    /// Replace the canonical user.
    pub async fn set_user(&self, user: Option<CanonicalUser>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.user = user;
        self.persist(&state).await
    }

    /// Replace the identity handle.
    pub async fn set_identity_handle(
        &self,
        handle: Option<IdentityHandle>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.identity_handle = handle;
        self.persist(&state).await
    }

    /// Replace the bearer token.
    pub async fn set_token(&self, token: Option<String>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.token = token;
        self.persist(&state).await
    }

    /// Replace the lifecycle status.
    pub async fn set_status(&self, status: SessionStatus) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.status = status;
        self.persist(&state).await
    }

    /// Replace the error message.
    pub async fn set_error(&self, error: Option<String>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.error = error;
        self.persist(&state).await
    }

    /// Enter the authenticated state in one transition.
    ///
    /// Sets the user, handle and token together, marks the session
    /// `Authenticated` and clears any stale error, then persists once.
    #[instrument(skip_all, fields(user_id = user.id))]
    pub async fn login(
        &self,
        user: CanonicalUser,
        handle: Option<IdentityHandle>,
        token: String,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.user = Some(user);
        state.identity_handle = handle;
        state.token = Some(token);
        state.status = SessionStatus::Authenticated;
        state.error = None;
        self.persist(&state).await
    }

    /// Reset to the signed-out state in one transition.
    ///
    /// Clears user, handle, token and error, marks the session
    /// `Unauthenticated` and persists once. Idempotent.
    #[instrument(skip_all)]
    pub async fn logout(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.user = None;
        state.identity_handle = None;
        state.token = None;
        state.status = SessionStatus::Unauthenticated;
        state.error = None;
        self.persist(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::storage::{FileSessionStorage, MemorySessionStorage};
    use crate::session::tests::sample_user;

    fn memory_store() -> (SessionStore, MemorySessionStorage) {
        let storage = MemorySessionStorage::new();
        let store = SessionStore::new(Arc::new(storage.clone()));
        (store, storage)
    }

    #[tokio::test]
    async fn test_open_fresh() {
        let store = SessionStore::open(Arc::new(MemorySessionStorage::new()))
            .await
            .unwrap();
        let state = store.snapshot().await;
        assert_eq!(state.status, SessionStatus::Idle);
        assert!(!state.is_authenticated());
    }

    #[tokio::test]
    async fn test_open_rehydrates_authenticated_session() {
        let storage = MemorySessionStorage::new();
        storage
            .save(&PersistedSession {
                user: Some(sample_user()),
                token: Some("tok-1".to_string()),
                is_authenticated: true,
                profile_complete: false,
            })
            .await
            .unwrap();

        let store = SessionStore::open(Arc::new(storage)).await.unwrap();
        let state = store.snapshot().await;
        assert_eq!(state.status, SessionStatus::Authenticated);
        assert_eq!(state.user.as_ref().map(|u| u.id), Some(7));
        assert_eq!(state.token.as_deref(), Some("tok-1"));
        assert!(state.identity_handle.is_none());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_open_discards_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("auth-storage.json"), "{definitely not json").unwrap();

        let store = SessionStore::open(Arc::new(FileSessionStorage::new(dir.path())))
            .await
            .unwrap();
        assert_eq!(store.status().await, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_login_transition() {
        let (store, storage) = memory_store();
        store.set_error(Some("old failure".to_string())).await.unwrap();

        store
            .login(sample_user(), None, "tok-1".to_string())
            .await
            .unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.status, SessionStatus::Authenticated);
        assert!(state.is_authenticated());
        assert_eq!(state.token.as_deref(), Some("tok-1"));
        assert!(state.error.is_none());

        let doc = storage.load().await.unwrap().unwrap();
        assert!(doc.is_authenticated);
        assert_eq!(doc.token.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_logout_resets_everything() {
        let (store, storage) = memory_store();
        store
            .login(sample_user(), None, "tok-1".to_string())
            .await
            .unwrap();

        store.logout().await.unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.status, SessionStatus::Unauthenticated);
        assert!(state.user.is_none());
        assert!(state.identity_handle.is_none());
        assert!(state.token.is_none());
        assert!(state.error.is_none());

        let doc = storage.load().await.unwrap().unwrap();
        assert!(!doc.is_authenticated);
        assert!(doc.user.is_none());
        assert!(doc.token.is_none());
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (store, _) = memory_store();
        store
            .login(sample_user(), None, "tok-1".to_string())
            .await
            .unwrap();

        store.logout().await.unwrap();
        let first = store.snapshot().await;
        store.logout().await.unwrap();
        let second = store.snapshot().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_every_mutation_persists() {
        let (store, storage) = memory_store();

        store.set_token(Some("tok-1".to_string())).await.unwrap();
        let doc = storage.load().await.unwrap().unwrap();
        assert_eq!(doc.token.as_deref(), Some("tok-1"));
        assert!(!doc.is_authenticated);

        store.set_user(Some(sample_user())).await.unwrap();
        let doc = storage.load().await.unwrap().unwrap();
        assert!(doc.is_authenticated);

        // Status changes also rewrite the document.
        store.set_status(SessionStatus::Loading).await.unwrap();
        assert!(storage.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_persisted_booleans_track_user() {
        let (store, storage) = memory_store();

        let mut user = sample_user();
        user.profile_complete = true;
        store.set_user(Some(user)).await.unwrap();
        let doc = storage.load().await.unwrap().unwrap();
        assert!(doc.is_authenticated);
        assert!(doc.profile_complete);

        store.set_user(None).await.unwrap();
        let doc = storage.load().await.unwrap().unwrap();
        assert!(!doc.is_authenticated);
        assert!(!doc.profile_complete);
    }

    #[tokio::test]
    async fn test_round_trip_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = SessionStore::new(Arc::new(FileSessionStorage::new(dir.path())));
            store
                .login(sample_user(), None, "tok-1".to_string())
                .await
                .unwrap();
        }

        let store = SessionStore::open(Arc::new(FileSessionStorage::new(dir.path())))
            .await
            .unwrap();
        let state = store.snapshot().await;
        assert_eq!(state.status, SessionStatus::Authenticated);
        assert_eq!(state.user.as_ref().map(|u| u.id), Some(7));
        assert_eq!(state.token.as_deref(), Some("tok-1"));
    }
}
