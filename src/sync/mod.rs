//! Session synchronizer.
//!
//! Couples the three halves of the system: provider session events and
//! explicit credential flows come in, canonical user state goes into the
//! [`SessionStore`], with the backend consulted in between.
//!
//! Two failure disciplines apply:
//! - Passive syncs (provider events) absorb failures into the store as
//!   `status = Error`, keeping whatever user data was already loaded.
//! - Explicit flows (`login`, `register`, `logout`) propagate failures to
//!   the caller and restore the status the store had before the call.
//!
//! Every operation takes a monotonic sequence ticket. A completion only
//! commits while its ticket is still the newest, so a slow sync can never
//! clobber the outcome of one that started later.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::backend::{RegisterSyncRequest, SyncClient};
use crate::error::FlowError;
use crate::identity::{IdentityHandle, IdentityProvider, SessionEvent};
use crate::session::{CanonicalUser, SessionStatus, SessionStore, StoreError};

/// Drives session state from provider events and explicit flows.
///
/// Holds its collaborators by injection; nothing here is process-global,
/// and two synchronizers over different stores are fully independent.
pub struct Synchronizer {
    provider: Arc<dyn IdentityProvider>,
    backend: SyncClient,
    store: Arc<SessionStore>,
    /// Highest sequence ticket issued so far.
    issued: AtomicU64,
    /// Serializes commits so the freshness check and the store write are
    /// atomic with respect to other completions.
    commit_lock: Mutex<()>,
}

impl Synchronizer {
    /// Create a synchronizer over the given collaborators.
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        backend: SyncClient,
        store: Arc<SessionStore>,
    ) -> Self {
        Self {
            provider,
            backend,
            store,
            issued: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
        }
    }

    /// The store this synchronizer writes to.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    fn next_seq(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_latest(&self, seq: u64) -> bool {
        self.issued.load(Ordering::SeqCst) == seq
    }

    // -------------------------------------------------------------------------
    // Provider events
    // -------------------------------------------------------------------------

    /// Apply one provider session event.
    pub async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Present(handle) => self.handle_present(handle).await,
            SessionEvent::Absent => self.handle_absent().await,
        }
    }

    #[instrument(skip(self, handle), fields(uid = %handle.uid))]
    async fn handle_present(&self, handle: IdentityHandle) {
        let seq = self.next_seq();
        if let Err(e) = self.store.set_status(SessionStatus::Loading).await {
            warn!(error = %e, "failed to persist loading status");
        }
        if let Err(e) = self.store.set_identity_handle(Some(handle.clone())).await {
            warn!(error = %e, "failed to record identity handle");
        }

        if let Err(error) = self.sync_present(seq, &handle).await {
            self.absorb_failure(seq, &error).await;
        }
    }

    async fn sync_present(&self, seq: u64, handle: &IdentityHandle) -> Result<(), FlowError> {
        let token = self.provider.fetch_token(handle, false).await?;
        let user = self.backend.current_user(&token).await?;
        if self.commit_login(seq, user, Some(handle.clone()), token).await? {
            debug!("session sync committed");
        }
        Ok(())
    }

    async fn handle_absent(&self) {
        let seq = self.next_seq();
        let _guard = self.commit_lock.lock().await;
        if !self.is_latest(seq) {
            return;
        }
        info!("provider session gone, resetting session state");
        if let Err(e) = self.store.logout().await {
            warn!(error = %e, "failed to persist signed-out state");
        }
    }

    /// Absorb a passive sync failure into the store.
    ///
    /// Prior user and token stay untouched so the UI can keep rendering
    /// them; only status and the error message change.
    async fn absorb_failure(&self, seq: u64, error: &FlowError) {
        let _guard = self.commit_lock.lock().await;
        if !self.is_latest(seq) {
            debug!(seq, "discarding stale sync failure");
            return;
        }
        warn!(error = %error, "session sync failed, keeping previous session data");
        if let Err(e) = self.store.set_error(Some(error.user_message())).await {
            warn!(error = %e, "failed to persist sync error");
        }
        if let Err(e) = self.store.set_status(SessionStatus::Error).await {
            warn!(error = %e, "failed to persist error status");
        }
    }

    /// Commit a completed sync, unless a newer operation has started.
    ///
    /// Returns `Ok(false)` when the completion was stale and discarded.
    async fn commit_login(
        &self,
        seq: u64,
        user: CanonicalUser,
        handle: Option<IdentityHandle>,
        token: String,
    ) -> Result<bool, StoreError> {
        let _guard = self.commit_lock.lock().await;
        if !self.is_latest(seq) {
            debug!(seq, "discarding stale sync completion");
            return Ok(false);
        }
        self.store.login(user, handle, token).await?;
        Ok(true)
    }

    async fn restore_status(&self, seq: u64, prior: SessionStatus) {
        let _guard = self.commit_lock.lock().await;
        if !self.is_latest(seq) {
            return;
        }
        if let Err(e) = self.store.set_status(prior).await {
            warn!(error = %e, "failed to restore session status");
        }
    }

    // -------------------------------------------------------------------------
    // Explicit flows
    // -------------------------------------------------------------------------

    /// Interactive sign-in.
    ///
    /// Provider credentials first, then the backend sign-in sync, then the
    /// canonical user fetch; the store is only written once everything
    /// succeeded. On failure the error propagates and the store returns to
    /// the status it had before the call.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn login(&self, email: &str, password: &str) -> Result<CanonicalUser, FlowError> {
        let seq = self.next_seq();
        let prior = self.store.status().await;
        self.store.set_status(SessionStatus::Loading).await?;

        match self.run_login(seq, email, password).await {
            Ok(user) => {
                info!(user_id = user.id, "login complete");
                Ok(user)
            }
            Err(error) => {
                self.restore_status(seq, prior).await;
                Err(error)
            }
        }
    }

    async fn run_login(
        &self,
        seq: u64,
        email: &str,
        password: &str,
    ) -> Result<CanonicalUser, FlowError> {
        let handle = self.provider.login(email, password).await?;
        self.backend.login_sync(&handle.uid).await?;
        let token = self.provider.fetch_token(&handle, false).await?;
        let user = self.backend.current_user(&token).await?;
        self.commit_login(seq, user.clone(), Some(handle), token).await?;
        Ok(user)
    }

    /// Interactive registration.
    ///
    /// The backend registration sync runs exactly when the provider created
    /// a fresh account; a restored session fetches its existing canonical
    /// record instead.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<CanonicalUser, FlowError> {
        let seq = self.next_seq();
        let prior = self.store.status().await;
        self.store.set_status(SessionStatus::Loading).await?;

        match self.run_register(seq, email, password, name).await {
            Ok(user) => {
                info!(user_id = user.id, "registration complete");
                Ok(user)
            }
            Err(error) => {
                self.restore_status(seq, prior).await;
                Err(error)
            }
        }
    }

    async fn run_register(
        &self,
        seq: u64,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<CanonicalUser, FlowError> {
        let registration = self.provider.register(email, password, name).await?;
        let handle = registration.handle.clone();
        let token = self.provider.fetch_token(&handle, false).await?;

        let user = if registration.is_sign_in() {
            self.backend
                .register_sync(
                    &token,
                    &RegisterSyncRequest {
                        name: name.to_string(),
                        email: email.to_string(),
                        uid: handle.uid.clone(),
                    },
                )
                .await?
        } else {
            self.backend.current_user(&token).await?
        };

        self.commit_login(seq, user.clone(), Some(handle), token).await?;
        Ok(user)
    }

    /// Explicit sign-out: end the provider session, then reset the store.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), FlowError> {
        let seq = self.next_seq();
        self.provider.sign_out().await?;
        let _guard = self.commit_lock.lock().await;
        if self.is_latest(seq) {
            self.store.logout().await?;
        }
        Ok(())
    }
}

/// Spawn the background worker that applies provider session events.
///
/// Events are handled one at a time to completion, in arrival order. The
/// task ends when every sender has been dropped.
pub fn spawn_event_worker(
    sync: Arc<Synchronizer>,
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("session event worker started");
        while let Some(event) = rx.recv().await {
            sync.handle_event(event).await;
        }
        debug!("session event worker stopped");
    })
}
