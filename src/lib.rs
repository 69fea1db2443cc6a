//! Session synchronization client for the PawTrack pet-health platform.
//!
//! PawTrack keeps identity in a hosted provider and canonical user records
//! in its own backend; this crate keeps the two in step on the client side.
//! Provider session events and explicit credential flows are translated into
//! backend sync calls and a persisted, guarded session.
//!
//! The pieces compose by injection:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pawsync::backend::{RetryPolicy, SyncClient};
//! use pawsync::guard::RouteGuard;
//! use pawsync::identity::StaticIdentityProvider;
//! use pawsync::session::{MemorySessionStorage, SessionStore};
//! use pawsync::sync::Synchronizer;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(StaticIdentityProvider::with_account("a@b.com", "secret", "uid-7"));
//! let backend = SyncClient::new("http://localhost:8000", RetryPolicy::default());
//! let store = Arc::new(SessionStore::open(Arc::new(MemorySessionStorage::new())).await?);
//!
//! let sync = Synchronizer::new(provider, backend, store);
//! let user = sync.login("a@b.com", "secret").await?;
//! println!("signed in as {}", user.name);
//!
//! let guard = RouteGuard::new();
//! println!("{:?}", guard.evaluate(&sync.store().snapshot().await));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod session;
pub mod sync;

pub use backend::{RetryPolicy, SyncClient, SyncError};
pub use config::Config;
pub use error::FlowError;
pub use guard::{GuardOutcome, RouteGuard};
pub use identity::{IdentityError, IdentityHandle, IdentityProvider, SessionEvent};
pub use session::{
    CanonicalUser, SessionState, SessionStatus, SessionStorage, SessionStore, StoreError,
};
pub use sync::{spawn_event_worker, Synchronizer};
