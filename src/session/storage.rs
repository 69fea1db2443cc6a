//! Storage backends for the persisted session document.
//!
//! Backends store a single JSON document under the [`STORAGE_KEY`] name:
//! - [`FileSessionStorage`] - JSON file with owner-only permissions (default)
//! - [`KeyringSessionStorage`] - OS keyring (requires the `system-keyring` feature)
//! - [`MemorySessionStorage`] - in-memory, for tests and ephemeral runs

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::{debug, instrument, warn};

use super::{PersistedSession, StoreError, STORAGE_KEY};

/// File mode for the session document (owner read/write only).
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Directory mode for the storage directory (owner only).
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// Trait for session document storage backends.
///
/// All implementations must be thread-safe (`Send + Sync`) to support
/// concurrent access from async tasks.
#[async_trait::async_trait]
pub trait SessionStorage: Send + Sync {
    /// Load the persisted session document, if one exists.
    async fn load(&self) -> Result<Option<PersistedSession>, StoreError>;

    /// Save the session document, replacing any existing one.
    async fn save(&self, session: &PersistedSession) -> Result<(), StoreError>;

    /// Remove the session document. Succeeds if none exists.
    async fn remove(&self) -> Result<(), StoreError>;

    /// Check whether a session document exists.
    async fn exists(&self) -> Result<bool, StoreError> {
        Ok(self.load().await?.is_some())
    }

    /// Backend name, for logging.
    fn name(&self) -> &str;
}

#[async_trait::async_trait]
impl<T: SessionStorage + ?Sized> SessionStorage for Arc<T> {
    async fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
        (**self).load().await
    }

    async fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        (**self).save(session).await
    }

    async fn remove(&self) -> Result<(), StoreError> {
        (**self).remove().await
    }

    async fn exists(&self) -> Result<bool, StoreError> {
        (**self).exists().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait::async_trait]
impl<T: SessionStorage + ?Sized> SessionStorage for Box<T> {
    async fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
        (**self).load().await
    }

    async fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        (**self).save(session).await
    }

    async fn remove(&self) -> Result<(), StoreError> {
        (**self).remove().await
    }

    async fn exists(&self) -> Result<bool, StoreError> {
        (**self).exists().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// =============================================================================
// FileSessionStorage
// =============================================================================

/// File-based session storage.
///
/// Stores the document as `auth-storage.json` inside the given directory.
/// Writes go through a temp file and an atomic rename so a crash never
/// leaves a half-written document behind.
pub struct FileSessionStorage {
    dir: PathBuf,
}

impl FileSessionStorage {
    /// Create storage rooted at the given directory.
    ///
    /// The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn document_path(&self) -> PathBuf {
        self.dir.join(format!("{STORAGE_KEY}.json"))
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)
                .map_err(|e| StoreError::Storage(format!("failed to create directory: {e}")))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(DIR_MODE);
                std::fs::set_permissions(&self.dir, perms).map_err(|e| {
                    StoreError::Storage(format!("failed to set directory permissions: {e}"))
                })?;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStorage for FileSessionStorage {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
        let path = self.document_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "failed to read session document: {e}"
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let session: PersistedSession = serde_json::from_str(&content)
            .map_err(|e| StoreError::Serde(format!("invalid session document: {e}")))?;
        debug!(path = %path.display(), "loaded session document");
        Ok(Some(session))
    }

    #[instrument(skip(self, session))]
    async fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let path = self.document_path();
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| StoreError::Serde(e.to_string()))?;

        // Write to a temp file, then rename into place. Restrictive
        // permissions are applied at creation so the token is never
        // world-readable, not even briefly.
        let tmp = path.with_extension("json.tmp");
        {
            use std::io::Write;
            let mut opts = std::fs::OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                opts.mode(FILE_MODE);
            }
            let mut file = opts
                .open(&tmp)
                .map_err(|e| StoreError::Storage(format!("failed to create temp file: {e}")))?;
            file.write_all(json.as_bytes())
                .map_err(|e| StoreError::Storage(format!("failed to write session: {e}")))?;
            file.sync_all()
                .map_err(|e| StoreError::Storage(format!("failed to sync session: {e}")))?;
        }
        std::fs::rename(&tmp, &path)
            .map_err(|e| StoreError::Storage(format!("failed to move session into place: {e}")))?;

        debug!(path = %path.display(), "saved session document");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self) -> Result<(), StoreError> {
        let path = self.document_path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed session document");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Storage(format!(
                "failed to remove session document: {e}"
            ))),
        }
    }

    async fn exists(&self) -> Result<bool, StoreError> {
        Ok(self.document_path().exists())
    }

    fn name(&self) -> &str {
        "file"
    }
}

// =============================================================================
// KeyringSessionStorage
// =============================================================================

/// OS keyring session storage.
///
/// Stores the JSON document as a keyring secret under the `pawsync` service.
#[cfg(feature = "system-keyring")]
pub struct KeyringSessionStorage {
    service: String,
}

#[cfg(feature = "system-keyring")]
impl KeyringSessionStorage {
    /// Create keyring storage with the default service name.
    pub fn new() -> Self {
        Self {
            service: "pawsync".to_string(),
        }
    }

    /// Create keyring storage with a custom service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Check whether the OS keyring is usable on this machine.
    pub fn is_available() -> bool {
        keyring::Entry::new("pawsync", "availability-probe")
            .map(|entry| {
                // Reading a missing entry is fine; a platform error is not.
                !matches!(entry.get_password(), Err(keyring::Error::PlatformFailure(_)))
            })
            .unwrap_or(false)
    }

    fn entry(&self) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&self.service, STORAGE_KEY)
            .map_err(|e| StoreError::Storage(format!("keyring unavailable: {e}")))
    }
}

#[cfg(feature = "system-keyring")]
impl Default for KeyringSessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "system-keyring")]
#[async_trait::async_trait]
impl SessionStorage for KeyringSessionStorage {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(json) => {
                let session: PersistedSession = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Serde(format!("invalid session document: {e}")))?;
                Ok(Some(session))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Storage(format!("keyring read failed: {e}"))),
        }
    }

    #[instrument(skip(self, session))]
    async fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        let json = serde_json::to_string(session).map_err(|e| StoreError::Serde(e.to_string()))?;
        self.entry()?
            .set_password(&json)
            .map_err(|e| StoreError::Storage(format!("keyring write failed: {e}")))
    }

    #[instrument(skip(self))]
    async fn remove(&self) -> Result<(), StoreError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Storage(format!("keyring delete failed: {e}"))),
        }
    }

    fn name(&self) -> &str {
        "keyring"
    }
}

// =============================================================================
// MemorySessionStorage
// =============================================================================

/// In-memory session storage.
///
/// Cloning shares the underlying slot, so a clone observes writes made
/// through the original.
#[derive(Clone, Default)]
pub struct MemorySessionStorage {
    slot: Arc<RwLock<Option<PersistedSession>>>,
}

impl MemorySessionStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage pre-seeded with a session document.
    pub fn with_session(session: PersistedSession) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Some(session))),
        }
    }

    /// Clear the stored document.
    pub fn clear(&self) {
        let mut slot = self.slot.write().expect("lock poisoned");
        *slot = None;
    }
}

#[async_trait::async_trait]
impl SessionStorage for MemorySessionStorage {
    async fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
        let slot = self.slot.read().expect("lock poisoned");
        Ok(slot.clone())
    }

    async fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        let mut slot = self.slot.write().expect("lock poisoned");
        *slot = Some(session.clone());
        Ok(())
    }

    async fn remove(&self) -> Result<(), StoreError> {
        let mut slot = self.slot.write().expect("lock poisoned");
        *slot = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Pick a concrete backend from configuration, falling back to file storage
/// when the keyring is unavailable.
pub fn storage_from_config(config: &crate::config::StorageConfig) -> Arc<dyn SessionStorage> {
    match config.backend {
        crate::config::StorageBackend::File => {
            Arc::new(FileSessionStorage::new(config.dir.clone()))
        }
        #[cfg(feature = "system-keyring")]
        crate::config::StorageBackend::Keyring => {
            if KeyringSessionStorage::is_available() {
                Arc::new(KeyringSessionStorage::new())
            } else {
                warn!("keyring backend unavailable, falling back to file storage");
                Arc::new(FileSessionStorage::new(config.dir.clone()))
            }
        }
        #[cfg(not(feature = "system-keyring"))]
        crate::config::StorageBackend::Keyring => {
            warn!("built without system-keyring support, falling back to file storage");
            Arc::new(FileSessionStorage::new(config.dir.clone()))
        }
        crate::config::StorageBackend::Memory => Arc::new(MemorySessionStorage::new()),
    }
}
