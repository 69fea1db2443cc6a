//! In-memory identity provider for tests and offline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::{IdentityError, IdentityHandle, IdentityProvider, OperationType, Registration};

#[derive(Debug, Clone)]
struct StaticAccount {
    uid: String,
    password: String,
    display_name: Option<String>,
}

/// Identity provider backed by an in-memory account table.
///
/// Issues sequential tokens (`static-token-1`, `static-token-2`, ...) and
/// mirrors the production provider's contract: pass-through, no retries,
/// duplicate registration rejected. Cloning shares the account table.
#[derive(Clone, Default)]
pub struct StaticIdentityProvider {
    accounts: Arc<RwLock<HashMap<String, StaticAccount>>>,
    session: Arc<RwLock<Option<IdentityHandle>>>,
    token_counter: Arc<AtomicU64>,
}

impl StaticIdentityProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider pre-seeded with one account.
    pub fn with_account(email: &str, password: &str, uid: &str) -> Self {
        let provider = Self::new();
        provider.add_account(email, password, uid, None);
        provider
    }

    /// Add an account to the table.
    pub fn add_account(&self, email: &str, password: &str, uid: &str, display_name: Option<&str>) {
        let mut accounts = self.accounts.write().expect("lock poisoned");
        accounts.insert(
            email.to_string(),
            StaticAccount {
                uid: uid.to_string(),
                password: password.to_string(),
                display_name: display_name.map(String::from),
            },
        );
    }

    /// Number of registered accounts.
    pub fn len(&self) -> usize {
        self.accounts.read().expect("lock poisoned").len()
    }

    /// Whether the account table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_token(&self) -> String {
        let n = self.token_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("static-token-{n}")
    }

    fn issue_handle(&self, email: &str, account: &StaticAccount) -> IdentityHandle {
        let handle = IdentityHandle::new(
            account.uid.clone(),
            email,
            account.display_name.clone(),
            self.next_token(),
            Some(format!("static-refresh-{}", account.uid)),
            Some(3600),
        );
        let mut session = self.session.write().expect("lock poisoned");
        *session = Some(handle.clone());
        handle
    }
}

#[async_trait::async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn login(&self, email: &str, password: &str) -> Result<IdentityHandle, IdentityError> {
        let account = {
            let accounts = self.accounts.read().expect("lock poisoned");
            accounts.get(email).cloned()
        };
        match account {
            Some(account) if account.password == password => Ok(self.issue_handle(email, &account)),
            _ => Err(IdentityError::InvalidCredentials),
        }
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Registration, IdentityError> {
        let account = {
            let mut accounts = self.accounts.write().expect("lock poisoned");
            if accounts.contains_key(email) {
                return Err(IdentityError::EmailInUse);
            }
            let account = StaticAccount {
                uid: uuid::Uuid::new_v4().to_string(),
                password: password.to_string(),
                display_name: Some(display_name.to_string()),
            };
            accounts.insert(email.to_string(), account.clone());
            account
        };
        Ok(Registration {
            handle: self.issue_handle(email, &account),
            operation: OperationType::SignIn,
        })
    }

    async fn fetch_token(
        &self,
        handle: &IdentityHandle,
        force_refresh: bool,
    ) -> Result<String, IdentityError> {
        if !force_refresh && !handle.is_expired() {
            return Ok(handle.access_token.clone());
        }
        let account = {
            let accounts = self.accounts.read().expect("lock poisoned");
            accounts
                .values()
                .find(|a| a.uid == handle.uid)
                .cloned()
        };
        match account {
            Some(account) => Ok(self.issue_handle(&handle.email, &account).access_token),
            None => Err(IdentityError::TokenFetchFailed(format!(
                "unknown uid {}",
                handle.uid
            ))),
        }
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let mut session = self.session.write().expect("lock poisoned");
        *session = None;
        Ok(())
    }
}
