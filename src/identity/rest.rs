//! REST client for the hosted identity provider.
//!
//! Speaks the provider's password-grant token endpoint, signup endpoint and
//! refresh-token grant. Every request carries the project API key; the
//! provider mints the bearer tokens that the backend sync client forwards.

use std::sync::RwLock;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use super::{IdentityError, IdentityHandle, IdentityProvider, OperationType, Registration};

/// Request timeout for identity endpoints.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for the hosted identity service.
#[derive(Debug, Clone)]
pub struct RestProviderConfig {
    /// Base URL of the identity API, e.g. `https://id.example.com/auth/v1`.
    pub base_url: String,
    /// Project API key sent with every request.
    pub api_key: String,
}

// =============================================================================
// Provider
// =============================================================================

/// Identity provider backed by the hosted REST API.
///
/// Keeps a mirror of the most recent signed-in handle so that token fetches
/// can be answered locally while the access token is still fresh. The mirror
/// is process-local state, never persisted.
pub struct RestIdentityProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    session: RwLock<Option<IdentityHandle>>,
}

impl RestIdentityProvider {
    /// Create a provider from connection settings.
    pub fn new(config: RestProviderConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            session: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn remember(&self, handle: &IdentityHandle) {
        let mut guard = self.session.write().expect("lock poisoned");
        *guard = Some(handle.clone());
    }

    fn cached_token(&self, uid: &str) -> Option<String> {
        let guard = self.session.read().expect("lock poisoned");
        guard
            .as_ref()
            .filter(|s| s.uid == uid && !s.is_expired())
            .map(|s| s.access_token.clone())
    }

    fn take_refresh_token(&self, handle: &IdentityHandle) -> Option<String> {
        // Prefer the mirror's refresh token: it is rotated on every refresh,
        // while the caller's handle may hold a stale one.
        let guard = self.session.read().expect("lock poisoned");
        guard
            .as_ref()
            .filter(|s| s.uid == handle.uid)
            .and_then(|s| s.refresh_token.clone())
            .or_else(|| handle.refresh_token.clone())
    }

    async fn post_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.http
            .post(self.url(&format!("/token?grant_type={grant_type}")))
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await
    }

    async fn refresh(&self, handle: &IdentityHandle) -> Result<IdentityHandle, IdentityError> {
        let refresh_token = self.take_refresh_token(handle).ok_or_else(|| {
            IdentityError::TokenFetchFailed("no refresh token available".to_string())
        })?;

        let response = self
            .post_grant(
                "refresh_token",
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await
            .map_err(|e| IdentityError::TokenFetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::TokenFetchFailed(format!(
                "refresh rejected with status {status}: {}",
                error_message(&body)
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))?;
        let refreshed = token.into_handle()?;
        self.remember(&refreshed);
        debug!(uid = %refreshed.uid, "refreshed identity token");
        Ok(refreshed)
    }
}

#[async_trait::async_trait]
impl IdentityProvider for RestIdentityProvider {
    async fn login(&self, email: &str, password: &str) -> Result<IdentityHandle, IdentityError> {
        let response = self
            .post_grant(
                "password",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await
            .map_err(|e| IdentityError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_login_failure(status.as_u16(), &body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))?;
        let handle = token.into_handle()?;
        self.remember(&handle);
        debug!(uid = %handle.uid, "signed in");
        Ok(handle)
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Registration, IdentityError> {
        let response = self
            .http
            .post(self.url("/signup"))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "data": { "display_name": display_name },
            }))
            .send()
            .await
            .map_err(|e| IdentityError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_signup_failure(status.as_u16(), &body));
        }

        let signup: SignupResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))?;

        // With duplicate-email obscuring enabled the provider answers 200
        // with a user record that has no identities and no session.
        if signup.session_absent() && signup.identities_empty() {
            return Err(IdentityError::EmailInUse);
        }

        let handle = signup.into_handle()?;
        self.remember(&handle);
        debug!(uid = %handle.uid, "registered account");
        Ok(Registration {
            handle,
            operation: OperationType::SignIn,
        })
    }

    async fn fetch_token(
        &self,
        handle: &IdentityHandle,
        force_refresh: bool,
    ) -> Result<String, IdentityError> {
        if !force_refresh {
            if let Some(token) = self.cached_token(&handle.uid) {
                return Ok(token);
            }
            if !handle.is_expired() {
                // The caller carries a fresh handle the mirror has not seen
                // yet, typically right after a session event.
                self.remember(handle);
                return Ok(handle.access_token.clone());
            }
        }
        let refreshed = self.refresh(handle).await?;
        Ok(refreshed.access_token)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let token = {
            let mut guard = self.session.write().expect("lock poisoned");
            guard.take().map(|s| s.access_token)
        };

        // Best-effort revoke: the local session is already gone, and an
        // unreachable provider must not block sign-out.
        if let Some(token) = token {
            let result = self
                .http
                .post(self.url("/logout"))
                .header("apikey", &self.api_key)
                .header("Authorization", format!("Bearer {token}"))
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = response.status().as_u16(), "logout revoke rejected");
                }
                Err(e) => warn!(error = %e, "logout revoke failed"),
                Ok(_) => {}
            }
        }
        Ok(())
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: Option<ProviderUser>,
}

impl TokenResponse {
    fn into_handle(self) -> Result<IdentityHandle, IdentityError> {
        let user = self
            .user
            .ok_or_else(|| IdentityError::Decode("token response missing user".to_string()))?;
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|ei| chrono::Utc::now().timestamp() + ei));
        let display_name = user.display_name();
        Ok(IdentityHandle::with_expires_at(
            user.id,
            user.email.unwrap_or_default(),
            display_name,
            self.access_token,
            self.refresh_token,
            expires_at,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SignupResponse {
    // Session fields are present when the provider signs the account in
    // immediately; absent when confirmation is pending.
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: Option<ProviderUser>,
    // When the response is a bare user record these fields sit at the top
    // level instead.
    id: Option<String>,
    email: Option<String>,
    identities: Option<Vec<serde_json::Value>>,
}

impl SignupResponse {
    fn session_absent(&self) -> bool {
        self.access_token.is_none()
    }

    fn identities_empty(&self) -> bool {
        match (&self.user, &self.identities) {
            (Some(user), _) => user.identities.as_ref().is_some_and(Vec::is_empty),
            (None, Some(identities)) => identities.is_empty(),
            (None, None) => false,
        }
    }

    fn into_handle(self) -> Result<IdentityHandle, IdentityError> {
        let access_token = self.access_token.ok_or_else(|| {
            IdentityError::Other(
                "signup succeeded but no session was issued; confirmation may be required"
                    .to_string(),
            )
        })?;
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|ei| chrono::Utc::now().timestamp() + ei));
        let (uid, email, display_name) = match self.user {
            Some(user) => {
                let display_name = user.display_name();
                (user.id, user.email.unwrap_or_default(), display_name)
            }
            None => (
                self.id
                    .ok_or_else(|| IdentityError::Decode("signup response missing user id".to_string()))?,
                self.email.unwrap_or_default(),
                None,
            ),
        };
        Ok(IdentityHandle::with_expires_at(
            uid,
            email,
            display_name,
            access_token,
            self.refresh_token,
            expires_at,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ProviderUser {
    id: String,
    email: Option<String>,
    user_metadata: Option<serde_json::Value>,
    identities: Option<Vec<serde_json::Value>>,
}

impl ProviderUser {
    fn display_name(&self) -> Option<String> {
        self.user_metadata
            .as_ref()
            .and_then(|m| m.get("display_name"))
            .and_then(|v| v.as_str())
            .map(String::from)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
    error: Option<String>,
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed
            .error_description
            .or(parsed.msg)
            .or(parsed.error)
            .unwrap_or_else(|| body.to_string()),
        Err(_) => body.to_string(),
    }
}

fn error_code(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error_code)
}

fn classify_login_failure(status: u16, body: &str) -> IdentityError {
    let message = error_message(body);
    if status == 400 || status == 401 {
        let code = error_code(body);
        if code.as_deref() == Some("invalid_credentials")
            || message.contains("Invalid login credentials")
        {
            return IdentityError::InvalidCredentials;
        }
    }
    if status >= 500 {
        return IdentityError::ProviderUnavailable(format!("status {status}: {message}"));
    }
    IdentityError::Other(format!("login rejected with status {status}: {message}"))
}

fn classify_signup_failure(status: u16, body: &str) -> IdentityError {
    let message = error_message(body);
    let code = error_code(body);
    if code.as_deref() == Some("user_already_exists") || message.contains("already registered") {
        return IdentityError::EmailInUse;
    }
    if status >= 500 {
        return IdentityError::ProviderUnavailable(format!("status {status}: {message}"));
    }
    IdentityError::Other(format!("signup rejected with status {status}: {message}"))
}
