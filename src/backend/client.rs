//! Typed HTTP client for the backend sync API.

use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::session::CanonicalUser;

use super::models::{LoginSyncRequest, ReferenceItem, RegisterSyncRequest, UserPayload};
use super::retry::{self, RetryPolicy};
use super::SyncError;

/// User agent sent with backend requests.
const USER_AGENT: &str = concat!("pawsync/", env!("CARGO_PKG_VERSION"));

/// Connection timeout for backend requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total request timeout for backend requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the backend sync endpoints.
///
/// Holds the retry policy for the two sync mutations; all other calls are
/// single-shot. Each request carries a fresh `X-Request-ID` so backend logs
/// can be correlated with client traces.
pub struct SyncClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl SyncClient {
    /// Create a client for the given base URL with an explicit retry policy.
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        }
    }

    /// Create a client from configuration.
    ///
    /// The base URL depends on which side of the deployment this process
    /// runs on; server-side processes talk to the internal URL.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.backend.base_url(), RetryPolicy::from(&config.retry))
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-Request-ID", uuid::Uuid::new_v4().to_string());
        // The Authorization header is attached only when a token exists;
        // unauthenticated calls must not send an empty Bearer value.
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        request
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        token: Option<&str>,
        body: &B,
    ) -> Result<serde_json::Value, SyncError> {
        let response = self
            .request(Method::POST, path, token)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::Api {
                status: status.as_u16(),
                message,
            });
        }
        success_payload(response).await
    }

    /// Report a fresh registration to the backend.
    ///
    /// Retried under the injected policy; an empty payload is a definitive
    /// failure and is not retried.
    pub async fn register_sync(
        &self,
        token: &str,
        request: &RegisterSyncRequest,
    ) -> Result<CanonicalUser, SyncError> {
        let value = retry::execute_with_retry(&self.retry, "register-sync", || {
            self.post_json("/auth/register-sync", Some(token), request)
        })
        .await
        .map_err(into_sync_failed)?;
        let value = require_payload(value, "register-sync")?;
        let user = parse_user(value, "register-sync")?;
        debug!(user_id = user.id, "registration synced");
        Ok(user)
    }

    /// Notify the backend of a sign-in.
    ///
    /// Carries no bearer token: at this point in the flow none has been
    /// minted yet. Retried under the injected policy.
    pub async fn login_sync(&self, uid: &str) -> Result<(), SyncError> {
        let request = LoginSyncRequest {
            uid: uid.to_string(),
        };
        let value = retry::execute_with_retry(&self.retry, "login-sync", || {
            self.post_json("/auth/login-sync", None, &request)
        })
        .await
        .map_err(into_sync_failed)?;
        require_payload(value, "login-sync")?;
        debug!(uid, "login synced");
        Ok(())
    }

    /// Fetch the canonical user for the bearer token. Single-shot.
    pub async fn current_user(&self, token: &str) -> Result<CanonicalUser, SyncError> {
        let response = self
            .request(Method::GET, "/auth/current-user", Some(token))
            .send()
            .await?;
        let status = response.status();
        match status.as_u16() {
            401 | 403 => {
                let message = response.text().await.unwrap_or_default();
                Err(SyncError::Unauthorized(if message.is_empty() {
                    "bearer token rejected".to_string()
                } else {
                    message
                }))
            }
            404 => Err(SyncError::NotFound(
                "no canonical user for this identity".to_string(),
            )),
            _ if !status.is_success() => {
                let message = response.text().await.unwrap_or_default();
                Err(SyncError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
            _ => {
                let value = require_payload(success_payload(response).await?, "current-user")?;
                parse_user(value, "current-user")
            }
        }
    }

    /// Fetch the entity-type reference table. No auth required.
    pub async fn entity_types(&self) -> Result<Vec<ReferenceItem>, SyncError> {
        self.fetch_reference("/entity-types").await
    }

    /// Fetch the service-type reference table. No auth required.
    pub async fn service_types(&self) -> Result<Vec<ReferenceItem>, SyncError> {
        self.fetch_reference("/service-types").await
    }

    async fn fetch_reference(&self, path: &str) -> Result<Vec<ReferenceItem>, SyncError> {
        let response = self.request(Method::GET, path, None).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

async fn success_payload(response: reqwest::Response) -> Result<serde_json::Value, SyncError> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(&text)
        .map_err(|e| SyncError::SyncFailed(format!("undecodable response body: {e}")))
}

fn into_sync_failed(error: SyncError) -> SyncError {
    match error {
        SyncError::SyncFailed(_) => error,
        other => SyncError::SyncFailed(other.to_string()),
    }
}

/// Reject payloads that carry no usable data.
///
/// Mirrors the truthiness the sync contract demands: `null`, `false`, `0`,
/// the empty string and the empty object are all empty. Arrays always count
/// as data, even when empty.
fn require_payload(
    value: serde_json::Value,
    operation: &str,
) -> Result<serde_json::Value, SyncError> {
    if is_empty_payload(&value) {
        return Err(SyncError::SyncFailed(format!(
            "{operation} returned an empty payload"
        )));
    }
    Ok(value)
}

fn is_empty_payload(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Bool(b) => !b,
        serde_json::Value::Number(n) => n.as_f64() == Some(0.0),
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(_) => false,
    }
}

fn parse_user(value: serde_json::Value, operation: &str) -> Result<CanonicalUser, SyncError> {
    let payload: UserPayload = serde_json::from_value(value)
        .map_err(|e| SyncError::SyncFailed(format!("invalid {operation} payload: {e}")))?;
    Ok(payload.into_canonical())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> SyncClient {
        SyncClient::new(server.uri(), RetryPolicy::default())
    }

    fn user_body() -> serde_json::Value {
        serde_json::json!({
            "user_id": 7,
            "email": "a@b.com",
            "entity": { "name": "Ann", "type": ["owner"] },
            "profile": null
        })
    }

    fn register_request() -> RegisterSyncRequest {
        RegisterSyncRequest {
            name: "Ann".to_string(),
            email: "a@b.com".to_string(),
            uid: "uid-7".to_string(),
        }
    }

    #[test]
    fn test_is_empty_payload() {
        use serde_json::json;
        assert!(is_empty_payload(&json!(null)));
        assert!(is_empty_payload(&json!(false)));
        assert!(is_empty_payload(&json!(0)));
        assert!(is_empty_payload(&json!("")));
        assert!(is_empty_payload(&json!({})));

        assert!(!is_empty_payload(&json!(true)));
        assert!(!is_empty_payload(&json!(1)));
        assert!(!is_empty_payload(&json!("ok")));
        assert!(!is_empty_payload(&json!({"status": "ok"})));
        assert!(!is_empty_payload(&json!([])));
    }

    #[tokio::test]
    async fn test_current_user_maps_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/current-user"))
            .and(header("Authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_body()))
            .mount(&server)
            .await;

        let user = client(&server).current_user("tok-1").await.unwrap();
        assert_eq!(user.id, 7);
        assert_eq!(user.email, "a@b.com");
        assert_eq!(user.name, "Ann");
        assert_eq!(user.entity_type[0].code, "owner");
    }

    #[tokio::test]
    async fn test_current_user_is_single_shot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/current-user"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).current_user("tok-1").await.unwrap_err();
        assert!(matches!(err, SyncError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_current_user_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/current-user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server).current_user("stale").await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_current_user_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/current-user"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server).current_user("tok-1").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_register_sync_retries_then_succeeds() {
        let server = MockServer::start().await;
        // Two failures, then success: mount order decides which mock answers.
        Mock::given(method("POST"))
            .and(path("/auth/register-sync"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/register-sync"))
            .and(header("Authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_body()))
            .mount(&server)
            .await;

        let user = client(&server)
            .register_sync("tok-1", &register_request())
            .await
            .unwrap();
        assert_eq!(user.id, 7);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn test_register_sync_exhausts_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register-sync"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server)
            .register_sync("tok-1", &register_request())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SyncFailed(_)));
    }

    #[tokio::test]
    async fn test_register_sync_empty_object_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register-sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .register_sync("tok-1", &register_request())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SyncFailed(_)));
    }

    #[tokio::test]
    async fn test_register_sync_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register-sync"))
            .respond_with(ResponseTemplate::new(422))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .register_sync("tok-1", &register_request())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SyncFailed(_)));
    }

    #[tokio::test]
    async fn test_login_sync_omits_authorization_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login-sync"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})),
            )
            .mount(&server)
            .await;

        client(&server).login_sync("uid-7").await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
        assert!(requests[0].headers.contains_key("x-request-id"));

        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body, serde_json::json!({ "uid": "uid-7" }));
    }

    #[tokio::test]
    async fn test_login_sync_empty_body_is_sync_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login-sync"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = client(&server).login_sync("uid-7").await.unwrap_err();
        assert!(matches!(err, SyncError::SyncFailed(_)));
    }

    #[tokio::test]
    async fn test_reference_tables() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entity-types"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": 1, "name": "owner" },
                { "id": 2, "name": "veterinarian" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/service-types"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": 1, "code": "grooming" }
            ])))
            .mount(&server)
            .await;

        let client = client(&server);
        let entities = client.entity_types().await.unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].code, "owner");

        let services = client.service_types().await.unwrap();
        assert_eq!(services[0].code, "grooming");
    }
}
