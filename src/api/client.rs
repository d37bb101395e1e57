//! Authenticated HTTP client for the portal APIs
//!
//! Every request goes through one pipeline: pre-flight token checks,
//! bearer injection, and a single refresh-and-replay when the server
//! answers 401. Unrecoverable auth failures end the session through
//! [`SessionTerminator`] before the error is returned.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::envelope::{decode_success, normalize_error, SUCCESS_CODE};
use super::transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
use crate::auth::{
    inspect, CredentialPair, RefreshCoordinator, SessionHost, SessionTerminator, TokenStore,
};
use crate::config::{ClientConfig, FileTokenStore};
use crate::error::ApiError;
use crate::models::{TokenGrant, UserProfile};

/// One logical request. Replays reuse the same descriptor.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Overrides the profile timeout for this request only
    pub timeout: Option<Duration>,
    retried: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            timeout: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set once a refresh has been spent on this request, before sending
    /// or for a replay after 401.
    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

/// Session-aware client for one backend profile.
pub struct ApiClient {
    config: ClientConfig,
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    coordinator: Arc<RefreshCoordinator>,
    terminator: Arc<SessionTerminator>,
}

impl ApiClient {
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
        host: Arc<dyn SessionHost>,
    ) -> Result<Self, ApiError> {
        let terminator = Arc::new(SessionTerminator::new(
            store.clone(),
            host,
            config.login_route.clone(),
        ));
        let coordinator = Arc::new(RefreshCoordinator::new(
            &config,
            store.clone(),
            transport.clone(),
            terminator.clone(),
        )?);
        Ok(Self {
            config,
            store,
            transport,
            coordinator,
            terminator,
        })
    }

    /// Client backed by the on-disk credential file and a real HTTP transport.
    pub fn from_profile(config: ClientConfig, host: Arc<dyn SessionHost>) -> Result<Self, ApiError> {
        let store = FileTokenStore::open_default(&config.key_prefix)?;
        tracing::debug!("Using credentials at {}", store.path().display());
        let transport = ReqwestTransport::new()?;
        Self::new(config, Arc::new(store), Arc::new(transport), host)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn terminator(&self) -> &Arc<SessionTerminator> {
        &self.terminator
    }

    /// Send and unwrap the success envelope's `data`.
    pub async fn execute(&self, request: RequestDescriptor) -> Result<Value, ApiError> {
        let response = self.send(request).await?;
        decode_success(&response)
    }

    /// Send through the auth pipeline, returning the raw 2xx response.
    pub async fn send(&self, mut request: RequestDescriptor) -> Result<HttpResponse, ApiError> {
        let excluded = self.config.is_excluded(&request.path);
        let mut token = None;
        if !excluded {
            let (current, refreshed) = self.preflight().await?;
            token = current;
            request.retried = refreshed;
        }

        loop {
            let http = self.build(&request, token.as_deref())?;
            let response = self.transport.send(http).await?;

            if response.is_success() {
                return Ok(response);
            }
            if response.status != 401 {
                return Err(normalize_error(&response, excluded));
            }

            if self.config.is_refresh_path(&request.path) {
                self.terminator.terminate("refresh endpoint rejected the session");
                return Err(ApiError::TokenExpired);
            }
            if excluded {
                return Err(normalize_error(&response, true));
            }
            if request.retried {
                tracing::warn!("{} still unauthorized after refresh", request.path);
                self.terminator.terminate("request rejected after token refresh");
                return Err(ApiError::TokenExpired);
            }

            request.retried = true;
            tracing::debug!("{} returned 401, refreshing and replaying", request.path);
            token = Some(self.recover(token.as_deref()).await?);
        }
    }

    /// Check the stored token before sending. Expired tokens block on a
    /// refresh; tokens close to expiry refresh in the background. The flag
    /// is true when a blocking refresh was made.
    async fn preflight(&self) -> Result<(Option<String>, bool), ApiError> {
        let Some(token) = self.store.access_token() else {
            return Ok((None, false));
        };

        if !inspect::is_well_formed(&token) {
            let err = ApiError::MalformedToken("access token is not a three-part token".into());
            self.terminator.terminate(&err.to_string());
            return Err(err);
        }

        let now = inspect::now_ms();
        if inspect::is_expired(&token, now) {
            tracing::debug!("Access token expired, refreshing before sending");
            let fresh = self.coordinator.request_refresh().await?;
            return Ok((Some(fresh), true));
        }

        if inspect::is_expiring_soon(&token, now, self.config.expiring_soon_window_ms())
            && !self.coordinator.is_refreshing()
        {
            self.refresh_in_background();
        }
        Ok((Some(token), false))
    }

    fn refresh_in_background(&self) {
        tracing::debug!("Access token expiring soon, refreshing in background");
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.request_refresh().await {
                tracing::warn!("Background token refresh failed: {}", e);
            }
        });
    }

    /// Token for the replay after a 401.
    async fn recover(&self, sent: Option<&str>) -> Result<String, ApiError> {
        if let Some(current) = self.store.access_token() {
            // Someone else already refreshed while this request was out
            if Some(current.as_str()) != sent && !inspect::is_expired(&current, inspect::now_ms())
            {
                tracing::debug!("Replaying with token refreshed by another request");
                return Ok(current);
            }
        }
        self.coordinator.request_refresh().await
    }

    fn build(&self, request: &RequestDescriptor, token: Option<&str>) -> Result<HttpRequest, ApiError> {
        let url = self.config.url(&request.path)?;
        let timeout = request
            .timeout
            .unwrap_or_else(|| self.config.timeout_for(&request.path));

        let mut http = HttpRequest::new(request.method.clone(), url, timeout);
        http.query = request.query.clone();
        http.body = request.body.clone();

        let request_id = uuid::Uuid::new_v4().to_string();
        http.set_header("X-Request-Id", request_id.as_str());
        if let Some(token) = token {
            http.set_header("Authorization", format!("Bearer {}", token));
        }

        tracing::debug!(
            request_id = %request_id,
            retried = request.retried,
            "{} {}",
            request.method,
            request.path
        );
        Ok(http)
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestDescriptor) -> Result<T, ApiError> {
        let data = self.execute(request).await?;
        serde_json::from_value(data).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.call(RequestDescriptor::get(path)).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.call(RequestDescriptor::post(path).json(to_body(body)?))
            .await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.call(RequestDescriptor::put(path).json(to_body(body)?))
            .await
    }

    pub async fn patch<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.call(RequestDescriptor::patch(path).json(to_body(body)?))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.call(RequestDescriptor::delete(path)).await
    }

    /// Exchange credentials for a token pair and cache the returned user.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Option<UserProfile>, ApiError> {
        let request = RequestDescriptor::post(self.config.login_path.clone())
            .json(json!({ "username": identifier, "password": secret }));
        let response = self.send(request).await?;

        let body = response
            .json()
            .ok_or_else(|| ApiError::Decode("login response is not JSON".to_string()))?;
        // A coded envelope can still report failure with HTTP 200
        if body
            .get("code")
            .and_then(Value::as_i64)
            .is_some_and(|code| code != SUCCESS_CODE)
        {
            decode_success(&response)?;
        }
        let grant = TokenGrant::from_body(&body)
            .ok_or_else(|| ApiError::Decode("login response missing access token".to_string()))?;

        let refresh_token = grant.refresh_token.unwrap_or_default();
        if refresh_token.is_empty() {
            tracing::warn!("Login returned no refresh token; session ends at access token expiry");
        }
        self.store
            .set(&CredentialPair::new(grant.access_token, refresh_token))?;
        if let Some(user) = &grant.user {
            self.store.set_user_profile(user)?;
        }
        self.terminator.session_started();

        tracing::info!("Logged in as {}", identifier);
        Ok(grant.user)
    }

    /// Tell the server (if it has a logout endpoint) and forget the session.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let live = self
            .store
            .access_token()
            .is_some_and(|t| !inspect::is_expired(&t, inspect::now_ms()));
        if let Some(path) = &self.config.logout_path {
            if live {
                if let Err(e) = self.send(RequestDescriptor::post(path.clone())).await {
                    tracing::warn!("Server logout failed: {}", e);
                }
            }
        }
        self.store.clear()?;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Profile cached at login or by the last [`Self::fetch_user_info`].
    pub fn current_user(&self) -> Option<UserProfile> {
        self.store.user_profile()
    }

    /// Fetch the current user and update the cached profile.
    pub async fn fetch_user_info(&self) -> Result<UserProfile, ApiError> {
        let path = self.config.user_info_path.clone().ok_or_else(|| {
            ApiError::InvalidRequest("profile has no user info endpoint".to_string())
        })?;
        let profile: UserProfile = self.call(RequestDescriptor::get(path)).await?;
        self.store.set_user_profile(&profile)?;
        Ok(profile)
    }
}

fn to_body<B: Serialize>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))
}
