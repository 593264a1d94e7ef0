//! Token lifecycle and single-flight refresh
//!
//! [`TokenRefreshCoordinator`] is the only owner of the token pair. It
//! attaches credentials to outgoing calls and, when a call is rejected with
//! 401, refreshes the pair and replays the call once.
//!
//! At most one refresh network call is in flight per coordinator. The
//! refresh runs on its own task behind a shared future; every caller that
//! needs a refresh while it is running awaits that same future, and the
//! state returns to idle when the task finishes, whatever its outcome.

use bastion_config::AuthConfig;
use bastion_resilience::{spawn_shared, SharedOutcome};
use chrono::{DateTime, Utc};
use http::HeaderMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::auth::store::TokenStore;
use crate::auth::tokens::{self, TokenPair};
use crate::config::HttpConfig;
use crate::errors::{AuthErrorCode, HttpError, HttpResult};
use crate::transport::{send_with_deadline, Transport};
use crate::types::{insert_header, HttpMethod, HttpRequest, HttpResponse};

/// Observable refresh state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RefreshStatus {
    Idle,
    Refreshing { since: DateTime<Utc> },
}

enum RefreshState {
    Idle,
    Refreshing {
        outcome: SharedOutcome<TokenPair, HttpError>,
        since: DateTime<Utc>,
    },
}

struct CoordinatorInner {
    config: AuthConfig,
    http: HttpConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    tokens: RwLock<Option<TokenPair>>,
    state: Mutex<RefreshState>,
    restored: OnceCell<()>,
    refresh_count: AtomicU64,
}

/// Puts the coordinator back to idle when the refresh task ends
struct ReturnToIdle(Arc<CoordinatorInner>);

impl Drop for ReturnToIdle {
    fn drop(&mut self) {
        *self.0.state.lock() = RefreshState::Idle;
    }
}

/// Owner of the access/refresh token pair
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl TokenRefreshCoordinator {
    pub fn new(
        config: AuthConfig,
        http: HttpConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                http,
                transport,
                store,
                tokens: RwLock::new(None),
                state: Mutex::new(RefreshState::Idle),
                restored: OnceCell::new(),
                refresh_count: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    /// Load tokens persisted by a previous session.
    ///
    /// Tokens already held in memory take precedence over stored ones.
    pub async fn restore(&self) -> HttpResult<Option<TokenPair>> {
        self.inner.load_from_store().await?;
        let _ = self.inner.restored.set(());
        Ok(self.inner.current())
    }

    async fn ensure_restored(&self) {
        self.inner
            .restored
            .get_or_init(|| async {
                if let Err(e) = self.inner.load_from_store().await {
                    warn!("Could not restore tokens: {}", e);
                }
            })
            .await;
    }

    pub async fn tokens(&self) -> Option<TokenPair> {
        self.ensure_restored().await;
        self.inner.current()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.tokens().await.map(|pair| pair.access_token)
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.tokens().await.map(|pair| pair.refresh_token)
    }

    /// Whether a token pair is held whose refresh token has not expired
    pub async fn is_authenticated(&self) -> bool {
        self.tokens()
            .await
            .map(|pair| !tokens::is_expired(&pair.refresh_token, Duration::ZERO))
            .unwrap_or(false)
    }

    /// Replace the token pair and persist it
    pub async fn set_tokens(&self, pair: TokenPair) -> HttpResult<()> {
        pair.validate()?;
        self.inner.store_pair(&pair).await;
        Ok(())
    }

    pub async fn clear_tokens(&self) {
        self.inner.clear().await;
    }

    pub fn refresh_state(&self) -> RefreshStatus {
        match &*self.inner.state.lock() {
            RefreshState::Idle => RefreshStatus::Idle,
            RefreshState::Refreshing { since, .. } => RefreshStatus::Refreshing { since: *since },
        }
    }

    /// Number of refresh network calls that succeeded
    pub fn refresh_count(&self) -> u64 {
        self.inner.refresh_count.load(Ordering::Relaxed)
    }

    /// Exchange the refresh token for a new pair, joining a refresh already in flight
    pub async fn refresh(&self) -> HttpResult<TokenPair> {
        self.ensure_restored().await;

        let outcome = {
            let mut state = self.inner.state.lock();
            match &*state {
                RefreshState::Refreshing { outcome, .. } => {
                    debug!("Joining in-flight token refresh");
                    outcome.clone()
                }
                RefreshState::Idle => {
                    info!("Starting token refresh");
                    let inner = self.inner.clone();
                    let outcome = spawn_shared(async move {
                        let _idle = ReturnToIdle(inner.clone());
                        inner.perform_refresh().await
                    });
                    *state = RefreshState::Refreshing {
                        outcome: outcome.clone(),
                        since: Utc::now(),
                    };
                    outcome
                }
            }
        };

        outcome.await
    }

    /// Refresh unless the pair was already rotated since `used` was sent
    async fn refresh_if_stale(&self, used: Option<&str>) -> HttpResult<TokenPair> {
        if let Some(current) = self.inner.current() {
            if Some(current.access_token.as_str()) != used {
                debug!("Access token already rotated, reusing it");
                return Ok(current);
            }
        }
        self.refresh().await
    }

    /// Run `operation` with credential headers, refreshing and replaying it once on 401.
    ///
    /// `operation` may be called twice, so it receives the headers to use
    /// on each attempt. Calls to the auth endpoints themselves never
    /// trigger a refresh.
    pub async fn with_authentication<F, Fut, T>(&self, url: &str, operation: F) -> HttpResult<T>
    where
        F: Fn(HeaderMap) -> Fut,
        Fut: Future<Output = HttpResult<T>>,
    {
        if self.inner.config.is_auth_endpoint(url) {
            return operation(self.inner.auth_headers(None)?).await;
        }

        self.ensure_restored().await;

        let mut token = self.inner.current().map(|pair| pair.access_token);
        let skew = self.inner.config.expiry_skew;
        if let Some(expiring) = token
            .clone()
            .filter(|token| self.inner.config.proactive_refresh && tokens::is_expired(token, skew))
        {
            debug!("Access token expires within {:?}, refreshing before {}", skew, url);
            token = Some(self.refresh_if_stale(Some(&expiring)).await?.access_token);
        }

        match operation(self.inner.auth_headers(token.as_deref())?).await {
            Err(error) if error.is_unauthorized() => {
                debug!("{} answered 401, refreshing token", url);
                let pair = self.refresh_if_stale(token.as_deref()).await?;

                match operation(self.inner.auth_headers(Some(&pair.access_token))?).await {
                    Err(error) if error.is_unauthorized() => {
                        warn!("{} rejected the refreshed token", url);
                        Err(HttpError::reauthentication_required(format!(
                            "{} rejected the refreshed token: {}",
                            url,
                            error.message()
                        )))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Send `request` directly over the transport with credentials attached
    pub async fn authenticated_call(
        &self,
        request: HttpRequest,
        deadline: Duration,
    ) -> HttpResult<HttpResponse> {
        let url = request.url.clone();
        let transport = self.inner.transport.clone();

        self.with_authentication(&url, |headers| {
            let mut request = request.clone();
            request.headers.extend(headers);
            let transport = transport.clone();
            async move {
                send_with_deadline(transport.as_ref(), request, deadline)
                    .await?
                    .error_for_status()
            }
        })
        .await
    }

    /// Post `credentials` to the login endpoint and keep the issued pair.
    ///
    /// Returns the user payload of the response, `Null` when there is none.
    pub async fn login(&self, credentials: JsonValue) -> HttpResult<JsonValue> {
        let config = &self.inner.config;
        let url = self.inner.http.resolve_url(&config.login_endpoint)?;
        let mut request = HttpRequest::new(HttpMethod::Post, url).with_body(Some(credentials));
        request.headers.extend(self.inner.auth_headers(None)?);

        let response =
            send_with_deadline(self.inner.transport.as_ref(), request, self.inner.http.timeout).await?;
        if !response.is_success() {
            let error = HttpError::from_response(&response);
            return Err(match error.status() {
                Some(status @ (401 | 403)) => {
                    HttpError::auth(status, AuthErrorCode::InvalidCredentials, error.message())
                }
                _ => error,
            });
        }

        let pair = tokens::extract_tokens(&config.token_source, &response, None)?;
        self.inner.store_pair(&pair).await;
        info!("Logged in");

        Ok(tokens::extract_user(&config.token_source, &response))
    }

    /// Notify the logout endpoint, ignoring failures, then clear the tokens
    pub async fn logout(&self) {
        self.ensure_restored().await;

        if let Some(pair) = self.inner.current() {
            if let Err(e) = self.inner.send_logout(&pair).await {
                debug!("Logout request failed, ignoring: {}", e);
            }
        }

        self.inner.clear().await;
        info!("Logged out");
    }
}

impl CoordinatorInner {
    fn current(&self) -> Option<TokenPair> {
        self.tokens.read().clone()
    }

    async fn load_from_store(&self) -> HttpResult<()> {
        let storage = |e: crate::auth::store::TokenStoreError| HttpError::Storage(e.to_string());
        let access = self.store.get(&self.config.access_token_key).await.map_err(storage)?;
        let refresh = self.store.get(&self.config.refresh_token_key).await.map_err(storage)?;

        if let (Some(access), Some(refresh)) = (access, refresh) {
            match TokenPair::new(access, refresh) {
                Ok(pair) => {
                    let mut tokens = self.tokens.write();
                    if tokens.is_none() {
                        debug!("Restored tokens from {} storage", self.config.storage);
                        *tokens = Some(pair);
                    }
                }
                Err(e) => warn!("Ignoring stored tokens: {}", e),
            }
        }
        Ok(())
    }

    async fn store_pair(&self, pair: &TokenPair) {
        *self.tokens.write() = Some(pair.clone());
        let _ = self.restored.set(());

        for (key, value) in [
            (&self.config.access_token_key, &pair.access_token),
            (&self.config.refresh_token_key, &pair.refresh_token),
        ] {
            if let Err(e) = self.store.set(key, value).await {
                warn!("Could not persist {}: {}", key, e);
            }
        }
    }

    async fn clear(&self) {
        *self.tokens.write() = None;
        let _ = self.restored.set(());

        for key in [&self.config.access_token_key, &self.config.refresh_token_key] {
            if let Err(e) = self.store.remove(key).await {
                warn!("Could not remove {}: {}", key, e);
            }
        }
    }

    fn auth_headers(&self, access_token: Option<&str>) -> HttpResult<HeaderMap> {
        let mut headers = HeaderMap::new();

        if let Some(token) = access_token {
            let value = if self.config.scheme.is_empty() {
                token.to_string()
            } else {
                format!("{} {}", self.config.scheme, token)
            };
            insert_header(&mut headers, &self.config.header_name, &value)?;
        }
        if let Some(cookies) = self.store.cookie_header() {
            insert_header(&mut headers, "cookie", &cookies)?;
        }

        Ok(headers)
    }

    fn refresh_body(&self, refresh_token: &str) -> JsonValue {
        let mut body = JsonMap::new();
        body.insert(
            self.config.refresh_request_field.clone(),
            JsonValue::String(refresh_token.to_string()),
        );
        JsonValue::Object(body)
    }

    async fn perform_refresh(&self) -> HttpResult<TokenPair> {
        let Some(refresh_token) = self.current().map(|pair| pair.refresh_token) else {
            warn!("Token refresh needed but no refresh token is held");
            self.clear().await;
            return Err(HttpError::reauthentication_required(
                "No refresh token available, log in again",
            ));
        };

        if tokens::is_expired(&refresh_token, Duration::ZERO) {
            warn!("Refresh token has expired");
            self.clear().await;
            return Err(HttpError::auth(
                401,
                AuthErrorCode::RefreshTokenExpired,
                "Refresh token has expired, log in again",
            ));
        }

        match self.request_new_pair(&refresh_token).await {
            Ok(pair) => {
                self.store_pair(&pair).await;
                self.refresh_count.fetch_add(1, Ordering::Relaxed);
                info!("Token refresh succeeded");
                Ok(pair)
            }
            Err(error) => {
                warn!("Token refresh failed: {}", error);
                self.clear().await;
                let code = match error.status() {
                    Some(401 | 403) => AuthErrorCode::RefreshTokenExpired,
                    _ => AuthErrorCode::ReauthenticationRequired,
                };
                Err(HttpError::auth(
                    401,
                    code,
                    format!("Token refresh failed: {}", error.message()),
                ))
            }
        }
    }

    async fn request_new_pair(&self, refresh_token: &str) -> HttpResult<TokenPair> {
        let url = self.http.resolve_url(&self.config.refresh_endpoint)?;
        let mut request = HttpRequest::new(HttpMethod::Post, url)
            .with_body(Some(self.refresh_body(refresh_token)));
        request.headers.extend(self.auth_headers(None)?);

        let response = send_with_deadline(self.transport.as_ref(), request, self.config.refresh_timeout)
            .await?
            .error_for_status()?;

        tokens::extract_tokens(&self.config.token_source, &response, Some(refresh_token))
    }

    async fn send_logout(&self, pair: &TokenPair) -> HttpResult<()> {
        let url = self.http.resolve_url(&self.config.logout_endpoint)?;
        let mut request = HttpRequest::new(HttpMethod::Post, url)
            .with_body(Some(self.refresh_body(&pair.refresh_token)));
        request.headers.extend(self.auth_headers(Some(&pair.access_token))?);

        send_with_deadline(self.transport.as_ref(), request, self.http.timeout)
            .await?
            .error_for_status()?;
        Ok(())
    }
}
