//! Resilient HTTP client
//!
//! Every call flows through the same layers, outermost first:
//!
//! 1. token coordination (credentials, refresh and a single replay on 401)
//! 2. response cache, for read calls only
//! 3. request deduplication of identical in-flight calls
//! 4. circuit breaker
//! 5. retry with backoff
//! 6. the transport
//!
//! Cache state is keyed by [`CallSignature`]; deduplication also keys on
//! the credentials each call was sent with.

use bastion_caching::{CacheStats, RequestCache};
use bastion_config::BastionConfig;
use bastion_resilience::{
    CircuitBreaker, CircuitStats, DedupStats, RequestDeduplicator, RetryExecutor, RetryPolicy,
};
use http::HeaderMap;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{build_token_store, TokenPair, TokenRefreshCoordinator, TokenStore};
use crate::config::HttpConfig;
use crate::errors::{HttpError, HttpResult};
use crate::health::{HealthCallback, HealthMonitor, HealthStatus};
use crate::options::RequestOptions;
use crate::signature::CallSignature;
use crate::transport::{send_with_deadline, ReqwestTransport, Transport};
use crate::types::{HttpMethod, HttpRequest, HttpResponse};

/// Circuit breaker, retry and transport for one attempt chain
#[derive(Clone)]
struct Pipeline {
    transport: Arc<dyn Transport>,
    breaker: Option<CircuitBreaker>,
    retry: RetryExecutor,
}

impl Pipeline {
    async fn send(
        &self,
        request: HttpRequest,
        deadline: Duration,
        policy: Option<RetryPolicy>,
    ) -> HttpResult<HttpResponse> {
        let attempt = || {
            let request = request.clone();
            let transport = self.transport.clone();
            async move {
                send_with_deadline(transport.as_ref(), request, deadline)
                    .await?
                    .error_for_status()
            }
        };

        let retried = async {
            let policy = policy.as_ref().unwrap_or_else(|| self.retry.policy());
            self.retry
                .execute_with_policy(policy, attempt)
                .await
                .map_err(HttpError::from_retry)
        };

        match &self.breaker {
            Some(breaker) => breaker.execute(|| retried).await.map_err(HttpError::from),
            None => retried.await,
        }
    }
}

struct ClientInner {
    config: BastionConfig,
    http: HttpConfig,
    pipeline: Pipeline,
    coordinator: TokenRefreshCoordinator,
    cache: Option<RequestCache<HttpResponse>>,
    dedup: Option<RequestDeduplicator<HttpResponse, HttpError>>,
    health: Option<HealthMonitor>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
    fn stop_background(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        if let Some(health) = &self.health {
            health.stop();
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.stop_background();
    }
}

/// Builder for [`ResilientClient`]
pub struct ResilientClientBuilder {
    config: BastionConfig,
    transport: Option<Arc<dyn Transport>>,
    token_store: Option<Arc<dyn TokenStore>>,
    on_health_change: Option<HealthCallback>,
}

impl ResilientClientBuilder {
    pub fn new(config: BastionConfig) -> Self {
        Self {
            config,
            transport: None,
            token_store: None,
            on_health_change: None,
        }
    }

    /// Use `transport` instead of a reqwest transport built from the client config
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use `store` instead of the backend selected by the auth config
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    pub fn on_health_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&HealthStatus) + Send + Sync + 'static,
    {
        self.on_health_change = Some(Arc::new(callback));
        self
    }

    /// Validate the configuration and assemble the client.
    ///
    /// Background tasks (deduplication sweeper, health monitor) are started
    /// when a tokio runtime is available.
    pub fn build(self) -> HttpResult<ResilientClient> {
        let config = self.config;
        config
            .validate_all()
            .map_err(|e| HttpError::ConfigError(e.to_string()))?;

        let http = HttpConfig::from(&config.client);
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::with_config(http.clone())?),
        };
        let store = match self.token_store {
            Some(store) => store,
            None => build_token_store(&config.auth).map_err(|e| HttpError::ConfigError(e.to_string()))?,
        };

        let breaker = config.circuit_breaker.enabled.then(|| {
            CircuitBreaker::new(bastion_resilience::CircuitBreakerConfig::from(
                &config.circuit_breaker,
            ))
        });
        let pipeline = Pipeline {
            transport: transport.clone(),
            breaker,
            retry: RetryExecutor::new(RetryPolicy::from(&config.retry)),
        };

        let cache = if config.cache.enabled {
            Some(
                RequestCache::from_config(&config.cache)
                    .map_err(|e| HttpError::ConfigError(e.to_string()))?,
            )
        } else {
            None
        };
        let dedup = config
            .dedup
            .enabled
            .then(|| RequestDeduplicator::from_config(&config.dedup));
        let health = config.health.enabled.then(|| {
            HealthMonitor::new(
                config.health.clone(),
                http.clone(),
                transport.clone(),
                self.on_health_change,
            )
        });

        let coordinator =
            TokenRefreshCoordinator::new(config.auth.clone(), http.clone(), transport, store);

        let client = ResilientClient {
            inner: Arc::new(ClientInner {
                config,
                http,
                pipeline,
                coordinator,
                cache,
                dedup,
                health,
                sweeper: Mutex::new(None),
            }),
        };
        client.start_background();

        info!(
            "Resilient client ready (cache: {}, dedup: {}, circuit breaker: {}, health: {})",
            client.inner.cache.is_some(),
            client.inner.dedup.is_some(),
            client.inner.pipeline.breaker.is_some(),
            client.inner.health.is_some()
        );
        Ok(client)
    }
}

/// HTTP client with token refresh, caching, deduplication, circuit breaking and retry
#[derive(Clone)]
pub struct ResilientClient {
    inner: Arc<ClientInner>,
}

impl ResilientClient {
    pub fn new(config: BastionConfig) -> HttpResult<Self> {
        ResilientClientBuilder::new(config).build()
    }

    pub fn builder(config: BastionConfig) -> ResilientClientBuilder {
        ResilientClientBuilder::new(config)
    }

    pub fn config(&self) -> &BastionConfig {
        &self.inner.config
    }

    /// Coordinator owning this client's tokens
    pub fn coordinator(&self) -> &TokenRefreshCoordinator {
        &self.inner.coordinator
    }

    fn start_background(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("No tokio runtime, background tasks not started");
            return;
        }

        if let Some(dedup) = &self.inner.dedup {
            *self.inner.sweeper.lock() =
                Some(dedup.start_sweeper(self.inner.config.dedup.sweep_interval));
        }
        if let Some(health) = &self.inner.health {
            health.start();
        }
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> HttpResult<HttpResponse> {
        self.request(HttpMethod::Get, url, None, options).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: JsonValue,
        options: RequestOptions,
    ) -> HttpResult<HttpResponse> {
        self.request(HttpMethod::Post, url, Some(body), options).await
    }

    pub async fn put(
        &self,
        url: &str,
        body: JsonValue,
        options: RequestOptions,
    ) -> HttpResult<HttpResponse> {
        self.request(HttpMethod::Put, url, Some(body), options).await
    }

    pub async fn patch(
        &self,
        url: &str,
        body: JsonValue,
        options: RequestOptions,
    ) -> HttpResult<HttpResponse> {
        self.request(HttpMethod::Patch, url, Some(body), options).await
    }

    pub async fn delete(&self, url: &str, options: RequestOptions) -> HttpResult<HttpResponse> {
        self.request(HttpMethod::Delete, url, None, options).await
    }

    /// Send a request through every layer of the client
    pub async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<JsonValue>,
        options: RequestOptions,
    ) -> HttpResult<HttpResponse> {
        let url = self.inner.http.resolve_url(url)?;
        let signature = CallSignature::new(method, &url, body.as_ref());

        let cache = self
            .inner
            .cache
            .as_ref()
            .filter(|_| method.is_read() && !options.skip_cache);
        let ticket = match cache {
            Some(cache) => {
                if let Some(hit) = cache.get(signature.as_str()) {
                    debug!("Cache hit for {}", signature);
                    return Ok(hit);
                }
                Some(cache.begin_read())
            }
            None => None,
        };

        let (signature_ref, options_ref, url_ref) = (&signature, &options, url.as_str());
        let send = |auth: HeaderMap| {
            let key = signature_ref.dedup_key(&auth);
            let request = self.build_request(method, url_ref, body.clone(), options_ref, auth);
            async move { self.dispatch(key, request?, options_ref).await }
        };

        let response = if options.skip_auth {
            send(HeaderMap::new()).await?
        } else {
            self.inner.coordinator.with_authentication(&url, send).await?
        };

        if let (Some(cache), Some(ticket)) = (cache, ticket) {
            let ttl = match options.cache_ttl {
                Some(ttl) => Some(ttl),
                None => cache.ttl_for_response(&url, response.header("cache-control")),
            };
            if let Some(ttl) = ttl {
                let etag = response.header("etag").map(str::to_string);
                if !cache.set_if_current(ticket, signature.as_str(), response.clone(), ttl, etag) {
                    debug!("Response for {} not cached", signature);
                }
            }
        } else if !method.is_read() && self.inner.config.cache.invalidate_on_mutation {
            if let Some(cache) = &self.inner.cache {
                let removed = cache.invalidate_where(|cached| CallSignature::is_read_of(cached, &url));
                if removed > 0 {
                    debug!("{} {} invalidated {} cached reads", method, url, removed);
                }
            }
        }

        Ok(response)
    }

    fn build_request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<JsonValue>,
        options: &RequestOptions,
        auth: HeaderMap,
    ) -> HttpResult<HttpRequest> {
        let mut request = HttpRequest::new(method, url).with_body(body);
        for (name, value) in &options.headers {
            request.set_header(name, value)?;
        }
        request.headers.extend(auth);
        Ok(request)
    }

    async fn dispatch(
        &self,
        key: String,
        request: HttpRequest,
        options: &RequestOptions,
    ) -> HttpResult<HttpResponse> {
        let pipeline = self.inner.pipeline.clone();
        let deadline = options.timeout.unwrap_or(self.inner.http.timeout);
        let policy = options.retry.clone();
        let call = move || async move { pipeline.send(request, deadline, policy).await };

        match self.inner.dedup.as_ref().filter(|_| !options.skip_dedup) {
            Some(dedup) => dedup.execute(key, call).await,
            None => call().await,
        }
    }

    /// Log in and return the user payload of the login response
    pub async fn login(&self, credentials: JsonValue) -> HttpResult<JsonValue> {
        let user = self.inner.coordinator.login(credentials).await?;
        self.clear_cache();
        Ok(user)
    }

    /// Best-effort logout; local tokens and cached responses are always cleared
    pub async fn logout(&self) {
        self.inner.coordinator.logout().await;
        self.clear_cache();
    }

    fn clear_cache(&self) {
        if let Some(cache) = &self.inner.cache {
            if let Err(e) = cache.invalidate(None) {
                warn!("Could not clear response cache: {}", e);
            }
        }
    }

    pub async fn tokens(&self) -> Option<TokenPair> {
        self.inner.coordinator.tokens().await
    }

    pub async fn set_tokens(&self, tokens: TokenPair) -> HttpResult<()> {
        self.inner.coordinator.set_tokens(tokens).await
    }

    pub async fn clear_tokens(&self) {
        self.inner.coordinator.clear_tokens().await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.coordinator.is_authenticated().await
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache.as_ref().map(|cache| cache.stats())
    }

    pub fn circuit_stats(&self) -> Option<CircuitStats> {
        self.inner.pipeline.breaker.as_ref().map(|breaker| breaker.stats())
    }

    pub fn dedup_stats(&self) -> Option<DedupStats> {
        self.inner.dedup.as_ref().map(|dedup| dedup.stats())
    }

    pub fn health_status(&self) -> Option<HealthStatus> {
        self.inner.health.as_ref().map(|health| health.status())
    }

    /// Remove cached responses whose signature matches the glob `pattern`,
    /// or all of them. Returns the number removed.
    pub fn invalidate_cache(&self, pattern: Option<&str>) -> HttpResult<usize> {
        match &self.inner.cache {
            Some(cache) => cache
                .invalidate(pattern)
                .map_err(|e| HttpError::InvalidRequest(e.to_string())),
            None => Ok(0),
        }
    }

    /// Stop background tasks. Requests can still be made afterwards.
    pub fn shutdown(&self) {
        self.inner.stop_background();
        info!("Resilient client background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;
    use crate::errors::AuthErrorCode;
    use crate::transport::MockTransport;
    use bastion_config::{RetryConditionKind, RetryStrategyKind};
    use bastion_resilience::RetryCondition;
    use serde_json::json;

    fn fast_retry_config() -> BastionConfig {
        let mut config = BastionConfig::default();
        config.retry.attempts = 3;
        config.retry.strategy = RetryStrategyKind::Fixed;
        config.retry.delay = Duration::from_millis(100);
        config
    }

    fn client_with(config: BastionConfig, transport: Arc<MockTransport>) -> ResilientClient {
        ResilientClient::builder(config)
            .transport(transport)
            .token_store(Arc::new(MemoryTokenStore::new()))
            .build()
            .unwrap()
    }

    fn client(transport: Arc<MockTransport>) -> ResilientClient {
        client_with(fast_retry_config(), transport)
    }

    fn bearer_only(token: &'static str) -> impl Fn(&HttpRequest) -> HttpResult<HttpResponse> {
        move |request| {
            let expected = format!("Bearer {}", token);
            if request.header("authorization") == Some(expected.as_str()) {
                Ok(HttpResponse::new(200, json!({"items": [1, 2, 3]})))
            } else {
                Ok(HttpResponse::new(401, json!({"code": "TOKEN_EXPIRED"})))
            }
        }
    }

    #[tokio::test]
    async fn test_login_refresh_and_retry() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(
            HttpMethod::Post,
            "/auth/login",
            HttpResponse::new(200, json!({"accessToken": "a1", "refreshToken": "r1", "user": {"id": 1}})),
        );
        transport.on(HttpMethod::Get, "/items", bearer_only("a2"));
        transport.reply(
            HttpMethod::Post,
            "/auth/refresh",
            HttpResponse::new(200, json!({"accessToken": "a2", "refreshToken": "r2"})),
        );

        let client = client(transport.clone());
        let user = client
            .login(json!({"username": "ada", "password": "pw"}))
            .await
            .unwrap();
        assert_eq!(user, json!({"id": 1}));
        assert!(client.is_authenticated().await);

        let response = client.get("/items", RequestOptions::new()).await.unwrap();
        assert_eq!(response.body, json!({"items": [1, 2, 3]}));

        let sent: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|request| request.url == "/items")
            .map(|request| request.header("authorization").map(str::to_string))
            .collect();
        assert_eq!(
            sent,
            vec![Some("Bearer a1".to_string()), Some("Bearer a2".to_string())]
        );
        assert_eq!(
            client.tokens().await,
            Some(TokenPair::new("a2", "r2").unwrap())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_401s_refresh_once() {
        let transport = Arc::new(MockTransport::new());
        transport.on(HttpMethod::Get, "/items", bearer_only("a2"));
        transport
            .reply(
                HttpMethod::Post,
                "/auth/refresh",
                HttpResponse::new(200, json!({"accessToken": "a2", "refreshToken": "r2"})),
            )
            .with_latency(HttpMethod::Post, "/auth/refresh", Duration::from_millis(50));

        let client = client(transport.clone());
        client
            .set_tokens(TokenPair::new("a1", "r1").unwrap())
            .await
            .unwrap();

        let calls = (0..8).map(|_| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .get("/items", RequestOptions::new().skip_dedup().skip_cache())
                    .await
            })
        });
        for result in futures::future::join_all(calls).await {
            assert_eq!(result.unwrap().unwrap().status, 200);
        }

        assert_eq!(transport.calls(HttpMethod::Post, "/auth/refresh"), 1);
    }

    #[tokio::test]
    async fn test_identical_calls_are_deduplicated() {
        let transport = Arc::new(MockTransport::new());
        transport
            .reply(HttpMethod::Get, "/slow", HttpResponse::new(200, json!({"n": 1})))
            .with_latency(HttpMethod::Get, "/slow", Duration::from_millis(30));
        transport
            .reply(HttpMethod::Post, "/orders", HttpResponse::new(201, json!({"ok": true})))
            .with_latency(HttpMethod::Post, "/orders", Duration::from_millis(30));

        let client = client(transport.clone());
        let no_cache = || RequestOptions::new().skip_cache();

        let (a, b) = tokio::join!(client.get("/slow", no_cache()), client.get("/slow", no_cache()));
        assert_eq!(a.unwrap().body, b.unwrap().body);
        assert_eq!(transport.calls(HttpMethod::Get, "/slow"), 1);

        let (a, b) = tokio::join!(
            client.post("/orders", json!({"item": 1}), RequestOptions::new()),
            client.post("/orders", json!({"item": 2}), RequestOptions::new()),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(transport.calls(HttpMethod::Post, "/orders"), 2);

        let stats = client.dedup_stats().unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.total_joined, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_with_rotated_token_does_not_join_stale_call() {
        let transport = Arc::new(MockTransport::new());
        transport
            .on(HttpMethod::Get, "/items", bearer_only("a2"))
            .with_latency(HttpMethod::Get, "/items", Duration::from_millis(200));
        transport.on(HttpMethod::Get, "/profile", bearer_only("a2"));
        transport.reply_sequence(
            HttpMethod::Post,
            "/auth/refresh",
            vec![
                Ok(HttpResponse::new(200, json!({"accessToken": "a2", "refreshToken": "r2"}))),
                Ok(HttpResponse::new(200, json!({"accessToken": "a3", "refreshToken": "r3"}))),
            ],
        );

        let client = client(transport.clone());
        client
            .set_tokens(TokenPair::new("a1", "r1").unwrap())
            .await
            .unwrap();

        let stale = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .get("/items", RequestOptions::new().skip_cache())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let profile = client.get("/profile", RequestOptions::new()).await.unwrap();
        assert_eq!(profile.status, 200);
        let fresh = client
            .get("/items", RequestOptions::new().skip_cache())
            .await
            .unwrap();
        assert_eq!(fresh.status, 200);
        assert_eq!(stale.await.unwrap().unwrap().status, 200);

        assert_eq!(transport.calls(HttpMethod::Post, "/auth/refresh"), 1);
        assert_eq!(
            client.tokens().await,
            Some(TokenPair::new("a2", "r2").unwrap())
        );
    }

    #[tokio::test]
    async fn test_reads_are_cached_and_mutations_invalidate() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(
            HttpMethod::Get,
            "/profile",
            HttpResponse::new(200, json!({"name": "ada"})).with_header("etag", "\"v1\""),
        );
        transport.reply(HttpMethod::Put, "/profile", HttpResponse::new(204, JsonValue::Null));

        let client = client(transport.clone());
        client.get("/profile", RequestOptions::new()).await.unwrap();
        client.get("/profile", RequestOptions::new()).await.unwrap();
        assert_eq!(transport.calls(HttpMethod::Get, "/profile"), 1);

        let stats = client.cache_stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size, 1);

        client
            .put("/profile", json!({"name": "grace"}), RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(client.cache_stats().unwrap().size, 0);

        client.get("/profile", RequestOptions::new()).await.unwrap();
        assert_eq!(transport.calls(HttpMethod::Get, "/profile"), 2);
    }

    #[tokio::test]
    async fn test_no_store_responses_are_not_cached() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(
            HttpMethod::Get,
            "/live",
            HttpResponse::new(200, json!({"tick": 1})).with_header("cache-control", "no-store"),
        );

        let client = client(transport.clone());
        client.get("/live", RequestOptions::new()).await.unwrap();
        client.get("/live", RequestOptions::new()).await.unwrap();

        assert_eq!(transport.calls(HttpMethod::Get, "/live"), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_max_age_is_clamped() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(
            HttpMethod::Get,
            "/items",
            HttpResponse::new(200, json!({"items": []}))
                .with_header("cache-control", "max-age=18446744073709551615"),
        );

        let client = client(transport.clone());
        let first = client.get("/items", RequestOptions::new()).await.unwrap();
        let second = client.get("/items", RequestOptions::new()).await.unwrap();

        assert_eq!(first.body, second.body);
        assert_eq!(transport.calls(HttpMethod::Get, "/items"), 1);
    }

    #[tokio::test]
    async fn test_invalidate_cache_by_pattern() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(HttpMethod::Get, "/users/1", HttpResponse::new(200, json!({"id": 1})));
        transport.reply(HttpMethod::Get, "/teams/1", HttpResponse::new(200, json!({"id": 1})));

        let client = client(transport);
        client.get("/users/1", RequestOptions::new()).await.unwrap();
        client.get("/teams/1", RequestOptions::new()).await.unwrap();

        assert_eq!(client.invalidate_cache(Some("GET:/users/*")).unwrap(), 1);
        assert_eq!(client.cache_stats().unwrap().size, 1);
        assert_eq!(client.invalidate_cache(None).unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_are_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.reply_sequence(
            HttpMethod::Get,
            "/flaky",
            vec![
                Ok(HttpResponse::new(503, JsonValue::Null)),
                Err(HttpError::Network("connection reset".to_string())),
                Ok(HttpResponse::new(200, json!({"ok": true}))),
            ],
        );

        let client = client(transport.clone());
        let response = client.get("/flaky", RequestOptions::new()).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(HttpMethod::Get, "/flaky"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_carry_attempt_log() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(HttpMethod::Get, "/down", HttpResponse::new(502, JsonValue::Null));

        let client = client(transport.clone());
        let error = client.get("/down", RequestOptions::new()).await.unwrap_err();

        assert_eq!(error.status(), Some(502));
        assert_eq!(error.attempt_log().len(), 3);
        assert_eq!(transport.calls(HttpMethod::Get, "/down"), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(HttpMethod::Get, "/missing", HttpResponse::new(404, JsonValue::Null));

        let client = client(transport.clone());
        let error = client.get("/missing", RequestOptions::new()).await.unwrap_err();

        assert_eq!(error.status(), Some(404));
        assert!(error.attempt_log().is_empty());
        assert_eq!(transport.calls(HttpMethod::Get, "/missing"), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_dispatch() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(HttpMethod::Get, "/broken", HttpResponse::new(500, JsonValue::Null));

        let mut config = fast_retry_config();
        config.retry.attempts = 1;
        config.circuit_breaker.threshold = 2;
        config.circuit_breaker.minimum_requests = 2;
        let client = client_with(config, transport.clone());

        for _ in 0..2 {
            let error = client.get("/broken", RequestOptions::new()).await.unwrap_err();
            assert_eq!(error.status(), Some(500));
        }

        let error = client.get("/broken", RequestOptions::new()).await.unwrap_err();
        assert!(matches!(error, HttpError::CircuitOpen { .. }));
        assert_eq!(transport.calls(HttpMethod::Get, "/broken"), 2);
        assert_eq!(client.circuit_stats().unwrap().total_rejected, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_is_not_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(HttpMethod::Get, "/broken", HttpResponse::new(500, JsonValue::Null));

        let mut config = fast_retry_config();
        config.retry.attempts = 1;
        config.retry.conditions = vec![RetryConditionKind::CircuitOpen];
        config.circuit_breaker.threshold = 1;
        config.circuit_breaker.minimum_requests = 1;
        let client = client_with(config, transport.clone());

        client.get("/broken", RequestOptions::new()).await.unwrap_err();

        let options = RequestOptions::new().retry(
            RetryPolicy::fixed(5, Duration::from_millis(10))
                .with_conditions(vec![RetryCondition::CircuitOpen]),
        );
        let error = client.get("/broken", options).await.unwrap_err();
        assert!(matches!(error, HttpError::CircuitOpen { .. }));
        assert_eq!(transport.calls(HttpMethod::Get, "/broken"), 1);
        assert_eq!(client.circuit_stats().unwrap().total_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_request_retry_policy() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(HttpMethod::Get, "/down", HttpResponse::new(503, JsonValue::Null));

        let client = client(transport.clone());
        let options = RequestOptions::new().retry(RetryPolicy::no_retry());
        client.get("/down", options).await.unwrap_err();

        assert_eq!(transport.calls(HttpMethod::Get, "/down"), 1);
    }

    #[tokio::test]
    async fn test_skip_auth_sends_no_credentials() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(HttpMethod::Get, "/public", HttpResponse::new(200, JsonValue::Null));

        let client = client(transport.clone());
        client
            .set_tokens(TokenPair::new("a1", "r1").unwrap())
            .await
            .unwrap();
        client
            .get(
                "/public",
                RequestOptions::new().skip_auth().header("x-trace", "t1"),
            )
            .await
            .unwrap();

        let request = transport.requests().pop().unwrap();
        assert_eq!(request.header("authorization"), None);
        assert_eq!(request.header("x-trace"), Some("t1"));
    }

    #[tokio::test]
    async fn test_failed_refresh_surfaces_terminal_error() {
        let transport = Arc::new(MockTransport::new());
        transport.on(HttpMethod::Get, "/items", bearer_only("a2"));
        transport.reply(HttpMethod::Post, "/auth/refresh", HttpResponse::new(401, JsonValue::Null));

        let client = client(transport);
        client
            .set_tokens(TokenPair::new("a1", "r1").unwrap())
            .await
            .unwrap();

        let error = client.get("/items", RequestOptions::new()).await.unwrap_err();
        assert_eq!(error.code(), Some(AuthErrorCode::RefreshTokenExpired));
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_logout_clears_tokens_and_cache() {
        let transport = Arc::new(MockTransport::new());
        transport.on(HttpMethod::Get, "/items", bearer_only("a1"));
        transport.reply(HttpMethod::Post, "/auth/logout", HttpResponse::new(204, JsonValue::Null));

        let client = client(transport);
        client
            .set_tokens(TokenPair::new("a1", "r1").unwrap())
            .await
            .unwrap();
        client.get("/items", RequestOptions::new()).await.unwrap();
        assert_eq!(client.cache_stats().unwrap().size, 1);

        client.logout().await;
        assert_eq!(client.tokens().await, None);
        assert_eq!(client.cache_stats().unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_base_url_resolution() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(
            HttpMethod::Get,
            "https://api.example.com/v1/users",
            HttpResponse::new(200, JsonValue::Null),
        );

        let mut config = fast_retry_config();
        config.client.base_url = Some("https://api.example.com/v1".to_string());
        let client = client_with(config, transport.clone());

        client.get("/users", RequestOptions::new()).await.unwrap();
        assert_eq!(
            transport.requests()[0].url,
            "https://api.example.com/v1/users"
        );
    }

    #[tokio::test]
    async fn test_disabled_layers() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(HttpMethod::Get, "/items", HttpResponse::new(200, JsonValue::Null));

        let mut config = fast_retry_config();
        config.cache.enabled = false;
        config.dedup.enabled = false;
        config.circuit_breaker.enabled = false;
        let client = client_with(config, transport.clone());

        client.get("/items", RequestOptions::new()).await.unwrap();
        client.get("/items", RequestOptions::new()).await.unwrap();

        assert_eq!(transport.calls(HttpMethod::Get, "/items"), 2);
        assert!(client.cache_stats().is_none());
        assert!(client.dedup_stats().is_none());
        assert!(client.circuit_stats().is_none());
        assert_eq!(client.invalidate_cache(None).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_monitor_lifecycle() {
        let transport = Arc::new(MockTransport::new());
        transport.reply(HttpMethod::Get, "/health", HttpResponse::new(503, JsonValue::Null));

        let mut config = fast_retry_config();
        config.health.enabled = true;
        config.health.interval = Duration::from_secs(1);
        config.health.timeout = Duration::from_millis(200);

        let flips = Arc::new(Mutex::new(Vec::new()));
        let recorded = flips.clone();
        let client = ResilientClient::builder(config)
            .transport(transport.clone())
            .on_health_change(move |status| recorded.lock().push(status.is_healthy))
            .build()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let status = client.health_status().unwrap();
        assert!(!status.is_healthy);
        assert!(status.checks >= 2);
        assert_eq!(*flips.lock(), vec![false]);

        client.shutdown();
        let calls = transport.calls(HttpMethod::Get, "/health");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.calls(HttpMethod::Get, "/health"), calls);
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = BastionConfig::default();
        config.retry.attempts = 0;
        assert!(matches!(
            ResilientClient::new(config),
            Err(HttpError::ConfigError(_))
        ));
    }

    #[test]
    fn test_conditions_from_config() {
        let mut config = fast_retry_config();
        config.retry.conditions = vec![RetryConditionKind::Network];
        let client = client_with(config, Arc::new(MockTransport::new()));
        assert_eq!(client.inner.pipeline.retry.policy().conditions.len(), 1);
    }
}
