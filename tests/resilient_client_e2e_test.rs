//! End-to-end tests of the resilient client against a local axum server
//!
//! The server issues `a1`/`r1` on login and only accepts `a2` on the
//! protected endpoint, so every protected call exercises the refresh path.

use anyhow::Result;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use bastion_config::{BastionConfig, RetryStrategyKind};
use bastion_http::{
    AuthErrorCode, HttpError, MemoryTokenStore, RequestOptions, ResilientClient, RetryPolicy,
    TokenPair,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct ServerState {
    refresh_calls: Arc<AtomicU32>,
    flaky_calls: Arc<AtomicU32>,
    seen_authorization: Arc<Mutex<Vec<String>>>,
}

async fn login_handler(Json(credentials): Json<Value>) -> (StatusCode, Json<Value>) {
    if credentials["password"] == "pw" {
        (
            StatusCode::OK,
            Json(json!({
                "accessToken": "a1",
                "refreshToken": "r1",
                "user": {"name": credentials["username"]}
            })),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": "INVALID_CREDENTIALS", "message": "bad credentials"})),
        )
    }
}

async fn refresh_handler(
    State(state): State<ServerState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;

    if body["refreshToken"] == "r1" {
        (
            StatusCode::OK,
            Json(json!({"accessToken": "a2", "refreshToken": "r2"})),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": "REFRESH_TOKEN_EXPIRED", "message": "refresh token revoked"})),
        )
    }
}

async fn items_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let authorization = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state
        .seen_authorization
        .lock()
        .unwrap()
        .push(authorization.clone());

    if authorization == "Bearer a2" {
        (StatusCode::OK, Json(json!({"items": ["x", "y"]})))
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": "TOKEN_EXPIRED", "message": "jwt expired"})),
        )
    }
}

async fn flaky_handler(State(state): State<ServerState>) -> (StatusCode, Json<Value>) {
    match state.flaky_calls.fetch_add(1, Ordering::SeqCst) {
        0 | 1 => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"message": "warming up"})),
        ),
        _ => (StatusCode::OK, Json(json!({"ready": true}))),
    }
}

async fn logout_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Start the auth test server on a random port
async fn start_test_server() -> Result<(SocketAddr, ServerState)> {
    let state = ServerState::default();

    let app = Router::new()
        .route("/auth/login", post(login_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/api/items", get(items_handler))
        .route("/api/flaky", get(flaky_handler))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok((addr, state))
}

fn client_for(addr: SocketAddr) -> Result<ResilientClient> {
    let _ = bastion_logging::init_simple_tracing("warn");

    let mut config = BastionConfig::default();
    config.client.base_url = Some(format!("http://{}", addr));
    config.retry.strategy = RetryStrategyKind::Fixed;
    config.retry.delay = Duration::from_millis(20);

    Ok(ResilientClient::builder(config)
        .token_store(Arc::new(MemoryTokenStore::new()))
        .build()?)
}

#[tokio::test]
async fn test_login_refresh_retry_scenario() -> Result<()> {
    let (addr, state) = start_test_server().await?;
    let client = client_for(addr)?;

    let user = client
        .login(json!({"username": "ada", "password": "pw"}))
        .await?;
    assert_eq!(user, json!({"name": "ada"}));
    assert!(client.is_authenticated().await);

    let response = client.get("/api/items", RequestOptions::new()).await?;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, json!({"items": ["x", "y"]}));

    assert_eq!(
        *state.seen_authorization.lock().unwrap(),
        vec!["Bearer a1".to_string(), "Bearer a2".to_string()]
    );
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.tokens().await, Some(TokenPair::new("a2", "r2")?));

    client.logout().await;
    assert!(!client.is_authenticated().await);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_expired_calls_share_one_refresh() -> Result<()> {
    let (addr, state) = start_test_server().await?;
    let client = client_for(addr)?;
    client.set_tokens(TokenPair::new("a1", "r1")?).await?;

    let calls = (0..10).map(|_| {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .get(
                    "/api/items",
                    RequestOptions::new().skip_dedup().skip_cache(),
                )
                .await
        })
    });

    for outcome in futures::future::join_all(calls).await {
        assert_eq!(outcome??.status, 200);
    }
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.tokens().await, Some(TokenPair::new("a2", "r2")?));
    Ok(())
}

#[tokio::test]
async fn test_revoked_refresh_token_requires_login() -> Result<()> {
    let (addr, state) = start_test_server().await?;
    let client = client_for(addr)?;
    client.set_tokens(TokenPair::new("a1", "revoked")?).await?;

    let error = client
        .get("/api/items", RequestOptions::new())
        .await
        .expect_err("refresh with a revoked token must fail");

    assert_eq!(error.status(), Some(401));
    assert_eq!(error.code(), Some(AuthErrorCode::RefreshTokenExpired));
    assert!(error.is_terminal_auth());
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.tokens().await, None);
    Ok(())
}

#[tokio::test]
async fn test_invalid_credentials() -> Result<()> {
    let (addr, _state) = start_test_server().await?;
    let client = client_for(addr)?;

    let error = client
        .login(json!({"username": "ada", "password": "wrong"}))
        .await
        .expect_err("login with a wrong password must fail");

    assert_eq!(error.code(), Some(AuthErrorCode::InvalidCredentials));
    assert_eq!(error.message(), "bad credentials");
    assert!(!client.is_authenticated().await);
    Ok(())
}

#[tokio::test]
async fn test_transient_server_errors_are_retried() -> Result<()> {
    let (addr, state) = start_test_server().await?;
    let client = client_for(addr)?;

    let response = client
        .get("/api/flaky", RequestOptions::new().skip_auth())
        .await?;

    assert_eq!(response.body, json!({"ready": true}));
    assert_eq!(state.flaky_calls.load(Ordering::SeqCst), 3);

    let stats = client.circuit_stats().expect("circuit breaker enabled by default");
    assert_eq!(stats.total_failures, 0);
    assert_eq!(stats.total_successes, 1);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_server_is_a_network_error() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let client = client_for(addr)?;
    let options = RequestOptions::new()
        .skip_auth()
        .retry(RetryPolicy::fixed(2, Duration::from_millis(10)));
    let error = client
        .get("/api/items", options)
        .await
        .expect_err("nothing is listening");

    assert!(matches!(error.root(), HttpError::Network(_)));
    assert_eq!(error.attempt_log().len(), 2);
    Ok(())
}
