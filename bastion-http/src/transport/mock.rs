//! Scripted transport for tests
//!
//! Replies are registered per `METHOD:URL`. A route holds either a queue of
//! canned outcomes (the last one repeats) or a handler that inspects the
//! request. Routes registered with a path match any URL ending in it.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::errors::HttpResult;
use crate::transport::Transport;
use crate::types::{HttpMethod, HttpRequest, HttpResponse};

type Handler = Arc<dyn Fn(&HttpRequest) -> HttpResult<HttpResponse> + Send + Sync>;

enum Route {
    Script(VecDeque<HttpResult<HttpResponse>>),
    Handler(Handler),
}

/// Transport answering from registered mocks
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<HttpRequest>>,
    latency: Mutex<HashMap<String, Duration>>,
}

fn route_key(method: HttpMethod, url: &str) -> String {
    format!("{}:{}", method.as_str(), url)
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with `response`
    pub fn reply(&self, method: HttpMethod, url: &str, response: HttpResponse) -> &Self {
        self.reply_sequence(method, url, vec![Ok(response)])
    }

    /// Answer with each outcome in turn, repeating the last one
    pub fn reply_sequence(
        &self,
        method: HttpMethod,
        url: &str,
        outcomes: Vec<HttpResult<HttpResponse>>,
    ) -> &Self {
        debug!("Added HTTP mock for {} {}", method, url);
        self.routes
            .lock()
            .insert(route_key(method, url), Route::Script(outcomes.into()));
        self
    }

    /// Answer by calling `handler` with the request
    pub fn on<F>(&self, method: HttpMethod, url: &str, handler: F) -> &Self
    where
        F: Fn(&HttpRequest) -> HttpResult<HttpResponse> + Send + Sync + 'static,
    {
        debug!("Added HTTP handler mock for {} {}", method, url);
        self.routes
            .lock()
            .insert(route_key(method, url), Route::Handler(Arc::new(handler)));
        self
    }

    /// Delay every answer on this route
    pub fn with_latency(&self, method: HttpMethod, url: &str, latency: Duration) -> &Self {
        self.latency.lock().insert(route_key(method, url), latency);
        self
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received for a route
    pub fn calls(&self, method: HttpMethod, url: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.method == method && request.url.ends_with(url))
            .count()
    }

    /// Clear all mocks and recorded requests
    pub fn clear(&self) {
        self.routes.lock().clear();
        self.requests.lock().clear();
        self.latency.lock().clear();
        debug!("Cleared all HTTP mocks");
    }

    fn resolve_key<V>(map: &HashMap<String, V>, method: HttpMethod, url: &str) -> Option<String> {
        let exact = route_key(method, url);
        if map.contains_key(&exact) {
            return Some(exact);
        }

        let prefix = format!("{}:", method.as_str());
        map.keys()
            .filter(|key| {
                key.strip_prefix(&prefix)
                    .map(|mock_url| url.ends_with(mock_url))
                    .unwrap_or(false)
            })
            .max_by_key(|key| key.len())
            .cloned()
    }

    fn answer(&self, request: &HttpRequest) -> HttpResult<HttpResponse> {
        let mut routes = self.routes.lock();
        let Some(key) = Self::resolve_key(&routes, request.method, &request.url) else {
            debug!("No matching mock response found for {} {}", request.method, request.url);
            return Ok(HttpResponse::new(
                404,
                json!({ "message": format!("No mock for {} {}", request.method, request.url) }),
            ));
        };

        let handler = match routes.get_mut(&key) {
            Some(Route::Script(outcomes)) => {
                let outcome = if outcomes.len() > 1 {
                    outcomes.pop_front()
                } else {
                    outcomes.front().cloned()
                };
                return outcome.unwrap_or_else(|| Ok(HttpResponse::new(204, JsonValue::Null)));
            }
            Some(Route::Handler(handler)) => handler.clone(),
            None => return Ok(HttpResponse::new(404, JsonValue::Null)),
        };
        drop(routes);

        handler(request)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest, _deadline: Duration) -> HttpResult<HttpResponse> {
        self.requests.lock().push(request.clone());

        let latency = {
            let latency = self.latency.lock();
            Self::resolve_key(&latency, request.method, &request.url)
                .and_then(|key| latency.get(&key).copied())
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.answer(&request)
    }
}
