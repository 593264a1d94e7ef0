//! Transport backed by reqwest

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::HttpConfig;
use crate::errors::{HttpError, HttpResult};
use crate::transport::Transport;
use crate::types::{HttpRequest, HttpResponse};

/// Transport sending requests with a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    config: HttpConfig,
}

impl ReqwestTransport {
    /// Create a transport with default configuration
    pub fn new() -> HttpResult<Self> {
        Self::with_config(HttpConfig::default())
    }

    /// Create a transport with specific configuration
    pub fn with_config(config: HttpConfig) -> HttpResult<Self> {
        debug!(
            "Creating reqwest transport with timeout: {}ms",
            config.timeout.as_millis()
        );

        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let header_name = HeaderName::from_str(name)
                .map_err(|_| HttpError::ConfigError(format!("Invalid header name: {}", name)))?;
            let header_value = HeaderValue::from_str(value).map_err(|_| {
                HttpError::ConfigError(format!("Invalid value for header {}", name))
            })?;
            default_headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .redirect(reqwest::redirect::Policy::limited(
                config.max_redirects as usize,
            ))
            .default_headers(default_headers)
            .build()
            .map_err(|e| HttpError::ConfigError(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest, deadline: Duration) -> HttpResult<HttpResponse> {
        info!("Making HTTP request: {} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method.into(), &request.url)
            .headers(request.headers)
            .timeout(deadline);

        if let Some(body) = &request.body {
            debug!("Adding JSON body to request");
            builder = builder.json(body);
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        info!("HTTP response received: {} for {}", status, request.url);

        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            JsonValue::Null
        } else {
            match serde_json::from_slice::<JsonValue>(&bytes) {
                Ok(json) => json,
                Err(_) => {
                    warn!("Response body is not JSON, keeping it as text");
                    JsonValue::String(String::from_utf8_lossy(&bytes).into_owned())
                }
            }
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
