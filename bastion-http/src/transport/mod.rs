//! Wire transports
//!
//! A [`Transport`] performs one HTTP exchange. It returns every response,
//! whatever its status, and only fails for transport-level problems.
//! Classification of non-2xx statuses happens above it.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::errors::{HttpError, HttpResult};
use crate::types::{HttpRequest, HttpResponse};

#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod reqwest_transport;

#[cfg(any(test, feature = "testing"))]
pub use mock::MockTransport;
pub use reqwest_transport::ReqwestTransport;

/// One HTTP exchange
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request`, failing with a timeout if no response arrives before `deadline`
    async fn send(&self, request: HttpRequest, deadline: Duration) -> HttpResult<HttpResponse>;
}

/// Send through `transport`, enforcing `deadline` regardless of the transport
pub async fn send_with_deadline(
    transport: &dyn Transport,
    request: HttpRequest,
    deadline: Duration,
) -> HttpResult<HttpResponse> {
    let method = request.method;
    let url = request.url.clone();

    match tokio::time::timeout(deadline, transport.send(request, deadline)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!("{} {} exceeded deadline of {:?}", method, url, deadline);
            Err(HttpError::Timeout(format!(
                "{} {} did not complete within {:?}",
                method, url, deadline
            )))
        }
    }
}
