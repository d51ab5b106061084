//! Backend transport.
//!
//! # Responsibilities
//! - Define the "send one request, get one response" seam
//! - Provide the hyper-util client implementation used in production
//!
//! # Design Decisions
//! - Object-safe trait returning a boxed future so the core can hold `Arc<dyn Transport>`
//! - Single attempt; deadlines come from `resilience::timeouts`

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use futures_util::future::BoxFuture;
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::config::TimeoutConfig;
use crate::resilience::timeouts::with_deadline;

/// Boxed error from an underlying client.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a request never produced a backend response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("upstream request failed: {0}")]
    Upstream(#[source] BoxError),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    pub fn upstream(error: impl Into<BoxError>) -> Self {
        TransportError::Upstream(error.into())
    }

    /// Status reported to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            TransportError::Upstream(_) => StatusCode::BAD_GATEWAY,
            TransportError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

/// Sends one request to the backend.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>>;
}

/// hyper-util legacy client with an optional response deadline.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, Body>,
    request_timeout: Option<Duration>,
}

impl HyperTransport {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(timeouts.connect());
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            request_timeout: timeouts.request(),
        }
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>> {
        Box::pin(async move {
            match with_deadline(self.request_timeout, self.client.request(request)).await {
                Ok(Ok(response)) => Ok(into_axum(response)),
                Ok(Err(e)) => Err(TransportError::upstream(e)),
                Err(_) => Err(TransportError::Timeout(
                    self.request_timeout.unwrap_or_default(),
                )),
            }
        })
    }
}

/// Backend response with its body boxed as an axum `Body`.
fn into_axum(response: hyper::Response<Incoming>) -> Response<Body> {
    response.map(Body::new)
}
