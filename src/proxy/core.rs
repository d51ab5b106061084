//! One request/response exchange.
//!
//! # Flow
//! ```text
//! inbound ─▶ director ─▶ transport.send ──err──▶ 502/504, stop
//!                              │
//!                              ▼
//!                      relay end-to-end headers
//!                              │
//!            301/302/307 + forbidden Location ──▶ 404, body dropped, stop
//!                              │
//!   non-HEAD 200 + text/plain; charset=utf-8 ──▶ buffer, substitute, write
//!                              │
//!                              ▼
//!           stream copy (latency-bounded when configured and flushable)
//! ```
//!
//! Everything that decides the client status happens before the status is written.

use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::uri::Authority;
use axum::http::{HeaderValue, Method, Request, StatusCode};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::config::ProxyConfig;
use crate::http::response::ResponseWriter;
use crate::proxy::director::{self, Director};
use crate::proxy::flush::LatencyBoundedWriter;
use crate::proxy::redirect::ForbiddenPrefixSet;
use crate::proxy::rewrite;
use crate::proxy::transport::{HyperTransport, Transport, TransportError};
use crate::security::headers;

/// Invalid relay construction parameters.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid backend authority '{authority}': {source}")]
    Authority {
        authority: String,
        #[source]
        source: axum::http::uri::InvalidUri,
    },

    #[error("invalid backend target '{target}': {source}")]
    Target {
        target: String,
        #[source]
        source: url::ParseError,
    },
}

/// Failure after the backend was contacted, or while contacting it.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("reading upstream body failed: {0}")]
    Upstream(#[source] axum::Error),

    #[error("writing to client failed: {0}")]
    Client(#[source] io::Error),
}

/// How one exchange ended.
#[derive(Debug)]
pub enum Outcome {
    /// Backend response streamed through.
    Relayed { status: StatusCode, bytes: u64 },
    /// Plain-text body buffered and rewritten.
    Rewritten { replacements: usize, bytes: u64 },
    /// Redirect to a forbidden prefix answered with 404.
    RedirectBlocked { location: String },
    /// Exchange failed; `status` is what the client saw.
    Failed { status: StatusCode, error: RelayError },
}

impl Outcome {
    /// Status line the client received.
    pub fn client_status(&self) -> StatusCode {
        match self {
            Outcome::Relayed { status, .. } | Outcome::Failed { status, .. } => *status,
            Outcome::Rewritten { .. } => StatusCode::OK,
            Outcome::RedirectBlocked { .. } => StatusCode::NOT_FOUND,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Relayed { .. } => "relayed",
            Outcome::Rewritten { .. } => "rewritten",
            Outcome::RedirectBlocked { .. } => "redirect_blocked",
            Outcome::Failed { .. } => "failed",
        }
    }
}

/// Reverse-proxy relay for a single fixed backend.
///
/// Immutable once built and shared by `Arc` between concurrent requests.
pub struct ProxyCore {
    backend_authority: Authority,
    public_domain: String,
    director: Director,
    transport: Arc<dyn Transport>,
    flush_interval: Duration,
    forbidden: ForbiddenPrefixSet,
    max_rewrite_bytes: usize,
}

impl std::fmt::Debug for ProxyCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCore")
            .field("backend_authority", &self.backend_authority)
            .field("public_domain", &self.public_domain)
            .field("flush_interval", &self.flush_interval)
            .field("forbidden", &self.forbidden)
            .field("max_rewrite_bytes", &self.max_rewrite_bytes)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ProxyCore`].
pub struct ProxyCoreBuilder {
    backend_authority: String,
    public_domain: String,
    director: Option<Director>,
    transport: Option<Arc<dyn Transport>>,
    flush_interval: Duration,
    forbidden: ForbiddenPrefixSet,
    max_rewrite_bytes: usize,
}

impl ProxyCoreBuilder {
    /// Replace the default single-host director.
    pub fn director(mut self, director: Director) -> Self {
        self.director = Some(director);
        self
    }

    /// Replace the default hyper transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Periodic flush interval for streamed bodies; zero disables it.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Block redirects whose Location starts with `prefix`. Checked in insertion order.
    pub fn forbid(mut self, prefix: impl Into<String>) -> Self {
        self.forbidden.push(prefix);
        self
    }

    /// Largest plain-text body buffered for rewriting; a larger one is answered with 502.
    pub fn max_rewrite_bytes(mut self, limit: usize) -> Self {
        self.max_rewrite_bytes = limit;
        self
    }

    /// Fails when the backend authority is not `host[:port]` or does not form a valid target URL.
    pub fn build(self) -> Result<ProxyCore, BuildError> {
        let backend_authority =
            Authority::from_str(&self.backend_authority).map_err(|source| BuildError::Authority {
                authority: self.backend_authority.clone(),
                source,
            })?;

        let director = match self.director {
            Some(director) => director,
            None => {
                let target = format!("http://{}", backend_authority);
                let url = Url::parse(&target)
                    .map_err(|source| BuildError::Target { target, source })?;
                director::single_host(&url)
            }
        };

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HyperTransport::new(&Default::default())));

        Ok(ProxyCore {
            backend_authority,
            public_domain: self.public_domain,
            director,
            transport,
            flush_interval: self.flush_interval,
            forbidden: self.forbidden,
            max_rewrite_bytes: self.max_rewrite_bytes,
        })
    }
}

impl ProxyCore {
    /// Start building a relay to `backend_authority` (`host[:port]`) that presents
    /// itself as `public_domain` in rewritten plain-text bodies.
    pub fn builder(
        backend_authority: impl Into<String>,
        public_domain: impl Into<String>,
    ) -> ProxyCoreBuilder {
        ProxyCoreBuilder {
            backend_authority: backend_authority.into(),
            public_domain: public_domain.into(),
            director: None,
            transport: None,
            flush_interval: Duration::ZERO,
            forbidden: ForbiddenPrefixSet::new(),
            max_rewrite_bytes: crate::config::UpstreamConfig::default().max_rewrite_bytes,
        }
    }

    /// Build the relay described by a loaded configuration, using [`HyperTransport`].
    pub fn from_config(config: &ProxyConfig) -> Result<Self, BuildError> {
        let upstream = &config.upstream;
        upstream
            .forbidden_prefixes
            .iter()
            .fold(
                Self::builder(&upstream.backend_authority, &upstream.public_domain),
                |builder, prefix| builder.forbid(prefix),
            )
            .flush_interval(upstream.flush_interval())
            .max_rewrite_bytes(upstream.max_rewrite_bytes)
            .transport(Arc::new(HyperTransport::new(&config.timeouts)))
            .build()
    }

    pub fn backend_authority(&self) -> &Authority {
        &self.backend_authority
    }

    pub fn public_domain(&self) -> &str {
        &self.public_domain
    }

    pub fn forbidden(&self) -> &ForbiddenPrefixSet {
        &self.forbidden
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Relay `inbound` to the backend and its response to `writer`.
    ///
    /// `remote_addr` is the caller's raw `host:port`; when it does not parse the
    /// request is sent without `X-Forwarded-For`. The writer is always consumed:
    /// shut down after a complete response, dropped after an aborted one.
    pub async fn serve<W: ResponseWriter>(
        &self,
        inbound: Request<Body>,
        remote_addr: &str,
        mut writer: W,
    ) -> Outcome {
        let (parts, body) = inbound.into_parts();
        let outbound =
            director::prepare_outbound(&parts, remote_addr, &self.director, &self.backend_authority);

        tracing::debug!(
            method = %outbound.method,
            uri = %outbound.uri,
            headers = ?outbound.headers,
            "Forwarding request"
        );

        let response = match self.transport.send(outbound.into_request(body)).await {
            Ok(response) => response,
            Err(e) => {
                let status = e.status();
                tracing::error!(error = %e, status = %status, "Proxy error");
                writer.write_header(status);
                let _ = writer.shutdown().await;
                return Outcome::Failed {
                    status,
                    error: e.into(),
                };
            }
        };

        let (head, body) = response.into_parts();
        let status = head.status;
        tracing::debug!(
            status = %status,
            version = ?head.version,
            headers = ?head.headers,
            "Backend responded"
        );
        headers::copy_end_to_end(writer.headers_mut(), &head.headers);

        if let Some(location) = self.forbidden.blocked_redirect(status, &head.headers) {
            drop(body);
            tracing::warn!(status = %status, location = %location, "Blocked redirect to forbidden location");
            writer.headers_mut().remove(CONTENT_LENGTH);
            writer.write_header(StatusCode::NOT_FOUND);
            let _ = writer.shutdown().await;
            return Outcome::RedirectBlocked { location };
        }

        // HEAD responses carry no body; the backend's Content-Length is relayed as is.
        if parts.method != Method::HEAD && rewrite::applies(status, &head.headers) {
            return self.relay_rewritten(body, writer).await;
        }

        writer.write_header(status);
        let mut sink = self.client_sink(writer);
        match copy_body(body, &mut sink).await {
            Ok(bytes) => match sink.finish().await {
                Ok(()) => Outcome::Relayed { status, bytes },
                Err(e) => Outcome::Failed {
                    status,
                    error: RelayError::Client(e),
                },
            },
            Err(error) => {
                tracing::warn!(error = %error, status = %status, "Body relay aborted");
                Outcome::Failed { status, error }
            }
        }
    }

    async fn relay_rewritten<W: ResponseWriter>(&self, body: Body, mut writer: W) -> Outcome {
        let buffered = match axum::body::to_bytes(body, self.max_rewrite_bytes).await {
            Ok(buffered) => buffered,
            Err(e) => {
                tracing::error!(error = %e, limit = self.max_rewrite_bytes, "Failed to buffer plain-text body");
                writer.headers_mut().clear();
                writer.write_header(StatusCode::BAD_GATEWAY);
                let _ = writer.shutdown().await;
                return Outcome::Failed {
                    status: StatusCode::BAD_GATEWAY,
                    error: RelayError::Upstream(e),
                };
            }
        };

        let rewritten = rewrite::replace_literal(
            &buffered,
            self.backend_authority.as_str().as_bytes(),
            self.public_domain.as_bytes(),
        );
        tracing::debug!(replacements = rewritten.replacements, "Rewrote plain-text body");

        writer
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(rewritten.body.len()));
        writer.write_header(StatusCode::OK);

        let mut sink = self.client_sink(writer);
        let written = match sink.write_all(&rewritten.body).await {
            Ok(()) => sink.finish().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => Outcome::Rewritten {
                replacements: rewritten.replacements,
                bytes: rewritten.body.len() as u64,
            },
            Err(e) => Outcome::Failed {
                status: StatusCode::OK,
                error: RelayError::Client(e),
            },
        }
    }

    fn client_sink<W: ResponseWriter>(&self, writer: W) -> ClientSink<W> {
        if self.flush_interval.is_zero() {
            return ClientSink::Direct(writer);
        }
        if !writer.can_flush() {
            tracing::debug!("Client writer cannot flush, streaming without latency bound");
            return ClientSink::Direct(writer);
        }
        ClientSink::Bounded(LatencyBoundedWriter::new(writer, self.flush_interval))
    }
}

/// The writer a body is copied into.
enum ClientSink<W> {
    Direct(W),
    Bounded(LatencyBoundedWriter<W>),
}

impl<W: ResponseWriter> ClientSink<W> {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            ClientSink::Direct(writer) => writer.write_all(buf).await,
            ClientSink::Bounded(writer) => writer.write_all(buf).await,
        }
    }

    async fn finish(self) -> io::Result<()> {
        match self {
            ClientSink::Direct(mut writer) => writer.shutdown().await,
            ClientSink::Bounded(writer) => writer.finish().await,
        }
    }
}

async fn copy_body<W: ResponseWriter>(body: Body, sink: &mut ClientSink<W>) -> Result<u64, RelayError> {
    let mut stream = body.into_data_stream();
    let mut copied = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(RelayError::Upstream)?;
        sink.write_all(&chunk).await.map_err(RelayError::Client)?;
        copied += chunk.len() as u64;
    }
    Ok(copied)
}
