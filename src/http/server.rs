//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router that mounts the relay on every path
//! - Wire up middleware (request ID, tracing)
//! - Run each exchange in its own task, streaming the response back
//! - Swap in a freshly built relay when a new configuration arrives
//! - Record per-exchange metrics

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::http::request::{self, propagate_request_id_layer, set_request_id_layer};
use crate::http::response;
use crate::observability::metrics;
use crate::proxy::{BuildError, ProxyCore};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relay currently in effect. Replaced wholesale on reload.
    pub core: Arc<ArcSwap<ProxyCore>>,
}

/// HTTP server for the relay.
pub struct HttpServer {
    router: Router,
    core: Arc<ArcSwap<ProxyCore>>,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a server whose relay is built from `config`.
    pub fn new(config: ProxyConfig) -> Result<Self, BuildError> {
        let core = ProxyCore::from_config(&config)?;
        Ok(Self::with_core(config, core))
    }

    /// Create a server around an already built relay.
    pub fn with_core(config: ProxyConfig, core: ProxyCore) -> Self {
        let core = Arc::new(ArcSwap::from_pointee(core));
        let state = AppState {
            core: Arc::clone(&core),
        };

        let router = Self::build_router(state);
        Self {
            router,
            core,
            config,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id_layer()),
            )
    }

    /// The router, for driving requests in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// The relay currently in effect.
    pub fn core(&self) -> Arc<ProxyCore> {
        self.core.load_full()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the server until `shutdown` fires.
    ///
    /// Every configuration received on `config_updates` replaces the relay for
    /// subsequent requests. One that fails to build is logged and skipped.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backend = %self.core.load().backend_authority(),
            "HTTP server starting"
        );

        let reloader = tokio::spawn(apply_updates(
            Arc::clone(&self.core),
            self.config.listener.bind_address.clone(),
            config_updates,
        ));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown requested, draining connections");
            })
            .await?;

        reloader.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn apply_updates(
    core: Arc<ArcSwap<ProxyCore>>,
    bind_address: String,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
) {
    while let Some(config) = updates.recv().await {
        if config.listener.bind_address != bind_address {
            tracing::warn!(
                current = %bind_address,
                requested = %config.listener.bind_address,
                "Listener address changes need a restart"
            );
        }

        match ProxyCore::from_config(&config) {
            Ok(next) => {
                tracing::info!(
                    backend = %next.backend_authority(),
                    public_domain = %next.public_domain(),
                    forbidden_prefixes = next.forbidden().len(),
                    "Relay configuration reloaded"
                );
                core.store(Arc::new(next));
            }
            Err(e) => {
                tracing::error!(error = %e, "Rejected configuration update, keeping current relay");
            }
        }
    }
}

/// Relay every request to the backend.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let request_id = request::request_id(request.headers()).to_string();
    let method = request.method().clone();
    let core = state.core.load_full();

    let (writer, pending) = response::channel();
    let span = tracing::info_span!("relay", request_id = %request_id);

    tokio::spawn(
        async move {
            let outcome = core.serve(request, &remote_addr, writer).await;
            tracing::debug!(
                outcome = outcome.kind(),
                status = %outcome.client_status(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Exchange finished"
            );
            metrics::record_request(&method, &outcome, start);
        }
        .instrument(span),
    );

    pending.into_response().await
}
