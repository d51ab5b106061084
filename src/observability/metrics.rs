//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): exchanges by method, status, outcome
//! - `proxy_request_duration_seconds` (histogram): time until the body was relayed
//! - `proxy_redirects_blocked_total` (counter): redirects answered with 404
//! - `proxy_rewrites_total` (counter): plain-text bodies rewritten
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use axum::http::Method;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::proxy::Outcome;

/// Install the Prometheus recorder with its own HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one finished exchange.
pub fn record_request(method: &Method, outcome: &Outcome, start: Instant) {
    let status = outcome.client_status().as_u16().to_string();
    let labels = [
        ("method", method.to_string()),
        ("status", status),
        ("outcome", outcome.kind().to_string()),
    ];

    counter!("proxy_requests_total", &labels).increment(1);
    histogram!("proxy_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());

    match outcome {
        Outcome::RedirectBlocked { .. } => counter!("proxy_redirects_blocked_total").increment(1),
        Outcome::Rewritten { .. } => counter!("proxy_rewrites_total").increment(1),
        Outcome::Relayed { .. } | Outcome::Failed { .. } => {}
    }
}
