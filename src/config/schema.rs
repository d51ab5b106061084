//! Configuration schema definitions.
//!
//! One TOML file describes the listener, the single backend with its
//! redirect and rewrite policy, backend timeouts and observability. Every
//! section and field is optional.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// The single backend and the response policies applied to it.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Backend target and relay policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Backend authority every request is sent to (e.g., "localhost:80").
    ///
    /// This literal is also what plain-text bodies are scanned for.
    pub backend_authority: String,

    /// Public domain substituted for the backend authority in plain-text bodies.
    pub public_domain: String,

    /// Redirect targets starting with any of these prefixes are answered with 404.
    /// Checked in order, case-sensitive.
    pub forbidden_prefixes: Vec<String>,

    /// Periodic flush interval for streamed bodies in milliseconds (0 = disabled).
    pub flush_interval_ms: u64,

    /// Upper bound on a plain-text body buffered for substitution.
    pub max_rewrite_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            backend_authority: "localhost:80".to_string(),
            public_domain: String::new(),
            forbidden_prefixes: Vec::new(),
            flush_interval_ms: 0,
            max_rewrite_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

impl UpstreamConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Timeout configuration for backend exchanges.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds (0 = none).
    pub connect_secs: u64,

    /// Time allowed for the backend to return a response head, in seconds (0 = none).
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Option<Duration> {
        non_zero_secs(self.connect_secs)
    }

    pub fn request(&self) -> Option<Duration> {
        non_zero_secs(self.request_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
