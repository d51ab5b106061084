//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Relay and server produce:
//!     → logging.rs (tracing events with request_id, status, error fields)
//!     → metrics.rs (counters and histograms per exchange)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
