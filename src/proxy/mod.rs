//! Reverse-proxy relay.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → director.rs (rewrite outbound copy, hop-by-hop strip, X-Forwarded-For)
//!     → transport.rs (one round trip to the backend)
//!     → redirect.rs (301/302/307 to a forbidden prefix → 404)
//!     → rewrite.rs (200 text/plain; charset=utf-8 → backend authority replaced)
//!     → flush.rs (streamed body, flushed at least every interval)
//!     → ResponseWriter
//! ```
//!
//! `core.rs` owns the ordering of these steps.

pub mod core;
pub mod director;
pub mod flush;
pub mod redirect;
pub mod rewrite;
pub mod transport;

pub use self::core::{BuildError, Outcome, ProxyCore, ProxyCoreBuilder, RelayError};
pub use director::{Director, OutboundRequest};
pub use flush::LatencyBoundedWriter;
pub use redirect::ForbiddenPrefixSet;
pub use transport::{HyperTransport, Transport, TransportError};
