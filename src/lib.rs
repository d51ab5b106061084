//! Single-backend reverse-proxy relay.
//!
//! Forwards every request to one backend authority, blocks redirects to
//! forbidden locations, rewrites the backend authority in plain-text bodies
//! and bounds how long streamed bytes wait before reaching the client.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::{HttpServer, ResponseWriter};
pub use lifecycle::Shutdown;
pub use proxy::{Outcome, ProxyCore};
