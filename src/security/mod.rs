//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request:
//!     → headers.rs (strip hop-by-hop, set X-Forwarded-For)
//!     → Transport
//! Backend response:
//!     → headers.rs (relay end-to-end headers only)
//!     → proxy::redirect (block forbidden redirect targets)
//! ```
//!
//! # Design Decisions
//! - No trust in client input
//! - Connection-scoped headers never cross the relay

pub mod headers;
