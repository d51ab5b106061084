//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → timeouts.rs (enforce connect/request deadline)
//!     → On failure: surfaced to the client as 502/504, never retried
//! ```
//!
//! # Design Decisions
//! - Every backend call has a deadline unless explicitly configured to 0
//! - No retries: the inbound body is streamed and cannot be replayed

pub mod timeouts;
