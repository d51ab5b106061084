//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, one task per exchange)
//!     → request.rs (request ID assigned and propagated)
//!     → proxy::ProxyCore::serve
//!     → response.rs (ResponseWriter → streamed axum Response)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::{channel, ChannelWriter, PendingResponse, ResponseWriter};
pub use server::HttpServer;
