//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap backend calls with an optional deadline
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout

use std::future::Future;
use std::time::Duration;

use tokio::time::error::Elapsed;

/// Run `fut` to completion, or until `limit` elapses when one is set.
pub async fn with_deadline<F>(limit: Option<Duration>, fut: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await,
        None => Ok(fut.await),
    }
}
