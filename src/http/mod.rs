//! Request/response model and the network seam.

mod client;
mod types;

pub use client::HttpFetcher;
pub use types::{Destination, Request, Response};

use async_trait::async_trait;

/// Error returned when a request could not be answered by the network.
///
/// Every fallback branch in the strategy engine is triggered by one of these.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
  #[error("network request to {url} failed: {reason}")]
  Network { url: String, reason: String },
  #[error("background fetch for {url} was dropped before completing")]
  Abandoned { url: String },
}

impl FetchError {
  pub fn network(url: impl ToString, reason: impl ToString) -> Self {
    Self::Network {
      url: url.to_string(),
      reason: reason.to_string(),
    }
  }
}

/// Anything that can put a request on the wire.
///
/// A completed HTTP exchange is `Ok` whatever its status; only transport failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}
