//! Stable cache keys for requests.

use sha2::{Digest, Sha256};

use crate::http::Request;

/// Identity of a cached request: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &str) -> Self {
    Self {
      method: method.to_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(request.method().as_str(), request.url().as_str())
  }

  /// Key for a GET of `url`, used for synthetic entries and fallback lookups.
  pub fn get(url: &url::Url) -> Self {
    Self::new("GET", url.as_str())
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// SHA256 hash for stable, fixed-length keys
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}
