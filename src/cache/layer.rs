//! Cache layer that orchestrates the caching strategies with network fetching.

use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::classify::{is_image, Category, ClassifiedRequest};
use crate::http::{FetchError, Fetcher, Response};

use super::key::RequestKey;
use super::outcome::CacheResult;
use super::registry::{Generations, PartitionKind};
use super::storage::{CacheStorage, CachedEntry};

/// Served for image requests that can be answered neither from cache nor network.
const PLACEHOLDER_IMAGE: &str = concat!(
  r#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200">"#,
  r##"<rect width="200" height="200" fill="#f0f0f0"/>"##,
  r##"<text x="100" y="100" text-anchor="middle" dy=".3em" font-family="Arial" font-size="14" fill="#999">Image Unavailable</text>"##,
  "</svg>"
);

fn placeholder_image() -> Response {
  Response::with_content_type(200, "image/svg+xml", PLACEHOLDER_IMAGE)
}

/// Synthetic answer for API calls made while offline.
fn offline_api_response() -> Response {
  Response::json(
    503,
    &serde_json::json!({
      "error": "Offline",
      "message": "This feature is not available offline",
    }),
  )
}

/// Cache layer that manages caching logic and network fetching.
///
/// The layer only reads and writes entries of the partitions it is handed;
/// creating and deleting partitions belongs to the lifecycle controller.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  /// Page shell substituted for document requests while offline
  root_document: RequestKey,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  pub fn new(storage: Arc<S>, fetcher: Arc<dyn Fetcher>, root_document: &Url) -> Self {
    Self {
      storage,
      fetcher,
      root_document: RequestKey::get(root_document),
    }
  }

  /// Serve a classified request with the strategy and partition of its category.
  pub async fn respond(
    &self,
    classified: &ClassifiedRequest,
    generations: &Generations,
  ) -> Result<CacheResult<Response>, FetchError> {
    match classified.category {
      Category::Static => {
        self
          .cache_first(classified, &generations.name(PartitionKind::Static))
          .await
      }
      Category::Image => {
        self
          .cache_first(classified, &generations.name(PartitionKind::Image))
          .await
      }
      Category::Api => {
        self
          .network_first(classified, &generations.name(PartitionKind::Dynamic))
          .await
      }
      Category::Other => {
        self
          .stale_while_revalidate(classified, &generations.name(PartitionKind::Dynamic))
          .await
      }
    }
  }

  /// Cache-first strategy.
  ///
  /// 1. Serve a cached entry without touching the network
  /// 2. Otherwise fetch, storing a copy of 2xx responses
  /// 3. On network failure substitute the page shell for documents or a
  ///    placeholder for images; anything else fails
  pub async fn cache_first(
    &self,
    classified: &ClassifiedRequest,
    partition: &str,
  ) -> Result<CacheResult<Response>, FetchError> {
    let request = &classified.request;
    let key = RequestKey::for_request(request);

    if let Some(entry) = self.lookup(partition, &key) {
      debug!(url = %request.url(), partition, "serving from cache");
      return Ok(CacheResult::from_cache(entry.response, entry.stored_at));
    }

    debug!(url = %request.url(), partition, "fetching and caching");
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.store(partition, &key, &response);
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        warn!(url = %request.url(), error = %err, "cache-first fetch failed");

        if request.wants_document() {
          return match self.lookup_any(&self.root_document) {
            Some(entry) => Ok(CacheResult::offline(entry.response, Some(entry.stored_at))),
            None => Err(err),
          };
        }

        if is_image(request) {
          return Ok(CacheResult::offline(placeholder_image(), None));
        }

        Err(err)
      }
    }
  }

  /// Network-first strategy.
  ///
  /// Falls back to the cached entry when the network fails, then to a
  /// synthetic 503 for API calls.
  pub async fn network_first(
    &self,
    classified: &ClassifiedRequest,
    partition: &str,
  ) -> Result<CacheResult<Response>, FetchError> {
    let request = &classified.request;
    let key = RequestKey::for_request(request);

    debug!(url = %request.url(), partition, "network first");
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.store(partition, &key, &response);
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        info!(url = %request.url(), error = %err, "network failed, trying cache");

        if let Some(entry) = self.lookup(partition, &key) {
          return Ok(CacheResult::offline(entry.response, Some(entry.stored_at)));
        }

        if classified.category == Category::Api {
          return Ok(CacheResult::offline(offline_api_response(), None));
        }

        Err(err)
      }
    }
  }

  /// Stale-while-revalidate strategy.
  ///
  /// A revalidation fetch always runs in the background. A cached entry is
  /// returned without waiting for it; its store may land after the caller
  /// already has the stale copy. Without a cached entry the caller waits.
  pub async fn stale_while_revalidate(
    &self,
    classified: &ClassifiedRequest,
    partition: &str,
  ) -> Result<CacheResult<Response>, FetchError> {
    let request = classified.request.clone();
    let url = request.url().to_string();
    let key = RequestKey::for_request(&request);
    let cached = self.lookup(partition, &key);

    let storage = Arc::clone(&self.storage);
    let fetcher = Arc::clone(&self.fetcher);
    let partition_name = partition.to_string();
    let revalidation = tokio::spawn(async move {
      match fetcher.fetch(&request).await {
        Ok(response) => {
          if response.ok() {
            // The partition may have been purged meanwhile; the update is simply dropped
            if let Err(e) = storage.put_entry(&partition_name, &key, &response) {
              debug!(url = %request.url(), error = %e, "revalidated response discarded");
            }
          }
          Ok(response)
        }
        Err(err) => {
          info!(url = %request.url(), error = %err, "background fetch failed");
          Err(err)
        }
      }
    });

    if let Some(entry) = cached {
      debug!(url = %url, partition, "serving stale content");
      return Ok(CacheResult::from_cache(entry.response, entry.stored_at));
    }

    debug!(url = %url, partition, "no cache, waiting for network");
    match revalidation.await {
      Ok(result) => result.map(CacheResult::from_network),
      Err(_) => Err(FetchError::Abandoned { url }),
    }
  }

  fn lookup(&self, partition: &str, key: &RequestKey) -> Option<CachedEntry> {
    match self.storage.get_entry(partition, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(partition, key = %key, error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  fn lookup_any(&self, key: &RequestKey) -> Option<CachedEntry> {
    match self.storage.match_any(key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key = %key, error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  fn store(&self, partition: &str, key: &RequestKey, response: &Response) {
    if let Err(e) = self.storage.put_entry(partition, key, response) {
      warn!(partition, key = %key, error = %e, "cache write failed");
    }
  }
}
