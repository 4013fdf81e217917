use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tracing::debug;

use crate::config::Config;

use super::types::{Request, Response};
use super::{FetchError, Fetcher};

/// Network access through reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.network.timeout_secs))
      .user_agent(concat!("storefront-sw/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let url = request.url().clone();
    debug!(method = %request.method(), url = %url, "network fetch");

    let mut builder = self.client.request(request.method().clone(), url.clone());
    for (name, value) in request.headers() {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body() {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| FetchError::network(&url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::network(&url, e))?;

    Ok(Response::new(status, headers, body))
  }
}
