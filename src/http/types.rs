use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;

/// Declared resource type of an intercepted request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  /// Plain fetch/XHR with no declared destination
  #[default]
  Empty,
  Document,
  Style,
  Script,
  Image,
  Font,
  Manifest,
}

impl FromStr for Destination {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "" | "empty" => Ok(Self::Empty),
      "document" => Ok(Self::Document),
      "style" => Ok(Self::Style),
      "script" => Ok(Self::Script),
      "image" => Ok(Self::Image),
      "font" => Ok(Self::Font),
      "manifest" => Ok(Self::Manifest),
      other => Err(eyre!("Unknown request destination: {}", other)),
    }
  }
}

/// An outbound request as seen by the worker.
#[derive(Debug, Clone)]
pub struct Request {
  method: Method,
  url: Url,
  destination: Destination,
  headers: Vec<(String, String)>,
  body: Option<Bytes>,
}

impl Request {
  pub fn new(method: Method, url: Url, destination: Destination) -> Self {
    Self {
      method,
      url,
      destination,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url, Destination::Empty)
  }

  /// A JSON POST, the shape used for every replayed action.
  pub fn post_json(url: Url, body: &serde_json::Value) -> Result<Self> {
    let body = serde_json::to_vec(body).map_err(|e| eyre!("Failed to serialize body: {}", e))?;
    Ok(Self {
      method: Method::POST,
      url,
      destination: Destination::Empty,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: Some(Bytes::from(body)),
    })
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.push((name.to_lowercase(), value.into()));
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    let name = name.to_lowercase();
    self
      .headers
      .iter()
      .find(|(n, _)| *n == name)
      .map(|(_, v)| v.as_str())
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn destination(&self) -> Destination {
    self.destination
  }

  pub fn headers(&self) -> &[(String, String)] {
    &self.headers
  }

  pub fn body(&self) -> Option<&Bytes> {
    self.body.as_ref()
  }

  /// Whether the caller is navigating to a full page.
  pub fn wants_document(&self) -> bool {
    self.destination == Destination::Document
  }
}

/// A response snapshot.
///
/// The body is reference counted, so handing a copy to the cache never consumes the
/// caller's response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  status: u16,
  headers: Vec<(String, String)>,
  body: Bytes,
  stored_at: Option<DateTime<Utc>>,
}

impl Response {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: headers
        .into_iter()
        .map(|(name, value)| (name.to_lowercase(), value))
        .collect(),
      body: body.into(),
      stored_at: None,
    }
  }

  /// A response with a single `content-type` header.
  pub fn with_content_type(status: u16, content_type: &str, body: impl Into<Bytes>) -> Self {
    Self::new(
      status,
      vec![("content-type".to_string(), content_type.to_string())],
      body,
    )
  }

  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self::with_content_type(status, "application/json", value.to_string())
  }

  /// Mark this snapshot as read back from a cache partition.
  pub fn stored(mut self, at: DateTime<Utc>) -> Self {
    self.stored_at = Some(at);
    self
  }

  pub fn status(&self) -> u16 {
    self.status
  }

  /// 2xx, the only responses worth caching.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn headers(&self) -> &[(String, String)] {
    &self.headers
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    let name = name.to_lowercase();
    self
      .headers
      .iter()
      .find(|(n, _)| *n == name)
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  pub fn body(&self) -> &Bytes {
    &self.body
  }

  pub fn stored_at(&self) -> Option<DateTime<Utc>> {
    self.stored_at
  }

  pub fn json_body(&self) -> Result<serde_json::Value> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Response body is not JSON: {}", e))
  }
}
