//! Request classification.
//!
//! Every intercepted GET maps to exactly one [`Category`], which in turn picks the
//! caching strategy and partition.

use url::Url;

use crate::http::{Destination, Request};

const STATIC_SUFFIXES: &[&str] = &[".html", ".css", ".js"];
const IMAGE_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];
const API_PATH_MARKERS: &[&str] = &["/api/", "/graphql"];
const API_HOST_PREFIX: &str = "api.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
  Static,
  Image,
  Api,
  Other,
}

impl std::fmt::Display for Category {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Category::Static => write!(f, "static"),
      Category::Image => write!(f, "image"),
      Category::Api => write!(f, "api"),
      Category::Other => write!(f, "other"),
    }
  }
}

/// A request together with its derived category.
#[derive(Debug, Clone)]
pub struct ClassifiedRequest {
  pub request: Request,
  pub category: Category,
}

/// Classifies requests against the pre-declared static manifest.
#[derive(Debug, Clone)]
pub struct Classifier {
  /// Manifest paths, e.g. `/` and `/index.html`
  manifest: Vec<String>,
}

impl Classifier {
  pub fn new(manifest: Vec<String>) -> Self {
    Self { manifest }
  }

  pub fn classify(&self, request: &Request) -> Category {
    if self.is_static(request) {
      Category::Static
    } else if is_image(request) {
      Category::Image
    } else if is_api(request.url()) {
      Category::Api
    } else {
      Category::Other
    }
  }

  pub fn classified(&self, request: Request) -> ClassifiedRequest {
    let category = self.classify(&request);
    ClassifiedRequest { request, category }
  }

  fn is_static(&self, request: &Request) -> bool {
    let path = request.url().path();
    self.manifest.iter().any(|entry| entry == path)
      || matches!(
        request.destination(),
        Destination::Document | Destination::Style | Destination::Script
      )
      || has_suffix(path, STATIC_SUFFIXES)
  }
}

/// Image by declared destination or by extension.
pub fn is_image(request: &Request) -> bool {
  request.destination() == Destination::Image || has_suffix(request.url().path(), IMAGE_SUFFIXES)
}

pub fn is_api(url: &Url) -> bool {
  let path = url.path();
  API_PATH_MARKERS.iter().any(|marker| path.contains(marker))
    || url
      .host_str()
      .is_some_and(|host| host.starts_with(API_HOST_PREFIX))
}

fn has_suffix(path: &str, suffixes: &[&str]) -> bool {
  let path = path.to_lowercase();
  suffixes.iter().any(|suffix| path.ends_with(suffix))
}
