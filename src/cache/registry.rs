//! Versioned names of the cache partitions.

use crate::config::CacheConfig;

/// The three logical partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
  /// Pre-warmed page shell and assets
  Static,
  /// API responses and everything else fetched at runtime
  Dynamic,
  Image,
}

impl PartitionKind {
  pub const ALL: [PartitionKind; 3] = [
    PartitionKind::Static,
    PartitionKind::Dynamic,
    PartitionKind::Image,
  ];

  fn label(self) -> &'static str {
    match self {
      PartitionKind::Static => "static",
      PartitionKind::Dynamic => "dynamic",
      PartitionKind::Image => "images",
    }
  }
}

/// Current generation of every partition.
///
/// Bumping the version is the only way to invalidate a generation: names that
/// do not match the current ones are purged on activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generations {
  prefix: String,
  version: String,
}

impl Generations {
  pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  pub fn from_config(config: &CacheConfig) -> Self {
    Self::new(config.prefix.clone(), config.version.clone())
  }

  /// Versioned name of a partition, e.g. `shoppwa-images-v1`.
  pub fn name(&self, kind: PartitionKind) -> String {
    format!("{}-{}-{}", self.prefix, kind.label(), self.version)
  }

  pub fn current(&self) -> Vec<String> {
    PartitionKind::ALL.iter().map(|k| self.name(*k)).collect()
  }

  pub fn is_current(&self, name: &str) -> bool {
    PartitionKind::ALL.iter().any(|k| self.name(*k) == name)
  }

  /// Identifier of the whole generation, reported to `GET_VERSION`.
  pub fn tag(&self) -> String {
    format!("{}-{}", self.prefix, self.version)
  }

  pub fn version(&self) -> &str {
    &self.version
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_names() {
    let generations = Generations::new("shoppwa", "v1");
    assert_eq!(generations.name(PartitionKind::Static), "shoppwa-static-v1");
    assert_eq!(generations.name(PartitionKind::Dynamic), "shoppwa-dynamic-v1");
    assert_eq!(generations.name(PartitionKind::Image), "shoppwa-images-v1");
    assert_eq!(generations.tag(), "shoppwa-v1");
  }

  #[test]
  fn test_previous_version_is_not_current() {
    let generations = Generations::new("shoppwa", "v2");
    assert!(generations.is_current("shoppwa-static-v2"));
    assert!(!generations.is_current("shoppwa-static-v1"));
    assert!(!generations.is_current("shoppwa-v2"));
  }
}
