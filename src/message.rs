//! Control messages posted to the worker by a page.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate a waiting worker right away
  SkipWaiting,
  /// Ask for the active cache generation
  GetVersion,
}

impl ControlMessage {
  /// Messages without a known `type` are not control messages and yield `None`.
  pub fn parse(data: &serde_json::Value) -> Option<Self> {
    serde_json::from_value(data.clone()).ok()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionReply {
  pub version: String,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_known_types() {
    assert_eq!(
      ControlMessage::parse(&json!({ "type": "SKIP_WAITING" })),
      Some(ControlMessage::SkipWaiting)
    );
    assert_eq!(
      ControlMessage::parse(&json!({ "type": "GET_VERSION", "extra": 1 })),
      Some(ControlMessage::GetVersion)
    );
  }

  #[test]
  fn test_unknown_or_missing_type_is_ignored() {
    assert_eq!(ControlMessage::parse(&json!({ "type": "RELOAD" })), None);
    assert_eq!(ControlMessage::parse(&json!({ "kind": "SKIP_WAITING" })), None);
    assert_eq!(ControlMessage::parse(&json!("SKIP_WAITING")), None);
  }

  #[test]
  fn test_version_reply_shape() {
    let reply = VersionReply {
      version: "shoppwa-v1".to_string(),
    };
    assert_eq!(
      serde_json::to_value(reply).unwrap(),
      json!({ "version": "shoppwa-v1" })
    );
  }
}
