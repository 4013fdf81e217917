//! Persisted pending actions and cart snapshot.
//!
//! Both live in key-value slots shared with the UI layer, serialized as JSON
//! lists in the same shape the storefront writes them.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::Database;

pub const PENDING_ORDERS_SLOT: &str = "pendingOrders";
pub const CART_SLOT: &str = "cart";
pub const DEAD_LETTER_SLOT: &str = "deadLetterOrders";
/// Retry bookkeeping, kept apart from the records the UI layer owns
pub const REPLAY_ATTEMPTS_SLOT: &str = "replayAttempts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
  Order,
  CartSync,
}

/// A side-effecting call that could not reach the server yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
  pub id: String,
  pub kind: ActionKind,
  pub payload: serde_json::Value,
  pub created_at: DateTime<Utc>,
  /// Failed deliveries, filled in when the action is dead-lettered
  #[serde(default, skip_serializing_if = "is_zero")]
  pub attempts: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
}

impl PendingAction {
  pub fn order(id: impl Into<String>, payload: serde_json::Value) -> Self {
    Self {
      id: id.into(),
      kind: ActionKind::Order,
      payload,
      created_at: Utc::now(),
      attempts: 0,
      last_error: None,
    }
  }
}

fn is_zero(n: &u32) -> bool {
  *n == 0
}

/// A cart line as the storefront writes it. Product fields beyond the ones
/// the worker reads are carried along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
  pub id: u64,
  pub title: String,
  pub price: f64,
  pub quantity: u32,
  #[serde(flatten)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayAttempts {
  attempts: u32,
  last_error: String,
}

/// Owner of the pending-action records.
///
/// Every mutation re-reads its slot first, so entries appended by the UI
/// layer in between are kept.
#[derive(Clone)]
pub struct ActionStore {
  db: Arc<Database>,
}

impl ActionStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  fn read_list<T: DeserializeOwned>(&self, slot: &str) -> Result<Vec<T>> {
    match self.db.read_slot(slot)? {
      Some(raw) => {
        serde_json::from_str(&raw).map_err(|e| eyre!("Slot {} holds malformed data: {}", slot, e))
      }
      None => Ok(Vec::new()),
    }
  }

  fn write_list<T: Serialize>(&self, slot: &str, items: &[T]) -> Result<()> {
    let raw =
      serde_json::to_string(items).map_err(|e| eyre!("Failed to serialize {}: {}", slot, e))?;
    self.db.write_slot(slot, &raw)
  }

  pub fn pending(&self) -> Result<Vec<PendingAction>> {
    self.read_list(PENDING_ORDERS_SLOT)
  }

  /// Queue an action, replacing any queued action with the same id.
  pub fn enqueue(&self, action: PendingAction) -> Result<()> {
    let mut pending = self.pending()?;
    match pending.iter_mut().find(|a| a.id == action.id) {
      Some(existing) => *existing = action,
      None => pending.push(action),
    }
    self.write_list(PENDING_ORDERS_SLOT, &pending)
  }

  fn attempts(&self) -> Result<BTreeMap<String, ReplayAttempts>> {
    match self.db.read_slot(REPLAY_ATTEMPTS_SLOT)? {
      Some(raw) => serde_json::from_str(&raw)
        .map_err(|e| eyre!("Slot {} holds malformed data: {}", REPLAY_ATTEMPTS_SLOT, e)),
      None => Ok(BTreeMap::new()),
    }
  }

  fn write_attempts(&self, attempts: &BTreeMap<String, ReplayAttempts>) -> Result<()> {
    let raw = serde_json::to_string(attempts)
      .map_err(|e| eyre!("Failed to serialize {}: {}", REPLAY_ATTEMPTS_SLOT, e))?;
    self.db.write_slot(REPLAY_ATTEMPTS_SLOT, &raw)
  }

  fn clear_attempts(&self, id: &str) -> Result<Option<ReplayAttempts>> {
    let mut attempts = self.attempts()?;
    let cleared = attempts.remove(id);
    if cleared.is_some() {
      self.write_attempts(&attempts)?;
    }
    Ok(cleared)
  }

  /// Remove exactly the action `id`. Returns whether it was queued.
  pub fn remove(&self, id: &str) -> Result<bool> {
    let mut pending = self.pending()?;
    let before = pending.len();
    pending.retain(|a| a.id != id);
    if pending.len() == before {
      return Ok(false);
    }
    self.write_list(PENDING_ORDERS_SLOT, &pending)?;
    self.clear_attempts(id)?;
    Ok(true)
  }

  /// Count one more failed delivery of `id`. Returns the new attempt count,
  /// or `None` when `id` is no longer queued. The queued record itself is
  /// left as it is.
  pub fn record_failure(&self, id: &str, error: &str) -> Result<Option<u32>> {
    if !self.pending()?.iter().any(|a| a.id == id) {
      return Ok(None);
    }
    let mut attempts = self.attempts()?;
    let entry = attempts.entry(id.to_string()).or_default();
    entry.attempts += 1;
    entry.last_error = error.to_string();
    let count = entry.attempts;
    self.write_attempts(&attempts)?;
    Ok(Some(count))
  }

  /// Failed deliveries of `id` so far.
  pub fn attempts_of(&self, id: &str) -> Result<u32> {
    Ok(self.attempts()?.get(id).map_or(0, |a| a.attempts))
  }

  /// Move `id` out of the queue into the dead-letter slot.
  pub fn dead_letter(&self, id: &str, reason: &str) -> Result<bool> {
    let mut pending = self.pending()?;
    let Some(position) = pending.iter().position(|a| a.id == id) else {
      return Ok(false);
    };
    let mut action = pending.remove(position);
    action.attempts = self.attempts_of(id)?;
    action.last_error = Some(reason.to_string());

    let mut dead = self.dead_letters()?;
    dead.push(action);
    self.write_list(DEAD_LETTER_SLOT, &dead)?;
    self.write_list(PENDING_ORDERS_SLOT, &pending)?;
    self.clear_attempts(id)?;
    Ok(true)
  }

  pub fn dead_letters(&self) -> Result<Vec<PendingAction>> {
    self.read_list(DEAD_LETTER_SLOT)
  }

  /// The cart exactly as stored, whatever shape its items have.
  pub fn cart(&self) -> Result<Vec<serde_json::Value>> {
    self.read_list(CART_SLOT)
  }

  pub fn set_cart(&self, items: &[CartItem]) -> Result<()> {
    self.write_list(CART_SLOT, items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing;
  use serde_json::json;

  fn store() -> ActionStore {
    ActionStore::new(testing::database())
  }

  #[test]
  fn test_enqueue_and_remove_exact_id() {
    let store = store();
    store.enqueue(PendingAction::order("1", json!({ "total": 10 }))).unwrap();
    store.enqueue(PendingAction::order("2", json!({ "total": 20 }))).unwrap();
    store.enqueue(PendingAction::order("3", json!({ "total": 30 }))).unwrap();

    assert!(store.remove("2").unwrap());
    assert!(!store.remove("2").unwrap());

    let ids: Vec<_> = store.pending().unwrap().into_iter().map(|a| a.id).collect();
    assert_eq!(ids, vec!["1", "3"]);
  }

  #[test]
  fn test_enqueue_same_id_replaces() {
    let store = store();
    store.enqueue(PendingAction::order("1", json!({ "total": 10 }))).unwrap();
    store.enqueue(PendingAction::order("1", json!({ "total": 11 }))).unwrap();

    let pending = store.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload["total"], 11);
  }

  #[test]
  fn test_reads_records_written_by_the_ui_layer() {
    let db = testing::database();
    db.write_slot(
      PENDING_ORDERS_SLOT,
      r#"[{"id":"77","kind":"order","payload":{"total":5},"createdAt":"2026-10-01T12:00:00Z"}]"#,
    )
    .unwrap();

    let pending = ActionStore::new(db).pending().unwrap();
    assert_eq!(pending[0].id, "77");
    assert_eq!(pending[0].kind, ActionKind::Order);
    assert_eq!(pending[0].attempts, 0);
  }

  #[test]
  fn test_malformed_slot_is_an_error_not_an_empty_queue() {
    let db = testing::database();
    db.write_slot(PENDING_ORDERS_SLOT, "{oops").unwrap();
    assert!(ActionStore::new(db).pending().is_err());
  }

  #[test]
  fn test_failures_leave_the_queued_record_untouched() {
    let db = testing::database();
    let store = ActionStore::new(db.clone());
    store.enqueue(PendingAction::order("1", json!({ "total": 5 }))).unwrap();
    let before = db.read_slot(PENDING_ORDERS_SLOT).unwrap();

    store.record_failure("1", "HTTP 503").unwrap();

    assert_eq!(db.read_slot(PENDING_ORDERS_SLOT).unwrap(), before);
    assert_eq!(store.attempts_of("1").unwrap(), 1);
  }

  #[test]
  fn test_failures_and_dead_letter() {
    let store = store();
    store.enqueue(PendingAction::order("1", json!({}))).unwrap();

    assert_eq!(store.record_failure("1", "HTTP 503").unwrap(), Some(1));
    assert_eq!(store.record_failure("1", "HTTP 503").unwrap(), Some(2));
    assert_eq!(store.record_failure("404", "nope").unwrap(), None);

    assert!(store.dead_letter("1", "HTTP 422").unwrap());
    assert!(store.pending().unwrap().is_empty());
    let dead = store.dead_letters().unwrap();
    assert_eq!(dead[0].attempts, 2);
    assert_eq!(dead[0].last_error.as_deref(), Some("HTTP 422"));
    assert_eq!(store.attempts_of("1").unwrap(), 0);
  }

  #[test]
  fn test_cart_snapshot_keeps_every_product_field() {
    let db = testing::database();
    let raw = json!([{
      "id": 1,
      "title": "Wireless Headphones",
      "price": 99.99,
      "description": "Noise cancelling",
      "image": "/img/headphones.png",
      "category": "electronics",
      "quantity": 2
    }]);
    db.write_slot(CART_SLOT, &raw.to_string()).unwrap();
    let store = ActionStore::new(db);

    assert_eq!(serde_json::Value::Array(store.cart().unwrap()), raw);

    let items: Vec<CartItem> = serde_json::from_value(raw.clone()).unwrap();
    assert_eq!(items[0].extra["category"], "electronics");
    store.set_cart(&items).unwrap();
    assert_eq!(serde_json::Value::Array(store.cart().unwrap()), raw);
  }
}
