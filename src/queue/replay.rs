use color_eyre::Result;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::store::{ActionKind, ActionStore, PendingAction};
use crate::config::Config;
use crate::http::{Fetcher, Request};

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// What became of one queued order during a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
  /// Acknowledged by the server and removed from the queue
  Delivered,
  /// Still queued after `attempts` failed deliveries
  Retained { attempts: u32 },
  /// Moved to the dead-letter slot
  DeadLettered { reason: String },
  /// The queue could not be updated; the order is still queued
  Errored { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
  pub id: String,
  pub outcome: OrderOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartSyncOutcome {
  Synced { items: usize },
  /// Nothing to send
  Skipped,
  Failed(String),
}

enum Failure {
  Permanent(String),
  Transient(String),
}

/// 4xx means the server understood and refused the action, except for
/// timeouts and rate limiting which may succeed later.
fn classify_status(status: u16) -> Failure {
  let reason = format!("HTTP {}", status);
  match status {
    408 | 429 => Failure::Transient(reason),
    400..=499 => Failure::Permanent(reason),
    _ => Failure::Transient(reason),
  }
}

/// Replays pending actions against the server.
#[derive(Clone)]
pub struct DeferredQueue {
  store: ActionStore,
  fetcher: Arc<dyn Fetcher>,
  orders_url: Url,
  cart_url: Url,
  max_attempts: u32,
}

impl DeferredQueue {
  pub fn new(config: &Config, store: ActionStore, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
    Ok(Self {
      store,
      fetcher,
      orders_url: config.resolve(&config.endpoints.orders)?,
      cart_url: config.resolve(&config.endpoints.cart_sync)?,
      max_attempts: config.sync.max_attempts,
    })
  }

  pub fn store(&self) -> &ActionStore {
    &self.store
  }

  pub fn enqueue(&self, action: PendingAction) -> Result<()> {
    info!(id = %action.id, kind = ?action.kind, "queued action for later delivery");
    self.store.enqueue(action)
  }

  /// Try every pending action once, in queue order. A storage error while
  /// handling one action is reported in its outcome and the rest still run.
  pub async fn replay_orders(&self) -> Result<Vec<ReplayOutcome>> {
    let pending = self.store.pending()?;
    debug!(count = pending.len(), "replaying pending actions");

    let mut outcomes = Vec::with_capacity(pending.len());
    for action in pending {
      let outcome = match self.deliver(&action).await {
        Ok(outcome) => outcome,
        Err(e) => {
          warn!(id = %action.id, "Failed to update pending action: {}", e);
          OrderOutcome::Errored {
            reason: e.to_string(),
          }
        }
      };
      outcomes.push(ReplayOutcome {
        id: action.id,
        outcome,
      });
    }
    Ok(outcomes)
  }

  async fn deliver(&self, action: &PendingAction) -> Result<OrderOutcome> {
    let url = match action.kind {
      ActionKind::Order => self.orders_url.clone(),
      ActionKind::CartSync => self.cart_url.clone(),
    };
    let request =
      Request::post_json(url, &action.payload)?.with_header(IDEMPOTENCY_HEADER, action.id.clone());

    let failure = match self.fetcher.fetch(&request).await {
      Ok(response) if response.ok() => {
        // The server has it; a leftover record is deduplicated by its idempotency key
        if let Err(e) = self.store.remove(&action.id) {
          warn!(id = %action.id, "Failed to remove delivered action: {}", e);
        }
        info!(id = %action.id, "pending action delivered");
        return Ok(OrderOutcome::Delivered);
      }
      Ok(response) => classify_status(response.status()),
      Err(e) => Failure::Transient(e.to_string()),
    };

    match failure {
      Failure::Permanent(reason) => {
        warn!(id = %action.id, %reason, "server rejected pending action, dead-lettering");
        self.store.dead_letter(&action.id, &reason)?;
        Ok(OrderOutcome::DeadLettered { reason })
      }
      Failure::Transient(reason) => {
        let attempts = self
          .store
          .record_failure(&action.id, &reason)?
          .unwrap_or(1);
        if self.max_attempts > 0 && attempts >= self.max_attempts {
          warn!(id = %action.id, attempts, %reason, "giving up on pending action");
          self.store.dead_letter(&action.id, &reason)?;
          return Ok(OrderOutcome::DeadLettered { reason });
        }
        debug!(id = %action.id, attempts, %reason, "pending action stays queued");
        Ok(OrderOutcome::Retained { attempts })
      }
    }
  }

  /// Send the current cart snapshot. The cart slot is never modified.
  pub async fn sync_cart(&self) -> Result<CartSyncOutcome> {
    let cart = self.store.cart()?;
    if cart.is_empty() {
      debug!("cart is empty, nothing to sync");
      return Ok(CartSyncOutcome::Skipped);
    }

    let request = Request::post_json(self.cart_url.clone(), &json!({ "cart": cart }))?;
    let outcome = match self.fetcher.fetch(&request).await {
      Ok(response) if response.ok() => CartSyncOutcome::Synced { items: cart.len() },
      Ok(response) => CartSyncOutcome::Failed(format!("HTTP {}", response.status())),
      Err(e) => CartSyncOutcome::Failed(e.to_string()),
    };
    match &outcome {
      CartSyncOutcome::Failed(reason) => warn!(%reason, "cart sync failed"),
      _ => info!(items = cart.len(), "cart synced"),
    }
    Ok(outcome)
  }
}
