//! Install and activation of a cache generation.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, Generations, PartitionKind, RequestKey};
use crate::config::Config;
use crate::db::Database;
use crate::host::Clients;
use crate::http::{Fetcher, Request, Response};

const STATE_SLOT: &str = "workerState";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
  Uninstalled,
  Installing,
  /// Installed and waiting to take over
  Installed,
  Activating,
  Active,
}

impl std::fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      LifecycleState::Uninstalled => "uninstalled",
      LifecycleState::Installing => "installing",
      LifecycleState::Installed => "installed",
      LifecycleState::Activating => "activating",
      LifecycleState::Active => "active",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
  #[error("Cannot {operation} while {state}")]
  InvalidState {
    operation: &'static str,
    state: LifecycleState,
  },
  #[error("Failed to pre-cache {url}: {reason}")]
  Prewarm { url: String, reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct StateRecord {
  version: String,
  state: LifecycleState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub purged: Vec<String>,
  pub claimed: usize,
}

/// Owns partition creation and deletion.
pub struct LifecycleController<S: CacheStorage> {
  storage: Arc<S>,
  db: Arc<Database>,
  fetcher: Arc<dyn Fetcher>,
  clients: Arc<dyn Clients>,
  generations: Generations,
  manifest: Vec<Url>,
  skip_waiting: AtomicBool,
  state: Mutex<LifecycleState>,
}

impl<S: CacheStorage> LifecycleController<S> {
  pub fn new(
    config: &Config,
    storage: Arc<S>,
    db: Arc<Database>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<dyn Clients>,
  ) -> Result<Self> {
    let generations = Generations::from_config(&config.cache);
    let manifest = config
      .cache
      .static_files
      .iter()
      .map(|path| config.resolve(path))
      .collect::<Result<Vec<_>>>()?;
    let state = Self::load_state(&db, generations.version())?;
    debug!(version = generations.version(), %state, "lifecycle state loaded");

    Ok(Self {
      storage,
      db,
      fetcher,
      clients,
      generations,
      manifest,
      skip_waiting: AtomicBool::new(config.cache.skip_waiting_on_install),
      state: Mutex::new(state),
    })
  }

  /// A record left by another version, or by a step that never finished, is
  /// read as the last stable state.
  fn load_state(db: &Database, version: &str) -> Result<LifecycleState> {
    let Some(raw) = db.read_slot(STATE_SLOT)? else {
      return Ok(LifecycleState::Uninstalled);
    };
    let record: StateRecord = match serde_json::from_str(&raw) {
      Ok(record) => record,
      Err(e) => {
        warn!(error = %e, "ignoring malformed lifecycle record");
        return Ok(LifecycleState::Uninstalled);
      }
    };
    if record.version != version {
      return Ok(LifecycleState::Uninstalled);
    }
    Ok(match record.state {
      LifecycleState::Installing => LifecycleState::Uninstalled,
      LifecycleState::Activating => LifecycleState::Installed,
      state => state,
    })
  }

  pub fn generations(&self) -> &Generations {
    &self.generations
  }

  /// Generation tag reported to `GET_VERSION`.
  pub fn version(&self) -> String {
    self.generations.tag()
  }

  pub fn state(&self) -> LifecycleState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(LifecycleState::Uninstalled)
  }

  pub fn is_active(&self) -> bool {
    self.state() == LifecycleState::Active
  }

  pub fn skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::Relaxed);
  }

  pub fn should_skip_waiting(&self) -> bool {
    self.skip_waiting.load(Ordering::Relaxed)
  }

  /// Move to `next` if the current state is one of `allowed`. Returns the previous state.
  fn transition(
    &self,
    operation: &'static str,
    allowed: &[LifecycleState],
    next: LifecycleState,
  ) -> Result<LifecycleState> {
    let previous = {
      let mut state = self.state.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
      if !allowed.contains(&state) {
        return Err(
          LifecycleError::InvalidState {
            operation,
            state: *state,
          }
          .into(),
        );
      }
      std::mem::replace(&mut *state, next)
    };
    self.persist(next)?;
    Ok(previous)
  }

  fn set_state(&self, next: LifecycleState) -> Result<()> {
    *self.state.lock().map_err(|e| eyre!("Lock poisoned: {}", e))? = next;
    self.persist(next)
  }

  fn persist(&self, state: LifecycleState) -> Result<()> {
    let record = StateRecord {
      version: self.generations.version().to_string(),
      state,
    };
    let raw = serde_json::to_string(&record)
      .map_err(|e| eyre!("Failed to serialize lifecycle state: {}", e))?;
    self.db.write_slot(STATE_SLOT, &raw)
  }

  /// Pre-warm the static partition with every manifest entry.
  ///
  /// Nothing is stored unless every entry was fetched with a 2xx status.
  /// Installing again while active refreshes the entries and stays active.
  pub async fn install(&self) -> Result<InstallReport> {
    if self.is_active() {
      info!(version = self.generations.version(), "refreshing active generation");
      let report = self.prewarm().await?;
      info!(cached = report.cached, "refreshed");
      return Ok(report);
    }

    let previous = self.transition(
      "install",
      &[LifecycleState::Uninstalled, LifecycleState::Installed],
      LifecycleState::Installing,
    )?;
    info!(version = self.generations.version(), "installing");

    match self.prewarm().await {
      Ok(report) => {
        self.set_state(LifecycleState::Installed)?;
        info!(cached = report.cached, "installed");
        Ok(report)
      }
      Err(e) => {
        warn!(error = %e, "install failed");
        let restored = match previous {
          LifecycleState::Installed => LifecycleState::Installed,
          _ => LifecycleState::Uninstalled,
        };
        self.set_state(restored)?;
        Err(e)
      }
    }
  }

  async fn prewarm(&self) -> Result<InstallReport> {
    let fetches = self.manifest.iter().map(|url| async move {
      let response = self
        .fetcher
        .fetch(&Request::get(url.clone()))
        .await
        .map_err(|e| LifecycleError::Prewarm {
          url: url.to_string(),
          reason: e.to_string(),
        })?;
      if !response.ok() {
        return Err(LifecycleError::Prewarm {
          url: url.to_string(),
          reason: format!("HTTP {}", response.status()),
        });
      }
      Ok::<(RequestKey, Response), LifecycleError>((RequestKey::get(url), response))
    });
    let entries = try_join_all(fetches).await?;

    let partition = self.generations.name(PartitionKind::Static);
    self.storage.open_partition(&partition)?;
    self.storage.put_entries(&partition, &entries)?;
    Ok(InstallReport {
      cached: entries.len(),
    })
  }

  /// Purge stale generations, ensure the current ones, then claim clients.
  pub async fn activate(&self) -> Result<ActivationReport> {
    self.transition(
      "activate",
      &[LifecycleState::Installed],
      LifecycleState::Activating,
    )?;
    info!(version = self.generations.version(), "activating");

    match self.take_over().await {
      Ok(report) => {
        self.set_state(LifecycleState::Active)?;
        info!(purged = report.purged.len(), claimed = report.claimed, "active");
        Ok(report)
      }
      Err(e) => {
        warn!(error = %e, "activation failed");
        self.set_state(LifecycleState::Installed)?;
        Err(e)
      }
    }
  }

  async fn take_over(&self) -> Result<ActivationReport> {
    let mut purged = Vec::new();
    for name in self.storage.partition_names()? {
      if self.generations.is_current(&name) {
        continue;
      }
      if self.storage.delete_partition(&name)? {
        debug!(partition = %name, "deleted stale partition");
        purged.push(name);
      }
    }
    for name in self.generations.current() {
      self.storage.open_partition(&name)?;
    }

    let claimed = self.clients.claim().await?;
    Ok(ActivationReport { purged, claimed })
  }
}
