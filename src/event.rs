use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use std::str::FromStr;
use tokio::sync::{mpsc, oneshot};

use crate::http::{FetchError, Request, Response};

/// Tag of a one-off sync trigger delivered when connectivity returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
  /// Replay queued orders
  Orders,
  /// Send the current cart snapshot
  Cart,
}

impl FromStr for SyncTag {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "background-sync-orders" => Ok(Self::Orders),
      "background-sync-cart" => Ok(Self::Cart),
      other => Err(eyre!("Unknown sync tag: {}", other)),
    }
  }
}

impl std::fmt::Display for SyncTag {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SyncTag::Orders => write!(f, "background-sync-orders"),
      SyncTag::Cart => write!(f, "background-sync-cart"),
    }
  }
}

/// Tag of a scheduled sync trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodicTag {
  /// Refresh the cached product list
  ContentSync,
}

impl FromStr for PeriodicTag {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "content-sync" => Ok(Self::ContentSync),
      other => Err(eyre!("Unknown periodic sync tag: {}", other)),
    }
  }
}

impl std::fmt::Display for PeriodicTag {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PeriodicTag::ContentSync => write!(f, "content-sync"),
    }
  }
}

/// Everything the host can ask of the worker
#[derive(Debug)]
pub enum Event {
  Install,
  Activate,
  /// An intercepted request; the outcome goes back on `respond`
  Fetch {
    request: Request,
    respond: Option<oneshot::Sender<Result<Response, FetchError>>>,
  },
  Sync(SyncTag),
  PeriodicSync(PeriodicTag),
  /// Raw push message body, if any
  Push(Option<Bytes>),
  NotificationClick {
    tag: String,
    action: Option<String>,
  },
  /// Control message; replies (e.g. the version) go back on `reply`
  Message {
    data: serde_json::Value,
    reply: Option<oneshot::Sender<serde_json::Value>>,
  },
  /// Stop the event loop
  Shutdown,
}

impl Event {
  /// Short name for logging
  pub fn kind(&self) -> &'static str {
    match self {
      Event::Install => "install",
      Event::Activate => "activate",
      Event::Fetch { .. } => "fetch",
      Event::Sync(_) => "sync",
      Event::PeriodicSync(_) => "periodicsync",
      Event::Push(_) => "push",
      Event::NotificationClick { .. } => "notificationclick",
      Event::Message { .. } => "message",
      Event::Shutdown => "shutdown",
    }
  }
}

/// Event channel fed by the host, the replay scheduler and Ctrl-C
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Also stop on Ctrl-C
  pub fn with_ctrl_c(self) -> Self {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Event::Shutdown);
      }
    });
    self
  }

  /// Get a sender for producers of events
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
