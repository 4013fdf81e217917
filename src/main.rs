mod cache;
mod classify;
mod config;
mod db;
mod event;
mod host;
mod http;
mod lifecycle;
mod logging;
mod message;
mod notify;
mod queue;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::event::{Event, EventHandler, PeriodicTag, SyncTag};
use crate::http::{Destination, Request};
use crate::lifecycle::LifecycleState;
use crate::queue::{CartItem, PendingAction, ReplayScheduler};
use crate::worker::{SyncReport, Worker};

#[derive(Parser, Debug)]
#[command(name = "storefront-sw")]
#[command(about = "Offline caching and background sync agent for the storefront demo")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/storefront-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the static manifest for the configured version
  Install,
  /// Purge stale cache generations and take over clients
  Activate,
  /// Answer a request the way an open page would see it
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    #[arg(short, long, default_value = "empty")]
    destination: Destination,
    #[arg(short, long, default_value = "GET")]
    method: String,
  },
  /// Fire a sync trigger (background-sync-orders, background-sync-cart)
  Sync { tag: SyncTag },
  /// Fire a periodic sync trigger (content-sync)
  PeriodicSync { tag: PeriodicTag },
  /// Deliver a push message
  Push { payload: Option<String> },
  /// Click a notification
  Click {
    #[arg(short, long, default_value = "default")]
    tag: String,
    #[arg(short, long)]
    action: Option<String>,
  },
  /// Post a control message, e.g. '{"type":"GET_VERSION"}'
  Message { json: String },
  /// Queue an order for later delivery
  EnqueueOrder { id: String, payload: String },
  /// Replace the cart snapshot with a JSON list of items
  SetCart { json: String },
  /// Show lifecycle state, partitions and queue sizes
  Status,
  /// Handle events until Ctrl-C, replaying queued actions on a schedule
  Run,
}

fn parse_json(raw: &str) -> Result<serde_json::Value> {
  serde_json::from_str(raw).map_err(|e| eyre!("Invalid JSON argument: {}", e))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let worker = Worker::open(&config)?;

  match args.command {
    Command::Install => {
      let report = worker.install().await?;
      println!(
        "installed {} ({} entries cached, {})",
        worker.lifecycle().version(),
        report.cached,
        worker.lifecycle().state()
      );
    }
    Command::Activate => {
      let report = worker.activate().await?;
      for name in &report.purged {
        println!("deleted {}", name);
      }
      println!("active, {} clients claimed", report.claimed);
    }
    Command::Fetch {
      url,
      destination,
      method,
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
      let request = Request::new(method, config.resolve(&url)?, destination);
      let result = worker.fetch(request).await?;
      match result.cached_at {
        Some(at) => println!("{} ({:?}, stored {})", result.data.status(), result.source, at),
        None => println!("{} ({:?})", result.data.status(), result.source),
      }
      if let Some(content_type) = result.data.content_type() {
        println!("content-type: {}", content_type);
      }
      println!();
      println!("{}", String::from_utf8_lossy(result.data.body()));
    }
    Command::Sync { tag } => match worker.sync(tag).await? {
      SyncReport::Orders(outcomes) => {
        if outcomes.is_empty() {
          println!("no pending actions");
        }
        for outcome in outcomes {
          println!("{}: {:?}", outcome.id, outcome.outcome);
        }
      }
      SyncReport::Cart(outcome) => println!("{:?}", outcome),
    },
    Command::PeriodicSync { tag } => worker.periodic_sync(tag).await?,
    Command::Push { payload } => worker.push(payload.as_deref().map(str::as_bytes)).await?,
    Command::Click { tag, action } => {
      let outcome = worker.notification_click(&tag, action.as_deref()).await?;
      println!("{:?}", outcome);
    }
    Command::Message { json } => {
      if let Some(reply) = worker.message(&parse_json(&json)?).await? {
        println!("{}", reply);
      }
    }
    Command::EnqueueOrder { id, payload } => {
      worker
        .queue()
        .enqueue(PendingAction::order(id, parse_json(&payload)?))?;
    }
    Command::SetCart { json } => {
      let items: Vec<CartItem> =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid cart: {}", e))?;
      worker.queue().store().set_cart(&items)?;
    }
    Command::Status => {
      let status = serde_json::to_string_pretty(&worker.status()?)
        .map_err(|e| eyre!("Failed to serialize status: {}", e))?;
      println!("{}", status);
    }
    Command::Run => {
      let worker = Arc::new(worker);
      let events = EventHandler::new().with_ctrl_c();
      let tx = events.sender();

      if worker.lifecycle().state() == LifecycleState::Uninstalled {
        info!("no installed generation, installing");
        tx.send(Event::Install)
          .map_err(|e| eyre!("Failed to queue install: {}", e))?;
      }
      tx.send(Event::Sync(SyncTag::Orders))
        .map_err(|e| eyre!("Failed to queue sync: {}", e))?;

      let scheduler = ReplayScheduler::new(&config.sync, worker.replay_feedback()).spawn(tx);
      worker.run(events).await?;
      scheduler.abort();
    }
  }

  Ok(())
}
