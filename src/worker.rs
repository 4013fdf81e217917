//! The worker context: built once at start-up, every host event is routed
//! through it.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{
  CacheLayer, CacheResult, CacheStorage, PartitionKind, RequestKey, SqliteStorage,
};
use crate::classify::Classifier;
use crate::config::Config;
use crate::db::Database;
use crate::event::{Event, EventHandler, PeriodicTag, SyncTag};
use crate::host::{Clients, ConsoleHost, NotificationHost};
use crate::http::{FetchError, Fetcher, HttpFetcher, Request, Response};
use crate::lifecycle::{ActivationReport, InstallReport, LifecycleController, LifecycleState};
use crate::message::{ControlMessage, VersionReply};
use crate::notify::{ClickOutcome, NotificationDispatcher};
use crate::queue::{
  ActionStore, CartSyncOutcome, DeferredQueue, OrderOutcome, ReplayFeedback, ReplayOutcome,
};

/// Outcome of a sync trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
  Orders(Vec<ReplayOutcome>),
  Cart(CartSyncOutcome),
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionStatus {
  pub name: String,
  pub entries: usize,
  pub current: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
  pub version: String,
  pub state: LifecycleState,
  pub skip_waiting: bool,
  pub partitions: Vec<PartitionStatus>,
  pub pending_actions: usize,
  pub dead_letters: usize,
  pub cart_items: usize,
}

pub struct Worker {
  classifier: Classifier,
  cache: CacheLayer<SqliteStorage>,
  storage: Arc<SqliteStorage>,
  lifecycle: LifecycleController<SqliteStorage>,
  queue: DeferredQueue,
  notifier: NotificationDispatcher,
  fetcher: Arc<dyn Fetcher>,
  replay_feedback: Arc<ReplayFeedback>,
  content_sync_url: Url,
  products_url: Url,
}

impl Worker {
  pub fn new(
    config: &Config,
    db: Arc<Database>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<dyn Clients>,
    notifications: Arc<dyn NotificationHost>,
  ) -> Result<Self> {
    let storage = Arc::new(SqliteStorage::new(Arc::clone(&db)));
    let root_document = config.resolve("/index.html")?;

    Ok(Self {
      classifier: Classifier::new(config.cache.static_files.clone()),
      cache: CacheLayer::new(Arc::clone(&storage), Arc::clone(&fetcher), &root_document),
      lifecycle: LifecycleController::new(
        config,
        Arc::clone(&storage),
        Arc::clone(&db),
        Arc::clone(&fetcher),
        Arc::clone(&clients),
      )?,
      queue: DeferredQueue::new(config, ActionStore::new(db), Arc::clone(&fetcher))?,
      notifier: NotificationDispatcher::new(
        notifications,
        clients,
        config.notifications.clone(),
        config.origin.clone(),
      ),
      storage,
      fetcher,
      replay_feedback: Arc::new(ReplayFeedback::default()),
      content_sync_url: config.resolve(&config.endpoints.content_sync)?,
      products_url: config.resolve(&config.endpoints.products)?,
    })
  }

  /// Worker backed by the on-disk database, the real network and the console host.
  pub fn open(config: &Config) -> Result<Self> {
    let db = Arc::new(Database::open(&config.database_path()?)?);
    let fetcher = Arc::new(HttpFetcher::new(config)?);
    let host = Arc::new(ConsoleHost);
    Self::new(config, db, fetcher, host.clone(), host)
  }

  pub fn lifecycle(&self) -> &LifecycleController<SqliteStorage> {
    &self.lifecycle
  }

  pub fn queue(&self) -> &DeferredQueue {
    &self.queue
  }

  pub fn replay_feedback(&self) -> Arc<ReplayFeedback> {
    Arc::clone(&self.replay_feedback)
  }

  /// Dispatch one event.
  pub async fn handle(&self, event: Event) -> Result<()> {
    match event {
      Event::Install => self.install().await.map(|_| ()),
      Event::Activate => self.activate().await.map(|_| ()),
      Event::Fetch { request, respond } => {
        let url = request.url().clone();
        let result = self.fetch(request).await.map(|r| r.data);
        match respond {
          Some(tx) => {
            if tx.send(result).is_err() {
              debug!(url = %url, "fetch requester went away");
            }
            Ok(())
          }
          None => result.map(|_| ()).map_err(Into::into),
        }
      }
      Event::Sync(tag) => self.sync(tag).await.map(|_| ()),
      Event::PeriodicSync(tag) => self.periodic_sync(tag).await,
      Event::Push(payload) => self.push(payload.as_deref()).await,
      Event::NotificationClick { tag, action } => {
        self.notification_click(&tag, action.as_deref()).await.map(|_| ())
      }
      Event::Message { data, reply } => {
        let answer = self.message(&data).await?;
        if let (Some(tx), Some(answer)) = (reply, answer) {
          if tx.send(answer).is_err() {
            debug!("message sender went away before the reply");
          }
        }
        Ok(())
      }
      Event::Shutdown => Ok(()),
    }
  }

  /// Run every event as its own task until `Shutdown` or the channel closes.
  pub async fn run(self: Arc<Self>, mut events: EventHandler) -> Result<()> {
    info!(version = %self.lifecycle.version(), "worker running");
    while let Some(event) = events.next().await {
      if matches!(event, Event::Shutdown) {
        info!("shutting down");
        break;
      }

      let worker = Arc::clone(&self);
      tokio::spawn(async move {
        let kind = event.kind();
        if let Err(e) = worker.handle(event).await {
          error!(event = kind, error = %e, "event handler failed");
        }
      });
    }
    Ok(())
  }

  /// Install, and activate right away unless waiting was requested.
  pub async fn install(&self) -> Result<InstallReport> {
    let report = self.lifecycle.install().await?;
    if self.lifecycle.should_skip_waiting()
      && self.lifecycle.state() == LifecycleState::Installed
    {
      self.lifecycle.activate().await?;
    }
    Ok(report)
  }

  pub async fn activate(&self) -> Result<ActivationReport> {
    self.lifecycle.activate().await
  }

  /// Answer an intercepted request.
  ///
  /// Only GET requests are served from the partitions, and only once the
  /// worker is active; the rest goes straight to the network.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>, FetchError> {
    if *request.method() != Method::GET || !self.lifecycle.is_active() {
      debug!(method = %request.method(), url = %request.url(), "passing request through");
      return self
        .fetcher
        .fetch(&request)
        .await
        .map(CacheResult::from_network);
    }

    let classified = self.classifier.classified(request);
    debug!(url = %classified.request.url(), category = %classified.category, "intercepted request");
    self
      .cache
      .respond(&classified, self.lifecycle.generations())
      .await
  }

  pub async fn sync(&self, tag: SyncTag) -> Result<SyncReport> {
    info!(%tag, "sync triggered");
    match tag {
      SyncTag::Orders => {
        let outcomes = self.queue.replay_orders().await?;
        self.replay_feedback.record(&outcomes);
        for outcome in &outcomes {
          if outcome.outcome != OrderOutcome::Delivered {
            continue;
          }
          let notification = self.notifier.order_synced(&outcome.id);
          if let Err(e) = self.notifier.show(&notification).await {
            warn!(id = %outcome.id, error = %e, "failed to show order notification");
          }
        }
        Ok(SyncReport::Orders(outcomes))
      }
      SyncTag::Cart => Ok(SyncReport::Cart(self.queue.sync_cart().await?)),
    }
  }

  /// Refresh the cached product list from the content endpoint.
  pub async fn periodic_sync(&self, tag: PeriodicTag) -> Result<()> {
    info!(%tag, "periodic sync triggered");
    match tag {
      PeriodicTag::ContentSync => {
        let response = self
          .fetcher
          .fetch(&Request::get(self.content_sync_url.clone()))
          .await?;
        if !response.ok() {
          warn!(status = response.status(), "content sync rejected");
          return Ok(());
        }

        let content = response.json_body()?;
        let Some(products) = content.get("products") else {
          warn!("content sync response has no products");
          return Ok(());
        };

        let partition = self.lifecycle.generations().name(PartitionKind::Dynamic);
        self.storage.put_entry(
          &partition,
          &RequestKey::get(&self.products_url),
          &Response::json(200, products),
        )?;
        info!(partition = %partition, "product list refreshed");
        Ok(())
      }
    }
  }

  pub async fn push(&self, payload: Option<&[u8]>) -> Result<()> {
    let notification = self.notifier.from_push(payload);
    self.notifier.show(&notification).await
  }

  pub async fn notification_click(&self, tag: &str, action: Option<&str>) -> Result<ClickOutcome> {
    self.notifier.on_click(tag, action).await
  }

  /// Handle a control message. Returns the reply, if the message has one.
  pub async fn message(&self, data: &serde_json::Value) -> Result<Option<serde_json::Value>> {
    match ControlMessage::parse(data) {
      Some(ControlMessage::SkipWaiting) => {
        self.lifecycle.skip_waiting();
        if self.lifecycle.state() == LifecycleState::Installed {
          self.lifecycle.activate().await?;
        }
        Ok(None)
      }
      Some(ControlMessage::GetVersion) => {
        let reply = VersionReply {
          version: self.lifecycle.version(),
        };
        let reply =
          serde_json::to_value(reply).map_err(|e| eyre!("Failed to serialize reply: {}", e))?;
        Ok(Some(reply))
      }
      None => {
        debug!(message = %data, "ignoring unknown message");
        Ok(None)
      }
    }
  }

  pub fn status(&self) -> Result<WorkerStatus> {
    let generations = self.lifecycle.generations();
    let partitions = self
      .storage
      .partition_names()?
      .into_iter()
      .map(|name| {
        let entries = self.storage.entry_keys(&name)?.len();
        Ok(PartitionStatus {
          current: generations.is_current(&name),
          name,
          entries,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    let store = self.queue.store();
    Ok(WorkerStatus {
      version: self.lifecycle.version(),
      state: self.lifecycle.state(),
      skip_waiting: self.lifecycle.should_skip_waiting(),
      partitions,
      pending_actions: store.pending()?.len(),
      dead_letters: store.dead_letters()?.len(),
      cart_items: store.cart()?.len(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use crate::queue::PendingAction;
  use crate::testing::{self, FakeFetcher, RecordingHost};
  use serde_json::json;
  use tokio::sync::oneshot;

  struct Fixture {
    fetcher: Arc<FakeFetcher>,
    host: Arc<RecordingHost>,
    worker: Arc<Worker>,
  }

  fn fixture_with(config: Config) -> Fixture {
    let fetcher = FakeFetcher::new();
    for path in &config.cache.static_files {
      fetcher.respond(
        &testing::url(path),
        Response::with_content_type(200, "text/plain", format!("asset {}", path)),
      );
    }
    let host = RecordingHost::new();
    let worker = Worker::new(
      &config,
      testing::database(),
      fetcher.clone(),
      host.clone(),
      host.clone(),
    )
    .unwrap();
    Fixture {
      fetcher,
      host,
      worker: Arc::new(worker),
    }
  }

  fn fixture() -> Fixture {
    fixture_with(testing::config())
  }

  #[tokio::test]
  async fn test_install_activates_when_skip_waiting() {
    let f = fixture();
    f.worker.install().await.unwrap();
    assert_eq!(f.worker.lifecycle().state(), LifecycleState::Active);
    assert_eq!(*f.host.claims.lock().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_install_again_while_active_succeeds() {
    let f = fixture();
    f.worker.install().await.unwrap();

    let report = f.worker.install().await.unwrap();

    assert_eq!(report.cached, testing::config().cache.static_files.len());
    assert_eq!(f.worker.lifecycle().state(), LifecycleState::Active);
    assert_eq!(*f.host.claims.lock().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_install_waits_without_skip_waiting_until_message() {
    let mut config = testing::config();
    config.cache.skip_waiting_on_install = false;
    let f = fixture_with(config);

    f.worker.install().await.unwrap();
    assert_eq!(f.worker.lifecycle().state(), LifecycleState::Installed);

    let reply = f
      .worker
      .message(&json!({ "type": "SKIP_WAITING" }))
      .await
      .unwrap();
    assert_eq!(reply, None);
    assert_eq!(f.worker.lifecycle().state(), LifecycleState::Active);
  }

  #[tokio::test]
  async fn test_requests_pass_through_until_active() {
    let f = fixture();
    let calls_before = f.fetcher.calls_to(&testing::url("/styles.css"));

    let result = f
      .worker
      .fetch(Request::get(testing::url("/styles.css")))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(f.fetcher.calls_to(&testing::url("/styles.css")), calls_before + 1);
  }

  #[tokio::test]
  async fn test_active_worker_serves_static_from_cache() {
    let f = fixture();
    f.worker.install().await.unwrap();
    let calls_before = f.fetcher.total_calls();

    let result = f
      .worker
      .fetch(Request::get(testing::url("/styles.css")))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.body().as_ref(), b"asset /styles.css");
    assert_eq!(f.fetcher.total_calls(), calls_before);
  }

  #[tokio::test]
  async fn test_non_get_is_never_cached() {
    let f = fixture();
    f.worker.install().await.unwrap();
    let orders = testing::url("/api/orders");
    f.fetcher.respond(&orders, Response::json(201, &json!({})));

    let request = Request::post_json(orders.clone(), &json!({ "id": 1 })).unwrap();
    let result = f.worker.fetch(request).await.unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert!(f.worker.status().unwrap().partitions.iter().all(|p| {
      p.name != "shoppwa-dynamic-v1" || p.entries == 0
    }));
  }

  #[tokio::test]
  async fn test_order_sync_notifies_delivered_orders() {
    let f = fixture();
    f.fetcher
      .respond(&testing::url("/api/orders"), Response::json(200, &json!({})));
    f.worker
      .queue()
      .enqueue(PendingAction::order("1042", json!({ "total": 99 })))
      .unwrap();

    let report = f.worker.sync(SyncTag::Orders).await.unwrap();

    assert!(matches!(report, SyncReport::Orders(ref o) if o[0].outcome == OrderOutcome::Delivered));
    let shown = f.host.shown();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].body, "Order #1042 has been processed successfully");
    assert_eq!(f.worker.replay_feedback().failures(), 0);
  }

  #[tokio::test]
  async fn test_failed_order_sync_shows_nothing() {
    let f = fixture();
    f.worker
      .queue()
      .enqueue(PendingAction::order("7", json!({})))
      .unwrap();

    f.worker.sync(SyncTag::Orders).await.unwrap();

    assert!(f.host.shown().is_empty());
    assert_eq!(f.worker.replay_feedback().failures(), 1);
    assert_eq!(f.worker.status().unwrap().pending_actions, 1);
  }

  #[tokio::test]
  async fn test_content_sync_overwrites_product_entry() {
    let f = fixture();
    f.worker.install().await.unwrap();
    f.fetcher.respond(
      &testing::url("/api/sync"),
      Response::json(200, &json!({ "products": [{ "id": 1, "title": "Hat" }] })),
    );

    f.worker
      .periodic_sync(PeriodicTag::ContentSync)
      .await
      .unwrap();

    f.fetcher.fail(&testing::url("/api/products"));
    let result = f
      .worker
      .fetch(Request::get(testing::url("/api/products")))
      .await
      .unwrap();
    assert_eq!(
      result.data.json_body().unwrap(),
      json!([{ "id": 1, "title": "Hat" }])
    );
  }

  #[tokio::test]
  async fn test_get_version_replies_with_generation_tag() {
    let f = fixture();
    let reply = f
      .worker
      .message(&json!({ "type": "GET_VERSION" }))
      .await
      .unwrap();
    assert_eq!(reply, Some(json!({ "version": "shoppwa-v1" })));
    assert_eq!(f.worker.message(&json!({ "type": "NOPE" })).await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_push_shows_merged_notification() {
    let f = fixture();
    f.worker.push(Some(br#"{"body":"Flash sale"}"#)).await.unwrap();
    let shown = f.host.shown();
    assert_eq!(shown[0].title, "ShopPWA Notification");
    assert_eq!(shown[0].body, "Flash sale");
  }

  #[tokio::test]
  async fn test_run_loop_answers_events_until_shutdown() {
    let f = fixture();
    let events = EventHandler::new();
    let tx = events.sender();
    let running = tokio::spawn(Arc::clone(&f.worker).run(events));

    tx.send(Event::Install).unwrap();
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(Event::Message {
      data: json!({ "type": "GET_VERSION" }),
      reply: Some(reply_tx),
    })
    .unwrap();
    assert_eq!(reply_rx.await.unwrap(), json!({ "version": "shoppwa-v1" }));

    let (respond_tx, respond_rx) = oneshot::channel();
    tx.send(Event::Fetch {
      request: Request::get(testing::url("/app.js")),
      respond: Some(respond_tx),
    })
    .unwrap();
    assert_eq!(respond_rx.await.unwrap().unwrap().status(), 200);

    tx.send(Event::Shutdown).unwrap();
    running.await.unwrap().unwrap();
  }
}
