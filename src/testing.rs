//! Fakes for the network, storage and host seams.

use async_trait::async_trait;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{CacheStorage, CachedEntry, RequestKey, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::host::{Clients, NotificationHost, WindowClient};
use crate::http::{FetchError, Fetcher, Request, Response};
use crate::notify::NotificationDescriptor;

pub const ORIGIN: &str = "https://shop.example";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn config() -> Config {
  Config::parse(&format!("origin: {}\n", ORIGIN)).unwrap()
}

pub fn database() -> Arc<Database> {
  Arc::new(Database::in_memory().unwrap())
}

pub fn storage(db: &Arc<Database>) -> Arc<SqliteStorage> {
  Arc::new(SqliteStorage::new(Arc::clone(db)))
}

/// SQLite storage whose reads or writes can be switched to fail.
pub struct FailingStorage {
  inner: SqliteStorage,
  fail_reads: AtomicBool,
  fail_writes: AtomicBool,
}

impl FailingStorage {
  pub fn new(db: &Arc<Database>) -> Arc<Self> {
    Arc::new(Self {
      inner: SqliteStorage::new(Arc::clone(db)),
      fail_reads: AtomicBool::new(false),
      fail_writes: AtomicBool::new(false),
    })
  }

  pub fn fail_reads(&self, fail: bool) {
    self.fail_reads.store(fail, Ordering::SeqCst);
  }

  pub fn fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  fn check_read(&self) -> Result<()> {
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to read cache: disk I/O error"));
    }
    Ok(())
  }

  fn check_write(&self) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to write cache: quota exceeded"));
    }
    Ok(())
  }
}

impl CacheStorage for FailingStorage {
  fn open_partition(&self, name: &str) -> Result<()> {
    self.check_write()?;
    self.inner.open_partition(name)
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    self.check_read()?;
    self.inner.partition_names()
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    self.check_write()?;
    self.inner.delete_partition(name)
  }

  fn get_entry(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    self.check_read()?;
    self.inner.get_entry(partition, key)
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    self.check_read()?;
    self.inner.match_any(key)
  }

  fn put_entry(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.check_write()?;
    self.inner.put_entry(partition, key, response)
  }

  fn put_entries(&self, partition: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    self.check_write()?;
    self.inner.put_entries(partition, entries)
  }

  fn entry_keys(&self, partition: &str) -> Result<Vec<RequestKey>> {
    self.check_read()?;
    self.inner.entry_keys(partition)
  }
}

#[derive(Clone)]
enum Route {
  Respond(Response),
  Fail,
  Hang,
}

/// Scripted network: unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct FakeFetcher {
  routes: Mutex<HashMap<String, Route>>,
  requests: Mutex<Vec<Request>>,
}

impl FakeFetcher {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn respond(&self, url: &Url, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Route::Respond(response));
  }

  pub fn fail(&self, url: &Url) {
    self.routes.lock().unwrap().insert(url.to_string(), Route::Fail);
  }

  /// The request never completes.
  pub fn hang(&self, url: &Url) {
    self.routes.lock().unwrap().insert(url.to_string(), Route::Hang);
  }

  pub fn calls_to(&self, url: &Url) -> usize {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.url() == url)
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    self.requests.lock().unwrap().push(request.clone());
    let route = self
      .routes
      .lock()
      .unwrap()
      .get(request.url().as_str())
      .cloned();

    match route {
      Some(Route::Respond(response)) => Ok(response),
      Some(Route::Hang) => std::future::pending().await,
      Some(Route::Fail) | None => Err(FetchError::network(request.url(), "connection refused")),
    }
  }
}

/// Records everything the worker asks of the host.
#[derive(Default)]
pub struct RecordingHost {
  pub windows: Mutex<Vec<WindowClient>>,
  pub shown: Mutex<Vec<NotificationDescriptor>>,
  pub closed: Mutex<Vec<String>>,
  pub focused: Mutex<Vec<String>>,
  pub opened: Mutex<Vec<Url>>,
  pub claims: Mutex<usize>,
}

impl RecordingHost {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn add_window(&self, id: &str, url: Url) {
    self.windows.lock().unwrap().push(WindowClient {
      id: id.to_string(),
      url,
      focusable: true,
    });
  }

  pub fn shown(&self) -> Vec<NotificationDescriptor> {
    self.shown.lock().unwrap().clone()
  }
}

#[async_trait]
impl Clients for RecordingHost {
  async fn claim(&self) -> Result<usize> {
    *self.claims.lock().unwrap() += 1;
    Ok(self.windows.lock().unwrap().len())
  }

  async fn window_clients(&self) -> Result<Vec<WindowClient>> {
    Ok(self.windows.lock().unwrap().clone())
  }

  async fn focus(&self, id: &str) -> Result<()> {
    self.focused.lock().unwrap().push(id.to_string());
    Ok(())
  }

  async fn open_window(&self, url: &Url) -> Result<()> {
    self.opened.lock().unwrap().push(url.clone());
    Ok(())
  }
}

#[async_trait]
impl NotificationHost for RecordingHost {
  async fn show(&self, notification: &NotificationDescriptor) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }

  async fn close(&self, tag: &str) -> Result<()> {
    self.closed.lock().unwrap().push(tag.to_string());
    Ok(())
  }
}
