//! Seams to the hosting platform: open clients and the notification center.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::info;
use url::Url;

use crate::notify::NotificationDescriptor;

/// An open window of the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
  pub id: String,
  pub url: Url,
  pub focusable: bool,
}

/// Open app windows the worker can control.
#[async_trait]
pub trait Clients: Send + Sync {
  /// Route every open client through this worker. Returns how many were claimed.
  async fn claim(&self) -> Result<usize>;

  async fn window_clients(&self) -> Result<Vec<WindowClient>>;

  async fn focus(&self, id: &str) -> Result<()>;

  async fn open_window(&self, url: &Url) -> Result<()>;
}

/// The platform notification center.
#[async_trait]
pub trait NotificationHost: Send + Sync {
  async fn show(&self, notification: &NotificationDescriptor) -> Result<()>;

  async fn close(&self, tag: &str) -> Result<()>;
}

/// Host used by the command line: no windows, notifications printed to stdout.
#[derive(Debug, Default, Clone)]
pub struct ConsoleHost;

#[async_trait]
impl Clients for ConsoleHost {
  async fn claim(&self) -> Result<usize> {
    Ok(0)
  }

  async fn window_clients(&self) -> Result<Vec<WindowClient>> {
    Ok(Vec::new())
  }

  async fn focus(&self, id: &str) -> Result<()> {
    Err(eyre!("No window client {} to focus", id))
  }

  async fn open_window(&self, url: &Url) -> Result<()> {
    info!(url = %url, "opening window");
    println!("open {}", url);
    Ok(())
  }
}

#[async_trait]
impl NotificationHost for ConsoleHost {
  async fn show(&self, notification: &NotificationDescriptor) -> Result<()> {
    let json = serde_json::to_string_pretty(notification)
      .map_err(|e| eyre!("Failed to serialize notification: {}", e))?;
    println!("{}", json);
    Ok(())
  }

  async fn close(&self, tag: &str) -> Result<()> {
    info!(tag, "notification closed");
    Ok(())
  }
}
