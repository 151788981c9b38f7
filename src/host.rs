//! Capabilities the hosting platform lends to the agent: page control and
//! notification display.

use async_trait::async_trait;
use color_eyre::Result;
use std::sync::Mutex;
use tracing::info;
use url::Url;

use crate::push::Notification;

/// Pages (windows/tabs) governed by the agent.
#[async_trait]
pub trait Clients: Send + Sync {
  /// Take control of every open page without waiting for a reload.
  async fn claim(&self) -> Result<()>;

  /// Focus a page already showing `url`, or open a new one.
  async fn open_or_focus(&self, url: &Url) -> Result<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
  async fn show(&self, notification: &Notification) -> Result<()>;
}

/// Host for the command-line runner: logs every request and remembers which
/// windows it "opened" so a second click focuses instead of duplicating.
#[derive(Default)]
pub struct LoggingHost {
  windows: Mutex<Vec<Url>>,
}

impl LoggingHost {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn windows(&self) -> Vec<Url> {
    self.windows.lock().map(|w| w.clone()).unwrap_or_default()
  }
}

#[async_trait]
impl Clients for LoggingHost {
  async fn claim(&self) -> Result<()> {
    info!("claimed open clients");
    Ok(())
  }

  async fn open_or_focus(&self, url: &Url) -> Result<()> {
    let mut windows = self
      .windows
      .lock()
      .map_err(|e| color_eyre::eyre::eyre!("Lock poisoned: {}", e))?;

    if windows.contains(url) {
      info!(%url, "focusing existing window");
    } else {
      info!(%url, "opening window");
      windows.push(url.clone());
    }
    Ok(())
  }
}

#[async_trait]
impl Notifier for LoggingHost {
  async fn show(&self, notification: &Notification) -> Result<()> {
    info!(
      title = %notification.title,
      body = %notification.body,
      actions = notification.actions.len(),
      "showing notification"
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_open_or_focus_reuses_window() {
    let host = LoggingHost::new();
    let dashboard = Url::parse("http://localhost/dashboard").unwrap();

    host.open_or_focus(&dashboard).await.unwrap();
    host.open_or_focus(&dashboard).await.unwrap();

    assert_eq!(host.windows(), vec![dashboard]);
  }
}
