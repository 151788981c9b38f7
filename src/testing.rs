//! Scripted capabilities shared by the unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::cache::{CacheStore, CachedResponse, MemoryCacheStore};
use crate::host::{Clients, Notifier};
use crate::http::{Method, Request, RequestKey, Response, ResponseKind};
use crate::network::{Network, NetworkError};
use crate::push::Notification;

#[derive(Clone)]
enum Reply {
  Respond(Response),
  Fail,
}

/// Network that answers from a script and records every request it sees.
/// Unscripted URLs fail like an unreachable host.
#[derive(Default)]
pub struct ScriptedNetwork {
  replies: Mutex<HashMap<(Method, String), Vec<Reply>>>,
  calls: Mutex<Vec<Request>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  fn push(&self, method: Method, url: &str, reply: Reply) {
    self
      .replies
      .lock()
      .unwrap()
      .entry((method, url.to_string()))
      .or_default()
      .push(reply);
  }

  /// Same-origin 200 with the given body for every GET of `url`.
  pub fn page(&self, url: &str, body: &str) -> &Self {
    self.respond(
      Method::Get,
      url,
      Response::new(200, body.as_bytes().to_vec()).with_kind(ResponseKind::Basic),
    )
  }

  /// Queue a response. The last scripted reply for a URL repeats forever.
  pub fn respond(&self, method: Method, url: &str, response: Response) -> &Self {
    self.push(method, url, Reply::Respond(response));
    self
  }

  /// Queue a connection failure.
  pub fn fail(&self, method: Method, url: &str) -> &Self {
    self.push(method, url, Reply::Fail);
    self
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    self.calls.lock().unwrap().push(request.clone());

    let mut replies = self.replies.lock().unwrap();
    let reply = replies
      .get_mut(&(request.method, request.url.to_string()))
      .and_then(|queue| {
        if queue.len() > 1 {
          Some(queue.remove(0))
        } else {
          queue.first().cloned()
        }
      });

    match reply {
      Some(Reply::Respond(response)) => Ok(response),
      Some(Reply::Fail) | None => Err(NetworkError::new(&request.url, "connection refused")),
    }
  }
}

/// Host that records what the agent asked of it.
#[derive(Default)]
pub struct RecordingHost {
  pub claims: Mutex<usize>,
  pub opened: Mutex<Vec<Url>>,
  pub shown: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Clients for RecordingHost {
  async fn claim(&self) -> Result<()> {
    *self.claims.lock().unwrap() += 1;
    Ok(())
  }

  async fn open_or_focus(&self, url: &Url) -> Result<()> {
    self.opened.lock().unwrap().push(url.clone());
    Ok(())
  }
}

#[async_trait]
impl Notifier for RecordingHost {
  async fn show(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }
}

/// Memory store whose writes fail on demand, like a full disk. Batches go
/// through the trait's rollback path.
pub struct FailingStore {
  inner: MemoryCacheStore,
  /// 1-based put that fails; `None` fails every put
  fail_on: Option<usize>,
  puts: AtomicUsize,
}

impl FailingStore {
  pub fn nth_put(n: usize) -> Self {
    Self {
      inner: MemoryCacheStore::new(),
      fail_on: Some(n),
      puts: AtomicUsize::new(0),
    }
  }

  pub fn every_put() -> Self {
    Self {
      inner: MemoryCacheStore::new(),
      fail_on: None,
      puts: AtomicUsize::new(0),
    }
  }
}

impl CacheStore for FailingStore {
  fn open(&self, partition: &str) -> Result<()> {
    self.inner.open(partition)
  }

  fn has(&self, partition: &str) -> Result<bool> {
    self.inner.has(partition)
  }

  fn partitions(&self) -> Result<Vec<String>> {
    self.inner.partitions()
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    self.inner.delete_partition(partition)
  }

  fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.inner.get(partition, key)
  }

  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
    if self.fail_on.map_or(true, |fail_on| fail_on == n) {
      return Err(eyre!("quota exceeded writing {}", key));
    }
    self.inner.put(partition, key, response)
  }

  fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool> {
    self.inner.delete(partition, key)
  }

  fn keys(&self, partition: &str) -> Result<Vec<RequestKey>> {
    self.inner.keys(partition)
  }

  fn active_generation(&self) -> Result<Option<String>> {
    self.inner.active_generation()
  }

  fn set_active_generation(&self, partition: &str) -> Result<()> {
    self.inner.set_active_generation(partition)
  }
}
