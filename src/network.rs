//! Network access behind a trait so the agent can run against a real HTTP
//! client or a scripted one.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use thiserror::Error;
use url::{Origin, Url};

use crate::http::{Headers, Method, Request, Response, ResponseKind};

/// The request could not complete (DNS, connection, TLS, body read...).
///
/// A response with an error status is not a `NetworkError`.
#[derive(Debug, Clone, Error)]
#[error("network request to {url} failed: {reason}")]
pub struct NetworkError {
  pub url: String,
  pub reason: String,
}

impl NetworkError {
  pub fn new(url: &Url, reason: impl Into<String>) -> Self {
    Self {
      url: url.to_string(),
      reason: reason.into(),
    }
  }
}

#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// reqwest-backed network client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Origin,
}

impl HttpNetwork {
  /// `origin` decides which responses count as same-origin.
  pub fn new(origin: &Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("time2eat-agent/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: origin.origin(),
    })
  }

  fn kind_for(&self, url: &Url) -> ResponseKind {
    if url.origin() == self.origin {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    }
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
    Method::Options => reqwest::Method::OPTIONS,
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let mut builder = self
      .client
      .request(to_reqwest_method(request.method), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| NetworkError::new(&request.url, e.to_string()))?;

    let status = response.status().as_u16();
    let final_url = response.url().clone();
    let headers: Headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| NetworkError::new(&request.url, e.to_string()))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
      kind: self.kind_for(&final_url),
      url: Some(final_url),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_follows_origin() {
    let network = HttpNetwork::new(&Url::parse("https://time2eat.example/").unwrap()).unwrap();

    let same = Url::parse("https://time2eat.example/api/menu/1").unwrap();
    let other = Url::parse("https://cdn.tailwindcss.com/").unwrap();
    assert_eq!(network.kind_for(&same), ResponseKind::Basic);
    assert_eq!(network.kind_for(&other), ResponseKind::Cors);
  }

  #[tokio::test]
  async fn test_unreachable_host_is_network_error() {
    let network = HttpNetwork::new(&Url::parse("http://127.0.0.1:9/").unwrap()).unwrap();
    let request = Request::get(Url::parse("http://127.0.0.1:9/").unwrap());

    let err = network.fetch(&request).await.unwrap_err();
    assert_eq!(err.url, "http://127.0.0.1:9/");
  }
}
