//! Request/response model shared by the interceptor, cache, and façade.
//!
//! Responses are stored as plain snapshots (status, headers, body bytes) so a
//! cached answer and a live network answer are indistinguishable to callers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use url::Url;

pub use reqwest::Method;

/// How a request was initiated. Navigations get the cached root document as
/// their offline fallback instead of a JSON error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  #[default]
  Fetch,
  Navigate,
}

/// An outgoing request before classification.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub body: Option<Value>,
  pub mode: RequestMode,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      body: None,
      mode: RequestMode::Fetch,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn post(url: Url, body: Value) -> Self {
    Self {
      method: Method::POST,
      url,
      body: Some(body),
      mode: RequestMode::Fetch,
    }
  }

  /// A GET issued by top-level navigation (address bar, link).
  pub fn navigate(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      body: None,
      mode: RequestMode::Navigate,
    }
  }

  /// Cache identity of this request.
  pub fn cache_key(&self) -> String {
    request_key(&self.method, &self.url)
  }
}

/// Cache identity for a method + URL pair.
///
/// SHA-256 hashed for stable, fixed-length keys.
pub fn request_key(method: &Method, url: &Url) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_str().as_bytes());
  hasher.update(b":");
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

/// A response snapshot: what callers receive and what the cache stores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  /// Build a JSON response with the given status.
  pub fn json(status: u16, value: &Value) -> Self {
    Self {
      status,
      headers: vec![("content-type".into(), "application/json".into())],
      body: serde_json::to_vec(value).unwrap_or_default(),
    }
  }

  /// Build an HTML response with the given status.
  pub fn html(status: u16, body: &str) -> Self {
    Self {
      status,
      headers: vec![
        ("content-type".into(), "text/html".into()),
        ("cache-control".into(), "no-store".into()),
      ],
      body: body.as_bytes().to_vec(),
    }
  }

  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value matching `name`, case-insensitive.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn body_json(&self) -> serde_json::Result<Value> {
    serde_json::from_slice(&self.body)
  }

  /// True for synthetic responses produced while the network was unreachable.
  pub fn is_offline_fallback(&self) -> bool {
    self
      .body_json()
      .ok()
      .and_then(|v| v.get("offline").and_then(Value::as_bool))
      .unwrap_or(false)
  }

  /// 202 returned when a write was captured into the local queue.
  pub fn offline_queued() -> Self {
    Self::json(
      202,
      &json!({
        "message": "Saved offline. Will sync when online.",
        "offline": true,
      }),
    )
  }

  /// 202 returned by the client façade when the network itself failed, so
  /// calling code never has to special-case connectivity loss.
  pub fn offline_fallback(method: &Method, url: &Url, data: Option<&Value>) -> Self {
    Self::json(
      202,
      &json!({
        "offline": true,
        "method": method.as_str(),
        "url": url.as_str(),
        "data": data,
        "message": "Request saved offline. Will sync when online.",
        "timestamp": Utc::now().timestamp_millis(),
      }),
    )
  }

  /// 503 returned when a read cannot be served from network or cache.
  pub fn offline_unavailable() -> Self {
    let mut response = Self::json(
      503,
      &json!({
        "message": "Offline - Data not available",
        "offline": true,
        "timestamp": Utc::now().timestamp_millis(),
      }),
    );
    response.headers.push(("cache-control".into(), "no-store".into()));
    response
  }

  /// Minimal offline page for navigations with no cached document.
  pub fn offline_page() -> Self {
    Self::html(200, OFFLINE_PAGE)
  }
}

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>Docket - Offline</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
  </head>
  <body>
    <h1>You're Offline</h1>
    <p>Docket is not available right now. Please check your internet connection and try again.</p>
  </body>
</html>"#;
