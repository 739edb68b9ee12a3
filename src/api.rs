//! Client API façade: uniform request issuance with credential attachment
//! and offline degradation.
//!
//! Calling code gets one of three things back: a real response, an
//! `Err(RequestError::Http)` carrying the server's status and body text, or
//! a synthetic 202 `{offline: true, ...}` object when the network itself was
//! unreachable — so no caller has to special-case connectivity loss.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use url::Url;

use crate::error::RequestError;
use crate::http::{Method, Request, Response};
use crate::transport::Transport;

/// Holds the current session's bearer credential. Shared between the façade,
/// the replay engine, and the push subscription manager.
#[derive(Default)]
pub struct TokenStore {
  token: RwLock<Option<String>>,
}

impl TokenStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&self, token: impl Into<String>) {
    *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
  }

  pub fn clear(&self) {
    *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
  }

  pub fn get(&self) -> Option<String> {
    self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub fn is_authenticated(&self) -> bool {
    self.get().is_some()
  }
}

/// API client bound to a base URL and a token store.
pub struct ApiClient<T: Transport> {
  transport: Arc<T>,
  base_url: Url,
  tokens: Arc<TokenStore>,
}

impl<T: Transport> ApiClient<T> {
  pub fn new(transport: Arc<T>, base_url: Url, tokens: Arc<TokenStore>) -> Self {
    Self {
      transport,
      base_url,
      tokens,
    }
  }

  pub fn tokens(&self) -> &TokenStore {
    &self.tokens
  }

  /// Issue a request against the API.
  ///
  /// `Content-Type: application/json` is attached when a body is present and
  /// `Authorization: Bearer <token>` when the token store holds a credential
  /// (both handled by the transport). Network-level failure degrades to a
  /// synthetic 202; an HTTP failure status is raised as an error.
  pub async fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> Result<Response, RequestError> {
    let url = self.base_url.join(path)?;
    let request = Request {
      method: method.clone(),
      url: url.clone(),
      body: body.clone(),
      mode: Default::default(),
    };

    match self.transport.send(request, self.tokens.get()).await {
      Ok(response) if response.is_ok() => Ok(response),
      Ok(response) => Err(RequestError::Http {
        status: response.status,
        body: response.text(),
      }),
      Err(e) if e.is_offline() => {
        tracing::warn!(url = %url, "network unreachable, returning offline fallback");
        Ok(Response::offline_fallback(&method, &url, body.as_ref()))
      }
      Err(e) => Err(e),
    }
  }

  pub async fn get(&self, path: &str) -> Result<Response, RequestError> {
    self.request(Method::GET, path, None).await
  }

  pub async fn post(&self, path: &str, body: Value) -> Result<Response, RequestError> {
    self.request(Method::POST, path, Some(body)).await
  }
}

impl<T: Transport> Clone for ApiClient<T> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      base_url: self.base_url.clone(),
      tokens: Arc::clone(&self.tokens),
    }
  }
}
