//! Per-request policy classification and the strategies behind each policy.
//!
//! Every outgoing request is classified exactly once into a [`Policy`] and
//! handled by that policy's strategy. Intercepted paths always terminate in
//! a returned response — real, cached, or synthetic; the only error a caller
//! can see is a storage-medium failure. Passthrough traffic (non-HTTP
//! schemes) is forwarded verbatim and gets no offline handling at all.

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::config::OfflineConfig;
use crate::error::RequestError;
use crate::http::{Method, Request, RequestMode, Response};
use crate::outbox::Outbox;
use crate::sync::SyncHandle;
use crate::transport::{BoxFuture, Transport};

/// Handling policy for one request, decided once during classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
  /// Not ours: forwarded untouched.
  Passthrough,
  /// Designated offline write: captured into the queue on network failure.
  QueueOnFailure,
  /// API traffic: network with cached fallback; GETs are served from cache
  /// with a background refresh.
  NetworkFirst,
  /// Static assets and navigations: cache with network fallback.
  CacheFirst,
}

/// Classifies requests and applies the matching strategy.
pub struct RequestInterceptor<T: Transport, C: CacheStore> {
  transport: Arc<T>,
  cache: Arc<C>,
  outbox: Arc<Outbox>,
  sync: SyncHandle,
  root_url: Url,
  api_prefix: String,
  queued_endpoints: Vec<String>,
  sync_tag: String,
}

impl<T: Transport, C: CacheStore + 'static> RequestInterceptor<T, C> {
  pub fn new(
    transport: Arc<T>,
    cache: Arc<C>,
    outbox: Arc<Outbox>,
    sync: SyncHandle,
    base_url: Url,
    offline: &OfflineConfig,
  ) -> Self {
    let root_url = base_url.join("/").unwrap_or(base_url);
    Self {
      transport,
      cache,
      outbox,
      sync,
      root_url,
      api_prefix: offline.api_prefix.clone(),
      queued_endpoints: offline.queued_endpoints.clone(),
      sync_tag: offline.sync_tag.clone(),
    }
  }

  /// Decide the handling policy for a request. Rules apply in order; the
  /// first match wins.
  pub fn classify(&self, request: &Request) -> Policy {
    if !matches!(request.url.scheme(), "http" | "https") {
      return Policy::Passthrough;
    }
    let path = request.url.path();
    if request.method == Method::POST
      && self.queued_endpoints.iter().any(|e| path.starts_with(e.as_str()))
    {
      return Policy::QueueOnFailure;
    }
    if path.starts_with(&self.api_prefix) {
      return Policy::NetworkFirst;
    }
    Policy::CacheFirst
  }

  /// Handle one request end to end.
  pub async fn handle(
    &self,
    request: Request,
    bearer: Option<String>,
  ) -> Result<Response, RequestError> {
    let policy = self.classify(&request);
    debug!(?policy, url = %request.url, "classified request");
    match policy {
      Policy::Passthrough => self.transport.send(request, bearer).await,
      Policy::QueueOnFailure => self.handle_queued_write(request, bearer).await,
      Policy::NetworkFirst => self.handle_api(request, bearer).await,
      Policy::CacheFirst => self.handle_static(request, bearer).await,
    }
  }

  /// Designated offline writes: try the network, capture the body into the
  /// queue when it is unreachable. Server rejections are returned as-is and
  /// never queued.
  async fn handle_queued_write(
    &self,
    request: Request,
    bearer: Option<String>,
  ) -> Result<Response, RequestError> {
    match self.transport.send(request.clone(), bearer).await {
      Ok(response) => Ok(response),
      Err(e) if e.is_offline() => {
        let payload = request.body.unwrap_or(serde_json::Value::Null);
        let id = self
          .outbox
          .enqueue(request.url.path(), &payload)
          .map_err(RequestError::storage)?;
        self.sync.register(&self.sync_tag);
        debug!(id, endpoint = request.url.path(), "write captured offline");
        Ok(Response::offline_queued())
      }
      Err(e) => Err(e),
    }
  }

  /// API traffic. GETs with a cached snapshot return it immediately and
  /// refresh in the background; everything else goes to the network, with
  /// the cache (then a synthetic 503) as the offline fallback.
  async fn handle_api(
    &self,
    request: Request,
    bearer: Option<String>,
  ) -> Result<Response, RequestError> {
    let key = request.cache_key();
    let is_get = request.method == Method::GET;

    if is_get {
      if let Some(hit) = self.cache.get(&key).map_err(RequestError::storage)? {
        debug!(url = %request.url, "serving from cache");
        self.refresh_in_background(request, bearer);
        return Ok(hit.response);
      }
    }

    match self.transport.send(request.clone(), bearer).await {
      Ok(response) => {
        if is_get && response.is_ok() {
          self
            .cache
            .put_dynamic(&key, request.url.as_str(), &response)
            .map_err(RequestError::storage)?;
        }
        Ok(response)
      }
      Err(e) if e.is_offline() => {
        if is_get {
          // A background prime may have landed since the first lookup.
          if let Some(hit) = self.cache.get(&key).map_err(RequestError::storage)? {
            return Ok(hit.response);
          }
        }
        debug!(url = %request.url, "offline with no cached snapshot");
        Ok(Response::offline_unavailable())
      }
      Err(e) => Err(e),
    }
  }

  /// Static assets and navigations: cache first, network on miss, and for
  /// navigations the cached root document before the offline page.
  async fn handle_static(
    &self,
    request: Request,
    bearer: Option<String>,
  ) -> Result<Response, RequestError> {
    let key = request.cache_key();

    if let Some(hit) = self.cache.get(&key).map_err(RequestError::storage)? {
      return Ok(hit.response);
    }

    match self.transport.send(request.clone(), bearer).await {
      Ok(response) => {
        if request.method == Method::GET && response.is_ok() {
          self
            .cache
            .put_dynamic(&key, request.url.as_str(), &response)
            .map_err(RequestError::storage)?;
        }
        Ok(response)
      }
      Err(e) if e.is_offline() => {
        if request.mode == RequestMode::Navigate {
          let root_key = crate::http::request_key(&Method::GET, &self.root_url);
          if let Some(hit) = self.cache.get(&root_key).map_err(RequestError::storage)? {
            return Ok(hit.response);
          }
        }
        Ok(Response::offline_page())
      }
      Err(e) => Err(e),
    }
  }

  /// Re-issue a GET and replace the dynamic entry with the fresh response.
  /// Failures here must never surface: the caller already has a valid
  /// cached response in hand.
  fn refresh_in_background(&self, request: Request, bearer: Option<String>) {
    let transport = Arc::clone(&self.transport);
    let cache = Arc::clone(&self.cache);
    tokio::spawn(async move {
      let key = request.cache_key();
      match transport.send(request.clone(), bearer).await {
        Ok(response) if response.is_ok() => {
          if let Err(e) = cache.put_dynamic(&key, request.url.as_str(), &response) {
            warn!(url = %request.url, "background refresh could not store: {e:#}");
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "background refresh rejected");
        }
        Err(_) => {
          // Stale cache already served; nothing to report.
        }
      }
    });
  }
}

impl<T: Transport, C: CacheStore + 'static> Clone for RequestInterceptor<T, C> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      cache: Arc::clone(&self.cache),
      outbox: Arc::clone(&self.outbox),
      sync: self.sync.clone(),
      root_url: self.root_url.clone(),
      api_prefix: self.api_prefix.clone(),
      queued_endpoints: self.queued_endpoints.clone(),
      sync_tag: self.sync_tag.clone(),
    }
  }
}

/// The interceptor is itself a transport, so the client façade can sit on
/// top of it the way the in-app request helper sits behind the intercepting
/// layer in a browser.
impl<T: Transport, C: CacheStore + 'static> Transport for RequestInterceptor<T, C> {
  fn send(&self, request: Request, bearer: Option<String>) -> BoxFuture<Result<Response, RequestError>> {
    let this = self.clone();
    Box::pin(async move { this.handle(request, bearer).await })
  }
}
