//! The offline client: one object owning the cache, queue, interceptor,
//! façade, and sync handle, with a well-defined lifecycle — opened once at
//! startup, never implicitly recreated.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use tracing::{debug, warn};
use url::Url;

use crate::api::{ApiClient, TokenStore};
use crate::cache::{CacheOptions, CacheStore, SqliteCacheStore};
use crate::config::Config;
use crate::error::RequestError;
use crate::http::{request_key, Method, Request, Response};
use crate::interceptor::RequestInterceptor;
use crate::outbox::{Outbox, PendingWrite};
use crate::push::{deliver, NotificationSink, PushPlatform, SubscriptionManager};
use crate::sync::{spawn_connectivity_monitor, SyncEngine, SyncHandle, SyncStatus};
use crate::transport::{HttpTransport, Transport};

/// Application-facing entry point for the offline request layer.
///
/// `open` builds the production stack; `assemble` accepts arbitrary
/// transport and cache implementations so the whole stack can run against
/// test doubles. Both return the client together with its [`SyncEngine`],
/// which the host drives (usually `tokio::spawn(engine.run())`).
pub struct OfflineClient<T: Transport = HttpTransport, C: CacheStore + 'static = SqliteCacheStore> {
  transport: Arc<T>,
  cache: Arc<C>,
  outbox: Arc<Outbox>,
  tokens: Arc<TokenStore>,
  interceptor: RequestInterceptor<T, C>,
  api: ApiClient<RequestInterceptor<T, C>>,
  handle: SyncHandle,
  base_url: Url,
  config: Config,
}

impl OfflineClient<HttpTransport, SqliteCacheStore> {
  /// Open the production stack: reqwest transport, sqlite cache and queue
  /// under the data directory.
  pub fn open(config: Config) -> Result<(Self, SyncEngine<HttpTransport>)> {
    let transport = Arc::new(HttpTransport::new()?);
    let options = CacheOptions {
      version: config.offline.cache_version.clone(),
      max_dynamic_entries: config.offline.max_dynamic_entries,
      ttl: config
        .offline
        .dynamic_ttl_hours
        .map(|h| chrono::Duration::hours(h as i64)),
    };
    let cache = Arc::new(SqliteCacheStore::open_default(options)?);
    let outbox = Arc::new(Outbox::open_default()?);
    Self::assemble(config, transport, cache, outbox)
  }
}

impl<T: Transport, C: CacheStore + 'static> OfflineClient<T, C> {
  /// Wire the layers around the given stores and transport.
  pub fn assemble(
    config: Config,
    transport: Arc<T>,
    cache: Arc<C>,
    outbox: Arc<Outbox>,
  ) -> Result<(Self, SyncEngine<T>)> {
    let base_url = Url::parse(&config.server.url)
      .map_err(|e| eyre!("Invalid server url {}: {}", config.server.url, e))?;
    let tokens = Arc::new(TokenStore::new());

    let (engine, handle) = SyncEngine::new(
      Arc::clone(&transport),
      Arc::clone(&outbox),
      Arc::clone(&tokens),
      base_url.clone(),
    );
    let interceptor = RequestInterceptor::new(
      Arc::clone(&transport),
      Arc::clone(&cache),
      Arc::clone(&outbox),
      handle.clone(),
      base_url.clone(),
      &config.offline,
    );
    let api = ApiClient::new(
      Arc::new(interceptor.clone()),
      base_url.clone(),
      Arc::clone(&tokens),
    );

    let client = Self {
      transport,
      cache,
      outbox,
      tokens,
      interceptor,
      api,
      handle,
      base_url,
      config,
    };
    Ok((client, engine))
  }

  /// The request façade, routed through the interceptor.
  pub fn api(&self) -> &ApiClient<RequestInterceptor<T, C>> {
    &self.api
  }

  pub fn set_token(&self, token: impl Into<String>) {
    self.tokens.set(token);
  }

  pub fn clear_token(&self) {
    self.tokens.clear();
  }

  pub fn sync_handle(&self) -> SyncHandle {
    self.handle.clone()
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Issue a raw request through the interceptor, with the session
  /// credential attached. Unlike the façade this returns whatever the
  /// policy produced, including non-2xx responses.
  pub async fn fetch(&self, request: Request) -> Result<Response, RequestError> {
    self.interceptor.handle(request, self.tokens.get()).await
  }

  /// Seed the static cache partition from the configured asset list.
  /// Individual fetch failures are logged and skipped; they do not abort
  /// the install.
  pub async fn install(&self) -> Result<()> {
    let mut fetches = Vec::new();
    for asset in &self.config.offline.static_assets {
      let url = self
        .base_url
        .join(asset)
        .map_err(|e| eyre!("Invalid static asset path {}: {}", asset, e))?;
      let transport = Arc::clone(&self.transport);
      fetches.push(async move {
        let request = Request::get(url.clone());
        let key = request.cache_key();
        (url, key, transport.send(request, None).await)
      });
    }

    for (url, key, result) in join_all(fetches).await {
      match result {
        Ok(response) if response.is_ok() => {
          self.cache.put_static(&key, url.as_str(), &response)?;
          debug!(url = %url, "pinned static asset");
        }
        Ok(response) => {
          warn!(url = %url, status = response.status, "static asset fetch rejected")
        }
        Err(e) => warn!(url = %url, "static asset fetch failed: {e}"),
      }
    }
    Ok(())
  }

  /// Drop cache entries left behind by earlier cache versions.
  pub fn activate(&self) -> Result<()> {
    self.cache.prune_versions(&self.config.offline.cache_version)
  }

  /// Inject a response into the dynamic partition, e.g. after a mutation
  /// whose response the UI wants served for the matching GET while offline.
  pub fn prime(&self, path: &str, response: &Response) -> Result<()> {
    let url = self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid path {}: {}", path, e))?;
    let key = request_key(&Method::GET, &url);
    self.cache.put_dynamic(&key, url.as_str(), response)
  }

  /// Drop the cached entry for one GET path.
  pub fn invalidate(&self, path: &str) -> Result<()> {
    let url = self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid path {}: {}", path, e))?;
    self.cache.invalidate(&request_key(&Method::GET, &url))
  }

  /// Drop the whole dynamic partition.
  pub fn clear_cache(&self) -> Result<()> {
    self.cache.clear_dynamic()
  }

  pub fn pending_writes(&self) -> Result<Vec<PendingWrite>> {
    self.outbox.list_pending()
  }

  pub fn status(&self) -> Result<SyncStatus> {
    Ok(SyncStatus {
      online: self.handle.is_online(),
      pending_writes: self.outbox.len()?,
      last_sync: self.handle.last_sync(),
    })
  }

  /// One-shot connectivity check; feeds the observation into the sync
  /// layer and returns it.
  pub async fn probe(&self) -> bool {
    let url = match self.base_url.join(&self.config.offline.probe_path) {
      Ok(url) => url,
      Err(_) => return self.handle.is_online(),
    };
    let online = self.transport.send(Request::get(url), None).await.is_ok();
    self.handle.update_connectivity(online);
    online
  }

  /// Display an inbound push message through the given sink. Tolerates a
  /// missing or malformed payload.
  pub fn handle_push(&self, raw: Option<&[u8]>, sink: &dyn NotificationSink) {
    deliver(raw, &self.config.push, sink);
  }

  /// Build the subscription manager for this session, bound to the given
  /// platform primitives and this client's façade and credential.
  pub fn subscription_manager<P: PushPlatform>(
    &self,
    platform: P,
  ) -> SubscriptionManager<RequestInterceptor<T, C>, P> {
    SubscriptionManager::new(
      self.api.clone(),
      platform,
      Arc::clone(&self.tokens),
      &self.config.push,
    )
  }

  /// Start the periodic connectivity probe.
  pub fn spawn_monitor(&self) -> Result<tokio::task::JoinHandle<()>> {
    let url = self
      .base_url
      .join(&self.config.offline.probe_path)
      .map_err(|e| eyre!("Invalid probe path: {}", e))?;
    Ok(spawn_connectivity_monitor(
      Arc::clone(&self.transport),
      url,
      Duration::from_secs(self.config.offline.probe_interval_secs),
      self.handle.clone(),
    ))
  }
}
