//! Push subscription lifecycle.
//!
//! Runs once per session bootstrap, after authentication: ask for
//! notification permission, reuse an existing subscription if the platform
//! has one, create one only if absent, and hand the descriptor to the server
//! (the server upserts by endpoint, so re-sending an existing descriptor is
//! harmless). Missing platform support and permission denial are terminal
//! no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::{ApiClient, TokenStore};
use crate::config::PushConfig;
use crate::transport::{BoxFuture, Transport};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionKeys {
  pub p256dh: String,
  pub auth: String,
}

/// What the push service hands back on subscribe; opaque to us, meaningful
/// to the server's delivery job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionDescriptor {
  pub endpoint: String,
  pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
  Granted,
  Denied,
}

/// The host platform's push primitives.
pub trait PushPlatform: Send + Sync {
  /// Whether push is available at all on this platform.
  fn is_supported(&self) -> bool;

  /// Prompt the user. May suspend on the prompt.
  fn request_permission(&self) -> BoxFuture<PermissionState>;

  /// The platform's existing subscription, if any.
  fn subscription(&self) -> BoxFuture<Option<SubscriptionDescriptor>>;

  /// Create a new subscription against the given application server key.
  fn subscribe(&self, server_key: String) -> BoxFuture<Result<SubscriptionDescriptor>>;
}

/// How a bootstrap attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
  /// A new subscription was created and registered.
  Subscribed,
  /// An existing subscription was reused and re-registered.
  AlreadySubscribed,
  /// No credential yet; try again after login.
  NotAuthenticated,
  /// Platform has no push support. Terminal.
  Unsupported,
  /// User said no. Terminal.
  PermissionDenied,
  /// Permission was already requested this session; nothing to do.
  AlreadyRequested,
}

/// Drives the subscription lifecycle against a [`PushPlatform`].
pub struct SubscriptionManager<T: Transport, P: PushPlatform> {
  api: ApiClient<T>,
  platform: P,
  tokens: Arc<TokenStore>,
  server_key: String,
  subscribe_path: String,
  requested: AtomicBool,
}

impl<T: Transport, P: PushPlatform> SubscriptionManager<T, P> {
  pub fn new(api: ApiClient<T>, platform: P, tokens: Arc<TokenStore>, config: &PushConfig) -> Self {
    Self {
      api,
      platform,
      tokens,
      server_key: config.server_key.clone(),
      subscribe_path: config.subscribe_path.clone(),
      requested: AtomicBool::new(false),
    }
  }

  /// Bootstrap the subscription for the current session.
  pub async fn ensure_subscribed(&self) -> Result<SubscribeOutcome> {
    if !self.tokens.is_authenticated() {
      return Ok(SubscribeOutcome::NotAuthenticated);
    }
    if !self.platform.is_supported() {
      debug!("push notifications not supported");
      return Ok(SubscribeOutcome::Unsupported);
    }
    // Permission is requested at most once per session bootstrap.
    if self.requested.swap(true, Ordering::SeqCst) {
      return Ok(SubscribeOutcome::AlreadyRequested);
    }

    if self.platform.request_permission().await == PermissionState::Denied {
      debug!("notification permission denied");
      return Ok(SubscribeOutcome::PermissionDenied);
    }

    match self.platform.subscription().await {
      Some(existing) => {
        debug!(endpoint = %existing.endpoint, "reusing existing push subscription");
        self.register(&existing).await?;
        Ok(SubscribeOutcome::AlreadySubscribed)
      }
      None => {
        let created = self.platform.subscribe(self.server_key.clone()).await?;
        info!(endpoint = %created.endpoint, "created push subscription");
        self.register(&created).await?;
        Ok(SubscribeOutcome::Subscribed)
      }
    }
  }

  /// Send the descriptor to the server, authenticated with the session
  /// credential. The endpoint upserts, keyed by the descriptor's endpoint.
  async fn register(&self, descriptor: &SubscriptionDescriptor) -> Result<()> {
    self
      .api
      .post(&self.subscribe_path, serde_json::to_value(descriptor)?)
      .await?;
    Ok(())
  }
}
