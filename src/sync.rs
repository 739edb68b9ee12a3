//! Replay of queued writes and the triggers that start it.
//!
//! The engine sits on an event channel. A trigger arrives either because a
//! write was just captured into the outbox (tag registration) or because
//! connectivity came back. Each trigger runs one replay pass: every pending
//! write is re-issued in FIFO order with the current credential; successes
//! are removed, failures are logged and left queued for the next pass. At
//! most one pass is in flight — a trigger landing mid-pass is coalesced into
//! a rerun instead of replaying records twice.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use color_eyre::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use url::Url;

use crate::api::TokenStore;
use crate::http::Request;
use crate::outbox::Outbox;
use crate::transport::Transport;

/// What woke the engine up.
#[derive(Debug)]
pub enum TriggerEvent {
  /// A sync tag was registered after an enqueue.
  Registered(String),
  /// Connectivity returned.
  Reconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Replaying,
}

/// Outcome of one replay invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
  pub attempted: usize,
  pub synced: usize,
  pub failed: usize,
  /// True when another pass was already in flight and this invocation was
  /// folded into its rerun instead of running itself.
  pub deferred: bool,
}

/// Snapshot for status surfaces (CLI, status bar).
#[derive(Debug, Clone)]
pub struct SyncStatus {
  pub online: bool,
  pub pending_writes: usize,
  pub last_sync: Option<DateTime<Utc>>,
}

struct SyncShared {
  replay_lock: tokio::sync::Mutex<()>,
  rerun: AtomicBool,
  state: Mutex<SyncState>,
  last_sync: RwLock<Option<DateTime<Utc>>>,
  tags: Mutex<BTreeSet<String>>,
  online: watch::Sender<bool>,
}

/// Cheap handle for signalling the engine and reading its state.
#[derive(Clone)]
pub struct SyncHandle {
  tx: mpsc::UnboundedSender<TriggerEvent>,
  shared: Arc<SyncShared>,
}

impl SyncHandle {
  /// Register a named sync tag and wake the engine. Re-registering a tag
  /// that is already pending coalesces.
  pub fn register(&self, tag: &str) {
    let fresh = self
      .shared
      .tags
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(tag.to_string());
    if fresh {
      debug!(tag, "sync tag registered");
    }
    let _ = self.tx.send(TriggerEvent::Registered(tag.to_string()));
  }

  pub fn registered_tags(&self) -> Vec<String> {
    self
      .shared
      .tags
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .iter()
      .cloned()
      .collect()
  }

  /// Feed a connectivity observation. The offline-to-online transition
  /// emits exactly one reconnect trigger; repeated observations of the same
  /// state are silent.
  pub fn update_connectivity(&self, online: bool) {
    let changed = self.shared.online.send_if_modified(|current| {
      if *current != online {
        *current = online;
        true
      } else {
        false
      }
    });
    if changed && online {
      info!("connectivity restored, triggering replay");
      let _ = self.tx.send(TriggerEvent::Reconnected);
    } else if changed {
      info!("connectivity lost");
    }
  }

  pub fn is_online(&self) -> bool {
    *self.shared.online.borrow()
  }

  /// Watch channel mirroring the online flag, for status surfaces.
  pub fn watch_online(&self) -> watch::Receiver<bool> {
    self.shared.online.subscribe()
  }

  pub fn state(&self) -> SyncState {
    *self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn last_sync(&self) -> Option<DateTime<Utc>> {
    *self
      .shared
      .last_sync
      .read()
      .unwrap_or_else(|e| e.into_inner())
  }
}

/// Replays the outbox against the server.
pub struct SyncEngine<T: Transport> {
  transport: Arc<T>,
  outbox: Arc<Outbox>,
  tokens: Arc<TokenStore>,
  base_url: Url,
  shared: Arc<SyncShared>,
  rx: mpsc::UnboundedReceiver<TriggerEvent>,
}

impl<T: Transport> SyncEngine<T> {
  pub fn new(
    transport: Arc<T>,
    outbox: Arc<Outbox>,
    tokens: Arc<TokenStore>,
    base_url: Url,
  ) -> (Self, SyncHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (online, _) = watch::channel(true);
    let shared = Arc::new(SyncShared {
      replay_lock: tokio::sync::Mutex::new(()),
      rerun: AtomicBool::new(false),
      state: Mutex::new(SyncState::Idle),
      last_sync: RwLock::new(None),
      tags: Mutex::new(BTreeSet::new()),
      online,
    });
    let handle = SyncHandle {
      tx,
      shared: Arc::clone(&shared),
    };
    let engine = Self {
      transport,
      outbox,
      tokens,
      base_url,
      shared,
      rx,
    };
    (engine, handle)
  }

  /// Event loop: replay on every trigger until all handles are dropped.
  pub async fn run(mut self) {
    // Catch up on writes queued in a previous session.
    match self.outbox.is_empty() {
      Ok(false) => {
        if let Err(e) = self.replay_pending().await {
          warn!("startup replay failed: {e:#}");
        }
      }
      Ok(true) => {}
      Err(e) => warn!("could not inspect outbox: {e:#}"),
    }

    while let Some(event) = self.rx.recv().await {
      match &event {
        TriggerEvent::Registered(tag) => debug!(tag = %tag, "sync trigger"),
        TriggerEvent::Reconnected => debug!("reconnect trigger"),
      }
      match self.replay_pending().await {
        Ok(report) if !report.deferred => {
          info!(
            attempted = report.attempted,
            synced = report.synced,
            failed = report.failed,
            "replay pass finished"
          );
        }
        Ok(_) => {}
        Err(e) => warn!("replay failed: {e:#}"),
      }
    }
  }

  /// Run a replay pass now, unless one is already in flight — in that case
  /// the in-flight pass reruns when it finishes and this call reports
  /// `deferred`.
  pub async fn replay_pending(&self) -> Result<ReplayReport> {
    let _guard = match self.shared.replay_lock.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        self.shared.rerun.store(true, Ordering::SeqCst);
        return Ok(ReplayReport {
          deferred: true,
          ..ReplayReport::default()
        });
      }
    };

    *self.shared.state.lock().unwrap_or_else(|e| e.into_inner()) = SyncState::Replaying;

    let result = self.replay_until_settled().await;

    *self.shared.state.lock().unwrap_or_else(|e| e.into_inner()) = SyncState::Idle;

    let report = result?;
    if report.failed == 0 {
      *self
        .shared
        .last_sync
        .write()
        .unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
    }
    if self.outbox.is_empty()? {
      self
        .shared
        .tags
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clear();
    }
    Ok(report)
  }

  /// One or more passes: triggers that arrived mid-pass request a rerun.
  async fn replay_until_settled(&self) -> Result<ReplayReport> {
    let mut total = ReplayReport::default();
    loop {
      let pass = self.replay_pass().await?;
      total.attempted += pass.attempted;
      total.synced += pass.synced;
      total.failed += pass.failed;
      if !self.shared.rerun.swap(false, Ordering::SeqCst) {
        return Ok(total);
      }
    }
  }

  async fn replay_pass(&self) -> Result<ReplayReport> {
    let mut report = ReplayReport::default();

    for write in self.outbox.list_pending()? {
      report.attempted += 1;
      let url = match self.base_url.join(&write.endpoint) {
        Ok(url) => url,
        Err(e) => {
          // Leave it queued; a bad endpoint never blocks the rest.
          warn!(id = write.id, endpoint = %write.endpoint, "invalid endpoint: {e}");
          report.failed += 1;
          continue;
        }
      };
      let request = Request::post(url, write.payload.clone());
      match self.transport.send(request, self.tokens.get()).await {
        Ok(response) if response.is_ok() => {
          self.outbox.remove(write.id)?;
          report.synced += 1;
          debug!(id = write.id, "pending write delivered");
        }
        Ok(response) => {
          report.failed += 1;
          warn!(
            id = write.id,
            status = response.status,
            "server rejected pending write, leaving queued"
          );
        }
        Err(e) => {
          report.failed += 1;
          warn!(id = write.id, "replay attempt failed: {e}");
        }
      }
    }

    Ok(report)
  }
}

/// Probe the server on an interval and feed the observations into the
/// handle, which turns offline-to-online transitions into replay triggers.
/// Any HTTP response counts as reachable; only a transport failure is
/// offline.
pub fn spawn_connectivity_monitor<T: Transport>(
  transport: Arc<T>,
  probe_url: Url,
  interval: Duration,
  handle: SyncHandle,
) -> tokio::task::JoinHandle<()> {
  tokio::spawn(async move {
    loop {
      let online = transport
        .send(Request::get(probe_url.clone()), None)
        .await
        .is_ok();
      handle.update_connectivity(online);
      tokio::time::sleep(interval).await;
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::{Method, Response};
  use crate::transport::testing::MockTransport;
  use serde_json::json;

  fn base_url() -> Url {
    Url::parse("https://docket.example").unwrap()
  }

  fn engine_with(
    transport: Arc<MockTransport>,
    outbox: Arc<Outbox>,
  ) -> (SyncEngine<MockTransport>, SyncHandle) {
    SyncEngine::new(transport, outbox, Arc::new(TokenStore::new()), base_url())
  }

  #[tokio::test]
  async fn replays_in_submission_order_and_drains_the_queue() {
    let transport = MockTransport::new();
    let outbox = Arc::new(Outbox::open_in_memory().unwrap());
    for n in 1..=3 {
      outbox.enqueue("/api/diary-entries", &json!({"n": n})).unwrap();
    }
    let (engine, handle) = engine_with(transport.clone(), outbox.clone());

    let report = engine.replay_pending().await.unwrap();

    assert_eq!(report.synced, 3);
    assert_eq!(report.failed, 0);
    assert!(outbox.is_empty().unwrap());
    let order: Vec<i64> = transport
      .requests()
      .iter()
      .map(|(r, _)| r.body.as_ref().unwrap()["n"].as_i64().unwrap())
      .collect();
    assert_eq!(order, vec![1, 2, 3]);
    assert!(handle.last_sync().is_some());
  }

  #[tokio::test]
  async fn replay_attaches_the_current_credential() {
    let transport = MockTransport::new();
    let outbox = Arc::new(Outbox::open_in_memory().unwrap());
    outbox.enqueue("/api/diary-entries", &json!({})).unwrap();
    let tokens = Arc::new(TokenStore::new());
    tokens.set("session-token");
    let (engine, _handle) =
      SyncEngine::new(transport.clone(), outbox, tokens, base_url());

    engine.replay_pending().await.unwrap();

    assert_eq!(transport.requests()[0].1, Some("session-token".into()));
  }

  #[tokio::test]
  async fn one_bad_record_never_blocks_the_rest() {
    let transport = MockTransport::new();
    transport.set_responder(|request| {
      let n = request.body.as_ref().unwrap()["n"].as_i64().unwrap();
      if n == 2 {
        Ok(Response::json(500, &json!({"error": "boom"})))
      } else {
        Ok(Response::json(201, &json!({})))
      }
    });
    let outbox = Arc::new(Outbox::open_in_memory().unwrap());
    for n in 1..=3 {
      outbox.enqueue("/api/diary-entries", &json!({"n": n})).unwrap();
    }
    let (engine, handle) = engine_with(transport.clone(), outbox.clone());

    let report = engine.replay_pending().await.unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.synced, 2);
    assert_eq!(report.failed, 1);
    let remaining = outbox.list_pending().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].payload["n"], 2);
    // Nothing was delivered clean, so the clock and tags stay put for the
    // next trigger.
    assert!(handle.last_sync().is_none());

    // Next pass with a healthy server drains the leftover.
    transport.set_responder(|_| Ok(Response::json(201, &json!({}))));
    let report = engine.replay_pending().await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(outbox.is_empty().unwrap());
  }

  #[tokio::test]
  async fn concurrent_triggers_never_double_replay() {
    let transport = MockTransport::new();
    transport.set_delay(Duration::from_millis(50));
    let outbox = Arc::new(Outbox::open_in_memory().unwrap());
    outbox.enqueue("/api/diary-entries", &json!({"n": 1})).unwrap();
    outbox.enqueue("/api/diary-entries", &json!({"n": 2})).unwrap();
    let (engine, _handle) = engine_with(transport.clone(), outbox.clone());

    let (a, b) = tokio::join!(engine.replay_pending(), engine.replay_pending());
    let (a, b) = (a.unwrap(), b.unwrap());

    // One invocation ran, the other was folded into it.
    assert!(a.deferred ^ b.deferred);
    assert_eq!(transport.request_count(), 2);
    assert!(outbox.is_empty().unwrap());
  }

  #[tokio::test]
  async fn registration_trigger_drives_the_event_loop() {
    let transport = MockTransport::new();
    let outbox = Arc::new(Outbox::open_in_memory().unwrap());
    let (engine, handle) = engine_with(transport.clone(), outbox.clone());
    tokio::spawn(engine.run());

    outbox.enqueue("/api/diary-entries", &json!({"n": 1})).unwrap();
    handle.register("sync-diary-entries");
    handle.register("sync-diary-entries");
    assert_eq!(handle.registered_tags().len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(outbox.is_empty().unwrap());
    // Tags are cleared once the queue drains.
    assert!(handle.registered_tags().is_empty());
  }

  #[tokio::test]
  async fn only_the_offline_to_online_transition_triggers_replay() {
    let transport = MockTransport::new();
    transport.set_online(false);
    let outbox = Arc::new(Outbox::open_in_memory().unwrap());
    outbox.enqueue("/api/diary-entries", &json!({"n": 1})).unwrap();
    let (engine, handle) = engine_with(transport.clone(), outbox.clone());
    // Startup catch-up runs against a dead network and leaves the record.
    tokio::spawn(engine.run());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(outbox.len().unwrap(), 1);

    transport.set_online(true);
    // Already believed online: no transition, no replay.
    handle.update_connectivity(true);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(outbox.len().unwrap(), 1);

    handle.update_connectivity(false);
    assert!(!handle.is_online());
    handle.update_connectivity(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(outbox.is_empty().unwrap());
    assert!(handle.is_online());
  }

  #[tokio::test]
  async fn monitor_probes_feed_connectivity() {
    let transport = MockTransport::new();
    transport.set_online(false);
    let outbox = Arc::new(Outbox::open_in_memory().unwrap());
    outbox.enqueue("/api/diary-entries", &json!({"n": 1})).unwrap();
    let (engine, handle) = engine_with(transport.clone(), outbox.clone());
    tokio::spawn(engine.run());

    let probe_url = base_url().join("/").unwrap();
    spawn_connectivity_monitor(
      transport.clone(),
      probe_url,
      Duration::from_millis(10),
      handle.clone(),
    );

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(!handle.is_online());

    transport.set_online(true);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(handle.is_online());
    assert!(outbox.is_empty().unwrap());
  }

  #[tokio::test]
  async fn server_rejections_during_replay_stay_queued() {
    let transport = MockTransport::new();
    transport.route(
      Method::POST,
      "/api/diary-entries",
      Response::json(409, &json!({"error": "duplicate"})),
    );
    let outbox = Arc::new(Outbox::open_in_memory().unwrap());
    outbox.enqueue("/api/diary-entries", &json!({})).unwrap();
    let (engine, _handle) = engine_with(transport, outbox.clone());

    let report = engine.replay_pending().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(outbox.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn mid_pass_trigger_coalesces_into_a_rerun() {
    let transport = MockTransport::new();
    transport.set_delay(Duration::from_millis(40));
    let outbox = Arc::new(Outbox::open_in_memory().unwrap());
    outbox.enqueue("/api/diary-entries", &json!({"n": 1})).unwrap();
    let (engine, _handle) = engine_with(transport.clone(), outbox.clone());
    let engine = Arc::new(engine);

    let first = {
      let engine = Arc::clone(&engine);
      tokio::spawn(async move { engine.replay_pending().await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    // Lands while the first pass is mid-flight.
    let second = engine.replay_pending().await.unwrap();
    assert!(second.deferred);

    let first = first.await.unwrap();
    assert!(!first.deferred);
    assert_eq!(first.synced, 1);
    // The rerun saw an empty queue; the record went out exactly once.
    assert_eq!(transport.request_count(), 1);
  }
}
