//! Offline-first request layer for the Docket legal case manager.
//!
//! Docket clients keep working through connectivity loss: reads are served
//! from a partitioned response cache (pinned app shell + opportunistically
//! cached API responses), designated writes are captured into a durable
//! local queue and replayed in order once the network returns, and push
//! notifications flow back to the user independently of the request cycle.
//!
//! The layers, bottom up:
//! - [`outbox`]: durable FIFO queue of unacknowledged writes
//! - [`cache`]: static/dynamic response cache with bounds and versioning
//! - [`interceptor`]: per-request policy dispatch (passthrough, queue on
//!   failure, network first, cache first)
//! - [`sync`]: trigger handling and single-flight replay of the outbox
//! - [`push`]: notification delivery, interaction routing, subscriptions
//! - [`api`]: the request façade applications actually call
//!
//! [`client::OfflineClient`] wires all of it together.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod interceptor;
pub mod outbox;
pub mod push;
pub mod sync;
pub mod transport;

pub use api::{ApiClient, TokenStore};
pub use client::OfflineClient;
pub use config::Config;
pub use error::RequestError;
pub use http::{Method, Request, RequestMode, Response};
pub use interceptor::{Policy, RequestInterceptor};
pub use outbox::{Outbox, PendingWrite};
pub use sync::{ReplayReport, SyncEngine, SyncHandle, SyncState, SyncStatus};
pub use transport::{HttpTransport, Transport};
