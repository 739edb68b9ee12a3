//! Core types for the response cache.

use chrono::{DateTime, Utc};

use crate::http::Response;

/// Which partition an entry lives in.
///
/// Static entries are pinned at install time and are never touched by
/// runtime traffic, expiry, or eviction. Dynamic entries are written on every
/// successful GET and replaced in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePartition {
  Static,
  Dynamic,
}

impl CachePartition {
  pub fn as_str(&self) -> &'static str {
    match self {
      CachePartition::Static => "static",
      CachePartition::Dynamic => "dynamic",
    }
  }
}

/// A cache hit: the stored snapshot plus where and when it was stored.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub partition: CachePartition,
  pub cached_at: DateTime<Utc>,
}
