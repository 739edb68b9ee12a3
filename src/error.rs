//! Error taxonomy for the request layer.
//!
//! The load-bearing distinction is `Offline` (no response ever arrived) versus
//! `Http` (the server answered with a failure status). Only the former engages
//! offline handling — cached fallbacks, queued writes, synthetic responses.
//! A server rejection is propagated to the caller and is never queued.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
  /// No response was received: connection refused, DNS failure, timeout,
  /// or the body stream died mid-read.
  #[error("network unreachable: {0}")]
  Offline(String),

  /// The server responded with a non-success status.
  #[error("{status}: {body}")]
  Http { status: u16, body: String },

  /// The request URL could not be constructed.
  #[error("invalid request url: {0}")]
  InvalidUrl(#[from] url::ParseError),

  /// The local cache or queue rejected an operation. Not recoverable here;
  /// there is no secondary fallback for the storage medium itself.
  #[error("storage failure: {0}")]
  Storage(String),
}

impl RequestError {
  /// True for transient network-level failures, the only class of error
  /// that triggers offline degradation.
  pub fn is_offline(&self) -> bool {
    matches!(self, RequestError::Offline(_))
  }

  pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
    RequestError::Storage(err.to_string())
  }
}
