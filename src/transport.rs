//! The network seam.
//!
//! Everything that touches the wire goes through [`Transport`], so the
//! interceptor, sync engine, and façade can be exercised against a scripted
//! transport in tests. The contract mirrors the error taxonomy: an HTTP
//! response of *any* status is `Ok`; only a transport-level failure (nothing
//! received) is `Err`, and it is always [`RequestError::Offline`].

use std::future::Future;
use std::pin::Pin;

use color_eyre::{eyre::eyre, Result};
use reqwest::header::CONTENT_TYPE;

use crate::error::RequestError;
use crate::http::{Request, Response};

/// A boxed future, so `Transport` stays object-safe and implementations can
/// be driven from spawned tasks.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Issues a request, attaching the bearer credential when one is provided.
pub trait Transport: Send + Sync + 'static {
  fn send(&self, request: Request, bearer: Option<String>) -> BoxFuture<Result<Response, RequestError>>;
}

/// Production transport backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

impl Transport for HttpTransport {
  fn send(&self, request: Request, bearer: Option<String>) -> BoxFuture<Result<Response, RequestError>> {
    let client = self.client.clone();
    Box::pin(async move {
      let mut builder = client.request(request.method.clone(), request.url.clone());
      if let Some(body) = &request.body {
        builder = builder.header(CONTENT_TYPE, "application/json").json(body);
      }
      if let Some(token) = bearer {
        builder = builder.bearer_auth(token);
      }

      // reqwest only errors when no usable response arrived; failure
      // statuses come back as responses.
      let response = builder
        .send()
        .await
        .map_err(|e| RequestError::Offline(e.to_string()))?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .map(|(k, v)| {
          (
            k.as_str().to_string(),
            String::from_utf8_lossy(v.as_bytes()).into_owned(),
          )
        })
        .collect();
      let body = response
        .bytes()
        .await
        .map_err(|e| RequestError::Offline(e.to_string()))?
        .to_vec();

      Ok(Response { status, headers, body })
    })
  }
}
