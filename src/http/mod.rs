//! Request description and transport seam between coordinators and the
//! remote API.
//!
//! Coordinators only see [`ApiRequest`] and [`RawResponse`]; status
//! interpretation and retries live in the endpoint layer so transports can
//! be swapped for scripted fakes in tests.

mod client;

pub use client::{BlockingHttpTransport, Credentials, HttpTransport, DEFAULT_BASE_URL};

use async_trait::async_trait;
use serde_json::Value as Json;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl RequestMethod {
  /// GET and DELETE requests never carry a body.
  pub fn has_body(self) -> bool {
    !matches!(self, RequestMethod::Get | RequestMethod::Delete)
  }

  pub fn as_reqwest(self) -> reqwest::Method {
    match self {
      RequestMethod::Get => reqwest::Method::GET,
      RequestMethod::Post => reqwest::Method::POST,
      RequestMethod::Put => reqwest::Method::PUT,
      RequestMethod::Patch => reqwest::Method::PATCH,
      RequestMethod::Delete => reqwest::Method::DELETE,
    }
  }
}

impl fmt::Display for RequestMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      RequestMethod::Get => "GET",
      RequestMethod::Post => "POST",
      RequestMethod::Put => "PUT",
      RequestMethod::Patch => "PATCH",
      RequestMethod::Delete => "DELETE",
    })
  }
}

/// A single call against the API, relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: RequestMethod,
  pub path: String,
  pub body: Option<Json>,
  /// Return the undecoded network response without writing it back.
  /// A populated cache still answers the call unless it is refreshed.
  pub raw: bool,
}

impl ApiRequest {
  pub fn new(method: RequestMethod, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      body: None,
      raw: false,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(RequestMethod::Get, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(RequestMethod::Delete, path)
  }

  pub fn with_body(mut self, body: Json) -> Self {
    self.body = Some(body);
    self
  }

  pub fn raw(mut self) -> Self {
    self.raw = true;
    self
  }
}

/// Status and body of a response, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
  pub status: u16,
  pub body: String,
}

impl RawResponse {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      body: body.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Decoded body; `None` for empty or non-JSON payloads.
  pub fn json(&self) -> Option<Json> {
    if self.body.trim().is_empty() {
      return None;
    }
    match serde_json::from_str(&self.body) {
      Ok(json) => Some(json),
      Err(e) => {
        warn!(status = self.status, error = %e, "response body is not JSON");
        None
      }
    }
  }
}

/// Blocking transport used by the synchronous coordinator.
pub trait Transport: Send + Sync {
  fn send(&self, request: &ApiRequest) -> Result<RawResponse>;
}

/// Non-blocking transport used by the async coordinator.
#[async_trait]
pub trait AsyncTransport: Send + Sync {
  async fn send(&self, request: &ApiRequest) -> Result<RawResponse>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
  fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
    (**self).send(request)
  }
}

#[async_trait]
impl<T: AsyncTransport + ?Sized> AsyncTransport for Arc<T> {
  async fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
    (**self).send(request).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_response_json_tolerates_empty_body() {
    assert_eq!(RawResponse::new(200, "").json(), None);
    assert_eq!(RawResponse::new(200, "not json").json(), None);
    assert_eq!(
      RawResponse::new(200, r#"{"id": 1}"#).json(),
      Some(serde_json::json!({"id": 1}))
    );
  }

  #[test]
  fn test_body_only_for_writes() {
    assert!(!RequestMethod::Get.has_body());
    assert!(!RequestMethod::Delete.has_body());
    assert!(RequestMethod::Patch.has_body());
    assert_eq!(RequestMethod::Patch.to_string(), "PATCH");
  }
}
