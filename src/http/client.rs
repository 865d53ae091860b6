use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ApiRequest, AsyncTransport, RawResponse, Transport};
use crate::error::Result;

/// Root of the Toggl v9 API.
pub const DEFAULT_BASE_URL: &str = "https://api.track.toggl.com/api/v9/";

/// Basic-auth pair. Token auth uses the token as user and the literal
/// password `api_token`.
#[derive(Clone)]
pub struct Credentials {
  pub user: String,
  pub password: String,
}

impl Credentials {
  pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
    Self {
      user: user.into(),
      password: password.into(),
    }
  }

  pub fn token(token: impl Into<String>) -> Self {
    Self::new(token, "api_token")
  }
}

impl std::fmt::Debug for Credentials {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Credentials").field("user", &"***").finish()
  }
}

fn base_url(raw: &str) -> Result<Url> {
  if raw.ends_with('/') {
    Ok(Url::parse(raw)?)
  } else {
    Ok(Url::parse(&format!("{}/", raw))?)
  }
}

fn json_headers() -> HeaderMap {
  let mut headers = HeaderMap::new();
  headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
  headers
}

fn endpoint(base: &Url, request: &ApiRequest) -> Result<Url> {
  Ok(base.join(request.path.trim_start_matches('/'))?)
}

/// reqwest-backed transport for the async coordinator.
#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base: Url,
  credentials: Credentials,
}

impl HttpTransport {
  pub fn new(base: &str, credentials: Credentials, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .default_headers(json_headers())
      .timeout(timeout)
      .build()?;
    Ok(Self {
      client,
      base: base_url(base)?,
      credentials,
    })
  }
}

#[async_trait]
impl AsyncTransport for HttpTransport {
  async fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
    let url = endpoint(&self.base, request)?;
    debug!(method = %request.method, %url, "sending request");

    let mut builder = self
      .client
      .request(request.method.as_reqwest(), url)
      .basic_auth(&self.credentials.user, Some(&self.credentials.password));
    if let (true, Some(body)) = (request.method.has_body(), &request.body) {
      builder = builder.json(body);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    Ok(RawResponse { status, body })
  }
}

/// reqwest-backed transport for the blocking coordinator.
///
/// Must not be constructed or dropped on an async runtime thread.
#[derive(Debug, Clone)]
pub struct BlockingHttpTransport {
  client: reqwest::blocking::Client,
  base: Url,
  credentials: Credentials,
}

impl BlockingHttpTransport {
  pub fn new(base: &str, credentials: Credentials, timeout: Duration) -> Result<Self> {
    let client = reqwest::blocking::Client::builder()
      .default_headers(json_headers())
      .timeout(timeout)
      .build()?;
    Ok(Self {
      client,
      base: base_url(base)?,
      credentials,
    })
  }
}

impl Transport for BlockingHttpTransport {
  fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
    let url = endpoint(&self.base, request)?;
    debug!(method = %request.method, %url, "sending request");

    let mut builder = self
      .client
      .request(request.method.as_reqwest(), url)
      .basic_auth(&self.credentials.user, Some(&self.credentials.password));
    if let (true, Some(body)) = (request.method.has_body(), &request.body) {
      builder = builder.json(body);
    }

    let response = builder.send()?;
    let status = response.status().as_u16();
    let body = response.text()?;
    Ok(RawResponse { status, body })
  }
}
