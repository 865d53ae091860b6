#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use toggl_cache::http::{AsyncTransport, Transport};
use toggl_cache::{ApiRequest, Cacheable, RawResponse, Result, RetryPolicy};

/// Transport that replays canned responses and records every request.
/// Once the script runs out it answers `200 []`.
#[derive(Default)]
pub struct ScriptedTransport {
  script: Mutex<VecDeque<RawResponse>>,
  requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
  pub fn new(responses: impl IntoIterator<Item = RawResponse>) -> Self {
    Self {
      script: Mutex::new(responses.into_iter().collect()),
      requests: Mutex::default(),
    }
  }

  pub fn repeat(response: RawResponse, times: usize) -> Self {
    Self::new(std::iter::repeat(response).take(times))
  }

  pub fn calls(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  pub fn requests(&self) -> Vec<ApiRequest> {
    self.requests.lock().unwrap().clone()
  }

  fn next(&self, request: &ApiRequest) -> RawResponse {
    self.requests.lock().unwrap().push(request.clone());
    self
      .script
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| RawResponse::new(200, "[]"))
  }
}

impl Transport for ScriptedTransport {
  fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
    Ok(self.next(request))
  }
}

#[async_trait]
impl AsyncTransport for ScriptedTransport {
  async fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
    Ok(self.next(request))
  }
}

/// Retry policy with millisecond backoff so tests stay fast.
pub fn fast_retries(retries: u32) -> RetryPolicy {
  RetryPolicy {
    retries,
    re_raise: false,
    backoff_unit: StdDuration::from_millis(1),
  }
}

pub fn aged<T: Cacheable>(mut entity: T, age: Duration) -> T {
  entity.set_timestamp(Utc::now() - age);
  entity
}
