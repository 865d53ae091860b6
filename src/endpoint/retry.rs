//! Bounded retry with randomized backoff for server-class failures.

use rand::Rng;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::http::{ApiRequest, AsyncTransport, RawResponse, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Retries after the first attempt; only 5xx responses are retried.
  pub retries: u32,
  /// Propagate every failure immediately.
  pub re_raise: bool,
  /// Backoff is a random whole number of units between 1 and 5.
  pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      retries: 3,
      re_raise: false,
      backoff_unit: Duration::from_secs(1),
    }
  }
}

impl RetryPolicy {
  /// Delay before the next attempt, or `None` when the error is final.
  fn next_delay(&self, err: &Error, remaining: u32) -> Option<Duration> {
    if self.re_raise || remaining == 0 || !err.is_retryable() {
      return None;
    }
    let units = rand::thread_rng().gen_range(1..=5u32);
    Some(self.backoff_unit * units)
  }
}

/// Turn a non-2xx response into [`Error::Status`].
pub fn check_status(response: RawResponse) -> Result<RawResponse> {
  if response.is_success() {
    Ok(response)
  } else {
    error!(status = response.status, body = %response.body, "request failed");
    Err(Error::Status {
      status: response.status,
      body: response.body,
    })
  }
}

pub fn send_with_retry<Tr: Transport + ?Sized>(
  transport: &Tr,
  policy: &RetryPolicy,
  request: &ApiRequest,
) -> Result<RawResponse> {
  let mut remaining = policy.retries;
  loop {
    let err = match transport.send(request).and_then(check_status) {
      Ok(response) => return Ok(response),
      Err(e) => e,
    };
    let Some(delay) = policy.next_delay(&err, remaining) else {
      return Err(err);
    };
    remaining -= 1;
    warn!(
      status = ?err.status(),
      path = %request.path,
      delay_ms = delay.as_millis() as u64,
      retries_left = remaining,
      "server error, retrying request"
    );
    std::thread::sleep(delay);
  }
}

pub async fn send_with_retry_async<Tr: AsyncTransport + ?Sized>(
  transport: &Tr,
  policy: &RetryPolicy,
  request: &ApiRequest,
) -> Result<RawResponse> {
  let mut remaining = policy.retries;
  loop {
    let err = match transport.send(request).await.and_then(check_status) {
      Ok(response) => return Ok(response),
      Err(e) => e,
    };
    let Some(delay) = policy.next_delay(&err, remaining) else {
      return Err(err);
    };
    remaining -= 1;
    warn!(
      status = ?err.status(),
      path = %request.path,
      delay_ms = delay.as_millis() as u64,
      retries_left = remaining,
      "server error, retrying request"
    );
    tokio::time::sleep(delay).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn server_error() -> Error {
    Error::Status {
      status: 502,
      body: String::new(),
    }
  }

  #[test]
  fn test_delay_within_one_to_five_units() {
    let policy = RetryPolicy {
      backoff_unit: Duration::from_millis(10),
      ..RetryPolicy::default()
    };
    for _ in 0..50 {
      let delay = policy.next_delay(&server_error(), 1).unwrap();
      assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(50));
    }
  }

  #[test]
  fn test_final_errors() {
    let policy = RetryPolicy::default();
    assert!(policy.next_delay(&server_error(), 0).is_none());
    assert!(policy
      .next_delay(
        &Error::Status {
          status: 429,
          body: String::new()
        },
        3
      )
      .is_none());

    let strict = RetryPolicy {
      re_raise: true,
      ..RetryPolicy::default()
    };
    assert!(strict.next_delay(&server_error(), 3).is_none());
  }
}
