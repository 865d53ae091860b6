//! Error types for the cache and transport layers.

use thiserror::Error;

use crate::cache::EntityKind;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
  /// A cache operation was requested on an endpoint without a backend.
  #[error("no cache backend is attached to this endpoint")]
  NoCacheAssigned,

  /// The backend has not been bound to an endpoint yet.
  #[error("{kind} cache used before being attached to an endpoint")]
  MissingParent { kind: EntityKind },

  /// Unsupported comparison, request method or operation.
  #[error("{0} is not implemented")]
  NotImplemented(String),

  /// Query rejected at construction.
  #[error("invalid query: {0}")]
  InvalidQuery(String),

  /// Query key that the entity type does not expose.
  #[error("{kind} has no queryable field '{key}'")]
  UnknownField { kind: EntityKind, key: String },

  /// Workspace-scoped request without a workspace id.
  #[error("{kind} requests need a workspace id")]
  MissingWorkspace { kind: EntityKind },

  /// Non-success HTTP response.
  #[error("request failed with status code {status}: {body}")]
  Status { status: u16, body: String },

  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("invalid URL: {0}")]
  Url(#[from] url::ParseError),

  /// A blocking cache worker panicked or was cancelled.
  #[error("cache worker failed: {0}")]
  Task(String),

  #[error("lock poisoned: {0}")]
  LockPoisoned(String),
}

impl Error {
  /// Server-class failures are the only ones worth retrying.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Error::Status { status, .. } if (500..600).contains(status))
  }

  /// HTTP status code carried by the error, if any.
  pub fn status(&self) -> Option<u16> {
    match self {
      Error::Status { status, .. } => Some(*status),
      Error::Http(e) => e.status().map(|s| s.as_u16()),
      _ => None,
    }
  }
}

impl From<tokio::task::JoinError> for Error {
  fn from(e: tokio::task::JoinError) -> Self {
    Error::Task(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_only_server_errors_are_retryable() {
    let server = Error::Status {
      status: 503,
      body: String::new(),
    };
    let client = Error::Status {
      status: 404,
      body: String::new(),
    };

    assert!(server.is_retryable());
    assert!(!client.is_retryable());
    assert!(!Error::NoCacheAssigned.is_retryable());
    assert_eq!(client.status(), Some(404));
  }

  #[test]
  fn test_missing_parent_names_kind() {
    let err = Error::MissingParent {
      kind: EntityKind::Tracker,
    };
    assert_eq!(
      err.to_string(),
      "tracker cache used before being attached to an endpoint"
    );
  }
}
