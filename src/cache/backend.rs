//! Cache backend trait shared by the JSON and SQLite stores.

use chrono::Duration;
use tracing::debug;

use super::query::CacheQuery;
use super::traits::Cacheable;
use crate::error::{Error, Result};
use crate::http::RequestMethod;

/// Storage operation implied by a request verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
  /// Insert or replace (reads, creates, replacements)
  Upsert,
  /// Merge into an existing row (partial updates)
  Merge,
}

impl WriteOp {
  pub fn for_method(method: RequestMethod) -> Result<Self> {
    match method {
      RequestMethod::Get | RequestMethod::Post | RequestMethod::Put => Ok(WriteOp::Upsert),
      RequestMethod::Patch => Ok(WriteOp::Merge),
      RequestMethod::Delete => Err(Error::NotImplemented(format!(
        "{} request method",
        method
      ))),
    }
  }
}

/// Trait for cache storage backends.
///
/// A backend is owned by exactly one endpoint. It is created detached and
/// bound with [`CacheBackend::bind`] when attached; every other operation
/// on a detached backend fails with [`Error::MissingParent`].
pub trait CacheBackend<T: Cacheable>: Send {
  /// Resolve storage for the entity type and load or migrate it.
  fn bind(&mut self) -> Result<()>;

  fn is_bound(&self) -> bool;

  /// `None` never expires, a zero duration disables caching.
  fn expire_after(&self) -> Option<Duration>;

  fn set_expire_after(&mut self, expire_after: Option<Duration>);

  /// All non-expired entities.
  fn load(&mut self) -> Result<Vec<T>>;

  fn find(&mut self, id: i64) -> Result<Option<T>>;

  /// Insert new entities or replace existing ones, then persist.
  fn add(&mut self, entries: &[T]) -> Result<()>;

  /// Merge entities into their stored versions, then persist.
  fn update(&mut self, entries: &[T]) -> Result<()>;

  fn delete(&mut self, entries: &[T]) -> Result<()>;

  fn query(&mut self, queries: &[CacheQuery], distinct: bool) -> Result<Vec<T>>;

  fn commit(&mut self) -> Result<()>;

  fn caching_disabled(&self) -> bool {
    self.expire_after() == Some(Duration::zero())
  }

  /// Store a network result using the operation implied by `method`.
  fn save(&mut self, entries: &[T], method: RequestMethod) -> Result<()> {
    if self.caching_disabled() {
      return Ok(());
    }
    let op = match WriteOp::for_method(method) {
      Ok(op) => op,
      Err(e) => {
        debug!(error = %e, kind = %T::kind(), "not caching response");
        return Ok(());
      }
    };
    match op {
      WriteOp::Upsert => self.add(entries)?,
      WriteOp::Merge => self.update(entries)?,
    }
    self.commit()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_write_op_mapping() {
    assert_eq!(WriteOp::for_method(RequestMethod::Get).unwrap(), WriteOp::Upsert);
    assert_eq!(WriteOp::for_method(RequestMethod::Post).unwrap(), WriteOp::Upsert);
    assert_eq!(WriteOp::for_method(RequestMethod::Put).unwrap(), WriteOp::Upsert);
    assert_eq!(WriteOp::for_method(RequestMethod::Patch).unwrap(), WriteOp::Merge);
    assert!(matches!(
      WriteOp::for_method(RequestMethod::Delete),
      Err(Error::NotImplemented(_))
    ));
  }
}
