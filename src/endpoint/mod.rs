//! Cache-aside coordinators.
//!
//! A coordinator sits between callers and the remote API:
//! 1. Without `refresh`, a non-empty attached backend answers the call
//!    with its whole collection and no network call is made
//! 2. Otherwise the request goes out with bounded retries on 5xx
//! 3. Decoded results are written back to the backend
//!
//! The collection shortcut ignores request parameters; callers that need
//! parameter-specific answers query the backend directly.

mod asynchronous;
pub mod resources;
mod retry;

pub use asynchronous::AsyncCachedEndpoint;
pub use retry::{check_status, send_with_retry, send_with_retry_async, RetryPolicy};

use chrono::Duration;
use serde_json::Value as Json;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

use self::resources::{collection_path, delete_path, item_path, workspace_of};
use crate::cache::{CacheBackend, CacheQuery, CacheResult, Cacheable};
use crate::error::{Error, Result};
use crate::http::{ApiRequest, RawResponse, RequestMethod, Transport};

/// Decoded outcome of a coordinated request.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<T> {
  One(T),
  Many(Vec<T>),
  /// Undecoded response, for requests flagged `raw`
  Raw(RawResponse),
  /// No content, a DELETE, or a JSON `null`
  Empty,
}

impl<T> Payload<T> {
  pub fn into_vec(self) -> Vec<T> {
    match self {
      Payload::One(entity) => vec![entity],
      Payload::Many(entities) => entities,
      Payload::Raw(_) | Payload::Empty => Vec::new(),
    }
  }

  pub fn into_one(self) -> Option<T> {
    match self {
      Payload::One(entity) => Some(entity),
      Payload::Many(entities) => entities.into_iter().next(),
      Payload::Raw(_) | Payload::Empty => None,
    }
  }

  /// Entities carried by the payload, for writing back to a cache.
  fn entities(&self) -> &[T] {
    match self {
      Payload::One(entity) => std::slice::from_ref(entity),
      Payload::Many(entities) => entities,
      Payload::Raw(_) | Payload::Empty => &[],
    }
  }
}

/// Decode a response body into entities of type `T`.
///
/// An empty body or JSON `null` means no payload; any other body that is
/// not JSON is an error.
pub fn decode<T: Cacheable>(response: &RawResponse) -> Result<Payload<T>> {
  if response.body.trim().is_empty() {
    return Ok(Payload::Empty);
  }
  let body: Json = serde_json::from_str(&response.body).map_err(|e| {
    warn!(kind = %T::kind(), status = response.status, error = %e, "undecodable response body");
    Error::from(e)
  })?;
  match body {
    Json::Array(items) => Ok(Payload::Many(
      items.into_iter().map(T::from_api).collect::<Result<_>>()?,
    )),
    object @ Json::Object(_) => Ok(Payload::One(T::from_api(object)?)),
    _ => Ok(Payload::Empty),
  }
}

/// Blocking cache-aside coordinator for one entity type.
pub struct CachedEndpoint<T, B, Tr> {
  transport: Tr,
  cache: Option<B>,
  policy: RetryPolicy,
  workspace_id: Option<i64>,
  _kind: PhantomData<fn() -> T>,
}

impl<T, B, Tr> CachedEndpoint<T, B, Tr>
where
  T: Cacheable,
  B: CacheBackend<T>,
  Tr: Transport,
{
  pub fn new(transport: Tr) -> Self {
    Self {
      transport,
      cache: None,
      policy: RetryPolicy::default(),
      workspace_id: None,
      _kind: PhantomData,
    }
  }

  /// Attach `backend`, binding it first.
  pub fn with_cache(mut self, backend: B) -> Result<Self> {
    self.attach(backend)?;
    Ok(self)
  }

  pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_workspace(mut self, workspace_id: i64) -> Self {
    self.workspace_id = Some(workspace_id);
    self
  }

  /// Bind and attach a backend, returning the one it replaces.
  pub fn attach(&mut self, mut backend: B) -> Result<Option<B>> {
    backend.bind()?;
    Ok(self.cache.replace(backend))
  }

  pub fn detach(&mut self) -> Option<B> {
    self.cache.take()
  }

  pub fn cache(&self) -> Option<&B> {
    self.cache.as_ref()
  }

  pub fn cache_mut(&mut self) -> Option<&mut B> {
    self.cache.as_mut()
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  fn backend(&mut self) -> Result<&mut B> {
    self.cache.as_mut().ok_or(Error::NoCacheAssigned)
  }

  pub fn load_cache(&mut self) -> Result<Vec<T>> {
    self.backend()?.load()
  }

  pub fn save_cache(&mut self, entries: &[T], method: RequestMethod) -> Result<()> {
    let backend = self.backend()?;
    if backend.caching_disabled() {
      debug!(kind = %T::kind(), "cache expires immediately, not saving");
      return Ok(());
    }
    backend.save(entries, method)
  }

  pub fn query(&mut self, queries: &[CacheQuery], distinct: bool) -> Result<Vec<T>> {
    self.backend()?.query(queries, distinct)
  }

  pub fn expire_after(&self) -> Result<Option<Duration>> {
    self
      .cache
      .as_ref()
      .map(|cache| cache.expire_after())
      .ok_or(Error::NoCacheAssigned)
  }

  pub fn set_expire_after(&mut self, expire_after: Option<Duration>) -> Result<()> {
    self.backend()?.set_expire_after(expire_after);
    Ok(())
  }

  /// Serve `request` from the cache or the network.
  pub fn execute(&mut self, request: &ApiRequest, refresh: bool) -> Result<CacheResult<Payload<T>>> {
    if !refresh {
      if let Some(cache) = self.cache.as_mut() {
        let cached = cache.load()?;
        if !cached.is_empty() {
          info!(
            kind = %T::kind(),
            method = %request.method,
            path = %request.path,
            entries = cached.len(),
            "serving request from cache"
          );
          return Ok(CacheResult::from_cache(Payload::Many(cached)));
        }
      }
    }

    let response = send_with_retry(&self.transport, &self.policy, request)?;
    if request.raw {
      return Ok(CacheResult::from_network(Payload::Raw(response)));
    }
    if request.method == RequestMethod::Delete {
      return Ok(CacheResult::from_network(Payload::Empty));
    }

    let payload = decode::<T>(&response)?;
    if self.cache.is_some() && !payload.entities().is_empty() {
      self.save_cache(payload.entities(), request.method)?;
    }
    Ok(CacheResult::from_network(payload))
  }

  /// Every entity of this kind.
  pub fn collect(&mut self, refresh: bool) -> Result<CacheResult<Vec<T>>> {
    let path = collection_path(T::kind(), self.workspace_id)?;
    Ok(self.execute(&ApiRequest::get(path), refresh)?.map(Payload::into_vec))
  }

  /// A single entity. With a cache attached and no `refresh`, only the
  /// cache is consulted. A 404 yields `None`.
  pub fn get(&mut self, id: i64, refresh: bool) -> Result<CacheResult<Option<T>>> {
    if !refresh {
      if let Some(cache) = self.cache.as_mut() {
        return Ok(CacheResult::from_cache(cache.find(id)?));
      }
    }

    let path = item_path(T::kind(), self.workspace_id, id)?;
    match self.execute(&ApiRequest::get(path), true) {
      Ok(result) => Ok(result.map(Payload::into_one)),
      Err(e) if !self.policy.re_raise && e.status() == Some(404) => {
        warn!(kind = %T::kind(), id, "entity does not exist");
        Ok(CacheResult::from_network(None))
      }
      Err(e) => Err(e),
    }
  }

  /// Delete remotely, then evict from the cache. A 404 counts as deleted.
  pub fn delete(&mut self, entity: &T) -> Result<()> {
    let path = delete_path(T::kind(), workspace_of(entity, self.workspace_id), entity.id())?;
    match self.execute(&ApiRequest::delete(path), true) {
      Ok(_) => {}
      Err(e) if !self.policy.re_raise && e.status() == Some(404) => {
        warn!(kind = %T::kind(), id = entity.id(), "entity already deleted or never existed");
      }
      Err(e) => return Err(e),
    }

    if let Some(cache) = self.cache.as_mut() {
      cache.delete(std::slice::from_ref(entity))?;
      cache.commit()?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{Tag, Tracker};
  use serde_json::json;

  #[test]
  fn test_decode_shapes() {
    let many = RawResponse::new(200, json!([{"id": 1, "name": "a", "workspace_id": 2}]).to_string());
    assert_eq!(decode::<Tag>(&many).unwrap(), Payload::Many(vec![Tag::new(1, "a", 2)]));

    let one = RawResponse::new(200, json!({"id": 1, "name": "a", "workspace_id": 2}).to_string());
    assert_eq!(decode::<Tag>(&one).unwrap(), Payload::One(Tag::new(1, "a", 2)));

    assert_eq!(decode::<Tracker>(&RawResponse::new(200, "null")).unwrap(), Payload::Empty);
    assert_eq!(decode::<Tracker>(&RawResponse::new(200, "")).unwrap(), Payload::Empty);
  }

  #[test]
  fn test_decode_rejects_non_json_body() {
    let html = RawResponse::new(200, "<html>maintenance</html>");
    assert!(matches!(decode::<Tag>(&html), Err(Error::Json(_))));
    assert_eq!(html.json(), None);
  }

  #[test]
  fn test_payload_conversions() {
    assert_eq!(Payload::Many(vec![1, 2]).into_one(), Some(1));
    assert_eq!(Payload::One(3).into_vec(), vec![3]);
    assert_eq!(Payload::<i32>::Raw(RawResponse::new(200, "x")).into_vec(), Vec::<i32>::new());
  }
}
