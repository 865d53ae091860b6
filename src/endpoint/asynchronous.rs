//! Async cache-aside coordinator.
//!
//! Same decisions as [`CachedEndpoint`](super::CachedEndpoint), with every
//! network and storage call awaited. Background work is tracked in a
//! [`JoinSet`] owned by the coordinator: finished tasks are reaped on the
//! next spawn, `shutdown` waits for the rest, and dropping the coordinator
//! aborts whatever is still running.

use chrono::Duration;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::resources::{
  collection_path, delete_path, item_path, workspace_of, CURRENT_TRACKER_PATH, TRACKER_NOT_RUNNING,
};
use super::retry::{send_with_retry_async, RetryPolicy};
use super::{decode, Payload};
use crate::cache::{AsyncCacheBackend, CacheQuery, CacheResult, Cacheable, Value};
use crate::error::{Error, Result};
use crate::http::{ApiRequest, AsyncTransport, RequestMethod};
use crate::models::Tracker;

/// State shared with background tasks. Holds no handle to the task set,
/// so spawned work never keeps its own coordinator alive.
struct Core<T, C, Tr: ?Sized> {
  transport: Arc<Tr>,
  cache: Option<C>,
  policy: RetryPolicy,
  workspace_id: Option<i64>,
  _kind: PhantomData<fn() -> T>,
}

impl<T, C: Clone, Tr: ?Sized> Clone for Core<T, C, Tr> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      cache: self.cache.clone(),
      policy: self.policy,
      workspace_id: self.workspace_id,
      _kind: PhantomData,
    }
  }
}

impl<T, C, Tr> Core<T, C, Tr>
where
  T: Cacheable,
  C: AsyncCacheBackend<T> + Clone + 'static,
  Tr: AsyncTransport + ?Sized + 'static,
{
  async fn execute(&self, request: &ApiRequest, refresh: bool) -> Result<CacheResult<Payload<T>>> {
    if !refresh {
      if let Some(cache) = &self.cache {
        let cached = cache.load().await?;
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

    let response = send_with_retry_async(&*self.transport, &self.policy, request).await?;
    if request.raw {
      return Ok(CacheResult::from_network(Payload::Raw(response)));
    }
    if request.method == RequestMethod::Delete {
      return Ok(CacheResult::from_network(Payload::Empty));
    }

    let payload = decode::<T>(&response)?;
    if let Some(cache) = &self.cache {
      let entities = payload.entities();
      if !entities.is_empty() {
        cache.save(entities.to_vec(), request.method).await?;
      }
    }
    Ok(CacheResult::from_network(payload))
  }

  async fn get(&self, id: i64, refresh: bool) -> Result<CacheResult<Option<T>>> {
    if !refresh {
      if let Some(cache) = &self.cache {
        return Ok(CacheResult::from_cache(cache.find(id).await?));
      }
    }

    let path = item_path(T::kind(), self.workspace_id, id)?;
    match self.execute(&ApiRequest::get(path), true).await {
      Ok(result) => Ok(result.map(Payload::into_one)),
      Err(e) if !self.policy.re_raise && e.status() == Some(404) => {
        warn!(kind = %T::kind(), id, "entity does not exist");
        Ok(CacheResult::from_network(None))
      }
      Err(e) => Err(e),
    }
  }
}

/// Async cache-aside coordinator for one entity type.
pub struct AsyncCachedEndpoint<T, C, Tr: ?Sized> {
  core: Core<T, C, Tr>,
  tasks: Mutex<JoinSet<()>>,
}

impl<T, C, Tr> AsyncCachedEndpoint<T, C, Tr>
where
  T: Cacheable,
  C: AsyncCacheBackend<T> + Clone + 'static,
  Tr: AsyncTransport + ?Sized + 'static,
{
  pub fn new(transport: Arc<Tr>) -> Self {
    Self {
      core: Core {
        transport,
        cache: None,
        policy: RetryPolicy::default(),
        workspace_id: None,
        _kind: PhantomData,
      },
      tasks: Mutex::new(JoinSet::new()),
    }
  }

  /// Attach `backend`, binding it first.
  pub async fn with_cache(mut self, backend: C) -> Result<Self> {
    self.attach(backend).await?;
    Ok(self)
  }

  pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
    self.core.policy = policy;
    self
  }

  pub fn with_workspace(mut self, workspace_id: i64) -> Self {
    self.core.workspace_id = Some(workspace_id);
    self
  }

  /// Bind and attach a backend, returning the one it replaces.
  pub async fn attach(&mut self, backend: C) -> Result<Option<C>> {
    backend.bind().await?;
    Ok(self.core.cache.replace(backend))
  }

  pub fn detach(&mut self) -> Option<C> {
    self.core.cache.take()
  }

  pub fn cache(&self) -> Option<&C> {
    self.core.cache.as_ref()
  }

  fn backend(&self) -> Result<&C> {
    self.core.cache.as_ref().ok_or(Error::NoCacheAssigned)
  }

  pub async fn load_cache(&self) -> Result<Vec<T>> {
    self.backend()?.load().await
  }

  pub async fn save_cache(&self, entries: Vec<T>, method: RequestMethod) -> Result<()> {
    let backend = self.backend()?;
    if backend.expire_after().await? == Some(Duration::zero()) {
      debug!(kind = %T::kind(), "cache expires immediately, not saving");
      return Ok(());
    }
    backend.save(entries, method).await
  }

  pub async fn query(&self, queries: Vec<CacheQuery>, distinct: bool) -> Result<Vec<T>> {
    self.backend()?.query(queries, distinct).await
  }

  pub async fn expire_after(&self) -> Result<Option<Duration>> {
    self.backend()?.expire_after().await
  }

  pub async fn set_expire_after(&self, expire_after: Option<Duration>) -> Result<()> {
    self.backend()?.set_expire_after(expire_after).await
  }

  pub async fn execute(&self, request: &ApiRequest, refresh: bool) -> Result<CacheResult<Payload<T>>> {
    self.core.execute(request, refresh).await
  }

  pub async fn collect(&self, refresh: bool) -> Result<CacheResult<Vec<T>>> {
    let path = collection_path(T::kind(), self.core.workspace_id)?;
    Ok(
      self
        .core
        .execute(&ApiRequest::get(path), refresh)
        .await?
        .map(Payload::into_vec),
    )
  }

  /// A single entity. With a cache attached and no `refresh`, only the
  /// cache is consulted. A 404 yields `None`.
  pub async fn get(&self, id: i64, refresh: bool) -> Result<CacheResult<Option<T>>> {
    self.core.get(id, refresh).await
  }

  /// Delete remotely, then evict from the cache. A 404 counts as deleted.
  pub async fn delete(&self, entity: &T) -> Result<()> {
    let path = delete_path(
      T::kind(),
      workspace_of(entity, self.core.workspace_id),
      entity.id(),
    )?;
    match self.core.execute(&ApiRequest::delete(path), true).await {
      Ok(_) => {}
      Err(e) if !self.core.policy.re_raise && e.status() == Some(404) => {
        warn!(kind = %T::kind(), id = entity.id(), "entity already deleted or never existed");
      }
      Err(e) => return Err(e),
    }

    if let Some(cache) = &self.core.cache {
      cache.delete(vec![entity.clone()]).await?;
      cache.commit().await?;
    }
    Ok(())
  }

  fn tasks(&self) -> Result<MutexGuard<'_, JoinSet<()>>> {
    self
      .tasks
      .lock()
      .map_err(|e| Error::LockPoisoned(e.to_string()))
  }

  /// Start detached work owned by this coordinator.
  fn spawn_background<F>(&self, name: &'static str, work: F) -> Result<()>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let mut tasks = self.tasks()?;
    reap(&mut tasks);
    tasks.spawn(work);
    debug!(task = name, pending = tasks.len(), "spawned background task");
    Ok(())
  }

  /// Background tasks that have not finished yet.
  pub fn pending_tasks(&self) -> Result<usize> {
    let mut tasks = self.tasks()?;
    reap(&mut tasks);
    Ok(tasks.len())
  }

  /// Wait for all outstanding background work.
  pub async fn shutdown(&self) -> Result<()> {
    let mut pending = std::mem::take(&mut *self.tasks()?);
    while let Some(joined) = pending.join_next().await {
      log_join(joined);
    }
    Ok(())
  }

  /// Cancel all outstanding background work.
  pub fn abandon(&self) -> Result<()> {
    self.tasks()?.abort_all();
    Ok(())
  }
}

fn reap(tasks: &mut JoinSet<()>) {
  while let Some(joined) = tasks.try_join_next() {
    log_join(joined);
  }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
  if let Err(e) = joined {
    if !e.is_cancelled() {
      warn!(error = %e, "background task failed");
    }
  }
}

impl<C, Tr> AsyncCachedEndpoint<Tracker, C, Tr>
where
  C: AsyncCacheBackend<Tracker> + Clone + 'static,
  Tr: AsyncTransport + ?Sized + 'static,
{
  /// The running tracker, if any.
  ///
  /// With a cache and no `refresh`, the newest cached tracker without a
  /// stop time is returned. Otherwise the API is asked; when nothing is
  /// running there, every cached tracker still marked running is
  /// re-fetched in the background.
  pub async fn current_tracker(&self, refresh: bool) -> Result<CacheResult<Option<Tracker>>> {
    if !refresh {
      if let Some(cache) = &self.core.cache {
        let running = cache.query(vec![running_query()], false).await?;
        return Ok(CacheResult::from_cache(running.into_iter().last()));
      }
    }

    let result = match self
      .core
      .execute(&ApiRequest::get(CURRENT_TRACKER_PATH), true)
      .await
    {
      Ok(result) => result.map(Payload::into_one),
      Err(e) if !self.core.policy.re_raise && e.status() == Some(TRACKER_NOT_RUNNING) => {
        warn!("no tracker is currently running");
        CacheResult::from_network(None)
      }
      Err(e) => return Err(e),
    };

    if result.data.is_none() && self.core.cache.is_some() {
      self.spawn_background("reconcile_running", reconcile_running(self.core.clone()))?;
    }
    Ok(result)
  }
}

fn running_query() -> CacheQuery {
  CacheQuery::eq("stop", Value::Null)
}

/// Re-fetch every cached tracker that still looks like it is running.
async fn reconcile_running<C, Tr>(core: Core<Tracker, C, Tr>)
where
  C: AsyncCacheBackend<Tracker> + Clone + 'static,
  Tr: AsyncTransport + ?Sized + 'static,
{
  let Some(cache) = &core.cache else {
    return;
  };
  let running = match cache.query(vec![running_query()], false).await {
    Ok(running) => running,
    Err(e) => {
      warn!(error = %e, "could not list cached running trackers");
      return;
    }
  };
  if running.is_empty() {
    return;
  }

  info!(count = running.len(), "refreshing stale running trackers");
  let refreshed = futures::future::join_all(running.iter().map(|t| core.get(t.id, true))).await;
  for (tracker, outcome) in running.iter().zip(refreshed) {
    if let Err(e) = outcome {
      warn!(tracker = tracker.id, error = %e, "failed to refresh running tracker");
    }
  }
}
