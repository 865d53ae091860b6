//! Async adapter over the blocking backends.
//!
//! Every operation runs on tokio's blocking pool so file and SQLite I/O
//! never stalls a runtime worker.

use async_trait::async_trait;
use chrono::Duration;
use std::sync::{Arc, Mutex};

use super::backend::CacheBackend;
use super::query::CacheQuery;
use super::traits::Cacheable;
use crate::error::{Error, Result};
use crate::http::RequestMethod;

/// Async counterpart of [`CacheBackend`]. Methods take `&self` so a backend
/// can be shared with background tasks.
#[async_trait]
pub trait AsyncCacheBackend<T: Cacheable>: Send + Sync {
  async fn bind(&self) -> Result<()>;

  async fn is_bound(&self) -> Result<bool>;

  async fn expire_after(&self) -> Result<Option<Duration>>;

  async fn set_expire_after(&self, expire_after: Option<Duration>) -> Result<()>;

  async fn load(&self) -> Result<Vec<T>>;

  async fn find(&self, id: i64) -> Result<Option<T>>;

  async fn add(&self, entries: Vec<T>) -> Result<()>;

  async fn update(&self, entries: Vec<T>) -> Result<()>;

  async fn delete(&self, entries: Vec<T>) -> Result<()>;

  async fn query(&self, queries: Vec<CacheQuery>, distinct: bool) -> Result<Vec<T>>;

  async fn commit(&self) -> Result<()>;

  async fn save(&self, entries: Vec<T>, method: RequestMethod) -> Result<()>;
}

/// Lets a runtime-selected backend (`Arc<dyn AsyncCacheBackend<T>>`) be
/// attached like a concrete one.
#[async_trait]
impl<T, C> AsyncCacheBackend<T> for Arc<C>
where
  T: Cacheable,
  C: AsyncCacheBackend<T> + ?Sized,
{
  async fn bind(&self) -> Result<()> {
    (**self).bind().await
  }

  async fn is_bound(&self) -> Result<bool> {
    (**self).is_bound().await
  }

  async fn expire_after(&self) -> Result<Option<Duration>> {
    (**self).expire_after().await
  }

  async fn set_expire_after(&self, expire_after: Option<Duration>) -> Result<()> {
    (**self).set_expire_after(expire_after).await
  }

  async fn load(&self) -> Result<Vec<T>> {
    (**self).load().await
  }

  async fn find(&self, id: i64) -> Result<Option<T>> {
    (**self).find(id).await
  }

  async fn add(&self, entries: Vec<T>) -> Result<()> {
    (**self).add(entries).await
  }

  async fn update(&self, entries: Vec<T>) -> Result<()> {
    (**self).update(entries).await
  }

  async fn delete(&self, entries: Vec<T>) -> Result<()> {
    (**self).delete(entries).await
  }

  async fn query(&self, queries: Vec<CacheQuery>, distinct: bool) -> Result<Vec<T>> {
    (**self).query(queries, distinct).await
  }

  async fn commit(&self) -> Result<()> {
    (**self).commit().await
  }

  async fn save(&self, entries: Vec<T>, method: RequestMethod) -> Result<()> {
    (**self).save(entries, method).await
  }
}

/// Shares a blocking backend behind a mutex and runs it off the runtime.
#[derive(Debug)]
pub struct AsyncCache<B> {
  inner: Arc<Mutex<B>>,
}

impl<B> Clone for AsyncCache<B> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<B: Send + 'static> AsyncCache<B> {
  pub fn new(backend: B) -> Self {
    Self {
      inner: Arc::new(Mutex::new(backend)),
    }
  }

  /// Run `f` against the backend on the blocking pool.
  pub async fn run<R, F>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&mut B) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let inner = Arc::clone(&self.inner);
    tokio::task::spawn_blocking(move || {
      let mut backend = inner
        .lock()
        .map_err(|e| Error::LockPoisoned(e.to_string()))?;
      f(&mut backend)
    })
    .await?
  }
}

#[async_trait]
impl<T, B> AsyncCacheBackend<T> for AsyncCache<B>
where
  T: Cacheable,
  B: CacheBackend<T> + 'static,
{
  async fn bind(&self) -> Result<()> {
    self.run(|b| b.bind()).await
  }

  async fn is_bound(&self) -> Result<bool> {
    self.run(|b| Ok(b.is_bound())).await
  }

  async fn expire_after(&self) -> Result<Option<Duration>> {
    self.run(|b| Ok(b.expire_after())).await
  }

  async fn set_expire_after(&self, expire_after: Option<Duration>) -> Result<()> {
    self
      .run(move |b| {
        b.set_expire_after(expire_after);
        Ok(())
      })
      .await
  }

  async fn load(&self) -> Result<Vec<T>> {
    self.run(|b| b.load()).await
  }

  async fn find(&self, id: i64) -> Result<Option<T>> {
    self.run(move |b| b.find(id)).await
  }

  async fn add(&self, entries: Vec<T>) -> Result<()> {
    self.run(move |b| b.add(&entries)).await
  }

  async fn update(&self, entries: Vec<T>) -> Result<()> {
    self.run(move |b| b.update(&entries)).await
  }

  async fn delete(&self, entries: Vec<T>) -> Result<()> {
    self.run(move |b| b.delete(&entries)).await
  }

  async fn query(&self, queries: Vec<CacheQuery>, distinct: bool) -> Result<Vec<T>> {
    self.run(move |b| b.query(&queries, distinct)).await
  }

  async fn commit(&self) -> Result<()> {
    self.run(|b| b.commit()).await
  }

  async fn save(&self, entries: Vec<T>, method: RequestMethod) -> Result<()> {
    self.run(move |b| b.save(&entries, method)).await
  }
}
