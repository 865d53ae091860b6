//! File-backed cache: one JSON document per entity type.
//!
//! The store keeps an in-memory session and re-syncs it against the file
//! whenever the file's mtime moves past the last one seen. There is no file
//! locking: two processes committing at nearly the same instant race and
//! the later commit wins.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use super::backend::CacheBackend;
use super::query::{is_expired, query_all, CacheQuery};
use super::traits::Cacheable;
use crate::error::{Error, Result};

/// Default cap on the number of retained entries.
pub const DEFAULT_MAX_LENGTH: usize = 10_000;

/// Format version written into every cache file.
pub const FORMAT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize)]
struct CacheFileOut<'a> {
  version: &'a str,
  data: Vec<Json>,
}

#[derive(Deserialize)]
struct CacheFileIn {
  version: String,
  #[serde(default)]
  data: Vec<Json>,
}

/// In-memory snapshot of a cache file.
#[derive(Debug)]
struct JsonSession<T> {
  version: String,
  data: Vec<T>,
  /// mtime of the file when it was last read or written
  modified: Option<SystemTime>,
  max_length: usize,
}

impl<T: Cacheable> JsonSession<T> {
  fn new(max_length: usize) -> Self {
    Self {
      version: FORMAT_VERSION.to_string(),
      data: Vec::new(),
      modified: None,
      max_length,
    }
  }

  /// Reload and merge if the file changed since it was last seen.
  fn refresh(&mut self, path: &Path) -> Result<bool> {
    let Some(mtime) = file_mtime(path)? else {
      return Ok(false);
    };
    if self.modified.is_some_and(|seen| mtime <= seen) {
      return Ok(false);
    }

    let on_disk = self.read(path)?;
    let first_load = self.modified.is_none();
    self.data = merge(std::mem::take(&mut self.data), on_disk, DateTime::<Utc>::from(mtime));
    self.modified = Some(mtime);

    if !first_load {
      info!(path = %path.display(), entries = self.data.len(), "merged external cache changes");
    }
    Ok(true)
  }

  /// Decode the file; a corrupt document counts as an empty store.
  fn read(&mut self, path: &Path) -> Result<Vec<T>> {
    let bytes = match fs::read(path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };

    let file: CacheFileIn = match serde_json::from_slice(&bytes) {
      Ok(file) => file,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "corrupt cache file, treating as empty");
        return Ok(Vec::new());
      }
    };
    self.version = file.version;

    let mut entries = Vec::with_capacity(file.data.len());
    for record in file.data {
      match T::from_record(record) {
        Some(Ok(entry)) => entries.push(entry),
        Some(Err(e)) => warn!(kind = %T::kind(), error = %e, "skipping undecodable cache record"),
        None => warn!(kind = %T::kind(), "skipping cache record of another class"),
      }
    }
    Ok(entries)
  }

  /// Order by timestamp and drop the oldest entries beyond the cap.
  fn process(&mut self) {
    self.data.sort_by_key(|entry| entry.timestamp());
    if self.data.len() > self.max_length {
      let excess = self.data.len() - self.max_length;
      self.data.drain(..excess);
    }
  }

  fn commit(&mut self, path: &Path, expire_after: Option<Duration>) -> Result<()> {
    self.refresh(path)?;

    let now = Utc::now();
    self.data.retain(|entry| !is_expired(entry.timestamp(), expire_after, now));
    self.process();
    self.version = FORMAT_VERSION.to_string();

    let data = self
      .data
      .iter()
      .map(Cacheable::to_record)
      .collect::<Result<Vec<_>>>()?;
    let body = serde_json::to_vec(&CacheFileOut {
      version: &self.version,
      data,
    })?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;

    self.modified = file_mtime(path)?;
    debug!(path = %path.display(), entries = self.data.len(), "committed cache to disk");
    Ok(())
  }
}

/// Merge the in-memory set with a newer on-disk set.
///
/// For ids present on both sides the newer timestamp wins. An id only held
/// in memory survives when it is at least as recent as the file, otherwise
/// it was deleted externally.
fn merge<T: Cacheable>(in_memory: Vec<T>, on_disk: Vec<T>, mtime: DateTime<Utc>) -> Vec<T> {
  let mut ids: BTreeSet<i64> = in_memory.iter().map(Cacheable::id).collect();
  ids.extend(on_disk.iter().map(Cacheable::id));

  let mut old: HashMap<i64, T> = in_memory.into_iter().map(|e| (e.id(), e)).collect();
  let mut new: HashMap<i64, T> = on_disk.into_iter().map(|e| (e.id(), e)).collect();

  ids
    .into_iter()
    .filter_map(|id| match (old.remove(&id), new.remove(&id)) {
      (None, Some(disk)) => Some(disk),
      (Some(mem), Some(disk)) => {
        if mem.timestamp() > disk.timestamp() {
          Some(mem)
        } else {
          Some(disk)
        }
      }
      (Some(mem), None) if mem.timestamp() >= mtime => Some(mem),
      _ => None,
    })
    .collect()
}

fn file_mtime(path: &Path) -> Result<Option<SystemTime>> {
  match fs::metadata(path) {
    Ok(meta) => Ok(Some(meta.modified()?)),
    Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
    Err(e) => Err(e.into()),
  }
}

/// JSON file cache for a single entity type.
///
/// The file is `cache_<table>.json` inside the configured directory.
#[derive(Debug)]
pub struct JsonCache<T> {
  directory: PathBuf,
  path: Option<PathBuf>,
  expire_after: Option<Duration>,
  session: JsonSession<T>,
}

impl<T: Cacheable> JsonCache<T> {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      path: None,
      expire_after: None,
      session: JsonSession::new(DEFAULT_MAX_LENGTH),
    }
  }

  pub fn with_expire_after(mut self, expire_after: Option<Duration>) -> Self {
    self.expire_after = expire_after;
    self
  }

  pub fn with_max_length(mut self, max_length: usize) -> Self {
    self.session.max_length = max_length;
    self
  }

  /// Location of the cache file once bound.
  pub fn path(&self) -> Result<&Path> {
    self.path.as_deref().ok_or(Error::MissingParent { kind: T::kind() })
  }

  /// Format version of the last document read or written.
  pub fn version(&self) -> &str {
    &self.session.version
  }

  /// Re-sync with the file if another writer touched it.
  pub fn refresh(&mut self) -> Result<bool> {
    let path = self.path()?.to_path_buf();
    self.session.refresh(&path)
  }

  fn upsert(&mut self, entries: &[T]) -> Result<()> {
    self.refresh()?;
    let now = Utc::now();
    for entry in entries {
      match self.session.data.iter().position(|e| e.id() == entry.id()) {
        Some(index) => {
          let mut replacement = entry.clone();
          replacement.set_timestamp(now);
          self.session.data[index] = replacement;
        }
        None => self.session.data.push(entry.clone()),
      }
    }
    self.commit()
  }
}

impl<T: Cacheable> CacheBackend<T> for JsonCache<T> {
  fn bind(&mut self) -> Result<()> {
    if self.path.is_some() {
      return Ok(());
    }
    fs::create_dir_all(&self.directory)?;
    let path = self
      .directory
      .join(format!("cache_{}.json", T::kind().table()));
    self.session.refresh(&path)?;
    self.path = Some(path);
    Ok(())
  }

  fn is_bound(&self) -> bool {
    self.path.is_some()
  }

  fn expire_after(&self) -> Option<Duration> {
    self.expire_after
  }

  fn set_expire_after(&mut self, expire_after: Option<Duration>) {
    self.expire_after = expire_after;
  }

  fn load(&mut self) -> Result<Vec<T>> {
    self.refresh()?;
    self.session.process();
    let now = Utc::now();
    Ok(
      self
        .session
        .data
        .iter()
        .filter(|e| !is_expired(e.timestamp(), self.expire_after, now))
        .cloned()
        .collect(),
    )
  }

  fn find(&mut self, id: i64) -> Result<Option<T>> {
    self.refresh()?;
    let now = Utc::now();
    Ok(
      self
        .session
        .data
        .iter()
        .find(|e| e.id() == id && !is_expired(e.timestamp(), self.expire_after, now))
        .cloned(),
    )
  }

  fn add(&mut self, entries: &[T]) -> Result<()> {
    self.upsert(entries)
  }

  fn update(&mut self, entries: &[T]) -> Result<()> {
    self.upsert(entries)
  }

  /// Removes entries from the session only; call `commit` to persist.
  fn delete(&mut self, entries: &[T]) -> Result<()> {
    self.refresh()?;
    let ids: BTreeSet<i64> = entries.iter().map(Cacheable::id).collect();
    self.session.data.retain(|e| !ids.contains(&e.id()));
    Ok(())
  }

  fn query(&mut self, queries: &[CacheQuery], distinct: bool) -> Result<Vec<T>> {
    debug!(kind = %T::kind(), queries = queries.len(), distinct, "querying json cache");
    self.refresh()?;
    query_all(self.session.data.iter().cloned(), queries, distinct, self.expire_after)
  }

  fn commit(&mut self) -> Result<()> {
    let path = self.path()?.to_path_buf();
    self.session.commit(&path, self.expire_after)
  }
}
