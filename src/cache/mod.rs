//! Local persistence for Toggl entities.
//!
//! This module provides the storage side of the cache-aside scheme:
//! - [`Cacheable`] entities with an id, a name and a modification timestamp
//! - A backend-neutral query model ([`CacheQuery`], [`Comparison`])
//! - A JSON file store that merges concurrent external writes by mtime
//! - A SQLite store that translates queries into SQL
//! - [`AsyncCache`], which runs either store on the blocking pool

mod async_cache;
mod backend;
mod json;
pub mod query;
mod sqlite;
mod traits;

pub use async_cache::{AsyncCache, AsyncCacheBackend};
pub use backend::{CacheBackend, WriteOp};
pub use json::{JsonCache, DEFAULT_MAX_LENGTH, FORMAT_VERSION};
pub use query::{matches, query_all, CacheQuery, Comparison, Value};
pub use sqlite::{Column, ColumnKind, SqlRecord, SqliteCache, DATABASE_FILE};
pub use traits::{CacheResult, CacheSource, Cacheable, EntityKind, CLASS_TAG};
