//! Cache-aside client for the Toggl Track API.
//!
//! Entities fetched through a coordinator ([`CachedEndpoint`] or
//! [`AsyncCachedEndpoint`]) are written back to an attached backend, a JSON
//! file store ([`JsonCache`]) or a SQLite database ([`SqliteCache`]).
//! Later calls are answered from that backend until the caller asks for a
//! refresh, and the backend can be queried locally with [`CacheQuery`].

pub mod cache;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod models;

pub use cache::{
  AsyncCache, AsyncCacheBackend, CacheBackend, CacheQuery, CacheResult, CacheSource, Cacheable,
  Comparison, EntityKind, JsonCache, SqliteCache, Value,
};
pub use endpoint::{AsyncCachedEndpoint, CachedEndpoint, Payload, RetryPolicy};
pub use error::{Error, Result};
pub use http::{ApiRequest, Credentials, RawResponse, RequestMethod};
