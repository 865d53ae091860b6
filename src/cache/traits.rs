//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as Json;
use std::fmt;
use std::str::FromStr;

use super::query::Value;
use crate::error::{Error, Result};

/// Key of the discriminator tag carried by every serialized record.
pub const CLASS_TAG: &str = "class";

/// Entity types known to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
  Organization,
  Workspace,
  Client,
  Project,
  Tag,
  Tracker,
}

impl EntityKind {
  pub const ALL: [EntityKind; 6] = [
    EntityKind::Organization,
    EntityKind::Workspace,
    EntityKind::Client,
    EntityKind::Project,
    EntityKind::Tag,
    EntityKind::Tracker,
  ];

  /// Table name, also used as the `class` tag and in file names.
  pub fn table(self) -> &'static str {
    match self {
      EntityKind::Organization => "organization",
      EntityKind::Workspace => "workspace",
      EntityKind::Client => "client",
      EntityKind::Project => "project",
      EntityKind::Tag => "tag",
      EntityKind::Tracker => "tracker",
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.table())
  }
}

impl FromStr for EntityKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let normalized = s.trim().to_lowercase();
    let singular = normalized.strip_suffix('s').unwrap_or(&normalized);
    match singular {
      "organization" | "org" => Ok(EntityKind::Organization),
      "workspace" => Ok(EntityKind::Workspace),
      "client" => Ok(EntityKind::Client),
      "project" => Ok(EntityKind::Project),
      "tag" => Ok(EntityKind::Tag),
      "tracker" | "time_entrie" | "time_entry" => Ok(EntityKind::Tracker),
      _ => Err(Error::NotImplemented(format!("entity type '{}'", s))),
    }
  }
}

/// Trait for entities that can be cached.
///
/// Every entity has an integer id unique within its kind, a name and a
/// UTC modification timestamp used for ordering, merging and expiry.
pub trait Cacheable:
  Clone + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
  /// Wire representation returned by the remote API.
  type Api: DeserializeOwned + Into<Self>;

  /// Entity type used for storage organization.
  fn kind() -> EntityKind;

  fn id(&self) -> i64;

  fn name(&self) -> &str;

  /// Last modification instant.
  fn timestamp(&self) -> DateTime<Utc>;

  fn set_timestamp(&mut self, timestamp: DateTime<Utc>);

  /// Value of a queryable field, `None` if the key is unknown.
  fn field(&self, key: &str) -> Option<Value>;

  /// Decode an API payload object.
  fn from_api(payload: Json) -> Result<Self> {
    let api: Self::Api = serde_json::from_value(payload)?;
    Ok(api.into())
  }

  /// Serialize into a record tagged with its class.
  fn to_record(&self) -> Result<Json> {
    let mut record = serde_json::to_value(self)?;
    if let Json::Object(map) = &mut record {
      map.insert(
        CLASS_TAG.to_string(),
        Json::String(Self::kind().table().to_string()),
      );
    }
    Ok(record)
  }

  /// Decode a tagged record. Returns `None` when the record belongs to a
  /// different class.
  fn from_record(record: Json) -> Option<Result<Self>> {
    let class = record.get(CLASS_TAG).and_then(Json::as_str)?;
    if class != Self::kind().table() {
      return None;
    }
    Some(serde_json::from_value(record).map_err(Error::from))
  }
}

/// Result from a coordinated call, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the network
  Network,
  /// Served from the attached backend without a network call
  Cache,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_parses_plural_and_aliases() {
    assert_eq!("Projects".parse::<EntityKind>().unwrap(), EntityKind::Project);
    assert_eq!("time_entries".parse::<EntityKind>().unwrap(), EntityKind::Tracker);
    assert_eq!("org".parse::<EntityKind>().unwrap(), EntityKind::Organization);
    assert!(matches!(
      "invoice".parse::<EntityKind>(),
      Err(Error::NotImplemented(_))
    ));
  }
}
