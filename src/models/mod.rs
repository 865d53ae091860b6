//! Domain types cached from the Toggl API.
//!
//! References to other entities are stored as ids, except a tracker's
//! tags which are kept as full [`Tag`] values. Equality ignores the
//! modification timestamp.

pub mod api_types;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{Cacheable, EntityKind, Value};

use self::api_types::{ApiClient, ApiOrganization, ApiProject, ApiTag, ApiTracker, ApiWorkspace};

pub const DEFAULT_PROJECT_COLOR: &str = "#0b83d9";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
  pub id: i64,
  pub name: String,
  #[serde(default = "Utc::now")]
  pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
  pub id: i64,
  pub name: String,
  #[serde(default = "Utc::now")]
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub organization: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
  pub id: i64,
  pub name: String,
  #[serde(default = "Utc::now")]
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub workspace: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
  pub id: i64,
  pub name: String,
  #[serde(default = "Utc::now")]
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub workspace: i64,
  pub color: String,
  pub client: Option<i64>,
  pub active: bool,
  pub start_date: NaiveDate,
  pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
  pub id: i64,
  pub name: String,
  #[serde(default = "Utc::now")]
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub workspace: i64,
}

/// A time entry. `name` holds the entry description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tracker {
  pub id: i64,
  pub name: String,
  #[serde(default = "Utc::now")]
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub workspace: i64,
  pub start: DateTime<Utc>,
  #[serde(default, with = "duration_secs")]
  pub duration: Option<Duration>,
  pub stop: Option<DateTime<Utc>>,
  pub project: Option<i64>,
  #[serde(default, with = "tagged_tags")]
  pub tags: Vec<Tag>,
}

impl Organization {
  pub fn new(id: i64, name: impl Into<String>) -> Self {
    Self {
      id,
      name: name.into(),
      timestamp: Utc::now(),
    }
  }
}

impl Workspace {
  pub fn new(id: i64, name: impl Into<String>, organization: i64) -> Self {
    Self {
      id,
      name: name.into(),
      timestamp: Utc::now(),
      organization,
    }
  }
}

impl Client {
  pub fn new(id: i64, name: impl Into<String>, workspace: i64) -> Self {
    Self {
      id,
      name: name.into(),
      timestamp: Utc::now(),
      workspace,
    }
  }
}

impl Project {
  pub fn new(id: i64, name: impl Into<String>, workspace: i64) -> Self {
    Self {
      id,
      name: name.into(),
      timestamp: Utc::now(),
      workspace,
      color: DEFAULT_PROJECT_COLOR.to_string(),
      client: None,
      active: true,
      start_date: Utc::now().date_naive(),
      end_date: None,
    }
  }
}

impl Tag {
  pub fn new(id: i64, name: impl Into<String>, workspace: i64) -> Self {
    Self {
      id,
      name: name.into(),
      timestamp: Utc::now(),
      workspace,
    }
  }
}

impl Tracker {
  pub fn new(id: i64, name: impl Into<String>, workspace: i64, start: DateTime<Utc>) -> Self {
    Self {
      id,
      name: name.into(),
      timestamp: Utc::now(),
      workspace,
      start,
      duration: None,
      stop: None,
      project: None,
      tags: Vec::new(),
    }
  }

  pub fn description(&self) -> &str {
    &self.name
  }

  pub fn running(&self) -> bool {
    self.stop.is_none()
  }

  /// Duration that keeps growing while the tracker is running.
  pub fn running_duration(&self) -> Duration {
    self.duration.unwrap_or_else(|| Utc::now() - self.start)
  }

  pub fn tag_ids(&self) -> Vec<i64> {
    self.tags.iter().map(|t| t.id).collect()
  }
}

impl PartialEq for Organization {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id && self.name == other.name
  }
}

impl PartialEq for Workspace {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id && self.name == other.name && self.organization == other.organization
  }
}

impl PartialEq for Client {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id && self.name == other.name && self.workspace == other.workspace
  }
}

impl PartialEq for Project {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
      && self.name == other.name
      && self.workspace == other.workspace
      && self.color == other.color
      && self.client == other.client
      && self.active == other.active
      && self.start_date == other.start_date
      && self.end_date == other.end_date
  }
}

impl PartialEq for Tag {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id && self.name == other.name && self.workspace == other.workspace
  }
}

impl PartialEq for Tracker {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
      && self.name == other.name
      && self.workspace == other.workspace
      && self.start == other.start
      && self.duration == other.duration
      && self.stop == other.stop
      && self.project == other.project
      && self.tags == other.tags
  }
}

/// Implements [`Cacheable`] for an entity with `id`, `name` and `timestamp`
/// fields. The arms list the queryable keys besides `id` and `timestamp`.
macro_rules! cacheable {
  ($entity:ident, $api:ident, |$this:ident| { $($arms:tt)* }) => {
    impl Cacheable for $entity {
      type Api = $api;

      fn kind() -> EntityKind {
        EntityKind::$entity
      }

      fn id(&self) -> i64 {
        self.id
      }

      fn name(&self) -> &str {
        &self.name
      }

      fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
      }

      fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamp = timestamp;
      }

      fn field(&self, key: &str) -> Option<Value> {
        let $this = self;
        match key {
          "id" => Some($this.id.into()),
          "timestamp" => Some($this.timestamp.into()),
          $($arms)*
          _ => None,
        }
      }
    }
  };
}

cacheable!(Organization, ApiOrganization, |org| {
  "name" => Some(org.name.clone().into()),
});

cacheable!(Workspace, ApiWorkspace, |ws| {
  "name" => Some(ws.name.clone().into()),
  "organization" => Some(ws.organization.into()),
});

cacheable!(Client, ApiClient, |client| {
  "name" => Some(client.name.clone().into()),
  "workspace" => Some(client.workspace.into()),
});

cacheable!(Project, ApiProject, |project| {
  "name" => Some(project.name.clone().into()),
  "workspace" => Some(project.workspace.into()),
  "color" => Some(project.color.clone().into()),
  "client" => Some(project.client.into()),
  "active" => Some(project.active.into()),
  "start_date" => Some(project.start_date.into()),
  "end_date" => Some(project.end_date.into()),
});

cacheable!(Tag, ApiTag, |tag| {
  "name" => Some(tag.name.clone().into()),
  "workspace" => Some(tag.workspace.into()),
});

cacheable!(Tracker, ApiTracker, |tracker| {
  "name" | "description" => Some(tracker.name.clone().into()),
  "workspace" => Some(tracker.workspace.into()),
  "start" => Some(tracker.start.into()),
  "duration" => Some(tracker.duration.into()),
  "stop" => Some(tracker.stop.into()),
  "project" => Some(tracker.project.into()),
  "tags" => Some(tracker.tag_ids().into()),
});

/// Optional durations stored as whole seconds.
mod duration_secs {
  use chrono::Duration;
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
      Some(d) => serializer.serialize_some(&d.num_seconds()),
      None => serializer.serialize_none(),
    }
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    let secs: Option<f64> = Option::deserialize(deserializer)?;
    Ok(secs.map(|s| Duration::seconds(s as i64)))
  }
}

/// Tracker tags are written as independently tagged tag records.
mod tagged_tags {
  use serde::de::Error as _;
  use serde::ser::{Error as _, SerializeSeq};
  use serde::{Deserialize, Deserializer, Serializer};
  use serde_json::Value as Json;

  use super::Tag;
  use crate::cache::Cacheable;

  pub fn serialize<S: Serializer>(tags: &[Tag], serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(tags.len()))?;
    for tag in tags {
      let record = tag.to_record().map_err(S::Error::custom)?;
      seq.serialize_element(&record)?;
    }
    seq.end()
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Tag>, D::Error> {
    let records: Vec<Json> = Vec::deserialize(deserializer)?;
    records
      .into_iter()
      .map(|record| serde_json::from_value(record).map_err(D::Error::custom))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_equality_ignores_timestamp() {
    let a = Client::new(1, "Acme", 5);
    let mut b = a.clone();
    b.timestamp = Utc::now() - Duration::days(3);
    assert_eq!(a, b);

    b.name = "Other".into();
    assert_ne!(a, b);
  }

  #[test]
  fn test_tracker_record_tags_nested_tags() {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    let mut tracker = Tracker::new(3, "Writing", 5, start);
    tracker.duration = Some(Duration::minutes(90));
    tracker.stop = Some(start + Duration::minutes(90));
    tracker.tags = vec![Tag::new(11, "focus", 5)];

    let record = tracker.to_record().unwrap();
    assert_eq!(record["class"], "tracker");
    assert_eq!(record["duration"], 5400);
    assert_eq!(record["tags"][0]["class"], "tag");
    assert_eq!(record["tags"][0]["id"], 11);

    let decoded = Tracker::from_record(record).unwrap().unwrap();
    assert_eq!(decoded, tracker);
  }

  #[test]
  fn test_from_record_skips_other_classes() {
    let record = Tag::new(1, "x", 1).to_record().unwrap();
    assert!(Client::from_record(record).is_none());
  }

  #[test]
  fn test_running_duration() {
    let mut tracker = Tracker::new(1, "t", 1, Utc::now() - Duration::minutes(10));
    assert!(tracker.running());
    assert!(tracker.running_duration() >= Duration::minutes(10));

    tracker.duration = Some(Duration::minutes(3));
    assert_eq!(tracker.running_duration(), Duration::minutes(3));
  }

  #[test]
  fn test_tracker_fields() {
    let mut tracker = Tracker::new(1, "t", 1, Utc::now());
    tracker.tags = vec![Tag::new(4, "a", 1), Tag::new(5, "b", 1)];
    assert_eq!(
      tracker.field("tags"),
      Some(Value::List(vec![Value::Int(4), Value::Int(5)]))
    );
    assert_eq!(tracker.field("stop"), Some(Value::Null));
    assert_eq!(tracker.field("description"), Some(Value::Text("t".into())));
    assert_eq!(tracker.field("missing"), None);
  }

  #[test]
  fn test_shared_fields_for_every_kind() {
    let project = Project::new(2, "Site", 9);
    assert_eq!(Project::kind(), EntityKind::Project);
    assert_eq!(project.field("id"), Some(Value::Int(2)));
    assert_eq!(project.field("name"), Some(Value::Text("Site".into())));
    assert_eq!(project.field("client"), Some(Value::Null));
    assert_eq!(project.field("workspace"), Some(Value::Int(9)));

    let mut org = Organization::new(3, "Acme");
    let stamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    org.set_timestamp(stamp);
    assert_eq!(org.timestamp(), stamp);
    assert_eq!(org.field("timestamp"), Some(Value::DateTime(stamp)));
    assert_eq!(org.field("workspace"), None);
    assert_eq!(Workspace::new(1, "w", 3).field("organization"), Some(Value::Int(3)));
  }
}
