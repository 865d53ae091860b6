//! Serde-deserializable types matching Toggl API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on what the cache stores.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;

use super::{Client, Organization, Project, Tag, Tracker, Workspace, DEFAULT_PROJECT_COLOR};

#[derive(Debug, Deserialize)]
pub struct ApiOrganization {
  pub id: i64,
  pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiWorkspace {
  pub id: i64,
  pub name: String,
  pub organization_id: Option<i64>,
  pub organization: Option<i64>,
}

/// Workspace reference as sent by the API: long, short and bare names may
/// all be present at once.
#[derive(Debug, Default, Deserialize)]
pub struct WorkspaceRef {
  pub workspace_id: Option<i64>,
  pub wid: Option<i64>,
  pub workspace: Option<i64>,
}

impl WorkspaceRef {
  /// `workspace_id` wins over `wid`, which wins over `workspace`.
  pub fn resolve(&self) -> i64 {
    self
      .workspace_id
      .or(self.wid)
      .or(self.workspace)
      .unwrap_or_default()
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiClient {
  pub id: i64,
  pub name: String,
  #[serde(flatten)]
  pub workspace: WorkspaceRef,
}

#[derive(Debug, Deserialize)]
pub struct ApiProject {
  pub id: i64,
  pub name: String,
  #[serde(flatten)]
  pub workspace: WorkspaceRef,
  pub color: Option<String>,
  pub client_id: Option<i64>,
  pub cid: Option<i64>,
  pub client: Option<i64>,
  #[serde(default = "default_true")]
  pub active: bool,
  pub start_date: Option<NaiveDate>,
  pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ApiTag {
  pub id: i64,
  pub name: String,
  #[serde(flatten)]
  pub workspace: WorkspaceRef,
}

/// Tags arrive either as plain names (paired with `tag_ids`) or as objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiTagRef {
  Object(ApiTag),
  Name(String),
}

#[derive(Debug, Deserialize)]
pub struct ApiTracker {
  pub id: i64,
  pub description: Option<String>,
  pub name: Option<String>,
  #[serde(flatten)]
  pub workspace: WorkspaceRef,
  pub start: Option<DateTime<Utc>>,
  pub stop: Option<DateTime<Utc>>,
  /// Negative while the entry is running.
  pub duration: Option<i64>,
  pub project_id: Option<i64>,
  pub pid: Option<i64>,
  pub project: Option<i64>,
  #[serde(default)]
  pub tags: Option<Vec<ApiTagRef>>,
  #[serde(default)]
  pub tag_ids: Option<Vec<i64>>,
}

fn default_true() -> bool {
  true
}

impl From<ApiOrganization> for Organization {
  fn from(api: ApiOrganization) -> Self {
    Organization::new(api.id, api.name)
  }
}

impl From<ApiWorkspace> for Workspace {
  fn from(api: ApiWorkspace) -> Self {
    Workspace::new(
      api.id,
      api.name,
      api.organization_id.or(api.organization).unwrap_or_default(),
    )
  }
}

impl From<ApiClient> for Client {
  fn from(api: ApiClient) -> Self {
    Client::new(api.id, api.name, api.workspace.resolve())
  }
}

impl From<ApiTag> for Tag {
  fn from(api: ApiTag) -> Self {
    Tag::new(api.id, api.name, api.workspace.resolve())
  }
}

impl From<ApiProject> for Project {
  fn from(api: ApiProject) -> Self {
    let mut project = Project::new(api.id, api.name, api.workspace.resolve());
    project.color = api
      .color
      .unwrap_or_else(|| DEFAULT_PROJECT_COLOR.to_string());
    project.client = api.client_id.or(api.cid).or(api.client);
    project.active = api.active;
    if let Some(start) = api.start_date {
      project.start_date = start;
    }
    project.end_date = api.end_date;
    project
  }
}

impl From<ApiTracker> for Tracker {
  fn from(api: ApiTracker) -> Self {
    let workspace = api.workspace.resolve();
    let tags = normalize_tags(api.tags.unwrap_or_default(), api.tag_ids.unwrap_or_default(), workspace);

    let mut tracker = Tracker::new(
      api.id,
      api.description.or(api.name).unwrap_or_default(),
      workspace,
      api.start.unwrap_or_else(Utc::now),
    );
    tracker.stop = api.stop;
    tracker.duration = api
      .duration
      .filter(|secs| *secs >= 0)
      .map(Duration::seconds);
    tracker.project = api.project_id.or(api.pid).or(api.project);
    tracker.tags = tags;
    tracker
  }
}

/// Nested tag objects are used as-is; plain names are paired with `tag_ids`.
fn normalize_tags(tags: Vec<ApiTagRef>, tag_ids: Vec<i64>, workspace: i64) -> Vec<Tag> {
  let mut ids = tag_ids.into_iter();
  tags
    .into_iter()
    .filter_map(|tag| match tag {
      ApiTagRef::Object(api) => Some(Tag::from(api)),
      ApiTagRef::Name(name) => ids.next().map(|id| Tag::new(id, name, workspace)),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Cacheable;
  use serde_json::json;

  #[test]
  fn test_tracker_tags_zip_ids_and_names() {
    let tracker = Tracker::from_api(json!({
      "id": 1,
      "description": "Review",
      "workspace_id": 9,
      "start": "2024-05-01T09:00:00+00:00",
      "stop": null,
      "duration": -1714554000,
      "project_id": 4,
      "tags": ["focus", "deep"],
      "tag_ids": [21, 22]
    }))
    .unwrap();

    assert_eq!(tracker.name, "Review");
    assert!(tracker.running());
    assert_eq!(tracker.duration, None);
    assert_eq!(tracker.project, Some(4));
    assert_eq!(tracker.tag_ids(), vec![21, 22]);
    assert_eq!(tracker.tags[1].name, "deep");
    assert_eq!(tracker.tags[1].workspace, 9);
  }

  #[test]
  fn test_tracker_nested_tag_objects() {
    let tracker = Tracker::from_api(json!({
      "id": 2,
      "description": null,
      "wid": 3,
      "start": "2024-05-01T09:00:00Z",
      "stop": "2024-05-01T10:00:00Z",
      "duration": 3600,
      "tags": [{"id": 5, "name": "x", "workspace_id": 3}]
    }))
    .unwrap();

    assert_eq!(tracker.workspace, 3);
    assert_eq!(tracker.duration, Some(Duration::hours(1)));
    assert_eq!(tracker.tags, vec![Tag::new(5, "x", 3)]);
  }

  #[test]
  fn test_project_defaults() {
    let project = Project::from_api(json!({
      "id": 8,
      "name": "Site",
      "workspace_id": 1,
      "client_id": 12,
      "active": false,
      "start_date": "2024-01-15"
    }))
    .unwrap();

    assert_eq!(project.client, Some(12));
    assert!(!project.active);
    assert_eq!(project.color, DEFAULT_PROJECT_COLOR);
    assert_eq!(project.start_date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
  }

  #[test]
  fn test_long_workspace_name_wins_over_short() {
    let tag = Tag::from_api(json!({"id": 1, "name": "a", "workspace_id": 25, "wid": 1})).unwrap();
    assert_eq!(tag.workspace, 25);

    let tag = Tag::from_api(json!({"id": 1, "name": "a", "wid": 1, "workspace": 7})).unwrap();
    assert_eq!(tag.workspace, 1);

    let tag = Tag::from_api(json!({"id": 1, "name": "a", "workspace": 7})).unwrap();
    assert_eq!(tag.workspace, 7);
  }

  #[test]
  fn test_tracker_with_long_and_short_names() {
    let tracker = Tracker::from_api(json!({
      "id": 3,
      "description": "Standup",
      "workspace_id": 25,
      "wid": 25,
      "project_id": 4,
      "pid": 4,
      "start": "2024-05-01T09:00:00Z",
      "stop": null,
      "duration": -1,
      "tags": null,
      "tag_ids": null
    }))
    .unwrap();

    assert_eq!(tracker.workspace, 25);
    assert_eq!(tracker.project, Some(4));
    assert!(tracker.tags.is_empty());
  }

  #[test]
  fn test_project_with_long_and_short_names() {
    let project = Project::from_api(json!({
      "id": 8,
      "name": "Site",
      "workspace_id": 1,
      "wid": 1,
      "client_id": 12,
      "cid": 12
    }))
    .unwrap();

    assert_eq!(project.workspace, 1);
    assert_eq!(project.client, Some(12));
    assert!(project.active);
  }

  #[test]
  fn test_full_time_entry_payload() {
    let payload: serde_json::Value =
      serde_json::from_str(include_str!("../../tests/fixtures/time_entry.json")).unwrap();
    let tracker = Tracker::from_api(payload).unwrap();

    assert_eq!(tracker.id, 3544298808);
    assert_eq!(tracker.name, "Sprint planning");
    assert_eq!(tracker.workspace, 2694422);
    assert_eq!(tracker.project, Some(199640311));
    assert_eq!(tracker.duration, Some(Duration::minutes(30)));
    assert!(!tracker.running());
    assert_eq!(tracker.tag_ids(), vec![15792410, 15792411]);
    assert_eq!(tracker.tags[0].name, "focus");
  }

  #[test]
  fn test_full_project_payload() {
    let payload: serde_json::Value =
      serde_json::from_str(include_str!("../../tests/fixtures/project.json")).unwrap();
    let project = Project::from_api(payload).unwrap();

    assert_eq!(project.name, "Website relaunch");
    assert_eq!(project.workspace, 2694422);
    assert_eq!(project.client, Some(64529221));
    assert_eq!(project.color, "#c9806b");
    assert!(project.active);
    assert_eq!(project.end_date, None);
  }
}
