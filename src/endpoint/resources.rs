//! API paths for each entity kind.

use crate::cache::{Cacheable, EntityKind, Value};
use crate::error::{Error, Result};

pub const CURRENT_TRACKER_PATH: &str = "me/time_entries/current";

/// Status returned by the current-entry route when nothing is running.
pub const TRACKER_NOT_RUNNING: u16 = 405;

fn scoped(kind: EntityKind, workspace: Option<i64>, resource: &str) -> Result<String> {
  let workspace = workspace.ok_or(Error::MissingWorkspace { kind })?;
  Ok(format!("workspaces/{workspace}/{resource}"))
}

/// Listing route for every entity of `kind` visible to the user.
pub fn collection_path(kind: EntityKind, workspace: Option<i64>) -> Result<String> {
  match kind {
    EntityKind::Organization => Ok("me/organizations".to_string()),
    EntityKind::Workspace => Ok("me/workspaces".to_string()),
    EntityKind::Client => scoped(kind, workspace, "clients"),
    EntityKind::Project => scoped(kind, workspace, "projects"),
    EntityKind::Tag => scoped(kind, workspace, "tags"),
    EntityKind::Tracker => Ok("me/time_entries".to_string()),
  }
}

/// Route for reading a single entity.
pub fn item_path(kind: EntityKind, workspace: Option<i64>, id: i64) -> Result<String> {
  match kind {
    EntityKind::Organization => Ok(format!("organizations/{id}")),
    EntityKind::Workspace => Ok(format!("workspaces/{id}")),
    EntityKind::Tracker => Ok(format!("me/time_entries/{id}")),
    _ => Ok(format!("{}/{id}", collection_path(kind, workspace)?)),
  }
}

/// Route for deleting a single entity.
pub fn delete_path(kind: EntityKind, workspace: Option<i64>, id: i64) -> Result<String> {
  match kind {
    EntityKind::Tracker => scoped(kind, workspace, &format!("time_entries/{id}")),
    _ => item_path(kind, workspace, id),
  }
}

/// The entity's own workspace, falling back to `default`.
pub fn workspace_of<T: Cacheable>(entity: &T, default: Option<i64>) -> Option<i64> {
  match entity.field("workspace") {
    Some(Value::Int(id)) if id != 0 => Some(id),
    _ => default,
  }
}
