//! Row mapping between entity types and their tables.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, Connection, Row};

use crate::cache::query::Value;
use crate::cache::traits::Cacheable;
use crate::error::Result;
use crate::models::{Client, Organization, Project, Tag, Tracker, Workspace};

/// Fixed-width so that text order equals time order.
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";
const DATETIME_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
  Integer,
  Text,
  Bool,
  Date,
  DateTime,
  /// Whole seconds
  Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
  pub name: &'static str,
  pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
  Column { name, kind }
}

pub fn datetime_to_sql(dt: DateTime<Utc>) -> String {
  dt.format(DATETIME_FORMAT).to_string()
}

/// Convert a query operand into a parameter for a column of `kind`.
pub fn value_to_sql(kind: ColumnKind, value: &Value) -> SqlValue {
  match value {
    Value::Null | Value::List(_) => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Int(i) => SqlValue::Integer(*i),
    Value::Text(s) => SqlValue::Text(s.clone()),
    Value::Date(d) => SqlValue::Text(d.format(DATE_FORMAT).to_string()),
    // Date columns compare at day granularity
    Value::DateTime(dt) if kind == ColumnKind::Date => {
      SqlValue::Text(dt.date_naive().format(DATE_FORMAT).to_string())
    }
    Value::DateTime(dt) => SqlValue::Text(datetime_to_sql(*dt)),
    Value::Duration(d) => SqlValue::Integer(d.num_seconds()),
  }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> SqlValue {
  dt.map(|dt| SqlValue::Text(datetime_to_sql(dt)))
    .unwrap_or(SqlValue::Null)
}

fn opt_int(i: Option<i64>) -> SqlValue {
  i.map(SqlValue::Integer).unwrap_or(SqlValue::Null)
}

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
  rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn get_datetime(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  let raw: String = row.get(idx)?;
  NaiveDateTime::parse_from_str(&raw, DATETIME_PARSE_FORMAT)
    .map(|naive| naive.and_utc())
    .map_err(|e| conversion_error(idx, e))
}

fn get_opt_datetime(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
  match row.get::<_, Option<String>>(idx)? {
    Some(_) => get_datetime(row, idx).map(Some),
    None => Ok(None),
  }
}

fn get_date(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
  let raw: String = row.get(idx)?;
  NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn get_opt_date(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
  match row.get::<_, Option<String>>(idx)? {
    Some(_) => get_date(row, idx).map(Some),
    None => Ok(None),
  }
}

/// An entity stored as one row of its own table.
///
/// `COLUMNS` lists the stored columns in parameter order, starting with
/// `id`, `name` and `timestamp`. Fields held outside the row (tracker tags)
/// go through the link hooks.
pub trait SqlRecord: Cacheable {
  const COLUMNS: &'static [Column];

  fn to_params(&self) -> Vec<SqlValue>;

  fn from_row(row: &Row) -> rusqlite::Result<Self>;

  fn column(key: &str) -> Option<Column> {
    Self::COLUMNS.iter().copied().find(|c| c.name == key)
  }

  /// Column list usable in a `SELECT`.
  fn select_list() -> String {
    Self::COLUMNS
      .iter()
      .map(|c| format!("{}.{}", Self::kind().table(), c.name))
      .collect::<Vec<_>>()
      .join(", ")
  }

  /// Persist linked rows after the entity row is written.
  fn write_links(&self, _conn: &Connection) -> Result<()> {
    Ok(())
  }

  /// Populate linked fields after the entity row is read.
  fn load_links(&mut self, _conn: &Connection) -> Result<()> {
    Ok(())
  }

  fn clear_links(_conn: &Connection, _id: i64) -> Result<()> {
    Ok(())
  }

  /// Subquery template for keys stored outside the row. `{}` is replaced
  /// with the placeholder list.
  fn link_filter(_key: &str) -> Option<&'static str> {
    None
  }
}

/// Insert or update a row, keeping its `created` column.
pub fn upsert<R: SqlRecord>(conn: &Connection, record: &R) -> Result<()> {
  let table = R::kind().table();
  let names: Vec<&str> = R::COLUMNS.iter().map(|c| c.name).collect();
  let placeholders = vec!["?"; names.len()].join(", ");
  let updates = names
    .iter()
    .filter(|name| **name != "id")
    .map(|name| format!("{name} = excluded.{name}"))
    .collect::<Vec<_>>()
    .join(", ");

  let sql = format!(
    "INSERT INTO {table} ({}) VALUES ({placeholders}) ON CONFLICT(id) DO UPDATE SET {updates}",
    names.join(", ")
  );
  conn.execute(&sql, rusqlite::params_from_iter(record.to_params()))?;
  record.write_links(conn)
}

impl SqlRecord for Organization {
  const COLUMNS: &'static [Column] = &[
    col("id", ColumnKind::Integer),
    col("name", ColumnKind::Text),
    col("timestamp", ColumnKind::DateTime),
  ];

  fn to_params(&self) -> Vec<SqlValue> {
    vec![
      SqlValue::Integer(self.id),
      SqlValue::Text(self.name.clone()),
      SqlValue::Text(datetime_to_sql(self.timestamp)),
    ]
  }

  fn from_row(row: &Row) -> rusqlite::Result<Self> {
    Ok(Organization {
      id: row.get(0)?,
      name: row.get(1)?,
      timestamp: get_datetime(row, 2)?,
    })
  }
}

impl SqlRecord for Workspace {
  const COLUMNS: &'static [Column] = &[
    col("id", ColumnKind::Integer),
    col("name", ColumnKind::Text),
    col("timestamp", ColumnKind::DateTime),
    col("organization", ColumnKind::Integer),
  ];

  fn to_params(&self) -> Vec<SqlValue> {
    vec![
      SqlValue::Integer(self.id),
      SqlValue::Text(self.name.clone()),
      SqlValue::Text(datetime_to_sql(self.timestamp)),
      SqlValue::Integer(self.organization),
    ]
  }

  fn from_row(row: &Row) -> rusqlite::Result<Self> {
    Ok(Workspace {
      id: row.get(0)?,
      name: row.get(1)?,
      timestamp: get_datetime(row, 2)?,
      organization: row.get(3)?,
    })
  }
}

impl SqlRecord for Client {
  const COLUMNS: &'static [Column] = &[
    col("id", ColumnKind::Integer),
    col("name", ColumnKind::Text),
    col("timestamp", ColumnKind::DateTime),
    col("workspace", ColumnKind::Integer),
  ];

  fn to_params(&self) -> Vec<SqlValue> {
    vec![
      SqlValue::Integer(self.id),
      SqlValue::Text(self.name.clone()),
      SqlValue::Text(datetime_to_sql(self.timestamp)),
      SqlValue::Integer(self.workspace),
    ]
  }

  fn from_row(row: &Row) -> rusqlite::Result<Self> {
    Ok(Client {
      id: row.get(0)?,
      name: row.get(1)?,
      timestamp: get_datetime(row, 2)?,
      workspace: row.get(3)?,
    })
  }
}

impl SqlRecord for Tag {
  const COLUMNS: &'static [Column] = &[
    col("id", ColumnKind::Integer),
    col("name", ColumnKind::Text),
    col("timestamp", ColumnKind::DateTime),
    col("workspace", ColumnKind::Integer),
  ];

  fn to_params(&self) -> Vec<SqlValue> {
    vec![
      SqlValue::Integer(self.id),
      SqlValue::Text(self.name.clone()),
      SqlValue::Text(datetime_to_sql(self.timestamp)),
      SqlValue::Integer(self.workspace),
    ]
  }

  fn from_row(row: &Row) -> rusqlite::Result<Self> {
    Ok(Tag {
      id: row.get(0)?,
      name: row.get(1)?,
      timestamp: get_datetime(row, 2)?,
      workspace: row.get(3)?,
    })
  }
}

impl SqlRecord for Project {
  const COLUMNS: &'static [Column] = &[
    col("id", ColumnKind::Integer),
    col("name", ColumnKind::Text),
    col("timestamp", ColumnKind::DateTime),
    col("workspace", ColumnKind::Integer),
    col("color", ColumnKind::Text),
    col("client", ColumnKind::Integer),
    col("active", ColumnKind::Bool),
    col("start_date", ColumnKind::Date),
    col("end_date", ColumnKind::Date),
  ];

  fn to_params(&self) -> Vec<SqlValue> {
    vec![
      SqlValue::Integer(self.id),
      SqlValue::Text(self.name.clone()),
      SqlValue::Text(datetime_to_sql(self.timestamp)),
      SqlValue::Integer(self.workspace),
      SqlValue::Text(self.color.clone()),
      opt_int(self.client),
      SqlValue::Integer(i64::from(self.active)),
      SqlValue::Text(self.start_date.format(DATE_FORMAT).to_string()),
      self
        .end_date
        .map(|d| SqlValue::Text(d.format(DATE_FORMAT).to_string()))
        .unwrap_or(SqlValue::Null),
    ]
  }

  fn from_row(row: &Row) -> rusqlite::Result<Self> {
    Ok(Project {
      id: row.get(0)?,
      name: row.get(1)?,
      timestamp: get_datetime(row, 2)?,
      workspace: row.get(3)?,
      color: row.get(4)?,
      client: row.get(5)?,
      active: row.get(6)?,
      start_date: get_date(row, 7)?,
      end_date: get_opt_date(row, 8)?,
    })
  }
}

impl SqlRecord for Tracker {
  const COLUMNS: &'static [Column] = &[
    col("id", ColumnKind::Integer),
    col("name", ColumnKind::Text),
    col("timestamp", ColumnKind::DateTime),
    col("workspace", ColumnKind::Integer),
    col("start", ColumnKind::DateTime),
    col("duration", ColumnKind::Duration),
    col("stop", ColumnKind::DateTime),
    col("project", ColumnKind::Integer),
  ];

  fn to_params(&self) -> Vec<SqlValue> {
    vec![
      SqlValue::Integer(self.id),
      SqlValue::Text(self.name.clone()),
      SqlValue::Text(datetime_to_sql(self.timestamp)),
      SqlValue::Integer(self.workspace),
      SqlValue::Text(datetime_to_sql(self.start)),
      opt_int(self.duration.map(|d| d.num_seconds())),
      opt_datetime(self.stop),
      opt_int(self.project),
    ]
  }

  fn from_row(row: &Row) -> rusqlite::Result<Self> {
    Ok(Tracker {
      id: row.get(0)?,
      name: row.get(1)?,
      timestamp: get_datetime(row, 2)?,
      workspace: row.get(3)?,
      start: get_datetime(row, 4)?,
      duration: row.get::<_, Option<i64>>(5)?.map(Duration::seconds),
      stop: get_opt_datetime(row, 6)?,
      project: row.get(7)?,
      tags: Vec::new(),
    })
  }

  fn column(key: &str) -> Option<Column> {
    let key = if key == "description" { "name" } else { key };
    Self::COLUMNS.iter().copied().find(|c| c.name == key)
  }

  fn write_links(&self, conn: &Connection) -> Result<()> {
    Self::clear_links(conn, self.id)?;
    for tag in &self.tags {
      upsert(conn, tag)?;
      conn.execute(
        "INSERT OR IGNORE INTO tracker_tag (tracker, tag) VALUES (?1, ?2)",
        params![self.id, tag.id],
      )?;
    }
    Ok(())
  }

  fn load_links(&mut self, conn: &Connection) -> Result<()> {
    let sql = format!(
      "SELECT {} FROM tag JOIN tracker_tag ON tag.id = tracker_tag.tag \
       WHERE tracker_tag.tracker = ?1 ORDER BY tracker_tag.rowid",
      Tag::select_list()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let tags = stmt
      .query_map([self.id], |row| Tag::from_row(row))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    self.tags = tags;
    Ok(())
  }

  fn clear_links(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM tracker_tag WHERE tracker = ?1", [id])?;
    Ok(())
  }

  fn link_filter(key: &str) -> Option<&'static str> {
    match key {
      "tags" => Some("tracker.id IN (SELECT tracker FROM tracker_tag WHERE tag IN ({}))"),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_datetime_text_orders_like_time() {
    let early = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    let late = early + Duration::nanoseconds(1500);
    let (a, b) = (datetime_to_sql(early), datetime_to_sql(late));

    assert_eq!(a.len(), b.len());
    assert!(a < b);
    assert_eq!(a, "2024-05-01T09:00:00.000000000Z");
  }

  #[test]
  fn test_date_column_truncates_datetime_operand() {
    let dt = Utc.with_ymd_and_hms(2024, 1, 15, 23, 59, 59).unwrap();
    assert_eq!(
      value_to_sql(ColumnKind::Date, &Value::DateTime(dt)),
      SqlValue::Text("2024-01-15".into())
    );
    assert_eq!(
      value_to_sql(ColumnKind::Duration, &Value::Duration(Duration::minutes(2))),
      SqlValue::Integer(120)
    );
  }

  #[test]
  fn test_tracker_description_alias() {
    assert_eq!(Tracker::column("description").map(|c| c.name), Some("name"));
    assert!(Tracker::column("tags").is_none());
    assert!(Tracker::link_filter("tags").is_some());
  }
}
