//! SQLite cache backend.
//!
//! Every entity type has its own table in a shared database. Queries are
//! translated into SQL; distinct queries group by the queried columns, so
//! they deduplicate whole value combinations rather than each key on its
//! own as the file backend does.

mod mapping;
mod schema;

pub use mapping::{Column, ColumnKind, SqlRecord};

use chrono::{Duration, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension};
use std::marker::PhantomData;
use std::path::PathBuf;
use tracing::debug;

use self::mapping::{datetime_to_sql, upsert, value_to_sql};
use self::schema::SCHEMA;
use super::backend::CacheBackend;
use super::query::{CacheQuery, Comparison, Value};
use crate::error::{Error, Result};

/// File name of the database inside the cache directory.
pub const DATABASE_FILE: &str = "cache.sqlite";

#[derive(Debug, Clone)]
enum Location {
  Directory(PathBuf),
  Memory,
}

/// SQLite-backed cache for a single entity type.
pub struct SqliteCache<T> {
  location: Location,
  expire_after: Option<Duration>,
  conn: Option<Connection>,
  _kind: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for SqliteCache<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SqliteCache")
      .field("location", &self.location)
      .field("expire_after", &self.expire_after)
      .field("bound", &self.conn.is_some())
      .finish()
  }
}

impl<T: SqlRecord> SqliteCache<T> {
  /// Database stored as `cache.sqlite` inside `directory`.
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self::with_location(Location::Directory(directory.into()))
  }

  /// Private in-memory database, discarded with the cache.
  pub fn in_memory() -> Self {
    Self::with_location(Location::Memory)
  }

  fn with_location(location: Location) -> Self {
    Self {
      location,
      expire_after: None,
      conn: None,
      _kind: PhantomData,
    }
  }

  pub fn with_expire_after(mut self, expire_after: Option<Duration>) -> Self {
    self.expire_after = expire_after;
    self
  }

  /// Database path, `None` for in-memory databases.
  pub fn path(&self) -> Option<PathBuf> {
    match &self.location {
      Location::Directory(dir) => Some(dir.join(DATABASE_FILE)),
      Location::Memory => None,
    }
  }

  fn conn(&self) -> Result<&Connection> {
    self.conn.as_ref().ok_or(Error::MissingParent { kind: T::kind() })
  }

  fn conn_mut(&mut self) -> Result<&mut Connection> {
    self.conn.as_mut().ok_or(Error::MissingParent { kind: T::kind() })
  }

  /// `timestamp >= cutoff` clause for the configured TTL.
  fn freshness(&self) -> Option<(String, SqlValue)> {
    self.expire_after.map(|ttl| {
      let cutoff = Utc::now() - ttl;
      (
        format!("{}.timestamp >= ?", T::kind().table()),
        SqlValue::Text(datetime_to_sql(cutoff)),
      )
    })
  }

  fn select(&self, clauses: Vec<String>, params: Vec<SqlValue>, group_by: &[&str]) -> Result<Vec<T>> {
    let conn = self.conn()?;
    let table = T::kind().table();
    let mut sql = format!("SELECT {} FROM {table}", T::select_list());
    if !clauses.is_empty() {
      sql.push_str(" WHERE ");
      sql.push_str(&clauses.join(" AND "));
    }
    if !group_by.is_empty() {
      let columns: Vec<String> = group_by.iter().map(|c| format!("{table}.{c}")).collect();
      sql.push_str(" GROUP BY ");
      sql.push_str(&columns.join(", "));
    }
    sql.push_str(&format!(" ORDER BY {table}.timestamp ASC, {table}.id ASC"));

    let mut stmt = conn.prepare(&sql)?;
    let mut entities = stmt
      .query_map(rusqlite::params_from_iter(params), |row| T::from_row(row))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    for entity in &mut entities {
      entity.load_links(conn)?;
    }
    Ok(entities)
  }

  /// Translate one query into a clause and its parameters.
  fn clause(query: &CacheQuery) -> Result<(String, Vec<SqlValue>)> {
    let table = T::kind().table();

    if let Some(template) = T::link_filter(query.key()) {
      if query.comparison() != Comparison::Equal {
        return Err(Error::NotImplemented(format!(
          "{} on sequence field '{}'",
          query.comparison(),
          query.key()
        )));
      }
      let values = match query.value() {
        Value::List(values) => values.clone(),
        scalar => vec![scalar.clone()],
      };
      if values.is_empty() {
        return Ok(("0".to_string(), Vec::new()));
      }
      let placeholders = vec!["?"; values.len()].join(", ");
      let params = values
        .iter()
        .map(|v| value_to_sql(ColumnKind::Integer, v))
        .collect();
      return Ok((template.replace("{}", &placeholders), params));
    }

    let column = T::column(query.key()).ok_or_else(|| Error::UnknownField {
      kind: T::kind(),
      key: query.key().to_string(),
    })?;
    let name = format!("{table}.{}", column.name);

    match (query.comparison(), query.value()) {
      (Comparison::Equal, Value::List(values)) => {
        if values.is_empty() {
          return Ok(("0".to_string(), Vec::new()));
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        let params = values.iter().map(|v| value_to_sql(column.kind, v)).collect();
        Ok((format!("{name} IN ({placeholders})"), params))
      }
      (Comparison::Equal, Value::Null) => Ok((format!("{name} IS NULL"), Vec::new())),
      (comparison, value) => Ok((
        format!("{name} {} ?", comparison.operator()),
        vec![value_to_sql(column.kind, value)],
      )),
    }
  }

  /// Write entries inside one transaction.
  fn write(&mut self, entries: &[T], bump: bool) -> Result<()> {
    let table = T::kind().table();
    let conn = self.conn_mut()?;
    let tx = conn.transaction()?;
    let now = Utc::now();
    for entry in entries {
      let exists = tx
        .query_row(&format!("SELECT 1 FROM {table} WHERE id = ?1"), [entry.id()], |_| Ok(()))
        .optional()?
        .is_some();
      if exists && bump {
        let mut replacement = entry.clone();
        replacement.set_timestamp(now);
        upsert(&tx, &replacement)?;
      } else {
        upsert(&tx, entry)?;
      }
    }
    tx.commit()?;
    debug!(kind = %T::kind(), entries = entries.len(), "wrote entries to sqlite cache");
    Ok(())
  }
}

impl<T: SqlRecord> CacheBackend<T> for SqliteCache<T> {
  fn bind(&mut self) -> Result<()> {
    if self.conn.is_some() {
      return Ok(());
    }
    let conn = match &self.location {
      Location::Directory(dir) => {
        std::fs::create_dir_all(dir)?;
        Connection::open(dir.join(DATABASE_FILE))?
      }
      Location::Memory => Connection::open_in_memory()?,
    };
    conn.execute_batch(SCHEMA)?;
    self.conn = Some(conn);
    Ok(())
  }

  fn is_bound(&self) -> bool {
    self.conn.is_some()
  }

  fn expire_after(&self) -> Option<Duration> {
    self.expire_after
  }

  fn set_expire_after(&mut self, expire_after: Option<Duration>) {
    self.expire_after = expire_after;
  }

  fn load(&mut self) -> Result<Vec<T>> {
    let (clauses, params) = self.freshness().into_iter().unzip();
    self.select(clauses, params, &[])
  }

  fn find(&mut self, id: i64) -> Result<Option<T>> {
    let mut clauses = vec![format!("{}.id = ?", T::kind().table())];
    let mut params = vec![SqlValue::Integer(id)];
    if let Some((clause, param)) = self.freshness() {
      clauses.push(clause);
      params.push(param);
    }
    Ok(self.select(clauses, params, &[])?.into_iter().next())
  }

  fn add(&mut self, entries: &[T]) -> Result<()> {
    self.write(entries, true)
  }

  fn update(&mut self, entries: &[T]) -> Result<()> {
    self.write(entries, false)
  }

  fn delete(&mut self, entries: &[T]) -> Result<()> {
    let table = T::kind().table();
    let conn = self.conn_mut()?;
    let tx = conn.transaction()?;
    for entry in entries {
      T::clear_links(&tx, entry.id())?;
      tx.execute(&format!("DELETE FROM {table} WHERE id = ?1"), [entry.id()])?;
    }
    tx.commit()?;
    Ok(())
  }

  fn query(&mut self, queries: &[CacheQuery], distinct: bool) -> Result<Vec<T>> {
    debug!(kind = %T::kind(), queries = queries.len(), distinct, "querying sqlite cache");
    let (mut clauses, mut params): (Vec<String>, Vec<SqlValue>) =
      self.freshness().into_iter().unzip();

    for query in queries {
      let (clause, values) = Self::clause(query)?;
      clauses.push(clause);
      params.extend(values);
    }

    let mut group_by: Vec<&str> = Vec::new();
    if distinct {
      for query in queries {
        if let Some(column) = T::column(query.key()) {
          if !group_by.contains(&column.name) {
            group_by.push(column.name);
          }
        }
      }
    }

    self.select(clauses, params, &group_by)
  }

  /// Writes are committed as they happen.
  fn commit(&mut self) -> Result<()> {
    self.conn()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{Project, Tag, Tracker};
  use chrono::{NaiveDate, TimeZone};

  fn bound<T: SqlRecord>() -> SqliteCache<T> {
    let mut cache = SqliteCache::in_memory();
    cache.bind().unwrap();
    cache
  }

  fn tracker(id: i64, project: Option<i64>, tags: &[i64]) -> Tracker {
    let start = Utc.with_ymd_and_hms(2024, 5, id as u32, 9, 0, 0).unwrap();
    let mut t = Tracker::new(id, format!("entry {id}"), 1, start);
    t.project = project;
    t.tags = tags
      .iter()
      .map(|tag| Tag::new(*tag, format!("tag {tag}"), 1))
      .collect();
    t
  }

  #[test]
  fn test_unbound_cache_fails_fast() {
    let mut cache: SqliteCache<Tag> = SqliteCache::in_memory();
    assert!(!cache.is_bound());
    assert!(matches!(cache.load(), Err(Error::MissingParent { .. })));
    assert!(matches!(cache.add(&[]), Err(Error::MissingParent { .. })));
  }

  #[test]
  fn test_tracker_round_trip_with_tags() {
    let mut cache: SqliteCache<Tracker> = bound();
    let mut entry = tracker(1, Some(4), &[7, 8]);
    entry.stop = Some(entry.start + Duration::minutes(45));
    entry.duration = Some(Duration::minutes(45));

    cache.add(std::slice::from_ref(&entry)).unwrap();

    assert_eq!(cache.find(1).unwrap(), Some(entry));
    assert_eq!(cache.find(2).unwrap(), None);
  }

  #[test]
  fn test_tracker_tags_are_cached_as_tags() {
    let dir = tempfile::tempdir().unwrap();
    let mut trackers: SqliteCache<Tracker> = SqliteCache::new(dir.path());
    trackers.bind().unwrap();
    trackers.add(&[tracker(1, None, &[3])]).unwrap();
    assert_eq!(trackers.path(), Some(dir.path().join(DATABASE_FILE)));

    let mut tags: SqliteCache<Tag> = SqliteCache::new(dir.path());
    tags.bind().unwrap();
    assert_eq!(tags.find(3).unwrap().map(|t| t.name), Some("tag 3".to_string()));
  }

  #[test]
  fn test_add_existing_bumps_timestamp_update_keeps_it() {
    let mut cache: SqliteCache<Tag> = bound();
    let mut tag = Tag::new(1, "old", 1);
    tag.timestamp = Utc::now() - Duration::days(2);
    cache.add(std::slice::from_ref(&tag)).unwrap();
    let stored = cache.find(1).unwrap().unwrap();
    assert_eq!(stored.timestamp, tag.timestamp);

    tag.name = "new".into();
    let before = Utc::now();
    cache.add(std::slice::from_ref(&tag)).unwrap();
    let stored = cache.find(1).unwrap().unwrap();
    assert_eq!(stored.name, "new");
    assert!(stored.timestamp >= before);

    tag.name = "merged".into();
    cache.update(std::slice::from_ref(&tag)).unwrap();
    let stored = cache.find(1).unwrap().unwrap();
    assert_eq!(stored.name, "merged");
    assert_eq!(stored.timestamp, tag.timestamp);
  }

  #[test]
  fn test_expired_rows_are_hidden() {
    let mut cache: SqliteCache<Tag> = bound();
    let mut stale = Tag::new(1, "stale", 1);
    stale.timestamp = Utc::now() - Duration::hours(3);
    cache.add(&[stale, Tag::new(2, "fresh", 1)]).unwrap();

    cache.set_expire_after(Some(Duration::hours(1)));
    let ids: Vec<i64> = cache.load().unwrap().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![2]);
    assert_eq!(cache.find(1).unwrap(), None);
  }

  #[test]
  fn test_delete_removes_links() {
    let mut cache: SqliteCache<Tracker> = bound();
    let entry = tracker(1, None, &[5]);
    cache.add(std::slice::from_ref(&entry)).unwrap();
    cache.delete(std::slice::from_ref(&entry)).unwrap();

    assert!(cache.load().unwrap().is_empty());
    let links: i64 = cache
      .conn()
      .unwrap()
      .query_row("SELECT COUNT(*) FROM tracker_tag", [], |row| row.get(0))
      .unwrap();
    assert_eq!(links, 0);
  }

  #[test]
  fn test_query_tags_intersection() {
    let mut cache: SqliteCache<Tracker> = bound();
    cache
      .add(&[tracker(1, None, &[1, 2]), tracker(2, None, &[3]), tracker(3, None, &[])])
      .unwrap();

    let found = cache.query(&[CacheQuery::eq("tags", vec![2, 3])], false).unwrap();
    assert_eq!(found.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);

    let found = cache.query(&[CacheQuery::eq("tags", 1)], false).unwrap();
    assert_eq!(found.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1]);

    let ordinal = CacheQuery::new("tags", 1, Comparison::GreaterThan).unwrap();
    assert!(matches!(cache.query(&[ordinal], false), Err(Error::NotImplemented(_))));
  }

  #[test]
  fn test_query_null_and_ordinal() {
    let mut cache: SqliteCache<Tracker> = bound();
    cache
      .add(&[tracker(1, Some(7), &[]), tracker(2, None, &[]), tracker(3, Some(9), &[])])
      .unwrap();

    let unassigned = cache.query(&[CacheQuery::eq("project", Value::Null)], false).unwrap();
    assert_eq!(unassigned.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2]);

    // Null projects never satisfy ordinal comparisons
    let query = CacheQuery::new("project", 8, Comparison::LessThan).unwrap();
    let found = cache.query(&[query], false).unwrap();
    assert_eq!(found.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1]);
  }

  #[test]
  fn test_query_date_column_by_day() {
    let mut cache: SqliteCache<Project> = bound();
    let mut project = Project::new(1, "Site", 1);
    project.start_date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    cache.add(&[project]).unwrap();

    let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    for comparison in [Comparison::GreaterThanOrEqual, Comparison::LessThanOrEqual] {
      let query = CacheQuery::new("start_date", day, comparison).unwrap();
      assert_eq!(cache.query(&[query], false).unwrap().len(), 1, "{comparison}");
    }
    let query = CacheQuery::new("start_date", day, Comparison::GreaterThan).unwrap();
    assert!(cache.query(&[query], false).unwrap().is_empty());
  }

  #[test]
  fn test_unknown_key_rejected() {
    let mut cache: SqliteCache<Tag> = bound();
    assert!(matches!(
      cache.query(&[CacheQuery::eq("colour", "red")], false),
      Err(Error::UnknownField { .. })
    ));
  }

  #[test]
  fn test_distinct_groups_by_queried_columns() {
    let mut cache: SqliteCache<Tracker> = bound();
    cache
      .add(&[tracker(1, Some(7), &[]), tracker(2, Some(7), &[]), tracker(3, Some(8), &[])])
      .unwrap();

    let query = CacheQuery::new("project", 7, Comparison::GreaterThanOrEqual).unwrap();
    let found = cache.query(&[query], true).unwrap();
    assert_eq!(found.len(), 2);
  }
}
