//! Filter model shared by every cache backend.
//!
//! A [`CacheQuery`] is a `(key, value, comparison)` triple. Queries are
//! always combined conjunctively; the file backend evaluates them in
//! memory with [`query_all`], the SQLite backend translates them into a
//! `WHERE` clause.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use super::traits::Cacheable;
use crate::error::{Error, Result};

/// Scalar or sequence value used both for entity fields and query operands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
  Null,
  Bool(bool),
  Int(i64),
  Text(String),
  Date(NaiveDate),
  DateTime(DateTime<Utc>),
  Duration(Duration),
  List(Vec<Value>),
}

impl Value {
  /// Numeric, duration or date/time values support ordering comparisons.
  pub fn is_ordinal(&self) -> bool {
    matches!(
      self,
      Value::Int(_) | Value::Date(_) | Value::DateTime(_) | Value::Duration(_)
    )
  }

  pub fn is_sequence(&self) -> bool {
    matches!(self, Value::List(_))
  }

  /// Parse a literal typed on the command line.
  pub fn parse_literal(input: &str) -> Value {
    let s = input.trim();
    if s.contains(',') {
      return Value::List(
        s.split(',')
          .filter(|part| !part.trim().is_empty())
          .map(Value::parse_literal)
          .collect(),
      );
    }
    match s {
      "null" | "none" => return Value::Null,
      "true" => return Value::Bool(true),
      "false" => return Value::Bool(false),
      _ => {}
    }
    if let Ok(i) = s.parse::<i64>() {
      return Value::Int(i);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
      return Value::Date(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
      return Value::DateTime(dt.with_timezone(&Utc));
    }
    Value::Text(s.to_string())
  }

  /// Ordering between a field value and a query operand.
  ///
  /// Dates compared with datetimes are compared at day granularity.
  /// Mismatched or null operands are incomparable.
  pub fn compare(&self, other: &Value) -> Option<Ordering> {
    match (self, other) {
      (Value::Null, Value::Null) => Some(Ordering::Equal),
      (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
      (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
      (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
      (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
      (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
      (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
      (Value::Date(a), Value::DateTime(b)) => Some(a.cmp(&b.date_naive())),
      (Value::DateTime(a), Value::Date(b)) => Some(a.date_naive().cmp(b)),
      _ => None,
    }
  }

  fn loosely_equals(&self, other: &Value) -> bool {
    self.compare(other) == Some(Ordering::Equal)
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self {
    Value::Int(v)
  }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self {
    Value::Int(v.into())
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Bool(v)
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::Text(v.to_string())
  }
}

impl From<String> for Value {
  fn from(v: String) -> Self {
    Value::Text(v)
  }
}

impl From<NaiveDate> for Value {
  fn from(v: NaiveDate) -> Self {
    Value::Date(v)
  }
}

impl From<DateTime<Utc>> for Value {
  fn from(v: DateTime<Utc>) -> Self {
    Value::DateTime(v)
  }
}

impl From<Duration> for Value {
  fn from(v: Duration) -> Self {
    Value::Duration(v)
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self {
    v.map(Into::into).unwrap_or(Value::Null)
  }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
  fn from(v: Vec<T>) -> Self {
    Value::List(v.into_iter().map(Into::into).collect())
  }
}

/// How a query value is compared against the entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
  Equal,
  LessThan,
  LessThanOrEqual,
  GreaterThan,
  GreaterThanOrEqual,
}

impl Comparison {
  /// SQL operator for scalar operands.
  pub fn operator(self) -> &'static str {
    match self {
      Comparison::Equal => "=",
      Comparison::LessThan => "<",
      Comparison::LessThanOrEqual => "<=",
      Comparison::GreaterThan => ">",
      Comparison::GreaterThanOrEqual => ">=",
    }
  }

  fn accepts(self, ordering: Ordering) -> bool {
    match self {
      Comparison::Equal => ordering == Ordering::Equal,
      Comparison::LessThan => ordering == Ordering::Less,
      Comparison::LessThanOrEqual => ordering != Ordering::Greater,
      Comparison::GreaterThan => ordering == Ordering::Greater,
      Comparison::GreaterThanOrEqual => ordering != Ordering::Less,
    }
  }
}

impl fmt::Display for Comparison {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Comparison::Equal => "EQUAL",
      Comparison::LessThan => "LESS_THAN",
      Comparison::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
      Comparison::GreaterThan => "GREATER_THAN",
      Comparison::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
    };
    f.write_str(name)
  }
}

impl FromStr for Comparison {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_uppercase().as_str() {
      "=" | "==" | "EQ" | "EQUAL" => Ok(Comparison::Equal),
      "<" | "LT" | "LESS_THAN" => Ok(Comparison::LessThan),
      "<=" | "LE" | "LESS_THAN_OR_EQUAL" => Ok(Comparison::LessThanOrEqual),
      ">" | "GT" | "GREATER_THAN" => Ok(Comparison::GreaterThan),
      ">=" | "GE" | "GREATER_THAN_OR_EQUAL" => Ok(Comparison::GreaterThanOrEqual),
      _ => Err(Error::NotImplemented(format!("comparison '{}'", s))),
    }
  }
}

/// Immutable filter over a single entity field.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheQuery {
  key: String,
  value: Value,
  comparison: Comparison,
}

impl CacheQuery {
  /// Build a query, rejecting ordering comparisons on non-ordinal values.
  ///
  /// Date values are widened to the start of the day for `LessThan` and
  /// `GreaterThanOrEqual` and to the end of the day otherwise, so a date
  /// covers the whole day inclusively.
  pub fn new(key: impl Into<String>, value: impl Into<Value>, comparison: Comparison) -> Result<Self> {
    let key = key.into();
    let value = value.into();
    if comparison != Comparison::Equal && !value.is_ordinal() {
      return Err(Error::InvalidQuery(format!(
        "{} on '{}' requires a numeric, duration or date/time value, got {:?}",
        comparison, key, value
      )));
    }

    let value = match value {
      Value::Date(date) => match comparison {
        Comparison::LessThan | Comparison::GreaterThanOrEqual => Value::DateTime(start_of_day(date)),
        _ => Value::DateTime(end_of_day(date)),
      },
      other => other,
    };

    Ok(Self {
      key,
      value,
      comparison,
    })
  }

  /// Equality query, which accepts any value.
  pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
    let key = key.into();
    let value = match value.into() {
      Value::Date(date) => Value::DateTime(end_of_day(date)),
      other => other,
    };
    Self {
      key,
      value,
      comparison: Comparison::Equal,
    }
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn value(&self) -> &Value {
    &self.value
  }

  pub fn comparison(&self) -> Comparison {
    self.comparison
  }
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
  date.and_time(NaiveTime::MIN).and_utc()
}

pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
  // 23:59:59.999999 is always a valid time
  let last = NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN);
  date.and_time(last).and_utc()
}

/// Whether an entity stamped at `timestamp` has outlived `expire_after`.
pub fn is_expired(timestamp: DateTime<Utc>, expire_after: Option<Duration>, now: DateTime<Utc>) -> bool {
  match expire_after {
    Some(ttl) => timestamp < now - ttl,
    None => false,
  }
}

/// Test a single query against an entity.
pub fn matches<T: Cacheable>(entity: &T, query: &CacheQuery) -> Result<bool> {
  let field = lookup(entity, query.key())?;

  if query.comparison == Comparison::Equal {
    return Ok(match_equal(&field, &query.value));
  }

  if field.is_sequence() {
    return Err(Error::NotImplemented(format!(
      "{} on sequence field '{}'",
      query.comparison, query.key
    )));
  }

  Ok(
    field
      .compare(&query.value)
      .map(|ordering| query.comparison.accepts(ordering))
      .unwrap_or(false),
  )
}

fn lookup<T: Cacheable>(entity: &T, key: &str) -> Result<Value> {
  entity.field(key).ok_or_else(|| Error::UnknownField {
    kind: T::kind(),
    key: key.to_string(),
  })
}

/// Set semantics: sequences on either side match when they intersect.
fn match_equal(field: &Value, value: &Value) -> bool {
  match (field, value) {
    (Value::List(have), Value::List(want)) => have
      .iter()
      .any(|v| want.iter().any(|w| v.loosely_equals(w))),
    (Value::List(have), scalar) => have.iter().any(|v| v.loosely_equals(scalar)),
    (scalar, Value::List(want)) => want.iter().any(|w| scalar.loosely_equals(w)),
    (a, b) => a.loosely_equals(b),
  }
}

/// Filter entities by the conjunction of `queries`.
///
/// Entities older than `now - expire_after` are excluded. With `distinct`,
/// an entity is skipped when its value for any scalar-valued query key has
/// already been yielded; this is tracked per key, not per row, and only
/// covers scalar fields.
pub fn query_all<T: Cacheable>(
  entities: impl IntoIterator<Item = T>,
  queries: &[CacheQuery],
  distinct: bool,
  expire_after: Option<Duration>,
) -> Result<Vec<T>> {
  let now = Utc::now();
  let mut existing: HashMap<&str, HashSet<Value>> = HashMap::new();
  let mut found = Vec::new();

  'entities: for entity in entities {
    if is_expired(entity.timestamp(), expire_after, now) {
      continue;
    }

    for query in queries {
      if distinct && !query.value.is_sequence() {
        let value = lookup(&entity, query.key())?;
        if existing
          .get(query.key())
          .is_some_and(|seen| seen.contains(&value))
        {
          continue 'entities;
        }
      }
      if !matches(&entity, query)? {
        continue 'entities;
      }
    }

    if distinct {
      for query in queries {
        let value = lookup(&entity, query.key())?;
        if !value.is_sequence() {
          existing.entry(query.key()).or_default().insert(value);
        }
      }
    }

    found.push(entity);
  }

  Ok(found)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{Project, Tag, Tracker};

  fn tracker(id: i64, project: Option<i64>, tags: &[i64]) -> Tracker {
    let mut t = Tracker::new(id, format!("tracker {}", id), 1, Utc::now());
    t.project = project;
    t.tags = tags
      .iter()
      .map(|tag| Tag::new(*tag, format!("tag {}", tag), 1))
      .collect();
    t
  }

  fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  #[test]
  fn test_rejects_ordering_on_text() {
    let err = CacheQuery::new("name", "abc", Comparison::GreaterThan).unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));

    assert!(CacheQuery::new("name", "abc", Comparison::Equal).is_ok());
    assert!(CacheQuery::new("id", 3, Comparison::LessThan).is_ok());
  }

  #[test]
  fn test_date_normalization() {
    let d = day(2024, 3, 10);
    let lt = CacheQuery::new("start", d, Comparison::LessThan).unwrap();
    let ge = CacheQuery::new("start", d, Comparison::GreaterThanOrEqual).unwrap();
    let gt = CacheQuery::new("start", d, Comparison::GreaterThan).unwrap();
    let le = CacheQuery::new("start", d, Comparison::LessThanOrEqual).unwrap();

    assert_eq!(lt.value(), &Value::DateTime(start_of_day(d)));
    assert_eq!(ge.value(), &Value::DateTime(start_of_day(d)));
    assert_eq!(gt.value(), &Value::DateTime(end_of_day(d)));
    assert_eq!(le.value(), &Value::DateTime(end_of_day(d)));
  }

  #[test]
  fn test_comparison_boundary_on_dates() {
    let d = day(2024, 3, 10);

    let mut late = tracker(1, None, &[]);
    late.set_timestamp(end_of_day(d));
    let mut early = tracker(2, None, &[]);
    early.set_timestamp(start_of_day(d));

    let ge = CacheQuery::new("timestamp", d, Comparison::GreaterThanOrEqual).unwrap();
    let gt = CacheQuery::new("timestamp", d, Comparison::GreaterThan).unwrap();

    assert!(matches(&late, &ge).unwrap());
    assert!(!matches(&early, &gt).unwrap());
  }

  #[test]
  fn test_date_field_against_date_query() {
    let mut project = Project::new(1, "p", 1);
    project.start_date = day(2024, 3, 10);

    let lt = CacheQuery::new("start_date", day(2024, 3, 10), Comparison::LessThan).unwrap();
    let le = CacheQuery::new("start_date", day(2024, 3, 10), Comparison::LessThanOrEqual).unwrap();
    let gt = CacheQuery::new("start_date", day(2024, 3, 9), Comparison::GreaterThan).unwrap();

    assert!(!matches(&project, &lt).unwrap());
    assert!(matches(&project, &le).unwrap());
    assert!(matches(&project, &gt).unwrap());
  }

  #[test]
  fn test_sequence_equal_intersects() {
    let t = tracker(1, Some(7), &[10, 11]);

    assert!(matches(&t, &CacheQuery::eq("tags", vec![11i64, 99])).unwrap());
    assert!(!matches(&t, &CacheQuery::eq("tags", vec![98i64, 99])).unwrap());
    assert!(matches(&t, &CacheQuery::eq("tags", 10i64)).unwrap());
    assert!(matches(&t, &CacheQuery::eq("project", vec![6i64, 7])).unwrap());
  }

  #[test]
  fn test_ordering_on_sequence_field_is_not_implemented() {
    let t = tracker(1, None, &[10]);
    let q = CacheQuery::new("tags", 5, Comparison::GreaterThan).unwrap();
    assert!(matches!(matches(&t, &q), Err(Error::NotImplemented(_))));
  }

  #[test]
  fn test_null_matches_only_equal() {
    let t = tracker(1, None, &[]);
    assert!(matches(&t, &CacheQuery::eq("stop", Value::Null)).unwrap());
    assert!(matches(&t, &CacheQuery::eq("project", Value::Null)).unwrap());

    let q = CacheQuery::new("project", 3, Comparison::LessThan).unwrap();
    assert!(!matches(&t, &q).unwrap());
  }

  #[test]
  fn test_unknown_field() {
    let t = tracker(1, None, &[]);
    let err = matches(&t, &CacheQuery::eq("colour", "red")).unwrap_err();
    assert!(matches!(err, Error::UnknownField { key, .. } if key == "colour"));
  }

  #[test]
  fn test_distinct_is_per_key() {
    let entities = vec![
      tracker(1, Some(7), &[]),
      tracker(2, Some(7), &[]),
      tracker(3, Some(7), &[]),
    ];

    let q = [CacheQuery::eq("project", 7i64)];
    let all = query_all(entities.clone(), &q, false, None).unwrap();
    let distinct = query_all(entities, &q, true, None).unwrap();

    assert_eq!(all.len(), 3);
    assert_eq!(distinct.len(), 1);
    assert_eq!(distinct[0].id, 1);
  }

  #[test]
  fn test_distinct_ignores_sequence_queries() {
    let entities = vec![tracker(1, Some(7), &[1]), tracker(2, Some(8), &[1])];
    let q = [CacheQuery::eq("tags", vec![1i64])];
    assert_eq!(query_all(entities, &q, true, None).unwrap().len(), 2);
  }

  #[test]
  fn test_query_all_excludes_expired() {
    let mut old = tracker(1, None, &[]);
    old.set_timestamp(Utc::now() - Duration::hours(2));
    let fresh = tracker(2, None, &[]);

    let found = query_all(vec![old, fresh], &[], false, Some(Duration::hours(1))).unwrap();
    assert_eq!(found.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2]);
  }

  #[test]
  fn test_parse_literal() {
    assert_eq!(Value::parse_literal("42"), Value::Int(42));
    assert_eq!(Value::parse_literal("null"), Value::Null);
    assert_eq!(Value::parse_literal("2024-01-02"), Value::Date(day(2024, 1, 2)));
    assert_eq!(
      Value::parse_literal("1,2"),
      Value::List(vec![Value::Int(1), Value::Int(2)])
    );
    assert_eq!(Value::parse_literal("work"), Value::Text("work".into()));
  }

  #[test]
  fn test_comparison_from_str() {
    assert_eq!(">=".parse::<Comparison>().unwrap(), Comparison::GreaterThanOrEqual);
    assert_eq!("less_than".parse::<Comparison>().unwrap(), Comparison::LessThan);
    let err = "~=".parse::<Comparison>().unwrap_err();
    assert_eq!(err.to_string(), "comparison '~=' is not implemented");
  }
}
