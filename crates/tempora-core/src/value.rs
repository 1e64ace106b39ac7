//! Field values carried by records and compared by filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::FieldKind;

/// A single domain field value.
///
/// Versioned references hold the target's `local_id` as [`Value::Uuid`];
/// references to plain models hold the target row id as [`Value::Integer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
  Null,
  Bool(bool),
  Integer(i64),
  Real(f64),
  Text(String),
  Uuid(Uuid),
  Timestamp(DateTime<Utc>),
}

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  /// The field kind this value can be stored in, or `None` for `Null`.
  pub fn kind(&self) -> Option<FieldKind> {
    match self {
      Self::Null => None,
      Self::Bool(_) => Some(FieldKind::Bool),
      Self::Integer(_) => Some(FieldKind::Integer),
      Self::Real(_) => Some(FieldKind::Real),
      Self::Text(_) => Some(FieldKind::Text),
      Self::Uuid(_) => Some(FieldKind::Uuid),
      Self::Timestamp(_) => Some(FieldKind::Timestamp),
    }
  }

  /// Whether this value may be stored in a column of `kind`. Integers are
  /// accepted for real columns.
  pub fn fits(&self, kind: FieldKind) -> bool {
    match (self, kind) {
      (Self::Null, _) => true,
      (Self::Integer(_), FieldKind::Real) => true,
      (v, k) => v.kind() == Some(k),
    }
  }

  pub fn as_uuid(&self) -> Option<Uuid> {
    match self {
      Self::Uuid(id) => Some(*id),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Self::Integer(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
    match self {
      Self::Timestamp(t) => Some(*t),
      Self::Text(s) => DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc)),
      _ => None,
    }
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self { Self::Bool(v) }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self { Self::Integer(v) }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self { Self::Integer(v.into()) }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self { Self::Real(v) }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self { Self::Text(v.to_owned()) }
}

impl From<String> for Value {
  fn from(v: String) -> Self { Self::Text(v) }
}

impl From<Uuid> for Value {
  fn from(v: Uuid) -> Self { Self::Uuid(v) }
}

impl From<DateTime<Utc>> for Value {
  fn from(v: DateTime<Utc>) -> Self { Self::Timestamp(v) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self { v.map_or(Self::Null, Into::into) }
}
