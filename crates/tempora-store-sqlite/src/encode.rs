//! Encoding and decoding helpers between domain values and the plain
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings with microsecond
//! precision, so lexical comparison in SQL is chronological comparison. UUIDs
//! are stored as hyphenated lowercase strings; booleans as 0/1 integers.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use tempora_core::{
  record::Record,
  schema::{FieldKind, ModelDef},
  value::Value,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Value ───────────────────────────────────────────────────────────────────

pub fn to_sql(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Integer(i) => SqlValue::Integer(*i),
    Value::Real(r) => SqlValue::Real(*r),
    Value::Text(s) => SqlValue::Text(s.clone()),
    Value::Uuid(id) => SqlValue::Text(encode_uuid(*id)),
    Value::Timestamp(dt) => SqlValue::Text(encode_dt(*dt)),
  }
}

pub fn from_sql(kind: FieldKind, raw: SqlValue) -> Result<Value> {
  Ok(match (kind, raw) {
    (_, SqlValue::Null) => Value::Null,
    (FieldKind::Bool, SqlValue::Integer(i)) => Value::Bool(i != 0),
    (FieldKind::Integer, SqlValue::Integer(i)) => Value::Integer(i),
    (FieldKind::Real, SqlValue::Real(r)) => Value::Real(r),
    (FieldKind::Real, SqlValue::Integer(i)) => Value::Real(i as f64),
    (FieldKind::Text, SqlValue::Text(s)) => Value::Text(s),
    (FieldKind::Uuid, SqlValue::Text(s)) => Value::Uuid(decode_uuid(&s)?),
    (FieldKind::Timestamp, SqlValue::Text(s)) => Value::Timestamp(decode_dt(&s)?),
    (kind, other) => {
      return Err(Error::Decode(format!("{other:?} in a {kind:?} column")));
    }
  })
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Owned column values read directly from one row, in
/// [`crate::sql::select_columns`] order. Decoding into a [`Record`] is
/// deferred until the row is consumed.
#[derive(Debug)]
pub struct RawRow {
  pub values: Vec<SqlValue>,
}

impl RawRow {
  pub fn read(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<Self> {
    let values = (0..width)
      .map(|i| row.get::<_, SqlValue>(i))
      .collect::<rusqlite::Result<_>>()?;
    Ok(Self { values })
  }

  pub fn into_record(
    self,
    model: &ModelDef,
    snapshot: Option<DateTime<Utc>>,
  ) -> Result<Record> {
    let mut values = self.values.into_iter();
    let mut record = Record::new(&model.name);

    record.id = Some(expect_integer(values.next())?);
    if model.is_versioned() {
      record.local_id = Some(decode_uuid(&expect_text(values.next())?)?);
      record.guid = Some(expect_text(values.next())?);
      record.starts_at = Some(decode_dt(&expect_text(values.next())?)?);
      record.ends_at = optional_text(values.next())?
        .as_deref()
        .map(decode_dt)
        .transpose()?;
      record.date_created = Some(decode_dt(&expect_text(values.next())?)?);
    }

    for field in &model.fields {
      let raw = values.next().ok_or_else(|| {
        Error::Decode(format!("row has no column for {}", field.name))
      })?;
      record.fields.insert(field.name.clone(), from_sql(field.kind, raw)?);
    }

    record.snapshot = snapshot;
    Ok(record)
  }
}

fn expect_integer(raw: Option<SqlValue>) -> Result<i64> {
  match raw {
    Some(SqlValue::Integer(i)) => Ok(i),
    other => Err(Error::Decode(format!("expected integer, got {other:?}"))),
  }
}

fn expect_text(raw: Option<SqlValue>) -> Result<String> {
  match raw {
    Some(SqlValue::Text(s)) => Ok(s),
    other => Err(Error::Decode(format!("expected text, got {other:?}"))),
  }
}

fn optional_text(raw: Option<SqlValue>) -> Result<Option<String>> {
  match raw {
    Some(SqlValue::Null) => Ok(None),
    other => expect_text(other).map(Some),
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;

  #[test]
  fn timestamps_sort_lexically() {
    let a = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let b = a + Duration::microseconds(1);
    let c = a + Duration::milliseconds(500);
    let (ea, eb, ec) = (encode_dt(a), encode_dt(b), encode_dt(c));
    assert_eq!(ea.len(), eb.len());
    assert!(ea < eb && eb < ec);
    assert_eq!(decode_dt(&eb).unwrap(), b);
  }

  #[test]
  fn values_round_trip_through_columns() {
    let id = Uuid::new_v4();
    assert_eq!(from_sql(FieldKind::Uuid, to_sql(&Value::Uuid(id))).unwrap(), Value::Uuid(id));
    assert_eq!(from_sql(FieldKind::Bool, to_sql(&Value::Bool(true))).unwrap(), Value::Bool(true));
    assert_eq!(from_sql(FieldKind::Text, SqlValue::Null).unwrap(), Value::Null);
    assert!(from_sql(FieldKind::Integer, SqlValue::Text("x".into())).is_err());
  }
}
