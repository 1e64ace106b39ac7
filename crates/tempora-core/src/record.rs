//! Records: one row of a model, versioned or plain.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

/// Field assignments applied by [`crate::store::VersionedStore::update`].
pub type Changes = BTreeMap<String, Value>;

/// A single row. For versioned models the reserved attributes are filled in
/// by the store; callers only ever set `model` and `fields` on new records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub model:        String,
  /// Physical row id. Identifies one version, not the logical record.
  pub id:           Option<i64>,
  /// Content hash of this version.
  pub guid:         Option<String>,
  /// Logical identity shared by every version.
  pub local_id:     Option<Uuid>,
  pub starts_at:    Option<DateTime<Utc>>,
  /// `None` while the version is current.
  pub ends_at:      Option<DateTime<Utc>>,
  pub date_created: Option<DateTime<Utc>>,
  pub fields:       BTreeMap<String, Value>,
  /// The "as of" instant this record was fetched at. In-memory only.
  #[serde(skip)]
  pub snapshot:     Option<DateTime<Utc>>,
}

impl Record {
  pub fn new(model: impl Into<String>) -> Self {
    Self {
      model:        model.into(),
      id:           None,
      guid:         None,
      local_id:     None,
      starts_at:    None,
      ends_at:      None,
      date_created: None,
      fields:       BTreeMap::new(),
      snapshot:     None,
    }
  }

  /// Builder-style field assignment.
  pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.set(name, value);
    self
  }

  pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
    self.fields.insert(name.into(), value.into());
  }

  pub fn get(&self, name: &str) -> Option<&Value> { self.fields.get(name) }

  pub fn text(&self, name: &str) -> Option<&str> {
    self.get(name).and_then(Value::as_str)
  }

  /// Whether the store has assigned this record a version.
  pub fn is_persisted(&self) -> bool { self.guid.is_some() }

  /// Persisted and not closed.
  pub fn is_active(&self) -> bool {
    self.is_persisted() && self.ends_at.is_none()
  }

  /// Whether this version's `[starts_at, ends_at)` interval contains `at`.
  pub fn valid_at(&self, at: DateTime<Utc>) -> bool {
    self.starts_at.is_some_and(|s| s <= at)
      && self.ends_at.is_none_or(|e| e > at)
  }
}
