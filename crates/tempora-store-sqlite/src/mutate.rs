//! The mutation engine: create, update and delete for versioned models.
//!
//! An [`Engine`] borrows one open transaction and one clock reading. Every
//! row it closes gets `ends_at = now` and every row it inserts gets
//! `starts_at = now`, so a whole batch shares a single boundary instant.
//! Nothing is committed here; the caller commits on `Ok` and drops the
//! transaction (rolling back) on `Err`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, params_from_iter, types::Value as SqlValue};
use tempora_core::{
  Error as CoreError,
  hash::content_hash,
  query::{Filter, Query},
  record::{Changes, Record},
  schema::{FieldDef, ModelDef, Schema, Versioning, column},
  store::DeleteSummary,
  value::Value,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  Error, Result, cascade,
  encode::{encode_dt, encode_uuid, to_sql},
  read::{self, Injection},
  schema::active_index,
  sql::quote,
};

/// Upper bound on bound parameters per `IN (...)` list.
const CHUNK: usize = 500;

/// Which reference fields a create checks against the database.
#[derive(Debug, Clone, Copy)]
pub enum ReferenceCheck<'c> {
  All,
  /// Only fields being changed. Untouched references of an existing row are
  /// not re-validated.
  Changed(&'c Changes),
  Skip,
}

impl ReferenceCheck<'_> {
  fn covers(&self, field: &str) -> bool {
    match self {
      Self::All => true,
      Self::Changed(changes) => changes.contains_key(field),
      Self::Skip => false,
    }
  }
}

pub struct Engine<'a> {
  conn:   &'a Connection,
  schema: &'a Schema,
  now:    DateTime<Utc>,
}

impl<'a> Engine<'a> {
  pub fn new(conn: &'a Connection, schema: &'a Schema, now: DateTime<Utc>) -> Self {
    Self { conn, schema, now }
  }

  pub fn schema(&self) -> &'a Schema { self.schema }

  /// Active rows matching `query`, evaluated now regardless of its `at_time`.
  pub fn select_active(&self, query: &Query) -> Result<Vec<Record>> {
    if query.is_sliced() {
      return Err(CoreError::Sliced.into());
    }
    let current = query.now().active()?;
    read::select_records(self.conn, self.schema, &current, Injection::Temporal)
  }

  // ─── Create ───────────────────────────────────────────────────────────────

  /// Insert a batch of records as new versions.
  ///
  /// Every record is validated before anything is written. Records carrying
  /// a GUID are re-saves: the row with that GUID must still be active, and
  /// it is closed before the new version is inserted under the same
  /// `local_id`.
  pub fn create(
    &self,
    records: Vec<Record>,
    check: ReferenceCheck<'_>,
  ) -> Result<Vec<Record>> {
    if records.is_empty() {
      return Ok(Vec::new());
    }

    let mut closes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut seen = BTreeSet::new();
    for record in &records {
      let model = self.versioned_model(&record.model)?;
      self.validate(model, record, check)?;

      let Some(guid) = &record.guid else { continue };
      let local_id = record.local_id.ok_or_else(|| {
        CoreError::Validation(format!(
          "{} version {guid} has no local_id",
          model.name
        ))
      })?;
      if !seen.insert((model.name.clone(), local_id)) {
        return Err(
          CoreError::Conflict(format!(
            "{} {local_id} is saved more than once in one batch",
            model.name
          ))
          .into(),
        );
      }
      closes.entry(model.name.clone()).or_default().push(guid.clone());
    }

    for (name, guids) in &closes {
      let model = self.schema.model(name)?;
      let values: Vec<SqlValue> =
        guids.iter().map(|g| SqlValue::Text(g.clone())).collect();
      let closed = self.close_where_in(model, column::GUID, &values)?;
      if closed != guids.len() {
        return Err(
          CoreError::Conflict(format!(
            "{} of {} {name} versions being re-saved are no longer active",
            guids.len() - closed,
            guids.len(),
          ))
          .into(),
        );
      }
    }

    let mut saved = Vec::with_capacity(records.len());
    for mut record in records {
      let model = self.schema.model(&record.model)?;
      if record.guid.is_none() {
        record.local_id = Some(Uuid::new_v4());
      }
      record.date_created = Some(record.date_created.unwrap_or(self.now));
      record.starts_at = Some(self.now);
      record.ends_at = None;
      record.snapshot = None;
      record.guid = Some(content_hash(&record)?);
      record.id = Some(self.insert(model, &record)?);
      saved.push(record);
    }

    debug!(rows = saved.len(), now = %self.now, "inserted versions");
    Ok(saved)
  }

  fn versioned_model(&self, name: &str) -> Result<&'a ModelDef> {
    let model = self.schema.model(name)?;
    if !model.is_versioned() {
      return Err(
        CoreError::Validation(format!("{name} is not a versioned model")).into(),
      );
    }
    Ok(model)
  }

  fn validate(
    &self,
    model: &ModelDef,
    record: &Record,
    check: ReferenceCheck<'_>,
  ) -> Result<()> {
    for (name, value) in &record.fields {
      let field = model.field(name).ok_or_else(|| {
        CoreError::Validation(format!("{} has no field {name}", model.name))
      })?;
      if !value.fits(field.kind) {
        return Err(
          CoreError::Validation(format!(
            "{}.{name} expects {:?}, got {value:?}",
            model.name, field.kind
          ))
          .into(),
        );
      }
    }

    for field in &model.fields {
      let Some(value) = record.get(&field.name).filter(|v| !v.is_null()) else {
        if !field.nullable {
          return Err(
            CoreError::Validation(format!(
              "{}.{} is required",
              model.name, field.name
            ))
            .into(),
          );
        }
        continue;
      };
      if check.covers(&field.name) {
        self.check_reference(model, field, value)?;
      }
    }
    Ok(())
  }

  fn check_reference(&self, model: &ModelDef, field: &FieldDef, value: &Value) -> Result<()> {
    let Some(target) = field.references.as_deref() else {
      return Ok(());
    };
    let target = self.schema.model(target)?;
    let query = Query::new(&target.name)
      .filter(Filter::eq(target.identity_column(), value.clone()))?;
    if !read::exists_rows(self.conn, self.schema, &query)? {
      return Err(
        CoreError::Validation(format!(
          "{}.{} points at a missing {}",
          model.name, field.name, target.name
        ))
        .into(),
      );
    }
    Ok(())
  }

  fn insert(&self, model: &ModelDef, record: &Record) -> Result<i64> {
    let mut columns = vec![
      column::LOCAL_ID.to_owned(),
      column::GUID.to_owned(),
      column::STARTS_AT.to_owned(),
      column::ENDS_AT.to_owned(),
      column::DATE_CREATED.to_owned(),
    ];
    let mut params = vec![
      record.local_id.map(encode_uuid).into(),
      record.guid.clone().into(),
      record.starts_at.map(encode_dt).into(),
      SqlValue::Null,
      record.date_created.map(encode_dt).into(),
    ];
    for field in &model.fields {
      columns.push(quote(&field.name));
      params.push(to_sql(record.get(&field.name).unwrap_or(&Value::Null)));
    }

    let sql = format!(
      "INSERT INTO {} ({}) VALUES ({})",
      quote(model.table_name()),
      columns.join(", "),
      vec!["?"; params.len()].join(", "),
    );
    self
      .conn
      .execute(&sql, params_from_iter(params.iter()))
      .map_err(|e| constraint_error(e, model))?;
    Ok(self.conn.last_insert_rowid())
  }

  /// Close the active rows of `model` whose `column` is in `values`.
  pub fn close_where_in(
    &self,
    model: &ModelDef,
    column: &str,
    values: &[SqlValue],
  ) -> Result<usize> {
    let now = SqlValue::Text(encode_dt(self.now));
    let mut closed = 0;
    for chunk in values.chunks(CHUNK) {
      let sql = format!(
        "UPDATE {} SET {ends} = ? WHERE {} IN ({}) AND {ends} IS NULL",
        quote(model.table_name()),
        quote(column),
        vec!["?"; chunk.len()].join(", "),
        ends = column::ENDS_AT,
      );
      let params = std::iter::once(&now).chain(chunk);
      closed += self.conn.execute(&sql, params_from_iter(params))?;
    }
    Ok(closed)
  }

  // ─── Update ───────────────────────────────────────────────────────────────

  /// Close every active row matching `query` and insert a copy with
  /// `changes` applied.
  pub fn update(&self, query: &Query, changes: &Changes) -> Result<Vec<Record>> {
    let model = self.versioned_model(query.model())?;
    if let Some(name) = changes.keys().find(|k| column::is_reserved(k)) {
      return Err(
        CoreError::Validation(format!("{name} is managed by the store")).into(),
      );
    }

    let rows = self.select_active(query)?;
    if rows.is_empty() {
      debug!(model = %model.name, "update matched no active rows");
      return Ok(Vec::new());
    }
    let copies = rows
      .into_iter()
      .map(|mut row| {
        row.fields.extend(changes.clone());
        row
      })
      .collect();
    let saved = self.create(copies, ReferenceCheck::Changed(changes))?;
    info!(model = %model.name, rows = saved.len(), "updated");
    Ok(saved)
  }

  // ─── Delete ───────────────────────────────────────────────────────────────

  /// Close every active row matching `query`.
  ///
  /// For entities this also closes the many-to-many link rows on either side
  /// and re-saves each distinct versioned parent the deleted rows referenced,
  /// so the parent's history records the moment a child went away. Parents
  /// are collected before anything is closed.
  pub fn delete(&self, query: &Query) -> Result<DeleteSummary> {
    let model = self.versioned_model(query.model())?;
    let rows = self.select_active(query)?;
    if rows.is_empty() {
      debug!(model = %model.name, "delete matched no active rows");
      return Ok(DeleteSummary::default());
    }

    let parents = match model.versioning {
      Versioning::Entity => cascade::collect_parents(self.schema, model, &rows),
      _ => Vec::new(),
    };

    let ids: Vec<SqlValue> =
      rows.iter().filter_map(|r| r.id).map(SqlValue::Integer).collect();
    let mut summary = DeleteSummary {
      closed: self.close_where_in(model, column::ID, &ids)?,
      ..DeleteSummary::default()
    };

    if model.versioning == Versioning::Entity {
      let local_ids: Vec<Uuid> = rows.iter().filter_map(|r| r.local_id).collect();
      summary.links_closed = cascade::close_forward_links(self, model, &local_ids)?
        + cascade::close_reverse_links(self, model, &local_ids)?;
      summary.parents_resaved = cascade::resave_parents(self, parents)?;
    }

    info!(
      model = %model.name,
      closed = summary.closed,
      links_closed = summary.links_closed,
      parents_resaved = summary.parents_resaved,
      "deleted"
    );
    Ok(summary)
  }
}

/// Map a unique-index failure on `local_id` to a consistency violation.
fn constraint_error(err: rusqlite::Error, model: &ModelDef) -> Error {
  if let rusqlite::Error::SqliteFailure(code, Some(message)) = &err
    && code.code == ErrorCode::ConstraintViolation
    && (message.contains(&format!("{}.{}", model.table_name(), column::LOCAL_ID))
      || message.contains(&active_index(model)))
  {
    return CoreError::ConsistencyViolation(format!(
      "second active row for one {} identity: {message}",
      model.name
    ))
    .into();
  }
  err.into()
}
