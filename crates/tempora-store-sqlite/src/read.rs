//! Synchronous read helpers run inside `tokio_rusqlite::Connection::call`.
//!
//! Each helper compiles the query, injects valid-time predicates, renders it,
//! and executes it against the connection or transaction it is handed. The
//! mutation engine reads through the same functions so a write sees exactly
//! what a read would.

use rusqlite::{Connection, OptionalExtension, params_from_iter};
use tempora_core::{
  inject::{Projection, QueryContext, inject},
  query::{Filter, Query},
  record::Record,
  schema::{ModelDef, Schema, column},
};
use tracing::{debug, warn};

use crate::{
  Result,
  encode::RawRow,
  sql::{self, Statement, quote},
};

/// Whether the temporal predicate injector runs before rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injection {
  Temporal,
  /// Read every version, e.g. for GUID lookups and history.
  AllVersions,
}

fn prepare(
  schema: &Schema,
  query: &Query,
  projection: Projection,
  injection: Injection,
) -> Result<Statement> {
  let ctx = QueryContext::compile(schema, query, projection)?;
  let query = match injection {
    Injection::Temporal => inject(query, &ctx),
    Injection::AllVersions => ctx.lowered(query),
  };
  let stmt = match projection {
    Projection::Rows => sql::select(&query, &ctx)?,
    Projection::Count => sql::count(&query, &ctx)?,
    Projection::Exists => sql::exists(&query, &ctx)?,
  };
  debug!(sql = %stmt.sql, params = stmt.params.len(), "prepared statement");
  Ok(stmt)
}

/// Raw rows of the query's root model.
pub fn select_rows(
  conn: &Connection,
  schema: &Schema,
  query: &Query,
  injection: Injection,
) -> Result<Vec<RawRow>> {
  let model = schema.model(query.model())?;
  let width = sql::select_columns(model).len();
  let stmt = prepare(schema, query, Projection::Rows, injection)?;
  let mut prepared = conn.prepare(&stmt.sql)?;
  let rows = prepared
    .query_map(params_from_iter(stmt.params.iter()), |row| {
      RawRow::read(row, width)
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Decoded records, tagged with the query's `at_time`.
pub fn select_records(
  conn: &Connection,
  schema: &Schema,
  query: &Query,
  injection: Injection,
) -> Result<Vec<Record>> {
  let model = schema.model(query.model())?;
  select_rows(conn, schema, query, injection)?
    .into_iter()
    .map(|raw| raw.into_record(model, query.at_time()))
    .collect()
}

/// Row count after injection. An unfiltered count gets a trivial root
/// predicate first: the count projection does not reference the root table
/// by itself, and without a reference the root would not be time-filtered.
pub fn count_rows(conn: &Connection, schema: &Schema, query: &Query) -> Result<u64> {
  let query = if query.predicate().is_all() {
    let (limit, offset) = query.limits();
    query
      .clear_limits()
      .filter(Filter::gt(column::ID, 0))?
      .with_limits(limit, offset)
  } else {
    query.clone()
  };
  let stmt = prepare(schema, &query, Projection::Count, Injection::Temporal)?;
  let n: i64 = conn.query_row(&stmt.sql, params_from_iter(stmt.params.iter()), |row| {
    row.get(0)
  })?;
  Ok(u64::try_from(n).unwrap_or_default())
}

/// Whether any currently active root row matches. `at_time` is ignored.
pub fn exists_rows(conn: &Connection, schema: &Schema, query: &Query) -> Result<bool> {
  let model = schema.model(query.model())?;
  let (limit, offset) = query.limits();
  let mut current = query.now().clear_limits();
  if model.is_versioned() {
    current = current.active()?;
  }
  let current = current.with_limits(limit, offset);
  let stmt = prepare(schema, &current, Projection::Exists, Injection::Temporal)?;
  let found: bool = conn.query_row(&stmt.sql, params_from_iter(stmt.params.iter()), |row| {
    row.get(0)
  })?;
  Ok(found)
}

/// Row ids of a plain model.
pub fn select_ids(conn: &Connection, schema: &Schema, query: &Query) -> Result<Vec<i64>> {
  select_records(conn, schema, query, Injection::Temporal)?
    .into_iter()
    .map(|r| {
      r.id.ok_or_else(|| crate::Error::Decode(format!("{} row without id", r.model)))
    })
    .collect()
}

/// Scan `model` for identities with more than one active row, or with two
/// versions whose intervals overlap. Returns the first offending `local_id`.
pub fn find_inconsistency(conn: &Connection, model: &ModelDef) -> Result<Option<String>> {
  if !model.is_versioned() {
    return Ok(None);
  }
  let table = quote(model.table_name());

  let duplicated: Option<String> = conn
    .query_row(
      &format!(
        "SELECT local_id FROM {table} WHERE ends_at IS NULL \
         GROUP BY local_id HAVING COUNT(*) > 1 LIMIT 1"
      ),
      [],
      |row| row.get(0),
    )
    .optional()?;
  if let Some(local_id) = duplicated {
    warn!(model = %model.name, %local_id, "multiple active rows");
    return Ok(Some(local_id));
  }

  // Open intervals compare against a sentinel that sorts after any stored
  // timestamp.
  let overlapping: Option<String> = conn
    .query_row(
      &format!(
        "SELECT a.local_id FROM {table} AS a JOIN {table} AS b \
         ON a.local_id = b.local_id AND a.id < b.id \
         WHERE a.starts_at < COALESCE(b.ends_at, '~') \
         AND b.starts_at < COALESCE(a.ends_at, '~') LIMIT 1"
      ),
      [],
      |row| row.get(0),
    )
    .optional()?;
  if let Some(local_id) = &overlapping {
    warn!(model = %model.name, %local_id, "overlapping version intervals");
  }
  Ok(overlapping)
}
