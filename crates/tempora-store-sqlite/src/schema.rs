//! DDL generated from the model registry.
//!
//! Versioned tables carry the reserved bookkeeping columns and a partial
//! unique index that allows at most one active row per `local_id`. Plain
//! tables get an integer key and their declared fields only.

use std::fmt::Write as _;

use tempora_core::schema::{FieldDef, FieldKind, ModelDef, Schema, column};

use crate::sql::quote;

pub const SCHEMA_VERSION: u32 = 1;

/// Name of the index enforcing one active row per identity.
pub fn active_index(model: &ModelDef) -> String {
  format!("{}_active_local_id", model.table_name())
}

/// The full DDL batch for `schema`. Safe to run against an existing database.
pub fn ddl(schema: &Schema) -> String {
  let mut sql = String::from("PRAGMA foreign_keys = ON;\n");
  for model in schema.models() {
    create_table(&mut sql, schema, model);
  }
  writeln!(sql, "PRAGMA user_version = {SCHEMA_VERSION};").ok();
  sql
}

fn affinity(kind: FieldKind) -> &'static str {
  match kind {
    FieldKind::Bool | FieldKind::Integer => "INTEGER",
    FieldKind::Real => "REAL",
    FieldKind::Text | FieldKind::Uuid | FieldKind::Timestamp => "TEXT",
  }
}

fn field_column(schema: &Schema, field: &FieldDef) -> String {
  let mut col = format!("{} {}", quote(&field.name), affinity(field.kind));
  if !field.nullable {
    col.push_str(" NOT NULL");
  }
  // Versioned targets are referenced by local_id, which is not unique across
  // versions, so only plain targets get a foreign key.
  if let Some(target) = field.references.as_deref().and_then(|t| schema.get(t))
    && !target.is_versioned()
  {
    write!(col, " REFERENCES {} ({})", quote(target.table_name()), column::ID)
      .ok();
  }
  col
}

fn create_table(sql: &mut String, schema: &Schema, model: &ModelDef) {
  let table = model.table_name();
  let mut columns = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", column::ID)];
  if model.is_versioned() {
    columns.extend([
      format!("{} TEXT NOT NULL", column::LOCAL_ID),
      format!("{} TEXT NOT NULL UNIQUE", column::GUID),
      format!("{} TEXT NOT NULL", column::STARTS_AT),
      format!("{} TEXT", column::ENDS_AT),
      format!("{} TEXT NOT NULL", column::DATE_CREATED),
    ]);
  }
  columns.extend(model.fields.iter().map(|f| field_column(schema, f)));
  if model.is_versioned() {
    columns.push(format!(
      "CHECK ({ends} IS NULL OR {ends} >= {starts})",
      ends = column::ENDS_AT,
      starts = column::STARTS_AT,
    ));
  }

  writeln!(
    sql,
    "CREATE TABLE IF NOT EXISTS {} (\n  {}\n);",
    quote(table),
    columns.join(",\n  ")
  )
  .ok();

  if model.is_versioned() {
    writeln!(
      sql,
      "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({}) WHERE {} IS NULL;",
      quote(&active_index(model)),
      quote(table),
      column::LOCAL_ID,
      column::ENDS_AT,
    )
    .ok();
    writeln!(
      sql,
      "CREATE INDEX IF NOT EXISTS {} ON {} ({}, {});",
      quote(&format!("{table}_local_id_starts_at")),
      quote(table),
      column::LOCAL_ID,
      column::STARTS_AT,
    )
    .ok();
    writeln!(
      sql,
      "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
      quote(&format!("{table}_ends_at")),
      quote(table),
      column::ENDS_AT,
    )
    .ok();
  }

  for field in model.fields.iter().filter(|f| f.references.is_some()) {
    writeln!(
      sql,
      "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
      quote(&format!("{table}_{}", field.name)),
      quote(table),
      quote(&field.name),
    )
    .ok();
  }
}

#[cfg(test)]
mod tests {
  use tempora_core::schema::{FieldDef, FieldKind, ModelDef, Schema};

  use super::*;

  #[test]
  fn versioned_tables_get_partial_unique_index() {
    let schema = Schema::builder()
      .model(ModelDef::plain("owner").with_field(FieldDef::new("username", FieldKind::Text)))
      .model(
        ModelDef::entity("block")
          .with_field(FieldDef::new("name", FieldKind::Text))
          .with_field(FieldDef::new("owner", FieldKind::Integer).nullable().references("owner")),
      )
      .build()
      .unwrap();
    let sql = ddl(&schema);
    assert!(sql.contains(
      "CREATE UNIQUE INDEX IF NOT EXISTS \"block_active_local_id\" ON \"block\" (local_id) WHERE ends_at IS NULL;"
    ));
    assert!(sql.contains("\"owner\" INTEGER REFERENCES \"owner\" (id)"));
    assert!(!sql.contains("\"owner_active_local_id\""));
    assert!(sql.contains("PRAGMA user_version = 1;"));
  }
}
