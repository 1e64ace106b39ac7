//! Side effects of deleting entity rows.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::types::Value as SqlValue;
use tempora_core::{
  query::{Filter, Query},
  record::Record,
  schema::{ModelDef, Schema, column},
};
use tracing::debug;
use uuid::Uuid;

use crate::{
  Result,
  encode::encode_uuid,
  mutate::{Engine, ReferenceCheck},
};

/// Distinct parent identities per versioned target model.
pub type Parents<'s> = Vec<(&'s ModelDef, BTreeSet<Uuid>)>;

/// The versioned parents `rows` point at through reference fields. Must be
/// collected before the rows are closed.
pub fn collect_parents<'s>(
  schema: &'s Schema,
  model: &'s ModelDef,
  rows: &[Record],
) -> Parents<'s> {
  let mut by_model: BTreeMap<&str, (&ModelDef, BTreeSet<Uuid>)> = BTreeMap::new();
  for (field, target) in schema.versioned_references(model) {
    let (_, ids) = by_model
      .entry(target.name.as_str())
      .or_insert_with(|| (target, BTreeSet::new()));
    ids.extend(rows.iter().filter_map(|r| r.get(&field.name)?.as_uuid()));
  }
  by_model.into_values().filter(|(_, ids)| !ids.is_empty()).collect()
}

fn uuid_values(ids: &[Uuid]) -> Vec<SqlValue> {
  ids.iter().map(|id| SqlValue::Text(encode_uuid(*id))).collect()
}

/// Close link rows of relations declared on `model` whose source is one of
/// `local_ids`.
pub fn close_forward_links(
  engine: &Engine<'_>,
  model: &ModelDef,
  local_ids: &[Uuid],
) -> Result<usize> {
  let values = uuid_values(local_ids);
  let mut closed = 0;
  for (m2m, through) in engine.schema().forward_links(model) {
    let n = engine.close_where_in(through, &m2m.source_field, &values)?;
    debug!(relation = %m2m.name, closed = n, "closed forward links");
    closed += n;
  }
  Ok(closed)
}

/// Close link rows of relations declared elsewhere whose target is one of
/// `local_ids`.
pub fn close_reverse_links(
  engine: &Engine<'_>,
  model: &ModelDef,
  local_ids: &[Uuid],
) -> Result<usize> {
  let values = uuid_values(local_ids);
  let mut closed = 0;
  for (m2m, through) in engine.schema().reverse_links(model) {
    let n = engine.close_where_in(through, &m2m.target_field, &values)?;
    debug!(relation = %m2m.name, closed = n, "closed reverse links");
    closed += n;
  }
  Ok(closed)
}

/// Re-save the currently active version of every parent. Parents that are no
/// longer active are skipped. Returns how many parents got a new version.
pub fn resave_parents(engine: &Engine<'_>, parents: Parents<'_>) -> Result<usize> {
  let mut resaved = 0;
  for (model, ids) in parents {
    let query = Query::new(&model.name)
      .filter(Filter::is_in(column::LOCAL_ID, ids))?;
    let active = engine.select_active(&query)?;
    resaved += engine.create(active, ReferenceCheck::Skip)?.len();
  }
  debug!(resaved, "re-saved parents");
  Ok(resaved)
}

#[cfg(test)]
mod tests {
  use tempora_core::schema::{FieldDef, FieldKind};

  use super::*;

  #[test]
  fn parents_are_deduplicated_per_model() {
    let schema = Schema::builder()
      .model(ModelDef::entity("block"))
      .model(
        ModelDef::entity("segment")
          .with_field(FieldDef::new("block", FieldKind::Uuid).references("block")),
      )
      .build()
      .unwrap();
    let segment = schema.model("segment").unwrap();
    let parent = Uuid::new_v4();
    let rows = vec![
      Record::new("segment").with("block", parent),
      Record::new("segment").with("block", parent),
      Record::new("segment").with("block", Uuid::new_v4()),
    ];
    let parents = collect_parents(&schema, segment, &rows);
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].0.name, "block");
    assert_eq!(parents[0].1.len(), 2);
    assert!(parents[0].1.contains(&parent));
  }
}
