//! Snapshot context propagation.
//!
//! A record fetched "as of T" carries `snapshot = Some(T)`. Every query this
//! module derives from such a record is evaluated as of the same `T`, so a
//! traversal rooted at a historical snapshot never mixes in newer versions.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  Error, Result,
  query::{Filter, Query},
  record::Record,
  schema::{ManyToManyDef, ModelDef, Schema, column},
  value::Value,
};

/// Tag `record` with the instant it was fetched at.
pub fn tag(mut record: Record, at: Option<DateTime<Utc>>) -> Record {
  record.snapshot = at;
  record
}

fn scoped(query: Query, record: &Record) -> Query {
  match record.snapshot {
    Some(at) => query.at(at),
    None => query,
  }
}

/// The value other records use to point at `record`.
fn identity_of(model: &ModelDef, record: &Record) -> Result<Value> {
  let identity = if model.is_versioned() {
    record.local_id.map(Value::Uuid)
  } else {
    record.id.map(Value::Integer)
  };
  identity.ok_or_else(|| {
    Error::Validation(format!("{} record has not been saved", model.name))
  })
}

/// The query resolving `record.<field>`, or `None` when the field is null.
pub fn reference_query(
  schema: &Schema,
  record: &Record,
  field: &str,
) -> Result<Option<Query>> {
  let model = schema.model(&record.model)?;
  let def = model.field(field).ok_or_else(|| Error::UnknownField {
    model: model.name.clone(),
    field: field.to_owned(),
  })?;
  let target = def.references.as_deref().ok_or_else(|| {
    Error::InvalidLookup(format!("{}.{field} is not a reference", model.name))
  })?;
  let target = schema.model(target)?;

  let value = record.get(field).cloned().unwrap_or(Value::Null);
  if value.is_null() {
    return Ok(None);
  }
  let query =
    Query::new(&target.name).filter(Filter::eq(target.identity_column(), value))?;
  Ok(Some(scoped(query, record)))
}

/// The query for `child_model` records whose `field` points at `record`.
pub fn children_query(
  schema: &Schema,
  record: &Record,
  child_model: &str,
  field: &str,
) -> Result<Query> {
  let parent = schema.model(&record.model)?;
  let child = schema.model(child_model)?;
  let points_here = child
    .field(field)
    .and_then(|f| f.references.as_deref())
    .is_some_and(|target| target == parent.name);
  if !points_here {
    return Err(Error::InvalidLookup(format!(
      "{child_model}.{field} does not reference {}",
      parent.name
    )));
  }

  let query =
    Query::new(child_model).filter(Filter::eq(field, identity_of(parent, record)?))?;
  Ok(scoped(query, record))
}

/// The query for the link rows of `relation` owned by `record`.
pub fn link_query<'s>(
  schema: &'s Schema,
  record: &Record,
  relation: &str,
) -> Result<(Query, &'s ManyToManyDef)> {
  let model = schema.model(&record.model)?;
  let m2m = model.relation(relation).ok_or_else(|| Error::UnknownField {
    model: model.name.clone(),
    field: relation.to_owned(),
  })?;
  let query = Query::new(&m2m.through)
    .filter(Filter::eq(&m2m.source_field, identity_of(model, record)?))?;
  Ok((scoped(query, record), m2m))
}

/// The query for the targets of `m2m` with the given `local_id`s, evaluated
/// at `record`'s snapshot.
pub fn targets_query(
  m2m: &ManyToManyDef,
  local_ids: impl IntoIterator<Item = Uuid>,
  record: &Record,
) -> Result<Query> {
  let query = Query::new(&m2m.target)
    .filter(Filter::is_in(column::LOCAL_ID, local_ids))?;
  Ok(scoped(query, record))
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::schema::tests::ephys;

  fn saved(model: &str) -> Record {
    let mut r = Record::new(model);
    r.local_id = Some(Uuid::new_v4());
    r.guid = Some("g".into());
    r
  }

  #[test]
  fn reference_query_inherits_snapshot() {
    let schema = ephys();
    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let block = Uuid::new_v4();
    let segment = tag(saved("segment").with("block", block), Some(at));

    let q = reference_query(&schema, &segment, "block").unwrap().unwrap();
    assert_eq!(q.model(), "block");
    assert_eq!(q.at_time(), Some(at));
    assert_eq!(q.predicate(), &Filter::eq("local_id", block));
  }

  #[test]
  fn current_records_traverse_now() {
    let schema = ephys();
    let segment = saved("segment").with("block", Uuid::new_v4());
    let q = reference_query(&schema, &segment, "block").unwrap().unwrap();
    assert_eq!(q.at_time(), None);
  }

  #[test]
  fn null_reference_yields_no_query() {
    let schema = ephys();
    let block = saved("block").with("owner", Value::Null);
    assert!(reference_query(&schema, &block, "owner").unwrap().is_none());
  }

  #[test]
  fn plain_reference_compares_row_id() {
    let schema = ephys();
    let block = saved("block").with("owner", 7);
    let q = reference_query(&schema, &block, "owner").unwrap().unwrap();
    assert_eq!(q.predicate(), &Filter::eq("id", 7));
  }

  #[test]
  fn children_query_checks_direction() {
    let schema = ephys();
    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let block = tag(saved("block"), Some(at));
    let q = children_query(&schema, &block, "segment", "block").unwrap();
    assert_eq!(q.at_time(), Some(at));

    let err = children_query(&schema, &block, "channel", "name").unwrap_err();
    assert!(matches!(err, Error::InvalidLookup(_)));
  }

  #[test]
  fn link_and_target_queries_share_snapshot() {
    let schema = ephys();
    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let channel = tag(saved("channel"), Some(at));
    let (links, m2m) = link_query(&schema, &channel, "groups").unwrap();
    assert_eq!(links.model(), "channel_groups");
    assert_eq!(links.at_time(), Some(at));

    let targets = targets_query(m2m, [Uuid::nil()], &channel).unwrap();
    assert_eq!(targets.model(), "channel_group");
    assert_eq!(targets.at_time(), Some(at));
  }
}
