//! The schema registry: which models exist, which of them are versioned, and
//! how they relate to each other.
//!
//! Every capability question the engine asks ("is this table versioned?",
//! "which fields are versioned references?", "which link tables point at this
//! model?") is answered here from the declared [`Versioning`] marker, never by
//! matching table or type names.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Reserved columns ────────────────────────────────────────────────────────

/// Column names the engine owns on every versioned table.
pub mod column {
  pub const ID: &str = "id";
  pub const LOCAL_ID: &str = "local_id";
  pub const GUID: &str = "guid";
  pub const STARTS_AT: &str = "starts_at";
  pub const ENDS_AT: &str = "ends_at";
  pub const DATE_CREATED: &str = "date_created";

  /// All reserved columns, in storage order.
  pub const RESERVED: [&str; 6] =
    [ID, LOCAL_ID, GUID, STARTS_AT, ENDS_AT, DATE_CREATED];

  /// Columns present on plain (non-versioned) tables.
  pub const PLAIN: [&str; 1] = [ID];

  pub fn is_reserved(name: &str) -> bool { RESERVED.contains(&name) }
}

// ─── Declarations ────────────────────────────────────────────────────────────

/// The capability marker deciding how a model participates in versioning.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Versioning {
  /// A versioned entity: every mutation produces a new row.
  #[default]
  Entity,
  /// A many-to-many through-table whose rows are versioned like entities.
  Link,
  /// An ordinary table (users, owners, ...). Never time-filtered.
  Plain,
}

impl Versioning {
  pub fn is_versioned(self) -> bool { !matches!(self, Self::Plain) }
}

/// Storage kind of a domain field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
  Bool,
  Integer,
  Real,
  Text,
  Uuid,
  Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
  pub name:       String,
  pub kind:       FieldKind,
  #[serde(default)]
  pub nullable:   bool,
  /// Name of the model this field points at, if it is a reference.
  #[serde(default)]
  pub references: Option<String>,
}

impl FieldDef {
  pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
    Self { name: name.into(), kind, nullable: false, references: None }
  }

  pub fn nullable(mut self) -> Self {
    self.nullable = true;
    self
  }

  pub fn references(mut self, model: impl Into<String>) -> Self {
    self.references = Some(model.into());
    self
  }
}

/// A many-to-many relation from the owning model to `target`, stored in the
/// `through` link model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManyToManyDef {
  pub name:         String,
  pub target:       String,
  pub through:      String,
  /// Link field holding the owning record's `local_id`.
  pub source_field: String,
  /// Link field holding the target record's `local_id`.
  pub target_field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDef {
  pub name:         String,
  /// Table name; defaults to the model name.
  #[serde(default)]
  pub table:        Option<String>,
  #[serde(default)]
  pub versioning:   Versioning,
  #[serde(default)]
  pub fields:       Vec<FieldDef>,
  #[serde(default)]
  pub many_to_many: Vec<ManyToManyDef>,
}

impl ModelDef {
  pub fn new(name: impl Into<String>, versioning: Versioning) -> Self {
    Self {
      name: name.into(),
      table: None,
      versioning,
      fields: Vec::new(),
      many_to_many: Vec::new(),
    }
  }

  pub fn entity(name: impl Into<String>) -> Self {
    Self::new(name, Versioning::Entity)
  }

  pub fn link(name: impl Into<String>) -> Self {
    Self::new(name, Versioning::Link)
  }

  pub fn plain(name: impl Into<String>) -> Self {
    Self::new(name, Versioning::Plain)
  }

  pub fn with_table(mut self, table: impl Into<String>) -> Self {
    self.table = Some(table.into());
    self
  }

  pub fn with_field(mut self, field: FieldDef) -> Self {
    self.fields.push(field);
    self
  }

  pub fn with_many_to_many(mut self, m2m: ManyToManyDef) -> Self {
    self.many_to_many.push(m2m);
    self
  }

  pub fn table_name(&self) -> &str {
    self.table.as_deref().unwrap_or(&self.name)
  }

  pub fn is_versioned(&self) -> bool { self.versioning.is_versioned() }

  pub fn field(&self, name: &str) -> Option<&FieldDef> {
    self.fields.iter().find(|f| f.name == name)
  }

  pub fn relation(&self, name: &str) -> Option<&ManyToManyDef> {
    self.many_to_many.iter().find(|m| m.name == name)
  }

  /// Whether `name` is a column of this model's table (reserved or domain).
  pub fn has_column(&self, name: &str) -> bool {
    let reserved: &[&str] = if self.is_versioned() {
      &column::RESERVED
    } else {
      &column::PLAIN
    };
    reserved.contains(&name) || self.field(name).is_some()
  }

  /// The column a reference to this model compares against.
  pub fn identity_column(&self) -> &'static str {
    if self.is_versioned() { column::LOCAL_ID } else { column::ID }
  }
}

// ─── Schema ──────────────────────────────────────────────────────────────────

/// An immutable, validated set of model declarations.
#[derive(Debug, Clone)]
pub struct Schema {
  models:   Vec<ModelDef>,
  by_name:  HashMap<String, usize>,
  by_table: HashMap<String, usize>,
}

/// Collects model declarations for [`Schema::new`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
  models: Vec<ModelDef>,
}

impl SchemaBuilder {
  pub fn model(mut self, model: ModelDef) -> Self {
    self.models.push(model);
    self
  }

  pub fn build(self) -> Result<Schema> { Schema::new(self.models) }
}

impl Schema {
  pub fn builder() -> SchemaBuilder { SchemaBuilder::default() }

  /// Validate `models` and build the registry.
  pub fn new(models: Vec<ModelDef>) -> Result<Self> {
    let mut by_name = HashMap::new();
    let mut by_table = HashMap::new();

    for (idx, model) in models.iter().enumerate() {
      if by_name.insert(model.name.clone(), idx).is_some() {
        return Err(Error::Schema(format!(
          "model {:?} declared twice",
          model.name
        )));
      }
      if by_table.insert(model.table_name().to_owned(), idx).is_some() {
        return Err(Error::Schema(format!(
          "table {:?} declared twice",
          model.table_name()
        )));
      }

      let mut seen = HashSet::new();
      for field in &model.fields {
        if column::is_reserved(&field.name) {
          return Err(Error::Schema(format!(
            "{}.{} collides with a reserved column",
            model.name, field.name
          )));
        }
        if !seen.insert(field.name.as_str()) {
          return Err(Error::Schema(format!(
            "{}.{} declared twice",
            model.name, field.name
          )));
        }
      }
    }

    let schema = Self { models, by_name, by_table };
    for model in &schema.models {
      schema.check_references(model)?;
      schema.check_relations(model)?;
    }
    Ok(schema)
  }

  fn check_references(&self, model: &ModelDef) -> Result<()> {
    for field in &model.fields {
      let Some(target) = &field.references else { continue };
      let target = self.get(target).ok_or_else(|| {
        Error::Schema(format!(
          "{}.{} references unknown model {target:?}",
          model.name, field.name
        ))
      })?;
      let expected = if target.is_versioned() {
        FieldKind::Uuid
      } else {
        FieldKind::Integer
      };
      if field.kind != expected {
        return Err(Error::Schema(format!(
          "{}.{} references {} and must have kind {expected:?}",
          model.name, field.name, target.name
        )));
      }
    }
    Ok(())
  }

  fn check_relations(&self, model: &ModelDef) -> Result<()> {
    if !model.many_to_many.is_empty() && model.versioning != Versioning::Entity
    {
      return Err(Error::Schema(format!(
        "only versioned entities may declare many-to-many relations ({})",
        model.name
      )));
    }

    for m2m in &model.many_to_many {
      let fail = |why: &str| {
        Error::Schema(format!("{}.{}: {why}", model.name, m2m.name))
      };
      if model.field(&m2m.name).is_some() {
        return Err(fail("relation name collides with a field"));
      }
      if !self.get(&m2m.target).is_some_and(ModelDef::is_versioned) {
        return Err(fail("target must be a versioned model"));
      }
      let through = self
        .get(&m2m.through)
        .ok_or_else(|| fail("unknown through model"))?;
      if through.versioning != Versioning::Link {
        return Err(fail("through model must be a link model"));
      }
      let points_at = |field: &str, target: &str| {
        through
          .field(field)
          .and_then(|f| f.references.as_deref())
          .is_some_and(|r| r == target)
      };
      if !points_at(&m2m.source_field, &model.name) {
        return Err(fail("source_field must reference the owning model"));
      }
      if !points_at(&m2m.target_field, &m2m.target) {
        return Err(fail("target_field must reference the target model"));
      }
    }
    Ok(())
  }

  pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
    self.models.iter()
  }

  pub fn get(&self, name: &str) -> Option<&ModelDef> {
    self.by_name.get(name).map(|&i| &self.models[i])
  }

  /// Like [`Schema::get`], but an unknown name is an error.
  pub fn model(&self, name: &str) -> Result<&ModelDef> {
    self
      .get(name)
      .ok_or_else(|| Error::UnknownModel(name.to_owned()))
  }

  pub fn model_for_table(&self, table: &str) -> Option<&ModelDef> {
    self.by_table.get(table).map(|&i| &self.models[i])
  }

  pub fn is_versioned(&self, name: &str) -> bool {
    self.get(name).is_some_and(ModelDef::is_versioned)
  }

  /// Fields of `model` that point at a versioned model.
  pub fn versioned_references<'a>(
    &'a self,
    model: &'a ModelDef,
  ) -> impl Iterator<Item = (&'a FieldDef, &'a ModelDef)> + 'a {
    model.fields.iter().filter_map(move |f| {
      let target = self.get(f.references.as_deref()?)?;
      target.is_versioned().then_some((f, target))
    })
  }

  /// Many-to-many relations declared on `model` itself.
  pub fn forward_links<'a>(
    &'a self,
    model: &'a ModelDef,
  ) -> impl Iterator<Item = (&'a ManyToManyDef, &'a ModelDef)> + 'a {
    model.many_to_many.iter().filter_map(move |m| {
      let through = self.get(&m.through)?;
      (through.versioning == Versioning::Link).then_some((m, through))
    })
  }

  /// Many-to-many relations declared on other models that target `model`.
  pub fn reverse_links<'a>(
    &'a self,
    model: &'a ModelDef,
  ) -> impl Iterator<Item = (&'a ManyToManyDef, &'a ModelDef)> + 'a {
    self
      .models
      .iter()
      .flat_map(move |owner| self.forward_links(owner))
      .filter(move |(m, _)| m.target == model.name)
  }

  /// Models with a reference field pointing at `model`.
  pub fn referencing<'a>(
    &'a self,
    model: &'a ModelDef,
  ) -> impl Iterator<Item = (&'a ModelDef, &'a FieldDef)> + 'a {
    self.models.iter().flat_map(move |m| {
      m.fields
        .iter()
        .filter(move |f| f.references.as_deref() == Some(model.name.as_str()))
        .map(move |f| (m, f))
    })
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  /// Blocks contain segments; channels belong to channel groups through a
  /// versioned link table; blocks have a plain owner.
  pub(crate) fn ephys() -> Schema {
    Schema::builder()
      .model(
        ModelDef::plain("owner")
          .with_field(FieldDef::new("username", FieldKind::Text)),
      )
      .model(
        ModelDef::entity("block")
          .with_field(FieldDef::new("name", FieldKind::Text))
          .with_field(
            FieldDef::new("owner", FieldKind::Integer)
              .nullable()
              .references("owner"),
          ),
      )
      .model(
        ModelDef::entity("segment")
          .with_field(FieldDef::new("name", FieldKind::Text))
          .with_field(FieldDef::new("block", FieldKind::Uuid).references("block")),
      )
      .model(
        ModelDef::entity("channel_group")
          .with_field(FieldDef::new("name", FieldKind::Text)),
      )
      .model(
        ModelDef::entity("channel")
          .with_field(FieldDef::new("name", FieldKind::Text))
          .with_many_to_many(ManyToManyDef {
            name:         "groups".into(),
            target:       "channel_group".into(),
            through:      "channel_groups".into(),
            source_field: "channel".into(),
            target_field: "group".into(),
          }),
      )
      .model(
        ModelDef::link("channel_groups")
          .with_field(
            FieldDef::new("channel", FieldKind::Uuid).references("channel"),
          )
          .with_field(
            FieldDef::new("group", FieldKind::Uuid).references("channel_group"),
          ),
      )
      .build()
      .unwrap()
  }

  #[test]
  fn classification_follows_markers() {
    let schema = ephys();
    assert!(schema.is_versioned("block"));
    assert!(schema.is_versioned("channel_groups"));
    assert!(!schema.is_versioned("owner"));

    let segment = schema.model("segment").unwrap();
    let refs: Vec<_> = schema
      .versioned_references(segment)
      .map(|(f, t)| (f.name.as_str(), t.name.as_str()))
      .collect();
    assert_eq!(refs, [("block", "block")]);

    // A plain reference is not a versioned reference.
    let block = schema.model("block").unwrap();
    assert_eq!(schema.versioned_references(block).count(), 0);

    let channel = schema.model("channel").unwrap();
    let group = schema.model("channel_group").unwrap();
    assert_eq!(schema.forward_links(channel).count(), 1);
    assert_eq!(schema.reverse_links(group).count(), 1);
    assert_eq!(schema.reverse_links(channel).count(), 0);
  }

  #[test]
  fn reference_kind_must_match_target() {
    let err = Schema::builder()
      .model(ModelDef::entity("block"))
      .model(
        ModelDef::entity("segment")
          .with_field(FieldDef::new("block", FieldKind::Integer).references("block")),
      )
      .build()
      .unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
  }

  #[test]
  fn reserved_field_names_rejected() {
    let err = Schema::builder()
      .model(
        ModelDef::entity("block")
          .with_field(FieldDef::new("guid", FieldKind::Text)),
      )
      .build()
      .unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
  }

  #[test]
  fn through_model_must_be_a_link() {
    let err = Schema::builder()
      .model(ModelDef::entity("group"))
      .model(
        ModelDef::entity("channel").with_many_to_many(ManyToManyDef {
          name:         "groups".into(),
          target:       "group".into(),
          through:      "channel_groups".into(),
          source_field: "channel".into(),
          target_field: "group".into(),
        }),
      )
      .model(
        ModelDef::entity("channel_groups")
          .with_field(FieldDef::new("channel", FieldKind::Uuid).references("channel"))
          .with_field(FieldDef::new("group", FieldKind::Uuid).references("group")),
      )
      .build()
      .unwrap_err();
    assert!(matches!(err, Error::Schema(msg) if msg.contains("link model")));
  }
}
