//! Temporal predicate injection.
//!
//! Before a query touches the database, every table occurrence it references
//! that belongs to a versioned model (entity or link) gets exactly one
//! valid-time predicate:
//!
//! - as of `T`: `starts_at <= T AND (ends_at > T OR ends_at IS NULL)`
//! - now: `ends_at IS NULL`
//!
//! The set of occurrences is discovered by compiling the query into a
//! [`QueryContext`]: field paths are walked through references and
//! many-to-many relations, and each distinct join gets its own alias. The
//! injector then maps each referenced alias back to its model through the
//! schema registry.
//!
//! Conditions in the top-level conjunction share inner joins in the outer
//! statement. A condition beneath a `Not` or an `Or` whose path crosses a join
//! is moved into a correlated subquery [`Scope`] of its own, as is an
//! ordering term that crosses a join. Each subquery carries the predicates of
//! its own tables, so negations and disjunctions are decided once per root
//! row.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::{
  Error, Result,
  query::{Alias, Filter, Op, Ordering, Query, Scope, Target},
  schema::{ModelDef, Schema, column},
};

// ─── Compilation context ─────────────────────────────────────────────────────

/// What the compiled statement selects. Only a row projection references the
/// root table by itself; aggregates reference it only through filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
  Rows,
  Count,
  Exists,
}

/// `JOIN table AS alias ON alias.column = parent.parent_column`
///
/// In a subquery scope the first join is the `FROM` table and its `ON`
/// condition correlates the subquery with the root row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
  pub scope:         Scope,
  pub alias:         Alias,
  pub table:         String,
  pub column:        String,
  pub parent:        Alias,
  pub parent_column: String,
}

/// One resolved `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
  pub scope:      Scope,
  pub alias:      Alias,
  pub column:     String,
  pub descending: bool,
}

/// Per-query compilation state: the alias registry, the joins needed to reach
/// every field path, and how often each alias is referenced.
///
/// Scoped to one query; nothing here is shared between executions.
#[derive(Debug, Clone)]
pub struct QueryContext<'s> {
  schema:     &'s Schema,
  root:       &'s ModelDef,
  tables:     BTreeMap<Alias, String>,
  refcount:   BTreeMap<Alias, usize>,
  joins:      Vec<Join>,
  join_keys:  HashMap<(Scope, Alias, String), Alias>,
  columns:    HashMap<(Scope, Vec<String>), (Alias, String)>,
  filter:     Filter,
  order:      Vec<OrderTerm>,
  last_scope: usize,
  fans_out:   bool,
}

impl<'s> QueryContext<'s> {
  /// Compile `query` far enough to know which tables it touches.
  pub fn compile(
    schema: &'s Schema,
    query: &Query,
    projection: Projection,
  ) -> Result<Self> {
    let root = schema.model(query.model())?;
    let mut ctx = Self {
      schema,
      root,
      tables: BTreeMap::from([(Alias::ROOT, root.table_name().to_owned())]),
      refcount: BTreeMap::from([(Alias::ROOT, 0)]),
      joins: Vec::new(),
      join_keys: HashMap::new(),
      columns: HashMap::new(),
      filter: Filter::All,
      order: Vec::new(),
      last_scope: 0,
      fans_out: false,
    };

    if projection == Projection::Rows {
      ctx.reference(Alias::ROOT);
    }
    ctx.filter = ctx.lower(query.predicate(), false)?;
    for ordering in query.ordering() {
      ctx.resolve_ordering(ordering)?;
    }
    Ok(ctx)
  }

  pub fn schema(&self) -> &'s Schema { self.schema }

  pub fn root(&self) -> &'s ModelDef { self.root }

  /// Every join, outer and scoped, in registration order.
  pub fn joins(&self) -> &[Join] { &self.joins }

  pub fn joins_in(&self, scope: Scope) -> impl Iterator<Item = &Join> {
    self.joins.iter().filter(move |j| j.scope == scope)
  }

  /// Subquery scopes, in the order they were opened.
  pub fn scopes(&self) -> Vec<Scope> {
    let mut scopes: Vec<Scope> = self
      .joins
      .iter()
      .map(|j| j.scope)
      .filter(|s| *s != Scope::OUTER)
      .collect();
    scopes.dedup();
    scopes
  }

  /// Whether a many-to-many join in the outer statement may multiply root
  /// rows.
  pub fn fans_out(&self) -> bool { self.fans_out }

  /// Table name of every alias, referenced or not.
  pub fn tables(&self) -> impl Iterator<Item = (Alias, &str)> {
    self.tables.iter().map(|(a, t)| (*a, t.as_str()))
  }

  /// Aliases the outer statement actually references.
  pub fn referenced(&self) -> impl Iterator<Item = (Alias, &str)> {
    let outer: Vec<Alias> = self
      .joins_in(Scope::OUTER)
      .map(|j| j.alias)
      .chain([Alias::ROOT])
      .collect();
    self.tables().filter(move |(alias, _)| {
      outer.contains(alias) && self.refcount.get(alias).is_some_and(|&n| n > 0)
    })
  }

  /// The alias and column a field path resolved to in the outer statement.
  pub fn column(&self, path: &[String]) -> Option<(Alias, &str)> {
    self.scope_column(Scope::OUTER, path)
  }

  pub fn scope_column(&self, scope: Scope, path: &[String]) -> Option<(Alias, &str)> {
    self
      .columns
      .get(&(scope, path.to_vec()))
      .map(|(a, c)| (*a, c.as_str()))
  }

  pub fn order(&self) -> &[OrderTerm] { &self.order }

  /// `query` with its filter replaced by the compiled one, in which scoped
  /// conditions are wrapped in [`Filter::Exists`].
  pub fn lowered(&self, query: &Query) -> Query {
    query.with_predicate(self.filter.clone())
  }

  fn reference(&mut self, alias: Alias) {
    *self.refcount.entry(alias).or_default() += 1;
  }

  fn next_scope(&mut self) -> Scope {
    self.last_scope += 1;
    Scope(self.last_scope)
  }

  /// Re-open a scope named by an already compiled `Exists` node.
  fn open_scope(&mut self, scope: Scope) -> Result<()> {
    if scope.0 <= self.last_scope {
      return Err(Error::InvalidLookup(format!(
        "subquery scope {} is out of order",
        scope.0
      )));
    }
    self.last_scope = scope.0;
    Ok(())
  }

  /// Whether resolving `path` from the root needs at least one join.
  fn crosses_join(&self, path: &[String]) -> bool {
    match path {
      [] => false,
      [field] => self.root.relation(field).is_some(),
      _ => true,
    }
  }

  /// Resolve every target in `filter` and return the filter to render.
  /// `nested` is set beneath `Not` and `Or`.
  fn lower(&mut self, filter: &Filter, nested: bool) -> Result<Filter> {
    Ok(match filter {
      Filter::All => Filter::All,
      Filter::And(nodes) => Filter::And(self.lower_all(nodes, nested)?),
      Filter::Or(nodes) => Filter::Or(self.lower_all(nodes, true)?),
      Filter::Not(inner) => Filter::Not(Box::new(self.lower(inner, true)?)),
      Filter::Exists { scope, filter: inner } => {
        self.open_scope(*scope)?;
        for target in inner.targets() {
          self.resolve_target(*scope, target)?;
        }
        filter.clone()
      }
      Filter::Compare { target, .. }
      | Filter::In { target, .. }
      | Filter::IsNull { target, .. } => match target {
        Target::Path(path) if nested && self.crosses_join(path) => {
          let scope = self.next_scope();
          self.resolve_target(scope, target)?;
          Filter::Exists { scope, filter: Box::new(filter.clone()) }
        }
        _ => {
          self.resolve_target(Scope::OUTER, target)?;
          filter.clone()
        }
      },
    })
  }

  fn lower_all(&mut self, nodes: &[Filter], nested: bool) -> Result<Vec<Filter>> {
    nodes.iter().map(|node| self.lower(node, nested)).collect()
  }

  /// Ordering reuses a path the outer filter already joined. Any other path
  /// that crosses a join is ordered by a scalar subquery, so root rows whose
  /// reference is null or not valid keep their place in the result.
  fn resolve_ordering(&mut self, ordering: &Ordering) -> Result<()> {
    let path = &ordering.path;
    let joined = self.columns.contains_key(&(Scope::OUTER, path.clone()));
    let scope = if self.crosses_join(path) && !joined {
      self.next_scope()
    } else {
      Scope::OUTER
    };
    let (alias, column) = self.resolve_path(scope, path)?;
    self.order.push(OrderTerm {
      scope,
      alias,
      column,
      descending: ordering.descending,
    });
    Ok(())
  }

  fn resolve_target(&mut self, scope: Scope, target: &Target) -> Result<()> {
    match target {
      Target::Path(path) => {
        let resolved = self.resolve_path(scope, path)?;
        self.columns.insert((scope, path.clone()), resolved);
        Ok(())
      }
      Target::Column { alias, .. } => {
        if !self.tables.contains_key(alias) {
          return Err(Error::InvalidLookup(format!("unknown alias {alias}")));
        }
        self.reference(*alias);
        Ok(())
      }
    }
  }

  fn resolve_path(&mut self, scope: Scope, path: &[String]) -> Result<(Alias, String)> {
    let (last, hops) = path
      .split_last()
      .ok_or_else(|| Error::InvalidLookup("empty field path".into()))?;

    let mut model = self.root;
    let mut alias = Alias::ROOT;
    self.reference(alias);
    for hop in hops {
      (model, alias) = self.hop(scope, model, alias, hop)?;
    }

    let column = if model.has_column(last) {
      last.clone()
    } else if let Some(m2m) = model.relation(last) {
      // Comparing against the relation itself compares the linked
      // local_ids; the target table is not needed.
      let through = self.schema.model(&m2m.through)?;
      alias = self.join(
        scope,
        alias,
        last,
        through,
        &m2m.source_field,
        column::LOCAL_ID,
      );
      self.fans_out |= scope == Scope::OUTER;
      m2m.target_field.clone()
    } else {
      return Err(Error::UnknownField {
        model: model.name.clone(),
        field: last.clone(),
      });
    };
    Ok((alias, column))
  }

  /// Follow one non-final path segment.
  fn hop(
    &mut self,
    scope: Scope,
    model: &'s ModelDef,
    alias: Alias,
    segment: &str,
  ) -> Result<(&'s ModelDef, Alias)> {
    if let Some(field) = model.field(segment) {
      let target = field.references.as_deref().ok_or_else(|| {
        Error::InvalidLookup(format!(
          "{}.{segment} is not a reference",
          model.name
        ))
      })?;
      let target = self.schema.model(target)?;
      let joined = self.join(
        scope,
        alias,
        segment,
        target,
        target.identity_column(),
        segment,
      );
      return Ok((target, joined));
    }

    if let Some(m2m) = model.relation(segment) {
      let through = self.schema.model(&m2m.through)?;
      let target = self.schema.model(&m2m.target)?;
      let link = self.join(
        scope,
        alias,
        segment,
        through,
        &m2m.source_field,
        column::LOCAL_ID,
      );
      let joined = self.join(
        scope,
        link,
        &m2m.target_field,
        target,
        column::LOCAL_ID,
        &m2m.target_field,
      );
      self.fans_out |= scope == Scope::OUTER;
      return Ok((target, joined));
    }

    Err(Error::UnknownField {
      model: model.name.clone(),
      field: segment.to_owned(),
    })
  }

  /// Register (or reuse) the join keyed by `(scope, parent, key)`.
  fn join(
    &mut self,
    scope: Scope,
    parent: Alias,
    key: &str,
    target: &ModelDef,
    column: &str,
    parent_column: &str,
  ) -> Alias {
    let join_key = (scope, parent, key.to_owned());
    if let Some(&alias) = self.join_keys.get(&join_key) {
      self.reference(alias);
      return alias;
    }
    let alias = Alias(self.tables.len());
    self.tables.insert(alias, target.table_name().to_owned());
    self.joins.push(Join {
      scope,
      alias,
      table: target.table_name().to_owned(),
      column: column.to_owned(),
      parent,
      parent_column: parent_column.to_owned(),
    });
    self.join_keys.insert(join_key, alias);
    self.reference(alias);
    alias
  }
}

// ─── Injection ───────────────────────────────────────────────────────────────

/// The valid-time predicate for one table occurrence.
pub fn temporal_predicate(alias: Alias, at: Option<DateTime<Utc>>) -> Filter {
  let col = |column| Target::Column { alias, column };
  match at {
    Some(at) => Filter::And(vec![
      Filter::Compare {
        target: col(column::STARTS_AT),
        op:     Op::Lte,
        value:  at.into(),
      },
      Filter::Or(vec![
        Filter::Compare {
          target: col(column::ENDS_AT),
          op:     Op::Gt,
          value:  at.into(),
        },
        Filter::IsNull { target: col(column::ENDS_AT), is_null: true },
      ]),
    ]),
    None => Filter::IsNull { target: col(column::ENDS_AT), is_null: true },
  }
}

/// Whether `table` belongs to a versioned model. Tables the registry does not
/// know are treated as non-versioned.
pub fn is_versioned_table(schema: &Schema, table: &str) -> bool {
  match schema.model_for_table(table) {
    Some(model) => model.is_versioned(),
    None => {
      tracing::debug!(table, "table not in schema; skipping time injection");
      false
    }
  }
}

fn temporal_conjunction<'a>(
  ctx: &QueryContext<'_>,
  tables: impl Iterator<Item = (Alias, &'a str)>,
  at: Option<DateTime<Utc>>,
) -> Vec<Filter> {
  tables
    .filter(|(_, table)| is_versioned_table(ctx.schema(), table))
    .map(|(alias, _)| temporal_predicate(alias, at))
    .collect()
}

/// Add valid-time predicates for every versioned table `ctx` references.
///
/// Returns the query unchanged when it is already injected. Limit and offset
/// are lifted off while the predicates are added and restored afterwards.
/// Tables of a subquery scope get their predicates on the scope, not in the
/// outer filter.
pub fn inject(query: &Query, ctx: &QueryContext<'_>) -> Query {
  if query.is_time_injected() {
    return query.clone();
  }

  let (limit, offset) = query.limits();
  let at = query.at_time();
  let mut unsliced = ctx.lowered(query).clear_limits();

  let temporal = temporal_conjunction(ctx, ctx.referenced(), at);
  let scopes = ctx.scopes();

  tracing::debug!(
    model = query.model(),
    at_time = ?at,
    tables = temporal.len(),
    subqueries = scopes.len(),
    "injecting valid-time predicates"
  );

  if !temporal.is_empty() {
    unsliced = unsliced.and_where(Filter::And(temporal));
  }
  for scope in scopes {
    let tables = ctx.joins_in(scope).map(|j| (j.alias, j.table.as_str()));
    let temporal = temporal_conjunction(ctx, tables, at);
    if !temporal.is_empty() {
      unsliced = unsliced.with_scope_predicate(scope, Filter::And(temporal));
    }
  }
  unsliced.with_limits(limit, offset).mark_injected()
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::schema::tests::ephys;

  fn injected_aliases(filter: &Filter) -> Vec<Alias> {
    filter
      .targets()
      .into_iter()
      .filter_map(|t| match t {
        Target::Column { alias, column: column::ENDS_AT } => Some(*alias),
        _ => None,
      })
      .collect()
  }

  #[test]
  fn root_table_gets_active_predicate() {
    let schema = ephys();
    let q = Query::new("segment").filter(Filter::eq("name", "s1")).unwrap();
    let ctx = QueryContext::compile(&schema, &q, Projection::Rows).unwrap();
    let out = inject(&q, &ctx);

    assert!(out.is_time_injected());
    assert_eq!(
      out.predicate(),
      &Filter::And(vec![
        Filter::eq("name", "s1"),
        Filter::And(vec![temporal_predicate(Alias::ROOT, None)]),
      ])
    );
  }

  #[test]
  fn joined_versioned_tables_are_injected() {
    let schema = ephys();
    let q = Query::new("segment")
      .filter(Filter::eq("block__name", "b1"))
      .unwrap();
    let ctx = QueryContext::compile(&schema, &q, Projection::Rows).unwrap();
    assert_eq!(ctx.joins().len(), 1);
    assert_eq!(ctx.joins()[0].column, "local_id");
    assert_eq!(ctx.column(&["block".into(), "name".into()]), Some((Alias(1), "name")));

    let out = inject(&q, &ctx);
    assert_eq!(injected_aliases(out.predicate()), [Alias(0), Alias(1)]);
  }

  #[test]
  fn plain_tables_are_skipped() {
    let schema = ephys();
    let q = Query::new("block")
      .filter(Filter::eq("owner__username", "bob"))
      .unwrap();
    let ctx = QueryContext::compile(&schema, &q, Projection::Rows).unwrap();
    assert_eq!(ctx.joins()[0].column, "id");

    let out = inject(&q, &ctx);
    assert_eq!(injected_aliases(out.predicate()), [Alias::ROOT]);
  }

  #[test]
  fn many_to_many_paths_inject_link_and_target() {
    let schema = ephys();
    let q = Query::new("channel")
      .filter(Filter::eq("groups__name", "g1"))
      .unwrap();
    let ctx = QueryContext::compile(&schema, &q, Projection::Rows).unwrap();
    assert!(ctx.fans_out());
    let tables: Vec<_> = ctx.referenced().map(|(_, t)| t.to_owned()).collect();
    assert_eq!(tables, ["channel", "channel_groups", "channel_group"]);

    let out = inject(&q, &ctx);
    assert_eq!(injected_aliases(out.predicate()), [Alias(0), Alias(1), Alias(2)]);
  }

  #[test]
  fn repeated_paths_share_one_join() {
    let schema = ephys();
    let q = Query::new("segment")
      .filter(Filter::eq("block__name", "b1"))
      .unwrap()
      .filter(Filter::starts_with("block__name", "b"))
      .unwrap()
      .order_by("block__name");
    let ctx = QueryContext::compile(&schema, &q, Projection::Rows).unwrap();
    assert_eq!(ctx.joins().len(), 1);
    assert_eq!(ctx.order()[0].scope, Scope::OUTER);
    assert_eq!(ctx.order()[0].alias, Alias(1));
  }

  #[test]
  fn negated_paths_get_their_own_scope() {
    let schema = ephys();
    let q = Query::new("channel")
      .exclude(Filter::eq("groups__name", "g1"))
      .unwrap();
    let ctx = QueryContext::compile(&schema, &q, Projection::Rows).unwrap();
    assert!(!ctx.fans_out());
    assert_eq!(ctx.joins_in(Scope::OUTER).count(), 0);
    assert_eq!(ctx.scopes(), [Scope(1)]);
    assert_eq!(
      ctx.scope_column(Scope(1), &["groups".into(), "name".into()]),
      Some((Alias(2), "name"))
    );

    let out = inject(&q, &ctx);
    let Filter::And(nodes) = out.predicate() else { panic!("expected And") };
    assert_eq!(
      nodes[0],
      Filter::Not(Box::new(Filter::Exists {
        scope:  Scope(1),
        filter: Box::new(Filter::eq("groups__name", "g1")),
      }))
    );
    assert_eq!(injected_aliases(out.predicate()), [Alias::ROOT]);
    assert_eq!(
      out.scope_predicate(Scope(1)),
      Some(&Filter::And(vec![
        temporal_predicate(Alias(1), None),
        temporal_predicate(Alias(2), None),
      ]))
    );
  }

  #[test]
  fn each_disjunct_crossing_a_join_is_scoped() {
    let schema = ephys();
    let q = Query::new("segment")
      .filter(
        Filter::eq("name", "s1")
          .or(Filter::eq("block__name", "b1"))
          .or(Filter::eq("block__name", "b2")),
      )
      .unwrap();
    let ctx = QueryContext::compile(&schema, &q, Projection::Rows).unwrap();
    assert_eq!(ctx.scopes(), [Scope(1), Scope(2)]);
    assert_eq!(ctx.column(&["name".into()]), Some((Alias::ROOT, "name")));

    let Filter::Or(nodes) = ctx.lowered(&q).predicate().clone() else {
      panic!("expected Or")
    };
    assert_eq!(nodes[0], Filter::eq("name", "s1"));
    assert!(matches!(nodes[1], Filter::Exists { scope: Scope(1), .. }));
    assert!(matches!(nodes[2], Filter::Exists { scope: Scope(2), .. }));
  }

  #[test]
  fn ordering_through_a_reference_is_scoped() {
    let schema = ephys();
    let q = Query::new("segment").order_by_desc("block__name");
    let ctx = QueryContext::compile(&schema, &q, Projection::Rows).unwrap();
    assert_eq!(ctx.joins_in(Scope::OUTER).count(), 0);
    assert_eq!(
      ctx.order(),
      [OrderTerm {
        scope:      Scope(1),
        alias:      Alias(1),
        column:     "name".into(),
        descending: true,
      }]
    );

    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let out = inject(&q.at(at), &ctx);
    assert_eq!(
      out.scope_predicate(Scope(1)),
      Some(&Filter::And(vec![temporal_predicate(Alias(1), Some(at))]))
    );
  }

  #[test]
  fn snapshot_predicate_shape() {
    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let schema = ephys();
    let q = Query::new("block").at(at).filter(Filter::eq("name", "b")).unwrap();
    let ctx = QueryContext::compile(&schema, &q, Projection::Rows).unwrap();
    let out = inject(&q, &ctx);
    let Filter::And(nodes) = out.predicate() else { panic!("expected And") };
    assert_eq!(nodes[1], Filter::And(vec![temporal_predicate(Alias::ROOT, Some(at))]));
  }

  #[test]
  fn injection_is_idempotent() {
    let schema = ephys();
    let q = Query::new("segment")
      .filter(Filter::eq("block__name", "b1"))
      .unwrap();
    let ctx = QueryContext::compile(&schema, &q, Projection::Rows).unwrap();
    let once = inject(&q, &ctx);

    let ctx2 = QueryContext::compile(&schema, &once, Projection::Rows).unwrap();
    let twice = inject(&once, &ctx2);
    assert_eq!(once, twice);
  }

  #[test]
  fn compiled_scopes_survive_recompilation() {
    let schema = ephys();
    let q = Query::new("channel")
      .exclude(Filter::eq("groups__name", "g1"))
      .unwrap()
      .order_by("groups__name");
    let ctx = QueryContext::compile(&schema, &q, Projection::Rows).unwrap();
    let once = inject(&q, &ctx);

    let ctx2 = QueryContext::compile(&schema, &once, Projection::Rows).unwrap();
    assert_eq!(ctx2.joins(), ctx.joins());
    assert_eq!(ctx2.order(), ctx.order());
    assert_eq!(ctx2.lowered(&once), once);
  }

  #[test]
  fn limits_survive_injection() {
    let schema = ephys();
    let q = Query::new("block")
      .filter(Filter::eq("name", "b"))
      .unwrap()
      .limit(5)
      .offset(2);
    let ctx = QueryContext::compile(&schema, &q, Projection::Rows).unwrap();
    let out = inject(&q, &ctx);
    assert_eq!(out.limits(), (Some(5), Some(2)));
    assert_eq!(injected_aliases(out.predicate()), [Alias::ROOT]);
  }

  #[test]
  fn unfiltered_count_references_no_table() {
    let schema = ephys();
    let q = Query::new("block");
    let ctx = QueryContext::compile(&schema, &q, Projection::Count).unwrap();
    assert_eq!(ctx.referenced().count(), 0);

    let q = q.filter(Filter::gt("id", 0)).unwrap();
    let ctx = QueryContext::compile(&schema, &q, Projection::Count).unwrap();
    assert_eq!(ctx.referenced().count(), 1);
  }

  #[test]
  fn unknown_tables_are_not_versioned() {
    assert!(!is_versioned_table(&ephys(), "auth_user"));
    assert!(is_versioned_table(&ephys(), "channel_groups"));
  }

  #[test]
  fn unknown_fields_fail_compilation() {
    let schema = ephys();
    let q = Query::new("segment").filter(Filter::eq("colour", "red")).unwrap();
    let err = QueryContext::compile(&schema, &q, Projection::Rows).unwrap_err();
    assert!(matches!(err, Error::UnknownField { .. }));

    let q = Query::new("segment").filter(Filter::eq("name__block", "x")).unwrap();
    let err = QueryContext::compile(&schema, &q, Projection::Rows).unwrap_err();
    assert!(matches!(err, Error::InvalidLookup(_)));
  }
}
