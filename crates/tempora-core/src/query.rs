//! Query descriptors: an explicit filter AST plus the options that travel
//! with it (snapshot time, injection marker, ordering, slicing).
//!
//! A [`Query`] is an immutable value. Every transformation (`filter`, `at`,
//! `limit`, ...) returns a new descriptor carrying all of the previous state,
//! so a derived query can never lose its `at_time` or injection marker.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};

use crate::{Error, Result, schema::column, value::Value};

/// Lookup key that sets the snapshot time instead of comparing a field.
pub const AT_TIME: &str = "at_time";

/// Separator between path segments in lookup keys (`segment__block__name`).
pub const PATH_SEPARATOR: &str = "__";

// ─── Targets ─────────────────────────────────────────────────────────────────

/// One table occurrence in a compiled query. `t0` is always the root model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alias(pub usize);

impl Alias {
  pub const ROOT: Alias = Alias(0);
}

/// A correlated subquery of a compiled query. Scope 0 is the outer statement;
/// every other scope owns the joins of one condition or ordering term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope(pub usize);

impl Scope {
  pub const OUTER: Scope = Scope(0);
}

impl fmt::Display for Alias {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "t{}", self.0)
  }
}

/// What a filter node compares.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
  /// A field path from the root model. Every segment but the last follows a
  /// reference field or a many-to-many relation.
  Path(Vec<String>),
  /// A reserved column on a specific table occurrence. Produced by the
  /// temporal predicate injector.
  Column { alias: Alias, column: &'static str },
}

impl Target {
  pub fn path(key: &str) -> Self {
    Self::Path(key.split(PATH_SEPARATOR).map(str::to_owned).collect())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
  Eq,
  Ne,
  Gt,
  Gte,
  Lt,
  Lte,
  Contains,
  IContains,
  StartsWith,
  EndsWith,
}

impl Op {
  fn from_suffix(suffix: &str) -> Option<Self> {
    Some(match suffix {
      "exact" => Self::Eq,
      "ne" => Self::Ne,
      "gt" => Self::Gt,
      "gte" => Self::Gte,
      "lt" => Self::Lt,
      "lte" => Self::Lte,
      "contains" => Self::Contains,
      "icontains" => Self::IContains,
      "startswith" => Self::StartsWith,
      "endswith" => Self::EndsWith,
      _ => return None,
    })
  }
}

// ─── Filter tree ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
  /// Matches every row.
  All,
  Compare { target: Target, op: Op, value: Value },
  In { target: Target, values: Vec<Value> },
  IsNull { target: Target, is_null: bool },
  And(Vec<Filter>),
  Or(Vec<Filter>),
  Not(Box<Filter>),
  /// `filter` evaluated inside the correlated subquery `scope`. Produced by
  /// compilation for conditions beneath `Not` or `Or` that cross a join.
  Exists { scope: Scope, filter: Box<Filter> },
}

impl Filter {
  pub fn compare(path: &str, op: Op, value: impl Into<Value>) -> Self {
    Self::Compare { target: Target::path(path), op, value: value.into() }
  }

  pub fn eq(path: &str, value: impl Into<Value>) -> Self {
    Self::compare(path, Op::Eq, value)
  }

  pub fn ne(path: &str, value: impl Into<Value>) -> Self {
    Self::compare(path, Op::Ne, value)
  }

  pub fn gt(path: &str, value: impl Into<Value>) -> Self {
    Self::compare(path, Op::Gt, value)
  }

  pub fn gte(path: &str, value: impl Into<Value>) -> Self {
    Self::compare(path, Op::Gte, value)
  }

  pub fn lt(path: &str, value: impl Into<Value>) -> Self {
    Self::compare(path, Op::Lt, value)
  }

  pub fn lte(path: &str, value: impl Into<Value>) -> Self {
    Self::compare(path, Op::Lte, value)
  }

  pub fn contains(path: &str, value: impl Into<Value>) -> Self {
    Self::compare(path, Op::Contains, value)
  }

  pub fn starts_with(path: &str, value: impl Into<Value>) -> Self {
    Self::compare(path, Op::StartsWith, value)
  }

  pub fn is_null(path: &str) -> Self {
    Self::IsNull { target: Target::path(path), is_null: true }
  }

  pub fn not_null(path: &str) -> Self {
    Self::IsNull { target: Target::path(path), is_null: false }
  }

  pub fn is_in<V: Into<Value>>(
    path: &str,
    values: impl IntoIterator<Item = V>,
  ) -> Self {
    Self::In {
      target: Target::path(path),
      values: values.into_iter().map(Into::into).collect(),
    }
  }

  /// Parse one `path__op` lookup, e.g. `("segment__name__startswith", "a")`.
  /// A key without a recognised operator suffix is an equality test;
  /// `isnull` expects a boolean.
  pub fn lookup(key: &str, value: Value) -> Result<Self> {
    let mut path: Vec<String> =
      key.split(PATH_SEPARATOR).map(str::to_owned).collect();
    if path.iter().any(String::is_empty) {
      return Err(Error::InvalidLookup(format!("malformed key {key:?}")));
    }

    let last = path.last().map(String::as_str).unwrap_or_default();
    let filter = if last == "isnull" {
      path.pop();
      let Value::Bool(is_null) = value else {
        return Err(Error::InvalidLookup(format!("{key} expects a boolean")));
      };
      Self::IsNull { target: Target::Path(path.clone()), is_null }
    } else if let Some(op) = Op::from_suffix(last) {
      path.pop();
      Self::Compare { target: Target::Path(path.clone()), op, value }
    } else {
      Self::Compare { target: Target::Path(path.clone()), op: Op::Eq, value }
    };

    if path.is_empty() {
      return Err(Error::InvalidLookup(format!("{key:?} names no field")));
    }
    Ok(filter)
  }

  pub fn is_all(&self) -> bool { matches!(self, Self::All) }

  /// Conjunction. An existing `And` list is extended; `other` is kept as one
  /// node so that a sub-tree stays isolated.
  pub fn and(self, other: Filter) -> Self {
    match (self, other) {
      (Self::All, o) => o,
      (s, Self::All) => s,
      (Self::And(mut nodes), o) => {
        nodes.push(o);
        Self::And(nodes)
      }
      (s, o) => Self::And(vec![s, o]),
    }
  }

  pub fn or(self, other: Filter) -> Self {
    match (self, other) {
      (Self::Or(mut nodes), o) => {
        nodes.push(o);
        Self::Or(nodes)
      }
      (s, o) => Self::Or(vec![s, o]),
    }
  }

  pub fn negate(self) -> Self { Self::Not(Box::new(self)) }

  /// Every target in the tree, in pre-order.
  pub fn targets(&self) -> Vec<&Target> {
    let mut out = Vec::new();
    self.collect_targets(&mut out);
    out
  }

  fn collect_targets<'a>(&'a self, out: &mut Vec<&'a Target>) {
    match self {
      Self::All => {}
      Self::Compare { target, .. }
      | Self::In { target, .. }
      | Self::IsNull { target, .. } => out.push(target),
      Self::And(nodes) | Self::Or(nodes) => {
        for node in nodes {
          node.collect_targets(out);
        }
      }
      Self::Not(inner) | Self::Exists { filter: inner, .. } => {
        inner.collect_targets(out)
      }
    }
  }
}

// ─── Query ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
  pub path:       Vec<String>,
  pub descending: bool,
}

/// An immutable query descriptor over one root model.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
  model:         String,
  filter:        Filter,
  at_time:       Option<DateTime<Utc>>,
  time_injected: bool,
  scoped:        BTreeMap<Scope, Filter>,
  ordering:      Vec<Ordering>,
  limit:         Option<usize>,
  offset:        Option<usize>,
}

impl Query {
  pub fn new(model: impl Into<String>) -> Self {
    Self {
      model:         model.into(),
      filter:        Filter::All,
      at_time:       None,
      time_injected: false,
      scoped:        BTreeMap::new(),
      ordering:      Vec::new(),
      limit:         None,
      offset:        None,
    }
  }

  pub fn model(&self) -> &str { &self.model }

  pub fn predicate(&self) -> &Filter { &self.filter }

  /// The snapshot instant, or `None` for "now".
  pub fn at_time(&self) -> Option<DateTime<Utc>> { self.at_time }

  pub fn is_time_injected(&self) -> bool { self.time_injected }

  /// Extra conditions for the tables of subquery `scope`, added by injection.
  pub fn scope_predicate(&self, scope: Scope) -> Option<&Filter> {
    self.scoped.get(&scope)
  }

  pub fn ordering(&self) -> &[Ordering] { &self.ordering }

  pub fn limits(&self) -> (Option<usize>, Option<usize>) {
    (self.limit, self.offset)
  }

  pub fn is_sliced(&self) -> bool {
    self.limit.is_some() || self.offset.is_some()
  }

  /// Narrow the query. Fails once a limit or offset has been set.
  pub fn filter(&self, filter: Filter) -> Result<Self> {
    if self.is_sliced() {
      return Err(Error::Sliced);
    }
    Ok(self.and_where(filter))
  }

  pub fn exclude(&self, filter: Filter) -> Result<Self> {
    self.filter(filter.negate())
  }

  /// Narrow the query with `path__op` lookups. An `at_time` entry sets the
  /// snapshot time instead of becoming a comparison.
  pub fn filter_lookups<I, K>(&self, lookups: I) -> Result<Self>
  where
    I: IntoIterator<Item = (K, Value)>,
    K: AsRef<str>,
  {
    let mut next = self.clone();
    let mut combined = Filter::All;
    for (key, value) in lookups {
      let key = key.as_ref();
      if key == AT_TIME {
        let at = value.as_timestamp().ok_or_else(|| {
          Error::InvalidLookup(format!("{AT_TIME} expects a timestamp"))
        })?;
        next.at_time = Some(at);
      } else {
        combined = combined.and(Filter::lookup(key, value)?);
      }
    }
    if combined.is_all() {
      return Ok(next);
    }
    next.filter(combined)
  }

  /// Evaluate as of `at` instead of now.
  pub fn at(&self, at: DateTime<Utc>) -> Self {
    Self { at_time: Some(at), ..self.clone() }
  }

  /// Evaluate against the currently active rows.
  pub fn now(&self) -> Self { Self { at_time: None, ..self.clone() } }

  pub fn order_by(&self, key: &str) -> Self { self.push_ordering(key, false) }

  pub fn order_by_desc(&self, key: &str) -> Self {
    self.push_ordering(key, true)
  }

  fn push_ordering(&self, key: &str, descending: bool) -> Self {
    let mut next = self.clone();
    next.ordering.push(Ordering {
      path: key.split(PATH_SEPARATOR).map(str::to_owned).collect(),
      descending,
    });
    next
  }

  pub fn limit(&self, limit: usize) -> Self {
    Self { limit: Some(limit), ..self.clone() }
  }

  pub fn offset(&self, offset: usize) -> Self {
    Self { offset: Some(offset), ..self.clone() }
  }

  /// The same query without limit and offset.
  pub fn clear_limits(&self) -> Self {
    Self { limit: None, offset: None, ..self.clone() }
  }

  pub fn with_limits(&self, limit: Option<usize>, offset: Option<usize>) -> Self {
    Self { limit, offset, ..self.clone() }
  }

  /// Restrict the root model to its active rows.
  pub fn active(&self) -> Result<Self> {
    self.filter(Filter::is_null(column::ENDS_AT))
  }

  pub(crate) fn and_where(&self, filter: Filter) -> Self {
    Self { filter: self.filter.clone().and(filter), ..self.clone() }
  }

  pub(crate) fn with_predicate(&self, filter: Filter) -> Self {
    Self { filter, ..self.clone() }
  }

  pub(crate) fn with_scope_predicate(mut self, scope: Scope, filter: Filter) -> Self {
    self.scoped.insert(scope, filter);
    self
  }

  pub(crate) fn mark_injected(self) -> Self {
    Self { time_injected: true, ..self }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn lookup_parses_paths_and_ops() {
    let f = Filter::lookup("segment__block__name__startswith", "ab".into())
      .unwrap();
    assert_eq!(
      f,
      Filter::Compare {
        target: Target::Path(vec!["segment".into(), "block".into(), "name".into()]),
        op:     Op::StartsWith,
        value:  "ab".into(),
      }
    );

    let f = Filter::lookup("name", "x".into()).unwrap();
    assert!(matches!(f, Filter::Compare { op: Op::Eq, .. }));

    let f = Filter::lookup("ends_at__isnull", true.into()).unwrap();
    assert!(matches!(f, Filter::IsNull { is_null: true, .. }));
  }

  #[test]
  fn lookup_rejects_bad_keys() {
    assert!(Filter::lookup("gt", 1.into()).is_err());
    assert!(Filter::lookup("name____gt", 1.into()).is_err());
    assert!(Filter::lookup("name__isnull", 1.into()).is_err());
  }

  #[test]
  fn at_time_is_extracted_from_lookups() {
    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let q = Query::new("block")
      .filter_lookups([("name", Value::from("x")), (AT_TIME, at.into())])
      .unwrap();
    assert_eq!(q.at_time(), Some(at));
    assert_eq!(q.predicate(), &Filter::eq("name", "x"));
  }

  #[test]
  fn derived_queries_carry_state() {
    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let q = Query::new("block").at(at).mark_injected();
    let derived = q.filter(Filter::eq("name", "x")).unwrap().order_by("name");
    assert_eq!(derived.at_time(), Some(at));
    assert!(derived.is_time_injected());
    // The original is untouched.
    assert!(q.predicate().is_all());
  }

  #[test]
  fn sliced_queries_refuse_filters() {
    let q = Query::new("block").limit(3);
    assert!(matches!(q.filter(Filter::eq("name", "x")), Err(Error::Sliced)));
    let q = q.clear_limits().filter(Filter::eq("name", "x")).unwrap();
    assert_eq!(q.with_limits(Some(3), None).limits(), (Some(3), None));
  }

  #[test]
  fn and_keeps_subtrees_isolated() {
    let caller = Filter::eq("a", 1).or(Filter::eq("b", 2));
    let combined = Filter::All
      .and(caller.clone())
      .and(Filter::And(vec![Filter::is_null("ends_at")]));
    assert_eq!(
      combined,
      Filter::And(vec![caller, Filter::And(vec![Filter::is_null("ends_at")])])
    );
  }
}
