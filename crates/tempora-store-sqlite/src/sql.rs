//! Rendering of compiled, injected queries into SQLite statements.
//!
//! Every identifier is quoted and every value is bound as a parameter.
//! Callers pass the [`QueryContext`] the query was compiled into; its outer
//! joins become the `FROM` clause and its resolved paths name the columns.
//! A subquery scope renders as a correlated `EXISTS` in the filter, or as a
//! scalar subquery in `ORDER BY`.

use std::fmt::Write as _;

use rusqlite::types::Value as SqlValue;
use tempora_core::{
  inject::{Join, OrderTerm, QueryContext},
  query::{Alias, Filter, Op, Query, Scope, Target},
  schema::{ModelDef, column},
  value::Value,
};

use crate::{Result, encode::to_sql};

/// A rendered statement and its positional parameters.
#[derive(Debug, Clone)]
pub struct Statement {
  pub sql:    String,
  pub params: Vec<SqlValue>,
}

pub fn quote(ident: &str) -> String {
  format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Columns read for a row of `model`, in the order `RawRow` decodes them.
pub fn select_columns(model: &ModelDef) -> Vec<&str> {
  let reserved: &[&str] = if model.is_versioned() {
    &column::RESERVED
  } else {
    &column::PLAIN
  };
  reserved
    .iter()
    .copied()
    .chain(model.fields.iter().map(|f| f.name.as_str()))
    .collect()
}

/// `SELECT` the root model's columns.
pub fn select(query: &Query, ctx: &QueryContext<'_>) -> Result<Statement> {
  let root = ctx.root();
  let distinct = if ctx.fans_out() { "DISTINCT " } else { "" };
  let columns = select_columns(root)
    .into_iter()
    .map(|c| qualified(Alias::ROOT, c))
    .collect::<Vec<_>>()
    .join(", ");

  let mut w = Writer::new(ctx, query);
  write!(w.sql, "SELECT {distinct}{columns}").ok();
  w.from_clause();
  w.where_clause()?;
  w.order_clause()?;
  w.limit_clause();
  Ok(w.finish())
}

/// Count the distinct root rows the query selects.
pub fn count(query: &Query, ctx: &QueryContext<'_>) -> Result<Statement> {
  let mut w = Writer::new(ctx, query);
  write!(
    w.sql,
    "SELECT COUNT(*) FROM (SELECT DISTINCT {}",
    qualified(Alias::ROOT, column::ID)
  )
  .ok();
  w.from_clause();
  w.where_clause()?;
  w.limit_clause();
  w.sql.push(')');
  Ok(w.finish())
}

/// `SELECT EXISTS (...)` over the query.
pub fn exists(query: &Query, ctx: &QueryContext<'_>) -> Result<Statement> {
  let mut w = Writer::new(ctx, query);
  w.sql.push_str("SELECT EXISTS (SELECT 1");
  w.from_clause();
  w.where_clause()?;
  w.limit_clause();
  w.sql.push(')');
  Ok(w.finish())
}

fn qualified(alias: Alias, column: &str) -> String {
  format!("{}.{}", quote(&alias.to_string()), quote(column))
}

fn comparison_symbol(op: Op) -> Option<&'static str> {
  Some(match op {
    Op::Eq => "=",
    Op::Ne => "<>",
    Op::Gt => ">",
    Op::Gte => ">=",
    Op::Lt => "<",
    Op::Lte => "<=",
    _ => return None,
  })
}

fn placeholders(n: usize) -> String { vec!["?"; n].join(", ") }

/// `LIKE` pattern matching `s` anywhere, with wildcards in `s` escaped.
fn like_contains(s: &str) -> String {
  let mut escaped = String::with_capacity(s.len() + 2);
  escaped.push('%');
  for c in s.chars() {
    if matches!(c, '%' | '_' | '\\') {
      escaped.push('\\');
    }
    escaped.push(c);
  }
  escaped.push('%');
  escaped
}

fn invalid(message: String) -> crate::Error {
  tempora_core::Error::InvalidLookup(message).into()
}

struct Writer<'c, 's> {
  ctx:    &'c QueryContext<'s>,
  query:  &'c Query,
  /// Scope in which path targets are looked up.
  scope:  Scope,
  sql:    String,
  params: Vec<SqlValue>,
}

impl<'c, 's> Writer<'c, 's> {
  fn new(ctx: &'c QueryContext<'s>, query: &'c Query) -> Self {
    Self {
      ctx,
      query,
      scope: Scope::OUTER,
      sql: String::new(),
      params: Vec::new(),
    }
  }

  fn finish(self) -> Statement {
    Statement { sql: self.sql, params: self.params }
  }

  fn from_clause(&mut self) {
    let ctx = self.ctx;
    let root = ctx.root().table_name();
    write!(self.sql, " FROM {} AS {}", quote(root), quote("t0")).ok();
    for join in ctx.joins_in(Scope::OUTER) {
      self.join(join);
    }
  }

  fn join(&mut self, join: &Join) {
    write!(
      self.sql,
      " JOIN {} AS {} ON {} = {}",
      quote(&join.table),
      quote(&join.alias.to_string()),
      qualified(join.alias, &join.column),
      qualified(join.parent, &join.parent_column),
    )
    .ok();
  }

  /// `FROM` and `WHERE` of a subquery scope: its first join is the `FROM`
  /// table, correlated with the outer row, and its injected predicate
  /// follows the correlation.
  fn scope_body(&mut self, scope: Scope) -> Result<()> {
    let (ctx, query) = (self.ctx, self.query);
    let mut joins = ctx.joins_in(scope);
    let first = joins
      .next()
      .ok_or_else(|| invalid(format!("subquery scope {} joins no table", scope.0)))?;
    write!(
      self.sql,
      " FROM {} AS {}",
      quote(&first.table),
      quote(&first.alias.to_string())
    )
    .ok();
    for join in joins {
      self.join(join);
    }
    write!(
      self.sql,
      " WHERE {} = {}",
      qualified(first.alias, &first.column),
      qualified(first.parent, &first.parent_column),
    )
    .ok();
    if let Some(predicate) = query.scope_predicate(scope) {
      self.sql.push_str(" AND ");
      self.filter(predicate)?;
    }
    Ok(())
  }

  fn exists_subquery(&mut self, scope: Scope, filter: &Filter) -> Result<()> {
    self.sql.push_str("EXISTS (SELECT 1");
    self.scope_body(scope)?;
    self.sql.push_str(" AND ");
    let outer = std::mem::replace(&mut self.scope, scope);
    let rendered = self.filter(filter);
    self.scope = outer;
    rendered?;
    self.sql.push(')');
    Ok(())
  }

  fn where_clause(&mut self) -> Result<()> {
    let query = self.query;
    let filter = query.predicate();
    if filter.is_all() {
      return Ok(());
    }
    self.sql.push_str(" WHERE ");
    self.filter(filter)
  }

  fn order_clause(&mut self) -> Result<()> {
    let ctx = self.ctx;
    self.sql.push_str(" ORDER BY ");
    for term in ctx.order() {
      self.order_term(term)?;
      self.sql.push_str(", ");
    }
    if ctx.root().is_versioned() {
      write!(self.sql, "{}, ", qualified(Alias::ROOT, column::STARTS_AT)).ok();
    }
    self.sql.push_str(&qualified(Alias::ROOT, column::ID));
    Ok(())
  }

  /// A scoped term sorts by the first value its subquery yields in the same
  /// direction, e.g. the smallest linked name for an ascending many-to-many
  /// ordering.
  fn order_term(&mut self, term: &OrderTerm) -> Result<()> {
    let col = qualified(term.alias, &term.column);
    let dir = if term.descending { " DESC" } else { "" };
    if term.scope == Scope::OUTER {
      write!(self.sql, "{col}{dir}").ok();
      return Ok(());
    }
    write!(self.sql, "(SELECT {col}").ok();
    self.scope_body(term.scope)?;
    write!(self.sql, " ORDER BY {col}{dir} LIMIT 1){dir}").ok();
    Ok(())
  }

  fn limit_clause(&mut self) {
    match self.query.limits() {
      (None, None) => {}
      (limit, offset) => {
        // SQLite treats a negative limit as unbounded.
        let limit = limit.map_or(-1, |l| l as i64);
        self.sql.push_str(" LIMIT ? OFFSET ?");
        self.params.push(SqlValue::Integer(limit));
        self.params.push(SqlValue::Integer(offset.unwrap_or(0) as i64));
      }
    }
  }

  fn column(&self, path: &[String]) -> Result<(Alias, &'c str)> {
    self.ctx.scope_column(self.scope, path).ok_or_else(|| {
      invalid(format!("field path {} was not compiled", path.join("__")))
    })
  }

  fn target(&self, target: &Target) -> Result<String> {
    Ok(match target {
      Target::Path(path) => {
        let (alias, col) = self.column(path)?;
        qualified(alias, col)
      }
      Target::Column { alias, column } => qualified(*alias, column),
    })
  }

  fn bind(&mut self, value: &Value) { self.params.push(to_sql(value)); }

  fn filter(&mut self, filter: &Filter) -> Result<()> {
    match filter {
      Filter::All => self.sql.push_str("1 = 1"),
      Filter::Compare { target, op, value } => {
        let col = self.target(target)?;
        self.compare(&col, *op, value)?;
      }
      Filter::In { target, values } => {
        if values.is_empty() {
          self.sql.push_str("0 = 1");
        } else {
          let col = self.target(target)?;
          write!(self.sql, "{col} IN ({})", placeholders(values.len())).ok();
          for value in values {
            self.bind(value);
          }
        }
      }
      Filter::IsNull { target, is_null } => {
        let col = self.target(target)?;
        let not = if *is_null { "" } else { "NOT " };
        write!(self.sql, "{col} IS {not}NULL").ok();
      }
      Filter::And(nodes) => self.junction(nodes, " AND ", "1 = 1")?,
      Filter::Or(nodes) => self.junction(nodes, " OR ", "0 = 1")?,
      Filter::Not(inner) => {
        self.sql.push_str("NOT (");
        self.filter(inner)?;
        self.sql.push(')');
      }
      Filter::Exists { scope, filter } => self.exists_subquery(*scope, filter)?,
    }
    Ok(())
  }

  fn junction(&mut self, nodes: &[Filter], sep: &str, empty: &str) -> Result<()> {
    if nodes.is_empty() {
      self.sql.push_str(empty);
      return Ok(());
    }
    self.sql.push('(');
    for (i, node) in nodes.iter().enumerate() {
      if i > 0 {
        self.sql.push_str(sep);
      }
      self.filter(node)?;
    }
    self.sql.push(')');
    Ok(())
  }

  fn compare(&mut self, col: &str, op: Op, value: &Value) -> Result<()> {
    match (op, value) {
      (Op::Eq, Value::Null) => write!(self.sql, "{col} IS NULL").ok(),
      (Op::Ne, Value::Null) => write!(self.sql, "{col} IS NOT NULL").ok(),
      (Op::Contains, _) => {
        self.bind(value);
        write!(self.sql, "instr({col}, ?) > 0").ok()
      }
      (Op::IContains, Value::Text(s)) => {
        self.params.push(SqlValue::Text(like_contains(s)));
        write!(self.sql, "{col} LIKE ? ESCAPE '\\'").ok()
      }
      (Op::IContains, other) => {
        return Err(
          tempora_core::Error::InvalidLookup(format!(
            "icontains expects text, got {other:?}"
          ))
          .into(),
        );
      }
      (Op::StartsWith, _) => {
        self.bind(value);
        self.bind(value);
        write!(self.sql, "substr({col}, 1, length(?)) = ?").ok()
      }
      (Op::EndsWith, _) => {
        self.bind(value);
        self.bind(value);
        write!(self.sql, "substr({col}, length({col}) - length(?) + 1) = ?").ok()
      }
      (op, _) => {
        let symbol = comparison_symbol(op).ok_or_else(|| {
          tempora_core::Error::InvalidLookup(format!("{op:?} has no symbol"))
        })?;
        self.bind(value);
        write!(self.sql, "{col} {symbol} ?").ok()
      }
    };
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use tempora_core::{
    inject::{Projection, inject},
    query::Filter,
    schema::{FieldDef, FieldKind, ManyToManyDef, ModelDef, Schema},
  };

  use super::*;

  fn schema() -> Schema {
    Schema::builder()
      .model(ModelDef::entity("block").with_field(FieldDef::new("name", FieldKind::Text)))
      .model(
        ModelDef::entity("segment")
          .with_field(FieldDef::new("name", FieldKind::Text))
          .with_field(FieldDef::new("block", FieldKind::Uuid).references("block")),
      )
      .model(ModelDef::entity("group").with_field(FieldDef::new("name", FieldKind::Text)))
      .model(
        ModelDef::entity("channel")
          .with_field(FieldDef::new("name", FieldKind::Text))
          .with_many_to_many(ManyToManyDef {
            name:         "groups".into(),
            target:       "group".into(),
            through:      "channel_group".into(),
            source_field: "channel".into(),
            target_field: "group".into(),
          }),
      )
      .model(
        ModelDef::link("channel_group")
          .with_field(FieldDef::new("channel", FieldKind::Uuid).references("channel"))
          .with_field(FieldDef::new("group", FieldKind::Uuid).references("group")),
      )
      .build()
      .unwrap()
  }

  fn render(query: &Query, projection: Projection) -> Statement {
    let schema = schema();
    let ctx = QueryContext::compile(&schema, query, projection).unwrap();
    let injected = inject(query, &ctx);
    match projection {
      Projection::Rows => select(&injected, &ctx),
      Projection::Count => count(&injected, &ctx),
      Projection::Exists => exists(&injected, &ctx),
    }
    .unwrap()
  }

  #[test]
  fn select_joins_and_injects_every_table() {
    let q = Query::new("segment").filter(Filter::eq("block__name", "b")).unwrap();
    let stmt = render(&q, Projection::Rows);
    assert!(stmt.sql.starts_with("SELECT \"t0\".\"id\", \"t0\".\"local_id\""));
    assert!(stmt.sql.contains("JOIN \"block\" AS \"t1\" ON \"t1\".\"local_id\" = \"t0\".\"block\""));
    assert!(stmt.sql.contains("\"t0\".\"ends_at\" IS NULL"));
    assert!(stmt.sql.contains("\"t1\".\"ends_at\" IS NULL"));
    assert!(stmt.sql.ends_with("ORDER BY \"t0\".\"starts_at\", \"t0\".\"id\""));
    assert_eq!(stmt.params, vec![SqlValue::Text("b".into())]);
  }

  #[test]
  fn many_to_many_selects_distinct() {
    let q = Query::new("channel").filter(Filter::eq("groups__name", "g")).unwrap();
    let stmt = render(&q, Projection::Rows);
    assert!(stmt.sql.starts_with("SELECT DISTINCT"));
    assert!(stmt.sql.contains("\"t2\".\"ends_at\" IS NULL"));
  }

  #[test]
  fn exclude_across_many_to_many_renders_not_exists() {
    let q = Query::new("channel").exclude(Filter::eq("groups__name", "g")).unwrap();
    let stmt = render(&q, Projection::Rows);
    assert!(stmt.sql.starts_with("SELECT \"t0\""));
    assert!(stmt.sql.contains(
      "FROM \"channel\" AS \"t0\" WHERE (NOT (EXISTS (SELECT 1 \
       FROM \"channel_group\" AS \"t1\" \
       JOIN \"group\" AS \"t2\" ON \"t2\".\"local_id\" = \"t1\".\"group\" \
       WHERE \"t1\".\"channel\" = \"t0\".\"local_id\" \
       AND (\"t1\".\"ends_at\" IS NULL AND \"t2\".\"ends_at\" IS NULL) \
       AND \"t2\".\"name\" = ?)) AND (\"t0\".\"ends_at\" IS NULL))"
    ));
    assert_eq!(stmt.params, vec![SqlValue::Text("g".into())]);
  }

  #[test]
  fn disjunction_binds_scoped_snapshot_in_order() {
    let at = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let q = Query::new("segment")
      .at(at)
      .filter(Filter::eq("name", "s").or(Filter::eq("block__name", "b")))
      .unwrap();
    let stmt = render(&q, Projection::Count);
    assert!(stmt.sql.contains(
      "(\"t0\".\"name\" = ? OR EXISTS (SELECT 1 FROM \"block\" AS \"t1\" \
       WHERE \"t1\".\"local_id\" = \"t0\".\"block\""
    ));
    let at = crate::encode::encode_dt(at);
    let text = |s: &str| SqlValue::Text(s.into());
    assert_eq!(
      stmt.params,
      vec![
        text("s"),
        text(&at),
        text(&at),
        text("b"),
        text(&at),
        text(&at),
      ]
    );
  }

  #[test]
  fn ordering_across_a_reference_is_a_scalar_subquery() {
    let q = Query::new("segment").order_by_desc("block__name");
    let stmt = render(&q, Projection::Rows);
    assert!(!stmt.sql.contains(" JOIN "));
    assert!(stmt.sql.ends_with(
      "ORDER BY (SELECT \"t1\".\"name\" FROM \"block\" AS \"t1\" \
       WHERE \"t1\".\"local_id\" = \"t0\".\"block\" \
       AND (\"t1\".\"ends_at\" IS NULL) \
       ORDER BY \"t1\".\"name\" DESC LIMIT 1) DESC, \
       \"t0\".\"starts_at\", \"t0\".\"id\""
    ));
  }

  #[test]
  fn null_equality_renders_is_null() {
    let q = Query::new("block").filter(Filter::eq("name", Value::Null)).unwrap();
    let stmt = render(&q, Projection::Rows);
    assert!(stmt.sql.contains("\"t0\".\"name\" IS NULL"));
    assert!(stmt.params.is_empty());
  }

  #[test]
  fn empty_in_matches_nothing() {
    let q = Query::new("block")
      .filter(Filter::is_in("name", Vec::<String>::new()))
      .unwrap();
    let stmt = render(&q, Projection::Rows);
    assert!(stmt.sql.contains("0 = 1"));
  }

  #[test]
  fn offset_without_limit_is_unbounded() {
    let q = Query::new("block").offset(3);
    let stmt = render(&q, Projection::Rows);
    assert!(stmt.sql.ends_with("LIMIT ? OFFSET ?"));
    assert_eq!(stmt.params, vec![SqlValue::Integer(-1), SqlValue::Integer(3)]);
  }

  #[test]
  fn count_wraps_distinct_ids() {
    let q = Query::new("block").filter(Filter::gt("id", 0)).unwrap();
    let stmt = render(&q, Projection::Count);
    assert!(stmt.sql.starts_with("SELECT COUNT(*) FROM (SELECT DISTINCT \"t0\".\"id\""));
    assert!(stmt.sql.contains("\"t0\".\"ends_at\" IS NULL"));
  }

  #[test]
  fn icontains_escapes_wildcards() {
    assert_eq!(like_contains("50%_a"), "%50\\%\\_a%");
  }

  #[test]
  fn identifiers_are_quoted() {
    assert_eq!(quote("group"), "\"group\"");
    assert_eq!(quote("a\"b"), "\"a\"\"b\"");
  }
}
