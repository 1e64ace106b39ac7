//! [`SqliteStore`], the SQLite implementation of [`VersionedStore`].

use std::{path::Path, sync::Arc, time::Duration};

use rusqlite::{Connection, params_from_iter};
use tempora_core::{
  Error as CoreError,
  clock::{Clock, SystemClock},
  query::{Filter, Query},
  record::{Changes, Record},
  schema::{Schema, column},
  snapshot,
  store::{DeleteSummary, VersionedStore},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  Error, Result,
  config::StoreConfig,
  encode::to_sql,
  iter::RecordIter,
  mutate::{Engine, ReferenceCheck},
  read::{self, Injection},
  schema::ddl,
  sql::quote,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A versioned record store backed by a single SQLite database.
///
/// Cloning is cheap: the connection, schema and clock are all shared.
#[derive(Clone)]
pub struct SqliteStore {
  conn:   tokio_rusqlite::Connection,
  schema: Arc<Schema>,
  clock:  Arc<dyn Clock>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and create any missing tables.
  pub async fn open(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, schema, None).await
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory(schema: Schema) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, schema, None).await
  }

  /// Open the store a [`StoreConfig`] describes.
  pub async fn from_config(config: &StoreConfig) -> Result<Self> {
    let schema = Schema::new(config.models.clone())?;
    let conn = if config.is_in_memory() {
      tokio_rusqlite::Connection::open_in_memory().await?
    } else {
      tokio_rusqlite::Connection::open(&config.path).await?
    };
    let timeout = Duration::from_millis(config.busy_timeout_ms);
    Self::init(conn, schema, Some(timeout)).await
  }

  /// Replace the clock used to stamp mutations.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  async fn init(
    conn: tokio_rusqlite::Connection,
    schema: Schema,
    busy_timeout: Option<Duration>,
  ) -> Result<Self> {
    let batch = ddl(&schema);
    conn
      .call(move |conn| {
        if let Some(timeout) = busy_timeout {
          conn.busy_timeout(timeout)?;
        }
        // In-memory databases stay in "memory" mode.
        let _mode: String =
          conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(&batch)?;
        Ok(())
      })
      .await?;
    info!(models = schema.models().count(), "store opened");
    Ok(Self {
      conn,
      schema: Arc::new(schema),
      clock: Arc::new(SystemClock::default()),
    })
  }

  /// Run a read against the connection.
  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&Connection, &Schema) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    let schema = Arc::clone(&self.schema);
    self.conn.call(move |conn| Ok(f(conn, &schema))).await?
  }

  /// Run `f` inside one transaction stamped with a single clock reading.
  /// The clock is read on the connection thread, so stamps follow commit
  /// order.
  /// Commits on `Ok`; dropping the uncommitted transaction rolls it back.
  async fn write<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&Engine<'_>) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    let schema = Arc::clone(&self.schema);
    let clock = Arc::clone(&self.clock);
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let now = clock.now();
        let outcome = f(&Engine::new(&tx, &schema, now));
        if outcome.is_ok() {
          tx.commit()?;
        }
        Ok(outcome)
      })
      .await?
  }

  /// Insert a row into a plain (unversioned) table, e.g. an owner that
  /// versioned records reference. Returns the record with its `id` set.
  pub async fn insert_plain(&self, mut record: Record) -> Result<Record> {
    let model = self.schema.model(&record.model)?.clone();
    if model.is_versioned() {
      return Err(
        CoreError::Validation(format!(
          "{} is versioned; use create",
          model.name
        ))
        .into(),
      );
    }
    if let Some(name) = record.fields.keys().find(|k| model.field(k).is_none()) {
      return Err(
        CoreError::Validation(format!("{} has no field {name}", model.name)).into(),
      );
    }

    let columns: Vec<String> = model.fields.iter().map(|f| quote(&f.name)).collect();
    let params: Vec<_> = model
      .fields
      .iter()
      .map(|f| to_sql(record.get(&f.name).unwrap_or(&tempora_core::value::Value::Null)))
      .collect();
    let sql = if columns.is_empty() {
      format!("INSERT INTO {} DEFAULT VALUES", quote(model.table_name()))
    } else {
      format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(model.table_name()),
        columns.join(", "),
        vec!["?"; params.len()].join(", "),
      )
    };

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(&sql, params_from_iter(params.iter()))?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    debug!(model = %model.name, id, "inserted plain row");
    record.id = Some(id);
    Ok(record)
  }
}

#[cfg(test)]
impl SqliteStore {
  /// Run raw SQL against the database, bypassing the engine.
  pub(crate) async fn execute_raw(&self, sql: &str) -> Result<()> {
    let sql = sql.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── VersionedStore impl ─────────────────────────────────────────────────────

impl VersionedStore for SqliteStore {
  type Error = Error;
  type Iter = RecordIter;

  fn schema(&self) -> &Schema { &self.schema }

  async fn count(&self, query: &Query) -> Result<u64> {
    let query = query.clone();
    self
      .read(move |conn, schema| read::count_rows(conn, schema, &query))
      .await
  }

  async fn exists(&self, query: &Query) -> Result<bool> {
    let query = query.clone();
    self
      .read(move |conn, schema| read::exists_rows(conn, schema, &query))
      .await
  }

  async fn iterate(&self, query: &Query) -> Result<RecordIter> {
    let model = self.schema.model(query.model())?.clone();
    let snapshot = query.at_time();
    let query = query.clone();
    let rows = self
      .read(move |conn, schema| {
        read::select_rows(conn, schema, &query, Injection::Temporal)
      })
      .await?;
    Ok(RecordIter::new(rows, model, snapshot))
  }

  async fn fetch(&self, query: &Query) -> Result<Vec<Record>> {
    self.iterate(query).await?.collect()
  }

  async fn first(&self, query: &Query) -> Result<Option<Record>> {
    let query = if query.is_sliced() { query.clone() } else { query.limit(1) };
    Ok(self.iterate(&query).await?.next().transpose()?)
  }

  async fn get_by_guid(&self, model: &str, guid: &str) -> Result<Option<Record>> {
    let query = Query::new(model).filter(Filter::eq(column::GUID, guid))?;
    let mut found = self
      .read(move |conn, schema| {
        read::select_records(conn, schema, &query, Injection::AllVersions)
      })
      .await?;
    Ok(found.pop())
  }

  async fn history(&self, model: &str, local_id: Uuid) -> Result<Vec<Record>> {
    let query = Query::new(model)
      .filter(Filter::eq(column::LOCAL_ID, local_id))?
      .order_by(column::STARTS_AT);
    self
      .read(move |conn, schema| {
        read::select_records(conn, schema, &query, Injection::AllVersions)
      })
      .await
  }

  async fn in_bulk(&self, query: &Query) -> Result<Vec<i64>> {
    if self.schema.model(query.model())?.is_versioned() {
      return Err(CoreError::NotSupported("in_bulk on a versioned model").into());
    }
    let query = query.clone();
    self
      .read(move |conn, schema| read::select_ids(conn, schema, &query))
      .await
  }

  async fn create(&self, records: Vec<Record>) -> Result<Vec<Record>> {
    let count = records.len();
    let saved = self
      .write(move |engine| engine.create(records, ReferenceCheck::All))
      .await?;
    info!(rows = count, "created");
    Ok(saved)
  }

  async fn update(&self, query: &Query, changes: Changes) -> Result<Vec<Record>> {
    let query = query.clone();
    self
      .write(move |engine| engine.update(&query, &changes))
      .await
  }

  async fn delete(&self, query: &Query) -> Result<DeleteSummary> {
    let query = query.clone();
    self.write(move |engine| engine.delete(&query)).await
  }

  async fn related(&self, record: &Record, field: &str) -> Result<Option<Record>> {
    match snapshot::reference_query(&self.schema, record, field)? {
      Some(query) => self.first(&query).await,
      None => Ok(None),
    }
  }

  async fn children(
    &self,
    record: &Record,
    child_model: &str,
    field: &str,
  ) -> Result<Vec<Record>> {
    let query = snapshot::children_query(&self.schema, record, child_model, field)?;
    self.fetch(&query).await
  }

  async fn linked(&self, record: &Record, relation: &str) -> Result<Vec<Record>> {
    let (links, m2m) = snapshot::link_query(&self.schema, record, relation)?;
    let targets: Vec<Uuid> = self
      .fetch(&links)
      .await?
      .iter()
      .filter_map(|link| link.get(&m2m.target_field)?.as_uuid())
      .collect();
    if targets.is_empty() {
      return Ok(Vec::new());
    }
    let query = snapshot::targets_query(m2m, targets, record)?;
    self.fetch(&query).await
  }

  async fn check_consistency(&self, model: &str) -> Result<()> {
    let def = self.schema.model(model)?.clone();
    let offending = self
      .read(move |conn, _| read::find_inconsistency(conn, &def))
      .await?;
    match offending {
      Some(local_id) => Err(
        CoreError::ConsistencyViolation(format!("{model} {local_id}")).into(),
      ),
      None => Ok(()),
    }
  }
}
