//! The `VersionedStore` trait and supporting result types.
//!
//! The trait is implemented by storage backends (e.g.
//! `tempora-store-sqlite`). Application layers depend on this abstraction,
//! not on any concrete backend.

use std::future::Future;

use serde::Serialize;
use uuid::Uuid;

use crate::{
  query::Query,
  record::{Changes, Record},
  schema::Schema,
};

/// What a delete closed. All zero means the query matched no active rows and
/// nothing changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
  pub closed:          usize,
  pub links_closed:    usize,
  pub parents_resaved: usize,
}

impl DeleteSummary {
  pub fn is_noop(&self) -> bool { self.closed == 0 }
}

/// Abstraction over a versioned record store backend.
///
/// Rows of versioned models are never updated in place or removed: every
/// mutation closes the active version (`ends_at = now`) and inserts new rows,
/// inside one transaction.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait VersionedStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Forward-only, consuming iterator returned by
  /// [`VersionedStore::iterate`].
  type Iter: Iterator<Item = Result<Record, Self::Error>> + Send;

  fn schema(&self) -> &Schema;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Number of rows the query selects, after time injection.
  fn count<'a>(
    &'a self,
    query: &'a Query,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// Whether at least one currently active row matches, regardless of the
  /// query's `at_time`.
  fn exists<'a>(
    &'a self,
    query: &'a Query,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Run the query and return an iterator over its records. Implementations
  /// may fetch every row up front and defer only decoding. Each record is
  /// tagged with the query's `at_time`.
  fn iterate<'a>(
    &'a self,
    query: &'a Query,
  ) -> impl Future<Output = Result<Self::Iter, Self::Error>> + Send + 'a;

  /// Collect every record the query selects.
  fn fetch<'a>(
    &'a self,
    query: &'a Query,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + 'a;

  /// The first record the query selects, if any.
  fn first<'a>(
    &'a self,
    query: &'a Query,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send + 'a;

  /// Look up one version by GUID, active or historical.
  fn get_by_guid<'a>(
    &'a self,
    model: &'a str,
    guid: &'a str,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send + 'a;

  /// Every version of one logical record, oldest first.
  fn history<'a>(
    &'a self,
    model: &'a str,
    local_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + 'a;

  /// Bulk id listing. Always fails for versioned models: it would bypass
  /// version-aware hydration.
  fn in_bulk<'a>(
    &'a self,
    query: &'a Query,
  ) -> impl Future<Output = Result<Vec<i64>, Self::Error>> + Send + 'a;

  // ── Mutations ─────────────────────────────────────────────────────────

  /// Insert new versions. Records that already carry a GUID are re-saves of
  /// an existing logical record; their current version is closed first.
  fn create(
    &self,
    records: Vec<Record>,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + '_;

  /// Close every active row matching `query` and insert a copy with
  /// `changes` applied. Returns the new versions.
  fn update<'a>(
    &'a self,
    query: &'a Query,
    changes: Changes,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + 'a;

  /// Close every active row matching `query`, its many-to-many link rows,
  /// and re-save the parents it references.
  fn delete<'a>(
    &'a self,
    query: &'a Query,
  ) -> impl Future<Output = Result<DeleteSummary, Self::Error>> + Send + 'a;

  // ── Traversal ─────────────────────────────────────────────────────────

  /// Follow a reference field, as of `record`'s snapshot.
  fn related<'a>(
    &'a self,
    record: &'a Record,
    field: &'a str,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send + 'a;

  /// Records of `child_model` whose `field` references `record`, as of
  /// `record`'s snapshot.
  fn children<'a>(
    &'a self,
    record: &'a Record,
    child_model: &'a str,
    field: &'a str,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + 'a;

  /// Targets of a many-to-many relation, as of `record`'s snapshot.
  fn linked<'a>(
    &'a self,
    record: &'a Record,
    relation: &'a str,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + 'a;

  // ── Maintenance ───────────────────────────────────────────────────────

  /// Scan `model` for identities with more than one active row or with
  /// overlapping intervals.
  fn check_consistency<'a>(
    &'a self,
    model: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
