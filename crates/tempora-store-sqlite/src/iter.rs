use chrono::{DateTime, Utc};
use tempora_core::{record::Record, schema::ModelDef};

use crate::{Result, encode::RawRow};

/// Forward-only iterator over rows fetched in one statement. The rows are
/// read eagerly when the iterator is built; each one is decoded only when it
/// is reached and tagged with the snapshot instant of the query that produced
/// it.
#[derive(Debug)]
pub struct RecordIter {
  rows:     std::vec::IntoIter<RawRow>,
  model:    ModelDef,
  snapshot: Option<DateTime<Utc>>,
}

impl RecordIter {
  pub(crate) fn new(
    rows: Vec<RawRow>,
    model: ModelDef,
    snapshot: Option<DateTime<Utc>>,
  ) -> Self {
    Self { rows: rows.into_iter(), model, snapshot }
  }
}

impl Iterator for RecordIter {
  type Item = Result<Record>;

  fn next(&mut self) -> Option<Self::Item> {
    let raw = self.rows.next()?;
    Some(raw.into_record(&self.model, self.snapshot))
  }

  fn size_hint(&self) -> (usize, Option<usize>) { self.rows.size_hint() }
}

impl ExactSizeIterator for RecordIter {}
