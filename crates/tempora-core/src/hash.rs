//! Content-derived version identifiers.
//!
//! A GUID is a SHA-256 hex digest over a canonical JSON encoding of the
//! record's identity, timing and domain fields. `guid` itself and the
//! in-memory snapshot tag are excluded. Because `starts_at` is part of the
//! input, two versions of one logical record never share a GUID even when
//! their domain fields are identical.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{Result, record::Record, value::Value};

#[derive(Serialize)]
struct HashInput<'a> {
  model:        &'a str,
  local_id:     Option<Uuid>,
  date_created: Option<DateTime<Utc>>,
  starts_at:    Option<DateTime<Utc>>,
  // BTreeMap keeps field order stable.
  fields:       &'a BTreeMap<String, Value>,
}

/// Compute the GUID for `record` in its current state.
pub fn content_hash(record: &Record) -> Result<String> {
  let canonical = serde_json::to_vec(&HashInput {
    model:        &record.model,
    local_id:     record.local_id,
    date_created: record.date_created,
    starts_at:    record.starts_at,
    fields:       &record.fields,
  })?;
  Ok(hex::encode(Sha256::digest(&canonical)))
}
