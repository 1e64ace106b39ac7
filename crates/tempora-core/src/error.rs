//! Error types for `tempora-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// New or updated content failed a structural or business-rule check.
  /// Raised before anything is written.
  #[error("validation failed: {0}")]
  Validation(String),

  /// A create batch would close the same logical identity more than once,
  /// or tried to re-save a version that is no longer active.
  #[error("conflicting batch: {0}")]
  Conflict(String),

  #[error("not supported for versioned models: {0}")]
  NotSupported(&'static str),

  /// The one-active-row-per-identity invariant was found broken.
  #[error("consistency violation: {0}")]
  ConsistencyViolation(String),

  #[error("unknown model: {0:?}")]
  UnknownModel(String),

  #[error("unknown field {field:?} on model {model:?}")]
  UnknownField { model: String, field: String },

  #[error("invalid lookup: {0}")]
  InvalidLookup(String),

  #[error("cannot filter a query once a slice has been taken")]
  Sliced,

  #[error("invalid schema: {0}")]
  Schema(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
