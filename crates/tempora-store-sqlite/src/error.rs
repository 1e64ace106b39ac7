//! Error type for `tempora-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tempora_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored column did not hold what the schema declares.
  #[error("unexpected column value: {0}")]
  Decode(String),

  #[error("configuration error: {0}")]
  Config(#[from] config::ConfigError),
}

impl Error {
  /// The engine-level error, if this is one. Lets callers tell a rejected
  /// write (validation, conflict) from a storage failure.
  pub fn as_core(&self) -> Option<&tempora_core::Error> {
    match self {
      Self::Core(e) => Some(e),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
