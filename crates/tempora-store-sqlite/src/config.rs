//! Store configuration.
//!
//! Loaded with the `config` crate from an optional TOML file, then from
//! `TEMPORA_`-prefixed environment variables, e.g. `TEMPORA_PATH`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tempora_core::schema::ModelDef;

use crate::Result;

pub const ENV_PREFIX: &str = "TEMPORA";

const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  /// Database file, or `:memory:`.
  #[serde(default = "default_path")]
  pub path:            PathBuf,
  /// How long a writer waits on a locked database.
  #[serde(default = "default_busy_timeout_ms")]
  pub busy_timeout_ms: u64,
  /// Model declarations making up the schema registry.
  #[serde(default)]
  pub models:          Vec<ModelDef>,
}

fn default_path() -> PathBuf { PathBuf::from(IN_MEMORY) }

fn default_busy_timeout_ms() -> u64 { 5_000 }

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      path:            default_path(),
      busy_timeout_ms: default_busy_timeout_ms(),
      models:          Vec::new(),
    }
  }
}

impl StoreConfig {
  /// Read `file` if given and present, then overlay the environment.
  pub fn load(file: Option<&Path>) -> Result<Self> {
    let mut builder = config::Config::builder();
    if let Some(file) = file {
      builder = builder.add_source(config::File::from(file).required(false));
    }
    let settings = builder
      .add_source(config::Environment::with_prefix(ENV_PREFIX))
      .build()?;
    Ok(settings.try_deserialize()?)
  }

  /// Parse a TOML document, without consulting the environment.
  pub fn from_toml(toml: &str) -> Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()?;
    Ok(settings.try_deserialize()?)
  }

  pub fn is_in_memory(&self) -> bool { self.path == Path::new(IN_MEMORY) }
}
