//! SQLite backend for the tempora versioned record store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every mutation runs as a single
//! transaction inside one connection call.

mod cascade;
mod encode;
mod iter;
mod mutate;
mod read;
mod schema;
mod sql;
mod store;

pub mod config;
pub mod error;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use iter::RecordIter;
pub use store::SqliteStore;
