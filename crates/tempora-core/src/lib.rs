//! Core types and trait definitions for the Tempora versioned record store.
//!
//! This crate has no database dependencies. It owns the
//! schema registry, the query AST and the pure parts of the versioning engine
//! (content hashing, temporal predicate injection, snapshot propagation).
//! Storage backends depend on it and implement [`store::VersionedStore`].

pub mod clock;
pub mod error;
pub mod hash;
pub mod inject;
pub mod query;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod value;

pub use error::{Error, Result};
