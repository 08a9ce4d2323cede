//! A multi-tenant document store built on an LSM-tree storage engine.
//!
//! Records belonging to the reserved `(·, "system", "users")` collection
//! are stored in a plain append-only container (see [`container`]); every
//! other collection is backed by a per-collection LSM engine (see [`lsm`])
//! with a memtable, write-ahead log, and tiered SSTs. [`engine::StoreEngine`]
//! is the single entry point that routes between the two and exposes the
//! logical operations (`insert`, `find`, `update_one`, ...) described by
//! the data model.

pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod lsm;
pub mod memtable;
pub mod predicate;
pub mod record;
pub mod sstable;
pub mod vector;
pub mod wal;

pub use config::StoreConfig;
pub use engine::StoreEngine;
pub use error::{Result, StoreError};
pub use predicate::Filter;
pub use record::Record;
pub use vector::VectorQuery;
