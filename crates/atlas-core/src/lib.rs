//! atlas-core - Core library for Atlas
//!
//! This crate contains the shared models, the local `SQLite` store, the remote
//! record-store contract, and the replication engine that keeps the two
//! synchronized through opaque change cursors.

pub mod catalog;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod sync;

pub use catalog::Catalog;
pub use error::{Error, Result};
pub use models::{City, Country, RecordName, RecordType, Tombstone};
pub use sync::{PullOutcome, SyncEngine, SyncEvent};
