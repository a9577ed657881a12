//! tpcdm Store - participants bound to concrete backing stores
//!
//! Provides:
//! - Snapshot participant: an ordered key/value mapping persisted as one
//!   JSON document, replaced atomically on commit
//! - SQLite participant: a thin adapter over a connection's native
//!   transaction and savepoints
//! - Connection helpers and error translation

pub mod db;
pub mod errors;
pub mod snapshot;
pub mod sqlite;

// Re-export key types
pub use errors::Result;
pub use snapshot::{Mapping, SnapshotParticipant};
pub use sqlite::SqliteParticipant;
