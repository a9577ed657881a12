//! Snapshot-store participant
//!
//! An ordered string-keyed mapping held in memory and persisted as a single
//! JSON document. Commit replaces the whole file atomically.

pub mod atomic;
mod participant;

pub use atomic::atomic_write;
pub use participant::{load_snapshot, Mapping, SnapshotParticipant};
