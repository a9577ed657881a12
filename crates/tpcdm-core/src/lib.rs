//! tpcdm Core - transactional resource-manager protocol
//!
//! This crate provides the participant side of a miniature two-phase commit,
//! plus the in-process coordinator that drives it:
//! - `Participant` trait with prepare/finish/abort/finish_abort/savepoint
//! - Participant state machine and savepoint markers
//! - `Transaction` coordinator with deterministic phase ordering and
//!   aggregate savepoints
//! - `TransactionManager` for request-scoped commit/abort with retries
//! - Canonical error and logging facilities

pub mod config;
pub mod errors;
pub mod logging_facility;
pub mod manager;
pub mod participant;
pub mod transaction;

// Re-export commonly used types
pub use config::TpcConfig;
pub use errors::{ExError, ExErrorKind, Result, TpcError};
pub use manager::TransactionManager;
pub use participant::{Participant, ParticipantState, Savepoint};
pub use transaction::{ParticipantHandle, Transaction, TransactionSavepoint, TransactionStatus};
pub use tpcdm_core_types::{RequestId, TransactionContext, TransactionId};
