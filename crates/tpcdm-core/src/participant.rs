//! Resource-manager participant contract
//!
//! This module defines the `Participant` trait, the uniform surface a
//! coordinator uses to drive heterogeneous stores through two-phase commit
//! and nested savepoints, together with the participant state machine and
//! the savepoint marker type.

use std::any::Any;
use std::fmt;

use tpcdm_core_types::{TransactionContext, TransactionId};

use crate::errors::{Result, TpcError};

/// Lifecycle state of a participant
///
/// `Idle → Active → {Voted → Committed} | Aborted`. `Committed` and `Aborted`
/// are terminal for the current transaction; `release()` on a concrete
/// participant returns it to `Idle` for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Idle,
    Active,
    Voted,
    Committed,
    Aborted,
}

impl ParticipantState {
    /// Whether the current transaction has reached an outcome
    pub fn is_terminal(&self) -> bool {
        matches!(self, ParticipantState::Committed | ParticipantState::Aborted)
    }

    /// Stable lowercase name, used in errors and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantState::Idle => "idle",
            ParticipantState::Active => "active",
            ParticipantState::Voted => "voted",
            ParticipantState::Committed => "committed",
            ParticipantState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ParticipantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable marker for a point inside a participant's transaction
///
/// The captured state lives inside the owning participant, keyed by `id`.
/// The marker only identifies it, so it can be held by the caller while
/// the participant keeps mutating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    id: u64,
    owner: String,
    txn_id: TransactionId,
}

impl Savepoint {
    pub fn new(id: u64, owner: impl Into<String>, txn_id: TransactionId) -> Self {
        Self {
            id,
            owner: owner.into(),
            txn_id,
        }
    }

    /// Monotonic id, unique within the owning participant
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sort key of the participant that created this savepoint
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn txn_id(&self) -> &TransactionId {
        &self.txn_id
    }

    /// Reject markers that do not belong to `owner` in `txn`
    ///
    /// Shared by every participant implementation before it looks up the
    /// captured state.
    ///
    /// # Errors
    ///
    /// Returns `SavepointInvalid` when the owner or transaction differ.
    pub fn check_owner(&self, owner: &str, txn: &TransactionContext) -> Result<()> {
        if self.owner != owner {
            return Err(TpcError::SavepointInvalid {
                participant: owner.to_string(),
                savepoint_id: self.id,
                reason: format!("savepoint belongs to {}", self.owner),
            });
        }
        if self.txn_id != txn.txn_id {
            return Err(TpcError::SavepointInvalid {
                participant: owner.to_string(),
                savepoint_id: self.id,
                reason: format!("savepoint was taken in transaction {}", self.txn_id),
            });
        }
        Ok(())
    }
}

/// Two-phase-commit participant
///
/// Implemented by every store adapter that takes part in a transaction.
/// The coordinator never touches participant internals; it only calls the
/// operations below, always passing the explicit transaction context.
///
/// Implementations must be `'static` so the coordinator can hand typed
/// access back to the caller through `as_any`.
pub trait Participant: Any {
    /// Ordering key used for both phases
    ///
    /// Must stay the same for the participant's lifetime and must not
    /// collide with another participant's key.
    fn sort_key(&self) -> &str;

    /// Current lifecycle state
    fn state(&self) -> ParticipantState;

    /// Phase 1: check that every pending write can be made durable
    ///
    /// Makes nothing durable. On success the participant is `Voted`.
    ///
    /// # Errors
    ///
    /// Returns `PrepareFailed` if the working state cannot be represented,
    /// or `InvalidState` outside `Active`.
    fn prepare(&mut self, txn: &TransactionContext) -> Result<()>;

    /// Phase 2: make the prepared writes durable
    ///
    /// # Errors
    ///
    /// Any error after a successful `prepare` is a protocol violation; the
    /// coordinator surfaces it as fatal.
    fn finish(&mut self, txn: &TransactionContext) -> Result<()>;

    /// Discard every uncommitted write and restore the committed state
    ///
    /// Repeat-safe. A no-op once the participant is terminal.
    ///
    /// # Errors
    ///
    /// Only if the backing store itself refuses the rollback.
    fn abort(&mut self, txn: &TransactionContext) -> Result<()>;

    /// Discard pending writes after another participant's vote failed
    ///
    /// # Errors
    ///
    /// Only if the backing store itself refuses the rollback.
    fn finish_abort(&mut self, txn: &TransactionContext) -> Result<()>;

    /// Capture the current working state
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside `Active`.
    fn savepoint(&mut self, txn: &TransactionContext) -> Result<Savepoint>;

    /// Restore the working state captured by `savepoint`
    ///
    /// Savepoints taken after `savepoint` become invalid; `savepoint` itself
    /// stays valid and may be rolled back again.
    ///
    /// # Errors
    ///
    /// Returns `SavepointInvalid` for a foreign or unknown savepoint, or once
    /// the transaction has terminated.
    fn rollback_savepoint(&mut self, txn: &TransactionContext, savepoint: &Savepoint)
        -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// Guard shared by implementations: fail unless in `expected`
///
/// # Errors
///
/// Returns `InvalidState` naming `op` and the actual state.
pub fn require_state(
    sort_key: &str,
    op: &str,
    actual: ParticipantState,
    expected: ParticipantState,
) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(TpcError::InvalidState {
            participant: sort_key.to_string(),
            op: op.to_string(),
            state: actual.to_string(),
        })
    }
}
