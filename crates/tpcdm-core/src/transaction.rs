//! In-process transaction coordinator
//!
//! A `Transaction` is the explicit context value that participants join.
//! It owns every joined participant for the duration of the transaction and
//! drives them through two-phase commit, abort, and aggregate savepoints.
//!
//! ## Ordering
//!
//! Both phases visit participants in ascending `sort_key()` order, whatever
//! order they were joined in.
//!
//! ## Outcome guarantees
//!
//! - A failed vote aborts every participant and returns `TransactionFailed`;
//!   nothing becomes durable.
//! - A failed `finish()` stops phase 2, leaves the transaction
//!   `Inconsistent`, and returns `ProtocolViolation`. It is never retried.

use std::fmt;
use std::marker::PhantomData;
use std::time::Instant;

use tpcdm_core_types::{TransactionContext, TransactionId};

use crate::errors::{Result, TpcError};
use crate::participant::{Participant, Savepoint};
use crate::{log_op_end, log_op_error, log_op_start};

/// Coordinator-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committed,
    Aborted,
    /// A savepoint rollback failed part way; only `abort()` is accepted
    Doomed,
    /// Phase 2 failed after a successful vote
    Inconsistent,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Active => "active",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Aborted => "aborted",
            TransactionStatus::Doomed => "doomed",
            TransactionStatus::Inconsistent => "inconsistent",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed reference to a joined participant
pub struct ParticipantHandle<P> {
    slot: usize,
    _marker: PhantomData<fn() -> P>,
}

impl<P> ParticipantHandle<P> {
    /// Registration slot inside the owning transaction
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<P> Clone for ParticipantHandle<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for ParticipantHandle<P> {}

impl<P> fmt::Debug for ParticipantHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticipantHandle")
            .field("slot", &self.slot)
            .finish()
    }
}

/// Savepoint over every participant joined when it was taken
#[derive(Debug, Clone)]
pub struct TransactionSavepoint {
    txn_id: TransactionId,
    entries: Vec<(usize, Savepoint)>,
}

impl TransactionSavepoint {
    pub fn txn_id(&self) -> &TransactionId {
        &self.txn_id
    }

    /// Per-participant savepoints, in registration order
    pub fn savepoints(&self) -> impl Iterator<Item = &Savepoint> {
        self.entries.iter().map(|(_, sp)| sp)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Explicit transaction context and coordinator
pub struct Transaction {
    ctx: TransactionContext,
    status: TransactionStatus,
    slots: Vec<Option<Box<dyn Participant>>>,
}

impl Transaction {
    /// Start a new transaction with a fresh id
    pub fn begin() -> Self {
        Self::with_context(TransactionContext::new())
    }

    /// Start a transaction for an existing context (e.g. carrying a request id)
    pub fn with_context(ctx: TransactionContext) -> Self {
        tracing::debug!(txn_id = %ctx.txn_id, "Transaction begun");
        Self {
            ctx,
            status: TransactionStatus::Active,
            slots: Vec::new(),
        }
    }

    pub fn context(&self) -> &TransactionContext {
        &self.ctx
    }

    pub fn txn_id(&self) -> &TransactionId {
        &self.ctx.txn_id
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Number of participants currently held
    pub fn participant_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Register a participant with this transaction
    ///
    /// Takes ownership, so a participant can never be joined to two
    /// transactions at once.
    ///
    /// # Errors
    ///
    /// - `TransactionClosed` if the transaction is not active
    /// - `InvalidState` if the participant is not `Active`
    /// - `AlreadyJoined` if a participant with the same sort key is present
    pub fn join<P: Participant>(&mut self, participant: P) -> Result<ParticipantHandle<P>> {
        self.ensure_active("join")?;

        let state = participant.state();
        crate::participant::require_state(
            participant.sort_key(),
            "join",
            state,
            crate::participant::ParticipantState::Active,
        )?;

        let key = participant.sort_key();
        let duplicate = self
            .slots
            .iter()
            .flatten()
            .any(|existing| existing.sort_key() == key);
        if duplicate {
            return Err(TpcError::AlreadyJoined {
                participant: key.to_string(),
            });
        }

        tracing::debug!(
            txn_id = %self.ctx.txn_id,
            participant = %key,
            "Participant joined"
        );

        let slot = self.slots.len();
        self.slots.push(Some(Box::new(participant)));
        Ok(ParticipantHandle {
            slot,
            _marker: PhantomData,
        })
    }

    /// Borrow a joined participant with its concrete type
    ///
    /// # Errors
    ///
    /// Returns `ParticipantNotFound` if the slot is empty or holds another type.
    pub fn participant<P: Participant>(&self, handle: &ParticipantHandle<P>) -> Result<&P> {
        self.slots
            .get(handle.slot)
            .and_then(|slot| slot.as_deref())
            .and_then(|p| p.as_any().downcast_ref::<P>())
            .ok_or(TpcError::ParticipantNotFound { slot: handle.slot })
    }

    /// Mutably borrow a joined participant with its concrete type
    ///
    /// # Errors
    ///
    /// Returns `ParticipantNotFound` if the slot is empty or holds another type.
    pub fn participant_mut<P: Participant>(
        &mut self,
        handle: &ParticipantHandle<P>,
    ) -> Result<&mut P> {
        self.slots
            .get_mut(handle.slot)
            .and_then(|slot| slot.as_deref_mut())
            .and_then(|p| p.as_any_mut().downcast_mut::<P>())
            .ok_or(TpcError::ParticipantNotFound { slot: handle.slot })
    }

    /// Take a participant back after the transaction reached an outcome
    ///
    /// # Errors
    ///
    /// - `TransactionClosed` while the transaction is still active or doomed
    /// - `ParticipantNotFound` if already detached or of another type
    pub fn detach<P: Participant>(&mut self, handle: ParticipantHandle<P>) -> Result<P> {
        if matches!(
            self.status,
            TransactionStatus::Active | TransactionStatus::Doomed
        ) {
            return Err(self.closed("detach"));
        }

        let not_found = TpcError::ParticipantNotFound { slot: handle.slot };
        let slot = self.slots.get_mut(handle.slot).ok_or(not_found.clone())?;
        if !slot.as_deref().is_some_and(|p| p.as_any().is::<P>()) {
            return Err(not_found);
        }

        let boxed = slot.take().ok_or(not_found)?;
        boxed
            .into_any()
            .downcast::<P>()
            .map(|p| *p)
            .map_err(|_| TpcError::Internal {
                message: format!("participant at slot {} changed type", handle.slot),
            })
    }

    /// Take a savepoint on every participant joined so far
    ///
    /// # Errors
    ///
    /// Returns the first participant error; the transaction stays active.
    pub fn savepoint(&mut self) -> Result<TransactionSavepoint> {
        self.ensure_active("savepoint")?;
        let start = Instant::now();
        log_op_start!(
            "savepoint",
            txn_id = %self.ctx.txn_id,
            participant_count = self.participant_count()
        );

        let mut entries = Vec::with_capacity(self.slots.len());
        for (slot, participant) in self.slots.iter_mut().enumerate() {
            let Some(participant) = participant.as_deref_mut() else {
                continue;
            };
            match participant.savepoint(&self.ctx) {
                Ok(sp) => entries.push((slot, sp)),
                Err(err) => {
                    log_op_error!(
                        "savepoint",
                        err.clone(),
                        duration_ms = elapsed_ms(start),
                        txn_id = %self.ctx.txn_id
                    );
                    return Err(err);
                }
            }
        }

        log_op_end!(
            "savepoint",
            duration_ms = elapsed_ms(start),
            txn_id = %self.ctx.txn_id
        );
        Ok(TransactionSavepoint {
            txn_id: self.ctx.txn_id.clone(),
            entries,
        })
    }

    /// Roll every participant captured by `savepoint` back to it
    ///
    /// Participants joined after the savepoint was taken are untouched.
    ///
    /// # Errors
    ///
    /// - `SavepointInvalid` if the savepoint belongs to another transaction
    /// - any participant rejection; the transaction is then `Doomed`
    pub fn rollback_savepoint(&mut self, savepoint: &TransactionSavepoint) -> Result<()> {
        self.ensure_active("rollback_savepoint")?;
        if savepoint.txn_id != self.ctx.txn_id {
            return Err(TpcError::SavepointInvalid {
                participant: self.ctx.txn_id.to_string(),
                savepoint_id: 0,
                reason: format!("savepoint was taken in transaction {}", savepoint.txn_id),
            });
        }

        let start = Instant::now();
        log_op_start!(
            "rollback_savepoint",
            txn_id = %self.ctx.txn_id,
            participant_count = savepoint.len()
        );

        for (slot, sp) in &savepoint.entries {
            let result = match self.slots.get_mut(*slot).and_then(|s| s.as_deref_mut()) {
                Some(participant) => participant.rollback_savepoint(&self.ctx, sp),
                None => Err(TpcError::ParticipantNotFound { slot: *slot }),
            };
            if let Err(err) = result {
                self.status = TransactionStatus::Doomed;
                log_op_error!(
                    "rollback_savepoint",
                    err.clone(),
                    duration_ms = elapsed_ms(start),
                    txn_id = %self.ctx.txn_id
                );
                return Err(err);
            }
        }

        log_op_end!(
            "rollback_savepoint",
            duration_ms = elapsed_ms(start),
            txn_id = %self.ctx.txn_id
        );
        Ok(())
    }

    /// Run two-phase commit across every joined participant
    ///
    /// # Errors
    ///
    /// - `TransactionDoomed` / `TransactionClosed` if not committable
    /// - `TransactionFailed` if any vote failed (everything was aborted)
    /// - `ProtocolViolation` if a `finish()` failed after all votes succeeded
    pub fn commit(&mut self) -> Result<()> {
        if self.status == TransactionStatus::Doomed {
            return Err(TpcError::TransactionDoomed {
                txn_id: self.ctx.txn_id.clone(),
            });
        }
        self.ensure_active("commit")?;

        let start = Instant::now();
        let order = self.commit_order();
        log_op_start!(
            "commit",
            txn_id = %self.ctx.txn_id,
            participant_count = order.len()
        );

        // Phase 1: vote
        let mut voted = Vec::with_capacity(order.len());
        for &slot in &order {
            let Some(participant) = self.slots[slot].as_deref_mut() else {
                continue;
            };
            if let Err(cause) = participant.prepare(&self.ctx) {
                tracing::warn!(
                    txn_id = %self.ctx.txn_id,
                    participant = %participant.sort_key(),
                    error = %cause,
                    "Vote failed, aborting transaction"
                );
                self.abort_after_failed_vote(&order, &voted);
                self.status = TransactionStatus::Aborted;

                let err = TpcError::TransactionFailed {
                    txn_id: self.ctx.txn_id.clone(),
                    cause: Box::new(cause),
                };
                log_op_error!(
                    "commit",
                    err.clone(),
                    duration_ms = elapsed_ms(start),
                    txn_id = %self.ctx.txn_id
                );
                return Err(err);
            }
            voted.push(slot);
        }

        // Phase 2: finish
        for &slot in &order {
            let Some(participant) = self.slots[slot].as_deref_mut() else {
                continue;
            };
            if let Err(cause) = participant.finish(&self.ctx) {
                self.status = TransactionStatus::Inconsistent;
                let err = TpcError::ProtocolViolation {
                    participant: participant.sort_key().to_string(),
                    reason: format!("finish failed after a successful vote: {}", cause),
                };
                tracing::error!(
                    txn_id = %self.ctx.txn_id,
                    participant = %participant.sort_key(),
                    error = %cause,
                    "Second phase failed; participants may be in an inconsistent state"
                );
                log_op_error!(
                    "commit",
                    err.clone(),
                    duration_ms = elapsed_ms(start),
                    txn_id = %self.ctx.txn_id
                );
                return Err(err);
            }
        }

        self.status = TransactionStatus::Committed;
        log_op_end!(
            "commit",
            duration_ms = elapsed_ms(start),
            txn_id = %self.ctx.txn_id
        );
        Ok(())
    }

    /// Abort every joined participant
    ///
    /// Repeat-safe. Accepted while active, doomed, or inconsistent (to roll
    /// back participants phase 2 never reached).
    ///
    /// # Errors
    ///
    /// - `TransactionClosed` after a successful commit
    /// - the first participant error; every participant is still visited
    pub fn abort(&mut self) -> Result<()> {
        match self.status {
            TransactionStatus::Aborted => return Ok(()),
            TransactionStatus::Committed => return Err(self.closed("abort")),
            _ => {}
        }

        let start = Instant::now();
        let order = self.commit_order();
        log_op_start!(
            "abort",
            txn_id = %self.ctx.txn_id,
            participant_count = order.len()
        );

        let mut first_error = None;
        for &slot in &order {
            let Some(participant) = self.slots[slot].as_deref_mut() else {
                continue;
            };
            if let Err(err) = participant.abort(&self.ctx) {
                tracing::error!(
                    txn_id = %self.ctx.txn_id,
                    participant = %participant.sort_key(),
                    error = %err,
                    "Participant abort failed"
                );
                first_error.get_or_insert(err);
            }
        }

        if self.status != TransactionStatus::Inconsistent {
            self.status = TransactionStatus::Aborted;
        }

        match first_error {
            Some(err) => {
                log_op_error!(
                    "abort",
                    err.clone(),
                    duration_ms = elapsed_ms(start),
                    txn_id = %self.ctx.txn_id
                );
                Err(err)
            }
            None => {
                log_op_end!(
                    "abort",
                    duration_ms = elapsed_ms(start),
                    txn_id = %self.ctx.txn_id
                );
                Ok(())
            }
        }
    }

    /// Slots sorted by participant sort key
    fn commit_order(&self) -> Vec<usize> {
        let mut keyed: Vec<(&str, usize)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, p)| p.as_deref().map(|p| (p.sort_key(), slot)))
            .collect();
        keyed.sort();
        keyed.into_iter().map(|(_, slot)| slot).collect()
    }

    fn abort_after_failed_vote(&mut self, order: &[usize], voted: &[usize]) {
        for &slot in order {
            let Some(participant) = self.slots[slot].as_deref_mut() else {
                continue;
            };
            let result = if voted.contains(&slot) {
                participant.finish_abort(&self.ctx)
            } else {
                participant.abort(&self.ctx)
            };
            if let Err(err) = result {
                tracing::error!(
                    txn_id = %self.ctx.txn_id,
                    participant = %participant.sort_key(),
                    error = %err,
                    "Participant rollback after failed vote failed"
                );
            }
        }
    }

    fn ensure_active(&self, op: &str) -> Result<()> {
        match self.status {
            TransactionStatus::Active => Ok(()),
            TransactionStatus::Doomed => Err(TpcError::TransactionDoomed {
                txn_id: self.ctx.txn_id.clone(),
            }),
            _ => Err(self.closed(op)),
        }
    }

    fn closed(&self, op: &str) -> TpcError {
        TpcError::TransactionClosed {
            txn_id: self.ctx.txn_id.clone(),
            status: self.status.to_string(),
            op: op.to_string(),
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self
            .slots
            .iter()
            .flatten()
            .map(|p| p.sort_key())
            .collect();
        f.debug_struct("Transaction")
            .field("txn_id", &self.ctx.txn_id)
            .field("status", &self.status)
            .field("participants", &keys)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if matches!(
            self.status,
            TransactionStatus::Active | TransactionStatus::Doomed
        ) && self.participant_count() > 0
        {
            tracing::warn!(
                txn_id = %self.ctx.txn_id,
                "Transaction dropped without commit or abort; aborting"
            );
            // Errors are already logged per participant
            let _ = self.abort();
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
