//! Snapshot participant implementation
//!
//! ## State held in memory
//!
//! - `committed`: the mapping as last loaded from or written to disk
//! - `working`: the mapping all reads and writes go to
//! - `savepoints`: deep copies of `working`, keyed by savepoint id
//!
//! Abort copies `committed` back over `working`. Finish serializes
//! `working` and replaces the file through `atomic_write`.

use std::any::Any;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tpcdm_core::participant::require_state;
use tpcdm_core::{Participant, ParticipantState, Savepoint, TpcError, TransactionContext};
use uuid::Uuid;

use super::atomic::atomic_write;
use crate::errors::{io_error, serialization_error, Result};

/// Ordered string-keyed mapping persisted by a snapshot participant
pub type Mapping<V> = BTreeMap<String, V>;

/// Read a persisted snapshot
///
/// A missing or zero-length file is an empty mapping.
///
/// # Errors
///
/// Returns `Io` if the file cannot be read and `Serialization` if it does
/// not hold a JSON object of `V`.
pub fn load_snapshot<V: DeserializeOwned>(path: &Path) -> Result<Mapping<V>> {
    match fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(Mapping::new()),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| serialization_error(&format!("load {}", path.display()), e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Mapping::new()),
        Err(e) => Err(io_error("read_snapshot", e)),
    }
}

/// Participant over a JSON-persisted key/value mapping
///
/// `V` defaults to `serde_json::Value`, which accepts any nested structure
/// of maps, sequences, strings, numbers, booleans and null.
pub struct SnapshotParticipant<V = serde_json::Value> {
    path: PathBuf,
    sort_key: String,
    state: ParticipantState,
    working: Mapping<V>,
    committed: Mapping<V>,
    savepoints: BTreeMap<u64, Mapping<V>>,
    next_savepoint: u64,
}

impl<V> SnapshotParticipant<V>
where
    V: Serialize + DeserializeOwned + Clone + 'static,
{
    /// Load the snapshot at `path` and begin a transaction on it
    ///
    /// # Errors
    ///
    /// Propagates `load_snapshot` errors.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut participant = Self {
            path: path.into(),
            sort_key: format!("snapshot:{}", Uuid::now_v7()),
            state: ParticipantState::Idle,
            working: Mapping::new(),
            committed: Mapping::new(),
            savepoints: BTreeMap::new(),
            next_savepoint: 1,
        };
        participant.begin()?;
        Ok(participant)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload from disk and become `Active`
    ///
    /// # Errors
    ///
    /// `InvalidState` unless `Idle`, or a load error.
    pub fn begin(&mut self) -> Result<()> {
        require_state(&self.sort_key, "begin", self.state, ParticipantState::Idle)?;

        let loaded: Mapping<V> = load_snapshot(&self.path)?;
        self.committed = loaded.clone();
        self.working = loaded;
        self.state = ParticipantState::Active;

        tracing::debug!(
            participant = %self.sort_key,
            path = %self.path.display(),
            entries = self.working.len(),
            "Snapshot loaded"
        );
        Ok(())
    }

    /// Return a terminated participant to `Idle`
    ///
    /// # Errors
    ///
    /// `InvalidState` while the current transaction is still open.
    pub fn release(&mut self) -> Result<()> {
        if !self.state.is_terminal() {
            return Err(TpcError::InvalidState {
                participant: self.sort_key.clone(),
                op: "release".to_string(),
                state: self.state.to_string(),
            });
        }
        self.working.clear();
        self.committed.clear();
        self.savepoints.clear();
        self.state = ParticipantState::Idle;
        Ok(())
    }

    /// `release()` followed by `begin()`
    ///
    /// # Errors
    ///
    /// See `release` and `begin`.
    pub fn reset(&mut self) -> Result<()> {
        self.release()?;
        self.begin()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.working.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.working.contains_key(key)
    }

    pub fn keys(&self) -> btree_map::Keys<'_, String, V> {
        self.working.keys()
    }

    pub fn values(&self) -> btree_map::Values<'_, String, V> {
        self.working.values()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, V> {
        self.working.iter()
    }

    pub fn len(&self) -> usize {
        self.working.len()
    }

    pub fn is_empty(&self) -> bool {
        self.working.is_empty()
    }

    /// Mutable access to a stored value
    ///
    /// Changes made through the reference are pending like any other write.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless `Active`.
    pub fn get_mut(&mut self, key: &str) -> Result<Option<&mut V>> {
        self.require_writable("get_mut")?;
        Ok(self.working.get_mut(key))
    }

    /// Insert or replace a value, returning the previous one
    ///
    /// # Errors
    ///
    /// `InvalidState` unless `Active`.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Result<Option<V>> {
        self.require_writable("insert")?;
        Ok(self.working.insert(key.into(), value))
    }

    /// Remove a key, returning its value
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if absent, `InvalidState` unless `Active`.
    pub fn remove(&mut self, key: &str) -> Result<V> {
        self.require_writable("remove")?;
        self.working.remove(key).ok_or_else(|| TpcError::KeyNotFound {
            key: key.to_string(),
        })
    }

    /// # Errors
    ///
    /// `InvalidState` unless `Active`.
    pub fn clear(&mut self) -> Result<()> {
        self.require_writable("clear")?;
        self.working.clear();
        Ok(())
    }

    fn require_writable(&self, op: &str) -> Result<()> {
        require_state(&self.sort_key, op, self.state, ParticipantState::Active)
    }

    fn discard_pending(&mut self, op: &str) {
        if !matches!(
            self.state,
            ParticipantState::Active | ParticipantState::Voted
        ) {
            return;
        }
        self.working = self.committed.clone();
        self.savepoints.clear();
        self.state = ParticipantState::Aborted;

        tracing::debug!(participant = %self.sort_key, op = op, "Snapshot changes discarded");
    }
}

impl<V> Participant for SnapshotParticipant<V>
where
    V: Serialize + DeserializeOwned + Clone + 'static,
{
    fn sort_key(&self) -> &str {
        &self.sort_key
    }

    fn state(&self) -> ParticipantState {
        self.state
    }

    fn prepare(&mut self, _txn: &TransactionContext) -> Result<()> {
        require_state(&self.sort_key, "prepare", self.state, ParticipantState::Active)?;

        // Full serialization pass, output discarded
        serde_json::to_writer(io::sink(), &self.working).map_err(|e| {
            TpcError::PrepareFailed {
                participant: self.sort_key.clone(),
                reason: format!("working state cannot be serialized: {}", e),
            }
        })?;

        self.state = ParticipantState::Voted;
        Ok(())
    }

    fn finish(&mut self, _txn: &TransactionContext) -> Result<()> {
        require_state(&self.sort_key, "finish", self.state, ParticipantState::Voted)?;

        let bytes = serde_json::to_vec_pretty(&self.working)
            .map_err(|e| serialization_error("finish", e))?;
        atomic_write(&self.path, &bytes)?;

        self.committed = self.working.clone();
        self.savepoints.clear();
        self.state = ParticipantState::Committed;

        tracing::debug!(
            participant = %self.sort_key,
            path = %self.path.display(),
            bytes = bytes.len(),
            "Snapshot written"
        );
        Ok(())
    }

    fn abort(&mut self, _txn: &TransactionContext) -> Result<()> {
        self.discard_pending("abort");
        Ok(())
    }

    fn finish_abort(&mut self, _txn: &TransactionContext) -> Result<()> {
        self.discard_pending("finish_abort");
        Ok(())
    }

    fn savepoint(&mut self, txn: &TransactionContext) -> Result<Savepoint> {
        require_state(&self.sort_key, "savepoint", self.state, ParticipantState::Active)?;

        let id = self.next_savepoint;
        self.next_savepoint += 1;
        self.savepoints.insert(id, self.working.clone());

        Ok(Savepoint::new(id, self.sort_key.clone(), txn.txn_id.clone()))
    }

    fn rollback_savepoint(
        &mut self,
        txn: &TransactionContext,
        savepoint: &Savepoint,
    ) -> Result<()> {
        if self.state != ParticipantState::Active {
            return Err(TpcError::SavepointInvalid {
                participant: self.sort_key.clone(),
                savepoint_id: savepoint.id(),
                reason: format!("transaction already terminated ({})", self.state),
            });
        }
        savepoint.check_owner(&self.sort_key, txn)?;

        let captured = self
            .savepoints
            .get(&savepoint.id())
            .ok_or_else(|| TpcError::SavepointInvalid {
                participant: self.sort_key.clone(),
                savepoint_id: savepoint.id(),
                reason: "savepoint was discarded by an earlier rollback".to_string(),
            })?;
        self.working = captured.clone();

        // Later savepoints are invalid; this one may be rolled back again
        self.savepoints.split_off(&(savepoint.id() + 1));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
