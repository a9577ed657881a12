use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tpcdm_core::participant::require_state;
use tpcdm_core::{Participant, ParticipantState, Result, Savepoint, TpcError, TransactionContext};

/// Shared, ordered record of protocol calls, e.g. `"prepare:k1"`
pub type CallLog = Rc<RefCell<Vec<String>>>;

#[allow(dead_code)]
pub fn new_log() -> CallLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// Calls recorded for one operation, in order
#[allow(dead_code)]
pub fn calls_for(log: &CallLog, op: &str) -> Vec<String> {
    let prefix = format!("{}:", op);
    log.borrow()
        .iter()
        .filter_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
        .collect()
}

/// In-memory participant that records every protocol call
///
/// Keeps a tiny counter map so savepoint and abort behavior is observable.
pub struct RecordingParticipant {
    key: String,
    log: CallLog,
    state: ParticipantState,
    fail_prepare: bool,
    fail_finish: bool,
    working: BTreeMap<String, i64>,
    committed: BTreeMap<String, i64>,
    savepoints: BTreeMap<u64, BTreeMap<String, i64>>,
    next_savepoint: u64,
}

#[allow(dead_code)]
impl RecordingParticipant {
    pub fn new(key: &str, log: &CallLog) -> Self {
        Self {
            key: key.to_string(),
            log: log.clone(),
            state: ParticipantState::Active,
            fail_prepare: false,
            fail_finish: false,
            working: BTreeMap::new(),
            committed: BTreeMap::new(),
            savepoints: BTreeMap::new(),
            next_savepoint: 1,
        }
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn failing_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }

    pub fn set(&mut self, key: &str, value: i64) {
        self.working.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.working.get(key).copied()
    }

    pub fn committed(&self, key: &str) -> Option<i64> {
        self.committed.get(key).copied()
    }

    fn record(&self, op: &str) {
        self.log.borrow_mut().push(format!("{}:{}", op, self.key));
    }

    fn rollback_to_committed(&mut self) {
        if !self.state.is_terminal() {
            self.working = self.committed.clone();
            self.savepoints.clear();
            self.state = ParticipantState::Aborted;
        }
    }
}

impl Participant for RecordingParticipant {
    fn sort_key(&self) -> &str {
        &self.key
    }

    fn state(&self) -> ParticipantState {
        self.state
    }

    fn prepare(&mut self, _txn: &TransactionContext) -> Result<()> {
        self.record("prepare");
        require_state(&self.key, "prepare", self.state, ParticipantState::Active)?;
        if self.fail_prepare {
            return Err(TpcError::PrepareFailed {
                participant: self.key.clone(),
                reason: "forced vote failure".to_string(),
            });
        }
        self.state = ParticipantState::Voted;
        Ok(())
    }

    fn finish(&mut self, _txn: &TransactionContext) -> Result<()> {
        self.record("finish");
        require_state(&self.key, "finish", self.state, ParticipantState::Voted)?;
        if self.fail_finish {
            return Err(TpcError::Io {
                op: "finish".to_string(),
                message: "disk full".to_string(),
            });
        }
        self.committed = self.working.clone();
        self.savepoints.clear();
        self.state = ParticipantState::Committed;
        Ok(())
    }

    fn abort(&mut self, _txn: &TransactionContext) -> Result<()> {
        self.record("abort");
        self.rollback_to_committed();
        Ok(())
    }

    fn finish_abort(&mut self, _txn: &TransactionContext) -> Result<()> {
        self.record("finish_abort");
        self.rollback_to_committed();
        Ok(())
    }

    fn savepoint(&mut self, txn: &TransactionContext) -> Result<Savepoint> {
        self.record("savepoint");
        require_state(&self.key, "savepoint", self.state, ParticipantState::Active)?;
        let id = self.next_savepoint;
        self.next_savepoint += 1;
        self.savepoints.insert(id, self.working.clone());
        Ok(Savepoint::new(id, self.key.clone(), txn.txn_id.clone()))
    }

    fn rollback_savepoint(
        &mut self,
        txn: &TransactionContext,
        savepoint: &Savepoint,
    ) -> Result<()> {
        self.record("rollback_savepoint");
        savepoint.check_owner(&self.key, txn)?;
        let captured = self
            .savepoints
            .get(&savepoint.id())
            .cloned()
            .ok_or_else(|| TpcError::SavepointInvalid {
                participant: self.key.clone(),
                savepoint_id: savepoint.id(),
                reason: "unknown savepoint".to_string(),
            })?;
        self.working = captured;
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
