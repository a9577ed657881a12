//! SQLite participant implementation
//!
//! Delegates to the connection's native transaction. Application SQL runs
//! directly on `connection()`; the participant only issues the transaction
//! control statements.
//!
//! SQLite has no separate prepare step. The vote checks that the native
//! transaction is still open and that no deferred foreign key would make
//! `COMMIT` fail; the real work happens in `COMMIT`.

use std::any::Any;
use std::collections::BTreeMap;

use rusqlite::Connection;
use tpcdm_core::participant::require_state;
use tpcdm_core::{Participant, ParticipantState, Savepoint, TpcError, TransactionContext};
use uuid::Uuid;

use crate::errors::{from_rusqlite, Result};

/// Participant owning one SQLite connection
pub struct SqliteParticipant {
    conn: Connection,
    sort_key: String,
    state: ParticipantState,
    /// Savepoint id -> native savepoint name
    savepoints: BTreeMap<u64, String>,
    next_savepoint: u64,
}

impl SqliteParticipant {
    /// Take ownership of `conn` and open a transaction on it
    ///
    /// # Errors
    ///
    /// See `begin`.
    pub fn new(conn: Connection) -> Result<Self> {
        let mut participant = Self {
            conn,
            sort_key: format!("sqlite:{}", Uuid::now_v7()),
            state: ParticipantState::Idle,
            savepoints: BTreeMap::new(),
            next_savepoint: 1,
        };
        participant.begin()?;
        Ok(participant)
    }

    /// Connection for application statements
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Issue `BEGIN` and become `Active`
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless `Idle`
    /// - `InvalidInput` if the connection already has an open transaction
    /// - `Busy` or `Persistence` if SQLite rejects `BEGIN`
    pub fn begin(&mut self) -> Result<()> {
        require_state(&self.sort_key, "begin", self.state, ParticipantState::Idle)?;

        if !self.conn.is_autocommit() {
            return Err(TpcError::InvalidInput {
                reason: "connection already has an open transaction".to_string(),
            });
        }

        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| from_rusqlite("begin", e))?;
        self.state = ParticipantState::Active;
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

    /// Give the connection back once the transaction has an outcome
    ///
    /// # Errors
    ///
    /// `InvalidState` while the transaction is still open.
    pub fn into_connection(self) -> Result<Connection> {
        if matches!(
            self.state,
            ParticipantState::Active | ParticipantState::Voted
        ) {
            return Err(TpcError::InvalidState {
                participant: self.sort_key.clone(),
                op: "into_connection".to_string(),
                state: self.state.to_string(),
            });
        }
        Ok(self.conn)
    }

    /// First table holding a row with a dangling foreign key, if enforcement is on
    fn foreign_key_violation(&self) -> Result<Option<String>> {
        let enforced: bool = self
            .conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .map_err(|e| from_rusqlite("prepare", e))?;
        if !enforced {
            return Ok(None);
        }

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .map_err(|e| from_rusqlite("prepare", e))?;
        let mut rows = stmt.query([]).map_err(|e| from_rusqlite("prepare", e))?;
        let table = match rows.next().map_err(|e| from_rusqlite("prepare", e))? {
            Some(row) => Some(row.get(0).map_err(|e| from_rusqlite("prepare", e))?),
            None => None,
        };
        Ok(table)
    }

    fn rollback(&mut self, op: &str) -> Result<()> {
        if !matches!(
            self.state,
            ParticipantState::Active | ParticipantState::Voted
        ) {
            return Ok(());
        }

        if !self.conn.is_autocommit() {
            self.conn
                .execute_batch("ROLLBACK")
                .map_err(|e| from_rusqlite(op, e))?;
        }
        self.savepoints.clear();
        self.state = ParticipantState::Aborted;

        tracing::debug!(participant = %self.sort_key, op = op, "SQLite transaction rolled back");
        Ok(())
    }
}

impl Participant for SqliteParticipant {
    fn sort_key(&self) -> &str {
        &self.sort_key
    }

    fn state(&self) -> ParticipantState {
        self.state
    }

    fn prepare(&mut self, _txn: &TransactionContext) -> Result<()> {
        require_state(&self.sort_key, "prepare", self.state, ParticipantState::Active)?;

        if self.conn.is_autocommit() {
            return Err(TpcError::PrepareFailed {
                participant: self.sort_key.clone(),
                reason: "native transaction is no longer open".to_string(),
            });
        }

        // Deferred foreign keys are only enforced at COMMIT, which is too late
        if let Some(table) = self.foreign_key_violation()? {
            return Err(TpcError::PrepareFailed {
                participant: self.sort_key.clone(),
                reason: format!("foreign key violation in table {}", table),
            });
        }

        self.state = ParticipantState::Voted;
        Ok(())
    }

    fn finish(&mut self, _txn: &TransactionContext) -> Result<()> {
        require_state(&self.sort_key, "finish", self.state, ParticipantState::Voted)?;

        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| from_rusqlite("commit", e))?;
        self.savepoints.clear();
        self.state = ParticipantState::Committed;

        tracing::debug!(participant = %self.sort_key, "SQLite transaction committed");
        Ok(())
    }

    fn abort(&mut self, _txn: &TransactionContext) -> Result<()> {
        self.rollback("abort")
    }

    fn finish_abort(&mut self, _txn: &TransactionContext) -> Result<()> {
        self.rollback("finish_abort")
    }

    fn savepoint(&mut self, txn: &TransactionContext) -> Result<Savepoint> {
        require_state(&self.sort_key, "savepoint", self.state, ParticipantState::Active)?;

        let name = format!("sp_{}", Uuid::now_v7().simple());
        self.conn
            .execute_batch(&format!("SAVEPOINT {}", name))
            .map_err(|e| from_rusqlite("savepoint", e))?;

        let id = self.next_savepoint;
        self.next_savepoint += 1;
        self.savepoints.insert(id, name);

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

        let name = self
            .savepoints
            .get(&savepoint.id())
            .ok_or_else(|| TpcError::SavepointInvalid {
                participant: self.sort_key.clone(),
                savepoint_id: savepoint.id(),
                reason: "savepoint was discarded by an earlier rollback".to_string(),
            })?;

        // ROLLBACK TO keeps the named savepoint and drops the ones after it
        self.conn
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .map_err(|e| from_rusqlite("rollback_savepoint", e))?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn participant() -> SqliteParticipant {
        let conn = db::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")
            .unwrap();
        SqliteParticipant::new(conn).unwrap()
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_new_opens_transaction() {
        let p = participant();
        assert_eq!(p.state(), ParticipantState::Active);
        assert!(!p.connection().is_autocommit());
        assert!(p.sort_key().starts_with("sqlite:"));
    }

    #[test]
    fn test_new_rejects_connection_mid_transaction() {
        let conn = db::open_in_memory().unwrap();
        conn.execute_batch("BEGIN").unwrap();

        assert!(matches!(
            SqliteParticipant::new(conn),
            Err(TpcError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_prepare_fails_when_transaction_ended_externally() {
        let mut p = participant();
        p.connection().execute_batch("ROLLBACK").unwrap();

        let err = p.prepare(&TransactionContext::new()).unwrap_err();
        assert!(matches!(err, TpcError::PrepareFailed { .. }));
        assert_eq!(p.state(), ParticipantState::Active);

        // Abort still succeeds without a native transaction
        p.abort(&TransactionContext::new()).unwrap();
        assert_eq!(p.state(), ParticipantState::Aborted);
    }

    #[test]
    fn test_prepare_rejects_deferred_foreign_key_violation() {
        let conn = db::open_in_memory().unwrap();
        db::configure(&conn).unwrap();
        conn.execute_batch(
            "CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE child (
                 id INTEGER PRIMARY KEY,
                 parent_id INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED
             );",
        )
        .unwrap();
        let mut p = SqliteParticipant::new(conn).unwrap();
        let ctx = TransactionContext::new();

        // Accepted by the statement, only COMMIT would reject it
        p.connection()
            .execute("INSERT INTO child (id, parent_id) VALUES (1, 42)", [])
            .unwrap();

        let err = p.prepare(&ctx).unwrap_err();
        assert!(matches!(
            err,
            TpcError::PrepareFailed { ref reason, .. } if reason.contains("child")
        ));
        assert_eq!(p.state(), ParticipantState::Active);

        // Resolving the reference before the vote makes it succeed
        p.connection()
            .execute("INSERT INTO parent (id) VALUES (42)", [])
            .unwrap();
        p.prepare(&ctx).unwrap();
        p.finish(&ctx).unwrap();
    }

    #[test]
    fn test_abort_is_repeat_safe() {
        let mut p = participant();
        let ctx = TransactionContext::new();
        p.connection()
            .execute("INSERT INTO t (id, v) VALUES (1, 'x')", [])
            .unwrap();

        p.abort(&ctx).unwrap();
        p.abort(&ctx).unwrap();

        assert_eq!(count(p.connection()), 0);
        assert!(p.connection().is_autocommit());
    }

    #[test]
    fn test_reset_after_commit_starts_new_transaction() {
        let mut p = participant();
        let ctx = TransactionContext::new();
        p.prepare(&ctx).unwrap();
        p.finish(&ctx).unwrap();

        p.reset().unwrap();
        assert_eq!(p.state(), ParticipantState::Active);
        assert!(!p.connection().is_autocommit());
    }

    #[test]
    fn test_into_connection_requires_outcome() {
        let p = participant();
        assert!(matches!(
            p.into_connection(),
            Err(TpcError::InvalidState { ref op, .. }) if op == "into_connection"
        ));

        let mut p = participant();
        p.abort(&TransactionContext::new()).unwrap();
        let conn = p.into_connection().unwrap();
        assert!(conn.is_autocommit());
    }
}
