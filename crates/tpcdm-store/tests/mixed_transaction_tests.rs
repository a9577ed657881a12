//! Mixed Participant Tests
//!
//! A snapshot participant and SQLite participants in one transaction
//! commit or abort together.

use std::any::Any;
use std::fs;
use std::path::Path;

use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;
use tpcdm_core::{
    Participant, ParticipantState, Result, Savepoint, TpcError, Transaction, TransactionContext,
    TransactionStatus,
};
use tpcdm_store::{db, SnapshotParticipant, SqliteParticipant};

/// Delegates to a real SQLite participant but always votes no
struct VetoingSqlite(SqliteParticipant);

impl Participant for VetoingSqlite {
    fn sort_key(&self) -> &str {
        self.0.sort_key()
    }

    fn state(&self) -> ParticipantState {
        self.0.state()
    }

    fn prepare(&mut self, _txn: &TransactionContext) -> Result<()> {
        Err(TpcError::PrepareFailed {
            participant: self.0.sort_key().to_string(),
            reason: "vetoed".to_string(),
        })
    }

    fn finish(&mut self, txn: &TransactionContext) -> Result<()> {
        self.0.finish(txn)
    }

    fn abort(&mut self, txn: &TransactionContext) -> Result<()> {
        self.0.abort(txn)
    }

    fn finish_abort(&mut self, txn: &TransactionContext) -> Result<()> {
        self.0.finish_abort(txn)
    }

    fn savepoint(&mut self, txn: &TransactionContext) -> Result<Savepoint> {
        self.0.savepoint(txn)
    }

    fn rollback_savepoint(&mut self, txn: &TransactionContext, savepoint: &Savepoint) -> Result<()> {
        self.0.rollback_savepoint(txn, savepoint)
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

fn create_db(path: &Path) -> Connection {
    let conn = db::open(path).unwrap();
    conn.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .unwrap();
    conn
}

fn row_count(path: &Path) -> i64 {
    Connection::open(path)
        .unwrap()
        .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
        .unwrap()
}

fn seeded_snapshot(path: &Path) {
    let mut txn = Transaction::begin();
    let p: SnapshotParticipant = SnapshotParticipant::open(path).unwrap();
    let h = txn.join(p).unwrap();
    txn.participant_mut(&h)
        .unwrap()
        .insert("k", json!("committed"))
        .unwrap();
    txn.commit().unwrap();
}

#[test]
fn test_failed_sql_vote_leaves_snapshot_untouched() {
    // GIVEN a committed snapshot file and an empty table
    let dir = TempDir::new().unwrap();
    let snapshot_path = dir.path().join("store.json");
    let db_path = dir.path().join("d1.db");
    seeded_snapshot(&snapshot_path);
    let before = fs::read(&snapshot_path).unwrap();

    // AND a transaction writing to both, where the SQL side votes no
    let mut txn = Transaction::begin();
    let p1: SnapshotParticipant = SnapshotParticipant::open(&snapshot_path).unwrap();
    let h1 = txn.join(p1).unwrap();
    let p2 = VetoingSqlite(SqliteParticipant::new(create_db(&db_path)).unwrap());
    let h2 = txn.join(p2).unwrap();

    txn.participant_mut(&h1)
        .unwrap()
        .insert("k", json!("changed"))
        .unwrap();
    txn.participant(&h2)
        .unwrap()
        .0
        .connection()
        .execute("INSERT INTO items (id, name) VALUES (1, 'a')", [])
        .unwrap();

    // WHEN the transaction commits
    let err = txn.commit().unwrap_err();

    // THEN it failed as a whole
    assert!(matches!(err, TpcError::TransactionFailed { .. }));
    assert_eq!(txn.status(), TransactionStatus::Aborted);

    // AND the snapshot file is byte-for-byte unchanged
    assert_eq!(fs::read(&snapshot_path).unwrap(), before);
    assert_eq!(
        txn.participant(&h1).unwrap().get("k"),
        Some(&json!("committed"))
    );

    // AND the SQL write never became durable
    assert_eq!(row_count(&db_path), 0);
}

#[test]
fn test_sql_transaction_ended_externally_fails_whole_commit() {
    let dir = TempDir::new().unwrap();
    let snapshot_path = dir.path().join("store.json");
    let db_path = dir.path().join("d1.db");

    let mut txn = Transaction::begin();
    let p1: SnapshotParticipant = SnapshotParticipant::open(&snapshot_path).unwrap();
    let h1 = txn.join(p1).unwrap();
    let h2 = txn
        .join(SqliteParticipant::new(create_db(&db_path)).unwrap())
        .unwrap();

    txn.participant_mut(&h1)
        .unwrap()
        .insert("k", json!(1))
        .unwrap();

    // Ending the native transaction behind the participant's back
    txn.participant(&h2)
        .unwrap()
        .connection()
        .execute_batch("ROLLBACK")
        .unwrap();

    let err = txn.commit().unwrap_err();
    match err {
        TpcError::TransactionFailed { cause, .. } => {
            assert!(matches!(*cause, TpcError::PrepareFailed { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!snapshot_path.exists());
}

#[test]
fn test_deferred_foreign_key_violation_fails_vote_before_snapshot_write() {
    // GIVEN a schema whose foreign key is only checked at COMMIT
    let dir = TempDir::new().unwrap();
    let snapshot_path = dir.path().join("store.json");
    let db_path = dir.path().join("d1.db");
    let conn = db::open(&db_path).unwrap();
    db::configure(&conn).unwrap();
    conn.execute_batch(
        "CREATE TABLE parent (id INTEGER PRIMARY KEY);
         CREATE TABLE child (
             id INTEGER PRIMARY KEY,
             parent_id INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED
         );",
    )
    .unwrap();

    // AND a transaction writing the snapshot and a dangling child row
    let mut txn = Transaction::begin();
    let p1: SnapshotParticipant = SnapshotParticipant::open(&snapshot_path).unwrap();
    let h1 = txn.join(p1).unwrap();
    let h2 = txn.join(SqliteParticipant::new(conn).unwrap()).unwrap();
    txn.participant_mut(&h1)
        .unwrap()
        .insert("k", json!(1))
        .unwrap();
    txn.participant(&h2)
        .unwrap()
        .connection()
        .execute("INSERT INTO child (id, parent_id) VALUES (1, 99)", [])
        .unwrap();

    // WHEN the transaction commits
    let err = txn.commit().unwrap_err();

    // THEN the SQL side voted no and nothing was applied anywhere
    match err {
        TpcError::TransactionFailed { cause, .. } => {
            assert!(matches!(*cause, TpcError::PrepareFailed { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(txn.status(), TransactionStatus::Aborted);
    assert!(!snapshot_path.exists());

    let child_rows: i64 = Connection::open(&db_path)
        .unwrap()
        .query_row("SELECT COUNT(*) FROM child", [], |row| row.get(0))
        .unwrap();
    assert_eq!(child_rows, 0);
}

#[test]
fn test_mixed_commit_and_joint_savepoint() {
    let dir = TempDir::new().unwrap();
    let snapshot_path = dir.path().join("store.json");
    let db_path = dir.path().join("d1.db");

    let mut txn = Transaction::begin();
    let p1: SnapshotParticipant = SnapshotParticipant::open(&snapshot_path).unwrap();
    let h1 = txn.join(p1).unwrap();
    let h2 = txn
        .join(SqliteParticipant::new(create_db(&db_path)).unwrap())
        .unwrap();

    txn.participant_mut(&h1)
        .unwrap()
        .insert("kept", json!(true))
        .unwrap();
    txn.participant(&h2)
        .unwrap()
        .connection()
        .execute("INSERT INTO items (id, name) VALUES (1, 'a')", [])
        .unwrap();

    let sp = txn.savepoint().unwrap();

    txn.participant_mut(&h1)
        .unwrap()
        .insert("dropped", json!(true))
        .unwrap();
    txn.participant(&h2)
        .unwrap()
        .connection()
        .execute("INSERT INTO items (id, name) VALUES (2, 'b')", [])
        .unwrap();

    txn.rollback_savepoint(&sp).unwrap();
    txn.commit().unwrap();

    let reloaded: SnapshotParticipant = SnapshotParticipant::open(&snapshot_path).unwrap();
    assert!(reloaded.contains_key("kept"));
    assert!(!reloaded.contains_key("dropped"));
    assert_eq!(row_count(&db_path), 1);
}

#[test]
fn test_sort_keys_distinguish_participant_kinds() {
    let dir = TempDir::new().unwrap();
    let snapshot: SnapshotParticipant =
        SnapshotParticipant::open(dir.path().join("store.json")).unwrap();
    let sqlite = SqliteParticipant::new(db::open_in_memory().unwrap()).unwrap();

    assert!(snapshot.sort_key().starts_with("snapshot:"));
    assert!(sqlite.sort_key().starts_with("sqlite:"));

    // Keys are fixed for the participant's lifetime
    let key = sqlite.sort_key().to_string();
    let mut txn = Transaction::begin();
    let h = txn.join(sqlite).unwrap();
    txn.commit().unwrap();
    assert_eq!(txn.participant(&h).unwrap().sort_key(), key);
}
