//! Three-database walkthrough
//!
//! Joins one SQLite participant per database into a single transaction,
//! rolls back a joint savepoint, commits, then shows that an aborted
//! transaction leaves nothing behind.

use std::path::{Path, PathBuf};

use clap::Args;
use rusqlite::params;
use tpcdm_core::{ParticipantHandle, Result, Transaction};
use tpcdm_store::db;
use tpcdm_store::errors::from_rusqlite;
use tpcdm_store::SqliteParticipant;

const DATABASES: [&str; 3] = ["d1.db", "d2.db", "d3.db"];

#[derive(Debug, Args)]
pub struct DemoArgs {
    /// Directory for d1.db, d2.db and d3.db (created if missing)
    #[arg(long, default_value = ".tpcdm")]
    pub dir: PathBuf,
}

type Handles = Vec<ParticipantHandle<SqliteParticipant>>;

pub fn execute(args: DemoArgs) -> std::result::Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&args.dir)?;
    let paths: Vec<PathBuf> = DATABASES.iter().map(|name| args.dir.join(name)).collect();
    for path in &paths {
        reset_database(path)?;
    }

    tracing::info!(dir = %args.dir.display(), "Running savepoint scenario");
    let mut txn = Transaction::begin();
    let handles = join_all(&mut txn, &paths)?;
    insert_rows(&txn, &handles, &[(1, "a"), (2, "b"), (3, "c")])?;
    let savepoint = txn.savepoint()?;
    insert_rows(&txn, &handles, &[(4, "d"), (5, "e"), (6, "f")])?;
    txn.rollback_savepoint(&savepoint)?;
    txn.commit()?;

    println!("Committed after savepoint rollback:");
    print_rows(&paths)?;

    tracing::info!(dir = %args.dir.display(), "Running abort scenario");
    let mut txn = Transaction::begin();
    let handles = join_all(&mut txn, &paths)?;
    insert_rows(&txn, &handles, &[(7, "g"), (8, "h"), (9, "i")])?;
    txn.abort()?;

    println!("After aborted transaction:");
    print_rows(&paths)?;

    Ok(())
}

fn reset_database(path: &Path) -> Result<()> {
    let conn = db::open(path)?;
    db::configure(&conn)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS items (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         DELETE FROM items;",
    )
    .map_err(|e| from_rusqlite("reset_database", e))
}

fn join_all(txn: &mut Transaction, paths: &[PathBuf]) -> Result<Handles> {
    paths
        .iter()
        .map(|path| {
            let conn = db::open(path)?;
            db::configure(&conn)?;
            txn.join(SqliteParticipant::new(conn)?)
        })
        .collect()
}

/// One row per participant, in join order
fn insert_rows(txn: &Transaction, handles: &Handles, rows: &[(i64, &str)]) -> Result<()> {
    for (handle, (id, name)) in handles.iter().zip(rows) {
        txn.participant(handle)?
            .connection()
            .execute(
                "INSERT INTO items (id, name) VALUES (?1, ?2)",
                params![id, name],
            )
            .map_err(|e| from_rusqlite("insert", e))?;
    }
    Ok(())
}

fn read_rows(path: &Path) -> Result<Vec<(i64, String)>> {
    let conn = db::open(path)?;
    let mut stmt = conn
        .prepare("SELECT id, name FROM items ORDER BY id")
        .map_err(|e| from_rusqlite("select", e))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| from_rusqlite("select", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| from_rusqlite("select", e))?;
    Ok(rows)
}

fn print_rows(paths: &[PathBuf]) -> Result<()> {
    for (name, path) in DATABASES.iter().zip(paths) {
        let rows = read_rows(path)?;
        let formatted: Vec<String> = rows
            .iter()
            .map(|(id, value)| format!("({}, '{}')", id, value))
            .collect();
        println!("  {}: {}", name, formatted.join(", "));
    }
    Ok(())
}
