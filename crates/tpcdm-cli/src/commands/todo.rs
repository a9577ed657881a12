//! Task list command
//!
//! Every invocation is one managed transaction over a snapshot file: the
//! whole command succeeds or the file is left as it was.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tpcdm_core::{Result, TpcConfig, TpcError, TransactionManager};
use tpcdm_store::SnapshotParticipant;

#[derive(Debug, Args)]
pub struct TodoArgs {
    /// Snapshot file holding the tasks
    #[arg(long, default_value = "todo.json")]
    pub file: PathBuf,

    #[command(subcommand)]
    pub command: TodoCommand,
}

#[derive(Debug, Subcommand)]
pub enum TodoCommand {
    /// Add a task
    Add { text: String },
    /// List tasks in creation order
    List,
    /// Mark tasks as done
    Done {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Mark tasks as not done
    Undone {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Delete tasks
    Delete {
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    pub done: bool,
    pub created_at: DateTime<Utc>,
}

type Tasks = SnapshotParticipant<TodoItem>;

pub fn execute(
    args: TodoArgs,
    config: &TpcConfig,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let manager = TransactionManager::from_config(config);

    let lines = manager.run(|txn| {
        let handle = txn.join(Tasks::open(&args.file)?)?;
        apply(&args.command, txn.participant_mut(&handle)?, Utc::now())
    })?;

    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

fn apply(command: &TodoCommand, tasks: &mut Tasks, now: DateTime<Utc>) -> Result<Vec<String>> {
    match command {
        TodoCommand::Add { text } => {
            let text = text.trim();
            if text.is_empty() {
                return Err(TpcError::InvalidInput {
                    reason: "task text must not be empty".to_string(),
                });
            }
            let key = next_key(tasks, now);
            tasks.insert(
                key.clone(),
                TodoItem {
                    text: text.to_string(),
                    done: false,
                    created_at: now,
                },
            )?;
            Ok(vec![format!("Added {}", key)])
        }
        TodoCommand::List => {
            if tasks.is_empty() {
                return Ok(vec!["No tasks".to_string()]);
            }
            Ok(tasks
                .iter()
                .map(|(key, item)| {
                    let mark = if item.done { 'x' } else { ' ' };
                    format!("{} [{}] {}", key, mark, item.text)
                })
                .collect())
        }
        TodoCommand::Done { keys } => set_done(tasks, keys, true),
        TodoCommand::Undone { keys } => set_done(tasks, keys, false),
        TodoCommand::Delete { keys } => {
            for key in keys {
                tasks.remove(key)?;
            }
            Ok(keys.iter().map(|key| format!("Deleted {}", key)).collect())
        }
    }
}

fn set_done(tasks: &mut Tasks, keys: &[String], done: bool) -> Result<Vec<String>> {
    for key in keys {
        let item = tasks
            .get_mut(key)?
            .ok_or_else(|| TpcError::KeyNotFound { key: key.clone() })?;
        item.done = done;
    }
    let verb = if done { "Done" } else { "Reopened" };
    Ok(keys.iter().map(|key| format!("{} {}", verb, key)).collect())
}

/// Creation timestamp, suffixed on collision so keys sort by creation
fn next_key(tasks: &Tasks, now: DateTime<Utc>) -> String {
    let base = now.format("%Y%m%dT%H%M%S%.6f").to_string();
    let mut key = base.clone();
    let mut suffix = 1;
    while tasks.contains_key(&key) {
        key = format!("{}-{}", base, suffix);
        suffix += 1;
    }
    key
}
