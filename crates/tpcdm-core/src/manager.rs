//! Request-scoped transaction manager
//!
//! Wraps a unit of work the way a web request is wrapped: begin a
//! transaction, run the handler, commit on success, abort on failure, and
//! re-run the whole handler when the failure is retryable.

use std::time::Instant;

use tpcdm_core_types::{RequestId, TransactionContext};

use crate::config::TpcConfig;
use crate::errors::{ExError, Result};
use crate::log_op_error;
use crate::transaction::Transaction;

#[derive(Debug, Clone)]
pub struct TransactionManager {
    attempts: u32,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self { attempts: 1 }
    }
}

impl TransactionManager {
    /// Manager that runs each unit of work at most `attempts` times
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    pub fn from_config(config: &TpcConfig) -> Self {
        Self::new(config.attempts)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run `work` inside a fresh transaction
    ///
    /// `work` must open and join its own participants on every call, since
    /// each attempt uses a new transaction. Success is reported only after
    /// `commit()` returned `Ok`.
    ///
    /// # Errors
    ///
    /// The error from `work` or from `commit()`, after the last attempt.
    pub fn run<T, F>(&self, mut work: F) -> Result<T>
    where
        F: FnMut(&mut Transaction) -> Result<T>,
    {
        let request_id = RequestId::new();
        let start = Instant::now();
        let mut attempt = 1;
        loop {
            let ctx = TransactionContext::new().with_request_id(request_id.clone());
            let mut txn = Transaction::with_context(ctx);

            let outcome = match work(&mut txn) {
                Ok(value) => txn.commit().map(|()| value),
                Err(err) => {
                    if let Err(abort_err) = txn.abort() {
                        tracing::error!(
                            txn_id = %txn.txn_id(),
                            error = %abort_err,
                            "Abort after failed unit of work also failed"
                        );
                    }
                    Err(err)
                }
            };

            match outcome {
                Err(err) if err.is_retryable() && attempt < self.attempts => {
                    tracing::info!(
                        request_id = %request_id,
                        attempt = attempt,
                        error = %err,
                        "Retrying transaction"
                    );
                    attempt += 1;
                }
                Err(err) => {
                    let ex_err = ExError::from(err.clone()).with_context(txn.context());
                    log_op_error!(
                        "run",
                        ex_err.clone(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        txn_id = %txn.txn_id(),
                        request_id = ex_err.request_id().map(|id| id.as_str()).unwrap_or_default(),
                        attempts = attempt
                    );
                    return Err(err);
                }
                ok => return ok,
            }
        }
    }
}
