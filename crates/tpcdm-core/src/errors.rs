use tpcdm_core_types::{RequestId, TransactionContext, TransactionId};
use thiserror::Error;

/// Result type alias using TpcError
pub type Result<T> = std::result::Result<T, TpcError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code that can be used for programmatic
/// error handling, testing, and responses at application call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Lookup/Validation
    InvalidInput,
    NotFound,
    AlreadyExists,

    // Protocol
    /// A participant voted no in phase 1
    PrepareFailed,
    /// The transaction as a whole could not commit; nothing became durable
    TransactionFailed,
    /// Phase 2 failed after a successful vote, or an operation ran in the wrong state
    ProtocolViolation,
    /// Savepoint rollback against a foreign, unknown, or terminated savepoint
    SavepointInvalid,
    /// The transaction no longer accepts work
    TransactionClosed,

    // Integration/IO
    Io,
    Serialization,
    Persistence,
    Busy,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::AlreadyExists => "ERR_ALREADY_EXISTS",
            ExErrorKind::PrepareFailed => "ERR_PREPARE_FAILED",
            ExErrorKind::TransactionFailed => "ERR_TRANSACTION_FAILED",
            ExErrorKind::ProtocolViolation => "ERR_PROTOCOL_VIOLATION",
            ExErrorKind::SavepointInvalid => "ERR_SAVEPOINT_INVALID",
            ExErrorKind::TransactionClosed => "ERR_TRANSACTION_CLOSED",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Busy => "ERR_BUSY",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries classification fields for programmatic handling and the
/// transaction/participant context needed when reading logs.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    participant: Option<String>,
    txn_id: Option<TransactionId>,
    request_id: Option<RequestId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            participant: None,
            txn_id: None,
            request_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add participant sort key context
    pub fn with_participant(mut self, sort_key: impl Into<String>) -> Self {
        self.participant = Some(sort_key.into());
        self
    }

    /// Add transaction ID context
    pub fn with_txn_id(mut self, txn_id: TransactionId) -> Self {
        self.txn_id = Some(txn_id);
        self
    }

    /// Add request ID context
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Attach the ids of the transaction the error happened in
    ///
    /// A transaction id already set by the conversion is kept.
    pub fn with_context(mut self, ctx: &TransactionContext) -> Self {
        if self.txn_id.is_none() {
            self.txn_id = Some(ctx.txn_id.clone());
        }
        if let Some(request_id) = &ctx.request_id {
            self.request_id = Some(request_id.clone());
        }
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn participant(&self) -> Option<&str> {
        self.participant.as_deref()
    }

    pub fn txn_id(&self) -> Option<&TransactionId> {
        self.txn_id.as_ref()
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(participant) = &self.participant {
            write!(f, " (participant: {})", participant)?;
        }
        if let Some(txn_id) = &self.txn_id {
            write!(f, " (txn_id: {})", txn_id)?;
        }
        if let Some(source) = &self.source {
            write!(f, " caused by {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Error taxonomy for the transactional resource-manager protocol
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TpcError {
    // ===== Protocol Errors =====
    /// A participant cannot durably represent its pending writes
    #[error("Participant {participant} voted no: {reason}")]
    PrepareFailed { participant: String, reason: String },

    /// Phase 1 failed somewhere; every participant was rolled back
    #[error("Transaction {txn_id} failed and was aborted: {cause}")]
    TransactionFailed {
        txn_id: TransactionId,
        cause: Box<TpcError>,
    },

    /// Phase 2 failed after a successful vote; consistency is no longer guaranteed
    #[error("Protocol violation in participant {participant}: {reason}")]
    ProtocolViolation { participant: String, reason: String },

    /// Operation requested outside the participant's valid state
    #[error("Participant {participant} cannot {op} while {state}")]
    InvalidState {
        participant: String,
        op: String,
        state: String,
    },

    /// Savepoint rollback rejected
    #[error("Savepoint {savepoint_id} of {participant} cannot be rolled back: {reason}")]
    SavepointInvalid {
        participant: String,
        savepoint_id: u64,
        reason: String,
    },

    // ===== Coordinator Errors =====
    /// A participant with the same sort key is already registered
    #[error("Participant already joined: {participant}")]
    AlreadyJoined { participant: String },

    /// Handle does not resolve to a registered participant of the requested type
    #[error("Participant not found at slot {slot}")]
    ParticipantNotFound { slot: usize },

    /// Transaction has left the active state
    #[error("Transaction {txn_id} is {status} and cannot {op}")]
    TransactionClosed {
        txn_id: TransactionId,
        status: String,
        op: String,
    },

    /// Transaction was doomed by a failed savepoint rollback; it can only abort
    #[error("Transaction {txn_id} is doomed and can only be aborted")]
    TransactionDoomed { txn_id: TransactionId },

    // ===== Store Errors =====
    /// Key missing from a snapshot mapping
    #[error("Key not found: {key}")]
    KeyNotFound { key: String },

    /// Filesystem failure
    #[error("I/O error during {op}: {message}")]
    Io { op: String, message: String },

    /// Encoding or decoding failure
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Database failure
    #[error("Persistence error during {op}: {message}")]
    Persistence { op: String, message: String },

    /// Database busy or locked by another writer
    #[error("Database busy during {op}: {message}")]
    Busy { op: String, message: String },

    // ===== Generic Errors =====
    /// Invalid caller-provided input
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TpcError {
    /// Whether re-running the whole transaction may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TpcError::Busy { .. } => true,
            TpcError::TransactionFailed { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }

    /// Whether the consistency guarantee may have been broken
    pub fn is_fatal(&self) -> bool {
        matches!(self, TpcError::ProtocolViolation { .. })
    }

    /// Message safe to show an end user
    ///
    /// Never claims success; transaction failures read as retry-safe.
    pub fn user_message(&self) -> &'static str {
        match self {
            TpcError::ProtocolViolation { .. } => {
                "The save may be incomplete. Contact an administrator before retrying."
            }
            TpcError::KeyNotFound { .. } => {
                "The request referred to something that does not exist."
            }
            TpcError::InvalidInput { .. } => "The request was not valid. Check it and try again.",
            _ => "Could not save, try again.",
        }
    }
}

/// Conversion from TpcError to ExError
impl From<TpcError> for ExError {
    fn from(err: TpcError) -> Self {
        match err {
            TpcError::PrepareFailed {
                participant,
                reason,
            } => ExError::new(ExErrorKind::PrepareFailed)
                .with_op("prepare")
                .with_participant(participant)
                .with_message(reason),

            TpcError::TransactionFailed { txn_id, cause } => {
                let source = ExError::from(*cause);
                ExError::new(ExErrorKind::TransactionFailed)
                    .with_op("commit")
                    .with_txn_id(txn_id)
                    .with_message("Transaction aborted, no writes became durable")
                    .with_source(source)
            }

            TpcError::ProtocolViolation {
                participant,
                reason,
            } => ExError::new(ExErrorKind::ProtocolViolation)
                .with_op("finish")
                .with_participant(participant)
                .with_message(reason),

            TpcError::InvalidState {
                participant,
                op,
                state,
            } => ExError::new(ExErrorKind::ProtocolViolation)
                .with_op(op)
                .with_participant(participant)
                .with_message(format!("Not allowed while {}", state)),

            TpcError::SavepointInvalid {
                participant,
                savepoint_id,
                reason,
            } => ExError::new(ExErrorKind::SavepointInvalid)
                .with_op("rollback_savepoint")
                .with_participant(participant)
                .with_message(format!("Savepoint {}: {}", savepoint_id, reason)),

            TpcError::AlreadyJoined { participant } => ExError::new(ExErrorKind::AlreadyExists)
                .with_op("join")
                .with_participant(participant)
                .with_message("Participant already joined"),

            TpcError::ParticipantNotFound { slot } => ExError::new(ExErrorKind::NotFound)
                .with_message(format!("No participant at slot {}", slot)),

            TpcError::TransactionClosed { txn_id, status, op } => {
                ExError::new(ExErrorKind::TransactionClosed)
                    .with_op(op)
                    .with_txn_id(txn_id)
                    .with_message(format!("Transaction is {}", status))
            }

            TpcError::TransactionDoomed { txn_id } => ExError::new(ExErrorKind::TransactionClosed)
                .with_op("commit")
                .with_txn_id(txn_id)
                .with_message("Transaction is doomed"),

            TpcError::KeyNotFound { key } => ExError::new(ExErrorKind::NotFound)
                .with_message(format!("Key not found: {}", key)),

            TpcError::Io { op, message } => ExError::new(ExErrorKind::Io)
                .with_op(op)
                .with_message(message),

            TpcError::Serialization { message } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }

            TpcError::Persistence { op, message } => ExError::new(ExErrorKind::Persistence)
                .with_op(op)
                .with_message(message),

            TpcError::Busy { op, message } => ExError::new(ExErrorKind::Busy)
                .with_op(op)
                .with_message(message),

            TpcError::InvalidInput { reason } => {
                ExError::new(ExErrorKind::InvalidInput).with_message(reason)
            }

            TpcError::Internal { message } => {
                ExError::new(ExErrorKind::Internal).with_message(message)
            }
        }
    }
}
