//! Error handling for tpcdm-store
//!
//! Translates foreign errors into `TpcError` with store-specific context

use tpcdm_core::errors::TpcError;

/// Result type alias using TpcError
pub type Result<T> = std::result::Result<T, TpcError>;

/// Create a database error from rusqlite::Error
///
/// Busy and locked conditions become `Busy` so callers can retry.
pub fn from_rusqlite(op: &str, err: rusqlite::Error) -> TpcError {
    match &err {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        ) => TpcError::Busy {
            op: op.to_string(),
            message: err.to_string(),
        },
        _ => TpcError::Persistence {
            op: op.to_string(),
            message: err.to_string(),
        },
    }
}

/// Create an IO error
pub fn io_error(op: &str, err: std::io::Error) -> TpcError {
    TpcError::Io {
        op: op.to_string(),
        message: err.to_string(),
    }
}

/// Create a serialization error
pub fn serialization_error(context: &str, err: serde_json::Error) -> TpcError {
    TpcError::Serialization {
        message: format!("{}: {}", context, err),
    }
}
