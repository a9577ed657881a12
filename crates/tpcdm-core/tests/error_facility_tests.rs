use tpcdm_core::errors::{ExError, ExErrorKind, TpcError};
use tpcdm_core::TransactionId;

#[test]
fn test_prepare_failure_verifiable_by_kind() {
    let err = TpcError::PrepareFailed {
        participant: "snapshot:1".to_string(),
        reason: "value cannot be serialized".to_string(),
    };

    let ex_err: ExError = err.into();

    assert_eq!(ex_err.kind(), ExErrorKind::PrepareFailed);
    assert_eq!(ex_err.code(), "ERR_PREPARE_FAILED");
    assert_eq!(ex_err.participant(), Some("snapshot:1"));
    assert_eq!(ex_err.op(), Some("prepare"));
}

#[test]
fn test_savepoint_invalid_distinct_from_protocol_violation() {
    let err = TpcError::SavepointInvalid {
        participant: "sqlite:1".to_string(),
        savepoint_id: 3,
        reason: "transaction already terminated".to_string(),
    };

    let ex_err: ExError = err.into();

    assert_eq!(ex_err.kind(), ExErrorKind::SavepointInvalid);
    assert_ne!(ex_err.kind(), ExErrorKind::ProtocolViolation);
    assert!(ex_err.message().contains("terminated"));
}

#[test]
fn test_transaction_failed_chains_source() {
    let txn_id = TransactionId::new();
    let err = TpcError::TransactionFailed {
        txn_id: txn_id.clone(),
        cause: Box::new(TpcError::Busy {
            op: "commit".to_string(),
            message: "database is locked".to_string(),
        }),
    };

    let ex_err: ExError = err.into();

    assert_eq!(ex_err.code(), "ERR_TRANSACTION_FAILED");
    assert_eq!(ex_err.txn_id(), Some(&txn_id));
    assert_eq!(ex_err.source_error().map(|s| s.code()), Some("ERR_BUSY"));
    assert!(std::error::Error::source(&ex_err).is_some());
}

#[test]
fn test_error_kind_code_mapping() {
    let kinds = vec![
        (ExErrorKind::NotFound, "ERR_NOT_FOUND"),
        (ExErrorKind::AlreadyExists, "ERR_ALREADY_EXISTS"),
        (ExErrorKind::TransactionFailed, "ERR_TRANSACTION_FAILED"),
        (ExErrorKind::TransactionClosed, "ERR_TRANSACTION_CLOSED"),
        (ExErrorKind::Io, "ERR_IO"),
        (ExErrorKind::Serialization, "ERR_SERIALIZATION"),
        (ExErrorKind::Persistence, "ERR_PERSISTENCE"),
    ];

    for (kind, expected_code) in kinds {
        assert_eq!(kind.code(), expected_code);
    }
}

#[test]
fn test_tpc_error_display() {
    let err = TpcError::InvalidState {
        participant: "snapshot:1".to_string(),
        op: "insert".to_string(),
        state: "committed".to_string(),
    };

    assert_eq!(
        err.to_string(),
        "Participant snapshot:1 cannot insert while committed"
    );
}
