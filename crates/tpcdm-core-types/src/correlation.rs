//! Correlation types for transaction tracking
//!
//! Every protocol operation receives a `TransactionContext` explicitly
//! instead of looking up an ambient "current transaction".

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a single transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generate a new TransactionId using UUIDv7
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create from an existing string (for deserialization)
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for the request that opened a transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new RequestId using UUIDv7
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create from an existing string (for deserialization)
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context handed to every participant operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionContext {
    pub txn_id: TransactionId,
    pub request_id: Option<RequestId>,
}

impl TransactionContext {
    /// Create a new context with a fresh TransactionId
    pub fn new() -> Self {
        Self {
            txn_id: TransactionId::new(),
            request_id: None,
        }
    }

    /// Create a context for an existing TransactionId
    pub fn with_txn_id(txn_id: TransactionId) -> Self {
        Self {
            txn_id,
            request_id: None,
        }
    }

    /// Attach the originating RequestId
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}
