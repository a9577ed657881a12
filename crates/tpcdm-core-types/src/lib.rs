//! Core types shared across tpcdm facilities
//!
//! This crate provides foundational types used by the error handling,
//! logging, and transaction facilities:
//!
//! - **Correlation types**: TransactionId, RequestId, TransactionContext
//! - **Schema constants**: Canonical field keys and event names

pub mod correlation;
pub mod schema;

pub use correlation::{RequestId, TransactionContext, TransactionId};
