//! Error taxonomy for assignment runs.
//!
//! Only two things kill a run: a broken configuration/connection and the
//! serializability gate. Everything per-case (no eligible worker, missing
//! directory entry, unreadable field) degrades locally and is reported
//! through the run report instead.

use thiserror::Error;

/// Errors at the remote feature-store boundary.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("request timeout after {0} seconds")]
    Timeout(u64),

    #[error("invalid response from feature service: {0}")]
    InvalidResponse(String),

    #[error("dataset '{dataset}' rejected the operation: {message}")]
    Rejected { dataset: String, message: String },
}

/// Fatal, run-level failures.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("feature store error: {0}")]
    Store(#[from] StoreError),

    /// The fail-closed gate: one bad record blocks all three batches.
    #[error(
        "record {index} in the {batch} batch is not serializable: \
         field '{field}' holds a non-scalar value"
    )]
    SerializationViolation {
        batch: &'static str,
        index: usize,
        field: String,
    },
}
