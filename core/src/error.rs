use thiserror::Error;

use crate::DocKey;

/// Failures raised by [`crate::DocumentStore`]. All of them are fatal to a run;
/// duplicate rows are reported through [`crate::InsertOutcome`] instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to initialize document store: {reason}")]
    Init { reason: String },
    #[error("document store I/O failure: {0}")]
    Io(#[from] sled::Error),
    #[error("row {key} could not be decoded: {reason}")]
    Corrupt { key: DocKey, reason: String },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("documents must be folded in ascending key order (got {got} after {previous})")]
    OutOfOrder { previous: DocKey, got: DocKey },
}
