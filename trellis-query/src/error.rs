//! Error types for query execution.

use thiserror::Error;
use trellis_index::IndexError;

/// Query execution errors.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Error from the index layer (missing relation, I/O, decode, ...).
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Operator inputs disagree about sortedness: a planner bug, carrying
    /// the offending operator's plan string.
    #[error("plan mismatch: {0}")]
    PlanMismatch(String),

    /// Cancellation observed. Propagates upward without error logging.
    #[error("query aborted")]
    Aborted,

    /// Internal invariant violation (should not happen in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
