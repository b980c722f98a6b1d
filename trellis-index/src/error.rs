//! Error types for index metadata and store operations.

use std::io;
use thiserror::Error;
use trellis_core::Id;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("decode error: {0}")]
    Decode(String),

    /// Lookup for a relation id the catalog does not know. Fatal for the
    /// calling operator; surfaced as a query failure.
    #[error("unknown relation: {0}")]
    MissingRelation(Id),

    /// Element counts share their word with two flag bits and must stay
    /// below `2^62`.
    #[error("element count out of range: {0}")]
    ElementCountOverflow(u64),

    /// Block lookup invoked with an lhs smaller than every block's first
    /// lhs. The caller asked for data below the relation's range, which is a
    /// planner bug, not a data condition.
    #[error("lhs {lhs} below first block lhs {first_lhs}")]
    LhsBelowRange { lhs: Id, first_lhs: Id },
}

pub type Result<T> = std::result::Result<T, IndexError>;
