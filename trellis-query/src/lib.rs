//! # Trellis Query
//!
//! Result tables, operator trees, and join kernels for the Trellis
//! triple-store engine.
//!
//! Execution trees are built from a small operator vocabulary (scan, sort,
//! join, two-column join) over a read-only [`trellis_index::IndexStore`].
//! Intermediate results are columnar [`ResultTable`]s shared through a
//! per-query [`QueryContext`]: plan strings key the cache, one thread
//! computes each subtree, siblings reuse the published table.
//!
//! The join is a sort-merge over inputs sorted by their join columns, with
//! inner loops monomorphized per `(left, right)` width for tuple widths up
//! to [`MAX_FIXED_WIDTH`].

pub mod context;
pub mod engine;
pub mod error;
pub mod join;
pub mod operation;
pub mod scan;
pub mod sort;
pub mod table;
pub mod two_column_join;

pub use context::{QueryContext, SharedResult};
pub use error::{QueryError, Result};
pub use join::JoinOperation;
pub use operation::{ExecTree, Operation};
pub use scan::ScanOperation;
pub use sort::SortOperation;
pub use table::{ResultStatus, ResultTable, TableStorage, MAX_FIXED_WIDTH};
pub use two_column_join::TwoColumnJoinOperation;
