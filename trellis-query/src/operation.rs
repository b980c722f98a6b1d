//! The operator sum type and the execution tree.
//!
//! Plan nodes share one capability set (plan string, width, sortedness,
//! estimates, variable maps, compute). They are a closed enum with method
//! dispatch; the operator vocabulary is fixed and small, so there is no
//! open trait hierarchy to maintain.
//!
//! [`ExecTree`] wraps the root operation and owns the result protocol: its
//! plan string keys the query context's cache, exactly one caller computes
//! a given subtree, and everyone else waits for the published table.

use crate::context::QueryContext;
use crate::error::{QueryError, Result};
use crate::join::JoinOperation;
use crate::scan::ScanOperation;
use crate::sort::SortOperation;
use crate::table::{ResultStatus, ResultTable};
use crate::two_column_join::TwoColumnJoinOperation;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum Operation {
    Scan(ScanOperation),
    Sort(Box<SortOperation>),
    Join(Box<JoinOperation>),
    TwoColumnJoin(Box<TwoColumnJoinOperation>),
}

macro_rules! dispatch {
    ($self:expr, $op:ident => $body:expr) => {
        match $self {
            Operation::Scan($op) => $body,
            Operation::Sort($op) => $body,
            Operation::Join($op) => $body,
            Operation::TwoColumnJoin($op) => $body,
        }
    };
}

impl Operation {
    /// Canonical textual form of this subtree; the result-cache key.
    pub fn plan_string(&self) -> String {
        dispatch!(self, op => op.plan_string())
    }

    pub fn result_width(&self) -> usize {
        dispatch!(self, op => op.result_width())
    }

    pub fn sorted_on(&self) -> Option<usize> {
        dispatch!(self, op => op.sorted_on())
    }

    /// Whether this subtree is known to produce zero rows without running.
    pub fn known_empty(&self, ctx: &QueryContext) -> bool {
        dispatch!(self, op => op.known_empty(ctx))
    }

    pub fn size_estimate(&self, ctx: &QueryContext) -> u64 {
        dispatch!(self, op => op.size_estimate(ctx))
    }

    pub fn cost_estimate(&self, ctx: &QueryContext) -> u64 {
        dispatch!(self, op => op.cost_estimate(ctx))
    }

    pub fn set_text_limit(&mut self, limit: u64) {
        dispatch!(self, op => op.set_text_limit(limit))
    }

    pub fn variable_columns(&self) -> FxHashMap<String, usize> {
        dispatch!(self, op => op.variable_columns())
    }

    pub fn context_vars(&self) -> FxHashSet<String> {
        dispatch!(self, op => op.context_vars())
    }

    pub(crate) fn compute(&self, ctx: &QueryContext) -> Result<ResultTable> {
        dispatch!(self, op => op.compute(ctx))
    }
}

/// An execution tree: a root operation plus the result protocol.
#[derive(Clone, Debug)]
pub struct ExecTree {
    root: Operation,
}

impl ExecTree {
    pub fn new(root: Operation) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Operation {
        &self.root
    }

    pub fn plan_string(&self) -> String {
        self.root.plan_string()
    }

    pub fn result_width(&self) -> usize {
        self.root.result_width()
    }

    pub fn sorted_on(&self) -> Option<usize> {
        self.root.sorted_on()
    }

    pub fn known_empty(&self, ctx: &QueryContext) -> bool {
        self.root.known_empty(ctx)
    }

    pub fn size_estimate(&self, ctx: &QueryContext) -> u64 {
        self.root.size_estimate(ctx)
    }

    pub fn cost_estimate(&self, ctx: &QueryContext) -> u64 {
        self.root.cost_estimate(ctx)
    }

    pub fn set_text_limit(&mut self, limit: u64) {
        self.root.set_text_limit(limit)
    }

    pub fn variable_columns(&self) -> FxHashMap<String, usize> {
        self.root.variable_columns()
    }

    pub fn context_vars(&self) -> FxHashSet<String> {
        self.root.context_vars()
    }

    /// This subtree's result, computed at most once per query.
    ///
    /// The first caller claims the cache slot and computes; later callers
    /// (including other threads sharing the context) wait for publication.
    /// A failed computation publishes an abort so waiters are released;
    /// the computing caller keeps the original error.
    pub fn result(&self, ctx: &QueryContext) -> Result<Arc<ResultTable>> {
        if ctx.is_cancelled() {
            return Err(QueryError::Aborted);
        }
        let slot = ctx.slot(&self.plan_string())?;
        if slot.claim() {
            match self.root.compute(ctx) {
                Ok(table) => {
                    debug_assert_eq!(table.status(), ResultStatus::Finished);
                    let table = Arc::new(table);
                    slot.publish(table.clone());
                    Ok(table)
                }
                Err(err) => {
                    slot.publish_aborted();
                    Err(err)
                }
            }
        } else {
            slot.wait()
        }
    }
}

impl From<ScanOperation> for ExecTree {
    fn from(op: ScanOperation) -> Self {
        Self::new(Operation::Scan(op))
    }
}

impl From<SortOperation> for ExecTree {
    fn from(op: SortOperation) -> Self {
        Self::new(Operation::Sort(Box::new(op)))
    }
}

impl From<JoinOperation> for ExecTree {
    fn from(op: JoinOperation) -> Self {
        Self::new(Operation::Join(Box::new(op)))
    }
}

impl From<TwoColumnJoinOperation> for ExecTree {
    fn from(op: TwoColumnJoinOperation) -> Self {
        Self::new(Operation::TwoColumnJoin(Box::new(op)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trellis_core::Id;
    use trellis_index::{IndexBuilder, IndexStore};

    fn context_with_relation(rel_id: u64, pairs: &[(u64, u64)]) -> QueryContext {
        let mut builder = IndexBuilder::in_memory();
        let pairs: Vec<(Id, Id)> = pairs.iter().map(|&(l, r)| (Id(l), Id(r))).collect();
        builder.add_pairs(Id(rel_id), false, &pairs).unwrap();
        let store = IndexStore::from_bytes(builder.into_bytes().unwrap()).unwrap();
        QueryContext::new(Arc::new(store))
    }

    #[test]
    fn repeated_results_share_one_table() {
        let ctx = context_with_relation(1, &[(1, 10), (2, 20)]);
        let tree = ExecTree::from(ScanOperation::new(Id(1), "?x", "?y"));

        let first = tree.result(&ctx).unwrap();
        let second = tree.result(&ctx).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn missing_relation_fails_the_query() {
        let ctx = context_with_relation(1, &[(1, 10)]);
        let tree = ExecTree::from(ScanOperation::new(Id(99), "?x", "?y"));
        assert!(matches!(
            tree.result(&ctx).unwrap_err(),
            QueryError::Index(trellis_index::IndexError::MissingRelation(Id(99)))
        ));
        // Waiters on the failed slot observe the abort.
        assert!(ctx.has_result_for(&tree.plan_string()));
    }

    #[test]
    fn scan_capabilities() {
        let ctx = context_with_relation(1, &[(1, 10), (2, 20)]);
        let tree = ExecTree::from(ScanOperation::new(Id(1), "?x", "?y"));
        assert_eq!(tree.result_width(), 2);
        assert_eq!(tree.sorted_on(), Some(0));
        assert!(!tree.known_empty(&ctx));
        assert_eq!(tree.size_estimate(&ctx), 2);
        assert_eq!(tree.variable_columns()["?y"], 1);
        assert!(tree.context_vars().is_empty());
    }
}
