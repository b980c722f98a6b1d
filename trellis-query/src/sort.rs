//! Sort operator.
//!
//! Materializes its child and re-sorts the rows by one column. The planner
//! inserts one of these under a join whenever the child is not already
//! sorted by the join column; the join itself only asserts sortedness.

use crate::context::QueryContext;
use crate::error::{QueryError, Result};
use crate::operation::ExecTree;
use crate::table::ResultTable;
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Clone, Debug)]
pub struct SortOperation {
    child: ExecTree,
    sort_col: usize,
}

impl SortOperation {
    pub fn new(child: ExecTree, sort_col: usize) -> Self {
        debug_assert!(sort_col < child.result_width());
        Self { child, sort_col }
    }

    pub fn plan_string(&self) -> String {
        format!("SORT({}) on {}", self.child.plan_string(), self.sort_col)
    }

    pub fn result_width(&self) -> usize {
        self.child.result_width()
    }

    pub fn sorted_on(&self) -> Option<usize> {
        Some(self.sort_col)
    }

    pub fn known_empty(&self, ctx: &QueryContext) -> bool {
        self.child.known_empty(ctx)
    }

    pub fn size_estimate(&self, ctx: &QueryContext) -> u64 {
        self.child.size_estimate(ctx)
    }

    pub fn cost_estimate(&self, ctx: &QueryContext) -> u64 {
        self.child.cost_estimate(ctx) + self.child.size_estimate(ctx)
    }

    pub fn set_text_limit(&mut self, limit: u64) {
        self.child.set_text_limit(limit);
    }

    pub fn variable_columns(&self) -> FxHashMap<String, usize> {
        self.child.variable_columns()
    }

    pub fn context_vars(&self) -> FxHashSet<String> {
        self.child.context_vars()
    }

    pub(crate) fn compute(&self, ctx: &QueryContext) -> Result<ResultTable> {
        if ctx.is_cancelled() {
            return Err(QueryError::Aborted);
        }
        let input = self.child.result(ctx)?;

        let mut table = ResultTable::new(self.result_width());
        table.begin_compute();
        table.set_sorted_by(Some(self.sort_col));
        let mut storage = input.storage().clone();
        storage.sort_by_col(self.sort_col);
        table.replace_storage(storage);
        table.finish();
        Ok(table)
    }
}
