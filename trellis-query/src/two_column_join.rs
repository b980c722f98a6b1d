//! Equi-join on two column pairs at once.
//!
//! Merges on the first column pair like the single-column join and keeps
//! only run pairs whose second columns also agree. Used for patterns where
//! two variables are shared between the inputs; the cost estimate strongly
//! prefers inputs that can serve the second condition as a direct width-2
//! pair lookup.

use crate::context::QueryContext;
use crate::error::{QueryError, Result};
use crate::operation::ExecTree;
use crate::table::ResultTable;
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Clone, Debug)]
pub struct TwoColumnJoinOperation {
    left: ExecTree,
    right: ExecTree,
    jc1_left: usize,
    jc1_right: usize,
    jc2_left: usize,
    jc2_right: usize,
}

impl TwoColumnJoinOperation {
    /// `jc1` and `jc2` are `(left column, right column)` pairs; the merge
    /// runs on `jc1`, the equality filter on `jc2`.
    pub fn new(left: ExecTree, right: ExecTree, jc1: (usize, usize), jc2: (usize, usize)) -> Self {
        Self {
            left,
            right,
            jc1_left: jc1.0,
            jc1_right: jc1.1,
            jc2_left: jc2.0,
            jc2_right: jc2.1,
        }
    }

    pub fn plan_string(&self) -> String {
        format!(
            "TWO_COLUMN_JOIN({} [{},{}] |X| {} [{},{}])",
            self.left.plan_string(),
            self.jc1_left,
            self.jc2_left,
            self.right.plan_string(),
            self.jc1_right,
            self.jc2_right
        )
    }

    pub fn result_width(&self) -> usize {
        let width = self.left.result_width() + self.right.result_width() - 2;
        debug_assert!(width > 0);
        width
    }

    pub fn sorted_on(&self) -> Option<usize> {
        Some(self.jc1_left)
    }

    pub fn known_empty(&self, ctx: &QueryContext) -> bool {
        self.left.known_empty(ctx) || self.right.known_empty(ctx)
    }

    pub fn size_estimate(&self, ctx: &QueryContext) -> u64 {
        (self.left.size_estimate(ctx) + self.right.size_estimate(ctx)) / 10
    }

    /// Joins that cannot serve the filter as a direct width-2 pair lookup
    /// are punished by a factor of 1000.
    pub fn cost_estimate(&self, ctx: &QueryContext) -> u64 {
        let base = self.left.size_estimate(ctx)
            + self.left.cost_estimate(ctx)
            + self.right.size_estimate(ctx)
            + self.right.cost_estimate(ctx);
        let direct = (self.left.result_width() == 2 && self.jc1_left == 0 && self.jc2_left == 1)
            || (self.right.result_width() == 2 && self.jc1_right == 0 && self.jc2_right == 1);
        if direct {
            base
        } else {
            base * 1000
        }
    }

    pub fn set_text_limit(&mut self, limit: u64) {
        self.left.set_text_limit(limit);
        self.right.set_text_limit(limit);
    }

    /// Left columns keep their indices; right columns shift by the left
    /// width minus the number of dropped right join columns before them.
    pub fn variable_columns(&self) -> FxHashMap<String, usize> {
        let mut map = self.left.variable_columns();
        let left_width = self.left.result_width();
        for (name, col) in self.right.variable_columns() {
            if col == self.jc1_right || col == self.jc2_right {
                continue;
            }
            let dropped_before = [self.jc1_right, self.jc2_right]
                .iter()
                .filter(|&&jc| jc < col)
                .count();
            let prev = map.insert(name, left_width + col - dropped_before);
            debug_assert!(prev.is_none(), "duplicate variable across join inputs");
        }
        map
    }

    pub fn context_vars(&self) -> FxHashSet<String> {
        let mut vars = self.left.context_vars();
        vars.extend(self.right.context_vars());
        vars
    }

    pub(crate) fn compute(&self, ctx: &QueryContext) -> Result<ResultTable> {
        if ctx.is_cancelled() {
            return Err(QueryError::Aborted);
        }
        let width = self.result_width();

        if self.left.known_empty(ctx) || self.right.known_empty(ctx) {
            let mut table = ResultTable::new(width);
            table.set_sorted_by(Some(self.jc1_left));
            table.finish();
            return Ok(table);
        }

        let left_res = self.left.result(ctx)?;
        let right_res = self.right.result(ctx)?;
        if left_res.sorted_by() != Some(self.jc1_left)
            || right_res.sorted_by() != Some(self.jc1_right)
        {
            return Err(QueryError::PlanMismatch(self.plan_string()));
        }

        let mut table = ResultTable::new(width);
        table.begin_compute();
        table.set_sorted_by(Some(self.jc1_left));

        let left = left_res.storage();
        let right = right_res.storage();
        let (mut i, mut j) = (0, 0);
        while i < left.len() && j < right.len() {
            let lkey = left.row(i)[self.jc1_left];
            let rkey = right.row(j)[self.jc1_right];
            if lkey < rkey {
                i += 1;
            } else if rkey < lkey {
                j += 1;
            } else {
                let mut left_end = i + 1;
                while left_end < left.len() && left.row(left_end)[self.jc1_left] == lkey {
                    left_end += 1;
                }
                let mut right_end = j + 1;
                while right_end < right.len() && right.row(right_end)[self.jc1_right] == rkey {
                    right_end += 1;
                }
                for li in i..left_end {
                    let lrow = left.row(li);
                    for rj in j..right_end {
                        let rrow = right.row(rj);
                        if lrow[self.jc2_left] != rrow[self.jc2_right] {
                            continue;
                        }
                        let mut row = Vec::with_capacity(width);
                        row.extend_from_slice(lrow);
                        for (k, v) in rrow.iter().enumerate() {
                            if k != self.jc1_right && k != self.jc2_right {
                                row.push(*v);
                            }
                        }
                        table.push_row(&row);
                    }
                }
                i = left_end;
                j = right_end;
            }
        }

        table.finish();
        tracing::debug!(rows = table.len(), width, "two-column join done");
        Ok(table)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ScanOperation;
    use crate::table::ResultStatus;
    use std::sync::Arc;
    use trellis_core::Id;
    use trellis_index::{IndexBuilder, IndexStore};

    fn context_with(relations: &[(u64, &[(u64, u64)])]) -> QueryContext {
        let mut builder = IndexBuilder::in_memory();
        for (rel_id, pairs) in relations {
            let pairs: Vec<(Id, Id)> = pairs.iter().map(|&(l, r)| (Id(l), Id(r))).collect();
            builder.add_pairs(Id(*rel_id), false, &pairs).unwrap();
        }
        let store = IndexStore::from_bytes(builder.into_bytes().unwrap()).unwrap();
        QueryContext::new(Arc::new(store))
    }

    fn scan(rel_id: u64, lhs: &str, rhs: &str) -> ExecTree {
        ExecTree::from(ScanOperation::new(Id(rel_id), lhs, rhs))
    }

    #[test]
    fn keeps_rows_agreeing_on_both_columns() {
        let ctx = context_with(&[
            (1, &[(1, 5), (2, 6), (3, 7)]),
            (2, &[(1, 5), (2, 9), (3, 7)]),
        ]);
        let join = TwoColumnJoinOperation::new(
            scan(1, "?x", "?y"),
            scan(2, "?x", "?y"),
            (0, 0),
            (1, 1),
        );
        assert_eq!(join.result_width(), 2);

        let table = join.compute(&ctx).unwrap();
        assert_eq!(table.status(), ResultStatus::Finished);
        assert_eq!(table.sorted_by(), Some(0));
        let rows: Vec<Vec<u64>> = table
            .rows()
            .map(|row| row.iter().map(|id| id.as_u64()).collect())
            .collect();
        assert_eq!(rows, vec![vec![1, 5], vec![3, 7]]);
    }

    #[test]
    fn cost_punishes_non_direct_filters() {
        let ctx = context_with(&[(1, &[(1, 5), (2, 6)]), (2, &[(1, 5), (2, 6)])]);

        let direct = TwoColumnJoinOperation::new(
            scan(1, "?x", "?y"),
            scan(2, "?x", "?y"),
            (0, 0),
            (1, 1),
        );
        let reversed = TwoColumnJoinOperation::new(
            scan(1, "?x", "?y"),
            scan(2, "?x", "?y"),
            (1, 1),
            (0, 0),
        );
        assert_eq!(
            reversed.cost_estimate(&ctx),
            direct.cost_estimate(&ctx) * 1000
        );
    }

    #[test]
    fn empty_side_short_circuits() {
        let ctx = context_with(&[(1, &[(1, 5)]), (9, &[])]);
        let join = TwoColumnJoinOperation::new(
            scan(1, "?x", "?y"),
            scan(9, "?x", "?y"),
            (0, 0),
            (1, 1),
        );
        let table = join.compute(&ctx).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.status(), ResultStatus::Finished);
        assert_eq!(table.nof_columns(), 2);
    }
}
