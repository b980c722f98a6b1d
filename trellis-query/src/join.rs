//! Sort-merge equi-join on a single column pair.
//!
//! Children are canonically ordered by plan string so that two joins
//! differing only in argument order share a plan string, and therefore a
//! cached result. Inputs must be sorted by their join columns (the planner
//! inserts a sort when needed; this operator only asserts it).

use crate::context::QueryContext;
use crate::engine::{join_fixed, join_var};
use crate::error::{QueryError, Result};
use crate::operation::ExecTree;
use crate::table::{ResultTable, TableStorage, MAX_FIXED_WIDTH};
use rustc_hash::{FxHashMap, FxHashSet};

macro_rules! fixed_slice {
    ($table:expr, $as_fn:ident) => {
        $table.storage().$as_fn().ok_or_else(|| {
            QueryError::Internal("result storage width mismatch".to_string())
        })?
    };
}

#[derive(Clone, Debug)]
pub struct JoinOperation {
    left: ExecTree,
    right: ExecTree,
    left_col: usize,
    right_col: usize,
    keep_join_column: bool,
}

impl JoinOperation {
    /// Create a join, ordering the children so the lexicographically
    /// smaller plan string becomes the left child. This makes plan-
    /// equivalent joins cache under one key; the join columns swap with
    /// their trees.
    pub fn new(
        t1: ExecTree,
        t2: ExecTree,
        t1_col: usize,
        t2_col: usize,
        keep_join_column: bool,
    ) -> Self {
        if t1.plan_string() < t2.plan_string() {
            Self {
                left: t1,
                right: t2,
                left_col: t1_col,
                right_col: t2_col,
                keep_join_column,
            }
        } else {
            Self {
                left: t2,
                right: t1,
                left_col: t2_col,
                right_col: t1_col,
                keep_join_column,
            }
        }
    }

    pub fn is_self_join(&self) -> bool {
        self.left.plan_string() == self.right.plan_string()
    }

    pub fn plan_string(&self) -> String {
        format!(
            "JOIN({} [{}] |X| {} [{}])",
            self.left.plan_string(),
            self.left_col,
            self.right.plan_string(),
            self.right_col
        )
    }

    pub fn result_width(&self) -> usize {
        let width = self.left.result_width() + self.right.result_width()
            - if self.keep_join_column { 1 } else { 2 };
        debug_assert!(width > 0);
        width
    }

    pub fn sorted_on(&self) -> Option<usize> {
        Some(self.left_col)
    }

    pub fn known_empty(&self, ctx: &QueryContext) -> bool {
        self.left.known_empty(ctx) || self.right.known_empty(ctx)
    }

    pub fn size_estimate(&self, ctx: &QueryContext) -> u64 {
        self.left.size_estimate(ctx).max(self.right.size_estimate(ctx))
    }

    pub fn cost_estimate(&self, ctx: &QueryContext) -> u64 {
        self.left.size_estimate(ctx)
            + self.right.size_estimate(ctx)
            + self.left.cost_estimate(ctx)
            + self.right.cost_estimate(ctx)
    }

    pub fn set_text_limit(&mut self, limit: u64) {
        self.left.set_text_limit(limit);
        self.right.set_text_limit(limit);
    }

    /// Union of the children's variable maps: left indices unchanged, right
    /// indices shifted by the left width, the right join column removed.
    /// Name collisions are a planner error, not a join concern.
    pub fn variable_columns(&self) -> FxHashMap<String, usize> {
        let mut map = self.left.variable_columns();
        let left_width = self.left.result_width();
        for (name, col) in self.right.variable_columns() {
            use std::cmp::Ordering;
            let mapped = match col.cmp(&self.right_col) {
                Ordering::Less => left_width + col,
                Ordering::Greater => left_width + col - 1,
                Ordering::Equal => continue,
            };
            let prev = map.insert(name, mapped);
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

        // Checking emptiness first avoids materializing a non-empty
        // subtree whose sibling is already known to be empty.
        if self.left.known_empty(ctx) || self.right.known_empty(ctx) {
            let mut table = ResultTable::new(width);
            table.set_sorted_by(Some(self.left_col));
            table.finish();
            return Ok(table);
        }

        let left_res = self.left.result(ctx)?;
        let right_res = self.right.result(ctx)?;
        if left_res.sorted_by() != Some(self.left_col)
            || right_res.sorted_by() != Some(self.right_col)
        {
            return Err(QueryError::PlanMismatch(self.plan_string()));
        }

        let (left_width, right_width) = (self.left.result_width(), self.right.result_width());
        tracing::debug!(left_width, right_width, width, "join computation");

        let mut table = ResultTable::new(width);
        table.begin_compute();
        table.set_sorted_by(Some(self.left_col));

        let (lc, rc) = (self.left_col, self.right_col);
        if self.keep_join_column && width <= MAX_FIXED_WIDTH {
            let storage: TableStorage = match (left_width, right_width) {
                (1, 1) => join_fixed::<1, 1, 1>(fixed_slice!(left_res, as_fixed1), lc, fixed_slice!(right_res, as_fixed1), rc).into(),
                (1, 2) => join_fixed::<1, 2, 2>(fixed_slice!(left_res, as_fixed1), lc, fixed_slice!(right_res, as_fixed2), rc).into(),
                (1, 3) => join_fixed::<1, 3, 3>(fixed_slice!(left_res, as_fixed1), lc, fixed_slice!(right_res, as_fixed3), rc).into(),
                (1, 4) => join_fixed::<1, 4, 4>(fixed_slice!(left_res, as_fixed1), lc, fixed_slice!(right_res, as_fixed4), rc).into(),
                (1, 5) => join_fixed::<1, 5, 5>(fixed_slice!(left_res, as_fixed1), lc, fixed_slice!(right_res, as_fixed5), rc).into(),
                (2, 1) => join_fixed::<2, 1, 2>(fixed_slice!(left_res, as_fixed2), lc, fixed_slice!(right_res, as_fixed1), rc).into(),
                (2, 2) => join_fixed::<2, 2, 3>(fixed_slice!(left_res, as_fixed2), lc, fixed_slice!(right_res, as_fixed2), rc).into(),
                (2, 3) => join_fixed::<2, 3, 4>(fixed_slice!(left_res, as_fixed2), lc, fixed_slice!(right_res, as_fixed3), rc).into(),
                (2, 4) => join_fixed::<2, 4, 5>(fixed_slice!(left_res, as_fixed2), lc, fixed_slice!(right_res, as_fixed4), rc).into(),
                (3, 1) => join_fixed::<3, 1, 3>(fixed_slice!(left_res, as_fixed3), lc, fixed_slice!(right_res, as_fixed1), rc).into(),
                (3, 2) => join_fixed::<3, 2, 4>(fixed_slice!(left_res, as_fixed3), lc, fixed_slice!(right_res, as_fixed2), rc).into(),
                (3, 3) => join_fixed::<3, 3, 5>(fixed_slice!(left_res, as_fixed3), lc, fixed_slice!(right_res, as_fixed3), rc).into(),
                (4, 1) => join_fixed::<4, 1, 4>(fixed_slice!(left_res, as_fixed4), lc, fixed_slice!(right_res, as_fixed1), rc).into(),
                (4, 2) => join_fixed::<4, 2, 5>(fixed_slice!(left_res, as_fixed4), lc, fixed_slice!(right_res, as_fixed2), rc).into(),
                (5, 1) => join_fixed::<5, 1, 5>(fixed_slice!(left_res, as_fixed5), lc, fixed_slice!(right_res, as_fixed1), rc).into(),
                _ => {
                    return Err(QueryError::Internal(
                        "fixed join dispatch outside width table".to_string(),
                    ))
                }
            };
            table.replace_storage(storage);
        } else {
            for row in join_var(left_res.storage(), lc, right_res.storage(), rc, self.keep_join_column) {
                table.push_row(&row);
            }
        }

        table.finish();
        tracing::debug!(rows = table.len(), "join computation done");
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
    use crate::sort::SortOperation;
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

    fn rows_of(table: &ResultTable) -> Vec<Vec<u64>> {
        table
            .rows()
            .map(|row| row.iter().map(|id| id.as_u64()).collect())
            .collect()
    }

    #[test]
    fn merge_join_emits_run_products() {
        // L = [(1,a),(2,b),(2,c),(3,d)], R = [(1,x),(2,y),(4,z)].
        let ctx = context_with(&[
            (1, &[(1, 101), (2, 102), (2, 103), (3, 104)]),
            (2, &[(1, 201), (2, 202), (4, 203)]),
        ]);
        let join = JoinOperation::new(scan(1, "?a", "?b"), scan(2, "?a", "?c"), 0, 0, true);
        let table = join.compute(&ctx).unwrap();

        assert_eq!(table.nof_columns(), 3);
        assert_eq!(table.sorted_by(), Some(0));
        assert_eq!(table.status(), ResultStatus::Finished);
        assert_eq!(
            rows_of(&table),
            vec![
                vec![1, 101, 201],
                vec![2, 102, 202],
                vec![2, 103, 202],
            ]
        );
        assert!(table.storage().as_fixed3().is_some());
    }

    #[test]
    fn canonicalization_makes_swapped_joins_equal() {
        let make_ctx = || {
            context_with(&[
                (1, &[(1, 101), (2, 102)]),
                (2, &[(1, 201), (2, 202)]),
            ])
        };

        let j1 = JoinOperation::new(scan(1, "?a", "?b"), scan(2, "?a", "?c"), 0, 0, true);
        let j2 = JoinOperation::new(scan(2, "?a", "?c"), scan(1, "?a", "?b"), 0, 0, true);
        assert_eq!(j1.plan_string(), j2.plan_string());

        let t1 = j1.compute(&make_ctx()).unwrap();
        let t2 = j2.compute(&make_ctx()).unwrap();
        assert_eq!(rows_of(&t1), rows_of(&t2));
    }

    #[test]
    fn result_width_follows_keep_flag() {
        let ctx = context_with(&[(1, &[(1, 101)]), (2, &[(1, 201)])]);

        let keep = JoinOperation::new(scan(1, "?a", "?b"), scan(2, "?a", "?c"), 0, 0, true);
        assert_eq!(keep.result_width(), 3);
        assert_eq!(rows_of(&keep.compute(&ctx).unwrap()), vec![vec![1, 101, 201]]);

        let drop = JoinOperation::new(scan(1, "?a", "?b"), scan(2, "?a", "?c"), 0, 0, false);
        assert_eq!(drop.result_width(), 2);
        let table = drop.compute(&ctx).unwrap();
        assert_eq!(rows_of(&table), vec![vec![101, 201]]);
        // Width 2 lands in fixed storage even through the row-generic path.
        assert!(table.storage().as_fixed2().is_some());
    }

    #[test]
    fn empty_side_short_circuits_without_computing_sibling() {
        let ctx = context_with(&[(1, &[(1, 101), (2, 102)]), (9, &[])]);
        let nonempty = scan(1, "?a", "?b");
        let nonempty_plan = nonempty.plan_string();
        let join = JoinOperation::new(nonempty, scan(9, "?a", "?c"), 0, 0, true);

        let table = join.compute(&ctx).unwrap();
        assert_eq!(table.status(), ResultStatus::Finished);
        assert_eq!(table.nof_columns(), 3);
        assert!(table.is_empty());
        // The non-empty subtree was never materialized.
        assert!(!ctx.has_result_for(&nonempty_plan));
    }

    #[test]
    fn unsorted_input_is_a_plan_mismatch() {
        let ctx = context_with(&[(1, &[(1, 5), (2, 6)]), (2, &[(7, 1), (8, 2)])]);

        // Right join column 1, but scans are sorted by column 0.
        let bad = JoinOperation::new(scan(1, "?a", "?b"), scan(2, "?c", "?a"), 0, 1, true);
        assert!(matches!(
            bad.compute(&ctx).unwrap_err(),
            QueryError::PlanMismatch(_)
        ));

        // A planner-inserted sort fixes it.
        let sorted_right = ExecTree::from(SortOperation::new(scan(2, "?c", "?a"), 1));
        let good = JoinOperation::new(scan(1, "?a", "?b"), sorted_right, 0, 1, true);
        assert_eq!(
            rows_of(&good.compute(&ctx).unwrap()),
            vec![vec![1, 5, 7], vec![2, 6, 8]]
        );
    }

    #[test]
    fn variable_columns_shift_right_of_join_column() {
        let join = JoinOperation::new(scan(1, "?x", "?y"), scan(2, "?x", "?z"), 0, 0, true);
        let map = join.variable_columns();
        assert_eq!(map.len(), 3);
        assert_eq!(map["?x"], 0);
        assert_eq!(map["?y"], 1);
        assert_eq!(map["?z"], 2);
    }

    /// Chain joins up to width 5, then self-join: the width-9 output falls
    /// through to the variable-width kernel.
    #[test]
    fn wide_self_join_uses_variable_storage() {
        let ctx = context_with(&[
            (1, &[(1, 11), (2, 12)]),
            (2, &[(1, 21), (2, 22)]),
            (3, &[(1, 31), (2, 32)]),
            (4, &[(1, 41), (2, 42)]),
        ]);
        let j1 = ExecTree::from(JoinOperation::new(
            scan(1, "?k", "?a"),
            scan(2, "?k", "?b"),
            0,
            0,
            true,
        ));
        let j2 = ExecTree::from(JoinOperation::new(j1, scan(3, "?k", "?c"), 0, 0, true));
        let j3 = ExecTree::from(JoinOperation::new(j2, scan(4, "?k", "?d"), 0, 0, true));
        assert_eq!(j3.result_width(), 5);

        let wide = JoinOperation::new(j3.clone(), j3, 0, 0, true);
        assert!(wide.is_self_join());
        assert_eq!(wide.result_width(), 9);

        let table = wide.compute(&ctx).unwrap();
        assert!(matches!(table.storage(), TableStorage::Var(_)));
        assert_eq!(
            rows_of(&table),
            vec![
                vec![1, 11, 21, 31, 41, 11, 21, 31, 41],
                vec![2, 12, 22, 32, 42, 12, 22, 32, 42],
            ]
        );
    }

    #[test]
    fn five_by_one_still_uses_fixed_storage() {
        let ctx = context_with(&[
            (1, &[(1, 11)]),
            (2, &[(1, 21)]),
            (3, &[(1, 31)]),
            (4, &[(1, 41)]),
            (5, &[(1, 51)]),
        ]);
        let j1 = ExecTree::from(JoinOperation::new(
            scan(1, "?k", "?a"),
            scan(2, "?k", "?b"),
            0,
            0,
            true,
        ));
        let j2 = ExecTree::from(JoinOperation::new(j1, scan(3, "?k", "?c"), 0, 0, true));
        let j3 = ExecTree::from(JoinOperation::new(j2, scan(4, "?k", "?d"), 0, 0, true));

        // Width 5 x width 2 dropping the join column: output width 5.
        let join = JoinOperation::new(j3, scan(5, "?k", "?e"), 0, 0, false);
        assert_eq!(join.result_width(), 5);
        let table = join.compute(&ctx).unwrap();
        assert!(table.storage().as_fixed5().is_some());
        assert_eq!(rows_of(&table), vec![vec![11, 21, 31, 41, 51]]);
    }

    #[test]
    fn cancellation_aborts_before_compute() {
        let ctx = context_with(&[(1, &[(1, 101)]), (2, &[(1, 201)])]);
        ctx.cancel();
        let tree = ExecTree::from(JoinOperation::new(
            scan(1, "?a", "?b"),
            scan(2, "?a", "?c"),
            0,
            0,
            true,
        ));
        assert!(matches!(tree.result(&ctx), Err(QueryError::Aborted)));
    }
}
