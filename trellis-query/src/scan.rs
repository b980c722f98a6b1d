//! Relation scan: the leaf of every execution tree.
//!
//! Materializes a relation's pair segment into a width-2 table sorted by
//! the lhs column, binding the two variable names it was constructed with.

use crate::context::QueryContext;
use crate::error::{QueryError, Result};
use crate::table::ResultTable;
use rustc_hash::{FxHashMap, FxHashSet};
use trellis_core::Id;

#[derive(Clone, Debug)]
pub struct ScanOperation {
    rel_id: Id,
    lhs_var: String,
    rhs_var: String,
}

impl ScanOperation {
    pub fn new(rel_id: Id, lhs_var: impl Into<String>, rhs_var: impl Into<String>) -> Self {
        Self {
            rel_id,
            lhs_var: lhs_var.into(),
            rhs_var: rhs_var.into(),
        }
    }

    pub fn rel_id(&self) -> Id {
        self.rel_id
    }

    pub fn plan_string(&self) -> String {
        format!("SCAN {} ({} {})", self.rel_id, self.lhs_var, self.rhs_var)
    }

    pub fn result_width(&self) -> usize {
        2
    }

    pub fn sorted_on(&self) -> Option<usize> {
        Some(0)
    }

    /// A relation known to the catalog with zero elements is empty without
    /// reading anything. An unknown relation is not "known empty"; the
    /// lookup error surfaces at compute time instead.
    pub fn known_empty(&self, ctx: &QueryContext) -> bool {
        ctx.store()
            .meta()
            .get(self.rel_id)
            .map(|view| view.meta.nof_elements() == 0)
            .unwrap_or(false)
    }

    pub fn size_estimate(&self, ctx: &QueryContext) -> u64 {
        ctx.store()
            .meta()
            .get(self.rel_id)
            .map(|view| view.meta.nof_elements())
            .unwrap_or(0)
    }

    pub fn cost_estimate(&self, ctx: &QueryContext) -> u64 {
        self.size_estimate(ctx)
    }

    pub fn set_text_limit(&mut self, _limit: u64) {}

    pub fn variable_columns(&self) -> FxHashMap<String, usize> {
        let mut map = FxHashMap::default();
        map.insert(self.lhs_var.clone(), 0);
        map.insert(self.rhs_var.clone(), 1);
        map
    }

    pub fn context_vars(&self) -> FxHashSet<String> {
        FxHashSet::default()
    }

    pub(crate) fn compute(&self, ctx: &QueryContext) -> Result<ResultTable> {
        if ctx.is_cancelled() {
            return Err(QueryError::Aborted);
        }
        let pairs = ctx.store().read_pairs(self.rel_id)?;

        let mut table = ResultTable::new(2);
        table.begin_compute();
        table.set_sorted_by(Some(0));
        let rows: Vec<[Id; 2]> = pairs.into_iter().map(|(lhs, rhs)| [lhs, rhs]).collect();
        table.replace_storage(rows.into());
        table.finish();

        tracing::debug!(rel_id = %self.rel_id, rows = table.len(), "scan materialized");
        Ok(table)
    }
}
