//! Query execution context: the shared store handle, the result cache, and
//! the cancellation flag.
//!
//! Results are shared by reference between sibling operators within one
//! query. The cache maps an operator's plan string to a [`SharedResult`]
//! slot; exactly one thread claims a slot and computes, everyone else waits
//! for publication. A published table is immutable, so readers never
//! observe partially written storage.

use crate::error::{QueryError, Result};
use crate::table::{ResultStatus, ResultTable};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use trellis_index::IndexStore;

struct Slot {
    status: ResultStatus,
    table: Option<Arc<ResultTable>>,
}

/// One cached result: claim → compute → publish, or wait.
pub struct SharedResult {
    slot: Mutex<Slot>,
    done: Condvar,
}

impl SharedResult {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                status: ResultStatus::Pending,
                table: None,
            }),
            done: Condvar::new(),
        }
    }

    /// Try to become the computing thread. True exactly once per slot.
    pub(crate) fn claim(&self) -> bool {
        let Ok(mut slot) = self.slot.lock() else {
            return false;
        };
        if slot.status == ResultStatus::Pending {
            slot.status = ResultStatus::Computing;
            true
        } else {
            false
        }
    }

    /// Publish a finished (or aborted) table and wake all waiters.
    pub(crate) fn publish(&self, table: Arc<ResultTable>) {
        debug_assert!(table.status().is_terminal());
        if let Ok(mut slot) = self.slot.lock() {
            slot.status = table.status();
            slot.table = Some(table);
        }
        self.done.notify_all();
    }

    /// Mark the slot aborted without a table and wake all waiters.
    ///
    /// Used when the computing thread fails: it keeps the original error,
    /// waiters observe the abort.
    pub(crate) fn publish_aborted(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.status = ResultStatus::Aborted;
        }
        self.done.notify_all();
    }

    /// Block until the slot is terminal; `Finished` yields the table.
    pub(crate) fn wait(&self) -> Result<Arc<ResultTable>> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| QueryError::Internal("poisoned result slot".to_string()))?;
        while !slot.status.is_terminal() {
            slot = self
                .done
                .wait(slot)
                .map_err(|_| QueryError::Internal("poisoned result slot".to_string()))?;
        }
        match slot.status {
            ResultStatus::Finished => slot
                .table
                .clone()
                .ok_or_else(|| QueryError::Internal("finished slot without table".to_string())),
            _ => Err(QueryError::Aborted),
        }
    }
}

/// Per-query execution state, shared by every operator in the tree.
pub struct QueryContext {
    store: Arc<IndexStore>,
    cache: Mutex<FxHashMap<String, Arc<SharedResult>>>,
    cancelled: AtomicBool,
}

impl QueryContext {
    pub fn new(store: Arc<IndexStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(FxHashMap::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Request cancellation; operators poll this between computations.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// The result slot for a plan string, creating it on first request.
    pub(crate) fn slot(&self, plan: &str) -> Result<Arc<SharedResult>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| QueryError::Internal("poisoned result cache".to_string()))?;
        Ok(cache
            .entry(plan.to_string())
            .or_insert_with(|| Arc::new(SharedResult::new()))
            .clone())
    }

    /// Whether a result for this plan string has been requested in this
    /// query (computed, computing, or aborted).
    pub fn has_result_for(&self, plan: &str) -> bool {
        self.cache
            .lock()
            .map(|cache| cache.contains_key(plan))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_index::{IndexBuilder, IndexStore};

    fn empty_context() -> QueryContext {
        let bytes = IndexBuilder::in_memory().into_bytes().unwrap();
        QueryContext::new(Arc::new(IndexStore::from_bytes(bytes).unwrap()))
    }

    #[test]
    fn slot_is_claimed_exactly_once() {
        let ctx = empty_context();
        let slot = ctx.slot("SCAN x").unwrap();
        assert!(slot.claim());
        assert!(!slot.claim());
        // Same plan string returns the same slot.
        assert!(!ctx.slot("SCAN x").unwrap().claim());
        assert!(ctx.has_result_for("SCAN x"));
        assert!(!ctx.has_result_for("SCAN y"));
    }

    #[test]
    fn waiters_see_published_table() {
        let ctx = empty_context();
        let slot = ctx.slot("SCAN x").unwrap();
        assert!(slot.claim());

        let waiter = {
            let slot = slot.clone();
            std::thread::spawn(move || slot.wait())
        };

        let mut table = ResultTable::new(2);
        table.push_row(&[trellis_core::Id(1), trellis_core::Id(2)]);
        table.finish();
        slot.publish(Arc::new(table));

        let seen = waiter.join().unwrap().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen.status(), ResultStatus::Finished);
    }

    #[test]
    fn waiters_observe_aborts() {
        let ctx = empty_context();
        let slot = ctx.slot("SCAN x").unwrap();
        assert!(slot.claim());
        slot.publish_aborted();
        assert!(matches!(slot.wait(), Err(QueryError::Aborted)));
    }

    #[test]
    fn cancellation_flag() {
        let ctx = empty_context();
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }
}
