// Sequential scan executor.

use std::sync::Arc;

use crate::common::TupleCoordinate;
use crate::storage::{DataTable, Tuple};
use crate::transaction::{TransactionContext, TransactionManager};
use crate::Result;

/// Row-level predicate applied after the visibility check.
pub type ScanPredicate = dyn Fn(&Tuple) -> bool + Send + Sync;

/// Scans every tile group of a table, returning the versions visible to
/// the calling transaction. Each returned row is recorded in the
/// transaction's read set.
pub struct SeqScanExecutor {
    table: Arc<DataTable>,
    predicate: Option<Box<ScanPredicate>>,
}

impl SeqScanExecutor {
    pub fn new(table: Arc<DataTable>) -> Self {
        Self {
            table,
            predicate: None,
        }
    }

    pub fn with_predicate(
        table: Arc<DataTable>,
        predicate: impl Fn(&Tuple) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            table,
            predicate: Some(Box::new(predicate)),
        }
    }

    pub fn execute(
        &self,
        txn_manager: &TransactionManager,
        ctx: &mut TransactionContext,
    ) -> Result<Vec<(TupleCoordinate, Tuple)>> {
        let mut rows = Vec::new();
        for tile_group in self.table.tile_groups() {
            let header = tile_group.header();
            for slot in 0..tile_group.allocated_slots() as u32 {
                if !txn_manager.is_visible(ctx, header, slot) {
                    continue;
                }
                let Some(tuple) = tile_group.tuple(slot) else {
                    continue;
                };
                if let Some(predicate) = &self.predicate {
                    if !predicate(&tuple) {
                        continue;
                    }
                }
                let coord = TupleCoordinate::new(tile_group.id(), slot);
                txn_manager.perform_read(ctx, coord);
                rows.push((coord, tuple));
            }
        }
        Ok(rows)
    }
}
