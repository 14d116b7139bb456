// Optimistic commit protocol.
//
// No lock is held globally during validation; correctness follows from
// the two-phase structure. The read set is re-observed strictly after
// the commit id is assigned, so any version that passed validation was
// either still owned by this transaction or committed and alive at the
// commit timestamp.

use tracing::debug;

use crate::common::INITIAL_TXN_ID;
use crate::transaction::manager::TransactionManager;
use crate::transaction::{RwOperation, TransactionContext, TxnResult};
use crate::Result;

pub(crate) fn commit(
    manager: &TransactionManager,
    ctx: &mut TransactionContext,
) -> Result<TxnResult> {
    debug!(txn = ctx.txn_id(), "committing transaction (optimistic)");
    let commit_cid = manager.oracle().next_cid();

    // Read-only fast path: the snapshot was stable for the whole
    // transaction, so there is nothing to validate or install.
    if ctx.rw_set().values().all(|op| *op == RwOperation::Read) {
        ctx.set_commit_cid(commit_cid);
        return manager.finish_commit(ctx, commit_cid);
    }

    if !validate_read_set(manager, ctx, commit_cid) {
        manager.stats_ref().record_validation_failure();
        debug!(txn = ctx.txn_id(), "read set changed under transaction, aborting");
        return manager.abort_transaction(ctx);
    }

    ctx.set_commit_cid(commit_cid);
    manager.install_write_set(ctx, commit_cid);
    manager.enqueue_superseded(ctx, commit_cid);
    manager.finish_commit(ctx, commit_cid)
}

/// Re-reads every non-insert entry of the read/write set. An entry
/// passes if this transaction still owns the slot, or if the slot is
/// unowned and its lifetime contains the commit id.
fn validate_read_set(
    manager: &TransactionManager,
    ctx: &TransactionContext,
    commit_cid: u64,
) -> bool {
    for (&coord, &op) in ctx.rw_set() {
        if op.is_own_creation() {
            continue;
        }
        let Some(tile_group) = manager.catalog().tile_group(coord.tile_group) else {
            return false;
        };
        let header = tile_group.header();
        if header.owner(coord.slot) == ctx.txn_id() {
            continue;
        }
        if header.owner(coord.slot) == INITIAL_TXN_ID
            && header.begin_cid(coord.slot) <= commit_cid
            && commit_cid < header.end_cid(coord.slot)
        {
            continue;
        }
        return false;
    }
    true
}
