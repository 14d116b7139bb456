// Pessimistic commit protocol.
//
// Ownership is acquired at write time, so by the time commit runs no
// concurrent writer can have touched the write set: commit is a single
// install pass. Snapshot reads are stable by construction and are not
// re-validated.

use tracing::debug;

use crate::transaction::manager::TransactionManager;
use crate::transaction::{TransactionContext, TxnResult};
use crate::Result;

pub(crate) fn commit(
    manager: &TransactionManager,
    ctx: &mut TransactionContext,
) -> Result<TxnResult> {
    debug!(txn = ctx.txn_id(), "committing transaction (pessimistic)");
    let commit_cid = manager.oracle().next_cid();
    ctx.set_commit_cid(commit_cid);
    manager.install_write_set(ctx, commit_cid);
    manager.enqueue_superseded(ctx, commit_cid);
    manager.finish_commit(ctx, commit_cid)
}
