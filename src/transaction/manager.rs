// Copyright (c) 2025 TidalDB Contributors
//
// Transaction manager: identifier generation, the visibility predicate,
// slot acquisition, and the commit/abort protocols.
//
// Two validation strategies share this contract, selected once at
// construction: the optimistic variant re-validates the read set after
// the commit id is drawn, the pessimistic variant relies on ownership
// acquired at write time and commits in a single install pass.
//
// Install-order invariant: at any instant at most one version of a row
// is visible. The old version's end cid is stamped before the new
// version's timestamps, and the store that publishes the new owner uses
// release ordering, so a concurrent reader either still observes the
// slot locked (and keeps using the prior committed version) or observes
// the new version complete with its final timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::common::{
    CommitId, TimestampOracle, TupleCoordinate, TupleMetadata, TxnId, INITIAL_TXN_ID,
    INVALID_CID, INVALID_TXN_ID, MAX_CID,
};
use crate::config::TransactionMode;
use crate::error::DbError;
use crate::gc::GcManager;
use crate::index::IndexMaintainer;
use crate::logging::LogSink;
use crate::storage::{TileGroup, TileGroupHeader};
use crate::transaction::epoch::EpochManager;
use crate::transaction::{optimistic, pessimistic};
use crate::transaction::{RwOperation, TransactionContext, TxnResult};
use crate::Result;

/// Live counters for the transaction subsystem.
#[derive(Debug, Default)]
pub struct TransactionStats {
    txns_started: AtomicU64,
    txns_committed: AtomicU64,
    txns_aborted: AtomicU64,
    validation_failures: AtomicU64,
    ownership_conflicts: AtomicU64,
}

impl TransactionStats {
    pub(crate) fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransactionStatsSnapshot {
        TransactionStatsSnapshot {
            txns_started: self.txns_started.load(Ordering::Relaxed),
            txns_committed: self.txns_committed.load(Ordering::Relaxed),
            txns_aborted: self.txns_aborted.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            ownership_conflicts: self.ownership_conflicts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TransactionStats`].
#[derive(Debug, Clone, Default)]
pub struct TransactionStatsSnapshot {
    pub txns_started: u64,
    pub txns_committed: u64,
    pub txns_aborted: u64,
    pub validation_failures: u64,
    pub ownership_conflicts: u64,
}

pub struct TransactionManager {
    mode: TransactionMode,
    oracle: Arc<TimestampOracle>,
    catalog: Arc<Catalog>,
    epoch_manager: Arc<EpochManager>,
    gc: Arc<GcManager>,
    log: Arc<dyn LogSink>,
    stats: TransactionStats,
}

impl TransactionManager {
    pub fn new(
        mode: TransactionMode,
        oracle: Arc<TimestampOracle>,
        catalog: Arc<Catalog>,
        epoch_manager: Arc<EpochManager>,
        gc: Arc<GcManager>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            mode,
            oracle,
            catalog,
            epoch_manager,
            gc,
            log,
            stats: TransactionStats::default(),
        }
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub(crate) fn oracle(&self) -> &TimestampOracle {
        &self.oracle
    }

    pub(crate) fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn stats_ref(&self) -> &TransactionStats {
        &self.stats
    }

    pub fn stats(&self) -> TransactionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Starts a transaction: draws an identifier and a snapshot, and
    /// enrolls the caller in the current epoch.
    ///
    /// The epoch join happens before the snapshot is drawn so the
    /// epoch's id can never exceed the member's begin cid; the GC
    /// watermark depends on that bound.
    pub fn begin_transaction(&self) -> TransactionContext {
        let epoch = self.epoch_manager.join_current();
        let txn_id = self.oracle.next_txn_id();
        let begin_cid = self.oracle.next_cid();
        self.stats.txns_started.fetch_add(1, Ordering::Relaxed);
        self.log.log_begin_txn(txn_id);
        debug!(txn = txn_id, snapshot = begin_cid, "begin transaction");
        TransactionContext::new(txn_id, begin_cid, epoch)
    }

    fn tile_group(&self, coord: TupleCoordinate) -> Result<Arc<TileGroup>> {
        self.catalog
            .tile_group(coord.tile_group)
            .ok_or_else(|| DbError::Storage(format!("unknown tile group for {}", coord)))
    }

    fn visibility(
        &self,
        ctx: &TransactionContext,
        owner: TxnId,
        begin_cid: CommitId,
        end_cid: CommitId,
        read_dirty: bool,
    ) -> bool {
        if owner == INVALID_TXN_ID {
            // Empty or aborted slot.
            return false;
        }
        if owner == ctx.txn_id() {
            // A transaction sees exactly one of its own versions: the
            // pending one. Superseded own versions are invisible.
            return begin_cid == MAX_CID && end_cid != INVALID_CID;
        }
        let activated = ctx.begin_cid() >= begin_cid;
        let invalidated = ctx.begin_cid() >= end_cid;
        if owner != INITIAL_TXN_ID {
            // Owned by another transaction.
            if begin_cid == MAX_CID {
                // Uncommitted write. Only the dirty overload used by
                // uniqueness probes may observe it, and never a dirty
                // delete.
                return read_dirty && end_cid != INVALID_CID;
            }
            return activated && !invalidated;
        }
        activated && !invalidated
    }

    /// The MVCC visibility predicate.
    pub fn is_visible(
        &self,
        ctx: &TransactionContext,
        header: &TileGroupHeader,
        slot: u32,
    ) -> bool {
        self.visibility(
            ctx,
            header.owner(slot),
            header.begin_cid(slot),
            header.end_cid(slot),
            false,
        )
    }

    /// Visibility overload that also admits other transactions'
    /// uncommitted inserts and updates. Used exclusively by uniqueness
    /// checks on secondary index probes.
    pub fn is_visible_or_dirty(
        &self,
        ctx: &TransactionContext,
        header: &TileGroupHeader,
        slot: u32,
    ) -> bool {
        self.visibility(
            ctx,
            header.owner(slot),
            header.begin_cid(slot),
            header.end_cid(slot),
            true,
        )
    }

    pub fn is_owner(&self, ctx: &TransactionContext, header: &TileGroupHeader, slot: u32) -> bool {
        header.owner(slot) == ctx.txn_id()
    }

    /// True when the slot is committed, unowned, and current, which is
    /// the only state ownership can be acquired from.
    pub fn is_ownable(&self, header: &TileGroupHeader, slot: u32) -> bool {
        header.owner(slot) == INITIAL_TXN_ID && header.end_cid(slot) == MAX_CID
    }

    /// Logical lock: CAS the slot owner from INITIAL to this
    /// transaction. Losing the race dooms the transaction; the caller
    /// decides when to abort.
    ///
    /// A concurrent committer terminates a version before it releases
    /// the owner word, so the CAS can succeed on a version that just
    /// died. The end-cid recheck after the CAS rejects that case.
    pub fn acquire_ownership(&self, ctx: &mut TransactionContext, coord: TupleCoordinate) -> bool {
        let Ok(tile_group) = self.tile_group(coord) else {
            ctx.set_result(TxnResult::Failure);
            return false;
        };
        let header = tile_group.header();
        if header.try_lock_slot(coord.slot, ctx.txn_id()) {
            if header.end_cid(coord.slot) == MAX_CID {
                return true;
            }
            header.unlock_slot(coord.slot, ctx.txn_id());
        }
        debug!(txn = ctx.txn_id(), %coord, "lost ownership race");
        self.stats.ownership_conflicts.fetch_add(1, Ordering::Relaxed);
        ctx.set_result(TxnResult::Failure);
        false
    }

    /// Records a read of a visible version.
    pub fn perform_read(&self, ctx: &mut TransactionContext, coord: TupleCoordinate) -> bool {
        ctx.record_read(coord);
        true
    }

    /// Claims a freshly allocated slot for an insert and makes it
    /// visible to this transaction only.
    pub fn perform_insert(&self, ctx: &mut TransactionContext, coord: TupleCoordinate) -> Result<()> {
        let tile_group = self.tile_group(coord)?;
        let header = tile_group.header();
        debug_assert_eq!(header.owner(coord.slot), INVALID_TXN_ID);
        debug_assert_eq!(header.begin_cid(coord.slot), MAX_CID);
        debug_assert_eq!(header.end_cid(coord.slot), MAX_CID);
        header.set_begin_cid(coord.slot, MAX_CID);
        header.set_end_cid(coord.slot, MAX_CID);
        header.set_next_version(coord.slot, TupleCoordinate::INVALID);
        header.set_owner(coord.slot, ctx.txn_id());
        ctx.record_insert(coord);
        self.log.log_insert(coord);
        Ok(())
    }

    /// Links a new version under an owned old version. The new slot
    /// must be freshly allocated; the old slot must already be owned
    /// through `acquire_ownership`.
    pub fn perform_update(
        &self,
        ctx: &mut TransactionContext,
        old: TupleCoordinate,
        new: TupleCoordinate,
    ) -> Result<()> {
        let old_tile_group = self.tile_group(old)?;
        let new_tile_group = self.tile_group(new)?;
        debug_assert!(self.is_owner(ctx, old_tile_group.header(), old.slot));

        let new_header = new_tile_group.header();
        new_header.set_begin_cid(new.slot, MAX_CID);
        new_header.set_end_cid(new.slot, MAX_CID);
        new_header.set_owner(new.slot, ctx.txn_id());

        old_tile_group.header().set_next_version(old.slot, new);
        ctx.record_update(old);
        self.log.log_update(old, new);
        Ok(())
    }

    /// Like update, but the new version is a tombstone: its end cid
    /// carries the uncommitted-delete marker until commit.
    pub fn perform_delete(
        &self,
        ctx: &mut TransactionContext,
        old: TupleCoordinate,
        new: TupleCoordinate,
    ) -> Result<()> {
        let old_tile_group = self.tile_group(old)?;
        let new_tile_group = self.tile_group(new)?;
        debug_assert!(self.is_owner(ctx, old_tile_group.header(), old.slot));

        let new_header = new_tile_group.header();
        new_header.set_begin_cid(new.slot, MAX_CID);
        new_header.set_end_cid(new.slot, INVALID_CID);
        new_header.set_owner(new.slot, ctx.txn_id());

        old_tile_group.header().set_next_version(old.slot, new);
        ctx.record_delete(old);
        self.log.log_delete(old, new);
        Ok(())
    }

    /// Degenerate update: the target is a pending version this
    /// transaction already owns, so no new slot is needed. The caller
    /// rewrites the payload in place.
    pub fn perform_update_in_place(
        &self,
        ctx: &mut TransactionContext,
        coord: TupleCoordinate,
    ) -> Result<()> {
        let tile_group = self.tile_group(coord)?;
        let header = tile_group.header();
        debug_assert!(self.is_owner(ctx, header, coord.slot));
        debug_assert_eq!(header.begin_cid(coord.slot), MAX_CID);
        // An INSERT tag stays INSERT; the new version of a prior update
        // is tracked through its predecessor and needs no new entry.
        self.log.log_update(coord, coord);
        Ok(())
    }

    /// Degenerate delete of a pending version this transaction owns.
    /// An insert cancels to INS_DEL; the new version of a prior update
    /// turns that update into a delete of the original row.
    pub fn perform_delete_in_place(
        &self,
        ctx: &mut TransactionContext,
        coord: TupleCoordinate,
    ) -> Result<()> {
        let tile_group = self.tile_group(coord)?;
        let header = tile_group.header();
        debug_assert!(self.is_owner(ctx, header, coord.slot));
        debug_assert_eq!(header.begin_cid(coord.slot), MAX_CID);

        header.set_end_cid(coord.slot, INVALID_CID);
        match ctx.operation(coord) {
            Some(RwOperation::Insert) => {
                ctx.record_delete(coord);
            }
            _ => {
                // Find the superseded version whose successor this is.
                let predecessor = ctx.rw_set().iter().find_map(|(&old, &op)| {
                    if op != RwOperation::Update {
                        return None;
                    }
                    let tile_group = self.catalog.tile_group(old.tile_group)?;
                    if tile_group.header().next_version(old.slot) == coord {
                        Some(old)
                    } else {
                        None
                    }
                });
                match predecessor {
                    Some(old) => {
                        ctx.retag_update_as_delete(old);
                    }
                    None => {
                        warn!(txn = ctx.txn_id(), %coord, "in-place delete of untracked version");
                        ctx.record_delete(coord);
                    }
                }
            }
        }
        self.log.log_delete(coord, coord);
        Ok(())
    }

    /// Commits the transaction under the mode fixed at construction.
    /// A transaction already doomed by a lost ownership race aborts
    /// here and reports it.
    pub fn commit_transaction(&self, ctx: &mut TransactionContext) -> Result<TxnResult> {
        match ctx.result() {
            TxnResult::InProgress => {}
            TxnResult::Failure => return self.abort_transaction(ctx),
            _ => {
                return Err(DbError::InvalidOperation(format!(
                    "transaction {} already finished",
                    ctx.txn_id()
                )))
            }
        }
        match self.mode {
            TransactionMode::Optimistic => optimistic::commit(self, ctx),
            TransactionMode::Pessimistic => pessimistic::commit(self, ctx),
        }
    }

    /// Rolls the transaction back: owned new slots become empty, old
    /// slots are unlocked with their lifetime restored, and nothing is
    /// handed to the GC.
    pub fn abort_transaction(&self, ctx: &mut TransactionContext) -> Result<TxnResult> {
        if ctx.result().is_terminal() {
            return Err(DbError::InvalidOperation(format!(
                "transaction {} already finished",
                ctx.txn_id()
            )));
        }
        debug!(txn = ctx.txn_id(), "aborting transaction");
        self.rollback_write_set(ctx);
        self.log.log_abort_txn(ctx.txn_id());
        self.epoch_manager.leave(ctx.epoch());
        ctx.set_result(TxnResult::Aborted);
        self.stats.txns_aborted.fetch_add(1, Ordering::Relaxed);
        Ok(TxnResult::Aborted)
    }

    /// Stamps the commit id into every touched header and publishes the
    /// new versions. Shared by both protocols; the caller has already
    /// validated whatever its mode requires.
    pub(crate) fn install_write_set(&self, ctx: &TransactionContext, commit_cid: CommitId) {
        for (&coord, &op) in ctx.rw_set() {
            let Ok(tile_group) = self.tile_group(coord) else {
                warn!(%coord, "install skipped: tile group vanished");
                continue;
            };
            let header = tile_group.header();
            match op {
                RwOperation::Read => {}
                RwOperation::Update => {
                    // Only one version may be visible at any point: the
                    // old version is terminated before the new one is
                    // published.
                    header.set_end_cid(coord.slot, commit_cid);
                    if let Some((new, new_tile_group)) = self.successor(header, coord) {
                        let new_header = new_tile_group.header();
                        new_header.set_begin_cid(new.slot, commit_cid);
                        new_header.set_end_cid(new.slot, MAX_CID);
                        new_header.set_owner(new.slot, INITIAL_TXN_ID);
                    }
                    header.unlock_slot(coord.slot, ctx.txn_id());
                }
                RwOperation::Delete => {
                    header.set_end_cid(coord.slot, commit_cid);
                    if let Some((new, new_tile_group)) = self.successor(header, coord) {
                        let new_header = new_tile_group.header();
                        new_header.set_begin_cid(new.slot, commit_cid);
                        new_header.set_end_cid(new.slot, MAX_CID);
                        new_header.set_owner(new.slot, INVALID_TXN_ID);
                    }
                    header.unlock_slot(coord.slot, ctx.txn_id());
                }
                RwOperation::Insert => {
                    header.set_owner(coord.slot, INITIAL_TXN_ID);
                    header.set_begin_cid(coord.slot, commit_cid);
                    header.set_end_cid(coord.slot, MAX_CID);
                }
                RwOperation::InsertDelete => {
                    // The insert and the delete cancel; the slot stays
                    // empty and never reaches the GC.
                    header.set_owner(coord.slot, INVALID_TXN_ID);
                    header.set_begin_cid(coord.slot, MAX_CID);
                    header.set_end_cid(coord.slot, MAX_CID);
                    self.unlink_from_indexes(&tile_group, coord);
                }
            }
        }
    }

    fn successor(
        &self,
        header: &TileGroupHeader,
        coord: TupleCoordinate,
    ) -> Option<(TupleCoordinate, Arc<TileGroup>)> {
        let new = header.next_version(coord.slot);
        if !new.is_valid() {
            return None;
        }
        let tile_group = self.catalog.tile_group(new.tile_group)?;
        Some((new, tile_group))
    }

    /// Enqueues every version this commit superseded into the
    /// transaction's epoch for later reclamation.
    pub(crate) fn enqueue_superseded(&self, ctx: &TransactionContext, commit_cid: CommitId) {
        for (&coord, &op) in ctx.rw_set() {
            if !matches!(op, RwOperation::Update | RwOperation::Delete) {
                continue;
            }
            let Ok(tile_group) = self.tile_group(coord) else {
                continue;
            };
            let metadata = TupleMetadata {
                table_id: tile_group.table_id(),
                tile_group_id: coord.tile_group,
                tuple_id: coord.slot,
                end_cid: commit_cid,
            };
            self.gc.recycle_tuple_slot_in_epoch(ctx.epoch(), metadata);
        }
    }

    pub(crate) fn finish_commit(
        &self,
        ctx: &mut TransactionContext,
        commit_cid: CommitId,
    ) -> Result<TxnResult> {
        self.log.log_commit_txn(ctx.txn_id(), commit_cid);
        self.epoch_manager.leave(ctx.epoch());
        ctx.set_result(TxnResult::Success);
        self.stats.txns_committed.fetch_add(1, Ordering::Relaxed);
        debug!(txn = ctx.txn_id(), cid = commit_cid, "committed transaction");
        Ok(TxnResult::Success)
    }

    fn rollback_write_set(&self, ctx: &TransactionContext) {
        for (&coord, &op) in ctx.rw_set() {
            let Ok(tile_group) = self.tile_group(coord) else {
                warn!(%coord, "rollback skipped: tile group vanished");
                continue;
            };
            let header = tile_group.header();
            match op {
                RwOperation::Read => {}
                RwOperation::Update | RwOperation::Delete => {
                    header.unlock_slot(coord.slot, ctx.txn_id());
                    header.set_end_cid(coord.slot, MAX_CID);
                    if let Some((new, new_tile_group)) = self.successor(header, coord) {
                        let new_header = new_tile_group.header();
                        new_header.set_owner(new.slot, INVALID_TXN_ID);
                        new_header.set_begin_cid(new.slot, MAX_CID);
                        new_header.set_end_cid(new.slot, MAX_CID);
                    }
                }
                RwOperation::Insert | RwOperation::InsertDelete => {
                    header.set_owner(coord.slot, INVALID_TXN_ID);
                    header.set_begin_cid(coord.slot, MAX_CID);
                    header.set_end_cid(coord.slot, MAX_CID);
                    self.unlink_from_indexes(&tile_group, coord);
                }
            }
        }
    }

    /// Drops index entries for a version this transaction created but
    /// did not publish, so probes never chase permanently dead slots.
    fn unlink_from_indexes(&self, tile_group: &Arc<TileGroup>, coord: TupleCoordinate) {
        let metadata = TupleMetadata {
            table_id: tile_group.table_id(),
            tile_group_id: coord.tile_group,
            tuple_id: coord.slot,
            end_cid: INVALID_CID,
        };
        self.catalog.delete_from_indexes(tile_group.table_id(), &metadata);
        tile_group.clear_tuple(coord.slot);
    }
}
