// Per-transaction state.
//
// There is no thread-local "current transaction"; every operation takes
// the context by reference, and the context carries the epoch handle it
// was enrolled with so departure cannot be forgotten on any exit path.

use std::collections::HashMap;
use std::sync::Arc;

use crate::common::{CommitId, EpochId, TupleCoordinate, TxnId};
use crate::transaction::epoch::Epoch;
use crate::transaction::types::{RwOperation, TxnResult};

/// State of one transaction from begin to commit/abort.
pub struct TransactionContext {
    txn_id: TxnId,
    begin_cid: CommitId,
    commit_cid: Option<CommitId>,
    result: TxnResult,
    rw_set: HashMap<TupleCoordinate, RwOperation>,
    epoch: Arc<Epoch>,
}

impl TransactionContext {
    pub(crate) fn new(txn_id: TxnId, begin_cid: CommitId, epoch: Arc<Epoch>) -> Self {
        Self {
            txn_id,
            begin_cid,
            commit_cid: None,
            result: TxnResult::InProgress,
            rw_set: HashMap::new(),
            epoch,
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Snapshot timestamp: this transaction sees versions whose
    /// lifetime contains `begin_cid`.
    pub fn begin_cid(&self) -> CommitId {
        self.begin_cid
    }

    pub fn commit_cid(&self) -> Option<CommitId> {
        self.commit_cid
    }

    pub(crate) fn set_commit_cid(&mut self, cid: CommitId) {
        self.commit_cid = Some(cid);
    }

    pub fn result(&self) -> TxnResult {
        self.result
    }

    pub(crate) fn set_result(&mut self, result: TxnResult) {
        self.result = result;
    }

    /// True until commit or abort, and until a conflict marks the
    /// transaction as doomed.
    pub fn is_active(&self) -> bool {
        self.result == TxnResult::InProgress
    }

    pub fn epoch_id(&self) -> EpochId {
        self.epoch.id()
    }

    pub(crate) fn epoch(&self) -> &Arc<Epoch> {
        &self.epoch
    }

    pub fn rw_set(&self) -> &HashMap<TupleCoordinate, RwOperation> {
        &self.rw_set
    }

    pub fn operation(&self, coord: TupleCoordinate) -> Option<RwOperation> {
        self.rw_set.get(&coord).copied()
    }

    /// Records a read. Idempotent; never downgrades a write tag.
    pub(crate) fn record_read(&mut self, coord: TupleCoordinate) {
        self.rw_set.entry(coord).or_insert(RwOperation::Read);
    }

    /// Records that `coord` was superseded by a new version.
    pub(crate) fn record_update(&mut self, coord: TupleCoordinate) {
        let entry = self.rw_set.entry(coord).or_insert(RwOperation::Update);
        if *entry == RwOperation::Read {
            *entry = RwOperation::Update;
        }
    }

    pub(crate) fn record_insert(&mut self, coord: TupleCoordinate) {
        debug_assert!(
            !self.rw_set.contains_key(&coord),
            "insert into a slot already tracked at {}",
            coord
        );
        self.rw_set.insert(coord, RwOperation::Insert);
    }

    /// Records that `coord` was superseded by a tombstone. An insert
    /// deleted in the same transaction collapses to INS_DEL.
    pub(crate) fn record_delete(&mut self, coord: TupleCoordinate) {
        let entry = self.rw_set.entry(coord).or_insert(RwOperation::Delete);
        match *entry {
            RwOperation::Insert => *entry = RwOperation::InsertDelete,
            RwOperation::Read | RwOperation::Update => *entry = RwOperation::Delete,
            _ => {}
        }
    }

    /// Retags an UPDATE entry as DELETE; used by the in-place delete of
    /// a version this transaction already superseded.
    pub(crate) fn retag_update_as_delete(&mut self, coord: TupleCoordinate) -> bool {
        match self.rw_set.get_mut(&coord) {
            Some(op) if *op == RwOperation::Update => {
                *op = RwOperation::Delete;
                true
            }
            _ => false,
        }
    }
}
