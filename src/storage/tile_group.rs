// Copyright (c) 2025 TidalDB Contributors
//
// Tile group: a page-addressed array of tuple slots with per-slot MVCC
// header words.
//
// Each slot carries four header fields, all stored in atomic words so
// readers never take a lock:
//
// - owner: transaction id currently holding the slot, INITIAL (unowned,
//   committed) or INVALID (empty / aborted).
// - begin_cid: commit id at which the version becomes visible; MAX_CID
//   while uncommitted.
// - end_cid: commit id at which the version ceases to be visible;
//   MAX_CID while current, INVALID_CID for an uncommitted delete.
// - next_version: packed coordinate of the successor version.
//
// Writers serialize per slot through a CAS on the owner word. The store
// that publishes a committed owner uses release ordering and pairs with
// acquire loads on the reader side, so a reader either sees the slot
// still locked or sees the payload with its final timestamps.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::common::{
    CommitId, SlotId, TableId, TileGroupId, TupleCoordinate, TxnId, INITIAL_TXN_ID,
    INVALID_TXN_ID, MAX_CID,
};
use crate::storage::Tuple;

/// Per-slot MVCC header array for one tile group.
pub struct TileGroupHeader {
    owners: Vec<AtomicU64>,
    begin_cids: Vec<AtomicU64>,
    end_cids: Vec<AtomicU64>,
    next_versions: Vec<AtomicU64>,
}

impl TileGroupHeader {
    pub fn new(capacity: usize) -> Self {
        let mut owners = Vec::with_capacity(capacity);
        let mut begin_cids = Vec::with_capacity(capacity);
        let mut end_cids = Vec::with_capacity(capacity);
        let mut next_versions = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            owners.push(AtomicU64::new(INVALID_TXN_ID));
            begin_cids.push(AtomicU64::new(MAX_CID));
            end_cids.push(AtomicU64::new(MAX_CID));
            next_versions.push(AtomicU64::new(TupleCoordinate::INVALID.to_raw()));
        }
        Self {
            owners,
            begin_cids,
            end_cids,
            next_versions,
        }
    }

    pub fn capacity(&self) -> usize {
        self.owners.len()
    }

    pub fn owner(&self, slot: SlotId) -> TxnId {
        self.owners[slot as usize].load(Ordering::Acquire)
    }

    pub fn set_owner(&self, slot: SlotId, txn_id: TxnId) {
        self.owners[slot as usize].store(txn_id, Ordering::Release);
    }

    pub fn begin_cid(&self, slot: SlotId) -> CommitId {
        self.begin_cids[slot as usize].load(Ordering::Acquire)
    }

    pub fn set_begin_cid(&self, slot: SlotId, cid: CommitId) {
        self.begin_cids[slot as usize].store(cid, Ordering::Release);
    }

    pub fn end_cid(&self, slot: SlotId) -> CommitId {
        self.end_cids[slot as usize].load(Ordering::Acquire)
    }

    pub fn set_end_cid(&self, slot: SlotId, cid: CommitId) {
        self.end_cids[slot as usize].store(cid, Ordering::Release);
    }

    pub fn next_version(&self, slot: SlotId) -> TupleCoordinate {
        TupleCoordinate::from_raw(self.next_versions[slot as usize].load(Ordering::Acquire))
    }

    pub fn set_next_version(&self, slot: SlotId, coord: TupleCoordinate) {
        self.next_versions[slot as usize].store(coord.to_raw(), Ordering::Release);
    }

    /// Logical lock: CAS the owner from INITIAL to `txn_id`. Fails if
    /// any other transaction holds the slot or the slot is empty.
    pub fn try_lock_slot(&self, slot: SlotId, txn_id: TxnId) -> bool {
        self.owners[slot as usize]
            .compare_exchange(INITIAL_TXN_ID, txn_id, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release a logical lock held by `txn_id`, restoring INITIAL.
    pub fn unlock_slot(&self, slot: SlotId, txn_id: TxnId) -> bool {
        self.owners[slot as usize]
            .compare_exchange(txn_id, INITIAL_TXN_ID, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns the slot to the empty state. Called when an owned slot
    /// is abandoned on abort and by the GC before recycling.
    pub fn reset_slot(&self, slot: SlotId) {
        self.set_begin_cid(slot, MAX_CID);
        self.set_end_cid(slot, MAX_CID);
        self.set_next_version(slot, TupleCoordinate::INVALID);
        self.set_owner(slot, INVALID_TXN_ID);
    }
}

/// A page of tuple slots plus their MVCC headers.
pub struct TileGroup {
    id: TileGroupId,
    table_id: TableId,
    capacity: usize,
    header: TileGroupHeader,
    slots: Vec<RwLock<Option<Tuple>>>,
    next_slot: AtomicU32,
}

impl TileGroup {
    pub fn new(id: TileGroupId, table_id: TableId, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(RwLock::new(None));
        }
        Self {
            id,
            table_id,
            capacity,
            header: TileGroupHeader::new(capacity),
            slots,
            next_slot: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> TileGroupId {
        self.id
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn header(&self) -> &TileGroupHeader {
        &self.header
    }

    /// Bump-allocates the next never-used slot, or `None` if the page
    /// is exhausted.
    pub fn allocate_slot(&self) -> Option<SlotId> {
        let slot = self.next_slot.fetch_add(1, Ordering::SeqCst);
        if (slot as usize) < self.capacity {
            Some(slot)
        } else {
            None
        }
    }

    pub fn is_full(&self) -> bool {
        self.next_slot.load(Ordering::SeqCst) as usize >= self.capacity
    }

    /// Number of slots ever handed out (allocation high-water mark).
    pub fn allocated_slots(&self) -> usize {
        (self.next_slot.load(Ordering::SeqCst) as usize).min(self.capacity)
    }

    pub fn tuple(&self, slot: SlotId) -> Option<Tuple> {
        self.slots[slot as usize].read().clone()
    }

    pub fn write_tuple(&self, slot: SlotId, tuple: Tuple) {
        *self.slots[slot as usize].write() = Some(tuple);
    }

    pub fn clear_tuple(&self, slot: SlotId) {
        *self.slots[slot as usize].write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::START_TXN_ID;

    #[test]
    fn test_fresh_slot_header_state() {
        let tg = TileGroup::new(1, 1, 4);
        let header = tg.header();
        assert_eq!(header.owner(0), INVALID_TXN_ID);
        assert_eq!(header.begin_cid(0), MAX_CID);
        assert_eq!(header.end_cid(0), MAX_CID);
        assert!(!header.next_version(0).is_valid());
    }

    #[test]
    fn test_bump_allocation_exhausts() {
        let tg = TileGroup::new(1, 1, 2);
        assert_eq!(tg.allocate_slot(), Some(0));
        assert_eq!(tg.allocate_slot(), Some(1));
        assert_eq!(tg.allocate_slot(), None);
        assert!(tg.is_full());
    }

    #[test]
    fn test_slot_lock_cas() {
        let tg = TileGroup::new(1, 1, 2);
        let header = tg.header();
        // An empty slot is not lockable; only INITIAL is.
        assert!(!header.try_lock_slot(0, START_TXN_ID));
        header.set_owner(0, INITIAL_TXN_ID);
        assert!(header.try_lock_slot(0, START_TXN_ID));
        // Second acquirer loses.
        assert!(!header.try_lock_slot(0, START_TXN_ID + 1));
        // Only the holder can unlock.
        assert!(!header.unlock_slot(0, START_TXN_ID + 1));
        assert!(header.unlock_slot(0, START_TXN_ID));
        assert_eq!(header.owner(0), INITIAL_TXN_ID);
    }

    #[test]
    fn test_reset_slot() {
        let tg = TileGroup::new(1, 1, 1);
        let header = tg.header();
        header.set_owner(0, 99);
        header.set_begin_cid(0, 5);
        header.set_end_cid(0, 9);
        header.set_next_version(0, TupleCoordinate::new(2, 3));
        header.reset_slot(0);
        assert_eq!(header.owner(0), INVALID_TXN_ID);
        assert_eq!(header.begin_cid(0), MAX_CID);
        assert_eq!(header.end_cid(0), MAX_CID);
        assert!(!header.next_version(0).is_valid());
    }
}
