// Common Types for the Storage Engine Core
//
// This module defines the identifier aliases, MVCC sentinel values, and
// small value types shared by the version store, transaction managers,
// epoch manager, and garbage collector.
//
// # Identifier spaces
//
// - Transaction ids and commit ids are 64-bit. Two transaction ids are
//   reserved: `INVALID_TXN_ID` marks an empty or aborted slot, and
//   `INITIAL_TXN_ID` marks a committed, unowned slot. Real transactions
//   start at `START_TXN_ID`.
// - Commit ids double as reader snapshots. `INVALID_CID` marks an
//   uncommitted delete (tombstone marker); `MAX_CID` means "not yet
//   committed" in a begin field and "still current" in an end field.
// - Epoch ids are drawn on the commit-id axis: an epoch's id is the
//   value of the commit counter at the moment the epoch opens.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Transaction identifier; doubles as the owner token in slot headers.
pub type TxnId = u64;

/// Commit timestamp; doubles as the reader snapshot.
pub type CommitId = u64;

/// Epoch identifier (commit-id axis).
pub type EpochId = u64;

/// Table identifier.
pub type TableId = u32;

/// Tile group (page) identifier.
pub type TileGroupId = u32;

/// Slot offset within a tile group.
pub type SlotId = u32;

/// Owner token of an empty or aborted slot.
pub const INVALID_TXN_ID: TxnId = 0;

/// Owner token of a committed, unowned slot.
pub const INITIAL_TXN_ID: TxnId = 1;

/// First identifier handed to a real transaction.
pub const START_TXN_ID: TxnId = 2;

/// Marks an uncommitted delete in an end-cid field.
pub const INVALID_CID: CommitId = 0;

/// First commit id handed out.
pub const START_CID: CommitId = 1;

/// "Not yet committed" (begin) / "still current" (end).
pub const MAX_CID: CommitId = u64::MAX;

const INVALID_COORD_RAW: u64 = u64::MAX;

/// Physical location of a tuple version: `(tile-group-id, slot)`.
///
/// Also serves as the next-version pointer within a version chain, in
/// which case it is packed into a single `u64` so the pointer can live
/// in an atomic header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleCoordinate {
    pub tile_group: TileGroupId,
    pub slot: SlotId,
}

impl TupleCoordinate {
    pub const INVALID: TupleCoordinate = TupleCoordinate {
        tile_group: TileGroupId::MAX,
        slot: SlotId::MAX,
    };

    pub fn new(tile_group: TileGroupId, slot: SlotId) -> Self {
        Self { tile_group, slot }
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Packs the coordinate into a `u64` for storage in an atomic word.
    pub fn to_raw(self) -> u64 {
        ((self.tile_group as u64) << 32) | self.slot as u64
    }

    pub fn from_raw(raw: u64) -> Self {
        if raw == INVALID_COORD_RAW {
            return Self::INVALID;
        }
        Self {
            tile_group: (raw >> 32) as TileGroupId,
            slot: raw as SlotId,
        }
    }
}

impl fmt::Display for TupleCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "({}, {})", self.tile_group, self.slot)
        } else {
            write!(f, "(invalid)")
        }
    }
}

/// Metadata describing a dead version, enqueued for garbage collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleMetadata {
    pub table_id: TableId,
    pub tile_group_id: TileGroupId,
    pub tuple_id: SlotId,
    pub end_cid: CommitId,
}

impl TupleMetadata {
    pub fn coordinate(&self) -> TupleCoordinate {
        TupleCoordinate::new(self.tile_group_id, self.tuple_id)
    }
}

/// Process-wide source of transaction ids and commit timestamps.
///
/// Shared between the transaction manager (which draws both counters)
/// and the epoch manager (whose ticker stamps each new epoch with the
/// current commit-counter value).
#[derive(Debug)]
pub struct TimestampOracle {
    next_txn_id: AtomicU64,
    next_cid: AtomicU64,
}

impl TimestampOracle {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(START_TXN_ID),
            next_cid: AtomicU64::new(START_CID),
        }
    }

    pub fn next_txn_id(&self) -> TxnId {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_cid(&self) -> CommitId {
        self.next_cid.fetch_add(1, Ordering::SeqCst)
    }

    /// Current commit-counter value without advancing it.
    pub fn peek_cid(&self) -> CommitId {
        self.next_cid.load(Ordering::SeqCst)
    }

    /// Used by recovery to fast-forward the commit counter.
    pub fn set_next_cid(&self, cid: CommitId) {
        self.next_cid.store(cid, Ordering::SeqCst);
    }
}

impl Default for TimestampOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_pack_round_trip() {
        let coord = TupleCoordinate::new(7, 42);
        assert_eq!(TupleCoordinate::from_raw(coord.to_raw()), coord);
        assert!(coord.is_valid());
    }

    #[test]
    fn test_invalid_coordinate_raw() {
        assert_eq!(TupleCoordinate::INVALID.to_raw(), u64::MAX);
        assert!(!TupleCoordinate::from_raw(u64::MAX).is_valid());
    }

    #[test]
    fn test_oracle_counters_independent() {
        let oracle = TimestampOracle::new();
        assert_eq!(oracle.next_txn_id(), START_TXN_ID);
        assert_eq!(oracle.next_txn_id(), START_TXN_ID + 1);
        assert_eq!(oracle.next_cid(), START_CID);
        assert_eq!(oracle.peek_cid(), START_CID + 1);
    }
}
