// Logging sink: the push-only interface to the write-ahead log.
//
// The engine core appends typed transaction records and never reads
// them back; replay belongs to the recovery layer behind this trait.
// Two implementations ship with the crate: a no-op sink for callers
// that bring their own durability, and an in-memory sink whose encoded
// form matches what a file-backed sink would persist.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::common::{CommitId, TupleCoordinate, TxnId};
use crate::Result;

/// A single entry appended to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionRecord {
    Begin { txn_id: TxnId },
    Commit { txn_id: TxnId, commit_cid: CommitId },
    Abort { txn_id: TxnId },
    Insert { location: TupleCoordinate },
    Update { old_location: TupleCoordinate, new_location: TupleCoordinate },
    Delete { old_location: TupleCoordinate, new_location: TupleCoordinate },
}

/// Push-only sink for transaction records.
pub trait LogSink: Send + Sync {
    fn append(&self, record: TransactionRecord);

    fn log_begin_txn(&self, txn_id: TxnId) {
        self.append(TransactionRecord::Begin { txn_id });
    }

    fn log_commit_txn(&self, txn_id: TxnId, commit_cid: CommitId) {
        self.append(TransactionRecord::Commit { txn_id, commit_cid });
    }

    fn log_abort_txn(&self, txn_id: TxnId) {
        self.append(TransactionRecord::Abort { txn_id });
    }

    fn log_insert(&self, location: TupleCoordinate) {
        self.append(TransactionRecord::Insert { location });
    }

    fn log_update(&self, old_location: TupleCoordinate, new_location: TupleCoordinate) {
        self.append(TransactionRecord::Update {
            old_location,
            new_location,
        });
    }

    fn log_delete(&self, old_location: TupleCoordinate, new_location: TupleCoordinate) {
        self.append(TransactionRecord::Delete {
            old_location,
            new_location,
        });
    }
}

/// Discards every record.
#[derive(Debug, Default)]
pub struct NoopLogSink;

impl LogSink for NoopLogSink {
    fn append(&self, _record: TransactionRecord) {}
}

/// Buffers records in memory; used by tests and embedders that flush
/// the log themselves.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<TransactionRecord>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TransactionRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Wire encoding of the buffered records.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let records = self.records.lock();
        let bytes = bincode::serde::encode_to_vec(&*records, bincode::config::standard())?;
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Vec<TransactionRecord>> {
        let (records, _) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(records)
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, record: TransactionRecord) {
        self.records.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_ordering() {
        let sink = MemoryLogSink::new();
        sink.log_begin_txn(2);
        sink.log_insert(TupleCoordinate::new(1, 0));
        sink.log_commit_txn(2, 5);

        let records = sink.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], TransactionRecord::Begin { txn_id: 2 });
        assert_eq!(
            records[2],
            TransactionRecord::Commit {
                txn_id: 2,
                commit_cid: 5
            }
        );
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let sink = MemoryLogSink::new();
        sink.log_begin_txn(3);
        sink.log_update(TupleCoordinate::new(1, 4), TupleCoordinate::new(2, 0));
        sink.log_abort_txn(3);

        let bytes = sink.encode().unwrap();
        let decoded = MemoryLogSink::decode(&bytes).unwrap();
        assert_eq!(decoded, sink.records());
    }
}
