// End-to-end MVCC scenarios: conflict handling, snapshot stability,
// and same-transaction insert/delete cancellation.

use std::sync::Arc;

use tidal_db::catalog::{Column, DataType, Schema, Value};
use tidal_db::common::INVALID_TXN_ID;
use tidal_db::logging::{LogSink, MemoryLogSink, TransactionRecord};
use tidal_db::storage::Tuple;
use tidal_db::transaction::TxnResult;
use tidal_db::{DbError, Engine, EngineConfig, TransactionMode};

fn quiet_config() -> EngineConfig {
    // Long periods keep the background ticker and collector out of the
    // way; tests drive epochs and GC passes explicitly.
    EngineConfig {
        epoch_period_ms: 60_000,
        gc_period_ms: 60_000,
        ..EngineConfig::default()
    }
}

fn accounts_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", DataType::Integer).not_null(),
        Column::new("balance", DataType::Integer),
    ])
}

fn row(id: i64, balance: i64) -> Tuple {
    Tuple::new(vec![Value::Integer(id), Value::Integer(balance)])
}

fn balance(tuple: &Tuple) -> i64 {
    match tuple.value(1) {
        Some(Value::Integer(v)) => *v,
        other => panic!("unexpected balance value {:?}", other),
    }
}

// Single writer wins; the concurrent writer aborts on the
// ownership race it already lost at update time.
#[test]
fn test_write_write_conflict() {
    let engine = Engine::new(quiet_config());
    engine.create_table("accounts", accounts_schema()).unwrap();

    let mut setup = engine.begin();
    let coord = engine.insert(&mut setup, "accounts", row(1, 100)).unwrap();
    engine.commit(&mut setup).unwrap();

    let mut t1 = engine.begin();
    let mut t2 = engine.begin();

    engine.update(&mut t1, "accounts", coord, row(1, 150)).unwrap();
    let err = engine
        .update(&mut t2, "accounts", coord, row(1, 200))
        .unwrap_err();
    assert!(matches!(err, DbError::OwnershipConflict(_)));

    assert_eq!(engine.commit(&mut t1).unwrap(), TxnResult::Success);
    // T2 was doomed when its acquisition lost; commit reports the abort.
    assert_eq!(engine.commit(&mut t2).unwrap(), TxnResult::Aborted);

    let mut check = engine.begin();
    let rows = engine.scan(&mut check, "accounts").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(balance(&rows[0].1), 150);
    engine.commit(&mut check).unwrap();
}

// A reader's snapshot is stable across a concurrent
// committed update, and the read-only reader still commits.
#[test]
fn test_snapshot_isolation_stable_reads() {
    let engine = Engine::new(quiet_config());
    engine.create_table("accounts", accounts_schema()).unwrap();

    let mut setup = engine.begin();
    let coord = engine.insert(&mut setup, "accounts", row(1, 100)).unwrap();
    engine.commit(&mut setup).unwrap();

    let mut t1 = engine.begin();
    let first = engine.read(&mut t1, coord).unwrap().unwrap();
    assert_eq!(balance(&first), 100);

    let mut t2 = engine.begin();
    engine.update(&mut t2, "accounts", coord, row(1, 200)).unwrap();
    assert_eq!(engine.commit(&mut t2).unwrap(), TxnResult::Success);

    // T1 still sees the version its snapshot pinned.
    let second = engine.read(&mut t1, coord).unwrap().unwrap();
    assert_eq!(balance(&second), 100);
    let scanned = engine.scan(&mut t1, "accounts").unwrap();
    assert_eq!(scanned.len(), 1);
    assert_eq!(balance(&scanned[0].1), 100);

    assert_eq!(engine.commit(&mut t1).unwrap(), TxnResult::Success);

    // A fresh snapshot observes the update.
    let mut t3 = engine.begin();
    let now = engine.read(&mut t3, coord).unwrap();
    assert!(now.is_none(), "superseded version invisible to new snapshot");
    let rows = engine.scan(&mut t3, "accounts").unwrap();
    assert_eq!(balance(&rows[0].1), 200);
    engine.commit(&mut t3).unwrap();
}

// A reader that also writes must still fail validation when its read
// set changed under it.
#[test]
fn test_read_write_transaction_fails_validation() {
    let engine = Engine::new(quiet_config());
    engine.create_table("accounts", accounts_schema()).unwrap();

    let mut setup = engine.begin();
    let r = engine.insert(&mut setup, "accounts", row(1, 100)).unwrap();
    let s = engine.insert(&mut setup, "accounts", row(2, 100)).unwrap();
    engine.commit(&mut setup).unwrap();

    // T1 reads r and writes s; T2 rewrites r underneath it.
    let mut t1 = engine.begin();
    engine.read(&mut t1, r).unwrap().unwrap();
    engine.update(&mut t1, "accounts", s, row(2, 50)).unwrap();

    let mut t2 = engine.begin();
    engine.update(&mut t2, "accounts", r, row(1, 0)).unwrap();
    assert_eq!(engine.commit(&mut t2).unwrap(), TxnResult::Success);

    assert_eq!(engine.commit(&mut t1).unwrap(), TxnResult::Aborted);
    assert_eq!(engine.txn_manager().stats().validation_failures, 1);

    // T1's write to s rolled back.
    let mut check = engine.begin();
    let rows = engine.scan(&mut check, "accounts").unwrap();
    let balances: Vec<i64> = rows.iter().map(|(_, t)| balance(t)).collect();
    assert!(balances.contains(&0));
    assert!(balances.contains(&100));
    engine.commit(&mut check).unwrap();
}

// Insert and delete in the same transaction cancel; the
// slot ends empty and nothing reaches the GC.
#[test]
fn test_insert_delete_same_transaction_cancels() {
    let engine = Engine::new(quiet_config());
    engine.create_table("accounts", accounts_schema()).unwrap();

    let mut txn = engine.begin();
    let coord = engine.insert(&mut txn, "accounts", row(1, 100)).unwrap();
    let tombstone = engine.delete(&mut txn, "accounts", coord).unwrap();
    assert_eq!(tombstone, coord, "own pending insert deletes in place");
    assert_eq!(engine.commit(&mut txn).unwrap(), TxnResult::Success);

    let tile_group = engine.catalog().tile_group(coord.tile_group).unwrap();
    assert_eq!(tile_group.header().owner(coord.slot), INVALID_TXN_ID);

    // Nothing was enqueued, so a full pass reclaims nothing.
    engine.epoch_manager().tick();
    engine.gc().collect_once();
    assert_eq!(engine.gc().stats().reclaimed, 0);
    assert_eq!(engine.gc().free_list_len(1), 0);

    let mut check = engine.begin();
    assert!(engine.scan(&mut check, "accounts").unwrap().is_empty());
    engine.commit(&mut check).unwrap();
}

// Update-then-read in the same transaction sees the new value;
// abort leaves no visible trace.
#[test]
fn test_own_writes_and_abort_rollback() {
    let engine = Engine::new(quiet_config());
    engine.create_table("accounts", accounts_schema()).unwrap();

    let mut setup = engine.begin();
    let coord = engine.insert(&mut setup, "accounts", row(1, 100)).unwrap();
    engine.commit(&mut setup).unwrap();

    let mut txn = engine.begin();
    let new_coord = engine.update(&mut txn, "accounts", coord, row(1, 500)).unwrap();
    // The updater reads its own pending version.
    let pending = engine.read(&mut txn, new_coord).unwrap().unwrap();
    assert_eq!(balance(&pending), 500);
    // The superseded version is invisible to its owner.
    assert!(engine.read(&mut txn, coord).unwrap().is_none());
    assert_eq!(engine.abort(&mut txn).unwrap(), TxnResult::Aborted);

    // Rollback restored the old version and emptied the new slot.
    let mut check = engine.begin();
    let rows = engine.scan(&mut check, "accounts").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, coord);
    assert_eq!(balance(&rows[0].1), 100);
    engine.commit(&mut check).unwrap();

    let tile_group = engine.catalog().tile_group(new_coord.tile_group).unwrap();
    assert_eq!(tile_group.header().owner(new_coord.slot), INVALID_TXN_ID);
}

// NOT NULL is rejected by the write path before any
// version-store mutation.
#[test]
fn test_not_null_rejected_without_mutation() {
    let engine = Engine::new(quiet_config());
    engine.create_table("accounts", accounts_schema()).unwrap();

    let mut txn = engine.begin();
    let bad = Tuple::new(vec![Value::Null, Value::Integer(5)]);
    let err = engine.insert(&mut txn, "accounts", bad).unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(_)));
    assert!(txn.rw_set().is_empty());
    engine.commit(&mut txn).unwrap();

    let mut check = engine.begin();
    assert!(engine.scan(&mut check, "accounts").unwrap().is_empty());
    engine.commit(&mut check).unwrap();
}

// Deleting a committed row hides it from later snapshots.
#[test]
fn test_delete_hides_row() {
    let engine = Engine::new(quiet_config());
    engine.create_table("accounts", accounts_schema()).unwrap();

    let mut setup = engine.begin();
    let coord = engine.insert(&mut setup, "accounts", row(7, 70)).unwrap();
    engine.commit(&mut setup).unwrap();

    let mut deleter = engine.begin();
    engine.delete(&mut deleter, "accounts", coord).unwrap();
    assert_eq!(engine.commit(&mut deleter).unwrap(), TxnResult::Success);

    let mut check = engine.begin();
    assert!(engine.scan(&mut check, "accounts").unwrap().is_empty());
    engine.commit(&mut check).unwrap();
}

// The pessimistic mode commits without read validation.
#[test]
fn test_pessimistic_mode_commit() {
    let config = EngineConfig {
        transaction_mode: TransactionMode::Pessimistic,
        ..quiet_config()
    };
    let engine = Engine::new(config);
    engine.create_table("accounts", accounts_schema()).unwrap();

    let mut setup = engine.begin();
    let coord = engine.insert(&mut setup, "accounts", row(1, 100)).unwrap();
    engine.commit(&mut setup).unwrap();

    // Reader whose read set changes still commits: pessimistic mode
    // does not re-validate reads.
    let mut t1 = engine.begin();
    engine.read(&mut t1, coord).unwrap().unwrap();

    let mut t2 = engine.begin();
    engine.update(&mut t2, "accounts", coord, row(1, 300)).unwrap();
    assert_eq!(engine.commit(&mut t2).unwrap(), TxnResult::Success);

    assert_eq!(engine.commit(&mut t1).unwrap(), TxnResult::Success);

    // Write-write conflicts still surface through acquisition.
    let mut t3 = engine.begin();
    let rows = engine.scan(&mut t3, "accounts").unwrap();
    let current = rows[0].0;
    let mut t4 = engine.begin();
    engine.update(&mut t3, "accounts", current, row(1, 400)).unwrap();
    let err = engine
        .update(&mut t4, "accounts", current, row(1, 500))
        .unwrap_err();
    assert!(matches!(err, DbError::OwnershipConflict(_)));
    engine.commit(&mut t3).unwrap();
    assert_eq!(engine.commit(&mut t4).unwrap(), TxnResult::Aborted);
}

// The logging sink observes the full record stream of a commit and an
// abort.
#[test]
fn test_log_sink_records() {
    let sink = Arc::new(MemoryLogSink::new());
    let engine = Engine::with_log_sink(quiet_config(), Arc::clone(&sink) as Arc<dyn LogSink>);
    engine.create_table("accounts", accounts_schema()).unwrap();

    let mut txn = engine.begin();
    let coord = engine.insert(&mut txn, "accounts", row(1, 100)).unwrap();
    engine.commit(&mut txn).unwrap();

    let mut txn2 = engine.begin();
    engine.update(&mut txn2, "accounts", coord, row(1, 50)).unwrap();
    engine.abort(&mut txn2).unwrap();

    let records = sink.records();
    assert!(records.contains(&TransactionRecord::Begin { txn_id: txn.txn_id() }));
    assert!(records.contains(&TransactionRecord::Insert { location: coord }));
    assert!(records
        .iter()
        .any(|r| matches!(r, TransactionRecord::Commit { txn_id, .. } if *txn_id == txn.txn_id())));
    assert!(records.contains(&TransactionRecord::Abort { txn_id: txn2.txn_id() }));

    // The encoded stream round-trips.
    let decoded = MemoryLogSink::decode(&sink.encode().unwrap()).unwrap();
    assert_eq!(decoded, records);
}
