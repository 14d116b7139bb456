// Commit-path and scan throughput.

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use tidal_db::catalog::{Column, DataType, Schema, Value};
use tidal_db::storage::Tuple;
use tidal_db::{Engine, EngineConfig, GcType};

fn bench_engine() -> Engine {
    let config = EngineConfig {
        gc_type: GcType::Epoch,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config);
    engine
        .create_table(
            "bench",
            Schema::new(vec![
                Column::new("id", DataType::Integer).not_null(),
                Column::new("payload", DataType::Text),
            ]),
        )
        .unwrap();
    engine
}

fn row(id: i64) -> Tuple {
    Tuple::new(vec![Value::Integer(id), Value::Text("payload".to_string())])
}

fn bench_insert_commit(c: &mut Criterion) {
    let engine = bench_engine();
    let mut id = 0i64;
    c.bench_function("insert_commit", |b| {
        b.iter(|| {
            let mut txn = engine.begin();
            id += 1;
            engine.insert(&mut txn, "bench", row(id)).unwrap();
            black_box(engine.commit(&mut txn).unwrap());
        })
    });
}

fn bench_update_commit(c: &mut Criterion) {
    let engine = bench_engine();
    let mut setup = engine.begin();
    let coord = engine.insert(&mut setup, "bench", row(1)).unwrap();
    engine.commit(&mut setup).unwrap();

    let mut current = coord;
    c.bench_function("update_commit", |b| {
        b.iter(|| {
            let mut txn = engine.begin();
            current = engine.update(&mut txn, "bench", current, row(1)).unwrap();
            black_box(engine.commit(&mut txn).unwrap());
        })
    });
}

fn bench_seq_scan(c: &mut Criterion) {
    let engine = bench_engine();
    let mut setup = engine.begin();
    for id in 0..1024 {
        engine.insert(&mut setup, "bench", row(id)).unwrap();
    }
    engine.commit(&mut setup).unwrap();

    c.bench_function("seq_scan_1k", |b| {
        b.iter(|| {
            let mut txn = engine.begin();
            let rows = engine.scan(&mut txn, "bench").unwrap();
            black_box(rows.len());
            engine.commit(&mut txn).unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_insert_commit,
    bench_update_commit,
    bench_seq_scan
);
criterion_main!(benches);
