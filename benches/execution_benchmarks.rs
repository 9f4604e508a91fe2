//! Criterion benchmarks over the core operators: hash join build/probe,
//! aggregation and the fused top-k sort.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use criterion::{criterion_group, criterion_main, Criterion};

use meridian::Engine;

fn build_engine(rows: i64) -> Engine {
    let engine = Engine::new().expect("engine");
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("bucket", DataType::Int64, false),
        Field::new("value", DataType::Float64, false),
    ]));
    let ids: Int64Array = (0..rows).collect::<Vec<_>>().into();
    let buckets: Int64Array = (0..rows).map(|i| i % 100).collect::<Vec<_>>().into();
    let values: Float64Array = (0..rows)
        .map(|i| (i as f64) * 0.5)
        .collect::<Vec<_>>()
        .into();
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(ids) as ArrayRef,
            Arc::new(buckets) as ArrayRef,
            Arc::new(values) as ArrayRef,
        ],
    )
    .expect("batch");
    engine.register_table("facts", batch).expect("register");
    engine
}

fn run(engine: &Engine, sql: &str) -> usize {
    engine
        .execute(sql)
        .expect("plan")
        .fetch_all()
        .expect("rows")
        .len()
}

fn bench_hash_join(c: &mut Criterion) {
    let engine = build_engine(50_000);
    c.bench_function("hash_join_self", |b| {
        b.iter(|| {
            run(
                &engine,
                "SELECT a.id FROM facts a INNER JOIN facts b ON a.id = b.id WHERE a.bucket = 7",
            )
        });
    });
}

fn bench_aggregation(c: &mut Criterion) {
    let engine = build_engine(100_000);
    c.bench_function("group_by_sum", |b| {
        b.iter(|| {
            run(
                &engine,
                "SELECT bucket, SUM(value), COUNT(*) FROM facts GROUP BY bucket",
            )
        });
    });
}

fn bench_top_k(c: &mut Criterion) {
    let engine = build_engine(100_000);
    c.bench_function("top_k_heap", |b| {
        b.iter(|| run(&engine, "SELECT id FROM facts ORDER BY value DESC LIMIT 10"));
    });
}

fn bench_distinct(c: &mut Criterion) {
    let engine = build_engine(100_000);
    c.bench_function("distinct_bucket", |b| {
        b.iter(|| run(&engine, "SELECT DISTINCT bucket FROM facts"));
    });
}

criterion_group!(
    benches,
    bench_hash_join,
    bench_aggregation,
    bench_top_k,
    bench_distinct
);
criterion_main!(benches);
