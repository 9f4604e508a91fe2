//! Connector integration: Parquet directories (flat and
//! date-partitioned) and JSON Lines files queried through the engine.

use std::fs::File;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use meridian::{Engine, JsonlConnector, ParquetConnector, RowExt};

fn write_parquet(path: &Path, ids: Vec<i64>, values: Vec<f64>) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("value", DataType::Float64, false),
        Field::new("label", DataType::Utf8, false),
    ]));
    let labels: Vec<String> = ids.iter().map(|i| format!("row-{i}")).collect();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(ids)) as ArrayRef,
            Arc::new(Float64Array::from(values)) as ArrayRef,
            Arc::new(StringArray::from(labels)) as ArrayRef,
        ],
    )
    .expect("batch");
    let file = File::create(path).expect("create");
    let mut writer = ArrowWriter::try_new(file, schema, None).expect("writer");
    writer.write(&batch).expect("write");
    writer.close().expect("close");
}

#[test]
fn test_parquet_flat_relation() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_parquet(
        &dir.path().join("metrics.parquet"),
        vec![1, 2, 3, 4],
        vec![1.5, 2.5, 3.5, 4.5],
    );

    let mut engine = Engine::new().expect("engine");
    engine.register_connector(Arc::new(ParquetConnector::new("parquet", dir.path())));

    let mut cursor = engine
        .execute("SELECT label FROM metrics WHERE value > 2 ORDER BY id")
        .expect("plan");
    let rows = cursor.fetch_all().expect("rows");
    let labels: Vec<&str> = rows.iter().map(|r| r.get_str(0).expect("utf8")).collect();
    assert_eq!(labels, vec!["row-2", "row-3", "row-4"]);
}

#[test]
fn test_parquet_multi_file_units_keep_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let relation = dir.path().join("events");
    std::fs::create_dir_all(&relation).expect("mkdir");
    write_parquet(&relation.join("part-0.parquet"), vec![1, 2], vec![0.0, 0.0]);
    write_parquet(&relation.join("part-1.parquet"), vec![3, 4], vec![0.0, 0.0]);

    let mut engine = Engine::new().expect("engine");
    engine.register_connector(Arc::new(ParquetConnector::new("parquet", dir.path())));

    let mut cursor = engine.execute("SELECT id FROM events").expect("plan");
    let rows = cursor.fetch_all().expect("rows");
    let ids: Vec<i64> = rows.iter().map(|r| r.get_i64(0).expect("i64")).collect();
    // Unit order is preserved even with parallel reads.
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[test]
fn test_parquet_date_partitions_with_for_clause() {
    let dir = tempfile::tempdir().expect("tempdir");
    let relation = dir.path().join("logs");
    for (date, ids) in [
        ("2026-07-01", vec![1, 2]),
        ("2026-07-02", vec![3]),
        ("2026-07-03", vec![4, 5]),
    ] {
        let day = relation.join(date);
        std::fs::create_dir_all(&day).expect("mkdir");
        let values = vec![0.0; ids.len()];
        write_parquet(&day.join("part-0.parquet"), ids, values);
    }

    let mut engine = Engine::new().expect("engine");
    engine.register_connector(Arc::new(ParquetConnector::new("parquet", dir.path())));

    let mut cursor = engine
        .execute("SELECT COUNT(*) FROM logs FOR DATES BETWEEN '2026-07-02' AND '2026-07-03'")
        .expect("plan");
    let rows = cursor.fetch_all().expect("rows");
    assert_eq!(rows[0].get_i64(0), Some(3));
}

#[test]
fn test_jsonl_relation() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut file = File::create(dir.path().join("people.jsonl"))?;
    writeln!(file, r#"{{"name": "ada", "age": 36}}"#)?;
    writeln!(file, r#"{{"name": "alan", "age": 41}}"#)?;
    writeln!(file, r#"{{"name": "grace", "age": null}}"#)?;

    let mut engine = Engine::new()?;
    engine.register_connector(Arc::new(JsonlConnector::new("jsonl", dir.path())));

    let mut cursor =
        engine.execute("SELECT name FROM people WHERE age IS NOT NULL ORDER BY age DESC")?;
    let rows = cursor.fetch_all()?;
    let names: Vec<&str> = rows.iter().map(|r| r.get_str(0).expect("utf8")).collect();
    assert_eq!(names, vec!["alan", "ada"]);
    Ok(())
}

#[test]
fn test_jsonl_joins_with_demo_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut file = File::create(dir.path().join("visits.jsonl")).expect("create");
    writeln!(file, r#"{{"planet": "Earth", "visits": 12}}"#).expect("write");
    writeln!(file, r#"{{"planet": "Mars", "visits": 7}}"#).expect("write");

    let mut engine = Engine::new().expect("engine");
    engine.register_connector(Arc::new(JsonlConnector::new("jsonl", dir.path())));

    let mut cursor = engine
        .execute(
            "SELECT p.id, v.visits FROM $planets p \
             INNER JOIN visits v ON p.name = v.planet ORDER BY p.id",
        )
        .expect("plan");
    let rows = cursor.fetch_all().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get_i64(0), Some(3));
    assert_eq!(rows[0].get_i64(1), Some(12));
}

#[test]
fn test_connector_registration_order() {
    // A table name served by two connectors resolves to the first.
    let dir = tempfile::tempdir().expect("tempdir");
    write_parquet(&dir.path().join("shared.parquet"), vec![1], vec![1.0]);
    let mut file = File::create(dir.path().join("shared.jsonl")).expect("create");
    writeln!(file, r#"{{"other": true}}"#).expect("write");

    let mut engine = Engine::new().expect("engine");
    engine.register_connector(Arc::new(ParquetConnector::new("parquet", dir.path())));
    engine.register_connector(Arc::new(JsonlConnector::new("jsonl", dir.path())));

    let cursor = engine.execute("SELECT id FROM shared").expect("plan");
    assert_eq!(cursor.schema().field(0).name(), "id");
}
