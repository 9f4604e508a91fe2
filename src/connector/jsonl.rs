//! JSON Lines connector.
//!
//! Row-oriented files: one JSON object per line. The schema is inferred
//! from a sample prefix: integers widen to floats when both appear,
//! conflicting primitives fall back to strings, nested objects are kept
//! as serialized JSON text, and arrays of primitives become list
//! columns. No pushdown is advertised; the scan operator compensates.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde_json::Value;

use super::{Capability, Connector, MorselStream, ReadOptions, Unit};
use crate::error::{EngineError, EngineResult};
use crate::morsel::Morsel;
use crate::temporal::TemporalRange;
use crate::vector::{vector_from_scalars, ScalarValue, Vector};

/// Lines sampled for schema inference.
const SCHEMA_SAMPLE_LINES: usize = 100;

/// Connector over a directory of `.jsonl` files.
pub struct JsonlConnector {
    name: String,
    root: PathBuf,
}

impl JsonlConnector {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        JsonlConnector {
            name: name.into(),
            root: root.into(),
        }
    }

    fn relation_file(&self, relation: &str) -> Option<PathBuf> {
        for extension in ["jsonl", "ndjson"] {
            let path = self.root.join(format!("{relation}.{extension}"));
            if path.is_file() {
                return Some(path);
            }
        }
        None
    }

    fn infer_schema(path: &Path) -> EngineResult<SchemaRef> {
        let reader = BufReader::new(File::open(path)?);
        let mut order: Vec<String> = Vec::new();
        let mut types: HashMap<String, DataType> = HashMap::new();

        for line in reader.lines().take(SCHEMA_SAMPLE_LINES) {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line)?;
            let Value::Object(object) = value else {
                return Err(EngineError::InvalidInput(
                    "JSON Lines rows must be objects".into(),
                ));
            };
            for (key, value) in object {
                let observed = json_type(&value);
                match types.get(&key) {
                    None => {
                        order.push(key.clone());
                        types.insert(key, observed);
                    }
                    Some(existing) => {
                        let merged = merge_types(existing, &observed);
                        types.insert(key, merged);
                    }
                }
            }
        }

        if order.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "no rows to infer a schema from in {}",
                path.display()
            )));
        }
        let fields: Vec<Field> = order
            .iter()
            .map(|name| Field::new(name, types[name].clone(), true))
            .collect();
        Ok(Arc::new(Schema::new(fields)))
    }
}

fn json_type(value: &Value) -> DataType {
    match value {
        Value::Null => DataType::Null,
        Value::Bool(_) => DataType::Boolean,
        Value::Number(n) => {
            if n.is_i64() {
                DataType::Int64
            } else {
                DataType::Float64
            }
        }
        Value::String(_) => DataType::Utf8,
        Value::Array(items) => {
            let mut element = DataType::Null;
            for item in items {
                element = merge_types(&element, &json_type(item));
            }
            if element == DataType::Null {
                element = DataType::Utf8;
            }
            DataType::List(Arc::new(Field::new("item", element, true)))
        }
        Value::Object(_) => DataType::Utf8,
    }
}

fn merge_types(a: &DataType, b: &DataType) -> DataType {
    use DataType::{Float64, Int64, Null, Utf8};
    match (a, b) {
        (Null, t) | (t, Null) => t.clone(),
        (a, b) if a == b => a.clone(),
        (Int64, Float64) | (Float64, Int64) => Float64,
        (DataType::List(fa), DataType::List(fb)) => {
            let element = merge_types(fa.data_type(), fb.data_type());
            DataType::List(Arc::new(Field::new("item", element, true)))
        }
        _ => Utf8,
    }
}

fn json_to_scalar(value: &Value, target: &DataType) -> ScalarValue {
    match (value, target) {
        (Value::Null, _) => ScalarValue::Null,
        (Value::Bool(b), DataType::Boolean) => ScalarValue::Boolean(*b),
        (Value::Number(n), DataType::Int64) => {
            n.as_i64().map_or(ScalarValue::Null, ScalarValue::Int64)
        }
        (Value::Number(n), DataType::Float64) => {
            n.as_f64().map_or(ScalarValue::Null, ScalarValue::Float64)
        }
        (Value::String(s), DataType::Utf8) => ScalarValue::Utf8(s.clone()),
        (Value::Array(items), DataType::List(field)) => ScalarValue::List(
            items
                .iter()
                .map(|i| json_to_scalar(i, field.data_type()))
                .collect(),
        ),
        // Anything else lands in a string column as serialized JSON.
        (v, DataType::Utf8) => ScalarValue::Utf8(match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        _ => ScalarValue::Null,
    }
}

impl Connector for JsonlConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, _capability: Capability) -> bool {
        false
    }

    fn has_relation(&self, relation: &str) -> bool {
        self.relation_file(relation).is_some()
    }

    fn list_units(
        &self,
        relation: &str,
        _temporal: Option<&TemporalRange>,
    ) -> EngineResult<Vec<Unit>> {
        let path = self.relation_file(relation).ok_or_else(|| {
            EngineError::UnresolvedName(format!("no JSON Lines data for table '{relation}'"))
        })?;
        Ok(vec![Unit {
            relation: relation.to_string(),
            index: 0,
            path: Some(path),
            rows: None,
            date: None,
        }])
    }

    fn probe_schema(&self, relation: &str) -> EngineResult<SchemaRef> {
        let path = self.relation_file(relation).ok_or_else(|| {
            EngineError::UnresolvedName(format!("no JSON Lines data for table '{relation}'"))
        })?;
        Self::infer_schema(&path)
    }

    fn read(&self, unit: &Unit, options: &ReadOptions) -> EngineResult<MorselStream> {
        let path = unit
            .path
            .as_ref()
            .ok_or_else(|| EngineError::Internal("jsonl unit without a path".into()))?;
        let schema = Self::infer_schema(path)?;
        let reader = BufReader::new(File::open(path)?);
        let batch_rows = options.batch_rows.max(1);

        let mut morsels: Vec<EngineResult<Morsel>> = Vec::new();
        let mut rows: Vec<Vec<ScalarValue>> = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line)?;
            let Value::Object(object) = value else {
                return Err(EngineError::InvalidInput(
                    "JSON Lines rows must be objects".into(),
                ));
            };
            let row: Vec<ScalarValue> = schema
                .fields()
                .iter()
                .map(|f| {
                    object
                        .get(f.name())
                        .map_or(ScalarValue::Null, |v| json_to_scalar(v, f.data_type()))
                })
                .collect();
            rows.push(row);
            if rows.len() == batch_rows {
                morsels.push(build_morsel(&schema, &rows));
                rows.clear();
            }
        }
        if !rows.is_empty() {
            morsels.push(build_morsel(&schema, &rows));
        }
        if morsels.is_empty() {
            morsels.push(Ok(Morsel::empty(schema)));
        }
        Ok(Box::new(morsels.into_iter()))
    }
}

fn build_morsel(schema: &SchemaRef, rows: &[Vec<ScalarValue>]) -> EngineResult<Morsel> {
    let mut columns = Vec::with_capacity(schema.fields().len());
    for (i, field) in schema.fields().iter().enumerate() {
        let values: Vec<ScalarValue> = rows.iter().map(|r| r[i].clone()).collect();
        columns.push(Vector::new(vector_from_scalars(
            field.data_type(),
            &values,
        )?));
    }
    Morsel::try_new(schema.clone(), columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_jsonl(dir: &Path, name: &str, lines: &[&str]) {
        let mut file = File::create(dir.join(name)).expect("create");
        for line in lines {
            writeln!(file, "{line}").expect("write");
        }
    }

    #[test]
    fn test_schema_inference_and_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_jsonl(
            dir.path(),
            "people.jsonl",
            &[
                r#"{"name": "ada", "age": 36, "tags": ["math"]}"#,
                r#"{"name": "alan", "age": 41.5}"#,
                r#"{"name": "grace", "age": null, "tags": ["navy", "cobol"]}"#,
            ],
        );

        let connector = JsonlConnector::new("jsonl", dir.path());
        assert!(connector.has_relation("people"));
        let schema = connector.probe_schema("people").expect("schema");
        assert_eq!(schema.field(0).name(), "name");
        // Int and float merged to float.
        assert_eq!(schema.field(1).data_type(), &DataType::Float64);
        assert!(matches!(schema.field(2).data_type(), DataType::List(_)));

        let units = connector.list_units("people", None).expect("units");
        let options = ReadOptions {
            batch_rows: 2,
            ..ReadOptions::default()
        };
        let morsels: Vec<_> = connector
            .read(&units[0], &options)
            .expect("read")
            .collect::<EngineResult<_>>()
            .expect("morsels");
        assert_eq!(morsels.len(), 2);
        assert_eq!(morsels[0].num_rows() + morsels[1].num_rows(), 3);
    }

    #[test]
    fn test_conflicting_types_fall_back_to_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_jsonl(
            dir.path(),
            "mixed.jsonl",
            &[
                r#"{"v": 1}"#,
                r#"{"v": "two"}"#,
                r#"{"v": {"nested": true}}"#,
            ],
        );
        let connector = JsonlConnector::new("jsonl", dir.path());
        let schema = connector.probe_schema("mixed").expect("schema");
        assert_eq!(schema.field(0).data_type(), &DataType::Utf8);
    }

    #[test]
    fn test_missing_relation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let connector = JsonlConnector::new("jsonl", dir.path());
        assert!(!connector.has_relation("absent"));
        assert!(connector.list_units("absent", None).is_err());
    }
}
