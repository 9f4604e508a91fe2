//! In-memory connector.
//!
//! Serves host-registered record batches and the built-in demo
//! datasets. Supports every pushdown, including temporal partitioning:
//! a table may carry a per-row visibility date, and a bound `FOR` range
//! hides rows that were not yet known at the end of the range.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::BooleanArray;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use parking_lot::RwLock;

use super::{Capability, Connector, MorselStream, ReadOptions, Unit};
use crate::error::{EngineError, EngineResult};
use crate::expression::PredicateEvaluator;
use crate::morsel::Morsel;
use crate::temporal::TemporalRange;

struct MemoryTable {
    batch: RecordBatch,
    /// Per-row visibility date; `None` entries are always visible.
    visible_from: Option<Vec<Option<NaiveDate>>>,
}

/// Connector over host-registered in-memory tables.
pub struct MemoryConnector {
    name: String,
    tables: RwLock<HashMap<String, MemoryTable>>,
}

impl MemoryConnector {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryConnector {
            name: name.into(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) a table.
    pub fn register_table(&self, name: &str, batch: RecordBatch) -> EngineResult<()> {
        self.tables.write().insert(
            name.to_lowercase(),
            MemoryTable {
                batch,
                visible_from: None,
            },
        );
        Ok(())
    }

    /// Register a table with per-row visibility dates (as-of queries).
    pub fn register_temporal_table(
        &self,
        name: &str,
        batch: RecordBatch,
        visible_from: Vec<Option<NaiveDate>>,
    ) -> EngineResult<()> {
        if visible_from.len() != batch.num_rows() {
            return Err(EngineError::InvalidInput(format!(
                "visibility dates cover {} rows but the table has {}",
                visible_from.len(),
                batch.num_rows()
            )));
        }
        self.tables.write().insert(
            name.to_lowercase(),
            MemoryTable {
                batch,
                visible_from: Some(visible_from),
            },
        );
        Ok(())
    }

    fn visible_batch(
        table: &MemoryTable,
        temporal: Option<&TemporalRange>,
    ) -> EngineResult<RecordBatch> {
        match (&table.visible_from, temporal) {
            (Some(dates), Some(range)) => {
                let mask: BooleanArray = dates
                    .iter()
                    .map(|d| Some(d.map_or(true, |d| d <= range.end)))
                    .collect();
                let morsel = Morsel::from_record_batch(&table.batch).filter(&mask)?;
                morsel.to_record_batch()
            }
            _ => Ok(table.batch.clone()),
        }
    }
}

impl Connector for MemoryConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(
            capability,
            Capability::ProjectionPushdown
                | Capability::FilterPushdown
                | Capability::LimitPushdown
                | Capability::TemporalPartitioning
        )
    }

    fn has_relation(&self, relation: &str) -> bool {
        self.tables.read().contains_key(&relation.to_lowercase())
    }

    fn list_units(
        &self,
        relation: &str,
        _temporal: Option<&TemporalRange>,
    ) -> EngineResult<Vec<Unit>> {
        let tables = self.tables.read();
        let table = tables.get(&relation.to_lowercase()).ok_or_else(|| {
            EngineError::UnresolvedName(format!("table '{relation}' is not registered"))
        })?;
        Ok(vec![Unit {
            relation: relation.to_lowercase(),
            index: 0,
            path: None,
            rows: Some(table.batch.num_rows()),
            date: None,
        }])
    }

    fn probe_schema(&self, relation: &str) -> EngineResult<SchemaRef> {
        let tables = self.tables.read();
        let table = tables.get(&relation.to_lowercase()).ok_or_else(|| {
            EngineError::UnresolvedName(format!("table '{relation}' is not registered"))
        })?;
        Ok(table.batch.schema())
    }

    fn read(&self, unit: &Unit, options: &ReadOptions) -> EngineResult<MorselStream> {
        let tables = self.tables.read();
        let table = tables.get(&unit.relation).ok_or_else(|| {
            EngineError::UnresolvedName(format!("table '{}' is not registered", unit.relation))
        })?;

        let batch = Self::visible_batch(table, options.temporal.as_ref())?;
        let mut morsel = Morsel::from_record_batch(&batch);

        // Filters are bound to the base schema, so apply before projecting.
        for filter in &options.filters {
            let evaluator = PredicateEvaluator::new(filter.clone());
            let mask = evaluator.evaluate(&morsel)?;
            morsel = morsel.filter(&mask)?;
        }
        if let Some(projection) = &options.projection {
            morsel = morsel.select(projection)?;
        }
        if let Some(limit) = options.limit {
            if morsel.num_rows() > limit {
                morsel = morsel.slice(0, limit);
            }
        }

        let batch_rows = options.batch_rows.max(1);
        let mut chunks = Vec::new();
        let mut offset = 0;
        while offset < morsel.num_rows() {
            let length = batch_rows.min(morsel.num_rows() - offset);
            chunks.push(Ok(morsel.slice(offset, length)));
            offset += length;
        }
        if chunks.is_empty() {
            chunks.push(Ok(Morsel::empty(morsel.schema())));
        }
        Ok(Box::new(chunks.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morsel::schema_from_fields;
    use crate::vector::Vector;
    use arrow::array::{ArrayRef, Int64Array};
    use arrow::datatypes::DataType;

    fn sample_batch() -> RecordBatch {
        let schema = schema_from_fields(vec![("id".to_string(), DataType::Int64, false)]);
        let id = Vector::new(Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef);
        Morsel::try_new(schema, vec![id])
            .expect("morsel")
            .to_record_batch()
            .expect("batch")
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn test_roundtrip_read() {
        let connector = MemoryConnector::new("mem");
        connector
            .register_table("t", sample_batch())
            .expect("register");
        let units = connector.list_units("t", None).expect("units");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].rows, Some(3));

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
        assert_eq!(morsels[0].num_rows(), 2);
        assert_eq!(morsels[1].num_rows(), 1);
    }

    #[test]
    fn test_temporal_visibility() {
        let connector = MemoryConnector::new("mem");
        connector
            .register_temporal_table(
                "t",
                sample_batch(),
                vec![None, Some(date("2000-06-01")), Some(date("2020-01-01"))],
            )
            .expect("register");

        let unit = &connector.list_units("t", None).expect("units")[0];
        let options = ReadOptions {
            temporal: Some(TemporalRange::single(date("2010-01-01"))),
            batch_rows: 10,
            ..ReadOptions::default()
        };
        let morsels: Vec<_> = connector
            .read(unit, &options)
            .expect("read")
            .collect::<EngineResult<_>>()
            .expect("morsels");
        // Row 3 became visible only in 2020.
        assert_eq!(morsels[0].num_rows(), 2);
    }

    #[test]
    fn test_case_insensitive_names() {
        let connector = MemoryConnector::new("mem");
        connector
            .register_table("Planets", sample_batch())
            .expect("register");
        assert!(connector.has_relation("planets"));
        assert!(connector.has_relation("PLANETS"));
    }
}
