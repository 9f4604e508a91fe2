//! Parquet directory connector.
//!
//! Serves relations laid out under a root directory:
//!
//! ```text
//! <root>/<relation>.parquet              single file
//! <root>/<relation>/*.parquet            multi-file relation
//! <root>/<relation>/YYYY-MM-DD/*.parquet date-partitioned relation
//! ```
//!
//! Date-partitioned layouts advertise temporal partitioning: a bound
//! `FOR` range prunes whole partition directories without reading them.
//! Projection and limit push into the Parquet reader; filtering stays
//! with the scan operator.

use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::datatypes::SchemaRef;
use chrono::NaiveDate;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;

use super::{Capability, Connector, MorselStream, ReadOptions, Unit};
use crate::error::{EngineError, EngineResult};
use crate::morsel::Morsel;
use crate::temporal::TemporalRange;

/// Connector over a directory tree of Parquet files.
pub struct ParquetConnector {
    name: String,
    root: PathBuf,
}

impl ParquetConnector {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        ParquetConnector {
            name: name.into(),
            root: root.into(),
        }
    }

    fn relation_path(&self, relation: &str) -> Option<PathBuf> {
        let dir = self.root.join(relation);
        if dir.is_dir() {
            return Some(dir);
        }
        let file = self.root.join(format!("{relation}.parquet"));
        if file.is_file() {
            return Some(file);
        }
        None
    }

    fn parquet_files(dir: &Path) -> EngineResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "parquet") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Date subdirectories, sorted; empty when the layout is flat.
    fn date_partitions(dir: &Path) -> EngineResult<Vec<(NaiveDate, PathBuf)>> {
        let mut partitions = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if let Ok(date) = NaiveDate::parse_from_str(name, "%Y-%m-%d") {
                    partitions.push((date, path));
                }
            }
        }
        partitions.sort();
        Ok(partitions)
    }

    fn row_count(path: &Path) -> EngineResult<usize> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        Ok(builder.metadata().file_metadata().num_rows().max(0) as usize)
    }
}

impl Connector for ParquetConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(
            capability,
            Capability::ProjectionPushdown
                | Capability::LimitPushdown
                | Capability::TemporalPartitioning
        )
    }

    fn has_relation(&self, relation: &str) -> bool {
        self.relation_path(relation).is_some()
    }

    fn list_units(
        &self,
        relation: &str,
        temporal: Option<&TemporalRange>,
    ) -> EngineResult<Vec<Unit>> {
        let path = self.relation_path(relation).ok_or_else(|| {
            EngineError::UnresolvedName(format!("no parquet data for table '{relation}'"))
        })?;

        let mut sources: Vec<(Option<NaiveDate>, PathBuf)> = Vec::new();
        if path.is_file() {
            sources.push((None, path));
        } else {
            let partitions = Self::date_partitions(&path)?;
            if partitions.is_empty() {
                for file in Self::parquet_files(&path)? {
                    sources.push((None, file));
                }
            } else {
                for (date, dir) in partitions {
                    let keep = temporal.is_none_or(|range| range.contains(date));
                    if keep {
                        for file in Self::parquet_files(&dir)? {
                            sources.push((Some(date), file));
                        }
                    }
                }
            }
        }

        let mut units = Vec::with_capacity(sources.len());
        for (index, (date, file)) in sources.into_iter().enumerate() {
            let rows = match Self::row_count(&file) {
                Ok(rows) => Some(rows),
                Err(e) => {
                    tracing::warn!(file = %file.display(), error = %e, "unreadable parquet footer");
                    None
                }
            };
            units.push(Unit {
                relation: relation.to_string(),
                index,
                path: Some(file),
                rows,
                date,
            });
        }
        Ok(units)
    }

    fn probe_schema(&self, relation: &str) -> EngineResult<SchemaRef> {
        let units = self.list_units(relation, None)?;
        let unit = units.first().ok_or_else(|| {
            EngineError::InvalidInput(format!("table '{relation}' has no parquet files"))
        })?;
        let path = unit
            .path
            .as_ref()
            .ok_or_else(|| EngineError::Internal("parquet unit without a path".into()))?;
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        Ok(builder.schema().clone())
    }

    fn read(&self, unit: &Unit, options: &ReadOptions) -> EngineResult<MorselStream> {
        let path = unit
            .path
            .as_ref()
            .ok_or_else(|| EngineError::Internal("parquet unit without a path".into()))?;
        let file = File::open(path)?;
        let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(options.batch_rows.max(1));

        if let Some(projection) = &options.projection {
            let mask = ProjectionMask::roots(builder.parquet_schema(), projection.iter().copied());
            builder = builder.with_projection(mask);
        }
        if let Some(limit) = options.limit {
            builder = builder.with_limit(limit);
        }

        let reader = builder.build()?;
        Ok(Box::new(reader.map(|batch| {
            batch
                .map(|b| Morsel::from_record_batch(&b))
                .map_err(EngineError::from)
        })))
    }
}
