//! Morsels: the unit of inter-operator data transfer.
//!
//! A morsel is an ordered tuple of equally-long vectors plus a schema.
//! Operators exchange morsels through the pull loop; a typical target
//! length is 10,000–65,536 rows.

use std::sync::Arc;

use arrow::array::{BooleanArray, Int32Array};
use arrow::compute;
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::error::{EngineError, EngineResult};
use crate::vector::{kernels, Vector};

/// A batch of rows: equally-long vectors plus the schema naming them.
#[derive(Debug, Clone)]
pub struct Morsel {
    schema: SchemaRef,
    columns: Vec<Vector>,
}

impl Morsel {
    /// Build a morsel, checking the equal-length invariant and schema
    /// arity.
    pub fn try_new(schema: SchemaRef, columns: Vec<Vector>) -> EngineResult<Morsel> {
        if schema.fields().len() != columns.len() {
            return Err(EngineError::InvalidInput(format!(
                "schema has {} fields but {} columns were supplied",
                schema.fields().len(),
                columns.len()
            )));
        }
        if let Some(first) = columns.first() {
            for (i, column) in columns.iter().enumerate() {
                if column.len() != first.len() {
                    return Err(EngineError::InvalidInput(format!(
                        "column {i} has length {} but column 0 has length {}",
                        column.len(),
                        first.len()
                    )));
                }
            }
        }
        Ok(Morsel { schema, columns })
    }

    /// A zero-row morsel with the given schema.
    pub fn empty(schema: SchemaRef) -> Morsel {
        let columns = schema
            .fields()
            .iter()
            .map(|f| Vector::new(arrow::array::new_empty_array(f.data_type())))
            .collect();
        Morsel { schema, columns }
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Vector::len)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, i: usize) -> &Vector {
        &self.columns[i]
    }

    pub fn columns(&self) -> &[Vector] {
        &self.columns
    }

    /// Zero-copy import from an Arrow record batch.
    pub fn from_record_batch(batch: &RecordBatch) -> Morsel {
        let columns = batch
            .columns()
            .iter()
            .map(|c| Vector::from_arrow(c.clone()))
            .collect();
        Morsel {
            schema: batch.schema(),
            columns,
        }
    }

    /// Zero-copy export to an Arrow record batch.
    pub fn to_record_batch(&self) -> EngineResult<RecordBatch> {
        let columns = self.columns.iter().map(Vector::to_arrow).collect();
        Ok(RecordBatch::try_new(self.schema.clone(), columns)?)
    }

    /// Keep rows where `mask` is true, across every column.
    pub fn filter(&self, mask: &BooleanArray) -> EngineResult<Morsel> {
        let columns = self
            .columns
            .iter()
            .map(|c| kernels::filter(c, mask))
            .collect::<EngineResult<Vec<_>>>()?;
        Morsel::try_new(self.schema.clone(), columns)
    }

    /// Gather rows by index, across every column.
    pub fn take(&self, indices: &Int32Array) -> EngineResult<Morsel> {
        let columns = self
            .columns
            .iter()
            .map(|c| kernels::take(c, indices))
            .collect::<EngineResult<Vec<_>>>()?;
        Morsel::try_new(self.schema.clone(), columns)
    }

    /// Project a subset of columns by position.
    pub fn select(&self, indices: &[usize]) -> EngineResult<Morsel> {
        let mut fields = Vec::with_capacity(indices.len());
        let mut columns = Vec::with_capacity(indices.len());
        for &i in indices {
            if i >= self.columns.len() {
                return Err(EngineError::InvalidInput(format!(
                    "column index {i} out of bounds for {} columns",
                    self.columns.len()
                )));
            }
            fields.push(self.schema.field(i).clone());
            columns.push(self.columns[i].clone());
        }
        Morsel::try_new(Arc::new(Schema::new(fields)), columns)
    }

    /// Zero-copy slice of `length` rows starting at `offset`.
    pub fn slice(&self, offset: usize, length: usize) -> Morsel {
        let columns = self
            .columns
            .iter()
            .map(|c| c.slice(offset, length))
            .collect();
        Morsel {
            schema: self.schema.clone(),
            columns,
        }
    }

    /// Total heap bytes retained by this morsel's buffers.
    pub fn memory_size(&self) -> usize {
        self.columns.iter().map(Vector::memory_size).sum()
    }
}

/// Concatenate morsels sharing a schema into one.
pub fn concat_morsels(schema: &SchemaRef, morsels: &[Morsel]) -> EngineResult<Morsel> {
    if morsels.is_empty() {
        return Ok(Morsel::empty(schema.clone()));
    }
    let mut columns = Vec::with_capacity(schema.fields().len());
    for i in 0..schema.fields().len() {
        let arrays: Vec<_> = morsels.iter().map(|m| m.column(i).to_arrow()).collect();
        let refs: Vec<&dyn arrow::array::Array> = arrays.iter().map(AsRef::as_ref).collect();
        columns.push(Vector::new(compute::concat(&refs)?));
    }
    Morsel::try_new(schema.clone(), columns)
}

/// Positional schema compatibility for set operations: same column count
/// and the same type at every position.
pub fn schemas_compatible(a: &SchemaRef, b: &SchemaRef) -> bool {
    a.fields().len() == b.fields().len()
        && a.fields()
            .iter()
            .zip(b.fields().iter())
            .all(|(fa, fb)| fa.data_type() == fb.data_type())
}

/// Build a schema from `(name, type, nullable)` triples.
pub fn schema_from_fields(fields: Vec<(String, arrow::datatypes::DataType, bool)>) -> SchemaRef {
    Arc::new(Schema::new(
        fields
            .into_iter()
            .map(|(name, data_type, nullable)| Field::new(name, data_type, nullable))
            .collect::<Vec<_>>(),
    ))
}
