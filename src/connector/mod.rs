//! Data source connectors.
//!
//! Any source is an object implementing [`Connector`]: it lists scan
//! units (files, partitions, in-memory tables), probes schemas, and
//! reads morsels with optional projection/filter/limit pushdown. The
//! engine asks `supports()` before delegating work; anything a connector
//! does not take stays in the scan operator.

pub mod jsonl;
pub mod memory;
pub mod parquet;

pub use jsonl::JsonlConnector;
pub use memory::MemoryConnector;
pub use parquet::ParquetConnector;

use std::path::PathBuf;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use chrono::NaiveDate;

use crate::error::{EngineError, EngineResult};
use crate::expression::Expression;
use crate::morsel::Morsel;
use crate::temporal::TemporalRange;

/// Pushdown capabilities a connector may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ProjectionPushdown,
    FilterPushdown,
    LimitPushdown,
    /// Data is organized under date-labeled units; a `FOR` clause can
    /// prune whole units, and `FOR TODAY` is implied when absent.
    TemporalPartitioning,
}

/// One independently readable unit of a relation (a file, a partition,
/// an in-memory table).
#[derive(Debug, Clone)]
pub struct Unit {
    pub relation: String,
    /// Position within the relation; readers reassemble in this order.
    pub index: usize,
    pub path: Option<PathBuf>,
    /// Row count hint when cheaply known.
    pub rows: Option<usize>,
    /// Partition date for temporally partitioned layouts.
    pub date: Option<NaiveDate>,
}

/// Options handed to `read`. Only fields matching advertised
/// capabilities are honored; the scan operator compensates for the rest.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Base-schema column positions to materialize.
    pub projection: Option<Vec<usize>>,
    /// Predicates bound to the relation's base schema.
    pub filters: Vec<Expression>,
    pub limit: Option<usize>,
    /// Temporal range bound to the enclosing scan.
    pub temporal: Option<TemporalRange>,
    /// Target rows per produced morsel.
    pub batch_rows: usize,
}

/// Stream of morsels from one unit.
pub type MorselStream = Box<dyn Iterator<Item = EngineResult<Morsel>> + Send>;

/// A data source.
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, capability: Capability) -> bool;

    /// Whether this connector can serve `relation`.
    fn has_relation(&self, relation: &str) -> bool;

    /// The units making up `relation`, optionally pruned to a temporal
    /// range.
    fn list_units(
        &self,
        relation: &str,
        temporal: Option<&TemporalRange>,
    ) -> EngineResult<Vec<Unit>>;

    /// The full (base) schema of `relation`.
    fn probe_schema(&self, relation: &str) -> EngineResult<SchemaRef>;

    /// Read one unit.
    fn read(&self, unit: &Unit, options: &ReadOptions) -> EngineResult<MorselStream>;
}

/// Ordered registry of connectors; the first one claiming a relation
/// serves it.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: Vec<Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.push(connector);
    }

    /// Find the connector serving `relation`.
    pub fn resolve(&self, relation: &str) -> EngineResult<Arc<dyn Connector>> {
        self.connectors
            .iter()
            .find(|c| c.has_relation(relation))
            .cloned()
            .ok_or_else(|| {
                EngineError::UnresolvedName(format!("no connector serves table '{relation}'"))
            })
    }

    /// Look a connector up by its registered name.
    pub fn by_name(&self, name: &str) -> EngineResult<Arc<dyn Connector>> {
        self.connectors
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| EngineError::Internal(format!("connector '{name}' disappeared")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolution_order() {
        let mut registry = ConnectorRegistry::new();
        let a = Arc::new(MemoryConnector::new("a"));
        let b = Arc::new(MemoryConnector::new("b"));
        a.register_table(
            "shared",
            crate::demo::planets().to_record_batch().expect("batch"),
        )
        .expect("register");
        b.register_table(
            "shared",
            crate::demo::planets().to_record_batch().expect("batch"),
        )
        .expect("register");
        registry.register(a);
        registry.register(b);

        let resolved = registry.resolve("shared").expect("resolve");
        assert_eq!(resolved.name(), "a");
        assert!(registry.resolve("absent").is_err());
    }
}
