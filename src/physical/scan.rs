//! Scan operator: morsels out of a connector.
//!
//! Pushes the column mask, connector-interpretable predicates and the
//! limit into the connector when it advertises the matching capability,
//! and compensates for everything it does not: operator-side filtering
//! reads the union of projected and filtered columns, applies the
//! predicates, then trims to the projected set.
//!
//! With a worker pool available, independent units are read in parallel
//! and reassembled in unit order; operators above the scan see one
//! logical stream, and row order within a unit is preserved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;

use crate::connector::{Capability, Connector, MorselStream, ReadOptions, Unit};
use crate::context::QueryContext;
use crate::error::EngineResult;
use crate::expression::{Expression, PredicateEvaluator};
use crate::morsel::Morsel;
use crate::plan::ScanCapabilities;
use crate::temporal::TemporalRange;

use super::{OperatorCore, PhysicalOperator};

pub struct ScanOperator {
    core: OperatorCore,
    relation: String,
    connector: Arc<dyn Connector>,
    units: Vec<Unit>,
    /// Options handed to the connector for every unit.
    options: ReadOptions,
    /// Base columns present in connector output, in order.
    returned_columns: Vec<usize>,
    /// Predicates the connector does not evaluate, remapped to the
    /// returned column positions.
    residual_filters: Vec<PredicateEvaluator>,
    /// Positions within the returned columns forming the final output.
    output_selection: Option<Vec<usize>>,
    remaining_limit: Option<usize>,
    /// Display-only attributes.
    filter_display: Vec<String>,
    temporal: Option<TemporalRange>,
    // Runtime state.
    unit_cursor: usize,
    current: Option<MorselStream>,
    prefetched: Option<std::vec::IntoIter<Morsel>>,
    prefetched_bytes: usize,
}

impl ScanOperator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        relation: String,
        connector: Arc<dyn Connector>,
        units: Vec<Unit>,
        base_columns: usize,
        projection: Option<Vec<usize>>,
        filters: Vec<Expression>,
        limit: Option<usize>,
        temporal: Option<TemporalRange>,
        capabilities: ScanCapabilities,
        schema: arrow::datatypes::SchemaRef,
        estimated_rows: Option<usize>,
        context: Arc<QueryContext>,
    ) -> EngineResult<ScanOperator> {
        let filter_display: Vec<String> = filters.iter().map(ToString::to_string).collect();
        let connector_filters = connector.supports(Capability::FilterPushdown);
        let connector_projection = connector.supports(Capability::ProjectionPushdown);
        let connector_limit = connector.supports(Capability::LimitPushdown);
        debug_assert_eq!(connector_filters, capabilities.filters);

        // Columns the connector must materialize: the projection plus
        // whatever residual predicates read.
        let projected: Vec<usize> = projection
            .clone()
            .unwrap_or_else(|| (0..base_columns).collect());
        let mut read_set = projected.clone();
        if !connector_filters {
            for filter in &filters {
                for column in filter.referenced_columns() {
                    if !read_set.contains(&column) {
                        read_set.push(column);
                    }
                }
            }
            read_set.sort_unstable();
        }

        let returned_columns: Vec<usize> = if connector_projection {
            read_set.clone()
        } else {
            (0..base_columns).collect()
        };
        let position_of: HashMap<usize, usize> = returned_columns
            .iter()
            .enumerate()
            .map(|(position, &base)| (base, position))
            .collect();

        let residual_filters = if connector_filters {
            Vec::new()
        } else {
            filters
                .iter()
                .map(|f| PredicateEvaluator::new(f.clone().remap_columns(&position_of)))
                .collect()
        };

        // The connector only sees the limit when it would not cut rows
        // ahead of a predicate it does not evaluate.
        let connector_sees_limit = connector_limit && (filters.is_empty() || connector_filters);

        let output_selection = if returned_columns == projected {
            None
        } else {
            Some(
                projected
                    .iter()
                    .map(|base| position_of[base])
                    .collect::<Vec<usize>>(),
            )
        };

        let options = ReadOptions {
            projection: connector_projection.then(|| read_set.clone()),
            filters: if connector_filters {
                filters
            } else {
                Vec::new()
            },
            limit: if connector_sees_limit { limit } else { None },
            temporal,
            batch_rows: context.config.execution.morsel_rows,
        };

        Ok(ScanOperator {
            core: OperatorCore::new("Scan", schema, estimated_rows, context),
            relation,
            connector,
            units,
            options,
            returned_columns,
            residual_filters,
            output_selection,
            remaining_limit: limit,
            filter_display,
            temporal,
            unit_cursor: 0,
            current: None,
            prefetched: None,
            prefetched_bytes: 0,
        })
    }

    fn next_raw(&mut self) -> EngineResult<Option<Morsel>> {
        if let Some(prefetched) = &mut self.prefetched {
            return Ok(prefetched.next());
        }
        loop {
            if let Some(stream) = &mut self.current {
                match stream.next() {
                    Some(morsel) => return Ok(Some(morsel?)),
                    None => self.current = None,
                }
            }
            if self.unit_cursor >= self.units.len() {
                return Ok(None);
            }
            let unit = &self.units[self.unit_cursor];
            self.unit_cursor += 1;
            self.current = Some(self.connector.read(unit, &self.options)?);
        }
    }

    /// Apply residual predicates, trim to the projection, cap the limit.
    fn post_process(&mut self, mut morsel: Morsel) -> EngineResult<Option<Morsel>> {
        for evaluator in &self.residual_filters {
            let mask = evaluator.evaluate(&morsel)?;
            morsel = morsel.filter(&mask)?;
        }
        if let Some(selection) = &self.output_selection {
            morsel = morsel.select(selection)?;
        }
        if let Some(remaining) = &mut self.remaining_limit {
            if *remaining == 0 {
                return Ok(None);
            }
            if morsel.num_rows() > *remaining {
                morsel = morsel.slice(0, *remaining);
            }
            *remaining -= morsel.num_rows();
        }
        Ok(Some(morsel))
    }
}

impl PhysicalOperator for ScanOperator {
    fn name(&self) -> &'static str {
        "Scan"
    }

    fn schema(&self) -> arrow::datatypes::SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        let mut s = format!("Scan({})", self.relation);
        if self.output_selection.is_some() || self.options.projection.is_some() {
            let names: Vec<&str> = self
                .core
                .schema
                .fields()
                .iter()
                .map(|f| f.name().as_str())
                .collect();
            s.push_str(&format!(" columns={names:?}"));
        }
        if !self.filter_display.is_empty() {
            s.push_str(&format!(" filter=({})", self.filter_display.join(" AND ")));
        }
        if let Some(limit) = self.remaining_limit {
            s.push_str(&format!(" limit={limit}"));
        }
        if let Some(t) = self.temporal {
            s.push_str(&format!(" for={}..{}", t.start, t.end));
        }
        s
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![]
    }

    fn open(&mut self) -> EngineResult<()> {
        self.core.open()?;
        tracing::debug!(
            relation = %self.relation,
            units = self.units.len(),
            "opening scan"
        );
        // Parallel unit reads, reassembled in unit order.
        let parallel = self.core.context.config.execution.parallel_scan;
        if parallel && self.units.len() > 1 {
            let connector = self.connector.clone();
            let options = self.options.clone();
            let batches: Vec<EngineResult<Vec<Morsel>>> = self
                .units
                .par_iter()
                .map(|unit| connector.read(unit, &options)?.collect())
                .collect();
            let mut ordered = Vec::new();
            let mut bytes = 0usize;
            for batch in batches {
                for morsel in batch? {
                    bytes += morsel.memory_size();
                    ordered.push(morsel);
                }
            }
            self.core.context.memory.grow(bytes)?;
            self.prefetched_bytes = bytes;
            self.prefetched = Some(ordered.into_iter());
        }
        Ok(())
    }

    fn next(&mut self) -> EngineResult<Option<Morsel>> {
        let started = self.core.begin_next()?;
        let result = loop {
            match self.next_raw() {
                Err(e) => break Err(e),
                Ok(None) => break Ok(None),
                Ok(Some(raw)) => {
                    self.core
                        .context
                        .stats
                        .add_rows_scanned(raw.num_rows() as u64);
                    match self.post_process(raw) {
                        Err(e) => break Err(e),
                        Ok(None) => break Ok(None),
                        // Fully filtered morsels are skipped, not emitted.
                        Ok(Some(m)) if m.num_rows() == 0 => {}
                        Ok(Some(m)) => break Ok(Some(m)),
                    }
                }
            }
        };
        self.core.end_next(started, result)
    }

    fn close(&mut self) -> EngineResult<()> {
        self.current = None;
        self.prefetched = None;
        if self.prefetched_bytes > 0 {
            self.core.context.memory.shrink(self.prefetched_bytes);
            self.prefetched_bytes = 0;
        }
        self.core.close();
        Ok(())
    }

    fn metrics(&self) -> (u64, Duration) {
        (self.core.rows_out, self.core.elapsed)
    }

    fn estimated_rows(&self) -> Option<usize> {
        self.core.estimated_rows
    }
}
