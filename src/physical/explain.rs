//! EXPLAIN rendering.
//!
//! Produces the textual operator tree — each physical operator with its
//! estimated cost — followed by the optimizer rule-application
//! counters. EXPLAIN ANALYZE additionally reports measured rows and
//! time per operator after the query ran to completion.

use std::sync::Arc;
use std::time::Duration;

use arrow::array::StringArray;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::context::QueryContext;
use crate::error::EngineResult;
use crate::morsel::Morsel;
use crate::statistics::QueryStatistics;
use crate::vector::Vector;

use super::{OperatorCore, PhysicalOperator};

/// Render the operator tree plus the rule counters.
pub fn render(root: &dyn PhysicalOperator, stats: &QueryStatistics, analyze: bool) -> Vec<String> {
    let mut lines = Vec::new();
    render_node(root, 0, analyze, &mut lines);
    if !stats.rule_counters.is_empty() {
        lines.push(String::new());
        for (name, count) in &stats.rule_counters {
            lines.push(format!("{name}: {count}"));
        }
    }
    if analyze {
        lines.push(String::new());
        lines.push(format!("rows scanned: {}", stats.rows_scanned));
        lines.push(format!("rows produced: {}", stats.rows_produced));
    }
    lines
}

fn render_node(
    operator: &dyn PhysicalOperator,
    indent: usize,
    analyze: bool,
    lines: &mut Vec<String>,
) {
    let prefix = "  ".repeat(indent);
    let cost = operator
        .estimated_rows()
        .map_or_else(|| "?".to_string(), |rows| rows.to_string());
    let mut line = format!("{prefix}{} (est_rows={cost})", operator.describe());
    if analyze {
        let (rows, elapsed) = operator.metrics();
        line.push_str(&format!(" rows={rows} time={elapsed:?}"));
    }
    lines.push(line);
    for child in operator.children() {
        render_node(child, indent + 1, analyze, lines);
    }
}

/// The schema of an EXPLAIN result: one utf8 `plan` column, one row per
/// text line.
pub fn explain_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("plan", DataType::Utf8, false)]))
}

/// A one-shot operator serving pre-rendered EXPLAIN text to the cursor.
pub struct ExplainResultOperator {
    core: OperatorCore,
    morsel: Option<Morsel>,
}

impl ExplainResultOperator {
    pub fn new(lines: Vec<String>, context: Arc<QueryContext>) -> EngineResult<Self> {
        let schema = explain_schema();
        let array = StringArray::from(lines);
        let morsel = Morsel::try_new(schema.clone(), vec![Vector::new(Arc::new(array))])?;
        Ok(ExplainResultOperator {
            core: OperatorCore::new("Explain", schema, None, context),
            morsel: Some(morsel),
        })
    }
}

impl PhysicalOperator for ExplainResultOperator {
    fn name(&self) -> &'static str {
        "Explain"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        "Explain".to_string()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![]
    }

    fn open(&mut self) -> EngineResult<()> {
        self.core.open()
    }

    fn next(&mut self) -> EngineResult<Option<Morsel>> {
        let started = self.core.begin_next()?;
        let result = Ok(self.morsel.take());
        self.core.end_next(started, result)
    }

    fn close(&mut self) -> EngineResult<()> {
        self.morsel = None;
        self.core.close();
        Ok(())
    }

    fn metrics(&self) -> (u64, Duration) {
        (self.core.rows_out, self.core.elapsed)
    }
}
