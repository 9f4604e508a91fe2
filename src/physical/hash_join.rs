//! Hash join (inner, left outer, full outer, left semi, left anti).
//!
//! Build phase: the left input is consumed entirely, composite join
//! keys are hashed with the order-sensitive mix, and `{key hash -> row
//! index list}` goes into a [`FlatHashMap`]; a bloom filter over the
//! build keys is populated while the build side stays under the
//! configured key limit.
//!
//! Probe phase: the right input streams one morsel at a time. Each
//! probe row checks the bloom filter, looks the hash up in the map, and
//! verifies candidate matches on raw key values — equal hashes are
//! never trusted for correctness. Matches emit the Cartesian product of
//! build rows with the probe row.
//!
//! A `seen` bitmap tracks matched build rows: after probe end-of-stream
//! it drives the null-filled tail of LEFT OUTER / FULL OUTER and the
//! emit-once semantics of LEFT SEMI / LEFT ANTI.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{new_null_array, Array, Int32Array};
use arrow::datatypes::SchemaRef;

use crate::context::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::expression::{evaluate, evaluate_mask, Expression};
use crate::hashing::{BloomFilter, FlatHashMap};
use crate::morsel::{concat_morsels, Morsel};
use crate::plan::JoinKind;
use crate::vector::{hashing, kernels, Vector};

use super::{OperatorCore, PhysicalOperator};

struct BuildState {
    /// The whole build input, concatenated.
    rows: Morsel,
    /// Evaluated key columns over the build input.
    keys: Vec<Vector>,
    map: FlatHashMap,
    bloom: Option<BloomFilter>,
    /// Which build rows found at least one surviving match.
    seen: Vec<bool>,
    reserved_bytes: usize,
}

pub struct HashJoinOperator {
    core: OperatorCore,
    left: Box<dyn PhysicalOperator>,
    right: Box<dyn PhysicalOperator>,
    kind: JoinKind,
    on: Vec<(Expression, Expression)>,
    residual: Option<Expression>,
    build: Option<BuildState>,
    built: bool,
    probe_done: bool,
    tail_emitted: bool,
    pending: VecDeque<Morsel>,
}

impl HashJoinOperator {
    pub fn new(
        left: Box<dyn PhysicalOperator>,
        right: Box<dyn PhysicalOperator>,
        kind: JoinKind,
        on: Vec<(Expression, Expression)>,
        residual: Option<Expression>,
        schema: SchemaRef,
        estimated_rows: Option<usize>,
        context: Arc<QueryContext>,
    ) -> EngineResult<HashJoinOperator> {
        match kind {
            JoinKind::Inner
            | JoinKind::LeftOuter
            | JoinKind::FullOuter
            | JoinKind::LeftSemi
            | JoinKind::LeftAnti => {}
            other => {
                return Err(EngineError::Internal(format!(
                    "hash join cannot execute a {} join",
                    other.label()
                )))
            }
        }
        if on.is_empty() {
            return Err(EngineError::Internal(
                "hash join requires at least one equi key".into(),
            ));
        }
        Ok(HashJoinOperator {
            core: OperatorCore::new("HashJoin", schema, estimated_rows, context),
            left,
            right,
            kind,
            on,
            residual,
            build: None,
            built: false,
            probe_done: false,
            tail_emitted: false,
            pending: VecDeque::new(),
        })
    }

    /// Consume the whole build (left) input and construct the map.
    fn build(&mut self) -> EngineResult<()> {
        let mut morsels = Vec::new();
        while let Some(morsel) = self.left.next()? {
            morsels.push(morsel);
        }
        let schema = self.left.schema();
        let rows = concat_morsels(&schema, &morsels)?;
        drop(morsels);

        let keys = self
            .on
            .iter()
            .map(|(l, _)| evaluate(l, &rows))
            .collect::<EngineResult<Vec<_>>>()?;
        let hashes = hashing::hash_rows(&keys)?;

        // The final cardinality is known: reserve before inserting.
        let mut map = FlatHashMap::with_capacity(rows.num_rows());
        let bloom_limit = self
            .core
            .context
            .config
            .execution
            .joins
            .bloom_filter_key_limit;
        let mut bloom =
            (rows.num_rows() <= bloom_limit).then(|| BloomFilter::new(rows.num_rows().max(1)));
        for (row, &hash) in hashes.iter().enumerate() {
            map.insert(hash, row as i64);
            if let Some(bloom) = &mut bloom {
                bloom.insert(hash);
            }
        }

        let reserved_bytes = rows.memory_size()
            + map.memory_size()
            + bloom.as_ref().map_or(0, BloomFilter::memory_size);
        self.core.context.memory.grow(reserved_bytes)?;
        tracing::debug!(
            build_rows = rows.num_rows(),
            distinct_keys = map.len(),
            bloom = bloom.is_some(),
            "hash join build complete"
        );

        let seen = vec![false; rows.num_rows()];
        self.build = Some(BuildState {
            rows,
            keys,
            map,
            bloom,
            seen,
            reserved_bytes,
        });
        self.built = true;
        Ok(())
    }

    /// Probe one morsel; pushes any produced output onto `pending`.
    fn probe(&mut self, probe: &Morsel) -> EngineResult<()> {
        let probe_keys = self
            .on
            .iter()
            .map(|(_, r)| evaluate(r, probe))
            .collect::<EngineResult<Vec<_>>>()?;
        let hashes = hashing::hash_rows(&probe_keys)?;
        let build = self
            .build
            .as_mut()
            .ok_or_else(|| EngineError::Internal("probe before build".into()))?;

        let mut build_idx: Vec<i32> = Vec::new();
        let mut probe_idx: Vec<i32> = Vec::new();
        let mut probe_matched = vec![false; probe.num_rows()];

        for (row, &hash) in hashes.iter().enumerate() {
            if let Some(bloom) = &build.bloom {
                if !bloom.might_contain(hash) {
                    continue;
                }
            }
            for &candidate in build.map.get(hash) {
                let matches = kernels::rows_equal(
                    &build.keys,
                    candidate as usize,
                    &probe_keys,
                    row,
                    kernels::NullEquality::NullsNotEqual,
                )?;
                if matches {
                    build_idx.push(candidate as i32);
                    probe_idx.push(row as i32);
                }
            }
        }

        if !build_idx.is_empty() {
            let build_part = build.rows.take(&Int32Array::from(build_idx.clone()))?;
            let probe_part = probe.take(&Int32Array::from(probe_idx.clone()))?;

            if self.kind.left_only() {
                // Semi/anti only need the seen bitmap.
                for &b in &build_idx {
                    build.seen[b as usize] = true;
                }
            } else {
                let mut columns = build_part.columns().to_vec();
                columns.extend(probe_part.columns().iter().cloned());
                let combined = Morsel::try_new(self.core.schema.clone(), columns)?;

                let (combined, surviving_build, surviving_probe) = match &self.residual {
                    None => (combined, build_idx, probe_idx),
                    Some(residual) => {
                        let mask = kernels::normalize_mask(&evaluate_mask(residual, &combined)?);
                        let filtered = combined.filter(&mask)?;
                        let mut sb = Vec::new();
                        let mut sp = Vec::new();
                        for i in 0..mask.len() {
                            if mask.value(i) {
                                sb.push(build_idx[i]);
                                sp.push(probe_idx[i]);
                            }
                        }
                        (filtered, sb, sp)
                    }
                };
                for &b in &surviving_build {
                    build.seen[b as usize] = true;
                }
                for &p in &surviving_probe {
                    probe_matched[p as usize] = true;
                }
                if combined.num_rows() > 0 {
                    self.pending.push_back(combined);
                }
            }
        }

        // FULL OUTER: probe rows without a surviving match emit with a
        // null-filled build side right away.
        if self.kind == JoinKind::FullOuter {
            let unmatched: Vec<i32> = probe_matched
                .iter()
                .enumerate()
                .filter(|(_, m)| !**m)
                .map(|(i, _)| i as i32)
                .collect();
            if !unmatched.is_empty() {
                let probe_part = probe.take(&Int32Array::from(unmatched))?;
                let mut columns: Vec<Vector> = build
                    .rows
                    .schema()
                    .fields()
                    .iter()
                    .map(|f| Vector::new(new_null_array(f.data_type(), probe_part.num_rows())))
                    .collect();
                columns.extend(probe_part.columns().iter().cloned());
                self.pending
                    .push_back(Morsel::try_new(self.core.schema.clone(), columns)?);
            }
        }
        Ok(())
    }

    /// After probe end-of-stream: the seen bitmap drives the tail.
    fn emit_tail(&mut self) -> EngineResult<()> {
        let build = self
            .build
            .as_ref()
            .ok_or_else(|| EngineError::Internal("tail before build".into()))?;
        let selected: Vec<i32> = match self.kind {
            JoinKind::LeftOuter | JoinKind::FullOuter => build
                .seen
                .iter()
                .enumerate()
                .filter(|(_, seen)| !**seen)
                .map(|(i, _)| i as i32)
                .collect(),
            JoinKind::LeftSemi => build
                .seen
                .iter()
                .enumerate()
                .filter(|(_, seen)| **seen)
                .map(|(i, _)| i as i32)
                .collect(),
            JoinKind::LeftAnti => build
                .seen
                .iter()
                .enumerate()
                .filter(|(_, seen)| !**seen)
                .map(|(i, _)| i as i32)
                .collect(),
            _ => Vec::new(),
        };
        if selected.is_empty() {
            return Ok(());
        }

        let batch_rows = self.core.context.config.execution.morsel_rows.max(1);
        for chunk in selected.chunks(batch_rows) {
            let part = build.rows.take(&Int32Array::from(chunk.to_vec()))?;
            let morsel = if self.kind.left_only() {
                part
            } else {
                // Null-filled probe-side columns.
                let mut columns = part.columns().to_vec();
                for field in self.right.schema().fields() {
                    columns.push(Vector::new(new_null_array(
                        field.data_type(),
                        part.num_rows(),
                    )));
                }
                Morsel::try_new(self.core.schema.clone(), columns)?
            };
            self.pending.push_back(morsel);
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Some(build) = self.build.take() {
            self.core.context.memory.shrink(build.reserved_bytes);
        }
        self.pending.clear();
    }
}

impl PhysicalOperator for HashJoinOperator {
    fn name(&self) -> &'static str {
        "HashJoin"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        let keys: Vec<String> = self.on.iter().map(|(l, r)| format!("{l} = {r}")).collect();
        let bloom =
            self.build
                .as_ref()
                .map_or("pending", |b| if b.bloom.is_some() { "on" } else { "off" });
        let mut s = format!(
            "HashJoin[{}] on={} build=left bloom={bloom}",
            self.kind.label(),
            keys.join(" AND ")
        );
        if let Some(residual) = &self.residual {
            s.push_str(&format!(" filter={residual}"));
        }
        s
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn open(&mut self) -> EngineResult<()> {
        self.core.open()?;
        self.left.open()?;
        self.right.open()
    }

    fn next(&mut self) -> EngineResult<Option<Morsel>> {
        let started = self.core.begin_next()?;
        let result = (|| {
            if !self.built {
                self.build()?;
            }
            loop {
                if let Some(morsel) = self.pending.pop_front() {
                    if morsel.num_rows() > 0 {
                        return Ok(Some(morsel));
                    }
                    continue;
                }
                if self.probe_done {
                    if self.tail_emitted {
                        self.release();
                        return Ok(None);
                    }
                    self.emit_tail()?;
                    self.tail_emitted = true;
                    continue;
                }
                match self.right.next()? {
                    None => self.probe_done = true,
                    Some(probe) => self.probe(&probe)?,
                }
            }
        })();
        self.core.end_next(started, result)
    }

    fn close(&mut self) -> EngineResult<()> {
        self.release();
        self.left.close()?;
        self.right.close()?;
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
