//! Staged, cost-greedy compression
//!
//! Compression proceeds in rounds. A round only consumes bits that existed
//! when it started; the bits it produces wait for the next round, so every
//! round is one level of the reduction tree. Inside a round the best
//! candidate (compressor, anchor column) is applied repeatedly until none is
//! left:
//!
//! - **reduction**: input bits minus output bits that land inside the heap
//! - **score**: `reduction / area`, with the area inflated by
//!   `1 + register_penalty` when the compressor would open a new cycle
//! - **ties**: constant entries, then specialized, then generic; then the
//!   taller anchor column; then the lower weight
//!
//! When every column holds at most two bits, the columns are read out as a
//! sum row and a carry row, both aligned to the same cycle.

use super::{BitHeap, HeapBit};
use crate::compressor::{Catalog, ColumnShape, Compressor, CompressorKind};
use crate::config::CompressionConfig;
use crate::error::{GenError, Result};
use crate::expr::{BitSource, Expr};
use crate::operator::Operator;
use crate::schedule::Timing;
use crate::signal::{sign_extend, width_mask, BitRef, SignalId};
use crate::simulate::SignalValues;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Tolerance when comparing candidate scores
const SCORE_EPSILON: f64 = 1e-9;

/// Area floor so that free entries still get a finite score
const MIN_AREA: f64 = 1e-3;

/// One application of a compressor at one anchor column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionStage {
    /// Position in application order
    pub index: usize,
    /// Reduction round (tree level), starting at 1
    pub round: u32,
    pub compressor: String,
    pub kind: CompressorKind,
    /// Weight of the anchor column
    pub weight: i32,
    /// Parallel instances placed at this anchor
    pub instances: usize,
    /// One output signal per instance
    pub outputs: Vec<SignalId>,
    /// Latest cycle among the outputs
    pub cycle: u32,
    /// A register boundary was inserted for at least one instance
    pub registered: bool,
}

/// Compression statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompressionStats {
    /// Bits in the heap after constant injection
    pub input_bits: usize,
    /// Constant-one bits injected
    pub constant_bits: usize,
    /// Tallest column before compression
    pub initial_height: usize,
    pub rounds: u32,
    pub stages: usize,
    /// Compressor instances, by compressor name
    pub compressors_used: IndexMap<String, usize>,
    /// Total compressor area in LUT equivalents
    pub area: f64,
    /// Register boundaries inserted while compressing
    pub registers_inserted: usize,
    /// Latest input cycle
    pub start_cycle: u32,
    /// Cycle of the two result rows
    pub end_cycle: u32,
}

impl CompressionStats {
    pub fn record(&mut self, stage: &CompressionStage, area: f64) {
        self.stages += 1;
        self.area += area * stage.instances as f64;
        *self
            .compressors_used
            .entry(stage.compressor.clone())
            .or_insert(0) += stage.instances;
    }

    /// Total compressor instances
    pub fn instances(&self) -> usize {
        self.compressors_used.values().sum()
    }

    /// Pipeline depth added by the compression
    pub fn added_cycles(&self) -> u32 {
        self.end_cycle.saturating_sub(self.start_cycle)
    }

    /// Get summary string
    pub fn summary(&self) -> String {
        format!(
            "{} bits, height {} -> 2 in {} rounds, {} stages, {} compressors ({:.1} LUTs), \
             {} register boundaries, cycles {}..{}",
            self.input_bits,
            self.initial_height,
            self.rounds,
            self.stages,
            self.instances(),
            self.area,
            self.registers_inserted,
            self.start_cycle,
            self.end_cycle
        )
    }
}

/// Two-row result of a compressed heap
#[derive(Debug, Clone)]
pub struct CompressionResult {
    /// First row (one bit per column)
    pub sum: SignalId,
    /// Second row (zero where a column held a single bit)
    pub carry: SignalId,
    /// Row width (heap columns)
    pub width: u32,
    /// Weight of bit 0 of both rows
    pub lsb: i32,
    pub signed: bool,
    pub stages: Vec<CompressionStage>,
    pub stats: CompressionStats,
}

impl CompressionResult {
    /// `sum + carry` modulo `2^width`, relative to `lsb`
    pub fn value(&self, values: &SignalValues) -> u128 {
        values.get(self.sum).wrapping_add(values.get(self.carry)) & width_mask(self.width)
    }

    /// [`value`](Self::value) interpreted per the heap's signedness
    pub fn signed_value(&self, values: &SignalValues) -> i128 {
        let value = self.value(values);
        if self.signed {
            sign_extend(value, self.width)
        } else {
            value as i128
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    entry: usize,
    column: usize,
    instances: usize,
    score: f64,
    rank: u8,
    height: usize,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        if self.score > other.score + SCORE_EPSILON {
            return true;
        }
        if self.score < other.score - SCORE_EPSILON {
            return false;
        }
        (self.rank, std::cmp::Reverse(self.height), self.column)
            < (other.rank, std::cmp::Reverse(other.height), other.column)
    }
}

impl BitHeap {
    /// Reduce the heap to two rows
    pub fn compress(&mut self, op: &mut Operator, catalog: &Catalog) -> Result<CompressionResult> {
        self.check_access(op)?;
        let config = op.config().compression.clone();
        let registers_before = op.stats().registered;
        let eligible = self.eligible_entries(op, catalog);

        let constant_bits = self.inject_constant();
        let mut stats = CompressionStats {
            input_bits: self.bit_count(),
            constant_bits,
            initial_height: self.max_height(),
            start_cycle: self.latest_cycle(),
            ..Default::default()
        };
        debug!(
            "[{}] compressing bit heap '{}': {} bits ({} constant), heights {:?}",
            op.name(),
            self.name,
            stats.input_bits,
            constant_bits,
            self.heights()
        );

        let mut stages = Vec::new();
        let mut round = 0;
        while self.max_height() > 2 {
            round += 1;
            if round > config.max_rounds {
                return Err(GenError::invariant(
                    op.name(),
                    format!(
                        "bit heap '{}' still has height {} after {} rounds",
                        self.name,
                        self.max_height(),
                        config.max_rounds
                    ),
                ));
            }
            let applied = self.compression_round(op, &eligible, &config, round, &mut stages, &mut stats)?;
            if applied == 0 {
                return Err(self.exhausted(op));
            }
            debug!(
                "[{}] bit heap '{}' round {}: {} stages, heights {:?}",
                op.name(),
                self.name,
                round,
                applied,
                self.heights()
            );
        }
        stats.rounds = round;

        let (sum, carry) = self.read_out(op)?;
        self.compressed = true;
        stats.registers_inserted = op.stats().registered - registers_before;
        stats.end_cycle = op.signal(sum)?.timing.cycle;
        info!(
            "[{}] bit heap '{}' compressed: {}",
            op.name(),
            self.name,
            stats.summary()
        );

        Ok(CompressionResult {
            sum,
            carry,
            width: self.width(),
            lsb: self.lsb,
            signed: self.signed,
            stages,
            stats,
        })
    }

    /// Catalog entries usable under the operator's clock period
    ///
    /// A non-generic entry slower than the period is skipped; a generic one
    /// is kept so that using it reports infeasible timing.
    fn eligible_entries<'c>(&self, op: &Operator, catalog: &'c Catalog) -> Vec<&'c Compressor> {
        let scheduler = op.scheduler();
        catalog
            .entries()
            .iter()
            .filter(|entry| {
                let too_slow = scheduler.is_pipelined() && entry.cost.delay > scheduler.period();
                if too_slow && entry.kind != CompressorKind::Generic {
                    warn!(
                        "[{}] skipping compressor '{}': {:.1}ps exceeds the {:.1}ps period",
                        op.name(),
                        entry.name,
                        entry.cost.delay,
                        scheduler.period()
                    );
                    return false;
                }
                true
            })
            .collect()
    }

    /// Turn the pending constant into constant-one bits
    fn inject_constant(&mut self) -> usize {
        let mut injected = 0;
        for (i, column) in self.columns.iter_mut().enumerate() {
            if (self.constant >> i) & 1 == 1 {
                column.push(HeapBit {
                    source: BitSource::One,
                    timing: Timing::START,
                    round: 0,
                });
                injected += 1;
            }
        }
        self.constant = 0;
        injected
    }

    fn compression_round(
        &mut self,
        op: &mut Operator,
        eligible: &[&Compressor],
        config: &CompressionConfig,
        round: u32,
        stages: &mut Vec<CompressionStage>,
        stats: &mut CompressionStats,
    ) -> Result<usize> {
        let mut applied = 0;
        while let Some(candidate) = self.best_candidate(op, eligible, config, round) {
            let entry = eligible[candidate.entry];
            let stage = self.apply(op, entry, &candidate, round, stages.len())?;
            debug!(
                "[{}] stage {}: {} x{} at weight {} -> cycle {}{}",
                op.name(),
                stage.index,
                stage.compressor,
                stage.instances,
                stage.weight,
                stage.cycle,
                if stage.registered { " [reg]" } else { "" }
            );
            stats.record(&stage, entry.cost.area);
            stages.push(stage);
            applied += 1;
        }
        Ok(applied)
    }

    fn best_candidate(
        &self,
        op: &Operator,
        eligible: &[&Compressor],
        config: &CompressionConfig,
        round: u32,
    ) -> Option<Candidate> {
        let width = self.columns.len();
        let shapes: Vec<_> = self
            .columns
            .iter()
            .map(|column| {
                let available = column.iter().filter(|b| b.round < round);
                let (mut height, mut constant_bits) = (0, 0);
                for bit in available {
                    height += 1;
                    if bit.source == BitSource::One {
                        constant_bits += 1;
                    }
                }
                ColumnShape {
                    height,
                    constant_bits,
                }
            })
            .collect();

        let mut best: Option<Candidate> = None;
        for column in 0..width {
            let height = self.columns[column].len();
            if height <= 2 {
                continue;
            }
            for (entry_index, entry) in eligible.iter().enumerate() {
                let instances = entry.instances_fitting(&shapes[column..]);
                if instances == 0 {
                    continue;
                }
                let reduction = entry.reduction(width - column);
                if reduction <= 0 {
                    continue;
                }

                let timings = self.first_instance_timings(entry, column, round);
                let mut cost = entry.cost.area.max(MIN_AREA);
                if op.scheduler().forces_register(&timings, entry.cost.delay) {
                    cost *= 1.0 + config.register_penalty;
                }
                let candidate = Candidate {
                    entry: entry_index,
                    column,
                    instances,
                    score: reduction as f64 / cost,
                    rank: entry.kind.rank(),
                    height,
                };
                if best.map_or(true, |b| candidate.beats(&b)) {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    fn first_instance_timings(&self, entry: &Compressor, column: usize, round: u32) -> Vec<Timing> {
        let mut timings = Vec::with_capacity(entry.input_bits());
        for (i, &needed) in entry.heights.iter().enumerate() {
            let bits = &self.columns[column + i];
            let constants = if i == 0 { entry.constant_inputs } else { 0 };
            timings.extend(pick(bits, round, needed, constants).into_iter().map(|k| bits[k].timing));
        }
        timings
    }

    fn apply(
        &mut self,
        op: &mut Operator,
        entry: &Compressor,
        candidate: &Candidate,
        round: u32,
        index: usize,
    ) -> Result<CompressionStage> {
        let anchor = candidate.column;
        let out_width = entry.outputs_in_range(self.columns.len() - anchor);
        let widths: Vec<u32> = entry.heights.iter().map(|h| *h as u32).collect();
        let prefix = format!("{}_{}", self.name, entry.name);

        let mut outputs = Vec::with_capacity(candidate.instances);
        let mut registered = false;
        let mut cycle = 0;
        for _ in 0..candidate.instances {
            let mut inputs = Vec::with_capacity(entry.span());
            for (i, &needed) in entry.heights.iter().enumerate() {
                let column = anchor + i;
                let constants = if i == 0 { entry.constant_inputs } else { 0 };
                let picked = pick(&self.columns[column], round, needed, constants);
                if picked.len() < needed {
                    return Err(GenError::invariant(
                        op.name(),
                        format!(
                            "compressor '{}' needs {} bits at weight {} of bit heap '{}', {} available",
                            entry.name,
                            needed,
                            self.lsb + column as i32,
                            self.name,
                            picked.len()
                        ),
                    ));
                }
                inputs.push(self.take(column, picked));
            }

            let registers = op.stats().registered;
            let id = op.declare_scheduled(
                &prefix,
                entry.apply(inputs),
                out_width,
                false,
                entry.cost.delay,
                entry.name.clone(),
                widths.clone(),
            )?;
            registered |= op.stats().registered > registers;

            let timing = op.signal(id)?.timing;
            cycle = cycle.max(timing.cycle);
            for j in 0..out_width {
                self.columns[anchor + j as usize].push(HeapBit {
                    source: BitSource::Bit(BitRef::new(id, j)),
                    timing,
                    round,
                });
            }
            outputs.push(id);
        }

        Ok(CompressionStage {
            index,
            round,
            compressor: entry.name.clone(),
            kind: entry.kind,
            weight: self.lsb + anchor as i32,
            instances: candidate.instances,
            outputs,
            cycle,
            registered,
        })
    }

    /// Remove the picked bits from a column, returning their sources
    fn take(&mut self, column: usize, mut picked: Vec<usize>) -> Vec<BitSource> {
        let sources = picked.iter().map(|&k| self.columns[column][k].source).collect();
        picked.sort_unstable_by(|a, b| b.cmp(a));
        for k in picked {
            self.columns[column].remove(k);
        }
        sources
    }

    /// Read the columns out as two rows aligned to one cycle
    fn read_out(&mut self, op: &mut Operator) -> Result<(SignalId, SignalId)> {
        let width = self.width();
        let mut rows = [Vec::with_capacity(width as usize), Vec::with_capacity(width as usize)];
        for column in &self.columns {
            for (r, row) in rows.iter_mut().enumerate() {
                row.push(column.get(r).map_or(BitSource::Zero, |b| b.source));
            }
        }
        let [low, high] = rows;

        let sum = op.declare_scheduled(
            &format!("{}_sum", self.name),
            Expr::Bits(low),
            width,
            self.signed,
            0.0,
            "concat".to_string(),
            vec![width],
        )?;
        let carry = op.declare_scheduled(
            &format!("{}_carry", self.name),
            Expr::Bits(high),
            width,
            self.signed,
            0.0,
            "concat".to_string(),
            vec![width],
        )?;
        let aligned = op.sync_all(&[sum, carry])?;
        Ok((aligned[0], aligned[1]))
    }

    fn latest_cycle(&self) -> u32 {
        self.columns
            .iter()
            .flatten()
            .map(|b| b.timing.cycle)
            .max()
            .unwrap_or(0)
    }

    fn exhausted(&self, op: &Operator) -> GenError {
        let height = self.max_height();
        let index = self.columns.iter().position(|c| c.len() == height).unwrap_or(0);
        let cycle = self.columns[index]
            .iter()
            .map(|b| b.timing.cycle)
            .max()
            .unwrap_or(0);
        GenError::CatalogExhausted {
            operator: op.name().to_string(),
            heap: self.name.clone(),
            weight: self.lsb + index as i32,
            height,
            cycle,
        }
    }
}

/// Indices of the bits a compressor takes from a column
///
/// Only bits available in `round` qualify, earliest first; `constants`
/// constant-one bits are taken before anything else.
fn pick(bits: &[HeapBit], round: u32, count: usize, constants: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..bits.len()).filter(|&k| bits[k].round < round).collect();
    order.sort_by(|&x, &y| {
        let (tx, ty) = (bits[x].timing, bits[y].timing);
        tx.cycle
            .cmp(&ty.cycle)
            .then(tx.arrival.total_cmp(&ty.arrival))
    });

    let mut picked: Vec<usize> = order
        .iter()
        .copied()
        .filter(|&k| bits[k].source == BitSource::One)
        .take(constants)
        .collect();
    for k in order {
        if picked.len() >= count {
            break;
        }
        if !picked.contains(&k) {
            picked.push(k);
        }
    }
    picked
}
