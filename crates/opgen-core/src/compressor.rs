//! Compressor catalog
//!
//! A compressor (generalized parallel counter) consumes bits from one or
//! more adjacent bit heap columns and produces the binary count of its
//! inputs: `sum(popcount(column i) << i)`. The catalog is plain data: every
//! entry is a value-typed [`Compressor`] descriptor, and new technologies
//! add entries rather than code paths in the bit heap.
//!
//! | Entry | Shape (LSB first) | Outputs | Kind |
//! |-------|-------------------|---------|------|
//! | `fa_3_2` | `[3]` | 2 | Generic |
//! | `ha_2_2` | `[2]` | 2 | Generic |
//! | `cfa_3_2` | `[3]`, one constant input | 2 | Constant |
//! | `gpc_6_3` | `[6]` | 3 | Specialized (6-LUT) |
//! | `gpc_1_5_3` | `[5, 1]` | 3 | Specialized (6-LUT) |
//! | `gpc_2_3_3` | `[3, 2]` | 3 | Specialized (6-LUT) |
//!
//! Generic entries have fixed structural costs; technology entries are
//! costed through the [`CostModel`].

use crate::config::GeneratorConfig;
use crate::error::{GenError, Result};
use crate::expr::{BitSource, Expr};
use crate::TimePs;
use opgen_cost::{CostModel, OpKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Area of a full adder, in LUT equivalents
pub const FULL_ADDER_AREA: f64 = 1.0;
/// Delay of a full adder
pub const FULL_ADDER_DELAY: TimePs = 600.0;
/// Area of a half adder, in LUT equivalents
pub const HALF_ADDER_AREA: f64 = 1.0;
/// Delay of a half adder
pub const HALF_ADDER_DELAY: TimePs = 500.0;

/// Compressor families, in tie-break preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressorKind {
    /// Folds a known constant bit into the reduction
    Constant,
    /// Technology-specific fixed shape
    Specialized,
    /// Classical k:2 style reduction on any tall column
    Generic,
}

impl CompressorKind {
    /// Lower rank wins ties
    pub fn rank(&self) -> u8 {
        match self {
            Self::Constant => 0,
            Self::Specialized => 1,
            Self::Generic => 2,
        }
    }
}

/// Area and delay of one compressor instance
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CompressorCost {
    pub area: f64,
    pub delay: TimePs,
}

/// Occupancy of one bit heap column, as seen by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnShape {
    /// Number of bits
    pub height: usize,
    /// How many of them are constant ones
    pub constant_bits: usize,
}

impl ColumnShape {
    pub fn new(height: usize) -> Self {
        Self {
            height,
            constant_bits: 0,
        }
    }
}

/// A catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compressor {
    pub name: String,
    pub kind: CompressorKind,
    /// Bits consumed per column, LSB first
    pub heights: Vec<usize>,
    /// How many of the anchor-column inputs must be constant ones
    pub constant_inputs: usize,
    /// Bits produced, at consecutive weights from the anchor
    pub output_width: u32,
    pub cost: CompressorCost,
}

impl Compressor {
    /// Create an entry; the output width follows from the shape
    pub fn new(
        name: impl Into<String>,
        kind: CompressorKind,
        heights: Vec<usize>,
        constant_inputs: usize,
        cost: CompressorCost,
    ) -> Self {
        let max_value: u64 = heights
            .iter()
            .enumerate()
            .map(|(i, h)| (*h as u64) << i)
            .sum();
        let output_width = 64 - max_value.leading_zeros();
        Self {
            name: name.into(),
            kind,
            heights,
            constant_inputs,
            output_width,
            cost,
        }
    }

    /// Number of columns consumed
    pub fn span(&self) -> usize {
        self.heights.len()
    }

    /// Total number of input bits
    pub fn input_bits(&self) -> usize {
        self.heights.iter().sum()
    }

    pub fn cost(&self) -> CompressorCost {
        self.cost
    }

    /// Can one instance be placed with its anchor at `shapes[0]`?
    pub fn matches(&self, shapes: &[ColumnShape]) -> bool {
        self.instances_fitting(shapes) > 0
    }

    /// How many parallel instances fit at `shapes[0]`
    pub fn instances_fitting(&self, shapes: &[ColumnShape]) -> usize {
        if shapes.len() < self.span() {
            return 0;
        }
        let mut fitting = usize::MAX;
        for (shape, &needed) in shapes.iter().zip(&self.heights) {
            if needed > 0 {
                fitting = fitting.min(shape.height / needed);
            }
        }
        if self.constant_inputs > 0 {
            fitting = fitting.min(shapes[0].constant_bits / self.constant_inputs);
        }
        if fitting == usize::MAX {
            0
        } else {
            fitting
        }
    }

    /// Number of outputs that land inside a heap with `columns_left`
    /// columns from the anchor up to the MSB
    pub fn outputs_in_range(&self, columns_left: usize) -> u32 {
        self.output_width.min(columns_left as u32)
    }

    /// Net bits removed from the heap by one instance
    pub fn reduction(&self, columns_left: usize) -> isize {
        self.input_bits() as isize - self.outputs_in_range(columns_left) as isize
    }

    /// Expression of one instance over the selected input bits
    pub fn apply(&self, columns: Vec<Vec<BitSource>>) -> Expr {
        Expr::Compress {
            compressor: self.name.clone(),
            columns,
        }
    }

    fn validate(&self) -> Result<()> {
        let fail = |why: &str| {
            Err(GenError::Config(format!(
                "compressor '{}' {}",
                self.name, why
            )))
        };
        if self.heights.first().copied().unwrap_or(0) == 0 {
            return fail("must consume bits from its anchor column");
        }
        if self.input_bits() < 2 {
            return fail("must consume at least two bits");
        }
        if self.output_width as usize > self.input_bits() {
            return fail("produces more bits than it consumes");
        }
        if self.constant_inputs > self.heights[0] {
            return fail("has more constant inputs than anchor inputs");
        }
        match (self.kind, self.constant_inputs) {
            (CompressorKind::Constant, 0) => return fail("of constant kind needs a constant input"),
            (CompressorKind::Generic | CompressorKind::Specialized, n) if n > 0 => {
                return fail("with constant inputs must be of constant kind")
            }
            _ => {}
        }
        let cost = self.cost;
        if !cost.area.is_finite() || cost.area < 0.0 || !cost.delay.is_finite() || cost.delay < 0.0
        {
            return fail("has an invalid cost");
        }
        Ok(())
    }
}

/// A hard multiplier block usable for partial products
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplierTile {
    pub name: String,
    pub a_width: u32,
    pub b_width: u32,
    pub cost: CompressorCost,
}

impl MultiplierTile {
    /// Does an `a x b` product fit in one tile (in either orientation)?
    pub fn fits(&self, a: u32, b: u32) -> bool {
        (a <= self.a_width && b <= self.b_width) || (a <= self.b_width && b <= self.a_width)
    }
}

/// The set of compressors and tiles available to a bit heap
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<Compressor>,
    tiles: Vec<MultiplierTile>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::generic()
    }
}

impl Catalog {
    /// Only the mandatory full and half adders
    pub fn generic() -> Self {
        Self {
            entries: vec![
                Compressor::new(
                    "fa_3_2",
                    CompressorKind::Generic,
                    vec![3],
                    0,
                    CompressorCost {
                        area: FULL_ADDER_AREA,
                        delay: FULL_ADDER_DELAY,
                    },
                ),
                Compressor::new(
                    "ha_2_2",
                    CompressorKind::Generic,
                    vec![2],
                    0,
                    CompressorCost {
                        area: HALF_ADDER_AREA,
                        delay: HALF_ADDER_DELAY,
                    },
                ),
            ],
            tiles: Vec::new(),
        }
    }

    /// Catalog for the cost model's target under a configuration
    pub fn for_target(cost: &dyn CostModel, config: &GeneratorConfig) -> Result<Self> {
        let mut catalog = Self::generic();
        let target = cost.target();

        catalog.register(Compressor::new(
            "cfa_3_2",
            CompressorKind::Constant,
            vec![3],
            1,
            CompressorCost {
                area: FULL_ADDER_AREA,
                delay: HALF_ADDER_DELAY,
            },
        ))?;

        if config.compression.use_specialized && target.lut_inputs() >= 6 {
            for (name, heights) in [
                ("gpc_6_3", vec![6]),
                ("gpc_1_5_3", vec![5, 1]),
                ("gpc_2_3_3", vec![3, 2]),
            ] {
                let inputs: usize = heights.iter().sum();
                let mut entry = Compressor::new(
                    name,
                    CompressorKind::Specialized,
                    heights,
                    0,
                    CompressorCost::default(),
                );
                let lut = cost.estimate(OpKind::Lut, &[inputs as u32]);
                entry.cost = CompressorCost {
                    area: lut.area * entry.output_width as f64,
                    delay: lut.delay,
                };
                catalog.register(entry)?;
            }
        }

        if config.use_hard_multipliers {
            if let Some((a, b)) = target.dsp_tile() {
                let dsp = cost.estimate(OpKind::DspMultiplier, &[a, b]);
                catalog.register_tile(MultiplierTile {
                    name: format!("dsp_{}x{}", a, b),
                    a_width: a,
                    b_width: b,
                    cost: CompressorCost {
                        area: dsp.area,
                        delay: dsp.delay,
                    },
                })?;
            }
        }

        debug!(
            "catalog for {}: {} compressors, {} tiles",
            target,
            catalog.entries.len(),
            catalog.tiles.len()
        );
        Ok(catalog)
    }

    /// Add an entry
    pub fn register(&mut self, entry: Compressor) -> Result<()> {
        entry.validate()?;
        if self.get(&entry.name).is_some() {
            return Err(GenError::Config(format!(
                "compressor '{}' is already registered",
                entry.name
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Add a multiplier tile
    pub fn register_tile(&mut self, tile: MultiplierTile) -> Result<()> {
        if tile.a_width == 0 || tile.b_width == 0 {
            return Err(GenError::Config(format!(
                "multiplier tile '{}' has an empty side",
                tile.name
            )));
        }
        self.tiles.push(tile);
        Ok(())
    }

    pub fn entries(&self) -> &[Compressor] {
        &self.entries
    }

    pub fn tiles(&self) -> &[MultiplierTile] {
        &self.tiles
    }

    pub fn get(&self, name: &str) -> Option<&Compressor> {
        self.entries.iter().find(|c| c.name == name)
    }

    /// The 3:2 fallback, unless it was removed
    pub fn full_adder(&self) -> Option<&Compressor> {
        self.get("fa_3_2")
    }

    /// Keep only the entries matching `keep`
    pub fn retain(&mut self, keep: impl FnMut(&Compressor) -> bool) {
        self.entries.retain(keep);
    }

    /// Every entry whose shape fits at `shapes[0]` and the columns above it
    pub fn applicable_at(&self, shapes: &[ColumnShape]) -> Vec<&Compressor> {
        self.entries.iter().filter(|c| c.matches(shapes)).collect()
    }

    /// Area and delay of an entry
    pub fn cost(&self, compressor: &Compressor) -> CompressorCost {
        compressor.cost
    }
}
