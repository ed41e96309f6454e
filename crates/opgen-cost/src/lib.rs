//! opgen cost model
//!
//! Delay and area estimation for the arithmetic primitives an operator
//! generator instantiates. The generator core treats the model as a pure
//! black box through the [`CostModel`] trait; [`FpgaCostModel`] is the
//! concrete implementation for the supported [`Target`] families.
//!
//! # Units
//!
//! | Quantity | Unit |
//! |----------|------|
//! | Delay | picoseconds ([`TimePs`]) |
//! | Area | LUT equivalents |

mod error;
mod model;
mod target;

pub use error::{CostError, Result};
pub use model::FpgaCostModel;
pub use target::{Target, TargetTiming};

use serde::{Deserialize, Serialize};

/// Time unit in picoseconds
pub type TimePs = f64;

/// Primitive operation kinds known to the cost model
///
/// The meaning of the `widths` argument passed alongside each kind:
///
/// - `Lut`: `[inputs]`
/// - `Adder`, `Comparator`: operand widths
/// - `Multiplexer`: `[data_width, ways]`
/// - `Register`: `[width]`
/// - `DspMultiplier`: `[a_width, b_width]`
/// - `Wire`: ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Lut,
    Adder,
    Comparator,
    Multiplexer,
    Register,
    DspMultiplier,
    Wire,
}

impl OpKind {
    /// All operation kinds
    pub const ALL: [OpKind; 7] = [
        OpKind::Lut,
        OpKind::Adder,
        OpKind::Comparator,
        OpKind::Multiplexer,
        OpKind::Register,
        OpKind::DspMultiplier,
        OpKind::Wire,
    ];

    /// Get the name of this operation kind
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lut => "lut",
            Self::Adder => "adder",
            Self::Comparator => "comparator",
            Self::Multiplexer => "multiplexer",
            Self::Register => "register",
            Self::DspMultiplier => "dsp_multiplier",
            Self::Wire => "wire",
        }
    }
}

/// Delay and area of one primitive
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostEstimate {
    pub delay: TimePs,
    pub area: f64,
}

/// Technology cost model
///
/// Implementations must be pure and monotonic: widening any operand never
/// decreases the reported delay or area.
pub trait CostModel: Send + Sync + std::fmt::Debug {
    /// Target family this model describes
    fn target(&self) -> Target;

    /// Estimated propagation delay
    fn delay(&self, op: OpKind, widths: &[u32]) -> TimePs;

    /// Estimated area in LUT equivalents
    fn area(&self, op: OpKind, widths: &[u32]) -> f64;

    /// Delay and area together
    fn estimate(&self, op: OpKind, widths: &[u32]) -> CostEstimate {
        CostEstimate {
            delay: self.delay(op, widths),
            area: self.area(op, widths),
        }
    }
}
