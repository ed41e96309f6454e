//! Signals of an operator's signal graph

use crate::expr::Expr;
use crate::schedule::Timing;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Widest signal the generator handles (values are simulated as `u128`)
pub const MAX_SIGNAL_WIDTH: u32 = 128;

/// Index of a signal inside its operator's graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub usize);

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// One bit of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitRef {
    pub signal: SignalId,
    pub bit: u32,
}

impl BitRef {
    pub fn new(signal: SignalId, bit: u32) -> Self {
        Self { signal, bit }
    }
}

/// Role of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Primary input port
    Input,
    /// Primary output port
    Output,
    /// Compile-time constant
    Constant,
    /// Combinational value
    Wire,
    /// Value re-timed to a later cycle through pipeline registers
    Register,
    /// Output of an instantiated sub-operator
    Instance,
}

/// A named value produced while building one operator
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub id: SignalId,
    pub name: String,
    pub width: u32,
    pub signed: bool,
    pub kind: SignalKind,
    /// Cycle and arrival time within that cycle
    pub timing: Timing,
    /// How the value is computed
    pub expr: Expr,
    /// Signals this one was combinatorially derived from
    pub upstream: Vec<SignalId>,
}

impl Signal {
    pub fn cycle(&self) -> u32 {
        self.timing.cycle
    }

    pub fn arrival(&self) -> f64 {
        self.timing.arrival
    }

    /// Mask selecting the low `width` bits
    pub fn mask(&self) -> u128 {
        width_mask(self.width)
    }

    /// Reference to bit `bit`
    pub fn bit(&self, bit: u32) -> BitRef {
        BitRef::new(self.id, bit)
    }
}

/// Mask selecting the low `width` bits of a `u128`
pub fn width_mask(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

/// Interpret the low `width` bits of `value` as a two's-complement number
pub fn sign_extend(value: u128, width: u32) -> i128 {
    if width == 0 {
        return 0;
    }
    if width >= 128 {
        return value as i128;
    }
    let shift = 128 - width;
    ((value << shift) as i128) >> shift
}
