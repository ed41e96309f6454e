//! FPGA target families
//!
//! Each family fixes the structural parameters the generator cares about:
//! the LUT input count (which decides the shape of LUT-based compressors),
//! the hard multiplier tile shape, and the default timing constants used by
//! [`FpgaCostModel`](crate::FpgaCostModel).

use crate::error::{CostError, Result};
use crate::TimePs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported technology families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Technology-neutral 6-LUT fabric without hard multipliers
    #[default]
    Generic,
    /// Xilinx Virtex-6
    Virtex6,
    /// Xilinx Kintex-7
    Kintex7,
    /// Intel Stratix V
    StratixV,
    /// Lattice iCE40 (4-LUT fabric)
    Ice40,
}

impl Target {
    /// All known targets
    pub const ALL: [Target; 5] = [
        Target::Generic,
        Target::Virtex6,
        Target::Kintex7,
        Target::StratixV,
        Target::Ice40,
    ];

    /// Get the canonical name of this target
    pub fn name(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Virtex6 => "virtex6",
            Self::Kintex7 => "kintex7",
            Self::StratixV => "stratixv",
            Self::Ice40 => "ice40",
        }
    }

    /// Number of inputs of one logic LUT
    pub fn lut_inputs(&self) -> u32 {
        match self {
            Self::Ice40 => 4,
            _ => 6,
        }
    }

    /// Operand widths of one hard multiplier block, if the family has one
    pub fn dsp_tile(&self) -> Option<(u32, u32)> {
        match self {
            Self::Virtex6 | Self::Kintex7 => Some((25, 18)),
            Self::StratixV => Some((27, 27)),
            Self::Generic | Self::Ice40 => None,
        }
    }

    /// Default timing constants for this family
    pub fn default_timing(&self) -> TargetTiming {
        match self {
            Self::Generic => TargetTiming {
                lut_delay: 500.0,
                wire_delay: 400.0,
                carry_delay_per_bit: 30.0,
                register_delay: 300.0,
                dsp_delay: 3000.0,
            },
            Self::Virtex6 => TargetTiming {
                lut_delay: 240.0,
                wire_delay: 450.0,
                carry_delay_per_bit: 15.0,
                register_delay: 300.0,
                dsp_delay: 2500.0,
            },
            Self::Kintex7 => TargetTiming {
                lut_delay: 124.0,
                wire_delay: 400.0,
                carry_delay_per_bit: 12.0,
                register_delay: 250.0,
                dsp_delay: 2200.0,
            },
            Self::StratixV => TargetTiming {
                lut_delay: 250.0,
                wire_delay: 350.0,
                carry_delay_per_bit: 20.0,
                register_delay: 250.0,
                dsp_delay: 2000.0,
            },
            Self::Ice40 => TargetTiming {
                lut_delay: 450.0,
                wire_delay: 800.0,
                carry_delay_per_bit: 100.0,
                register_delay: 500.0,
                dsp_delay: 6000.0,
            },
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = CostError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        Target::ALL
            .iter()
            .copied()
            .find(|t| t.name() == lowered)
            .ok_or_else(|| CostError::UnknownTarget(s.to_string()))
    }
}

/// Timing constants of a target family, in picoseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetTiming {
    /// Logic delay through one LUT
    pub lut_delay: TimePs,
    /// Typical local routing delay between two LUTs
    pub wire_delay: TimePs,
    /// Carry chain delay per bit
    pub carry_delay_per_bit: TimePs,
    /// Clock-to-output plus setup of a flip-flop
    pub register_delay: TimePs,
    /// Input-to-output delay of a hard multiplier block
    pub dsp_delay: TimePs,
}

impl TargetTiming {
    /// Check that every constant is finite and non-negative
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("lut_delay", self.lut_delay),
            ("wire_delay", self.wire_delay),
            ("carry_delay_per_bit", self.carry_delay_per_bit),
            ("register_delay", self.register_delay),
            ("dsp_delay", self.dsp_delay),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(CostError::InvalidTiming { name, value });
            }
        }
        Ok(())
    }
}
