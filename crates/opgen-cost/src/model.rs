//! FPGA cost model
//!
//! Closed-form delay and area estimates in the spirit of the adder
//! architecture estimates used for datapath selection: every formula is a
//! non-decreasing function of each operand width, so a scheduler can rely on
//! "if the narrow version does not fit, the wide one will not either".

use crate::error::Result;
use crate::target::{Target, TargetTiming};
use crate::{CostModel, OpKind, TimePs};

/// Area of one hard multiplier block, in LUT equivalents
const DSP_LUT_EQUIVALENT: f64 = 40.0;

/// Area of one flip-flop, in LUT equivalents
const REGISTER_LUT_EQUIVALENT: f64 = 0.5;

/// Cost model driven by the timing constants of one target family
#[derive(Debug, Clone)]
pub struct FpgaCostModel {
    target: Target,
    timing: TargetTiming,
}

impl FpgaCostModel {
    /// Create a cost model with the target's default timing
    pub fn new(target: Target) -> Self {
        Self {
            target,
            timing: target.default_timing(),
        }
    }

    /// Create a cost model with explicit timing constants
    pub fn with_timing(target: Target, timing: TargetTiming) -> Result<Self> {
        timing.validate()?;
        Ok(Self { target, timing })
    }

    /// Get the timing constants in use
    pub fn timing(&self) -> &TargetTiming {
        &self.timing
    }

    /// Number of LUT levels needed to combine `inputs` signals
    pub fn lut_levels(&self, inputs: u32) -> u32 {
        let k = self.target.lut_inputs().max(2);
        let mut levels = 1;
        let mut capacity = k;
        while capacity < inputs {
            capacity = capacity.saturating_mul(k);
            levels += 1;
        }
        levels
    }

    /// Number of LUTs needed to compute one function of `inputs` signals
    pub fn luts_for(&self, inputs: u32) -> u32 {
        let k = self.target.lut_inputs().max(2);
        if inputs <= k {
            1
        } else {
            (inputs - 1).div_ceil(k - 1)
        }
    }

    fn dsp_tiles(&self, a: u32, b: u32) -> Option<u32> {
        self.target
            .dsp_tile()
            .map(|(ta, tb)| a.div_ceil(ta) * b.div_ceil(tb))
    }

    fn carry_chain_delay(&self, width: u32) -> TimePs {
        self.timing.lut_delay
            + self.timing.wire_delay
            + self.timing.carry_delay_per_bit * width as f64
    }
}

/// Width `index` of an operand list, treating missing or zero widths as one bit
fn width_at(widths: &[u32], index: usize) -> u32 {
    widths.get(index).copied().unwrap_or(1).max(1)
}

impl CostModel for FpgaCostModel {
    fn target(&self) -> Target {
        self.target
    }

    fn delay(&self, op: OpKind, widths: &[u32]) -> TimePs {
        let t = &self.timing;
        match op {
            OpKind::Lut => {
                self.lut_levels(width_at(widths, 0)) as f64 * (t.lut_delay + t.wire_delay)
            }
            OpKind::Adder | OpKind::Comparator => {
                let width = widths.iter().copied().max().unwrap_or(1).max(1);
                self.carry_chain_delay(width)
            }
            OpKind::Multiplexer => {
                // One LUT resolves a 4:1 selection on 6-input fabrics
                let ways = width_at(widths, 1);
                let per_lut = (self.target.lut_inputs() / 2).max(2);
                let mut levels = 1;
                let mut capacity = per_lut;
                while capacity < ways {
                    capacity = capacity.saturating_mul(per_lut);
                    levels += 1;
                }
                levels as f64 * (t.lut_delay + t.wire_delay)
            }
            OpKind::Register => t.register_delay,
            OpKind::DspMultiplier => {
                let (a, b) = (width_at(widths, 0), width_at(widths, 1));
                match self.dsp_tiles(a, b) {
                    Some(1) => t.dsp_delay,
                    Some(_) => t.dsp_delay + self.carry_chain_delay(a + b),
                    None => {
                        let rows = (a.min(b) as f64).log2().ceil() + 1.0;
                        rows * (t.lut_delay + t.wire_delay) + self.carry_chain_delay(a + b)
                    }
                }
            }
            OpKind::Wire => t.wire_delay,
        }
    }

    fn area(&self, op: OpKind, widths: &[u32]) -> f64 {
        match op {
            OpKind::Lut => self.luts_for(width_at(widths, 0)) as f64,
            OpKind::Adder | OpKind::Comparator => {
                widths.iter().copied().max().unwrap_or(1).max(1) as f64
            }
            OpKind::Multiplexer => {
                let (width, ways) = (width_at(widths, 0), width_at(widths, 1));
                let per_lut = (self.target.lut_inputs() / 2).max(2);
                (width * ways.div_ceil(per_lut)) as f64
            }
            OpKind::Register => width_at(widths, 0) as f64 * REGISTER_LUT_EQUIVALENT,
            OpKind::DspMultiplier => {
                let (a, b) = (width_at(widths, 0), width_at(widths, 1));
                match self.dsp_tiles(a, b) {
                    Some(tiles) => tiles as f64 * DSP_LUT_EQUIVALENT,
                    None => (a * b) as f64 / 2.0 + (a + b) as f64,
                }
            }
            OpKind::Wire => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lut_levels() {
        let model = FpgaCostModel::new(Target::Kintex7);
        assert_eq!(model.lut_levels(1), 1);
        assert_eq!(model.lut_levels(6), 1);
        assert_eq!(model.lut_levels(7), 2);
        assert_eq!(model.lut_levels(36), 2);
        assert_eq!(model.lut_levels(37), 3);

        let small = FpgaCostModel::new(Target::Ice40);
        assert_eq!(small.lut_levels(6), 2);
    }

    #[test]
    fn test_delay_monotonic_in_width() {
        for target in Target::ALL {
            let model = FpgaCostModel::new(target);
            for op in OpKind::ALL {
                let mut previous = 0.0;
                for w in 1..80 {
                    let d = model.delay(op, &[w, w]);
                    assert!(d >= previous, "{op:?} on {target} not monotonic at {w}");
                    previous = d;
                }
            }
        }
    }

    #[test]
    fn test_area_monotonic_in_width() {
        for target in Target::ALL {
            let model = FpgaCostModel::new(target);
            for op in OpKind::ALL {
                let mut previous = 0.0;
                for w in 1..80 {
                    let a = model.area(op, &[w, w]);
                    assert!(a >= previous, "{op:?} on {target} not monotonic at {w}");
                    previous = a;
                }
            }
        }
    }

    #[test]
    fn test_dsp_tiling() {
        let model = FpgaCostModel::new(Target::Virtex6);
        let single = model.delay(OpKind::DspMultiplier, &[17, 17]);
        assert_eq!(single, model.timing().dsp_delay);
        assert!(model.delay(OpKind::DspMultiplier, &[32, 32]) > single);
        assert_eq!(
            model.area(OpKind::DspMultiplier, &[32, 32]),
            4.0 * DSP_LUT_EQUIVALENT
        );
    }

    #[test]
    fn test_custom_timing_rejected_when_negative() {
        let mut timing = Target::Generic.default_timing();
        timing.lut_delay = f64::NAN;
        assert!(FpgaCostModel::with_timing(Target::Generic, timing).is_err());
    }

    #[test]
    fn test_estimate() {
        let model = FpgaCostModel::new(Target::Generic);
        let estimate = model.estimate(OpKind::Adder, &[16]);
        assert_eq!(estimate.area, 16.0);
        assert_eq!(estimate.delay, 500.0 + 400.0 + 30.0 * 16.0);
    }
}
