//! Partial products
//!
//! A product `a * b` enters the heap either through hard multiplier tiles or
//! as LUT partial-product rows:
//!
//! - unsigned operands are cut into tile-sized blocks; each block product is
//!   an unsigned vector at weight `weight + i + j`
//! - signed operands that fit one tile become a single signed product
//! - a tile slower than the clock period is never used
//! - otherwise row `j` is `a` gated by `b[j]`; bit `i` of row `j` counts
//!   negatively when exactly one of `a[i]`, `b[j]` is a sign bit

use super::{BitHeap, Contribution};
use crate::compressor::{Catalog, MultiplierTile};
use crate::error::Result;
use crate::expr::{BinOp, Expr};
use crate::operator::Operator;
use crate::signal::{BitRef, SignalId};
use opgen_cost::OpKind;
use tracing::{debug, warn};

impl BitHeap {
    /// Add `a * b` with its LSB at `weight`
    pub fn add_product(
        &mut self,
        op: &mut Operator,
        weight: i32,
        a: SignalId,
        b: SignalId,
        catalog: &Catalog,
    ) -> Result<()> {
        self.check_access(op)?;
        self.check_weight(weight)?;
        let (a_width, a_signed) = {
            let s = op.signal(a)?;
            (s.width, s.signed)
        };
        let (b_width, b_signed) = {
            let s = op.signal(b)?;
            (s.width, s.signed)
        };
        self.contributions.push(Contribution::Product {
            weight,
            a: (a, a_width, a_signed),
            b: (b, b_width, b_signed),
        });

        let scheduler = op.scheduler();
        let tile = catalog.tiles().first().filter(|tile| {
            let too_slow = scheduler.is_pipelined() && tile.cost.delay > scheduler.period();
            if too_slow {
                warn!(
                    "[{}] skipping multiplier tile '{}': {:.1}ps exceeds the {:.1}ps period",
                    op.name(),
                    tile.name,
                    tile.cost.delay,
                    scheduler.period()
                );
            }
            !too_slow
        });

        match tile {
            Some(tile) if !a_signed && !b_signed => {
                self.add_tiled_product(op, weight, (a, a_width), (b, b_width), tile)
            }
            Some(tile) if tile.fits(a_width, b_width) => {
                let product = op.declare_scheduled(
                    &format!("{}_dsp", self.name),
                    Expr::Binary {
                        op: BinOp::Mul,
                        lhs: a,
                        rhs: b,
                    },
                    a_width + b_width,
                    a_signed || b_signed,
                    tile.cost.delay,
                    tile.name.clone(),
                    vec![a_width, b_width],
                )?;
                self.push_vector(op, weight, product, false)
            }
            _ => self.add_partial_products(op, weight, (a, a_width, a_signed), (b, b_width, b_signed)),
        }
    }

    fn add_tiled_product(
        &mut self,
        op: &mut Operator,
        weight: i32,
        (a, a_width): (SignalId, u32),
        (b, b_width): (SignalId, u32),
        tile: &MultiplierTile,
    ) -> Result<()> {
        // Long tile side along the wider operand
        let (ta, tb) = if (a_width >= b_width) == (tile.a_width >= tile.b_width) {
            (tile.a_width, tile.b_width)
        } else {
            (tile.b_width, tile.a_width)
        };

        let a_blocks = self.blocks(op, a, a_width, ta)?;
        let b_blocks = self.blocks(op, b, b_width, tb)?;
        debug!(
            "[{}] {}x{} product in {} {} tiles",
            op.name(),
            a_width,
            b_width,
            a_blocks.len() * b_blocks.len(),
            tile.name
        );

        for &(ia, sa, wa) in &a_blocks {
            for &(ib, sb, wb) in &b_blocks {
                let block = op.declare_scheduled(
                    &format!("{}_dsp", self.name),
                    Expr::Binary {
                        op: BinOp::Mul,
                        lhs: sa,
                        rhs: sb,
                    },
                    wa + wb,
                    false,
                    tile.cost.delay,
                    tile.name.clone(),
                    vec![wa, wb],
                )?;
                self.push_vector(op, weight + (ia + ib) as i32, block, false)?;
            }
        }
        Ok(())
    }

    /// Cut an unsigned operand into `(offset, signal, width)` blocks
    fn blocks(
        &self,
        op: &mut Operator,
        source: SignalId,
        width: u32,
        block: u32,
    ) -> Result<Vec<(u32, SignalId, u32)>> {
        if width <= block {
            return Ok(vec![(0, source, width)]);
        }
        let mut out = Vec::new();
        let mut lo = 0;
        while lo < width {
            let w = block.min(width - lo);
            let slice = op.declare(
                &format!("{}_slice", self.name),
                Expr::Slice { source, lo },
                w,
                false,
                0.0,
            )?;
            out.push((lo, slice, w));
            lo += block;
        }
        Ok(out)
    }

    fn add_partial_products(
        &mut self,
        op: &mut Operator,
        weight: i32,
        (a, a_width, a_signed): (SignalId, u32, bool),
        (b, b_width, b_signed): (SignalId, u32, bool),
    ) -> Result<()> {
        for j in 0..b_width {
            let row = op.declare_op(
                &format!("{}_pp", self.name),
                Expr::PartialProduct {
                    vector: a,
                    select: BitRef::new(b, j),
                },
                a_width,
                false,
                OpKind::Lut,
                &[2],
            )?;
            let b_sign = b_signed && j == b_width - 1;
            for i in 0..a_width {
                let a_sign = a_signed && i == a_width - 1;
                self.push_bit(op, weight + (i + j) as i32, BitRef::new(row, i), a_sign ^ b_sign)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::compressor::Catalog;
    use crate::config::GeneratorConfig;
    use crate::context::BuildContext;
    use crate::operator::Operator;
    use crate::simulate::Simulator;
    use opgen_cost::Target;

    fn multiply(config: GeneratorConfig, a: (u32, bool, i128), b: (u32, bool, i128)) -> i128 {
        let ctx = BuildContext::new(config.clone()).unwrap();
        let catalog = Catalog::for_target(ctx.cost_model().as_ref(), &config).unwrap();
        let mut op = Operator::new(&ctx, "mul");
        let x = op.add_input("x", a.0, a.1).unwrap();
        let y = op.add_input("y", b.0, b.1).unwrap();
        let width = (a.0 + b.0) as i32;
        let mut heap = op
            .new_bit_heap("p", width - 1, 0, a.1 || b.1)
            .unwrap();
        heap.add_product(&mut op, 0, x, y, &catalog).unwrap();
        let result = heap.compress(&mut op, &catalog).unwrap();

        let values = Simulator::new(&op)
            .evaluate_ports(&[a.2 as u128, b.2 as u128])
            .unwrap();
        assert_eq!(result.value(&values), heap.expected_value(&values));
        result.signed_value(&values)
    }

    #[test]
    fn test_unsigned_lut_product() {
        let config = GeneratorConfig::for_target(Target::Ice40);
        assert_eq!(multiply(config, (5, false, 27), (4, false, 13)), 351);
    }

    #[test]
    fn test_signed_lut_product() {
        let mut config = GeneratorConfig::default();
        config.use_hard_multipliers = false;
        assert_eq!(multiply(config.clone(), (4, true, -8), (4, true, -8)), 64);
        assert_eq!(multiply(config.clone(), (4, true, -3), (3, false, 7)), -21);
        assert_eq!(multiply(config, (3, false, 5), (4, true, 7)), 35);
    }

    #[test]
    fn test_tiled_unsigned_product() {
        let config = GeneratorConfig::for_target(Target::Kintex7);
        let a = (1i128 << 40) - 3;
        let b = (1i128 << 30) - 7;
        assert_eq!(multiply(config, (40, false, a), (30, false, b)), a * b);
    }

    #[test]
    fn test_slow_tile_falls_back_to_luts() {
        // 1250ps period, the Kintex-7 tile needs 2200ps
        let config = GeneratorConfig::for_target(Target::Kintex7).with_frequency(800.0);
        assert_eq!(multiply(config.clone(), (12, false, 4001), (10, false, 999)), 3_996_999);
        assert_eq!(multiply(config.clone(), (8, true, -100), (6, true, 25)), -2500);
        assert_eq!(multiply(config, (1, false, 1), (1, false, 1)), 1);
    }

    #[test]
    fn test_signed_single_tile_product() {
        let config = GeneratorConfig::for_target(Target::StratixV);
        assert_eq!(multiply(config, (20, true, -123_456), (16, true, 1_234)), -152_344_704);
    }
}
