//! Value conservation checks for compressed bit heaps
//!
//! The two rows produced by [`BitHeap::compress`] must add up to the exact
//! value of every contribution for every input assignment. Operators with
//! few input bits are checked exhaustively, larger ones on random samples.

use crate::bitheap::{BitHeap, CompressionResult};
use crate::error::{GenError, Result};
use crate::operator::Operator;
use crate::signal::width_mask;
use crate::simulate::Simulator;
use rand::Rng;
use tracing::debug;

/// Operators with at most this many input bits are checked exhaustively
pub const EXHAUSTIVE_INPUT_BITS: u32 = 16;

/// Check that `result` equals the heap's contributions
///
/// Returns the number of input assignments checked.
pub fn check_conservation<R: Rng>(
    op: &Operator,
    heap: &BitHeap,
    result: &CompressionResult,
    samples: usize,
    rng: &mut R,
) -> Result<usize> {
    let widths = op
        .inputs()
        .iter()
        .map(|id| op.signal(*id).map(|s| s.width))
        .collect::<Result<Vec<u32>>>()?;
    let total: u32 = widths.iter().sum();
    let sim = Simulator::new(op);

    let mut checked = 0;
    if total <= EXHAUSTIVE_INPUT_BITS {
        for assignment in 0..(1u128 << total) {
            let mut rest = assignment;
            let inputs: Vec<u128> = widths
                .iter()
                .map(|w| {
                    let value = rest & width_mask(*w);
                    rest >>= *w;
                    value
                })
                .collect();
            check_one(op, &sim, heap, result, &inputs)?;
            checked += 1;
        }
    } else {
        for _ in 0..samples {
            let inputs: Vec<u128> = widths
                .iter()
                .map(|w| rng.gen::<u128>() & width_mask(*w))
                .collect();
            check_one(op, &sim, heap, result, &inputs)?;
            checked += 1;
        }
    }

    debug!(
        "[{}] bit heap '{}' conserved its value over {} assignments",
        op.name(),
        heap.name(),
        checked
    );
    Ok(checked)
}

fn check_one(
    op: &Operator,
    sim: &Simulator<'_>,
    heap: &BitHeap,
    result: &CompressionResult,
    inputs: &[u128],
) -> Result<()> {
    let values = sim.evaluate_ports(inputs)?;
    let expected = heap.expected_value(&values);
    let got = result.value(&values);
    if got != expected {
        return Err(GenError::invariant(
            op.name(),
            format!(
                "bit heap '{}' computes {:#x} instead of {:#x} for inputs {:?}",
                heap.name(),
                got,
                expected,
                inputs
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::Catalog;
    use crate::config::GeneratorConfig;
    use crate::context::BuildContext;
    use crate::expr::Expr;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_exhaustive_when_small() {
        let ctx = BuildContext::new(GeneratorConfig::default()).unwrap();
        let mut op = Operator::new(&ctx, "small");
        let a = op.add_input("a", 3, true).unwrap();
        let b = op.add_input("b", 4, false).unwrap();
        let mut heap = op.new_bit_heap("h", 6, 0, true).unwrap();
        heap.add_signed_vector(&op, 0, a).unwrap();
        heap.subtract_signed_vector(&op, 1, b).unwrap();
        heap.add_constant(0, 7).unwrap();
        let result = heap.compress(&mut op, &Catalog::generic()).unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            check_conservation(&op, &heap, &result, 10, &mut rng).unwrap(),
            1 << 7
        );
    }

    #[test]
    fn test_detects_wrong_rows() {
        let ctx = BuildContext::new(GeneratorConfig::default()).unwrap();
        let mut op = Operator::new(&ctx, "wrong");
        let a = op.add_input("a", 2, false).unwrap();
        let mut heap = op.new_bit_heap("h", 3, 0, false).unwrap();
        heap.add_signed_vector(&op, 0, a).unwrap();
        let mut result = heap.compress(&mut op, &Catalog::generic()).unwrap();

        // Pretend the carry row is the input itself
        let bogus = op.declare("bogus", Expr::Alias(a), 2, false, 0.0).unwrap();
        result.carry = bogus;

        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            check_conservation(&op, &heap, &result, 10, &mut rng),
            Err(GenError::InvariantViolation { .. })
        ));
    }
}
