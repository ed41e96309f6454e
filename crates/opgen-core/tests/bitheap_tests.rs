//! Bit heap compression tests

use anyhow::Result;
use opgen_core::verify::check_conservation;
use opgen_core::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn context(config: GeneratorConfig) -> BuildContext {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    BuildContext::new(config).unwrap()
}

fn target_catalog(ctx: &BuildContext) -> Catalog {
    Catalog::for_target(ctx.cost_model().as_ref(), ctx.config()).unwrap()
}

#[test]
fn test_three_nines_make_27() -> Result<()> {
    let ctx = context(GeneratorConfig::default());
    let mut op = Operator::new(&ctx, "nines");
    let a = op.add_input("a", 4, false)?;
    let b = op.add_input("b", 4, false)?;
    let c = op.add_input("c", 4, false)?;

    let mut heap = op.new_bit_heap("h", 5, 0, false)?;
    for x in [a, b, c] {
        heap.add_signed_vector(&op, 0, x)?;
    }
    let result = heap.compress(&mut op, &Catalog::generic())?;

    let values = Simulator::new(&op).evaluate_ports(&[9, 9, 9])?;
    assert_eq!(result.value(&values), 27);

    // Every encoding of the three inputs
    let mut rng = StdRng::seed_from_u64(27);
    assert_eq!(check_conservation(&op, &heap, &result, 0, &mut rng)?, 1 << 12);

    // All fallback compressors fit in the 5ns period
    assert_eq!(result.stats.registers_inserted, 0);
    assert_eq!(op.signal(result.sum)?.cycle(), 0);
    assert_eq!(op.signal(result.carry)?.cycle(), 0);
    for stage in &result.stages {
        for out in &stage.outputs {
            assert_eq!(op.signal(*out)?.cycle(), 0);
        }
    }
    Ok(())
}

#[test]
fn test_opposite_constants_cancel() -> Result<()> {
    let ctx = context(GeneratorConfig::default());
    let mut op = Operator::new(&ctx, "cancel");
    let mut heap = op.new_bit_heap("h", 3, 0, true)?;
    heap.add_constant(0, 5)?;
    heap.add_constant(0, -5)?;
    let result = heap.compress(&mut op, &Catalog::generic())?;

    let values = Simulator::new(&op).evaluate_ports(&[])?;
    assert_eq!(result.value(&values), 0);
    assert_eq!(result.stats.constant_bits, 0);
    assert!(result.stages.is_empty());
    Ok(())
}

#[test]
fn test_constant_only_heap() -> Result<()> {
    let ctx = context(GeneratorConfig::default());
    let mut op = Operator::new(&ctx, "consts");
    let mut heap = op.new_bit_heap("h", 7, 0, true)?;
    heap.add_constant(0, 100)?;
    heap.subtract_constant(1, 60)?;
    heap.add_constant(3, -1)?;
    let result = heap.compress(&mut op, &target_catalog(&ctx))?;

    let values = Simulator::new(&op).evaluate_ports(&[])?;
    assert_eq!(result.signed_value(&values), 100 - 120 - 8);
    Ok(())
}

#[test]
fn test_signed_difference() -> Result<()> {
    let ctx = context(GeneratorConfig::default());
    let mut op = Operator::new(&ctx, "diff");
    let a = op.add_input("a", 5, true)?;
    let b = op.add_input("b", 5, true)?;
    let mut heap = op.new_bit_heap("h", 6, 0, true)?;
    heap.add_signed_vector(&op, 0, a)?;
    heap.subtract_signed_vector(&op, 0, b)?;
    let result = heap.compress(&mut op, &target_catalog(&ctx))?;

    let sim = Simulator::new(&op);
    for (x, y) in [(-16i128, 15i128), (15, -16), (-1, -1), (7, 3)] {
        let values = sim.evaluate_ports(&[x as u128, y as u128])?;
        assert_eq!(result.signed_value(&values), x - y);
    }
    Ok(())
}

#[test]
fn test_fractional_weights() -> Result<()> {
    let ctx = context(GeneratorConfig::default());
    let mut op = Operator::new(&ctx, "frac");
    let a = op.add_input("a", 4, false)?;
    let b = op.add_input("b", 4, false)?;
    let mut heap = op.new_bit_heap("h", 4, -3, false)?;
    // a * 2^-3 + b * 2^-1 + 0.5
    heap.add_signed_vector(&op, -3, a)?;
    heap.add_signed_vector(&op, -1, b)?;
    heap.add_constant(-1, 1)?;
    let result = heap.compress(&mut op, &Catalog::generic())?;
    assert_eq!(result.lsb, -3);

    let values = Simulator::new(&op).evaluate_ports(&[0b1011, 0b0110])?;
    // In units of 2^-3: 11 + 6 * 4 + 4
    assert_eq!(result.value(&values), 39);
    Ok(())
}

#[test]
fn test_randomized_conservation() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(0x0b17_4ea9);
    let targets = [Target::Generic, Target::Kintex7, Target::Ice40];

    for trial in 0..40 {
        let target = targets[trial % targets.len()];
        let ctx = context(GeneratorConfig::for_target(target));
        let catalog = if trial % 2 == 0 {
            Catalog::generic()
        } else {
            target_catalog(&ctx)
        };
        let mut op = Operator::new(&ctx, format!("random_{}", trial));

        let msb = rng.gen_range(3..12);
        let mut heap = op.new_bit_heap("h", msb, 0, rng.gen_bool(0.5))?;
        let mut budget = 12u32;
        let mut inputs = Vec::new();
        while budget > 0 && inputs.len() < 5 {
            let width = rng.gen_range(1..=budget.min(6));
            budget -= width;
            let x = op.add_input(&format!("x{}", inputs.len()), width, rng.gen_bool(0.5))?;
            inputs.push(x);
        }

        for &x in &inputs {
            let weight = rng.gen_range(0..3);
            match rng.gen_range(0..4) {
                0 => heap.subtract_signed_vector(&op, weight, x)?,
                1 => {
                    let bit = rng.gen_range(0..op.signal(x)?.width);
                    heap.add_bit(&op, weight, BitRef::new(x, bit), rng.gen_bool(0.5))?;
                }
                _ => heap.add_signed_vector(&op, weight, x)?,
            }
        }
        if inputs.len() >= 2 && rng.gen_bool(0.5) {
            heap.add_product(&mut op, 0, inputs[0], inputs[1], &catalog)?;
        }
        for _ in 0..rng.gen_range(0..3) {
            heap.add_constant(rng.gen_range(0..4), rng.gen_range(-40..40))?;
        }

        let result = heap.compress(&mut op, &catalog)?;
        assert!(heap.heights().iter().all(|h| *h <= 2));
        check_conservation(&op, &heap, &result, 64, &mut rng)?;
    }
    Ok(())
}

#[test]
fn test_wide_heap_sampled() -> Result<()> {
    let ctx = context(GeneratorConfig::for_target(Target::Kintex7));
    let catalog = target_catalog(&ctx);
    let mut op = Operator::new(&ctx, "wide");
    let mut heap = op.new_bit_heap("h", 39, 0, true)?;
    for i in 0..8 {
        let x = op.add_input(&format!("x{}", i), 32, i % 3 == 0)?;
        if i % 2 == 0 {
            heap.add_signed_vector(&op, i, x)?;
        } else {
            heap.subtract_signed_vector(&op, i, x)?;
        }
    }
    heap.add_constant(5, 12_345)?;
    let result = heap.compress(&mut op, &catalog)?;

    let mut rng = StdRng::seed_from_u64(7);
    assert_eq!(check_conservation(&op, &heap, &result, 200, &mut rng)?, 200);
    Ok(())
}

#[test]
fn test_stage_count_bound() -> Result<()> {
    let ctx = context(GeneratorConfig::default());
    for count in [3usize, 8, 16, 33] {
        let mut op = Operator::new(&ctx, format!("bound_{}", count));
        let mut heap = op.new_bit_heap("h", 13, 0, false)?;
        for i in 0..count {
            let x = op.add_input(&format!("x{}", i), 8, false)?;
            heap.add_signed_vector(&op, 0, x)?;
        }
        let max_height = heap.max_height();
        let columns = heap.width() as usize;
        let result = heap.compress(&mut op, &Catalog::generic())?;

        let log = (usize::BITS - (max_height - 1).leading_zeros()) as usize;
        let bound = 4 * (log + 2) * columns;
        assert!(
            result.stages.len() <= bound,
            "{} stages for height {} over {} columns",
            result.stages.len(),
            max_height,
            columns
        );
        assert!(result.stats.rounds as usize <= 4 * (log + 2));
    }
    Ok(())
}

#[test]
fn test_generic_and_target_catalogs_agree() -> Result<()> {
    let mut totals = Vec::new();
    for use_specialized in [false, true] {
        let mut config = GeneratorConfig::for_target(Target::Virtex6);
        config.compression.use_specialized = use_specialized;
        let ctx = context(config);
        let catalog = target_catalog(&ctx);
        let mut op = Operator::new(&ctx, "agree");
        let mut heap = op.new_bit_heap("h", 9, 0, false)?;
        let mut ids = Vec::new();
        for i in 0..9 {
            let x = op.add_input(&format!("x{}", i), 6, false)?;
            heap.add_signed_vector(&op, 0, x)?;
            ids.push(x);
        }
        let result = heap.compress(&mut op, &catalog)?;
        let values = Simulator::new(&op).evaluate_ports(&[1, 2, 3, 4, 5, 6, 7, 8, 63])?;
        totals.push(result.value(&values));
        if use_specialized {
            assert!(result
                .stages
                .iter()
                .any(|s| s.kind == CompressorKind::Specialized));
        } else {
            assert!(result.stages.iter().all(|s| s.kind != CompressorKind::Specialized));
        }
    }
    assert_eq!(totals, vec![99, 99]);
    Ok(())
}

#[test]
fn test_pipelined_compression() -> Result<()> {
    // 666ps period: every full adder level opens a new cycle
    let ctx = context(GeneratorConfig::default().with_frequency(1500.0));
    let mut op = Operator::new(&ctx, "deep");
    let mut heap = op.new_bit_heap("h", 9, 0, false)?;
    for i in 0..12 {
        let x = op.add_input(&format!("x{}", i), 4, false)?;
        heap.add_signed_vector(&op, 0, x)?;
    }
    let result = heap.compress(&mut op, &Catalog::generic())?;

    assert!(result.stats.registers_inserted > 0);
    assert!(result.stats.added_cycles() > 0);
    assert_eq!(
        op.signal(result.sum)?.cycle(),
        op.signal(result.carry)?.cycle()
    );
    op.graph()
        .check_schedule(op.scheduler().period(), true)
        .map_err(anyhow::Error::msg)?;

    let mut rng = StdRng::seed_from_u64(3);
    check_conservation(&op, &heap, &result, 100, &mut rng)?;
    Ok(())
}

#[test]
fn test_compressor_slower_than_period() -> Result<()> {
    // 500ps period, full adders need 600ps
    let ctx = context(GeneratorConfig::default().with_frequency(2000.0));
    let mut op = Operator::new(&ctx, "too_fast");
    let mut heap = op.new_bit_heap("h", 3, 0, false)?;
    for i in 0..3 {
        let x = op.add_input(&format!("x{}", i), 2, false)?;
        heap.add_signed_vector(&op, 0, x)?;
    }

    match heap.compress(&mut op, &Catalog::generic()) {
        Err(GenError::InfeasibleTiming {
            operator,
            primitive,
            delay,
            period,
            ..
        }) => {
            assert_eq!(operator, "too_fast");
            assert_eq!(primitive, "fa_3_2");
            assert!(delay > period);
        }
        other => panic!("expected infeasible timing, got {:?}", other.map(|r| r.stats)),
    }
    Ok(())
}

#[test]
fn test_unpipelined_compression_stays_in_cycle_zero() -> Result<()> {
    let ctx = context(GeneratorConfig::default().with_frequency(2000.0).unpipelined());
    let mut op = Operator::new(&ctx, "flat");
    let mut heap = op.new_bit_heap("h", 7, 0, false)?;
    for i in 0..10 {
        let x = op.add_input(&format!("x{}", i), 3, false)?;
        heap.add_signed_vector(&op, 0, x)?;
    }
    let result = heap.compress(&mut op, &Catalog::generic())?;
    assert_eq!(result.stats.registers_inserted, 0);
    assert_eq!(result.stats.end_cycle, 0);
    assert!(op.signal(result.sum)?.arrival() > op.scheduler().period());
    Ok(())
}
