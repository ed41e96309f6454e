//! Bit heaps
//!
//! A [`BitHeap`] collects weighted bits from many sources (vectors, single
//! bits, constants, partial products) and reduces them to two rows whose sum
//! is the exact value of everything added, modulo `2^(msb - lsb + 1)`.
//!
//! # Negative contributions
//!
//! Columns only ever hold bits that count positively. A bit `b` that counts
//! negatively at weight `w` is stored as its complement and the difference
//! goes to a constant accumulator, using `-b = !b - 1`:
//!
//! ```text
//! -b * 2^w  =  !b * 2^w  -  2^w
//! ```
//!
//! The sign bit of a signed vector is such a negative bit, and subtracting a
//! vector flips the sign of every bit. The accumulated constant is a plain
//! `u128` modulo the heap width; its set bits are injected as constant-one
//! bits when compression starts, so they are reduced like any other bit.

mod compress;
mod product;

pub use compress::{CompressionResult, CompressionStage, CompressionStats};

use crate::error::{GenError, Result};
use crate::expr::BitSource;
use crate::operator::Operator;
use crate::schedule::Timing;
use crate::signal::{sign_extend, width_mask, BitRef, SignalId, MAX_SIGNAL_WIDTH};
use crate::simulate::SignalValues;

/// One bit waiting in a column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeapBit {
    pub source: BitSource,
    /// Timing of the signal the bit belongs to
    pub timing: Timing,
    /// Compression round that produced the bit (0 for contributions)
    pub round: u32,
}

/// Contribution log, kept to compute the exact expected value
#[derive(Debug, Clone, PartialEq)]
enum Contribution {
    Bit {
        weight: i32,
        bit: BitRef,
        negate: bool,
    },
    Vector {
        weight: i32,
        signal: SignalId,
        width: u32,
        signed: bool,
        negate: bool,
    },
    Constant {
        weight: i32,
        value: i128,
    },
    Product {
        weight: i32,
        a: (SignalId, u32, bool),
        b: (SignalId, u32, bool),
    },
}

/// Weighted columns of bits owned by one operator
#[derive(Debug, Clone)]
pub struct BitHeap {
    name: String,
    owner: String,
    msb: i32,
    lsb: i32,
    signed: bool,
    columns: Vec<Vec<HeapBit>>,
    /// Pending constant, relative to `lsb`, modulo the heap width
    constant: u128,
    contributions: Vec<Contribution>,
    compressed: bool,
}

impl Operator {
    /// Create a bit heap covering weights `lsb..=msb`
    pub fn new_bit_heap(&self, name: &str, msb: i32, lsb: i32, signed: bool) -> Result<BitHeap> {
        BitHeap::new(self, name, msb, lsb, signed)
    }
}

impl BitHeap {
    fn new(op: &Operator, name: &str, msb: i32, lsb: i32, signed: bool) -> Result<Self> {
        let width = i64::from(msb) - i64::from(lsb) + 1;
        if width < 1 || width > i64::from(MAX_SIGNAL_WIDTH) {
            return Err(GenError::Config(format!(
                "bit heap '{}' spans weights {}..={}, which must cover 1..={} columns",
                name, lsb, msb, MAX_SIGNAL_WIDTH
            )));
        }
        Ok(Self {
            name: name.to_string(),
            owner: op.name().to_string(),
            msb,
            lsb,
            signed,
            columns: vec![Vec::new(); width as usize],
            constant: 0,
            contributions: Vec::new(),
            compressed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn msb(&self) -> i32 {
        self.msb
    }

    pub fn lsb(&self) -> i32 {
        self.lsb
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Number of columns
    pub fn width(&self) -> u32 {
        self.columns.len() as u32
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Current column heights, LSB first (constants excluded until injection)
    pub fn heights(&self) -> Vec<usize> {
        self.columns.iter().map(Vec::len).collect()
    }

    pub fn max_height(&self) -> usize {
        self.columns.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Bits currently in the heap
    pub fn bit_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    /// Constant waiting to be injected, relative to `lsb`
    pub fn pending_constant(&self) -> u128 {
        self.constant
    }

    /// Bits currently at `weight`
    pub fn column(&self, weight: i32) -> Option<&[HeapBit]> {
        self.column_index(weight).map(|i| self.columns[i].as_slice())
    }

    // ========================================================================
    // Contributions
    // ========================================================================

    /// Add one bit at `weight`; with `negate` the bit is subtracted
    pub fn add_bit(&mut self, op: &Operator, weight: i32, bit: BitRef, negate: bool) -> Result<()> {
        self.check_access(op)?;
        let signal = op.signal(bit.signal)?;
        if bit.bit >= signal.width {
            return Err(GenError::Config(format!(
                "bit {} of '{}' is out of range (width {})",
                bit.bit, signal.name, signal.width
            )));
        }
        self.check_weight(weight)?;
        self.contributions.push(Contribution::Bit {
            weight,
            bit,
            negate,
        });
        self.push_bit(op, weight, bit, negate)
    }

    /// Add a vector with its LSB at `weight`, honouring its signedness
    pub fn add_signed_vector(&mut self, op: &Operator, weight: i32, signal: SignalId) -> Result<()> {
        self.add_vector(op, weight, signal, false)
    }

    /// Subtract a vector with its LSB at `weight`, honouring its signedness
    pub fn subtract_signed_vector(
        &mut self,
        op: &Operator,
        weight: i32,
        signal: SignalId,
    ) -> Result<()> {
        self.add_vector(op, weight, signal, true)
    }

    /// Add `value * 2^weight`
    pub fn add_constant(&mut self, weight: i32, value: i128) -> Result<()> {
        self.ensure_open()?;
        self.accumulate_constant(weight, value)?;
        self.contributions.push(Contribution::Constant { weight, value });
        Ok(())
    }

    /// Subtract `value * 2^weight`
    pub fn subtract_constant(&mut self, weight: i32, value: i128) -> Result<()> {
        self.add_constant(weight, value.wrapping_neg())
    }

    /// Exact value of everything added so far, relative to `lsb` and modulo
    /// the heap width, for one simulated assignment
    pub fn expected_value(&self, values: &SignalValues) -> u128 {
        let value_of = |id: SignalId, width: u32, signed: bool| -> i128 {
            let raw = values.get(id);
            if signed {
                sign_extend(raw, width)
            } else {
                raw as i128
            }
        };

        let mut total: u128 = 0;
        for contribution in &self.contributions {
            let (weight, term) = match contribution {
                Contribution::Bit {
                    weight,
                    bit,
                    negate,
                } => {
                    let v = i128::from(values.bit(*bit));
                    (*weight, if *negate { -v } else { v })
                }
                Contribution::Vector {
                    weight,
                    signal,
                    width,
                    signed,
                    negate,
                } => {
                    let v = value_of(*signal, *width, *signed);
                    (*weight, if *negate { v.wrapping_neg() } else { v })
                }
                Contribution::Constant { weight, value } => (*weight, *value),
                Contribution::Product { weight, a, b } => {
                    let va = value_of(a.0, a.1, a.2);
                    let vb = value_of(b.0, b.1, b.2);
                    (*weight, va.wrapping_mul(vb))
                }
            };
            let shift = i64::from(weight) - i64::from(self.lsb);
            total = total.wrapping_add(scale(term, shift));
        }
        total & width_mask(self.width())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn add_vector(&mut self, op: &Operator, weight: i32, signal: SignalId, negate: bool) -> Result<()> {
        self.check_access(op)?;
        let s = op.signal(signal)?;
        let (width, signed) = (s.width, s.signed);
        self.check_weight(weight)?;
        self.contributions.push(Contribution::Vector {
            weight,
            signal,
            width,
            signed,
            negate,
        });
        self.push_vector(op, weight, signal, negate)
    }

    /// Place every bit of a vector; its sign bit counts negatively
    fn push_vector(&mut self, op: &Operator, weight: i32, signal: SignalId, negate: bool) -> Result<()> {
        let s = op.signal(signal)?;
        let (width, signed) = (s.width, s.signed);
        for i in 0..width {
            let sign_bit = signed && i == width - 1;
            self.push_bit(op, weight + i as i32, BitRef::new(signal, i), negate ^ sign_bit)?;
        }
        Ok(())
    }

    /// Place one bit; a negative bit is stored complemented
    fn push_bit(&mut self, op: &Operator, weight: i32, bit: BitRef, negative: bool) -> Result<()> {
        let Some(index) = self.column_index(weight) else {
            // Above the MSB: a multiple of 2^width
            return Ok(());
        };
        let timing = op.signal(bit.signal)?.timing;
        let source = if negative {
            self.accumulate_constant(weight, -1)?;
            BitSource::Inverted(bit)
        } else {
            BitSource::Bit(bit)
        };
        self.columns[index].push(HeapBit {
            source,
            timing,
            round: 0,
        });
        Ok(())
    }

    fn accumulate_constant(&mut self, weight: i32, value: i128) -> Result<()> {
        if value == 0 {
            return Ok(());
        }
        let shift = i64::from(weight) - i64::from(self.lsb);
        if shift < 0 && i64::from(value.trailing_zeros()) < -shift {
            return Err(GenError::Config(format!(
                "constant {} * 2^{} has bits below the LSB {} of bit heap '{}'",
                value, weight, self.lsb, self.name
            )));
        }
        self.constant = self.constant.wrapping_add(scale(value, shift)) & width_mask(self.width());
        Ok(())
    }

    fn column_index(&self, weight: i32) -> Option<usize> {
        if weight < self.lsb || weight > self.msb {
            None
        } else {
            Some((weight - self.lsb) as usize)
        }
    }

    fn check_weight(&self, weight: i32) -> Result<()> {
        if weight < self.lsb {
            return Err(GenError::Config(format!(
                "weight {} is below the LSB {} of bit heap '{}'",
                weight, self.lsb, self.name
            )));
        }
        Ok(())
    }

    fn check_access(&self, op: &Operator) -> Result<()> {
        if op.name() != self.owner {
            return Err(GenError::Config(format!(
                "bit heap '{}' belongs to operator '{}', not '{}'",
                self.name,
                self.owner,
                op.name()
            )));
        }
        self.ensure_open()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.compressed {
            return Err(GenError::Config(format!(
                "bit heap '{}' is already compressed",
                self.name
            )));
        }
        Ok(())
    }
}

/// `term * 2^shift` modulo 2^128; a negative shift must be exact
fn scale(term: i128, shift: i64) -> u128 {
    if shift < 0 {
        (term >> (-shift).min(127)) as u128
    } else if shift >= 128 {
        0
    } else {
        (term as u128) << shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;
    use crate::context::BuildContext;

    fn operator(name: &str) -> Operator {
        Operator::new(&BuildContext::new(GeneratorConfig::default()).unwrap(), name)
    }

    #[test]
    fn test_heap_range() {
        let op = operator("range");
        assert!(op.new_bit_heap("h", 7, 0, false).is_ok());
        assert!(op.new_bit_heap("h", 3, -4, true).is_ok());
        assert!(op.new_bit_heap("h", -1, 0, false).is_err());
        assert!(op.new_bit_heap("h", 128, 0, false).is_err());
    }

    #[test]
    fn test_vector_heights() {
        let mut op = operator("heights");
        let a = op.add_input("a", 4, false).unwrap();
        let b = op.add_input("b", 4, false).unwrap();
        let mut heap = op.new_bit_heap("h", 6, 0, false).unwrap();
        heap.add_signed_vector(&op, 0, a).unwrap();
        heap.add_signed_vector(&op, 2, b).unwrap();

        assert_eq!(heap.heights(), vec![1, 1, 2, 2, 1, 1, 0]);
        assert_eq!(heap.max_height(), 2);
        assert_eq!(heap.pending_constant(), 0);
    }

    #[test]
    fn test_signed_vector_compensation() {
        let mut op = operator("signed");
        let s = op.add_input("s", 4, true).unwrap();
        let mut heap = op.new_bit_heap("h", 7, 0, true).unwrap();
        heap.add_signed_vector(&op, 0, s).unwrap();

        // -2^3 modulo 2^8
        assert_eq!(heap.pending_constant(), 0xf8);
        let sign = heap.column(3).unwrap();
        assert!(matches!(sign[0].source, BitSource::Inverted(_)));
    }

    #[test]
    fn test_subtract_unsigned_compensation() {
        let mut op = operator("sub");
        let u = op.add_input("u", 4, false).unwrap();
        let mut heap = op.new_bit_heap("h", 7, 0, false).unwrap();
        heap.subtract_signed_vector(&op, 0, u).unwrap();

        // 1 - 2^4 modulo 2^8
        assert_eq!(heap.pending_constant(), 0xf1);
        assert!(heap
            .column(0)
            .unwrap()
            .iter()
            .all(|b| matches!(b.source, BitSource::Inverted(_))));
    }

    #[test]
    fn test_constants_cancel() {
        let op = operator("consts");
        let mut heap = op.new_bit_heap("h", 7, 0, false).unwrap();
        heap.add_constant(0, 5).unwrap();
        heap.add_constant(0, -5).unwrap();
        assert_eq!(heap.pending_constant(), 0);
        heap.subtract_constant(2, 3).unwrap();
        assert_eq!(heap.pending_constant(), (256 - 12) as u128);
    }

    #[test]
    fn test_fractional_constants() {
        let op = operator("frac");
        let mut heap = op.new_bit_heap("h", 3, -2, false).unwrap();
        // 4 * 2^-3 = 2^-1, exact at lsb -2
        heap.add_constant(-3, 4).unwrap();
        assert_eq!(heap.pending_constant(), 0b10);
        assert!(heap.add_constant(-3, 1).is_err());
    }

    #[test]
    fn test_bits_above_msb_dropped() {
        let mut op = operator("drop");
        let a = op.add_input("a", 8, false).unwrap();
        let mut heap = op.new_bit_heap("h", 3, 0, false).unwrap();
        heap.add_signed_vector(&op, 0, a).unwrap();
        assert_eq!(heap.heights(), vec![1, 1, 1, 1]);
        assert!(heap.add_signed_vector(&op, -1, a).is_err());
    }

    #[test]
    fn test_heap_belongs_to_owner() {
        let mut op = operator("owner");
        let mut other = operator("other");
        let a = other.add_input("a", 2, false).unwrap();
        op.add_input("a", 2, false).unwrap();
        let mut heap = op.new_bit_heap("h", 3, 0, false).unwrap();
        assert!(matches!(
            heap.add_signed_vector(&other, 0, a),
            Err(GenError::Config(_))
        ));
    }

    #[test]
    fn test_add_bit_validation() {
        let mut op = operator("bits");
        let a = op.add_input("a", 2, false).unwrap();
        let mut heap = op.new_bit_heap("h", 3, 0, false).unwrap();
        assert!(heap.add_bit(&op, 0, BitRef::new(a, 2), false).is_err());
        heap.add_bit(&op, 1, BitRef::new(a, 1), true).unwrap();
        assert_eq!(heap.pending_constant(), 0b1110);
        assert_eq!(heap.heights(), vec![0, 1, 0, 0]);
    }
}
