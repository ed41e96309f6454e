//! Expressions computing signal values
//!
//! The expression set is closed: every value the generator can produce is
//! one of these variants, so the simulator and the netlist view can walk a
//! finished graph without knowing which builder created each signal.

use crate::graph::SignalGraph;
use crate::signal::{BitRef, SignalId};
use serde::{Deserialize, Serialize};

/// A single bit feeding a bit-level expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitSource {
    Bit(BitRef),
    Inverted(BitRef),
    One,
    Zero,
}

impl BitSource {
    /// Signal read by this bit, if any
    pub fn signal(&self) -> Option<SignalId> {
        match self {
            Self::Bit(b) | Self::Inverted(b) => Some(b.signal),
            Self::One | Self::Zero => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Self::One | Self::Zero)
    }

    fn render(&self, graph: &SignalGraph) -> String {
        match self {
            Self::Bit(b) => render_bit(b, graph),
            Self::Inverted(b) => format!("~{}", render_bit(b, graph)),
            Self::One => "1".to_string(),
            Self::Zero => "0".to_string(),
        }
    }
}

/// Word-level binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
        }
    }
}

/// How a signal's value is computed
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Primary input
    Input,
    /// Constant bit pattern
    Constant(u128),
    /// Concatenation, LSB first
    Bits(Vec<BitSource>),
    /// Sum of column populations: `sum(popcount(columns[i]) << i)`
    Compress {
        compressor: String,
        columns: Vec<Vec<BitSource>>,
    },
    /// Binary operation on two signals (operands extended per signedness)
    Binary {
        op: BinOp,
        lhs: SignalId,
        rhs: SignalId,
    },
    /// `vector` if the select bit is set, zero otherwise
    PartialProduct { vector: SignalId, select: BitRef },
    /// Bits `lo..lo + width` of a source
    Slice { source: SignalId, lo: u32 },
    /// The source value, carried `cycles` register stages later
    Delay { source: SignalId, cycles: u32 },
    /// Same value under another name
    Alias(SignalId),
    /// Output port of an instantiated sub-operator
    Instance {
        instance: String,
        component: String,
        port: String,
        inputs: Vec<SignalId>,
    },
}

impl Expr {
    /// Signals read by this expression, in first-use order, without repeats
    pub fn upstream(&self) -> Vec<SignalId> {
        let mut out: Vec<SignalId> = Vec::new();
        let mut push = |id: SignalId| {
            if !out.contains(&id) {
                out.push(id);
            }
        };
        match self {
            Self::Input | Self::Constant(_) => {}
            Self::Bits(bits) => bits.iter().filter_map(BitSource::signal).for_each(&mut push),
            Self::Compress { columns, .. } => columns
                .iter()
                .flatten()
                .filter_map(BitSource::signal)
                .for_each(&mut push),
            Self::Binary { lhs, rhs, .. } => {
                push(*lhs);
                push(*rhs);
            }
            Self::PartialProduct { vector, select } => {
                push(*vector);
                push(select.signal);
            }
            Self::Slice { source, .. } | Self::Delay { source, .. } | Self::Alias(source) => {
                push(*source)
            }
            Self::Instance { inputs, .. } => inputs.iter().copied().for_each(&mut push),
        }
        out
    }

    /// Short operation name used in diagnostics
    pub fn primitive_name(&self) -> String {
        match self {
            Self::Input => "input".to_string(),
            Self::Constant(_) => "constant".to_string(),
            Self::Bits(_) => "concat".to_string(),
            Self::Compress { compressor, .. } => compressor.clone(),
            Self::Binary { op, .. } => format!("{:?}", op).to_lowercase(),
            Self::PartialProduct { .. } => "partial_product".to_string(),
            Self::Slice { .. } => "slice".to_string(),
            Self::Delay { .. } => "delay".to_string(),
            Self::Alias(_) => "alias".to_string(),
            Self::Instance { component, .. } => component.clone(),
        }
    }

    /// Neutral textual rendering for netlist records
    pub fn render(&self, graph: &SignalGraph, width: u32) -> String {
        let name = |id: &SignalId| graph.name_of(*id).to_string();
        match self {
            Self::Input => "input".to_string(),
            Self::Constant(value) => format!("{}'h{:x}", width, value),
            Self::Bits(bits) => {
                let parts: Vec<String> = bits.iter().rev().map(|b| b.render(graph)).collect();
                format!("{{{}}}", parts.join(", "))
            }
            Self::Compress {
                compressor,
                columns,
            } => {
                let cols: Vec<String> = columns
                    .iter()
                    .map(|col| {
                        let bits: Vec<String> = col.iter().map(|b| b.render(graph)).collect();
                        format!("[{}]", bits.join(", "))
                    })
                    .collect();
                format!("{}({})", compressor, cols.join(", "))
            }
            Self::Binary { op, lhs, rhs } => {
                format!("{} {} {}", name(lhs), op.symbol(), name(rhs))
            }
            Self::PartialProduct { vector, select } => {
                format!("{} & {}", name(vector), render_bit(select, graph))
            }
            Self::Slice { source, lo } => {
                format!("{}[{}:{}]", name(source), lo + width.saturating_sub(1), lo)
            }
            Self::Delay { source, cycles } => format!("delay({}, {})", name(source), cycles),
            Self::Alias(source) => name(source),
            Self::Instance { instance, port, .. } => format!("{}.{}", instance, port),
        }
    }
}

fn render_bit(bit: &BitRef, graph: &SignalGraph) -> String {
    format!("{}[{}]", graph.name_of(bit.signal), bit.bit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_deduplicates() {
        let a = SignalId(0);
        let b = SignalId(1);
        let expr = Expr::Compress {
            compressor: "fa".to_string(),
            columns: vec![vec![
                BitSource::Bit(BitRef::new(a, 0)),
                BitSource::Inverted(BitRef::new(b, 0)),
                BitSource::Bit(BitRef::new(a, 1)),
                BitSource::One,
            ]],
        };
        assert_eq!(expr.upstream(), vec![a, b]);
    }

    #[test]
    fn test_upstream_of_leaves() {
        assert!(Expr::Input.upstream().is_empty());
        assert!(Expr::Constant(3).upstream().is_empty());
        assert!(Expr::Bits(vec![BitSource::One, BitSource::Zero])
            .upstream()
            .is_empty());
    }

    #[test]
    fn test_primitive_names() {
        let expr = Expr::Binary {
            op: BinOp::Add,
            lhs: SignalId(0),
            rhs: SignalId(1),
        };
        assert_eq!(expr.primitive_name(), "add");
        assert_eq!(
            Expr::Delay {
                source: SignalId(0),
                cycles: 2
            }
            .primitive_name(),
            "delay"
        );
    }
}
