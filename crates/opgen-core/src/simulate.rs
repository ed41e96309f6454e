//! Functional simulation of a signal graph
//!
//! Evaluates every signal of an operator for one input assignment, ignoring
//! cycles: a registered value equals its source. Components are evaluated
//! recursively, once per instance.

use crate::error::{GenError, Result};
use crate::expr::{BinOp, BitSource, Expr};
use crate::operator::Operator;
use crate::signal::{sign_extend, width_mask, BitRef, Signal, SignalId};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Values of all signals of one operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalValues {
    values: Vec<u128>,
}

impl SignalValues {
    /// Value of a signal (zero for unknown ids)
    pub fn get(&self, id: SignalId) -> u128 {
        self.values.get(id.0).copied().unwrap_or(0)
    }

    pub fn bit(&self, bit: BitRef) -> bool {
        (self.get(bit.signal) >> bit.bit) & 1 == 1
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Evaluator bound to one operator
#[derive(Debug, Clone, Copy)]
pub struct Simulator<'a> {
    op: &'a Operator,
}

impl<'a> Simulator<'a> {
    pub fn new(op: &'a Operator) -> Self {
        Self { op }
    }

    /// Evaluate with inputs given by name; values are truncated to the port width
    pub fn evaluate(&self, inputs: &IndexMap<String, u128>) -> Result<SignalValues> {
        for name in inputs.keys() {
            let known = self
                .op
                .inputs()
                .iter()
                .any(|id| self.op.graph().name_of(*id) == name);
            if !known {
                return Err(GenError::Config(format!(
                    "operator '{}' has no input '{}'",
                    self.op.name(),
                    name
                )));
            }
        }
        let ordered = self
            .op
            .inputs()
            .iter()
            .map(|id| {
                let name = self.op.graph().name_of(*id);
                inputs.get(name).copied().ok_or_else(|| {
                    GenError::Config(format!(
                        "missing value for input '{}' of '{}'",
                        name,
                        self.op.name()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.evaluate_ports(&ordered)
    }

    /// Evaluate with input values in declaration order
    pub fn evaluate_ports(&self, inputs: &[u128]) -> Result<SignalValues> {
        if inputs.len() != self.op.inputs().len() {
            return Err(GenError::Config(format!(
                "operator '{}' has {} inputs, got {} values",
                self.op.name(),
                self.op.inputs().len(),
                inputs.len()
            )));
        }

        let graph = self.op.graph();
        let mut values = vec![0u128; graph.len()];
        let mut next_input = inputs.iter();
        let mut instances: HashMap<String, SignalValues> = HashMap::new();

        for signal in graph.iter() {
            let value = match &signal.expr {
                Expr::Input => next_input.next().copied().unwrap_or(0),
                Expr::Instance {
                    instance,
                    component,
                    port,
                    inputs,
                } => {
                    if !instances.contains_key(instance) {
                        let sub = self.op.components().get(component).ok_or_else(|| {
                            GenError::invariant(
                                self.op.name(),
                                format!("instance '{}' of unknown component '{}'", instance, component),
                            )
                        })?;
                        let args: Vec<u128> = inputs.iter().map(|id| values[id.0]).collect();
                        let result = Simulator::new(sub).evaluate_ports(&args)?;
                        instances.insert(instance.clone(), result);
                    }
                    let sub = &self.op.components()[component.as_str()];
                    let port_id = sub.graph().lookup(port).ok_or_else(|| {
                        GenError::invariant(
                            self.op.name(),
                            format!("component '{}' has no port '{}'", component, port),
                        )
                    })?;
                    instances[instance].get(port_id)
                }
                expr => self.eval(expr, signal, &values)?,
            };
            values[signal.id.0] = value & signal.mask();
        }
        Ok(SignalValues { values })
    }

    /// Values of the output ports, by name
    pub fn outputs(&self, inputs: &[u128]) -> Result<IndexMap<String, u128>> {
        let values = self.evaluate_ports(inputs)?;
        Ok(self
            .op
            .outputs()
            .iter()
            .map(|id| (self.op.graph().name_of(*id).to_string(), values.get(*id)))
            .collect())
    }

    fn eval(&self, expr: &Expr, signal: &Signal, values: &[u128]) -> Result<u128> {
        let bit = |source: &BitSource| -> u128 {
            match source {
                BitSource::Bit(b) => (values[b.signal.0] >> b.bit) & 1,
                BitSource::Inverted(b) => !(values[b.signal.0] >> b.bit) & 1,
                BitSource::One => 1,
                BitSource::Zero => 0,
            }
        };
        let value = match expr {
            Expr::Constant(v) => *v,
            Expr::Bits(bits) => bits
                .iter()
                .enumerate()
                .fold(0u128, |acc, (i, b)| acc | (bit(b) << i)),
            Expr::Compress { columns, .. } => {
                columns.iter().enumerate().fold(0u128, |acc, (i, column)| {
                    let count: u128 = column.iter().map(bit).sum();
                    acc.wrapping_add(count << i)
                })
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.extended(*lhs, values)?;
                let r = self.extended(*rhs, values)?;
                match op {
                    BinOp::Add => l.wrapping_add(r),
                    BinOp::Sub => l.wrapping_sub(r),
                    BinOp::Mul => l.wrapping_mul(r),
                    BinOp::And => l & r,
                    BinOp::Or => l | r,
                    BinOp::Xor => l ^ r,
                }
            }
            Expr::PartialProduct { vector, select } => {
                if (values[select.signal.0] >> select.bit) & 1 == 1 {
                    values[vector.0]
                } else {
                    0
                }
            }
            Expr::Slice { source, lo } => values[source.0] >> lo,
            Expr::Delay { source, .. } | Expr::Alias(source) => values[source.0],
            Expr::Input | Expr::Instance { .. } => {
                return Err(GenError::invariant(
                    self.op.name(),
                    format!("'{}' cannot be evaluated as a plain expression", signal.name),
                ))
            }
        };
        Ok(value)
    }

    /// Operand value extended to 128 bits per its signedness
    fn extended(&self, id: SignalId, values: &[u128]) -> Result<u128> {
        let signal = self.op.signal(id)?;
        let raw = values[id.0] & width_mask(signal.width);
        Ok(if signal.signed {
            sign_extend(raw, signal.width) as u128
        } else {
            raw
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;
    use crate::context::BuildContext;
    use std::sync::Arc;

    fn context() -> BuildContext {
        BuildContext::new(GeneratorConfig::default()).unwrap()
    }

    #[test]
    fn test_binary_extension() {
        let mut op = Operator::new(&context(), "ext");
        let a = op.add_input("a", 4, true).unwrap();
        let b = op.add_input("b", 4, false).unwrap();
        let sum = op
            .declare(
                "sum",
                Expr::Binary {
                    op: BinOp::Add,
                    lhs: a,
                    rhs: b,
                },
                8,
                true,
                10.0,
            )
            .unwrap();

        // -2 + 15
        let values = Simulator::new(&op).evaluate_ports(&[0b1110, 15]).unwrap();
        assert_eq!(sign_extend(values.get(sum), 8), 13);
    }

    #[test]
    fn test_compress_expression() {
        let mut op = Operator::new(&context(), "cmp");
        let a = op.add_input("a", 3, false).unwrap();
        let fa = op
            .declare(
                "fa",
                Expr::Compress {
                    compressor: "fa_3_2".to_string(),
                    columns: vec![vec![
                        BitSource::Bit(BitRef::new(a, 0)),
                        BitSource::Bit(BitRef::new(a, 1)),
                        BitSource::Inverted(BitRef::new(a, 2)),
                    ]],
                },
                2,
                false,
                100.0,
            )
            .unwrap();
        let sim = Simulator::new(&op);
        assert_eq!(sim.evaluate_ports(&[0b011]).unwrap().get(fa), 3);
        assert_eq!(sim.evaluate_ports(&[0b100]).unwrap().get(fa), 0);
    }

    #[test]
    fn test_inputs_by_name() {
        let mut op = Operator::new(&context(), "named");
        let a = op.add_input("a", 4, false).unwrap();
        let sim = Simulator::new(&op);

        let mut inputs = IndexMap::new();
        inputs.insert("a".to_string(), 0x1f);
        assert_eq!(sim.evaluate(&inputs).unwrap().get(a), 0xf);

        inputs.insert("zz".to_string(), 1);
        assert!(sim.evaluate(&inputs).is_err());
        assert!(sim.evaluate(&IndexMap::new()).is_err());
    }

    #[test]
    fn test_nested_component() {
        let ctx = context();
        let mut inner = Operator::new(&ctx, "double");
        let x = inner.add_input("x", 8, false).unwrap();
        let d = inner
            .declare(
                "d",
                Expr::Binary {
                    op: BinOp::Add,
                    lhs: x,
                    rhs: x,
                },
                8,
                false,
                100.0,
            )
            .unwrap();
        inner.add_output("y", d).unwrap();
        inner.finalize().unwrap();
        let inner = Arc::new(inner);

        let mut outer = Operator::new(&ctx, "quad");
        let a = outer.add_input("a", 8, false).unwrap();
        let first = outer.instantiate("u", Arc::clone(&inner), &[a]).unwrap();
        let second = outer.instantiate("u", inner, &first).unwrap();
        outer.add_output("r", second[0]).unwrap();
        outer.finalize().unwrap();

        let out = Simulator::new(&outer).outputs(&[5]).unwrap();
        assert_eq!(out["r"], 20);
    }
}
