//! Netlist records of a finalized operator
//!
//! The read-only view an HDL emitter consumes: ports, then every signal in
//! emission order (topological, grouped by cycle) with its width,
//! signedness, cycle and a neutral rendering of its expression. Building
//! the records never mutates the operator.

use crate::error::{GenError, Result};
use crate::operator::Operator;
use crate::signal::{Signal, SignalKind};
use crate::TimePs;
use opgen_cost::Target;
use serde::Serialize;

/// An input or output port
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortRecord {
    pub name: String,
    pub width: u32,
    pub signed: bool,
    pub cycle: u32,
}

/// One signal of the netlist
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalRecord {
    pub name: String,
    pub width: u32,
    pub signed: bool,
    pub kind: SignalKind,
    pub cycle: u32,
    pub arrival_ps: TimePs,
    /// Names of the signals read by the expression
    pub upstream: Vec<String>,
    pub expression: String,
}

/// Emitter view of a finalized operator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorNetlist {
    pub name: String,
    pub target: Target,
    pub period_ps: TimePs,
    pub latency: u32,
    pub inputs: Vec<PortRecord>,
    pub outputs: Vec<PortRecord>,
    pub signals: Vec<SignalRecord>,
    /// Names of instantiated components
    pub components: Vec<String>,
}

impl OperatorNetlist {
    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GenError::Config(format!("netlist of '{}': {}", self.name, e)))
    }

    pub fn signal(&self, name: &str) -> Option<&SignalRecord> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Signals of one pipeline stage
    pub fn stage(&self, cycle: u32) -> impl Iterator<Item = &SignalRecord> {
        self.signals.iter().filter(move |s| s.cycle == cycle)
    }

    /// Number of signals of a kind
    pub fn count(&self, kind: SignalKind) -> usize {
        self.signals.iter().filter(|s| s.kind == kind).count()
    }
}

fn port(signal: &Signal) -> PortRecord {
    PortRecord {
        name: signal.name.clone(),
        width: signal.width,
        signed: signal.signed,
        cycle: signal.timing.cycle,
    }
}

impl Operator {
    /// Netlist records; the operator must be finalized
    pub fn netlist(&self) -> Result<OperatorNetlist> {
        if !self.is_finalized() {
            return Err(GenError::Config(format!(
                "operator '{}' must be finalized before emission",
                self.name()
            )));
        }
        let graph = self.graph();
        let order = graph.emission_order(self.name())?;

        let mut signals = Vec::with_capacity(order.len());
        for id in order {
            let signal = self.signal(id)?;
            signals.push(SignalRecord {
                name: signal.name.clone(),
                width: signal.width,
                signed: signal.signed,
                kind: signal.kind,
                cycle: signal.timing.cycle,
                arrival_ps: signal.timing.arrival,
                upstream: signal
                    .upstream
                    .iter()
                    .map(|u| graph.name_of(*u).to_string())
                    .collect(),
                expression: signal.expr.render(graph, signal.width),
            });
        }

        Ok(OperatorNetlist {
            name: self.name().to_string(),
            target: self.cost_model().target(),
            period_ps: self.scheduler().period(),
            latency: self.latency(),
            inputs: self
                .inputs()
                .iter()
                .map(|id| self.signal(*id).map(port))
                .collect::<Result<_>>()?,
            outputs: self
                .outputs()
                .iter()
                .map(|id| self.signal(*id).map(port))
                .collect::<Result<_>>()?,
            signals,
            components: self.components().keys().cloned().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;
    use crate::context::BuildContext;
    use crate::expr::{BinOp, Expr};

    fn adder() -> Operator {
        let ctx = BuildContext::new(GeneratorConfig::default().with_frequency(1000.0)).unwrap();
        let mut op = Operator::new(&ctx, "adder");
        let a = op.add_input("a", 8, false).unwrap();
        let b = op.add_input("b", 8, false).unwrap();
        let s0 = op
            .declare(
                "s",
                Expr::Binary {
                    op: BinOp::Add,
                    lhs: a,
                    rhs: b,
                },
                9,
                false,
                700.0,
            )
            .unwrap();
        let s1 = op
            .declare(
                "s",
                Expr::Binary {
                    op: BinOp::Add,
                    lhs: s0,
                    rhs: a,
                },
                9,
                false,
                700.0,
            )
            .unwrap();
        op.add_output("r", s1).unwrap();
        op
    }

    #[test]
    fn test_netlist_requires_finalize() {
        let mut op = adder();
        assert!(op.netlist().is_err());
        op.finalize().unwrap();
        assert!(op.netlist().is_ok());
    }

    #[test]
    fn test_netlist_records() {
        let mut op = adder();
        op.finalize().unwrap();
        let netlist = op.netlist().unwrap();

        assert_eq!(netlist.latency, 1);
        assert_eq!(netlist.inputs.len(), 2);
        assert_eq!(netlist.outputs[0].name, "r");
        assert_eq!(netlist.outputs[0].cycle, 1);
        assert_eq!(netlist.stage(1).count(), 2);

        let r = netlist.signal("r").unwrap();
        assert_eq!(r.kind, SignalKind::Output);
        assert_eq!(r.upstream.len(), 1);

        // Cycles never decrease along the emission order
        let cycles: Vec<u32> = netlist.signals.iter().map(|s| s.cycle).collect();
        assert!(cycles.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_netlist_json() {
        let mut op = adder();
        op.finalize().unwrap();
        let json = op.netlist().unwrap().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["name"], "adder");
        assert_eq!(value["target"], "generic");
        assert_eq!(value["outputs"][0]["name"], "r");
    }
}
