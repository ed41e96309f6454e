//! Signal graph
//!
//! Append-only arena of the signals of one operator. Signals can only be
//! built from signals that already exist, so insertion order is always a
//! valid topological order; the petgraph view is used to produce an
//! emission order grouped by pipeline stage.

use crate::error::{GenError, Result};
use crate::schedule::Timing;
use crate::signal::{Signal, SignalId};
use crate::TimePs;
use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

/// Tolerance for floating point timing comparisons
const TIME_EPSILON: TimePs = 1e-6;

/// All signals of one operator
#[derive(Debug, Clone, Default)]
pub struct SignalGraph {
    signals: Vec<Signal>,
    by_name: IndexMap<String, SignalId>,
}

impl SignalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next added signal will get
    pub fn next_id(&self) -> SignalId {
        SignalId(self.signals.len())
    }

    /// Append a signal; its id must be [`next_id`](Self::next_id)
    pub fn add(&mut self, signal: Signal) -> Result<SignalId> {
        let id = self.next_id();
        if signal.id != id {
            return Err(GenError::Config(format!(
                "signal '{}' declared with id {} but next id is {}",
                signal.name, signal.id, id
            )));
        }
        if self.by_name.contains_key(&signal.name) {
            return Err(GenError::Config(format!(
                "signal name '{}' is already declared",
                signal.name
            )));
        }
        if let Some(bad) = signal.upstream.iter().find(|u| u.0 >= id.0) {
            return Err(GenError::Config(format!(
                "signal '{}' depends on undeclared signal {}",
                signal.name, bad
            )));
        }
        self.by_name.insert(signal.name.clone(), id);
        self.signals.push(signal);
        Ok(id)
    }

    pub fn get(&self, id: SignalId) -> Option<&Signal> {
        self.signals.get(id.0)
    }

    /// Get a signal, reporting unknown ids as configuration errors
    pub fn signal(&self, id: SignalId) -> Result<&Signal> {
        self.get(id)
            .ok_or_else(|| GenError::Config(format!("unknown signal {}", id)))
    }

    pub fn lookup(&self, name: &str) -> Option<SignalId> {
        self.by_name.get(name).copied()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Name of a signal, or `?` for unknown ids
    pub fn name_of(&self, id: SignalId) -> &str {
        self.get(id).map(|s| s.name.as_str()).unwrap_or("?")
    }

    pub fn timing(&self, id: SignalId) -> Option<Timing> {
        self.get(id).map(|s| s.timing)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter()
    }

    /// Dependency graph with an edge from every upstream to its consumer
    pub fn dependency_graph(&self) -> DiGraph<SignalId, ()> {
        let mut graph = DiGraph::with_capacity(self.signals.len(), self.signals.len());
        let nodes: Vec<NodeIndex> = self.signals.iter().map(|s| graph.add_node(s.id)).collect();
        for signal in &self.signals {
            for up in &signal.upstream {
                graph.add_edge(nodes[up.0], nodes[signal.id.0], ());
            }
        }
        graph
    }

    /// Topological order grouped by cycle
    ///
    /// Cycles never decrease along a dependency edge, so a stable sort of a
    /// topological order by cycle is still topological. `operator` names the
    /// owning operator in a loop error.
    pub fn emission_order(&self, operator: &str) -> Result<Vec<SignalId>> {
        let graph = self.dependency_graph();
        let order = toposort(&graph, None).map_err(|cycle| {
            GenError::invariant(
                operator,
                format!("combinational loop through signal {}", graph[cycle.node_id()]),
            )
        })?;
        let mut ids: Vec<SignalId> = order.into_iter().map(|n| graph[n]).collect();
        ids.sort_by_key(|id| self.signals[id.0].timing.cycle);
        Ok(ids)
    }

    /// Check the scheduling invariants of every signal
    ///
    /// - a signal's cycle is at least the cycle of each upstream
    /// - in the same cycle, its arrival is at least the upstream arrival
    /// - in pipelined mode, no arrival exceeds the period
    pub fn check_schedule(&self, period: TimePs, pipelined: bool) -> std::result::Result<(), String> {
        for signal in &self.signals {
            if pipelined && signal.timing.arrival > period + TIME_EPSILON {
                return Err(format!(
                    "signal '{}' arrives at {:.1}ps, beyond the {:.1}ps period",
                    signal.name, signal.timing.arrival, period
                ));
            }
            for up in &signal.upstream {
                let upstream = &self.signals[up.0];
                if upstream.timing.cycle > signal.timing.cycle {
                    return Err(format!(
                        "signal '{}' (cycle {}) precedes its upstream '{}' (cycle {})",
                        signal.name, signal.timing.cycle, upstream.name, upstream.timing.cycle
                    ));
                }
                if upstream.timing.cycle == signal.timing.cycle
                    && upstream.timing.arrival > signal.timing.arrival + TIME_EPSILON
                {
                    return Err(format!(
                        "signal '{}' arrives at {:.1}ps before its upstream '{}' at {:.1}ps",
                        signal.name, signal.timing.arrival, upstream.name, upstream.timing.arrival
                    ));
                }
            }
        }
        Ok(())
    }
}
