//! Operators
//!
//! An [`Operator`] is a named sub-circuit under construction. Signals are
//! declared one by one; each declaration goes through the [`Scheduler`],
//! which decides its cycle and arrival time on the spot. Once all outputs
//! are defined the operator is finalized: outputs are aligned to a common
//! latency and the graph is frozen for the netlist view and for use as a
//! component of other operators.
//!
//! # Example
//!
//! ```ignore
//! let ctx = BuildContext::new(GeneratorConfig::default())?;
//! let mut op = Operator::new(&ctx, "adder");
//! let a = op.add_input("a", 16, false)?;
//! let b = op.add_input("b", 16, false)?;
//! let sum = op.declare_op(
//!     "sum",
//!     Expr::Binary { op: BinOp::Add, lhs: a, rhs: b },
//!     17,
//!     false,
//!     OpKind::Adder,
//!     &[17],
//! )?;
//! op.add_output("r", sum)?;
//! op.finalize()?;
//! ```

use crate::config::GeneratorConfig;
use crate::context::{BuildContext, UniqueNames};
use crate::error::{GenError, Result};
use crate::expr::{BitSource, Expr};
use crate::graph::SignalGraph;
use crate::schedule::{ScheduleStats, Scheduler, Timing};
use crate::signal::{BitRef, Signal, SignalId, SignalKind, MAX_SIGNAL_WIDTH};
use crate::TimePs;
use indexmap::IndexMap;
use opgen_cost::{CostModel, OpKind};
use std::sync::Arc;
use tracing::{debug, info};

/// A sub-circuit under construction
#[derive(Debug)]
pub struct Operator {
    name: String,
    ctx: BuildContext,
    scheduler: Scheduler,
    graph: SignalGraph,
    inputs: Vec<SignalId>,
    outputs: Vec<SignalId>,
    pending_outputs: Vec<(String, SignalId)>,
    components: IndexMap<String, Arc<Operator>>,
    latency: u32,
    finalized: bool,
    stats: ScheduleStats,
}

impl Operator {
    /// Create an empty operator scheduled for the context's clock period
    pub fn new(ctx: &BuildContext, name: impl Into<String>) -> Self {
        let config = ctx.config();
        Self {
            name: name.into(),
            ctx: ctx.clone(),
            scheduler: Scheduler::new(config.period_ps(), config.pipeline),
            graph: SignalGraph::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            pending_outputs: Vec::new(),
            components: IndexMap::new(),
            latency: 0,
            finalized: false,
            stats: ScheduleStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    pub fn config(&self) -> &GeneratorConfig {
        self.ctx.config()
    }

    pub fn cost_model(&self) -> &Arc<dyn CostModel> {
        self.ctx.cost_model()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn graph(&self) -> &SignalGraph {
        &self.graph
    }

    pub fn signal(&self, id: SignalId) -> Result<&Signal> {
        self.graph.signal(id)
    }

    pub fn inputs(&self) -> &[SignalId] {
        &self.inputs
    }

    /// Output ports (empty until finalized)
    pub fn outputs(&self) -> &[SignalId] {
        &self.outputs
    }

    /// Components instantiated by this operator, by name
    pub fn components(&self) -> &IndexMap<String, Arc<Operator>> {
        &self.components
    }

    /// Number of cycles between inputs and outputs (valid once finalized)
    pub fn latency(&self) -> u32 {
        self.latency
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn stats(&self) -> &ScheduleStats {
        &self.stats
    }

    /// Unique-name source shared with the build context
    pub fn names(&self) -> &UniqueNames {
        self.ctx.names()
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Declare a primary input available at the start of cycle 0
    pub fn add_input(&mut self, name: &str, width: u32, signed: bool) -> Result<SignalId> {
        self.ensure_open()?;
        self.check_width(name, width)?;
        let id = self.push_signal(
            name.to_string(),
            width,
            signed,
            SignalKind::Input,
            Timing::START,
            Expr::Input,
        )?;
        self.inputs.push(id);
        Ok(id)
    }

    /// Declare a constant; it is available in every cycle at no delay
    pub fn add_constant(&mut self, prefix: &str, value: u128, width: u32) -> Result<SignalId> {
        self.ensure_open()?;
        self.check_width(prefix, width)?;
        let name = self.fresh_name(prefix);
        let masked = value & crate::signal::width_mask(width);
        self.push_signal(
            name,
            width,
            false,
            SignalKind::Constant,
            Timing::START,
            Expr::Constant(masked),
        )
    }

    /// Declare a value computed from already-declared signals
    ///
    /// `delay` is the combinational delay of the expression itself; the
    /// scheduler adds it to the latest upstream arrival and opens a new
    /// cycle if the sum does not fit in the period.
    pub fn declare(
        &mut self,
        prefix: &str,
        expr: Expr,
        width: u32,
        signed: bool,
        delay: TimePs,
    ) -> Result<SignalId> {
        let primitive = expr.primitive_name();
        self.declare_scheduled(prefix, expr, width, signed, delay, primitive, vec![width])
    }

    /// Declare a value whose delay comes from the cost model
    pub fn declare_op(
        &mut self,
        prefix: &str,
        expr: Expr,
        width: u32,
        signed: bool,
        op: OpKind,
        widths: &[u32],
    ) -> Result<SignalId> {
        let delay = self.cost_model().delay(op, widths);
        self.declare_scheduled(
            prefix,
            expr,
            width,
            signed,
            delay,
            op.name().to_string(),
            widths.to_vec(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn declare_scheduled(
        &mut self,
        prefix: &str,
        expr: Expr,
        width: u32,
        signed: bool,
        delay: TimePs,
        primitive: String,
        widths: Vec<u32>,
    ) -> Result<SignalId> {
        self.ensure_open()?;
        self.check_width(prefix, width)?;
        if !delay.is_finite() || delay < 0.0 {
            return Err(GenError::Config(format!(
                "delay of '{}' must be finite and non-negative, got {}",
                prefix, delay
            )));
        }
        self.check_expr(&expr, width)?;

        let upstream: Vec<Timing> = expr
            .upstream()
            .iter()
            .map(|id| self.graph.signal(*id).map(|s| s.timing))
            .collect::<Result<_>>()?;

        let placement = self.scheduler.place(&upstream, delay).map_err(|e| {
            GenError::InfeasibleTiming {
                operator: self.name.clone(),
                primitive,
                widths,
                delay: e.delay,
                period: e.period,
            }
        })?;

        let name = self.fresh_name(prefix);
        if placement.registered {
            debug!(
                "[{}] register boundary before '{}' -> cycle {}",
                self.name, name, placement.timing.cycle
            );
        }
        self.stats.record(&placement);
        self.push_signal(name, width, signed, SignalKind::Wire, placement.timing, expr)
    }

    /// Make a value available at the start of `cycle`
    ///
    /// Returns the signal itself if it is already in `cycle`, otherwise a
    /// new register-chain signal. Syncing backwards in time is an error.
    pub fn sync_to(&mut self, signal: SignalId, cycle: u32) -> Result<SignalId> {
        self.ensure_open()?;
        let source = self.graph.signal(signal)?;
        let timing = Scheduler::sync(source.timing, cycle).ok_or_else(|| {
            GenError::invariant(
                &self.name,
                format!(
                    "cannot sync '{}' from cycle {} back to cycle {}",
                    source.name, source.timing.cycle, cycle
                ),
            )
        })?;
        if source.timing.cycle == cycle {
            return Ok(signal);
        }

        let cycles = cycle - source.timing.cycle;
        let (width, signed) = (source.width, source.signed);
        let name = self.fresh_name(&format!("{}_d{}", source.name, cycles));
        self.stats.synchronized += 1;
        self.stats.max_cycle = self.stats.max_cycle.max(cycle);
        self.push_signal(
            name,
            width,
            signed,
            SignalKind::Register,
            timing,
            Expr::Delay {
                source: signal,
                cycles,
            },
        )
    }

    /// Align a set of signals to the latest cycle among them
    pub fn sync_all(&mut self, signals: &[SignalId]) -> Result<Vec<SignalId>> {
        let mut cycle = 0;
        for id in signals {
            cycle = cycle.max(self.graph.signal(*id)?.timing.cycle);
        }
        signals.iter().map(|id| self.sync_to(*id, cycle)).collect()
    }

    /// Instantiate a finalized operator as a black box
    ///
    /// Inputs are aligned to a common cycle (registered first if they carry
    /// combinational delay); the component's outputs appear at time 0 of the
    /// cycle `start + component latency`. Unpipelined, the outputs arrive
    /// after the inputs plus the component's longest output path.
    pub fn instantiate(
        &mut self,
        prefix: &str,
        component: Arc<Operator>,
        inputs: &[SignalId],
    ) -> Result<Vec<SignalId>> {
        self.ensure_open()?;
        if !component.is_finalized() {
            return Err(GenError::Config(format!(
                "component '{}' must be finalized before instantiation",
                component.name()
            )));
        }
        if inputs.len() != component.inputs().len() {
            return Err(GenError::Config(format!(
                "component '{}' expects {} inputs, got {}",
                component.name(),
                component.inputs().len(),
                inputs.len()
            )));
        }
        for (port, actual) in component.inputs().iter().zip(inputs) {
            let expected = component.signal(*port)?;
            let got = self.graph.signal(*actual)?;
            if expected.width != got.width {
                return Err(GenError::Config(format!(
                    "input '{}' of '{}' is {} bits wide, got '{}' with {} bits",
                    expected.name,
                    component.name(),
                    expected.width,
                    got.name,
                    got.width
                )));
            }
        }
        match self.components.get(component.name()) {
            Some(existing) if !Arc::ptr_eq(existing, &component) => {
                return Err(GenError::Config(format!(
                    "a different component named '{}' is already instantiated",
                    component.name()
                )));
            }
            Some(_) => {}
            None => {
                self.components
                    .insert(component.name().to_string(), Arc::clone(&component));
            }
        }

        let timings: Vec<Timing> = inputs
            .iter()
            .map(|id| self.graph.signal(*id).map(|s| s.timing))
            .collect::<Result<_>>()?;
        let joined = Scheduler::join(&timings);
        let start = if joined.arrival > 0.0 && self.scheduler.is_pipelined() {
            joined.cycle + 1
        } else {
            joined.cycle
        };
        let aligned = inputs
            .iter()
            .map(|id| self.sync_to(*id, start))
            .collect::<Result<Vec<_>>>()?;

        let instance = self.fresh_name(prefix);
        let out_timing = if self.scheduler.is_pipelined() {
            Timing::at_cycle(start + component.latency())
        } else {
            // Combinational: input arrival plus the component's critical path
            let mut inner = 0.0;
            for port in component.outputs() {
                inner = f64::max(inner, component.signal(*port)?.timing.arrival);
            }
            Timing::new(start + component.latency(), joined.arrival + inner)
        };
        let mut outputs = Vec::with_capacity(component.outputs().len());
        for port in component.outputs() {
            let port = component.signal(*port)?;
            let id = self.push_signal(
                format!("{}_{}", instance, port.name),
                port.width,
                port.signed,
                SignalKind::Instance,
                out_timing,
                Expr::Instance {
                    instance: instance.clone(),
                    component: component.name().to_string(),
                    port: port.name.clone(),
                    inputs: aligned.clone(),
                },
            )?;
            outputs.push(id);
        }
        self.stats.max_cycle = self.stats.max_cycle.max(out_timing.cycle);
        debug!(
            "[{}] instance '{}' of '{}' spans cycles {}..{}",
            self.name,
            instance,
            component.name(),
            start,
            out_timing.cycle
        );
        Ok(outputs)
    }

    /// Declare an output port driven by `source`
    pub fn add_output(&mut self, name: &str, source: SignalId) -> Result<()> {
        self.ensure_open()?;
        self.graph.signal(source)?;
        if self.graph.contains_name(name) || self.pending_outputs.iter().any(|(n, _)| n == name)
        {
            return Err(GenError::Config(format!(
                "output name '{}' is already declared",
                name
            )));
        }
        self.pending_outputs.push((name.to_string(), source));
        Ok(())
    }

    /// Align outputs to a common latency and close the operator
    pub fn finalize(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.pending_outputs.is_empty() {
            return Err(GenError::Config(format!(
                "operator '{}' has no outputs",
                self.name
            )));
        }

        let mut latency = 0;
        for (_, source) in &self.pending_outputs {
            latency = latency.max(self.graph.signal(*source)?.timing.cycle);
        }

        let pending = std::mem::take(&mut self.pending_outputs);
        for (name, source) in pending {
            let aligned = self.sync_to(source, latency)?;
            let signal = self.graph.signal(aligned)?;
            let (width, signed, timing) = (signal.width, signal.signed, signal.timing);
            let id = self.push_signal(
                name,
                width,
                signed,
                SignalKind::Output,
                timing,
                Expr::Alias(aligned),
            )?;
            self.outputs.push(id);
        }

        self.graph
            .check_schedule(self.scheduler.period(), self.scheduler.is_pipelined())
            .map_err(|context| GenError::invariant(&self.name, context))?;

        self.latency = latency;
        self.stats.max_cycle = self.stats.max_cycle.max(latency);
        self.finalized = true;
        info!("[{}] finalized: {}", self.name, self.stats.summary());
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.finalized {
            Err(GenError::Finalized {
                operator: self.name.clone(),
            })
        } else {
            Ok(())
        }
    }

    fn check_width(&self, what: &str, width: u32) -> Result<()> {
        if width == 0 || width > MAX_SIGNAL_WIDTH {
            return Err(GenError::Config(format!(
                "'{}' in '{}' must be 1..={} bits wide, got {}",
                what, self.name, MAX_SIGNAL_WIDTH, width
            )));
        }
        Ok(())
    }

    fn check_bit(&self, bit: &BitRef) -> Result<()> {
        let signal = self.graph.signal(bit.signal)?;
        if bit.bit >= signal.width {
            return Err(GenError::Config(format!(
                "bit {} of '{}' is out of range (width {})",
                bit.bit, signal.name, signal.width
            )));
        }
        Ok(())
    }

    fn check_expr(&self, expr: &Expr, width: u32) -> Result<()> {
        for id in expr.upstream() {
            self.graph.signal(id)?;
        }
        match expr {
            Expr::Input => Err(GenError::Config(
                "inputs must be declared with add_input".to_string(),
            )),
            Expr::Instance { .. } => Err(GenError::Config(
                "components must be declared with instantiate".to_string(),
            )),
            Expr::Bits(bits) => bits.iter().try_for_each(|b| self.check_source(b)),
            Expr::Compress { columns, .. } => columns
                .iter()
                .flatten()
                .try_for_each(|b| self.check_source(b)),
            Expr::PartialProduct { select, .. } => self.check_bit(select),
            Expr::Slice { source, lo } => {
                let source = self.graph.signal(*source)?;
                if lo + width > source.width {
                    return Err(GenError::Config(format!(
                        "slice [{}+:{}] of '{}' exceeds its width {}",
                        lo, width, source.name, source.width
                    )));
                }
                Ok(())
            }
            Expr::Constant(_)
            | Expr::Binary { .. }
            | Expr::Delay { .. }
            | Expr::Alias(_) => Ok(()),
        }
    }

    fn check_source(&self, source: &BitSource) -> Result<()> {
        match source {
            BitSource::Bit(b) | BitSource::Inverted(b) => self.check_bit(b),
            BitSource::One | BitSource::Zero => Ok(()),
        }
    }

    /// A generated name not yet used in this operator
    pub(crate) fn fresh_name(&self, prefix: &str) -> String {
        loop {
            let name = self.ctx.names().fresh(prefix);
            if !self.graph.contains_name(&name) {
                return name;
            }
        }
    }

    fn push_signal(
        &mut self,
        name: String,
        width: u32,
        signed: bool,
        kind: SignalKind,
        timing: Timing,
        expr: Expr,
    ) -> Result<SignalId> {
        let upstream = expr.upstream();
        let signal = Signal {
            id: self.graph.next_id(),
            name,
            width,
            signed,
            kind,
            timing,
            expr,
            upstream,
        };
        self.graph.add(signal)
    }
}
