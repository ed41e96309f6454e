//! Cycle and critical-path scheduling
//!
//! Values are scheduled one at a time as they are declared, never as a
//! batch over a finished graph. Every decision is a pure function of the
//! upstream timings and the delay of the new expression:
//!
//! 1. Join the upstream timings: the latest cycle wins, and values from
//!    earlier cycles are held by registers so they arrive at time 0 of it.
//! 2. If the join arrival plus the expression delay fits the clock period,
//!    the value stays in that cycle.
//! 3. Otherwise a register boundary is inserted before the expression and
//!    the value lands in the next cycle with `arrival = delay`.
//!
//! A delay larger than the period can never be scheduled and is reported as
//! [`Infeasible`]. In unpipelined mode every value stays in cycle 0 and
//! arrivals simply accumulate.

use crate::TimePs;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Pipeline position of a value
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Timing {
    /// Pipeline stage index
    pub cycle: u32,
    /// Combinational delay accumulated since the last register boundary
    pub arrival: TimePs,
}

impl Timing {
    /// Start of cycle 0
    pub const START: Timing = Timing {
        cycle: 0,
        arrival: 0.0,
    };

    pub fn new(cycle: u32, arrival: TimePs) -> Self {
        Self { cycle, arrival }
    }

    /// Start of a cycle
    pub fn at_cycle(cycle: u32) -> Self {
        Self {
            cycle,
            arrival: 0.0,
        }
    }

    /// Ordering key: later cycle first, then later arrival
    pub fn is_later_than(&self, other: &Timing) -> bool {
        self.cycle > other.cycle || (self.cycle == other.cycle && self.arrival > other.arrival)
    }
}

/// Result of placing a new value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub timing: Timing,
    /// A register boundary was inserted in front of the value
    pub registered: bool,
}

/// A delay that cannot fit in one clock period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Infeasible {
    pub delay: TimePs,
    pub period: TimePs,
}

/// Scheduler for one operator
#[derive(Debug, Clone)]
pub struct Scheduler {
    period: TimePs,
    pipelined: bool,
}

impl Scheduler {
    pub fn new(period: TimePs, pipelined: bool) -> Self {
        Self { period, pipelined }
    }

    /// Clock period in picoseconds
    pub fn period(&self) -> TimePs {
        self.period
    }

    pub fn is_pipelined(&self) -> bool {
        self.pipelined
    }

    /// Latest timing among a set of upstream values
    ///
    /// Values from cycles earlier than the latest one arrive at time 0 of
    /// the latest cycle, so only upstreams in that cycle contribute arrival.
    pub fn join(upstream: &[Timing]) -> Timing {
        let cycle = upstream.iter().map(|t| t.cycle).max().unwrap_or(0);
        let arrival = upstream
            .iter()
            .filter(|t| t.cycle == cycle)
            .map(|t| t.arrival)
            .fold(0.0, f64::max);
        Timing { cycle, arrival }
    }

    /// Place a value computed from `upstream` with combinational `delay`
    pub fn place(&self, upstream: &[Timing], delay: TimePs) -> Result<Placement, Infeasible> {
        let input = Self::join(upstream);
        let candidate = input.arrival + delay;

        if !self.pipelined {
            return Ok(Placement {
                timing: Timing::new(input.cycle, candidate),
                registered: false,
            });
        }

        if delay > self.period {
            return Err(Infeasible {
                delay,
                period: self.period,
            });
        }

        let placement = if candidate <= self.period {
            Placement {
                timing: Timing::new(input.cycle, candidate),
                registered: false,
            }
        } else {
            Placement {
                timing: Timing::new(input.cycle + 1, delay),
                registered: true,
            }
        };

        trace!(
            "placed delay {:.1}ps after ({}, {:.1}ps) -> ({}, {:.1}ps){}",
            delay,
            input.cycle,
            input.arrival,
            placement.timing.cycle,
            placement.timing.arrival,
            if placement.registered { " [reg]" } else { "" }
        );

        Ok(placement)
    }

    /// Would a value with this delay open a new cycle after `upstream`?
    pub fn forces_register(&self, upstream: &[Timing], delay: TimePs) -> bool {
        matches!(self.place(upstream, delay), Ok(p) if p.registered)
    }

    /// Re-time a value to the start of `cycle`
    ///
    /// Returns `None` if the value is produced after `cycle`. A value already
    /// in `cycle` keeps its timing.
    pub fn sync(timing: Timing, cycle: u32) -> Option<Timing> {
        match timing.cycle.cmp(&cycle) {
            std::cmp::Ordering::Less => Some(Timing::at_cycle(cycle)),
            std::cmp::Ordering::Equal => Some(timing),
            std::cmp::Ordering::Greater => None,
        }
    }
}

/// Scheduling statistics of one operator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStats {
    /// Signals declared through the scheduler
    pub signals: usize,
    /// Placements that inserted a register boundary
    pub registered: usize,
    /// Explicit synchronizations to a later cycle
    pub synchronized: usize,
    /// Latest cycle used
    pub max_cycle: u32,
}

impl ScheduleStats {
    pub fn record(&mut self, placement: &Placement) {
        self.signals += 1;
        if placement.registered {
            self.registered += 1;
        }
        self.max_cycle = self.max_cycle.max(placement.timing.cycle);
    }

    /// Get summary string
    pub fn summary(&self) -> String {
        format!(
            "{} signals, {} register boundaries, {} syncs, latency {} cycles",
            self.signals, self.registered, self.synchronized, self.max_cycle
        )
    }
}
