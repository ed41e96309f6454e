//! opgen core
//!
//! Generation core of a pipelined arithmetic operator generator for FPGAs.
//!
//! # Architecture
//!
//! ```text
//! GeneratorConfig ──> BuildContext (config, cost model, unique names)
//!                          │
//!                          v
//!                      Operator ──declare──> Scheduler ──> SignalGraph
//!                          │                                    │
//!                          v                                    v
//!                       BitHeap ──compress──> Catalog     netlist / simulate
//! ```
//!
//! - [`Operator`]: named sub-circuit; every declared signal is scheduled on
//!   the spot into a (cycle, arrival) pair.
//! - [`BitHeap`]: weighted columns of bits reduced to two rows by a staged,
//!   cost-greedy choice of [`Compressor`]s from a [`Catalog`].
//! - [`OperatorNetlist`]: read-only records of a finalized operator for an
//!   HDL emitter.
//! - [`Simulator`]: functional evaluation of a signal graph, used by
//!   [`verify::check_conservation`].

pub mod bitheap;
pub mod compressor;
pub mod config;
pub mod context;
pub mod error;
pub mod expr;
pub mod graph;
pub mod netlist;
pub mod operator;
pub mod schedule;
pub mod signal;
pub mod simulate;
pub mod verify;

pub use bitheap::{BitHeap, CompressionResult, CompressionStage, CompressionStats, HeapBit};
pub use compressor::{
    Catalog, ColumnShape, Compressor, CompressorCost, CompressorKind, MultiplierTile,
};
pub use config::{CompressionConfig, GeneratorConfig};
pub use context::{BuildContext, UniqueNames};
pub use error::{GenError, Result};
pub use expr::{BinOp, BitSource, Expr};
pub use graph::SignalGraph;
pub use netlist::{OperatorNetlist, PortRecord, SignalRecord};
pub use operator::Operator;
pub use schedule::{Placement, ScheduleStats, Scheduler, Timing};
pub use signal::{BitRef, Signal, SignalId, SignalKind, MAX_SIGNAL_WIDTH};
pub use simulate::{SignalValues, Simulator};

pub use opgen_cost::{CostModel, FpgaCostModel, OpKind, Target, TargetTiming, TimePs};
