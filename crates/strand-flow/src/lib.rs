// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Work-flow patterns built on the `strand-rt` cooperative scheduler.
//!
//! Two fixed task topologies over a shared counter board:
//!
//! - [`ScatterGather`]: N producers fan work into per-producer slots,
//!   a coordinator drives them round-robin, and a single gather task
//!   drains and accumulates until a threshold is met.
//! - [`Pipeline`]: one producer refills a single slot in batches, one
//!   consumer drains it a unit at a time until a target is met.
//!
//! Both expose progress through optional [`FlowEvent`] observers and
//! report totals as a [`FlowReport`].

mod board;
mod error;
mod event;
mod gather;
mod pipeline;
mod scatter;

pub use board::WorkBoard;
pub use error::FlowError;
pub use event::{FlowEvent, Observer};
pub use pipeline::{Pipeline, PipelineConfig};
pub use scatter::{ScatterConfig, ScatterGather};

/// Final tallies of a completed flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowReport {
    /// Units accumulated when the flow terminated.
    pub total: u64,
    /// Completed production cycles.
    pub cycles: u64,
}
