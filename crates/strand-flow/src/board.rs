// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Shared work counters: the integration contract between the
//! producing and consuming sides of a flow.
//!
//! Each counter is written by exactly one kind of task — producers own
//! their own `in_flight` slot, the consumer owns draining and the
//! accumulator — so the cooperative scheduler gives mutual exclusion
//! structurally. Nothing can run between a producer's write and the
//! later drain, which makes drain-and-reset indivisible. `Cell` is all
//! the synchronization a single-threaded scheduler needs; a parallel
//! port of this type would have to replace that with real locking or
//! message passing.

use std::cell::Cell;

/// Counters shared across task boundaries.
pub struct WorkBoard {
    in_flight: Vec<Cell<u64>>,
    total: Cell<u64>,
    produced: Cell<u64>,
    cycles: Cell<u64>,
}

impl WorkBoard {
    pub fn new(producers: usize) -> Self {
        Self {
            in_flight: (0..producers).map(|_| Cell::new(0)).collect(),
            total: Cell::new(0),
            produced: Cell::new(0),
            cycles: Cell::new(0),
        }
    }

    pub fn producers(&self) -> usize {
        self.in_flight.len()
    }

    /// Producer `index` publishes `amount` units of ready work.
    pub fn produce(&self, index: usize, amount: u64) {
        let slot = &self.in_flight[index];
        slot.set(slot.get() + amount);
        self.produced.set(self.produced.get() + amount);
    }

    /// Drain every slot into the accumulator as one indivisible step,
    /// returning the sum taken this round.
    pub fn drain_all(&self) -> u64 {
        let mut got = 0;
        for slot in &self.in_flight {
            got += slot.take();
        }
        self.total.set(self.total.get() + got);
        got
    }

    /// Unit drain for the pipeline variant. Refuses to go below zero.
    pub fn consume_one(&self, index: usize) -> bool {
        let slot = &self.in_flight[index];
        if slot.get() == 0 {
            return false;
        }
        slot.set(slot.get() - 1);
        self.total.set(self.total.get() + 1);
        true
    }

    pub fn in_flight(&self, index: usize) -> u64 {
        self.in_flight[index].get()
    }

    pub fn in_flight_sum(&self) -> u64 {
        self.in_flight.iter().map(Cell::get).sum()
    }

    /// Accumulated units consumed so far. Monotonically non-decreasing.
    pub fn total(&self) -> u64 {
        self.total.get()
    }

    /// Cumulative production, for the conservation check
    /// `total + in_flight_sum == produced`.
    pub fn produced(&self) -> u64 {
        self.produced.get()
    }

    /// Record one completed production cycle.
    pub fn note_cycle(&self) {
        self.cycles.set(self.cycles.get() + 1);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.get()
    }
}
