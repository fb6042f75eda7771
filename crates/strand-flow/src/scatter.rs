// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! N-way scatter feeding a single gather/accumulator.
//!
//! A coordinator task owns a fixed set of producers and resumes each of
//! them exactly once per cycle, in index order, before handing off to
//! the gather task. Producers persist across cycles: they are never
//! re-created and resume exactly where they last yielded.

use std::cell::Cell;
use std::rc::Rc;

use strand_rt::{RtError, Scheduler, Step, TaskId, Yielder, DEFAULT_STACK_SIZE};

use crate::board::WorkBoard;
use crate::error::FlowError;
use crate::event::{notify, FlowEvent, Observer};
use crate::gather::run_gather;
use crate::FlowReport;

/// Setup constants for a scatter/gather flow. All values are fixed for
/// the lifetime of the flow; producers are never added, removed, or
/// skipped once wired.
#[derive(Debug, Clone)]
pub struct ScatterConfig {
    /// Number of producer tasks.
    pub producers: usize,
    /// Units each producer publishes per resumption.
    pub batch: u64,
    /// The flow terminates once `total >= threshold`.
    pub threshold: u64,
    /// Per-task stack size override; `None` uses the runtime default.
    pub stack_size: Option<usize>,
}

impl ScatterConfig {
    pub fn new(producers: usize, batch: u64, threshold: u64) -> Self {
        Self {
            producers,
            batch,
            threshold,
            stack_size: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), FlowError> {
        if self.producers == 0 {
            return Err(FlowError::NoProducers);
        }
        if self.batch == 0 {
            return Err(FlowError::ZeroBatch);
        }
        if self.threshold == 0 {
            return Err(FlowError::ZeroThreshold);
        }
        Ok(())
    }

    pub(crate) fn stack(&self) -> usize {
        self.stack_size.unwrap_or(DEFAULT_STACK_SIZE)
    }
}

/// A fully wired scatter/gather system, ready to run.
///
/// All tasks are constructed before any context switch; `run` performs
/// the root driver's single handoff into the gather task.
pub struct ScatterGather {
    sched: Scheduler,
    board: Rc<WorkBoard>,
    gather: TaskId,
}

impl std::fmt::Debug for ScatterGather {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScatterGather").finish_non_exhaustive()
    }
}

impl ScatterGather {
    pub fn new(config: &ScatterConfig) -> Result<Self, FlowError> {
        Self::build(config, None)
    }

    pub fn with_observer(config: &ScatterConfig, observer: Observer) -> Result<Self, FlowError> {
        Self::build(config, Some(observer))
    }

    fn build(config: &ScatterConfig, observer: Option<Observer>) -> Result<Self, FlowError> {
        config.validate()?;
        let sched = Scheduler::new();
        let board = Rc::new(WorkBoard::new(config.producers));
        let stack = config.stack();

        let mut producers = Vec::with_capacity(config.producers);
        for index in 0..config.producers {
            let board = board.clone();
            let observer = observer.clone();
            let batch = config.batch;
            let id = sched.spawn_with_stack(format!("producer-{index}"), stack, move |y| {
                run_producer(y, index, batch, &board, &observer)
            })?;
            producers.push(id);
        }

        // The coordinator and gather tasks name each other, but handles
        // only exist after spawning. The gather handle is late-bound
        // through a shared slot, filled in below before any switch can
        // happen.
        let gather_slot = Rc::new(Cell::new(None));
        let slot = gather_slot.clone();
        let coordinator = sched.spawn_with_stack("coordinator", stack, move |y| {
            run_coordinator(y, &producers, &slot)
        })?;

        let gather = {
            let board = board.clone();
            let observer = observer.clone();
            let threshold = config.threshold;
            sched.spawn_with_stack("gather", stack, move |y| {
                run_gather(y, &board, threshold, coordinator, &observer)
            })?
        };
        gather_slot.set(Some(gather));

        Ok(Self {
            sched,
            board,
            gather,
        })
    }

    /// Run to termination: one handoff into the gather task, after
    /// which the graph yields among itself until the threshold is
    /// reached and control unwinds back to the root.
    pub fn run(&self) -> Result<FlowReport, FlowError> {
        loop {
            match self.sched.resume(self.gather)? {
                Step::Completed(_) => {
                    return Ok(FlowReport {
                        total: self.board.total(),
                        cycles: self.board.cycles(),
                    });
                }
                Step::Yielded(_) => continue,
            }
        }
    }

    /// The shared counters, for inspection after (or between) runs.
    pub fn board(&self) -> &WorkBoard {
        &self.board
    }
}

/// Entry function of the coordinator task: one full round-robin pass
/// over the producers per cycle, then a handoff to gather. Never
/// returns; it is left suspended when gather terminates the flow.
fn run_coordinator(
    y: &Yielder,
    producers: &[TaskId],
    gather_slot: &Rc<Cell<Option<TaskId>>>,
) -> Result<(), RtError> {
    let gather = gather_slot
        .get()
        .expect("gather handle wired before the first handoff");
    loop {
        for &producer in producers {
            y.yield_to(producer)?;
        }
        y.yield_to(gather)?;
    }
}

/// Entry function of producer `index`: publish one batch into its own
/// slot, then yield straight back to whoever resumed it — always the
/// coordinator, never another producer. Never returns.
fn run_producer(
    y: &Yielder,
    index: usize,
    batch: u64,
    board: &Rc<WorkBoard>,
    observer: &Option<Observer>,
) -> Result<(), RtError> {
    loop {
        board.produce(index, batch);
        notify(
            observer,
            FlowEvent::Produced {
                producer: index,
                amount: batch,
                in_flight: board.in_flight(index),
            },
        );
        y.yield_back()?;
    }
}
