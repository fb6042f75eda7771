// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single producer / single consumer pipeline.
//!
//! The consumer leads: it drains one unit per step and pulls the
//! producer in only when its slot runs dry. The producer is a pure
//! refiller; it publishes a full batch when the slot is empty and
//! otherwise passes control straight back. Termination is unit-exact,
//! so a partly drained batch stays in flight when the target is hit.

use std::rc::Rc;

use strand_rt::{RtError, Scheduler, Step, TaskId, Yielder};

use crate::board::WorkBoard;
use crate::error::FlowError;
use crate::event::{notify, FlowEvent, Observer};
use crate::FlowReport;

/// Setup constants for a pipeline flow.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Units the producer publishes per refill.
    pub batch: u64,
    /// The flow terminates once exactly `target` units were consumed.
    pub target: u64,
    /// Per-task stack size override; `None` uses the runtime default.
    pub stack_size: Option<usize>,
}

impl PipelineConfig {
    pub fn new(batch: u64, target: u64) -> Self {
        Self {
            batch,
            target,
            stack_size: None,
        }
    }

    fn validate(&self) -> Result<(), FlowError> {
        if self.batch == 0 {
            return Err(FlowError::ZeroBatch);
        }
        if self.target == 0 {
            return Err(FlowError::ZeroThreshold);
        }
        Ok(())
    }
}

/// A wired two-task pipeline, ready to run.
pub struct Pipeline {
    sched: Scheduler,
    board: Rc<WorkBoard>,
    consumer: TaskId,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self, FlowError> {
        Self::build(config, None)
    }

    pub fn with_observer(config: &PipelineConfig, observer: Observer) -> Result<Self, FlowError> {
        Self::build(config, Some(observer))
    }

    fn build(config: &PipelineConfig, observer: Option<Observer>) -> Result<Self, FlowError> {
        config.validate()?;
        let sched = Scheduler::new();
        let board = Rc::new(WorkBoard::new(1));
        let stack = config
            .stack_size
            .unwrap_or(strand_rt::DEFAULT_STACK_SIZE);

        let producer = {
            let board = board.clone();
            let observer = observer.clone();
            let batch = config.batch;
            sched.spawn_with_stack("producer", stack, move |y| {
                run_refill(y, batch, &board, &observer)
            })?
        };

        let consumer = {
            let board = board.clone();
            let target = config.target;
            sched.spawn_with_stack("consumer", stack, move |y| {
                run_consumer(y, producer, target, &board, &observer)
            })?
        };

        Ok(Self {
            sched,
            board,
            consumer,
        })
    }

    /// Run to termination; the consumer's return unwinds to the root.
    pub fn run(&self) -> Result<FlowReport, FlowError> {
        loop {
            match self.sched.resume(self.consumer)? {
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

    pub fn board(&self) -> &WorkBoard {
        &self.board
    }
}

/// Entry function of the refilling producer. Only acts on an empty
/// slot; otherwise a resumption is a no-op handoff. Never returns.
fn run_refill(
    y: &Yielder,
    batch: u64,
    board: &Rc<WorkBoard>,
    observer: &Option<Observer>,
) -> Result<(), RtError> {
    loop {
        if board.in_flight(0) == 0 {
            board.produce(0, batch);
            board.note_cycle();
            notify(
                observer,
                FlowEvent::Produced {
                    producer: 0,
                    amount: batch,
                    in_flight: board.in_flight(0),
                },
            );
        }
        y.yield_back()?;
    }
}

/// Entry function of the consumer, the pipeline's leader and its sole
/// termination point.
fn run_consumer(
    y: &Yielder,
    producer: TaskId,
    target: u64,
    board: &Rc<WorkBoard>,
    observer: &Option<Observer>,
) -> Result<(), RtError> {
    loop {
        if board.in_flight(0) == 0 {
            // Pull a refill. On return the producer is the recorded
            // resumer, so later yield_backs ping-pong between the two
            // tasks without the root in the loop.
            y.yield_to(producer)?;
            continue;
        }
        board.consume_one(0);
        notify(
            observer,
            FlowEvent::Consumed {
                in_flight: board.in_flight(0),
                total: board.total(),
            },
        );
        if board.total() >= target {
            notify(observer, FlowEvent::Finished { total: board.total(), cycles: board.cycles() });
            return Ok(());
        }
        y.yield_back()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn run_recorded(batch: u64, target: u64) -> (FlowReport, Vec<FlowEvent>, u64) {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let pipeline = Pipeline::with_observer(
            &PipelineConfig::new(batch, target),
            Rc::new(move |event: &FlowEvent| sink.borrow_mut().push(*event)),
        )
        .unwrap();
        let report = pipeline.run().unwrap();
        let leftover = pipeline.board().in_flight_sum();
        let events = events.borrow().clone();
        (report, events, leftover)
    }

    #[test]
    fn stops_exactly_at_the_target() {
        // 10 units need three refills of 4; two stay in flight.
        let (report, events, leftover) = run_recorded(4, 10);
        assert_eq!(report.total, 10);
        assert_eq!(report.cycles, 3);
        assert_eq!(leftover, 2);
        let consumed = events
            .iter()
            .filter(|e| matches!(e, FlowEvent::Consumed { .. }))
            .count();
        assert_eq!(consumed, 10);
    }

    #[test]
    fn divisible_target_leaves_nothing_in_flight() {
        let (report, _, leftover) = run_recorded(4, 12);
        assert_eq!(report.total, 12);
        assert_eq!(report.cycles, 3);
        assert_eq!(leftover, 0);
    }

    #[test]
    fn refills_only_happen_on_an_empty_slot() {
        let (_, events, _) = run_recorded(3, 8);
        let mut modeled_in_flight = 0u64;
        for event in &events {
            match event {
                FlowEvent::Produced { amount, in_flight, .. } => {
                    assert_eq!(modeled_in_flight, 0);
                    modeled_in_flight += amount;
                    assert_eq!(modeled_in_flight, *in_flight);
                }
                FlowEvent::Consumed { in_flight, .. } => {
                    modeled_in_flight -= 1;
                    assert_eq!(modeled_in_flight, *in_flight);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn batch_of_one_alternates_strictly() {
        let (report, events, leftover) = run_recorded(1, 3);
        assert_eq!(report.total, 3);
        assert_eq!(report.cycles, 3);
        assert_eq!(leftover, 0);
        assert_eq!(
            events,
            vec![
                FlowEvent::Produced { producer: 0, amount: 1, in_flight: 1 },
                FlowEvent::Consumed { in_flight: 0, total: 1 },
                FlowEvent::Produced { producer: 0, amount: 1, in_flight: 1 },
                FlowEvent::Consumed { in_flight: 0, total: 2 },
                FlowEvent::Produced { producer: 0, amount: 1, in_flight: 1 },
                FlowEvent::Consumed { in_flight: 0, total: 3 },
                FlowEvent::Finished { total: 3, cycles: 3 },
            ]
        );
    }

    #[test]
    fn rejects_zero_batch() {
        let err = Pipeline::new(&PipelineConfig::new(0, 8)).unwrap_err();
        assert!(matches!(err, FlowError::ZeroBatch));
    }

    #[test]
    fn rejects_zero_target() {
        let err = Pipeline::new(&PipelineConfig::new(4, 0)).unwrap_err();
        assert!(matches!(err, FlowError::ZeroThreshold));
    }
}
