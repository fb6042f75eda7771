// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Gather: drain every producer's pending work into the accumulator
//! and decide whether the system is done.

use std::rc::Rc;

use strand_rt::{RtError, TaskId, Yielder};

use crate::board::WorkBoard;
use crate::event::{notify, FlowEvent, Observer};

/// Entry function of the gather task.
///
/// Each round: drain-and-reset every slot as one step, accumulate,
/// then either return (the sole normal termination path, taken once
/// `total >= threshold`) or yield back into the scatter side for
/// another cycle. The `>=` comparison means the final cycle may
/// overshoot the threshold; that is expected.
pub(crate) fn run_gather(
    y: &Yielder,
    board: &Rc<WorkBoard>,
    threshold: u64,
    coordinator: TaskId,
    observer: &Option<Observer>,
) -> Result<(), RtError> {
    loop {
        let got = board.drain_all();
        notify(observer, FlowEvent::Drained { got, total: board.total() });
        if board.total() >= threshold {
            notify(observer, FlowEvent::Finished { total: board.total(), cycles: board.cycles() });
            return Ok(());
        }
        y.yield_to(coordinator)?;
        // Control comes back here only after the coordinator finished
        // a full round-robin pass over the producers.
        board.note_cycle();
    }
}
