// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Progress notifications. These are an observability channel, not
//! part of the scheduling contract: flows run identically without an
//! observer installed.

use std::rc::Rc;

/// One observable step of a running flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    /// A producer published a batch into its own slot.
    Produced {
        producer: usize,
        amount: u64,
        in_flight: u64,
    },
    /// The gather task drained every slot and accumulated the sum.
    Drained { got: u64, total: u64 },
    /// The pipeline consumer drained a single unit.
    Consumed { in_flight: u64, total: u64 },
    /// The flow reached its threshold and terminated.
    Finished { total: u64, cycles: u64 },
}

/// Observer callback shared with the task closures.
pub type Observer = Rc<dyn Fn(&FlowEvent)>;

pub(crate) fn notify(observer: &Option<Observer>, event: FlowEvent) {
    if let Some(observer) = observer {
        observer(&event);
    }
}
