// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime error types.
//!
//! Setup errors indicate a static configuration defect and are never
//! retried. Protocol errors are handed back to the offending task
//! without a switch, so misuse fails loudly instead of silently
//! resuming an arbitrary context.

use thiserror::Error;

use crate::task::{TaskId, TaskState};

/// Errors from context setup and the yield protocol.
#[derive(Debug, Error)]
pub enum RtError {
    /// Checked stack allocation refused an undersized request.
    #[error("stack size {requested} is below the {min}-byte minimum")]
    StackTooSmall { requested: usize, min: usize },

    /// The handle does not name a task in this scheduler's arena.
    #[error("no task exists for handle {0:?}")]
    UnknownTask(TaskId),

    /// The target has already completed or faulted.
    #[error("task `{name}` is {state:?} and cannot be resumed")]
    NotResumable { name: String, state: TaskState },

    #[error("a task cannot yield to itself")]
    YieldToSelf,

    /// `yield_back` was called before any resumer was recorded.
    #[error("yield_back() called with no recorded resumer")]
    NoResumer,

    /// `resume` is only valid while the root context is current.
    #[error("resume() called while a task context is current")]
    NestedResume,

    /// All tasks are constructed before the first handoff; spawning
    /// from inside a running task is refused.
    #[error("tasks can only be spawned from the root context")]
    SpawnWhileRunning,

    /// A guard canary was overwritten: the task ran off the bottom of
    /// its stack.
    #[error("task `{name}` overran its {stack_bytes}-byte stack")]
    StackOverflow { name: String, stack_bytes: usize },

    #[error("task `{name}` panicked: {message}")]
    TaskPanicked { name: String, message: String },

    /// The scheduler was dropped while a task still held a yielder.
    #[error("scheduler is gone")]
    SchedulerGone,
}
