// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task identity and per-task bookkeeping.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::rc::Weak;

use crate::arch::CpuContext;
use crate::error::RtError;
use crate::scheduler::{Core, Yielder};
use crate::stack::StackSlab;

/// Stable handle to a task, assigned at spawn time.
///
/// Handles index the scheduler's task arena. Tasks are addressed by
/// handle only — never by comparing code addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    /// Build a `TaskId` from a raw arena index.
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// The raw arena index.
    pub fn as_raw(self) -> usize {
        self.0
    }
}

/// Task lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Constructed but never entered.
    New,
    /// Currently executing (exactly one task at a time).
    Running,
    /// Parked at a yield point, resumable.
    Suspended,
    /// Entry function returned; never resumable again.
    Completed,
    /// Stack overflow, panic, or a propagated protocol error.
    Faulted,
}

pub(crate) type EntryFn = Box<dyn FnOnce(&Yielder) -> Result<(), RtError> + 'static>;

/// Argument handed to the architecture trampoline: enough to find the
/// scheduler core and this task again from a brand-new stack.
pub(crate) struct TaskCell {
    pub core: Weak<Core>,
    pub id: TaskId,
}

/// A task in the arena. Tasks are never removed individually; slab and
/// saved context stay live until the whole scheduler is dropped.
pub(crate) struct Task {
    pub name: String,
    pub state: Cell<TaskState>,
    pub slab: StackSlab,
    /// Saved register state. Boxed so the pointer handed to the switch
    /// primitive stays stable when the arena reallocates.
    pub ctx: Box<UnsafeCell<CpuContext>>,
    /// Owned here; the trampoline holds a raw pointer into it.
    #[allow(dead_code)]
    pub cell: Box<TaskCell>,
    /// Taken exactly once, on first entry.
    pub entry: RefCell<Option<EntryFn>>,
}
