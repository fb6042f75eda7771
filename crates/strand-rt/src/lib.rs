// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Minimal single-threaded cooperative multitasking substrate.
//!
//! Stackful execution contexts with explicit, named control transfer:
//! a task runs until it calls [`Yielder::yield_to`] or
//! [`Yielder::yield_back`], and nothing preempts it in between. The
//! [`Scheduler`] owns the task arena and the current/previous cursor;
//! the root driver enters the graph with [`Scheduler::resume`] and
//! gets control back as a tagged [`Step`].
//!
//! Context capture and restore are hand-rolled per architecture
//! (x86_64 and aarch64); unsupported targets fail at compile time.

mod arch;
mod error;
mod scheduler;
mod stack;
mod task;

pub use error::RtError;
pub use scheduler::{Scheduler, Step, Yielder};
pub use stack::{DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
pub use task::{TaskId, TaskState};
