// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative scheduler: cursor state, yield protocol, root driver.
//!
//! Exactly one context executes at a time. The cursor tracks `current`
//! (the context presently executing) and `previous` (whoever performed
//! the most recent handoff). `previous` is what lets a task hand
//! control back to its resumer without knowing statically who that is:
//! it is updated on every switch, so a producer can be resumed by
//! different dispatchers across cycles and still yield back correctly.
//! The cursor lives on the scheduler and is mutated only at switch
//! boundaries; task code never touches it directly.

use std::any::Any;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::arch::{self, CpuContext};
use crate::error::RtError;
use crate::stack::{StackSlab, DEFAULT_STACK_SIZE};
use crate::task::{Task, TaskCell, TaskId, TaskState};

/// Which context a cursor slot names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ContextRef {
    /// The hosting program's own context (the root driver).
    Root,
    Task(TaskId),
}

/// Why control came back to the root driver.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    /// A task yielded and the recorded resumer was the root.
    Yielded(TaskId),
    /// A task's entry function returned; the graph unwound to the root.
    Completed(TaskId),
}

/// Reason recorded by the task side just before switching to the root.
enum Exit {
    Yielded(TaskId),
    Completed(TaskId),
    Faulted(RtError),
}

/// Shared scheduler state. The `Scheduler` handle holds the only
/// strong reference; yielders and trampolines hold weak ones, so
/// suspended tasks never keep a dropped scheduler alive.
pub(crate) struct Core {
    tasks: RefCell<Vec<Task>>,
    current: Cell<ContextRef>,
    previous: Cell<Option<ContextRef>>,
    /// Register save area for the root context.
    root_ctx: Box<UnsafeCell<CpuContext>>,
    /// Set by the task side right before switching to the root.
    exit: RefCell<Option<Exit>>,
}

/// A single-threaded cooperative scheduler.
///
/// Tasks are created up front with [`spawn`](Scheduler::spawn), then
/// the root driver performs one [`resume`](Scheduler::resume) into the
/// task graph. From there tasks hand control among themselves with
/// [`Yielder::yield_to`] and [`Yielder::yield_back`] until one of them
/// returns, which unwinds to the root as a tagged [`Step`].
///
/// Multiple schedulers can coexist; each owns its cursor and arena.
pub struct Scheduler {
    core: Rc<Core>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            core: Rc::new(Core {
                tasks: RefCell::new(Vec::new()),
                current: Cell::new(ContextRef::Root),
                previous: Cell::new(None),
                root_ctx: Box::new(UnsafeCell::new(CpuContext::default())),
                exit: RefCell::new(None),
            }),
        }
    }

    /// Create a not-yet-entered task with the default stack size.
    pub fn spawn<F>(&self, name: impl Into<String>, entry: F) -> Result<TaskId, RtError>
    where
        F: FnOnce(&Yielder) -> Result<(), RtError> + 'static,
    {
        self.spawn_with_stack(name, DEFAULT_STACK_SIZE, entry)
    }

    /// Create a not-yet-entered task with an explicit stack size.
    ///
    /// The allocation is checked: undersized requests fail here, at
    /// setup, rather than corrupting memory at runtime. Spawning is
    /// only valid while the root context is current.
    pub fn spawn_with_stack<F>(
        &self,
        name: impl Into<String>,
        stack_bytes: usize,
        entry: F,
    ) -> Result<TaskId, RtError>
    where
        F: FnOnce(&Yielder) -> Result<(), RtError> + 'static,
    {
        if self.core.current.get() != ContextRef::Root {
            return Err(RtError::SpawnWhileRunning);
        }
        let mut slab = StackSlab::new(stack_bytes)?;
        let mut tasks = self.core.tasks.borrow_mut();
        let id = TaskId(tasks.len());
        let cell = Box::new(TaskCell {
            core: Rc::downgrade(&self.core),
            id,
        });
        let ctx = arch::prepare(&mut slab, &*cell as *const TaskCell as usize);
        tasks.push(Task {
            name: name.into(),
            state: Cell::new(TaskState::New),
            slab,
            ctx: Box::new(UnsafeCell::new(ctx)),
            cell,
            entry: RefCell::new(Some(Box::new(entry))),
        });
        Ok(id)
    }

    /// Hand control from the root into `id` and run the task graph
    /// until control next reaches the root: either a task yielded back
    /// to the root, or some task's entry returned, or a task faulted.
    pub fn resume(&self, id: TaskId) -> Result<Step, RtError> {
        let (save, restore) = self.core.stage_resume(id)?;
        // SAFETY: both pointers come from live boxed contexts, the
        // cursor was updated by stage_resume, and no RefCell borrows
        // are held across the switch.
        unsafe { arch::context_switch(save, restore) };
        match self.core.exit.borrow_mut().take() {
            Some(Exit::Yielded(from)) => Ok(Step::Yielded(from)),
            Some(Exit::Completed(task)) => Ok(Step::Completed(task)),
            Some(Exit::Faulted(error)) => Err(error),
            None => unreachable!("control returned to root without an exit reason"),
        }
    }

    /// Current lifecycle state of a task, if the handle is known.
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.core.tasks.borrow().get(id.0).map(|t| t.state.get())
    }

    /// Name a task was spawned with, if the handle is known.
    pub fn task_name(&self, id: TaskId) -> Option<String> {
        self.core.tasks.borrow().get(id.0).map(|t| t.name.clone())
    }

    pub fn task_count(&self) -> usize {
        self.core.tasks.borrow().len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability handed to every task entry: the only way task code can
/// reach the yield protocol. Holds a weak reference so a task parked
/// forever never pins the scheduler's memory.
pub struct Yielder {
    core: Weak<Core>,
    id: TaskId,
}

impl Yielder {
    /// Suspend the calling task and resume `target`, recording the
    /// caller as `previous`. Returns when some other context later
    /// resumes the caller — by naming it in a `yield_to` or by
    /// `yield_back` finding it as the recorded resumer.
    ///
    /// Misuse (unknown handle, completed target, self-yield) returns
    /// an error without switching.
    pub fn yield_to(&self, target: TaskId) -> Result<(), RtError> {
        let core = self.core.upgrade().ok_or(RtError::SchedulerGone)?;
        let (save, restore) = core.stage_yield_to(self.id, target)?;
        // A strong reference must not survive the switch: a task
        // suspended at teardown would pin the core forever.
        drop(core);
        // SAFETY: pointers staged with consistent cursor state, no
        // borrows held.
        unsafe { arch::context_switch(save, restore) };
        Ok(())
    }

    /// Suspend the calling task and resume whichever context most
    /// recently yielded to it.
    pub fn yield_back(&self) -> Result<(), RtError> {
        let core = self.core.upgrade().ok_or(RtError::SchedulerGone)?;
        let (save, restore) = core.stage_yield_back(self.id)?;
        drop(core);
        // SAFETY: as in yield_to.
        unsafe { arch::context_switch(save, restore) };
        Ok(())
    }

    /// Handle of the task this yielder belongs to.
    pub fn task_id(&self) -> TaskId {
        self.id
    }
}

type SwitchPair = (*mut CpuContext, *const CpuContext);

impl Core {
    fn ctx_ptr(&self, whom: ContextRef) -> *mut CpuContext {
        match whom {
            ContextRef::Root => self.root_ctx.get(),
            ContextRef::Task(id) => self.tasks.borrow()[id.0].ctx.get(),
        }
    }

    fn set_state(&self, id: TaskId, state: TaskState) {
        self.tasks.borrow()[id.0].state.set(state);
    }

    /// Check that `target` exists and is enterable.
    fn check_resumable(&self, target: TaskId) -> Result<(), RtError> {
        let tasks = self.tasks.borrow();
        let task = tasks.get(target.0).ok_or(RtError::UnknownTask(target))?;
        match task.state.get() {
            TaskState::New | TaskState::Suspended => Ok(()),
            state => Err(RtError::NotResumable {
                name: task.name.clone(),
                state,
            }),
        }
    }

    /// Verify the guard canaries of `id` before letting it suspend.
    fn guard_check(&self, id: TaskId) -> Result<(), RtError> {
        let tasks = self.tasks.borrow();
        let task = &tasks[id.0];
        if task.slab.guard_intact() {
            Ok(())
        } else {
            Err(RtError::StackOverflow {
                name: task.name.clone(),
                stack_bytes: task.slab.size_bytes(),
            })
        }
    }

    /// Stage a root -> task handoff.
    fn stage_resume(&self, id: TaskId) -> Result<SwitchPair, RtError> {
        if self.current.get() != ContextRef::Root {
            return Err(RtError::NestedResume);
        }
        self.check_resumable(id)?;
        self.set_state(id, TaskState::Running);
        self.previous.set(Some(ContextRef::Root));
        self.current.set(ContextRef::Task(id));
        Ok((self.root_ctx.get(), self.ctx_ptr(ContextRef::Task(id))))
    }

    /// Stage a task -> task handoff for `yield_to`.
    fn stage_yield_to(&self, from: TaskId, target: TaskId) -> Result<SwitchPair, RtError> {
        if from == target {
            return Err(RtError::YieldToSelf);
        }
        self.check_resumable(target)?;
        if let Err(fault) = self.guard_check(from) {
            return Ok(self.stage_fault(from, fault));
        }
        self.set_state(from, TaskState::Suspended);
        self.set_state(target, TaskState::Running);
        self.previous.set(Some(ContextRef::Task(from)));
        self.current.set(ContextRef::Task(target));
        Ok((
            self.ctx_ptr(ContextRef::Task(from)),
            self.ctx_ptr(ContextRef::Task(target)),
        ))
    }

    /// Stage a handoff to the recorded resumer for `yield_back`.
    fn stage_yield_back(&self, from: TaskId) -> Result<SwitchPair, RtError> {
        let target = self.previous.get().ok_or(RtError::NoResumer)?;
        if let ContextRef::Task(id) = target {
            self.check_resumable(id)?;
        }
        if let Err(fault) = self.guard_check(from) {
            return Ok(self.stage_fault(from, fault));
        }
        self.set_state(from, TaskState::Suspended);
        if target == ContextRef::Root {
            *self.exit.borrow_mut() = Some(Exit::Yielded(from));
        } else if let ContextRef::Task(id) = target {
            self.set_state(id, TaskState::Running);
        }
        self.previous.set(Some(ContextRef::Task(from)));
        self.current.set(target);
        Ok((self.ctx_ptr(ContextRef::Task(from)), self.ctx_ptr(target)))
    }

    /// Stage the final switch out of a task whose entry returned.
    /// The tagged outcome, not a per-task link, tells the root driver
    /// what happened.
    fn stage_finish(&self, id: TaskId, result: Result<(), RtError>) -> SwitchPair {
        let result = match self.guard_check(id) {
            Err(fault) => Err(fault),
            Ok(()) => result,
        };
        match result {
            Ok(()) => {
                self.set_state(id, TaskState::Completed);
                *self.exit.borrow_mut() = Some(Exit::Completed(id));
            }
            Err(error) => {
                self.set_state(id, TaskState::Faulted);
                *self.exit.borrow_mut() = Some(Exit::Faulted(error));
            }
        }
        self.previous.set(None);
        self.current.set(ContextRef::Root);
        (self.ctx_ptr(ContextRef::Task(id)), self.root_ctx.get())
    }

    /// Stage an emergency switch to the root after a guard fault. The
    /// faulted task is abandoned where it stands.
    fn stage_fault(&self, from: TaskId, error: RtError) -> SwitchPair {
        self.set_state(from, TaskState::Faulted);
        *self.exit.borrow_mut() = Some(Exit::Faulted(error));
        self.previous.set(None);
        self.current.set(ContextRef::Root);
        (self.ctx_ptr(ContextRef::Task(from)), self.root_ctx.get())
    }

    fn take_entry(&self, id: TaskId) -> Option<crate::task::EntryFn> {
        self.tasks.borrow()[id.0].entry.borrow_mut().take()
    }

    fn name_of(&self, id: TaskId) -> String {
        self.tasks.borrow()[id.0].name.clone()
    }
}

/// First function on every fresh task stack, reached through the
/// architecture trampoline. Runs the entry closure, then hands control
/// to the root context forever.
pub(crate) extern "C" fn task_entry(cell: *const TaskCell) -> ! {
    // SAFETY: the cell is boxed inside the task arena and outlives the
    // task's context.
    let (weak, id) = {
        let cell = unsafe { &*cell };
        (cell.core.clone(), cell.id)
    };

    let outcome = {
        let core = weak
            .upgrade()
            .expect("scheduler core dropped while entering a task");
        let entry = core.take_entry(id).expect("task entered twice");
        drop(core);
        let yielder = Yielder {
            core: weak.clone(),
            id,
        };
        panic::catch_unwind(AssertUnwindSafe(|| entry(&yielder)))
    };

    let core = weak
        .upgrade()
        .expect("scheduler core dropped while a task was running");
    let result = match outcome {
        Ok(result) => result,
        Err(payload) => Err(RtError::TaskPanicked {
            name: core.name_of(id),
            message: panic_message(payload.as_ref()),
        }),
    };
    let (save, restore) = core.stage_finish(id, result);
    drop(core);
    // SAFETY: staged like any other switch. This context is dead and
    // will never be restored; not returning is the point.
    unsafe { arch::context_switch(save, restore) };
    unreachable!("completed task context was resumed")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn single_task_runs_to_completion() {
        let sched = Scheduler::new();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let id = sched
            .spawn("one", move |_y| {
                h.set(h.get() + 1);
                Ok(())
            })
            .unwrap();
        assert_eq!(sched.state(id), Some(TaskState::New));
        assert_eq!(sched.resume(id).unwrap(), Step::Completed(id));
        assert_eq!(hits.get(), 1);
        assert_eq!(sched.state(id), Some(TaskState::Completed));
    }

    #[test]
    fn yield_back_reaches_root_and_resumes_in_place() {
        let sched = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let id = sched
            .spawn("stepper", move |y| {
                l.borrow_mut().push(1);
                y.yield_back()?;
                l.borrow_mut().push(2);
                y.yield_back()?;
                l.borrow_mut().push(3);
                Ok(())
            })
            .unwrap();
        assert_eq!(sched.resume(id).unwrap(), Step::Yielded(id));
        assert_eq!(sched.state(id), Some(TaskState::Suspended));
        assert_eq!(sched.resume(id).unwrap(), Step::Yielded(id));
        assert_eq!(sched.resume(id).unwrap(), Step::Completed(id));
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn ping_pong_tracks_the_resumer() {
        let sched = Scheduler::new();
        let log: Rc<RefCell<Vec<&str>>> = Rc::new(RefCell::new(Vec::new()));

        let lb = log.clone();
        let b = sched
            .spawn("b", move |y| {
                lb.borrow_mut().push("b1");
                y.yield_back()?;
                lb.borrow_mut().push("b2");
                y.yield_back()?;
                Ok(())
            })
            .unwrap();

        let la = log.clone();
        let a = sched
            .spawn("a", move |y| {
                la.borrow_mut().push("a1");
                y.yield_to(b)?;
                la.borrow_mut().push("a2");
                y.yield_to(b)?;
                la.borrow_mut().push("a3");
                Ok(())
            })
            .unwrap();

        assert_eq!(sched.resume(a).unwrap(), Step::Completed(a));
        assert_eq!(*log.borrow(), vec!["a1", "b1", "a2", "b2", "a3"]);
        // b is parked at its last yield point and will never run again.
        assert_eq!(sched.state(b), Some(TaskState::Suspended));
    }

    #[test]
    fn locals_survive_suspension() {
        let sched = Scheduler::new();
        let out = Rc::new(Cell::new(0u64));
        let o = out.clone();
        let id = sched
            .spawn("adder", move |y| {
                let mut acc = 1u64;
                y.yield_back()?;
                acc += 10;
                y.yield_back()?;
                acc += 100;
                o.set(acc);
                Ok(())
            })
            .unwrap();
        while !matches!(sched.resume(id).unwrap(), Step::Completed(_)) {}
        assert_eq!(out.get(), 111);
    }

    #[test]
    fn yield_to_unknown_task_fails_loudly() {
        let sched = Scheduler::new();
        let id = sched
            .spawn("lost", |y| y.yield_to(TaskId::from_raw(99)))
            .unwrap();
        let err = sched.resume(id).unwrap_err();
        assert!(matches!(err, RtError::UnknownTask(t) if t.as_raw() == 99));
        assert_eq!(sched.state(id), Some(TaskState::Faulted));
    }

    #[test]
    fn yield_to_completed_task_fails_loudly() {
        let sched = Scheduler::new();
        let done = sched.spawn("done", |_y| Ok(())).unwrap();
        assert_eq!(sched.resume(done).unwrap(), Step::Completed(done));

        let chaser = sched.spawn("chaser", move |y| y.yield_to(done)).unwrap();
        let err = sched.resume(chaser).unwrap_err();
        assert!(matches!(
            err,
            RtError::NotResumable { state: TaskState::Completed, .. }
        ));
    }

    #[test]
    fn yield_to_self_fails_without_switching() {
        let sched = Scheduler::new();
        let id = sched
            .spawn("narcissist", |y| {
                let err = y.yield_to(y.task_id()).unwrap_err();
                assert!(matches!(err, RtError::YieldToSelf));
                Ok(())
            })
            .unwrap();
        assert_eq!(sched.resume(id).unwrap(), Step::Completed(id));
    }

    #[test]
    fn resume_completed_task_fails() {
        let sched = Scheduler::new();
        let id = sched.spawn("oneshot", |_y| Ok(())).unwrap();
        assert_eq!(sched.resume(id).unwrap(), Step::Completed(id));
        let err = sched.resume(id).unwrap_err();
        assert!(matches!(
            err,
            RtError::NotResumable { state: TaskState::Completed, .. }
        ));
    }

    #[test]
    fn resume_unknown_task_fails() {
        let sched = Scheduler::new();
        let err = sched.resume(TaskId::from_raw(7)).unwrap_err();
        assert!(matches!(err, RtError::UnknownTask(_)));
    }

    #[test]
    fn panicking_task_reports_a_fault() {
        let sched = Scheduler::new();
        let id = sched
            .spawn("boom", |_y| -> Result<(), RtError> { panic!("kapow") })
            .unwrap();
        let err = sched.resume(id).unwrap_err();
        match err {
            RtError::TaskPanicked { name, message } => {
                assert_eq!(name, "boom");
                assert!(message.contains("kapow"));
            }
            other => panic!("expected TaskPanicked, got {other:?}"),
        }
        assert_eq!(sched.state(id), Some(TaskState::Faulted));
    }

    #[test]
    fn spawn_rejects_undersized_stack() {
        let sched = Scheduler::new();
        let err = sched
            .spawn_with_stack("tiny", 1024, |_y| Ok(()))
            .unwrap_err();
        assert!(matches!(err, RtError::StackTooSmall { .. }));
    }

    #[test]
    fn spawn_from_inside_a_task_is_refused() {
        let sched = Rc::new(Scheduler::new());
        let handle = sched.clone();
        let id = sched
            .spawn("nester", move |_y| {
                let err = handle.spawn("child", |_y| Ok(())).unwrap_err();
                assert!(matches!(err, RtError::SpawnWhileRunning));
                Ok(())
            })
            .unwrap();
        assert_eq!(sched.resume(id).unwrap(), Step::Completed(id));
    }

    #[test]
    fn resume_from_inside_a_task_is_refused() {
        let sched = Rc::new(Scheduler::new());
        let handle = sched.clone();
        let target = Rc::new(Cell::new(TaskId::from_raw(0)));
        let t = target.clone();
        let id = sched
            .spawn("reentrant", move |_y| {
                let err = handle.resume(t.get()).unwrap_err();
                assert!(matches!(err, RtError::NestedResume));
                Ok(())
            })
            .unwrap();
        target.set(id);
        assert_eq!(sched.resume(id).unwrap(), Step::Completed(id));
    }

    #[test]
    fn two_schedulers_coexist() {
        let left = Scheduler::new();
        let right = Scheduler::new();
        let l = left.spawn("l", |y| y.yield_back().and(Ok(()))).unwrap();
        let r = right.spawn("r", |y| y.yield_back().and(Ok(()))).unwrap();

        assert_eq!(left.resume(l).unwrap(), Step::Yielded(l));
        assert_eq!(right.resume(r).unwrap(), Step::Yielded(r));
        assert_eq!(left.resume(l).unwrap(), Step::Completed(l));
        assert_eq!(right.resume(r).unwrap(), Step::Completed(r));
    }

    #[test]
    fn deep_call_graphs_fit_in_the_default_stack() {
        fn descend(y: &Yielder, depth: u32) -> Result<(), RtError> {
            if depth == 0 {
                y.yield_back()
            } else {
                descend(y, depth - 1)
            }
        }
        let sched = Scheduler::new();
        let id = sched.spawn("deep", |y| descend(y, 200)).unwrap();
        assert_eq!(sched.resume(id).unwrap(), Step::Yielded(id));
        assert_eq!(sched.resume(id).unwrap(), Step::Completed(id));
    }

    #[test]
    fn guard_corruption_faults_at_the_next_yield() {
        let sched = Scheduler::new();
        let id = sched
            .spawn("clobbered", |y| {
                y.yield_back()?;
                y.yield_back()?;
                Ok(())
            })
            .unwrap();
        assert_eq!(sched.resume(id).unwrap(), Step::Yielded(id));
        sched.core.tasks.borrow_mut()[id.0].slab.corrupt_guard();
        let err = sched.resume(id).unwrap_err();
        match err {
            RtError::StackOverflow { name, stack_bytes } => {
                assert_eq!(name, "clobbered");
                assert_eq!(stack_bytes, DEFAULT_STACK_SIZE);
            }
            other => panic!("expected StackOverflow, got {other:?}"),
        }
        // The fault is terminal: the task is abandoned where it stands.
        assert_eq!(sched.state(id), Some(TaskState::Faulted));
        assert!(matches!(
            sched.resume(id).unwrap_err(),
            RtError::NotResumable { state: TaskState::Faulted, .. }
        ));
    }

    #[test]
    fn task_names_are_reported() {
        let sched = Scheduler::new();
        let id = sched.spawn("named", |_y| Ok(())).unwrap();
        assert_eq!(sched.task_name(id).as_deref(), Some("named"));
        assert_eq!(sched.task_count(), 1);
        assert_eq!(sched.task_name(TaskId::from_raw(9)), None);
    }
}
