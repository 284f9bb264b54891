//! Awaitable lifecycle tasks.
//!
//! A phase that must wait for asynchronous work (a pending view swap, for
//! instance) registers a [`LifecycleTask`] with the lifecycle. When the phase
//! ends while such work is outstanding, the lifecycle hands back an
//! [`AggregateTask`] instead of draining its queue; the queue is processed
//! once every sub-task settles.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use trellis_core::lifecycle::{promise_task, LifecycleTask, TaskOutcome};
//!
//! let (task, resolver) = promise_task();
//! let completed = Rc::new(Cell::new(false));
//! let flag = completed.clone();
//! task.wait(Box::new(move |outcome| flag.set(matches!(outcome, TaskOutcome::Completed))));
//!
//! assert!(!task.is_done());
//! resolver.resolve();
//! assert!(completed.get());
//! ```

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::{Lifecycle, Phase};
use crate::error::Error;
use crate::flags::LifecycleFlags;

/// How a task settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The work finished.
    Completed,
    /// The task was cancelled before finishing.
    Cancelled,
    /// The work failed.
    Failed(Error),
}

/// Callback run when a task settles.
pub type TaskCallback = Box<dyn FnOnce(&TaskOutcome)>;

/// An awaitable unit of lifecycle work.
pub trait LifecycleTask {
    /// Whether the task has settled.
    fn is_done(&self) -> bool;

    /// Whether [`cancel`](Self::cancel) would have an effect.
    fn can_cancel(&self) -> bool;

    /// Cancel the task if possible.
    fn cancel(&self);

    /// Run `callback` when the task settles, or immediately if it already has.
    fn wait(&self, callback: TaskCallback);
}

/// A shared task.
pub type TaskRef = Rc<dyn LifecycleTask>;

/// A task that is already complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoneTask;

impl LifecycleTask for DoneTask {
    fn is_done(&self) -> bool {
        true
    }

    fn can_cancel(&self) -> bool {
        false
    }

    fn cancel(&self) {}

    fn wait(&self, callback: TaskCallback) {
        callback(&TaskOutcome::Completed);
    }
}

/// The shared completed task.
pub fn done_task() -> TaskRef {
    Rc::new(DoneTask)
}

// ---------------------------------------------------------------------------
// Settlement bookkeeping shared by the task types
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Settlement {
    outcome: RefCell<Option<TaskOutcome>>,
    waiters: RefCell<Vec<TaskCallback>>,
}

impl Settlement {
    fn is_done(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    fn wait(&self, callback: TaskCallback) {
        let outcome = self.outcome.borrow().clone();
        match outcome {
            Some(outcome) => callback(&outcome),
            None => self.waiters.borrow_mut().push(callback),
        }
    }

    /// Returns `false` if the task had already settled.
    fn settle(&self, outcome: TaskOutcome) -> bool {
        {
            let mut slot = self.outcome.borrow_mut();
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome.clone());
        }
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            waiter(&outcome);
        }
        true
    }
}

// ---------------------------------------------------------------------------
// PromiseTask
// ---------------------------------------------------------------------------

struct PromiseState {
    settlement: Settlement,
    on_complete: RefCell<Option<Box<dyn FnOnce()>>>,
}

/// A task completed from the outside through its [`TaskResolver`].
///
/// An optional completion callback runs when the task resolves; cancelling
/// the task first guarantees the callback never runs.
pub struct PromiseTask {
    state: Rc<PromiseState>,
}

/// Settles a [`PromiseTask`].
pub struct TaskResolver {
    state: Rc<PromiseState>,
}

/// Create a pending task and its resolver.
pub fn promise_task() -> (Rc<PromiseTask>, TaskResolver) {
    PromiseTask::with_completion(|| {})
}

impl PromiseTask {
    /// Create a pending task whose `on_complete` runs when it resolves.
    pub fn with_completion<F>(on_complete: F) -> (Rc<PromiseTask>, TaskResolver)
    where
        F: FnOnce() + 'static,
    {
        let state = Rc::new(PromiseState {
            settlement: Settlement::default(),
            on_complete: RefCell::new(Some(Box::new(on_complete))),
        });
        (
            Rc::new(PromiseTask {
                state: state.clone(),
            }),
            TaskResolver { state },
        )
    }
}

impl LifecycleTask for PromiseTask {
    fn is_done(&self) -> bool {
        self.state.settlement.is_done()
    }

    fn can_cancel(&self) -> bool {
        !self.is_done()
    }

    fn cancel(&self) {
        if self.is_done() {
            return;
        }
        self.state.on_complete.borrow_mut().take();
        self.state.settlement.settle(TaskOutcome::Cancelled);
    }

    fn wait(&self, callback: TaskCallback) {
        self.state.settlement.wait(callback);
    }
}

impl TaskResolver {
    /// Complete the task. Ignored if it was cancelled or already settled.
    pub fn resolve(&self) {
        if self.state.settlement.is_done() {
            return;
        }
        let on_complete = self.state.on_complete.borrow_mut().take();
        if let Some(on_complete) = on_complete {
            on_complete();
        }
        self.state.settlement.settle(TaskOutcome::Completed);
    }

    /// Fail the task. Ignored if it was cancelled or already settled.
    pub fn reject(&self, error: Error) {
        self.state.on_complete.borrow_mut().take();
        self.state.settlement.settle(TaskOutcome::Failed(error));
    }
}

// ---------------------------------------------------------------------------
// AggregateTask
// ---------------------------------------------------------------------------

/// Tracks the sub-tasks registered during one lifecycle phase.
///
/// Once the phase has ended (the aggregate is *sealed*) and every sub-task
/// has settled, the owning lifecycle resumes the phase's queue processing and
/// the aggregate completes. Failures of sub-tasks are reported to the
/// lifecycle's task error handler asynchronously; they do not prevent the
/// phase from resuming.
pub struct AggregateTask {
    this: Weak<AggregateTask>,
    owner: Weak<Lifecycle>,
    phase: Phase,
    flags: Cell<LifecycleFlags>,
    tasks: RefCell<Vec<TaskRef>>,
    remaining: Cell<usize>,
    sealed: Cell<bool>,
    errors: RefCell<Vec<Error>>,
    settlement: Settlement,
}

impl AggregateTask {
    pub(crate) fn new(owner: Weak<Lifecycle>, phase: Phase) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            owner,
            phase,
            flags: Cell::new(LifecycleFlags::NONE),
            tasks: RefCell::new(Vec::new()),
            remaining: Cell::new(0),
            sealed: Cell::new(false),
            errors: RefCell::new(Vec::new()),
            settlement: Settlement::default(),
        })
    }

    /// The phase this aggregate gates.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of sub-tasks that have not settled.
    pub fn remaining(&self) -> usize {
        self.remaining.get()
    }

    /// Track another sub-task.
    pub fn add_task(&self, task: TaskRef) {
        self.remaining.set(self.remaining.get() + 1);
        self.tasks.borrow_mut().push(task.clone());
        let this = self.this.clone();
        task.wait(Box::new(move |outcome| {
            if let Some(this) = this.upgrade() {
                this.sub_task_settled(outcome);
            }
        }));
    }

    /// Mark the phase as ended. Returns `true` if sub-tasks are still
    /// outstanding, in which case the aggregate resumes the phase itself.
    pub(crate) fn seal(&self, flags: LifecycleFlags) -> bool {
        self.flags.set(flags);
        self.sealed.set(true);
        if self.remaining.get() > 0 {
            return true;
        }
        self.report_errors();
        self.settlement.settle(TaskOutcome::Completed);
        false
    }

    fn sub_task_settled(&self, outcome: &TaskOutcome) {
        if let TaskOutcome::Failed(error) = outcome {
            self.errors.borrow_mut().push(error.clone());
        }
        let remaining = self.remaining.get().saturating_sub(1);
        self.remaining.set(remaining);
        if remaining == 0 && self.sealed.get() && !self.settlement.is_done() {
            self.finish();
        }
    }

    fn finish(&self) {
        self.report_errors();
        if let Some(owner) = self.owner.upgrade() {
            owner.resume(self.phase, self.flags.get());
        }
        self.settlement.settle(TaskOutcome::Completed);
    }

    fn report_errors(&self) {
        let errors = std::mem::take(&mut *self.errors.borrow_mut());
        if let Some(owner) = self.owner.upgrade() {
            for error in errors {
                owner.report_task_error(error);
            }
        }
    }
}

impl LifecycleTask for AggregateTask {
    fn is_done(&self) -> bool {
        self.settlement.is_done()
    }

    fn can_cancel(&self) -> bool {
        !self.is_done() && self.tasks.borrow().iter().all(|t| t.is_done() || t.can_cancel())
    }

    fn cancel(&self) {
        if !self.can_cancel() {
            return;
        }
        let tasks = self.tasks.borrow().clone();
        // Mark settled first so sub-task cancellations don't resume the phase.
        self.settlement.settle(TaskOutcome::Cancelled);
        for task in tasks {
            task.cancel();
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.forget_task(self.phase);
        }
    }

    fn wait(&self, callback: TaskCallback) {
        self.settlement.wait(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_task_waits_immediately() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        DoneTask.wait(Box::new(move |o| flag.set(*o == TaskOutcome::Completed)));
        assert!(ran.get());
        assert!(!DoneTask.can_cancel());
    }

    #[test]
    fn test_cancel_prevents_completion_callback() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let (task, resolver) = PromiseTask::with_completion(move || flag.set(true));
        assert!(task.can_cancel());
        task.cancel();
        resolver.resolve();
        assert!(!ran.get());
        assert!(task.is_done());
    }

    #[test]
    fn test_reject_reports_failure() {
        let (task, resolver) = promise_task();
        let seen = Rc::new(RefCell::new(None));
        let slot = seen.clone();
        task.wait(Box::new(move |o| *slot.borrow_mut() = Some(o.clone())));
        resolver.reject(Error::task_rejected("swap failed"));
        assert_eq!(
            *seen.borrow(),
            Some(TaskOutcome::Failed(Error::task_rejected("swap failed")))
        );
    }

    #[test]
    fn test_aggregate_cancel_requires_all_cancellable() {
        let aggregate = AggregateTask::new(Weak::new(), Phase::Bind);
        let (a, _ra) = promise_task();
        aggregate.add_task(a.clone());
        assert!(aggregate.can_cancel());

        struct Stubborn;
        impl LifecycleTask for Stubborn {
            fn is_done(&self) -> bool {
                false
            }
            fn can_cancel(&self) -> bool {
                false
            }
            fn cancel(&self) {}
            fn wait(&self, _callback: TaskCallback) {}
        }
        aggregate.add_task(Rc::new(Stubborn));
        assert!(!aggregate.can_cancel());
        aggregate.cancel();
        assert!(!a.is_done());
    }

    #[test]
    fn test_aggregate_completes_after_seal() {
        let aggregate = AggregateTask::new(Weak::new(), Phase::Attach);
        let (a, ra) = promise_task();
        aggregate.add_task(a);
        assert!(aggregate.seal(LifecycleFlags::FROM_ATTACH));
        assert!(!aggregate.is_done());
        ra.resolve();
        assert!(aggregate.is_done());
    }
}
