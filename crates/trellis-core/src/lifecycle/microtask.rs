//! Microtask queue.
//!
//! Work that must run "after the current synchronous operation" (the
//! coalesced flush, error reports for rejected tasks, completion of
//! aggregate tasks) is posted here. The host drains the queue at the end of
//! each turn, or tests drain it explicitly.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// Identifies a posted microtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MicrotaskId(u64);

impl MicrotaskId {
    /// Get the raw u64 value of this ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

type BoxedMicrotask = Box<dyn FnOnce()>;

struct MicrotaskData {
    id: MicrotaskId,
    task: BoxedMicrotask,
}

/// A FIFO queue of deferred closures.
pub struct MicrotaskQueue {
    tasks: RefCell<VecDeque<MicrotaskData>>,
    next_id: Cell<u64>,
    batch_size: Cell<usize>,
}

impl MicrotaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::with_batch_size(64)
    }

    /// Create a queue with a custom batch size for [`process_batch`](Self::process_batch).
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            tasks: RefCell::new(VecDeque::new()),
            next_id: Cell::new(1),
            batch_size: Cell::new(batch_size.max(1)),
        }
    }

    /// Post a closure to run on the next drain.
    pub fn post<F>(&self, task: F) -> MicrotaskId
    where
        F: FnOnce() + 'static,
    {
        let id = MicrotaskId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.tasks.borrow_mut().push_back(MicrotaskData {
            id,
            task: Box::new(task),
        });
        id
    }

    /// Cancel a pending microtask.
    ///
    /// Returns `true` if the task was found and cancelled.
    pub fn cancel(&self, id: MicrotaskId) -> bool {
        let mut tasks = self.tasks.borrow_mut();
        if let Some(pos) = tasks.iter().position(|t| t.id == id) {
            tasks.remove(pos);
            true
        } else {
            false
        }
    }

    /// Check if there are any pending tasks.
    pub fn has_pending(&self) -> bool {
        !self.tasks.borrow().is_empty()
    }

    /// Get the number of pending tasks.
    pub fn pending_count(&self) -> usize {
        self.tasks.borrow().len()
    }

    fn pop(&self) -> Option<MicrotaskData> {
        self.tasks.borrow_mut().pop_front()
    }

    /// Run up to the batch size of tasks.
    ///
    /// Returns the number of tasks processed.
    pub fn process_batch(&self) -> usize {
        let mut count = 0;
        while count < self.batch_size.get() {
            let Some(data) = self.pop() else { break };
            (data.task)();
            count += 1;
        }
        count
    }

    /// Run tasks until the queue is empty, including tasks posted by tasks.
    ///
    /// Returns the number of tasks processed.
    pub fn process_all(&self) -> usize {
        let mut count = 0;
        while let Some(data) = self.pop() {
            (data.task)();
            count += 1;
        }
        count
    }

    /// Set the batch size.
    pub fn set_batch_size(&self, size: usize) {
        self.batch_size.set(size.max(1));
    }
}

impl Default for MicrotaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_fifo_order() {
        let queue = MicrotaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            queue.post(move || log.borrow_mut().push(i));
        }
        assert_eq!(queue.process_all(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_cancel() {
        let queue = MicrotaskQueue::new();
        let id = queue.post(|| {});
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(!queue.has_pending());
    }

    #[test]
    fn test_tasks_posted_while_draining_run() {
        let queue = Rc::new(MicrotaskQueue::new());
        let ran = Rc::new(Cell::new(false));
        {
            let queue2 = queue.clone();
            let ran = ran.clone();
            queue.post(move || {
                queue2.post(move || ran.set(true));
            });
        }
        assert_eq!(queue.process_all(), 2);
        assert!(ran.get());
    }

    #[test]
    fn test_batch_limit() {
        let queue = MicrotaskQueue::with_batch_size(2);
        for _ in 0..5 {
            queue.post(|| {});
        }
        assert_eq!(queue.process_batch(), 2);
        assert_eq!(queue.pending_count(), 3);
    }
}
