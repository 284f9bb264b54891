//! Lifecycle task queues.
//!
//! The [`Lifecycle`] sequences the side effects of binding, attaching,
//! detaching and unbinding a tree of views. Work is not performed where it is
//! requested; instead nodes are enqueued into one of nine queues and the
//! queues are drained at controlled points:
//!
//! | Phase | Queues drained at the outermost `end_*` |
//! |-------|------------------------------------------|
//! | bind | bound |
//! | attach | flush (until stable), mount, connect, attached |
//! | detach | flush (until stable), unmount, detached |
//! | unbind | unbound |
//!
//! Each phase keeps a nesting depth: attaching a parent attaches its
//! children, and every child brackets its work with `begin_*`/`end_*`, but
//! only the outermost `end_*` drains. Draining detaches a queue's contents
//! before invoking any callback, so callbacks can safely re-enqueue.
//!
//! The flush queue is additionally drained once per microtask turn: the
//! first [`Lifecycle::enqueue_flush`] of a turn posts a single microtask, so
//! any number of synchronous mutations coalesce into one flush.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use trellis_core::lifecycle::{Lifecycle, LifecycleNode, QueueKind};
//! use trellis_core::LifecycleFlags;
//!
//! struct Counter(Cell<u32>);
//! impl LifecycleNode for Counter {
//!     fn bound(&self, _flags: LifecycleFlags) {
//!         self.0.set(self.0.get() + 1);
//!     }
//! }
//!
//! let lifecycle = Lifecycle::new();
//! let node: Rc<dyn LifecycleNode> = Rc::new(Counter(Cell::new(0)));
//! let id = lifecycle.register(Rc::downgrade(&node));
//!
//! lifecycle.begin_bind();
//! lifecycle.begin_bind();
//! lifecycle.enqueue(QueueKind::Bound, id);
//! lifecycle.end_bind(LifecycleFlags::FROM_BIND);
//! assert_eq!(lifecycle.queue_len(QueueKind::Bound), 1);
//! lifecycle.end_bind(LifecycleFlags::FROM_BIND);
//! assert_eq!(lifecycle.queue_len(QueueKind::Bound), 0);
//! ```

mod microtask;
mod queue;
mod reorder;
mod task;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

pub use microtask::{MicrotaskId, MicrotaskQueue};
pub use reorder::{ReorderPlan, ReorderPlanner};
pub use task::{
    done_task, promise_task, AggregateTask, DoneTask, LifecycleTask, PromiseTask, TaskCallback,
    TaskOutcome, TaskRef, TaskResolver,
};

use queue::Queues;

use crate::error::Error;
use crate::flags::LifecycleFlags;
use crate::logging::PerfSpan;

slotmap::new_key_type! {
    /// Identifies a node registered with a [`Lifecycle`].
    pub struct NodeId;
}

/// The nine lifecycle queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Batched change delivery (collection notifications, deferred target writes).
    Flush,
    /// Deferred dependency connection.
    Connect,
    /// View patching after changes.
    Patch,
    /// Post-bind hooks.
    Bound,
    /// Insertion into the host tree.
    Mount,
    /// Post-attach hooks.
    Attached,
    /// Removal from the host tree.
    Unmount,
    /// Post-detach hooks.
    Detached,
    /// Post-unbind hooks.
    Unbound,
}

impl QueueKind {
    /// Number of queue kinds.
    pub const COUNT: usize = 9;

    /// Every queue kind.
    pub const ALL: [QueueKind; Self::COUNT] = [
        Self::Flush,
        Self::Connect,
        Self::Patch,
        Self::Bound,
        Self::Mount,
        Self::Attached,
        Self::Unmount,
        Self::Detached,
        Self::Unbound,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Whether callbacks may legitimately repopulate this queue while it
    /// drains, so draining must repeat until it is empty.
    pub fn repeats_until_stable(self) -> bool {
        matches!(self, Self::Flush | Self::Patch)
    }
}

/// A lifecycle phase with begin/end batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Binding to a scope.
    Bind,
    /// Attaching to the host tree.
    Attach,
    /// Detaching from the host tree.
    Detach,
    /// Unbinding from a scope.
    Unbind,
}

impl Phase {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        self as usize
    }
}

/// Something that can be queued. Every hook defaults to a no-op.
pub trait LifecycleNode {
    /// Deliver batched changes.
    fn flush(&self, _flags: LifecycleFlags) {}
    /// Connect dependencies.
    fn connect(&self, _flags: LifecycleFlags) {}
    /// Patch after changes.
    fn patch(&self, _flags: LifecycleFlags) {}
    /// Bind finished.
    fn bound(&self, _flags: LifecycleFlags) {}
    /// Insert into the host tree.
    fn mount(&self, _flags: LifecycleFlags) {}
    /// Attach finished.
    fn attached(&self, _flags: LifecycleFlags) {}
    /// Remove from the host tree.
    fn unmount(&self, _flags: LifecycleFlags) {}
    /// Detach finished.
    fn detached(&self, _flags: LifecycleFlags) {}
    /// Unbind finished.
    fn unbound(&self, _flags: LifecycleFlags) {}
}

fn dispatch(node: &dyn LifecycleNode, kind: QueueKind, flags: LifecycleFlags) {
    match kind {
        QueueKind::Flush => node.flush(flags),
        QueueKind::Connect => node.connect(flags),
        QueueKind::Patch => node.patch(flags),
        QueueKind::Bound => node.bound(flags),
        QueueKind::Mount => node.mount(flags),
        QueueKind::Attached => node.attached(flags),
        QueueKind::Unmount => node.unmount(flags),
        QueueKind::Detached => node.detached(flags),
        QueueKind::Unbound => node.unbound(flags),
    }
}

/// Holds the [`NodeId`] of an object that registers with a lifecycle
/// lazily, the first time it needs to be queued.
#[derive(Debug, Default)]
pub struct NodeSlot(Cell<Option<NodeId>>);

impl NodeSlot {
    /// An unregistered slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered id, if any.
    pub fn get(&self) -> Option<NodeId> {
        self.0.get()
    }

    /// The registered id, registering `node` on first use.
    pub fn get_or_register<F>(&self, lifecycle: &Lifecycle, node: F) -> NodeId
    where
        F: FnOnce() -> Weak<dyn LifecycleNode>,
    {
        match self.0.get() {
            Some(id) if lifecycle.contains(id) => id,
            _ => {
                let id = lifecycle.register(node());
                self.0.set(Some(id));
                id
            }
        }
    }

    /// Release the registration.
    pub fn release(&self, lifecycle: &Lifecycle) {
        if let Some(id) = self.0.take() {
            lifecycle.release(id);
        }
    }
}

/// Lifecycle settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Upper bound on repeated passes over a self-repopulating queue.
    pub max_drain_passes: usize,
    /// Batch size for [`Lifecycle::process_microtask_batch`].
    pub microtask_batch_size: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_drain_passes: 100,
            microtask_batch_size: 64,
        }
    }
}

impl LifecycleConfig {
    /// Set the drain pass limit.
    pub fn with_max_drain_passes(mut self, passes: usize) -> Self {
        self.max_drain_passes = passes.max(1);
        self
    }

    /// Set the microtask batch size.
    pub fn with_microtask_batch_size(mut self, size: usize) -> Self {
        self.microtask_batch_size = size.max(1);
        self
    }
}

type ErrorHandler = Rc<dyn Fn(&Error)>;

/// The lifecycle scheduler. See the [module documentation](self).
pub struct Lifecycle {
    this: Weak<Lifecycle>,
    config: LifecycleConfig,
    queues: RefCell<Queues>,
    depth: [Cell<u32>; Phase::COUNT],
    active: RefCell<Vec<Phase>>,
    pending: RefCell<[Option<Rc<AggregateTask>>; Phase::COUNT]>,
    microtasks: MicrotaskQueue,
    flush_scheduled: Cell<bool>,
    error_handler: RefCell<ErrorHandler>,
}

impl Lifecycle {
    /// Create a lifecycle with default settings.
    pub fn new() -> Rc<Self> {
        Self::with_config(LifecycleConfig::default())
    }

    /// Create a lifecycle with custom settings.
    pub fn with_config(config: LifecycleConfig) -> Rc<Self> {
        let error_handler: ErrorHandler = Rc::new(|error: &Error| {
            tracing::error!(target: "trellis_core::lifecycle", %error, "lifecycle task failed");
        });
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            queues: RefCell::new(Queues::default()),
            depth: Default::default(),
            active: RefCell::new(Vec::new()),
            pending: RefCell::new(Default::default()),
            microtasks: MicrotaskQueue::with_batch_size(config.microtask_batch_size),
            flush_scheduled: Cell::new(false),
            error_handler: RefCell::new(error_handler),
        })
    }

    /// The settings this lifecycle was created with.
    pub fn config(&self) -> LifecycleConfig {
        self.config
    }

    // -- nodes ---------------------------------------------------------------

    /// Register a node. The lifecycle holds it weakly.
    pub fn register(&self, node: Weak<dyn LifecycleNode>) -> NodeId {
        self.queues.borrow_mut().register(node)
    }

    /// Forget a node. Safe to call while it is queued.
    pub fn release(&self, id: NodeId) {
        self.queues.borrow_mut().release(id);
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: NodeId) -> bool {
        self.queues.borrow().contains(id)
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.queues.borrow().node_count()
    }

    /// Add a node to a queue. Returns `false` if it was already there.
    pub fn enqueue(&self, kind: QueueKind, id: NodeId) -> bool {
        let added = self.queues.borrow_mut().enqueue(kind, id);
        if added {
            tracing::trace!(target: "trellis_core::lifecycle", queue = ?kind, ?id, "enqueued");
        }
        added
    }

    /// Take a node back out of a queue before it is drained. Returns `false`
    /// if it was not queued there.
    pub fn dequeue(&self, kind: QueueKind, id: NodeId) -> bool {
        let removed = self.queues.borrow_mut().dequeue(kind, id);
        if removed {
            tracing::trace!(target: "trellis_core::lifecycle", queue = ?kind, ?id, "dequeued");
        }
        removed
    }

    /// Whether a node currently sits in a queue.
    pub fn is_queued(&self, kind: QueueKind, id: NodeId) -> bool {
        self.queues.borrow().is_queued(kind, id)
    }

    /// Number of nodes in a queue.
    pub fn queue_len(&self, kind: QueueKind) -> usize {
        self.queues.borrow().count(kind)
    }

    /// Add a node to the flush queue and make sure a flush runs on the next
    /// microtask turn.
    pub fn enqueue_flush(&self, id: NodeId) -> bool {
        let added = self.enqueue(QueueKind::Flush, id);
        if !self.flush_scheduled.replace(true) {
            let this = self.this.clone();
            self.microtasks.post(move || {
                if let Some(lifecycle) = this.upgrade() {
                    lifecycle.flush_scheduled.set(false);
                    lifecycle.process_flush_queue(LifecycleFlags::FROM_ASYNC_FLUSH);
                }
            });
        }
        added
    }

    /// Add a node to the connect queue.
    pub fn enqueue_connect(&self, id: NodeId) -> bool {
        self.enqueue(QueueKind::Connect, id)
    }

    /// Add a node to the patch queue.
    pub fn enqueue_patch(&self, id: NodeId) -> bool {
        self.enqueue(QueueKind::Patch, id)
    }

    /// Add a node to the bound queue.
    pub fn enqueue_bound(&self, id: NodeId) -> bool {
        self.enqueue(QueueKind::Bound, id)
    }

    /// Add a node to the mount queue.
    pub fn enqueue_mount(&self, id: NodeId) -> bool {
        self.enqueue(QueueKind::Mount, id)
    }

    /// Add a node to the attached queue.
    pub fn enqueue_attached(&self, id: NodeId) -> bool {
        self.enqueue(QueueKind::Attached, id)
    }

    /// Add a node to the unmount queue.
    pub fn enqueue_unmount(&self, id: NodeId) -> bool {
        self.enqueue(QueueKind::Unmount, id)
    }

    /// Add a node to the detached queue.
    pub fn enqueue_detached(&self, id: NodeId) -> bool {
        self.enqueue(QueueKind::Detached, id)
    }

    /// Add a node to the unbound queue.
    pub fn enqueue_unbound(&self, id: NodeId) -> bool {
        self.enqueue(QueueKind::Unbound, id)
    }

    // -- draining ------------------------------------------------------------

    /// Drain one queue.
    ///
    /// Returns the number of callbacks invoked.
    pub fn drain(&self, kind: QueueKind, flags: LifecycleFlags) -> usize {
        let mut invoked = 0;
        let mut passes = 0;
        loop {
            let batch = self.queues.borrow_mut().take(kind);
            if batch.is_empty() {
                break;
            }
            passes += 1;
            let ids: Vec<_> = batch.iter().map(|(id, _)| *id).collect();
            for (_, node) in batch {
                if let Some(node) = node {
                    dispatch(node.as_ref(), kind, flags);
                    invoked += 1;
                }
            }
            self.queues.borrow_mut().collect_garbage(&ids);

            if !kind.repeats_until_stable() {
                break;
            }
            if passes >= self.config.max_drain_passes {
                tracing::warn!(
                    target: "trellis_core::lifecycle",
                    queue = ?kind,
                    passes,
                    remaining = self.queue_len(kind),
                    "queue did not stabilize; leaving the rest for the next drain"
                );
                break;
            }
        }
        invoked
    }

    /// Drain the flush queue until stable.
    pub fn process_flush_queue(&self, flags: LifecycleFlags) -> usize {
        let _span = PerfSpan::new(crate::logging::span_names::FLUSH);
        self.drain(QueueKind::Flush, flags | LifecycleFlags::FROM_FLUSH)
    }

    /// Drain the connect queue.
    pub fn process_connect_queue(&self, flags: LifecycleFlags) -> usize {
        self.drain(QueueKind::Connect, flags)
    }

    /// Drain the patch queue until stable.
    pub fn process_patch_queue(&self, flags: LifecycleFlags) -> usize {
        self.drain(QueueKind::Patch, flags)
    }

    /// Drain the bound queue.
    pub fn process_bind_queue(&self, flags: LifecycleFlags) {
        self.drain(QueueKind::Bound, flags);
    }

    /// Drain flush, mount, connect and attached, in that order.
    pub fn process_attach_queue(&self, flags: LifecycleFlags) {
        self.process_flush_queue(flags | LifecycleFlags::FROM_SYNC_FLUSH);
        self.drain(QueueKind::Mount, flags);
        self.process_connect_queue(flags);
        self.drain(QueueKind::Attached, flags);
    }

    /// Drain flush, unmount and detached, in that order.
    pub fn process_detach_queue(&self, flags: LifecycleFlags) {
        self.process_flush_queue(flags | LifecycleFlags::FROM_SYNC_FLUSH);
        self.drain(QueueKind::Unmount, flags);
        self.drain(QueueKind::Detached, flags);
    }

    /// Drain the unbound queue.
    pub fn process_unbind_queue(&self, flags: LifecycleFlags) {
        self.drain(QueueKind::Unbound, flags);
    }

    fn process_phase(&self, phase: Phase, flags: LifecycleFlags) {
        let _span = PerfSpan::new(crate::logging::span_names::LIFECYCLE);
        tracing::debug!(target: "trellis_core::lifecycle", ?phase, "processing phase queues");
        match phase {
            Phase::Bind => self.process_bind_queue(flags),
            Phase::Attach => self.process_attach_queue(flags),
            Phase::Detach => self.process_detach_queue(flags),
            Phase::Unbind => self.process_unbind_queue(flags),
        }
    }

    // -- phases --------------------------------------------------------------

    fn begin(&self, phase: Phase) {
        let depth = &self.depth[phase.index()];
        depth.set(depth.get() + 1);
        self.active.borrow_mut().push(phase);
    }

    fn end(&self, phase: Phase, flags: LifecycleFlags) -> Option<TaskRef> {
        {
            let mut active = self.active.borrow_mut();
            if let Some(pos) = active.iter().rposition(|p| *p == phase) {
                active.remove(pos);
            }
        }
        let depth = &self.depth[phase.index()];
        let current = depth.get();
        if current == 0 {
            tracing::warn!(target: "trellis_core::lifecycle", ?phase, "end without matching begin");
            return None;
        }
        depth.set(current - 1);
        if current > 1 {
            return None;
        }

        let pending = self.pending.borrow()[phase.index()].clone();
        if let Some(aggregate) = pending {
            if aggregate.seal(flags) {
                tracing::debug!(
                    target: "trellis_core::lifecycle",
                    ?phase,
                    remaining = aggregate.remaining(),
                    "phase suspended on pending tasks"
                );
                return Some(aggregate);
            }
            self.pending.borrow_mut()[phase.index()] = None;
        }
        self.process_phase(phase, flags);
        None
    }

    /// Start (or nest) a bind batch.
    pub fn begin_bind(&self) {
        self.begin(Phase::Bind);
    }

    /// End a bind batch. The outermost call drains the bound queue, or
    /// returns the task it is waiting for.
    pub fn end_bind(&self, flags: LifecycleFlags) -> Option<TaskRef> {
        self.end(Phase::Bind, flags)
    }

    /// Start (or nest) an attach batch.
    pub fn begin_attach(&self) {
        self.begin(Phase::Attach);
    }

    /// End an attach batch.
    pub fn end_attach(&self, flags: LifecycleFlags) -> Option<TaskRef> {
        self.end(Phase::Attach, flags)
    }

    /// Start (or nest) a detach batch.
    pub fn begin_detach(&self) {
        self.begin(Phase::Detach);
    }

    /// End a detach batch.
    pub fn end_detach(&self, flags: LifecycleFlags) -> Option<TaskRef> {
        self.end(Phase::Detach, flags)
    }

    /// Start (or nest) an unbind batch.
    pub fn begin_unbind(&self) {
        self.begin(Phase::Unbind);
    }

    /// End an unbind batch.
    pub fn end_unbind(&self, flags: LifecycleFlags) -> Option<TaskRef> {
        self.end(Phase::Unbind, flags)
    }

    /// Nesting depth of a phase.
    pub fn depth(&self, phase: Phase) -> u32 {
        self.depth[phase.index()].get()
    }

    /// Whether a bind batch is open.
    pub fn is_binding(&self) -> bool {
        self.depth(Phase::Bind) > 0
    }

    /// Whether an attach batch is open.
    pub fn is_attaching(&self) -> bool {
        self.depth(Phase::Attach) > 0
    }

    /// Whether a detach batch is open.
    pub fn is_detaching(&self) -> bool {
        self.depth(Phase::Detach) > 0
    }

    /// Whether an unbind batch is open.
    pub fn is_unbinding(&self) -> bool {
        self.depth(Phase::Unbind) > 0
    }

    // -- tasks ---------------------------------------------------------------

    /// Make the innermost open phase wait for `task` before draining.
    ///
    /// Outside of any phase there is nothing to suspend; the task's failure,
    /// if any, is still reported.
    pub fn register_task(&self, task: TaskRef) {
        let phase = self.active.borrow().last().copied();
        let Some(phase) = phase else {
            let this = self.this.clone();
            task.wait(Box::new(move |outcome| {
                if let (TaskOutcome::Failed(error), Some(lifecycle)) = (outcome, this.upgrade()) {
                    lifecycle.report_task_error(error.clone());
                }
            }));
            return;
        };
        let aggregate = {
            let mut pending = self.pending.borrow_mut();
            pending[phase.index()]
                .get_or_insert_with(|| AggregateTask::new(self.this.clone(), phase))
                .clone()
        };
        aggregate.add_task(task);
    }

    /// The outstanding aggregate task of a phase, if any.
    pub fn pending_task(&self, phase: Phase) -> Option<TaskRef> {
        self.pending.borrow()[phase.index()]
            .clone()
            .map(|task| task as TaskRef)
    }

    pub(crate) fn resume(&self, phase: Phase, flags: LifecycleFlags) {
        self.pending.borrow_mut()[phase.index()] = None;
        tracing::debug!(target: "trellis_core::lifecycle", ?phase, "resuming phase");
        self.process_phase(phase, flags);
    }

    pub(crate) fn forget_task(&self, phase: Phase) {
        self.pending.borrow_mut()[phase.index()] = None;
    }

    /// Replace the handler for failed lifecycle tasks. The default logs at
    /// error level.
    pub fn set_task_error_handler<F>(&self, handler: F)
    where
        F: Fn(&Error) + 'static,
    {
        *self.error_handler.borrow_mut() = Rc::new(handler);
    }

    /// Report a task failure outside the current call stack.
    pub(crate) fn report_task_error(&self, error: Error) {
        let handler = self.error_handler.borrow().clone();
        self.microtasks.post(move || handler(&error));
    }

    // -- microtasks ----------------------------------------------------------

    /// Post work to the microtask queue.
    pub fn post_microtask<F>(&self, task: F) -> MicrotaskId
    where
        F: FnOnce() + 'static,
    {
        self.microtasks.post(task)
    }

    /// Run every pending microtask, including ones posted while draining.
    ///
    /// Returns the number of microtasks run.
    pub fn drain_microtasks(&self) -> usize {
        self.microtasks.process_all()
    }

    /// Run up to the configured batch of microtasks.
    pub fn process_microtask_batch(&self) -> usize {
        self.microtasks.process_batch()
    }

    /// Whether microtasks are pending.
    pub fn has_pending_microtasks(&self) -> bool {
        self.microtasks.has_pending()
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("nodes", &self.node_count())
            .field("flush", &self.queue_len(QueueKind::Flush))
            .field("bind_depth", &self.depth(Phase::Bind))
            .field("attach_depth", &self.depth(Phase::Attach))
            .field("microtasks", &self.microtasks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Recorder {
        fn push(&self, hook: &str) {
            self.log.borrow_mut().push(format!("{}.{hook}", self.name));
        }
    }

    impl LifecycleNode for Recorder {
        fn flush(&self, _flags: LifecycleFlags) {
            self.push("flush");
        }
        fn connect(&self, _flags: LifecycleFlags) {
            self.push("connect");
        }
        fn bound(&self, _flags: LifecycleFlags) {
            self.push("bound");
        }
        fn mount(&self, _flags: LifecycleFlags) {
            self.push("mount");
        }
        fn attached(&self, _flags: LifecycleFlags) {
            self.push("attached");
        }
        fn unmount(&self, _flags: LifecycleFlags) {
            self.push("unmount");
        }
        fn detached(&self, _flags: LifecycleFlags) {
            self.push("detached");
        }
    }

    fn setup(names: &[&'static str]) -> (Rc<Lifecycle>, Vec<Rc<dyn LifecycleNode>>, Vec<NodeId>, Rc<RefCell<Vec<String>>>) {
        let lifecycle = Lifecycle::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let nodes: Vec<Rc<dyn LifecycleNode>> = names
            .iter()
            .map(|&name| Rc::new(Recorder { name, log: log.clone() }) as Rc<dyn LifecycleNode>)
            .collect();
        let ids = nodes.iter().map(|n| lifecycle.register(Rc::downgrade(n))).collect();
        (lifecycle, nodes, ids, log)
    }

    #[test]
    fn test_nested_bind_drains_once_at_outermost_end() {
        let (lifecycle, _nodes, ids, log) = setup(&["a", "b"]);
        lifecycle.begin_bind();
        lifecycle.enqueue_bound(ids[0]);
        lifecycle.begin_bind();
        lifecycle.enqueue_bound(ids[1]);
        assert!(lifecycle.end_bind(LifecycleFlags::FROM_BIND).is_none());
        assert!(log.borrow().is_empty());
        assert!(lifecycle.end_bind(LifecycleFlags::FROM_BIND).is_none());
        assert_eq!(*log.borrow(), vec!["a.bound", "b.bound"]);
        assert!(!lifecycle.is_binding());
    }

    #[test]
    fn test_attach_order() {
        let (lifecycle, _nodes, ids, log) = setup(&["a"]);
        lifecycle.begin_attach();
        lifecycle.enqueue_attached(ids[0]);
        lifecycle.enqueue_connect(ids[0]);
        lifecycle.enqueue_mount(ids[0]);
        lifecycle.enqueue(QueueKind::Flush, ids[0]);
        lifecycle.end_attach(LifecycleFlags::FROM_ATTACH);
        assert_eq!(*log.borrow(), vec!["a.flush", "a.mount", "a.connect", "a.attached"]);
    }

    #[test]
    fn test_detach_order() {
        let (lifecycle, _nodes, ids, log) = setup(&["a"]);
        lifecycle.begin_detach();
        lifecycle.enqueue_detached(ids[0]);
        lifecycle.enqueue_unmount(ids[0]);
        lifecycle.end_detach(LifecycleFlags::FROM_DETACH);
        assert_eq!(*log.borrow(), vec!["a.unmount", "a.detached"]);
    }

    #[test]
    fn test_flush_coalesces_into_one_microtask() {
        let (lifecycle, _nodes, ids, log) = setup(&["a", "b"]);
        lifecycle.enqueue_flush(ids[0]);
        lifecycle.enqueue_flush(ids[1]);
        lifecycle.enqueue_flush(ids[0]);
        assert_eq!(lifecycle.drain_microtasks(), 1);
        assert_eq!(*log.borrow(), vec!["a.flush", "b.flush"]);
    }

    #[test]
    fn test_flush_repeats_until_stable() {
        struct Reenqueue {
            lifecycle: Weak<Lifecycle>,
            id: Cell<Option<NodeId>>,
            remaining: Cell<u32>,
            runs: Cell<u32>,
        }
        impl LifecycleNode for Reenqueue {
            fn flush(&self, _flags: LifecycleFlags) {
                self.runs.set(self.runs.get() + 1);
                if self.remaining.get() > 0 {
                    self.remaining.set(self.remaining.get() - 1);
                    if let (Some(lifecycle), Some(id)) = (self.lifecycle.upgrade(), self.id.get()) {
                        lifecycle.enqueue(QueueKind::Flush, id);
                    }
                }
            }
        }

        let lifecycle = Lifecycle::new();
        let node = Rc::new(Reenqueue {
            lifecycle: Rc::downgrade(&lifecycle),
            id: Cell::new(None),
            remaining: Cell::new(2),
            runs: Cell::new(0),
        });
        let id = lifecycle.register(Rc::downgrade(&(node.clone() as Rc<dyn LifecycleNode>)));
        node.id.set(Some(id));
        lifecycle.enqueue(QueueKind::Flush, id);
        lifecycle.process_flush_queue(LifecycleFlags::NONE);
        assert_eq!(node.runs.get(), 3);
        assert_eq!(lifecycle.queue_len(QueueKind::Flush), 0);
    }

    #[test]
    fn test_end_bind_returns_pending_task_and_resumes() {
        let (lifecycle, _nodes, ids, log) = setup(&["a"]);
        let (task, resolver) = promise_task();

        lifecycle.begin_bind();
        lifecycle.enqueue_bound(ids[0]);
        lifecycle.register_task(task);
        let pending = lifecycle.end_bind(LifecycleFlags::FROM_BIND);
        let pending = pending.expect("bind should be suspended");
        assert!(!pending.is_done());
        assert!(log.borrow().is_empty());

        resolver.resolve();
        assert!(pending.is_done());
        assert_eq!(*log.borrow(), vec!["a.bound"]);
        assert!(lifecycle.pending_task(Phase::Bind).is_none());
    }

    #[test]
    fn test_rejected_task_is_reported_asynchronously() {
        let (lifecycle, _nodes, _ids, _log) = setup(&[]);
        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = reported.clone();
        lifecycle.set_task_error_handler(move |e| sink.borrow_mut().push(e.clone()));

        let (task, resolver) = promise_task();
        lifecycle.begin_attach();
        lifecycle.register_task(task);
        let pending = lifecycle.end_attach(LifecycleFlags::FROM_ATTACH);
        assert!(pending.is_some());
        resolver.reject(Error::task_rejected("boom"));
        assert!(reported.borrow().is_empty());
        lifecycle.drain_microtasks();
        assert_eq!(*reported.borrow(), vec![Error::task_rejected("boom")]);
    }

    #[test]
    fn test_release_while_queued() {
        let (lifecycle, nodes, ids, log) = setup(&["a"]);
        lifecycle.enqueue_bound(ids[0]);
        lifecycle.release(ids[0]);
        assert!(lifecycle.contains(ids[0]));
        lifecycle.process_bind_queue(LifecycleFlags::NONE);
        assert!(!lifecycle.contains(ids[0]));
        assert_eq!(*log.borrow(), vec!["a.bound"]);
        drop(nodes);
    }

    #[test]
    fn test_node_slot_registers_once() {
        let lifecycle = Lifecycle::new();
        let node: Rc<dyn LifecycleNode> = Rc::new(Recorder::default());
        let slot = NodeSlot::new();
        let a = slot.get_or_register(&lifecycle, || Rc::downgrade(&node));
        let b = slot.get_or_register(&lifecycle, || Rc::downgrade(&node));
        assert_eq!(a, b);
        slot.release(&lifecycle);
        assert_eq!(lifecycle.node_count(), 0);
    }
}
