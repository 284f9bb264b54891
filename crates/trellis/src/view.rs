//! Composable views.
//!
//! A [`View`] owns a set of bindings and child views and drives them through
//! the four lifecycle phases. Every phase is bracketed with the lifecycle's
//! `begin_*`/`end_*` pair, so a whole tree binds, attaches, detaches or
//! unbinds as one batch: the post-phase hooks (`bound`, `mount`, `attached`,
//! ...) are queued while the tree is walked and run once, when the outermost
//! view ends the phase.
//!
//! Mount hooks run parent first; `attached` and `detached` hooks run
//! children first, because children enqueue them before their parent does.
//!
//! # Example
//!
//! ```
//! use trellis::binding::{BindingCommand, BindingInstruction};
//! use trellis::runtime::Runtime;
//! use trellis::view::{NoHooks, View};
//! use trellis_core::{LifecycleFlags, ObjectRef, Value};
//!
//! let runtime = Runtime::builder().build();
//! let label = ObjectRef::new();
//! let view = runtime
//!     .create_view(
//!         NoHooks,
//!         &[(Value::Object(label.clone()), BindingInstruction::new(BindingCommand::ToView, "text", "message"))],
//!     )
//!     .unwrap();
//!
//! let vm = ObjectRef::from_pairs([("message", "hello")]);
//! view.bind(LifecycleFlags::NONE, &trellis::scope::Scope::create(vm).unwrap()).unwrap();
//! view.attach(LifecycleFlags::NONE);
//! assert_eq!(label.get("text"), Value::from("hello"));
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use trellis_core::{Lifecycle, LifecycleFlags, LifecycleNode, NodeId, NodeSlot, QueueKind, TaskRef, Value};

use crate::binding::Bindable;
use crate::error::Result;
use crate::scope::Scope;

/// Callbacks a view runs during its lifecycle. Every hook defaults to a
/// no-op.
///
/// The `*ing` hooks run synchronously while the tree is walked and may
/// register lifecycle tasks to hold the phase open. The others run when the
/// batch drains.
pub trait ViewHooks {
    /// Before the view's bindings bind.
    fn binding(&self, _flags: LifecycleFlags) {}
    /// After the whole tree has bound.
    fn bound(&self, _flags: LifecycleFlags) {}
    /// Before children attach.
    fn attaching(&self, _flags: LifecycleFlags) {}
    /// Insert into the host tree.
    fn mount(&self, _flags: LifecycleFlags) {}
    /// After the whole tree has attached.
    fn attached(&self, _flags: LifecycleFlags) {}
    /// Before children detach.
    fn detaching(&self, _flags: LifecycleFlags) {}
    /// Remove from the host tree.
    fn unmount(&self, _flags: LifecycleFlags) {}
    /// After the whole tree has detached.
    fn detached(&self, _flags: LifecycleFlags) {}
    /// Before children and bindings unbind.
    fn unbinding(&self, _flags: LifecycleFlags) {}
    /// After the whole tree has unbound.
    fn unbound(&self, _flags: LifecycleFlags) {}
    /// Apply pending changes to the host tree.
    fn patch(&self, _flags: LifecycleFlags) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl ViewHooks for NoHooks {}

bitflags! {
    /// Where a view is in its lifecycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ViewState: u8 {
        /// Bound to a scope.
        const BOUND    = 1 << 0;
        /// Attached to the host tree.
        const ATTACHED = 1 << 1;
    }
}

/// How a child view gets its scope.
enum ChildScope {
    /// Bind to the parent's scope.
    Inherit,
    /// Bind to a child scope over this binding context, chained to the
    /// parent's override context.
    Context(Value),
}

/// A node in a view tree.
pub struct View {
    this: Weak<View>,
    lifecycle: Rc<Lifecycle>,
    hooks: Box<dyn ViewHooks>,
    bindings: RefCell<Vec<Rc<dyn Bindable>>>,
    children: RefCell<Vec<(Rc<View>, ChildScope)>>,
    scope: RefCell<Option<Rc<Scope>>>,
    state: Cell<ViewState>,
    node: NodeSlot,
}

impl View {
    /// An empty view.
    pub fn new(lifecycle: Rc<Lifecycle>, hooks: impl ViewHooks + 'static) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            lifecycle,
            hooks: Box::new(hooks),
            bindings: RefCell::new(Vec::new()),
            children: RefCell::new(Vec::new()),
            scope: RefCell::new(None),
            state: Cell::new(ViewState::empty()),
            node: NodeSlot::new(),
        })
    }

    /// Add a binding. It is bound the next time the view binds.
    pub fn add_binding(&self, binding: Rc<dyn Bindable>) {
        self.bindings.borrow_mut().push(binding);
    }

    /// Add a child that shares this view's scope.
    pub fn add_child(&self, child: Rc<View>) {
        self.children.borrow_mut().push((child, ChildScope::Inherit));
    }

    /// Add a child bound to its own binding context, as a repeater does for
    /// each item.
    pub fn add_child_with_context(&self, child: Rc<View>, binding_context: impl Into<Value>) {
        self.children
            .borrow_mut()
            .push((child, ChildScope::Context(binding_context.into())));
    }

    /// Remove a child. The child is not unbound.
    pub fn remove_child(&self, child: &Rc<View>) -> bool {
        let mut children = self.children.borrow_mut();
        let before = children.len();
        children.retain(|(c, _)| !Rc::ptr_eq(c, child));
        children.len() != before
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.children.borrow().len()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ViewState {
        self.state.get()
    }

    /// The scope the view is bound to.
    pub fn scope(&self) -> Option<Rc<Scope>> {
        self.scope.borrow().clone()
    }

    fn node_id(&self) -> NodeId {
        let this = self.this.clone();
        self.node
            .get_or_register(&self.lifecycle, move || this as Weak<dyn LifecycleNode>)
    }

    fn children_snapshot(&self) -> Vec<Rc<View>> {
        self.children.borrow().iter().map(|(child, _)| child.clone()).collect()
    }

    /// Bind the view and its children to `scope`.
    ///
    /// Returns the pending task when a hook registered asynchronous work and
    /// this was the outermost bind; `bound` hooks then run once it settles.
    pub fn bind(&self, flags: LifecycleFlags, scope: &Rc<Scope>) -> Result<Option<TaskRef>> {
        if self.state.get().contains(ViewState::BOUND) {
            if self.scope.borrow().as_ref().is_some_and(|current| Rc::ptr_eq(current, scope)) {
                return Ok(None);
            }
            self.unbind(flags);
        }
        let flags = flags | LifecycleFlags::FROM_BIND;
        self.lifecycle.begin_bind();
        self.hooks.binding(flags);

        if let Err(err) = self.bind_contents(flags, scope) {
            // Everything queued by this bind was rolled back.
            if let Some(task) = self.lifecycle.end_bind(flags) {
                if task.can_cancel() {
                    task.cancel();
                }
            }
            return Err(err);
        }

        *self.scope.borrow_mut() = Some(scope.clone());
        self.state.set(self.state.get() | ViewState::BOUND);
        let id = self.node_id();
        self.lifecycle.enqueue_bound(id);
        Ok(self.lifecycle.end_bind(flags))
    }

    fn bind_contents(&self, flags: LifecycleFlags, scope: &Rc<Scope>) -> Result<()> {
        let bindings = self.bindings.borrow().clone();
        for (i, binding) in bindings.iter().enumerate() {
            if let Err(err) = binding.bind(flags, scope) {
                tracing::error!(target: "trellis::binding", error = %err, "view binding failed to bind");
                for bound in &bindings[..i] {
                    bound.unbind(flags);
                }
                return Err(err);
            }
        }

        let children: Vec<(Rc<View>, Option<Value>)> = self
            .children
            .borrow()
            .iter()
            .map(|(child, child_scope)| {
                let context = match child_scope {
                    ChildScope::Inherit => None,
                    ChildScope::Context(context) => Some(context.clone()),
                };
                (child.clone(), context)
            })
            .collect();
        for (i, (child, context)) in children.iter().enumerate() {
            let result = match context {
                None => child.bind(flags, scope),
                Some(context) => Scope::from_parent(scope, context.clone()).and_then(|s| child.bind(flags, &s)),
            };
            if let Err(err) = result {
                for (bound, _) in &children[..i] {
                    bound.withdraw_bound();
                    bound.unbind(flags);
                }
                for binding in &bindings {
                    binding.unbind(flags);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    // A rolled-back subtree must not see `bound` after `unbound`.
    fn withdraw_bound(&self) {
        if let Some(id) = self.node.get() {
            self.lifecycle.dequeue(QueueKind::Bound, id);
        }
        for child in self.children_snapshot() {
            child.withdraw_bound();
        }
    }

    /// Attach the view and its children.
    pub fn attach(&self, flags: LifecycleFlags) -> Option<TaskRef> {
        if self.state.get().contains(ViewState::ATTACHED) {
            return None;
        }
        let flags = flags | LifecycleFlags::FROM_ATTACH;
        self.lifecycle.begin_attach();
        self.hooks.attaching(flags);
        let id = self.node_id();
        self.lifecycle.enqueue_mount(id);
        for child in self.children_snapshot() {
            child.attach(flags);
        }
        self.lifecycle.enqueue_attached(id);
        self.state.set(self.state.get() | ViewState::ATTACHED);
        self.lifecycle.end_attach(flags)
    }

    /// Detach the view and its children.
    pub fn detach(&self, flags: LifecycleFlags) -> Option<TaskRef> {
        if !self.state.get().contains(ViewState::ATTACHED) {
            return None;
        }
        let flags = flags | LifecycleFlags::FROM_DETACH;
        self.lifecycle.begin_detach();
        self.hooks.detaching(flags);
        let id = self.node_id();
        self.lifecycle.enqueue_unmount(id);
        for child in self.children_snapshot() {
            child.detach(flags);
        }
        self.lifecycle.enqueue_detached(id);
        self.state.set(self.state.get() - ViewState::ATTACHED);
        self.lifecycle.end_detach(flags)
    }

    /// Unbind children, then the view's own bindings.
    pub fn unbind(&self, flags: LifecycleFlags) -> Option<TaskRef> {
        if !self.state.get().contains(ViewState::BOUND) {
            return None;
        }
        let flags = flags | LifecycleFlags::FROM_UNBIND;
        self.lifecycle.begin_unbind();
        self.hooks.unbinding(flags);
        for child in self.children_snapshot().iter().rev() {
            child.unbind(flags);
        }
        for binding in self.bindings.borrow().iter() {
            binding.unbind(flags);
        }
        self.scope.borrow_mut().take();
        self.state.set(self.state.get() - ViewState::BOUND);
        let id = self.node_id();
        self.lifecycle.enqueue_unbound(id);
        self.lifecycle.end_unbind(flags)
    }
}

impl LifecycleNode for View {
    fn bound(&self, flags: LifecycleFlags) {
        self.hooks.bound(flags);
    }

    fn mount(&self, flags: LifecycleFlags) {
        self.hooks.mount(flags);
    }

    fn attached(&self, flags: LifecycleFlags) {
        self.hooks.attached(flags);
    }

    fn unmount(&self, flags: LifecycleFlags) {
        self.hooks.unmount(flags);
    }

    fn detached(&self, flags: LifecycleFlags) {
        self.hooks.detached(flags);
    }

    fn unbound(&self, flags: LifecycleFlags) {
        self.hooks.unbound(flags);
    }

    fn patch(&self, flags: LifecycleFlags) {
        self.hooks.patch(flags);
    }
}

impl Drop for View {
    fn drop(&mut self) {
        self.node.release(&self.lifecycle);
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("state", &self.state.get())
            .field("bindings", &self.bindings.borrow().len())
            .field("children", &self.children.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use trellis_core::ObjectRef;
    use trellis_core::lifecycle::promise_task;

    use super::*;

    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Recorder {
        fn push(&self, hook: &str) {
            self.log.borrow_mut().push(format!("{}.{hook}", self.name));
        }
    }

    impl ViewHooks for Recorder {
        fn bound(&self, _flags: LifecycleFlags) {
            self.push("bound");
        }
        fn mount(&self, _flags: LifecycleFlags) {
            self.push("mount");
        }
        fn attached(&self, _flags: LifecycleFlags) {
            self.push("attached");
        }
        fn detached(&self, _flags: LifecycleFlags) {
            self.push("detached");
        }
        fn unbound(&self, _flags: LifecycleFlags) {
            self.push("unbound");
        }
    }

    fn tree() -> (Rc<Lifecycle>, Rc<View>, Rc<RefCell<Vec<String>>>) {
        let lifecycle = Lifecycle::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let parent = View::new(lifecycle.clone(), Recorder { name: "parent", log: log.clone() });
        let child = View::new(lifecycle.clone(), Recorder { name: "child", log: log.clone() });
        parent.add_child(child);
        (lifecycle, parent, log)
    }

    #[test]
    fn test_bound_hooks_run_once_after_whole_tree() {
        let (_lifecycle, parent, log) = tree();
        let task = parent
            .bind(LifecycleFlags::NONE, &Scope::create(ObjectRef::new()).unwrap())
            .unwrap();
        assert!(task.is_none());
        assert_eq!(*log.borrow(), vec!["child.bound", "parent.bound"]);
        assert!(parent.state().contains(ViewState::BOUND));
    }

    #[test]
    fn test_attach_and_detach_order() {
        let (_lifecycle, parent, log) = tree();
        parent.bind(LifecycleFlags::NONE, &Scope::create(ObjectRef::new()).unwrap()).unwrap();
        log.borrow_mut().clear();

        parent.attach(LifecycleFlags::NONE);
        assert_eq!(
            *log.borrow(),
            vec!["parent.mount", "child.mount", "child.attached", "parent.attached"]
        );
        log.borrow_mut().clear();

        parent.detach(LifecycleFlags::NONE);
        parent.unbind(LifecycleFlags::NONE);
        assert_eq!(*log.borrow(), vec!["child.detached", "parent.detached", "child.unbound", "parent.unbound"]);
        assert_eq!(parent.state(), ViewState::empty());
    }

    #[test]
    fn test_pending_task_defers_bound_hooks() {
        let lifecycle = Lifecycle::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let (task, resolver) = promise_task();

        struct Waits {
            lifecycle: Rc<Lifecycle>,
            task: TaskRef,
            log: Rc<RefCell<Vec<String>>>,
        }
        impl ViewHooks for Waits {
            fn binding(&self, _flags: LifecycleFlags) {
                self.lifecycle.register_task(self.task.clone());
            }
            fn bound(&self, _flags: LifecycleFlags) {
                self.log.borrow_mut().push("bound".to_string());
            }
        }

        let view = View::new(
            lifecycle.clone(),
            Waits {
                lifecycle: lifecycle.clone(),
                task: task.clone(),
                log: log.clone(),
            },
        );
        let pending = view.bind(LifecycleFlags::NONE, &Scope::create(ObjectRef::new()).unwrap()).unwrap();
        assert!(pending.is_some());
        assert!(log.borrow().is_empty());

        resolver.resolve();
        assert_eq!(*log.borrow(), vec!["bound"]);
    }

    #[test]
    fn test_child_with_context_gets_child_scope() {
        let lifecycle = Lifecycle::new();
        let parent = View::new(lifecycle.clone(), NoHooks);
        let child = View::new(lifecycle, NoHooks);
        let item = ObjectRef::from_pairs([("id", 1)]);
        parent.add_child_with_context(child.clone(), item.clone());

        let root = Scope::create(ObjectRef::new()).unwrap();
        parent.bind(LifecycleFlags::NONE, &root).unwrap();
        let child_scope = child.scope().unwrap();
        assert!(child_scope.binding_context().as_object().unwrap().ptr_eq(&item));
        assert!(Rc::ptr_eq(
            child_scope.override_context().parent().unwrap(),
            root.override_context()
        ));
    }
}
