use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use trellis_core::{
    AccessorRef, CollectionRef, CollectionSubscriber, CollectionSubscriberRef, Connectable, IndexMap, LifecycleFlags,
    LifecycleNode, NodeSlot, ObserverRef, Subscriber, SubscriberRef, Value,
};

use super::{Bindable, BindingMode, BindingServices, BindingState, Listeners, SourceObservation, report};
use crate::ast::ExpressionRef;
use crate::error::Result;
use crate::resources::{AppliedBehaviors, BehaviorTarget, BindingBehavior, ServiceLocator};
use crate::scope::Scope;

/// How the binding reaches its target property.
#[derive(Clone)]
enum TargetAccess {
    /// Observed, for bindings that listen to the target.
    Observer(ObserverRef),
    /// Read and written only.
    Accessor(AccessorRef),
}

impl TargetAccess {
    fn get_value(&self) -> Value {
        match self {
            Self::Observer(observer) => observer.get_value(),
            Self::Accessor(accessor) => accessor.get_value(),
        }
    }

    fn set_value(&self, value: Value, flags: LifecycleFlags) {
        match self {
            Self::Observer(observer) => observer.set_value(value, flags),
            Self::Accessor(accessor) => accessor.set_value(value, flags),
        }
    }
}

/// Forwards target-side changes to the owning binding.
///
/// A separate subscriber keeps target notifications apart from source
/// notifications, which arrive at the [`Binding`] itself.
struct TargetListener {
    binding: Weak<Binding>,
}

impl Subscriber for TargetListener {
    fn handle_change(&self, new_value: &Value, _previous: &Value, flags: LifecycleFlags) {
        if let Some(binding) = self.binding.upgrade() {
            binding.handle_target_change(new_value.clone(), flags);
        }
    }
}

/// A property binding: `target.property` kept in sync with a source
/// expression according to a [`BindingMode`].
///
/// # Example
///
/// ```
/// use std::rc::Rc;
/// use trellis::binding::{Bindable, Binding, BindingMode};
/// use trellis::parser::BindingType;
/// use trellis::resources::ResourceRegistry;
/// use trellis::scope::Scope;
/// use trellis_core::{LifecycleFlags, ObjectRef, Value};
///
/// let registry = ResourceRegistry::standalone();
/// let source = registry.parser().parse("first + ' ' + last", BindingType::Expression).unwrap();
/// let view_model = ObjectRef::from_pairs([("first", "Ada"), ("last", "Lovelace")]);
/// let element = ObjectRef::new();
///
/// let binding = Binding::new(source, element.clone(), "text", BindingMode::TO_VIEW, registry.clone()).unwrap();
/// binding.bind(LifecycleFlags::FROM_BIND, &Scope::create(view_model.clone()).unwrap()).unwrap();
/// assert_eq!(element.get("text"), Value::from("Ada Lovelace"));
///
/// view_model.set("first", "Augusta");
/// registry.lifecycle().drain_microtasks();
/// assert_eq!(element.get("text"), Value::from("Augusta Lovelace"));
/// ```
pub struct Binding {
    this: Weak<Binding>,
    source: ExpressionRef,
    target: Value,
    target_property: Rc<str>,
    declared_mode: BindingMode,
    mode: Cell<BindingMode>,
    services: BindingServices,
    state: Cell<BindingState>,
    scope: RefCell<Option<Rc<Scope>>>,
    target_access: RefCell<Option<TargetAccess>>,
    target_listener: Rc<TargetListener>,
    observation: SourceObservation,
    pending: RefCell<Option<Value>>,
    updating_target: Cell<bool>,
    updating_source: Cell<bool>,
    node: NodeSlot,
    behaviors: AppliedBehaviors,
}

impl Binding {
    /// Create an unbound binding of `target.target_property` to `source`.
    ///
    /// Fails when `locator` does not provide the lifecycle and observer
    /// locator.
    pub fn new(
        source: ExpressionRef,
        target: impl Into<Value>,
        target_property: &str,
        mode: BindingMode,
        locator: Rc<dyn ServiceLocator>,
    ) -> Result<Rc<Self>> {
        let services = BindingServices::resolve(locator)?;
        let target = target.into();
        Ok(Rc::new_cyclic(|this: &Weak<Binding>| Self {
            this: this.clone(),
            source,
            target,
            target_property: Rc::from(target_property),
            declared_mode: mode,
            mode: Cell::new(mode),
            services,
            state: Cell::new(BindingState::empty()),
            scope: RefCell::new(None),
            target_access: RefCell::new(None),
            target_listener: Rc::new(TargetListener { binding: this.clone() }),
            observation: SourceObservation::default(),
            pending: RefCell::new(None),
            updating_target: Cell::new(false),
            updating_source: Cell::new(false),
            node: NodeSlot::new(),
            behaviors: AppliedBehaviors::default(),
        }))
    }

    /// The source expression.
    pub fn source(&self) -> &ExpressionRef {
        &self.source
    }

    /// The target object.
    pub fn target(&self) -> &Value {
        &self.target
    }

    /// The target property name.
    pub fn target_property(&self) -> &str {
        &self.target_property
    }

    /// The current state.
    pub fn state(&self) -> BindingState {
        self.state.get()
    }

    /// Number of source observers currently subscribed.
    pub fn observer_count(&self) -> usize {
        self.observation.observer_count()
    }

    /// Write `value` to the target right away.
    pub fn update_target(&self, value: Value, flags: LifecycleFlags) {
        let access = self.target_access.borrow().clone();
        if let Some(access) = access {
            self.updating_target.set(true);
            access.set_value(value, flags | LifecycleFlags::UPDATE_TARGET_INSTANCE);
            self.updating_target.set(false);
        }
    }

    /// Assign `value` through the source expression.
    pub fn update_source(&self, value: Value, flags: LifecycleFlags) -> Result<()> {
        let Some(scope) = self.scope.borrow().clone() else {
            return Ok(());
        };
        self.updating_source.set(true);
        let result = self.source.assign(
            flags | LifecycleFlags::UPDATE_SOURCE_EXPRESSION,
            &scope,
            &*self.services.locator,
            value,
        );
        self.updating_source.set(false);
        result.map(|_| ())
    }

    fn listeners(&self) -> Listeners {
        Listeners {
            changes: self.this.clone() as SubscriberRef,
            collections: self.this.clone() as CollectionSubscriberRef,
        }
    }

    fn target_listener_ref(&self) -> SubscriberRef {
        Rc::downgrade(&self.target_listener) as SubscriberRef
    }

    fn is_active(&self) -> bool {
        self.state.get().contains(BindingState::BOUND)
    }

    fn connect_source(&self, flags: LifecycleFlags) -> Result<()> {
        let Some(scope) = self.scope.borrow().clone() else {
            return Ok(());
        };
        self.observation
            .reconnect(&self.source, flags, &scope, &*self.services.locator, self, &self.listeners())
    }

    // Source side changed: re-evaluate, reconnect and queue the target write.
    fn refresh(&self, flags: LifecycleFlags) {
        if !self.is_active() || !self.mode.get().contains(BindingMode::TO_VIEW) {
            return;
        }
        let Some(scope) = self.scope.borrow().clone() else {
            return;
        };
        let flags = flags | LifecycleFlags::UPDATE_TARGET_INSTANCE;
        let value = match self.source.evaluate(flags, &scope, &*self.services.locator) {
            Ok(value) => value,
            Err(err) => return report(&self.source, "failed to evaluate binding source", &err),
        };
        if let Err(err) = self.connect_source(flags) {
            report(&self.source, "failed to reconnect binding source", &err);
        }
        *self.pending.borrow_mut() = Some(value);
        let this = self.this.clone();
        let id = self
            .node
            .get_or_register(&self.services.lifecycle, move || this as Weak<dyn LifecycleNode>);
        self.services.lifecycle.enqueue_flush(id);
    }

    // Source changed by our own write-back: follow new dependencies but never
    // write the (possibly converted) value back to the target.
    fn settle_source(&self, flags: LifecycleFlags) {
        if !self.is_active() || !self.mode.get().contains(BindingMode::TO_VIEW) {
            return;
        }
        if let Err(err) = self.connect_source(flags) {
            report(&self.source, "failed to reconnect binding source", &err);
        }
    }

    fn handle_target_change(&self, value: Value, flags: LifecycleFlags) {
        if !self.is_active() || self.updating_target.get() || !self.mode.get().contains(BindingMode::FROM_VIEW) {
            return;
        }
        tracing::trace!(target: "trellis::binding", property = %self.target_property, "target changed");
        if let Err(err) = self.update_source(value, flags) {
            report(&self.source, "failed to update binding source", &err);
        }
    }

    fn bind_to(&self, flags: LifecycleFlags, scope: &Rc<Scope>) -> Result<()> {
        let locator = &*self.services.locator;
        if self.source.has_bind() {
            self.source.bind(flags, scope, locator, self)?;
        }
        let mode = self.mode.get();

        let access = if mode.contains(BindingMode::FROM_VIEW) {
            let observer = self
                .services
                .observer_locator
                .get_observer(flags, &self.target, &self.target_property)?;
            observer.subscribe(self.target_listener_ref());
            TargetAccess::Observer(observer)
        } else {
            TargetAccess::Accessor(
                self.services
                    .observer_locator
                    .get_accessor(flags, &self.target, &self.target_property),
            )
        };
        *self.target_access.borrow_mut() = Some(access);

        if mode.intersects(BindingMode::TO_VIEW | BindingMode::ONE_TIME) {
            let value = self.source.evaluate(flags, scope, locator)?;
            self.update_target(value, flags);
        }

        if mode.contains(BindingMode::TO_VIEW) {
            if self.services.lifecycle.is_attaching() {
                // Dependencies are discovered once the view is mounted.
                let this = self.this.clone();
                let id = self
                    .node
                    .get_or_register(&self.services.lifecycle, move || this as Weak<dyn LifecycleNode>);
                self.services.lifecycle.enqueue_connect(id);
            } else {
                self.observation
                    .reconnect(&self.source, flags, scope, locator, self, &self.listeners())?;
            }
        }
        Ok(())
    }

    fn release(&self, flags: LifecycleFlags) {
        if let Some(scope) = self.scope.borrow_mut().take() {
            if self.source.has_bind() {
                self.source.unbind(flags, &scope, self);
            }
        }
        if let Some(TargetAccess::Observer(observer)) = self.target_access.borrow_mut().take() {
            observer.unsubscribe(&self.target_listener_ref());
        }
        self.observation.clear(&self.listeners());
        self.pending.borrow_mut().take();
        self.node.release(&self.services.lifecycle);
    }
}

impl Bindable for Binding {
    fn bind(&self, flags: LifecycleFlags, scope: &Rc<Scope>) -> Result<()> {
        if self.is_active() {
            let same = self.scope.borrow().as_ref().is_some_and(|current| Rc::ptr_eq(current, scope));
            if same {
                return Ok(());
            }
            self.unbind(flags | LifecycleFlags::FROM_BIND);
        }
        self.state.set(BindingState::BINDING);
        *self.scope.borrow_mut() = Some(scope.clone());

        match self.bind_to(flags | LifecycleFlags::FROM_BIND, scope) {
            Ok(()) => {
                self.state.set(BindingState::BOUND);
                tracing::debug!(
                    target: "trellis::binding",
                    expression = %self.source,
                    property = %self.target_property,
                    mode = ?self.mode.get(),
                    "bound"
                );
                Ok(())
            }
            Err(err) => {
                self.release(flags);
                self.state.set(BindingState::empty());
                Err(err)
            }
        }
    }

    fn unbind(&self, flags: LifecycleFlags) {
        if !self.is_active() {
            return;
        }
        self.state.set(self.state.get() | BindingState::UNBINDING);
        self.release(flags | LifecycleFlags::FROM_UNBIND);
        self.state.set(BindingState::empty());
        tracing::debug!(target: "trellis::binding", expression = %self.source, "unbound");
    }

    fn is_bound(&self) -> bool {
        self.is_active()
    }
}

impl Subscriber for Binding {
    fn handle_change(&self, _new_value: &Value, _previous: &Value, flags: LifecycleFlags) {
        if self.updating_source.get() {
            self.settle_source(flags);
            return;
        }
        self.refresh(flags);
    }
}

impl CollectionSubscriber for Binding {
    fn handle_collection_change(&self, _index_map: &IndexMap, flags: LifecycleFlags) {
        if self.updating_source.get() {
            self.settle_source(flags | LifecycleFlags::IS_COLLECTION_MUTATION);
            return;
        }
        self.refresh(flags | LifecycleFlags::IS_COLLECTION_MUTATION);
    }
}

impl LifecycleNode for Binding {
    fn flush(&self, flags: LifecycleFlags) {
        let Some(value) = self.pending.borrow_mut().take() else {
            return;
        };
        if !self.is_active() {
            return;
        }
        let current = self.target_access.borrow().as_ref().map(TargetAccess::get_value);
        if current.is_none_or(|current| !current.same_value(&value)) {
            self.update_target(value, flags);
        }
    }

    fn connect(&self, flags: LifecycleFlags) {
        if self.is_active() && self.mode.get().contains(BindingMode::TO_VIEW) {
            if let Err(err) = self.connect_source(flags) {
                report(&self.source, "failed to connect binding source", &err);
            }
        }
    }
}

impl Connectable for Binding {
    fn observe_property(&self, flags: LifecycleFlags, obj: &Value, name: &str) {
        self.observation
            .observe_property(&self.services, flags, obj, name, &self.listeners().changes);
    }

    fn observe_collection(&self, _flags: LifecycleFlags, collection: &CollectionRef) {
        self.observation
            .observe_collection(&self.services, collection, &self.listeners().collections);
    }

    fn observe_signal(&self, name: &str) {
        self.observation
            .observe_signal(&self.services, name, &self.listeners().changes);
    }
}

impl BehaviorTarget for Binding {
    fn mode(&self) -> Option<BindingMode> {
        Some(self.mode.get())
    }

    fn set_mode(&self, mode: BindingMode) {
        self.mode.set(mode);
    }

    fn declared_mode(&self) -> Option<BindingMode> {
        Some(self.declared_mode)
    }

    fn listener(&self) -> Option<SubscriberRef> {
        Some(self.this.clone() as SubscriberRef)
    }

    fn applied_behavior(&self, name: &str) -> Option<Rc<dyn BindingBehavior>> {
        self.behaviors.get(name)
    }

    fn set_applied_behavior(&self, name: &str, behavior: Option<Rc<dyn BindingBehavior>>) {
        self.behaviors.set(name, behavior);
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("source", &self.source.to_string())
            .field("target_property", &self.target_property)
            .field("mode", &self.mode.get())
            .field("state", &self.state.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use trellis_core::ObjectRef;

    use super::*;
    use crate::parser::BindingType;
    use crate::resources::{FnValueConverter, ResourceRegistry};

    fn binding(source: &str, target: &ObjectRef, mode: BindingMode) -> (Rc<ResourceRegistry>, Rc<Binding>) {
        let registry = ResourceRegistry::standalone();
        let expression = registry.parser().parse(source, BindingType::Expression).unwrap();
        let binding = Binding::new(expression, target.clone(), "value", mode, registry.clone()).unwrap();
        (registry, binding)
    }

    #[test]
    fn test_one_time_writes_once() {
        let vm = ObjectRef::from_pairs([("name", "a")]);
        let target = ObjectRef::new();
        let (registry, binding) = binding("name", &target, BindingMode::ONE_TIME);
        binding.bind(LifecycleFlags::NONE, &Scope::create(vm.clone()).unwrap()).unwrap();
        assert_eq!(target.get("value"), Value::from("a"));

        vm.set("name", "b");
        registry.lifecycle().drain_microtasks();
        assert_eq!(target.get("value"), Value::from("a"));
        assert_eq!(binding.observer_count(), 0);
    }

    #[test]
    fn test_to_view_defers_to_flush() {
        let vm = ObjectRef::from_pairs([("count", 1)]);
        let target = ObjectRef::new();
        let (registry, binding) = binding("count * 2", &target, BindingMode::TO_VIEW);
        binding.bind(LifecycleFlags::NONE, &Scope::create(vm.clone()).unwrap()).unwrap();
        assert_eq!(target.get("value"), Value::from(2));

        vm.set("count", 2);
        vm.set("count", 3);
        assert_eq!(target.get("value"), Value::from(2));
        registry.lifecycle().drain_microtasks();
        assert_eq!(target.get("value"), Value::from(6));
    }

    #[test]
    fn test_rebind_same_scope_is_noop() {
        let vm = ObjectRef::from_pairs([("x", 1)]);
        let target = ObjectRef::new();
        let (_registry, binding) = binding("x", &target, BindingMode::TO_VIEW);
        let scope = Scope::create(vm).unwrap();
        binding.bind(LifecycleFlags::NONE, &scope).unwrap();
        target.set("value", 99);
        binding.bind(LifecycleFlags::NONE, &scope).unwrap();
        assert_eq!(target.get("value"), Value::from(99));
    }

    #[test]
    fn test_rebind_new_scope_moves_subscriptions() {
        let first = ObjectRef::from_pairs([("x", 1)]);
        let second = ObjectRef::from_pairs([("x", 2)]);
        let target = ObjectRef::new();
        let (registry, binding) = binding("x", &target, BindingMode::TO_VIEW);
        binding.bind(LifecycleFlags::NONE, &Scope::create(first.clone()).unwrap()).unwrap();
        binding.bind(LifecycleFlags::NONE, &Scope::create(second.clone()).unwrap()).unwrap();
        assert_eq!(target.get("value"), Value::from(2));

        first.set("x", 10);
        registry.lifecycle().drain_microtasks();
        assert_eq!(target.get("value"), Value::from(2));

        second.set("x", 20);
        registry.lifecycle().drain_microtasks();
        assert_eq!(target.get("value"), Value::from(20));
    }

    #[test]
    fn test_from_view_assigns_source() {
        let vm = ObjectRef::from_pairs([("name", "a")]);
        let target = ObjectRef::from_pairs([("value", "initial")]);
        let (_registry, binding) = binding("name", &target, BindingMode::FROM_VIEW);
        binding.bind(LifecycleFlags::NONE, &Scope::create(vm.clone()).unwrap()).unwrap();
        // From-view bindings leave the target alone at bind time.
        assert_eq!(target.get("value"), Value::from("initial"));

        target.set("value", "typed");
        assert_eq!(vm.get("name"), Value::from("typed"));
    }

    #[test]
    fn test_two_way_converter_does_not_echo_to_target() {
        let registry = ResourceRegistry::standalone();
        registry.register_value_converter(
            "upper",
            Rc::new(
                FnValueConverter::new(|v, _| Ok(Value::from(v.to_display_string().to_uppercase())))
                    .with_from_view(|v, _| Ok(Value::from(v.to_display_string().to_lowercase()))),
            ),
        );
        let expression = registry.parser().parse("name | upper", BindingType::Expression).unwrap();
        let vm = ObjectRef::from_pairs([("name", "ada")]);
        let target = ObjectRef::new();
        let binding = Binding::new(expression, target.clone(), "value", BindingMode::TWO_WAY, registry.clone()).unwrap();
        binding.bind(LifecycleFlags::NONE, &Scope::create(vm.clone()).unwrap()).unwrap();
        assert_eq!(target.get("value"), Value::from("ADA"));

        target.set("value", "Grace");
        assert_eq!(vm.get("name"), Value::from("grace"));
        registry.lifecycle().drain_microtasks();
        assert_eq!(target.get("value"), Value::from("Grace"));

        // Model-side changes still reach the target.
        vm.set("name", "alan");
        registry.lifecycle().drain_microtasks();
        assert_eq!(target.get("value"), Value::from("ALAN"));
    }

    #[test]
    fn test_unbind_stops_updates() {
        let vm = ObjectRef::from_pairs([("x", 1)]);
        let target = ObjectRef::new();
        let (registry, binding) = binding("x", &target, BindingMode::TWO_WAY);
        binding.bind(LifecycleFlags::NONE, &Scope::create(vm.clone()).unwrap()).unwrap();
        binding.unbind(LifecycleFlags::NONE);
        assert!(!binding.is_bound());
        assert_eq!(binding.observer_count(), 0);

        vm.set("x", 5);
        target.set("value", 7);
        registry.lifecycle().drain_microtasks();
        assert_eq!(target.get("value"), Value::from(7));
        assert_eq!(vm.get("x"), Value::from(5));
    }

    #[test]
    fn test_failed_bind_leaves_binding_unbound() {
        let vm = ObjectRef::new();
        let target = ObjectRef::new();
        let (_registry, binding) = binding("x | missing", &target, BindingMode::TO_VIEW);
        assert!(binding.bind(LifecycleFlags::NONE, &Scope::create(vm).unwrap()).is_err());
        assert!(!binding.is_bound());
        assert_eq!(binding.state(), BindingState::empty());
    }

    #[test]
    fn test_signal_behavior_forces_refresh() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let vm = ObjectRef::new();
        vm.set(
            "stamp",
            trellis_core::FunctionRef::new("stamp", move |_, _| {
                counter.set(counter.get() + 1);
                Ok(Value::from(counter.get()))
            }),
        );
        let target = ObjectRef::new();
        let (registry, binding) = binding("stamp() & signal:'tick'", &target, BindingMode::TO_VIEW);
        binding.bind(LifecycleFlags::NONE, &Scope::create(vm).unwrap()).unwrap();
        assert_eq!(target.get("value"), Value::from(1));

        assert_eq!(registry.signaler().dispatch_signal("tick", LifecycleFlags::NONE), 1);
        registry.lifecycle().drain_microtasks();
        assert_eq!(target.get("value"), Value::from(2));

        binding.unbind(LifecycleFlags::NONE);
        assert_eq!(registry.signaler().listener_count("tick"), 0);
    }
}
