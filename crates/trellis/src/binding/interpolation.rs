use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use trellis_core::{
    AccessorRef, CollectionRef, CollectionSubscriber, CollectionSubscriberRef, Connectable, IndexMap, LifecycleFlags,
    LifecycleNode, NodeSlot, Subscriber, SubscriberRef, Value,
};

use super::{Bindable, BindingMode, BindingServices, Listeners, SourceObservation, report};
use crate::ast::ExpressionRef;
use crate::error::{Error, Result};
use crate::resources::{AppliedBehaviors, BehaviorTarget, BindingBehavior, ServiceLocator};
use crate::scope::Scope;

/// One `${...}` part of an interpolation.
///
/// The part observes only its own expression, but a change re-renders the
/// whole interpolation into the target property. The first part also
/// performs the initial render at bind time.
pub struct InterpolationBinding {
    this: Weak<InterpolationBinding>,
    part: ExpressionRef,
    interpolation: ExpressionRef,
    target: Value,
    target_property: Rc<str>,
    mode: Cell<BindingMode>,
    declared_mode: BindingMode,
    is_first: bool,
    services: BindingServices,
    scope: RefCell<Option<Rc<Scope>>>,
    accessor: RefCell<Option<AccessorRef>>,
    observation: SourceObservation,
    pending: RefCell<Option<Value>>,
    node: NodeSlot,
    behaviors: AppliedBehaviors,
}

impl InterpolationBinding {
    /// Create the binding for `part`, one of `interpolation`'s expressions.
    pub fn new(
        part: ExpressionRef,
        interpolation: ExpressionRef,
        target: impl Into<Value>,
        target_property: &str,
        mode: BindingMode,
        locator: Rc<dyn ServiceLocator>,
        is_first: bool,
    ) -> Result<Rc<Self>> {
        let services = BindingServices::resolve(locator)?;
        let target = target.into();
        Ok(Rc::new_cyclic(|this| Self {
            this: this.clone(),
            part,
            interpolation,
            target,
            target_property: Rc::from(target_property),
            mode: Cell::new(mode),
            declared_mode: mode,
            is_first,
            services,
            scope: RefCell::new(None),
            accessor: RefCell::new(None),
            observation: SourceObservation::default(),
            pending: RefCell::new(None),
            node: NodeSlot::new(),
            behaviors: AppliedBehaviors::default(),
        }))
    }

    fn listeners(&self) -> Listeners {
        Listeners {
            changes: self.this.clone() as SubscriberRef,
            collections: self.this.clone() as CollectionSubscriberRef,
        }
    }

    fn render(&self, flags: LifecycleFlags, scope: &Scope) -> Result<Value> {
        self.interpolation.evaluate(flags, scope, &*self.services.locator)
    }

    fn write(&self, value: Value, flags: LifecycleFlags) {
        if let Some(accessor) = self.accessor.borrow().as_ref() {
            accessor.set_value(value, flags | LifecycleFlags::UPDATE_TARGET_INSTANCE);
        }
    }

    fn refresh(&self, flags: LifecycleFlags) {
        if !self.mode.get().contains(BindingMode::TO_VIEW) {
            return;
        }
        let Some(scope) = self.scope.borrow().clone() else {
            return;
        };
        let value = match self.render(flags, &scope) {
            Ok(value) => value,
            Err(err) => return report(&self.interpolation, "failed to render interpolation", &err),
        };
        if let Err(err) =
            self.observation
                .reconnect(&self.part, flags, &scope, &*self.services.locator, self, &self.listeners())
        {
            report(&self.part, "failed to reconnect interpolation part", &err);
        }
        *self.pending.borrow_mut() = Some(value);
        let this = self.this.clone();
        let id = self
            .node
            .get_or_register(&self.services.lifecycle, move || this as Weak<dyn LifecycleNode>);
        self.services.lifecycle.enqueue_flush(id);
    }

    fn bind_to(&self, flags: LifecycleFlags, scope: &Rc<Scope>) -> Result<()> {
        let locator = &*self.services.locator;
        if self.part.has_bind() {
            self.part.bind(flags, scope, locator, self)?;
        }
        let accessor = self
            .services
            .observer_locator
            .get_accessor(flags, &self.target, &self.target_property);
        *self.accessor.borrow_mut() = Some(accessor);
        if self.is_first {
            let value = self.render(flags, scope)?;
            self.write(value, flags);
        }
        if self.mode.get().contains(BindingMode::TO_VIEW) {
            self.observation
                .reconnect(&self.part, flags, scope, locator, self, &self.listeners())?;
        }
        Ok(())
    }
}

impl Bindable for InterpolationBinding {
    fn bind(&self, flags: LifecycleFlags, scope: &Rc<Scope>) -> Result<()> {
        if self.is_bound() {
            if self.scope.borrow().as_ref().is_some_and(|current| Rc::ptr_eq(current, scope)) {
                return Ok(());
            }
            self.unbind(flags | LifecycleFlags::FROM_BIND);
        }
        *self.scope.borrow_mut() = Some(scope.clone());
        let result = self.bind_to(flags | LifecycleFlags::FROM_BIND, scope);
        if result.is_err() {
            self.unbind(flags);
        }
        result
    }

    fn unbind(&self, flags: LifecycleFlags) {
        let Some(scope) = self.scope.borrow_mut().take() else {
            return;
        };
        if self.part.has_bind() {
            self.part.unbind(flags, &scope, self);
        }
        self.accessor.borrow_mut().take();
        self.observation.clear(&self.listeners());
        self.pending.borrow_mut().take();
        self.node.release(&self.services.lifecycle);
    }

    fn is_bound(&self) -> bool {
        self.scope.borrow().is_some()
    }
}

impl Subscriber for InterpolationBinding {
    fn handle_change(&self, _new_value: &Value, _previous: &Value, flags: LifecycleFlags) {
        self.refresh(flags | LifecycleFlags::UPDATE_TARGET_INSTANCE);
    }
}

impl CollectionSubscriber for InterpolationBinding {
    fn handle_collection_change(&self, _index_map: &IndexMap, flags: LifecycleFlags) {
        self.refresh(flags | LifecycleFlags::IS_COLLECTION_MUTATION);
    }
}

impl LifecycleNode for InterpolationBinding {
    fn flush(&self, flags: LifecycleFlags) {
        let Some(value) = self.pending.borrow_mut().take() else {
            return;
        };
        let current = self.accessor.borrow().as_ref().map(|accessor| accessor.get_value());
        if current.is_some_and(|current| !current.same_value(&value)) {
            self.write(value, flags);
        }
    }
}

impl Connectable for InterpolationBinding {
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

impl BehaviorTarget for InterpolationBinding {
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

/// An interpolation with several `${...}` parts, one
/// [`InterpolationBinding`] per part.
pub struct MultiInterpolationBinding {
    parts: Vec<Rc<InterpolationBinding>>,
}

impl MultiInterpolationBinding {
    /// Create part bindings for every expression of `interpolation`.
    pub fn new(
        interpolation: ExpressionRef,
        target: impl Into<Value>,
        target_property: &str,
        mode: BindingMode,
        locator: Rc<dyn ServiceLocator>,
    ) -> Result<Rc<Self>> {
        let target = target.into();
        let expressions = interpolation.interpolation_expressions();
        if expressions.is_empty() {
            return Err(Error::InvalidInstruction(format!(
                "'{interpolation}' has no expressions to bind"
            )));
        }
        let parts = expressions
            .iter()
            .enumerate()
            .map(|(i, part)| {
                InterpolationBinding::new(
                    part.clone(),
                    interpolation.clone(),
                    target.clone(),
                    target_property,
                    mode,
                    locator.clone(),
                    i == 0,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Rc::new(Self { parts }))
    }

    /// The part bindings, in source order.
    pub fn parts(&self) -> &[Rc<InterpolationBinding>] {
        &self.parts
    }
}

impl Bindable for MultiInterpolationBinding {
    fn bind(&self, flags: LifecycleFlags, scope: &Rc<Scope>) -> Result<()> {
        for (i, part) in self.parts.iter().enumerate() {
            if let Err(err) = part.bind(flags, scope) {
                for bound in &self.parts[..i] {
                    bound.unbind(flags);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn unbind(&self, flags: LifecycleFlags) {
        for part in &self.parts {
            part.unbind(flags);
        }
    }

    fn is_bound(&self) -> bool {
        self.parts.iter().any(|part| part.is_bound())
    }
}
