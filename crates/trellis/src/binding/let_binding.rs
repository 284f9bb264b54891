use std::cell::RefCell;
use std::rc::{Rc, Weak};

use trellis_core::{
    AccessorRef, CollectionRef, CollectionSubscriber, CollectionSubscriberRef, Connectable, IndexMap, LifecycleFlags,
    Subscriber, SubscriberRef, Value,
};

use super::{Bindable, BindingServices, Listeners, SourceObservation, report};
use crate::ast::ExpressionRef;
use crate::error::Result;
use crate::resources::{AppliedBehaviors, BehaviorTarget, BindingBehavior, ServiceLocator};
use crate::scope::Scope;

/// Declares a name computed from a source expression (`<let total.bind="a + b">`).
///
/// The value lands on the scope's locals, or on the binding context itself
/// when `to_view_model` is set. Unlike a property binding it writes
/// synchronously on every change, so later bindings in the same view see
/// the new value at once.
pub struct LetBinding {
    this: Weak<LetBinding>,
    source: ExpressionRef,
    target_property: Rc<str>,
    to_view_model: bool,
    services: BindingServices,
    scope: RefCell<Option<Rc<Scope>>>,
    accessor: RefCell<Option<AccessorRef>>,
    observation: SourceObservation,
    behaviors: AppliedBehaviors,
}

impl LetBinding {
    /// Create an unbound let binding.
    pub fn new(
        source: ExpressionRef,
        target_property: &str,
        to_view_model: bool,
        locator: Rc<dyn ServiceLocator>,
    ) -> Result<Rc<Self>> {
        let services = BindingServices::resolve(locator)?;
        Ok(Rc::new_cyclic(|this| Self {
            this: this.clone(),
            source,
            target_property: Rc::from(target_property),
            to_view_model,
            services,
            scope: RefCell::new(None),
            accessor: RefCell::new(None),
            observation: SourceObservation::default(),
            behaviors: AppliedBehaviors::default(),
        }))
    }

    /// The object the value is written to for `scope`.
    fn target_for(&self, scope: &Scope) -> Value {
        if self.to_view_model {
            scope.binding_context().clone()
        } else {
            Value::Object(scope.override_context().locals().clone())
        }
    }

    fn listeners(&self) -> Listeners {
        Listeners {
            changes: self.this.clone() as SubscriberRef,
            collections: self.this.clone() as CollectionSubscriberRef,
        }
    }

    fn update(&self, flags: LifecycleFlags, scope: &Scope) -> Result<()> {
        let locator = &*self.services.locator;
        let value = self.source.evaluate(flags, scope, locator)?;
        if let Some(accessor) = self.accessor.borrow().as_ref() {
            accessor.set_value(value, flags | LifecycleFlags::UPDATE_TARGET_INSTANCE);
        }
        self.observation
            .reconnect(&self.source, flags, scope, locator, self, &self.listeners())
    }

    fn refresh(&self, flags: LifecycleFlags) {
        let Some(scope) = self.scope.borrow().clone() else {
            return;
        };
        if let Err(err) = self.update(flags, &scope) {
            report(&self.source, "failed to update let value", &err);
        }
    }
}

impl Bindable for LetBinding {
    fn bind(&self, flags: LifecycleFlags, scope: &Rc<Scope>) -> Result<()> {
        if self.is_bound() {
            if self.scope.borrow().as_ref().is_some_and(|current| Rc::ptr_eq(current, scope)) {
                return Ok(());
            }
            self.unbind(flags | LifecycleFlags::FROM_BIND);
        }
        *self.scope.borrow_mut() = Some(scope.clone());
        let flags = flags | LifecycleFlags::FROM_BIND;
        let result = (|| {
            if self.source.has_bind() {
                self.source.bind(flags, scope, &*self.services.locator, self)?;
            }
            let accessor = self
                .services
                .observer_locator
                .get_accessor(flags, &self.target_for(scope), &self.target_property);
            *self.accessor.borrow_mut() = Some(accessor);
            self.update(flags, scope)
        })();
        if result.is_err() {
            self.unbind(flags);
        }
        result
    }

    fn unbind(&self, flags: LifecycleFlags) {
        let Some(scope) = self.scope.borrow_mut().take() else {
            return;
        };
        if self.source.has_bind() {
            self.source.unbind(flags, &scope, self);
        }
        self.accessor.borrow_mut().take();
        self.observation.clear(&self.listeners());
    }

    fn is_bound(&self) -> bool {
        self.scope.borrow().is_some()
    }
}

impl Subscriber for LetBinding {
    fn handle_change(&self, _new_value: &Value, _previous: &Value, flags: LifecycleFlags) {
        self.refresh(flags);
    }
}

impl CollectionSubscriber for LetBinding {
    fn handle_collection_change(&self, _index_map: &IndexMap, flags: LifecycleFlags) {
        self.refresh(flags | LifecycleFlags::IS_COLLECTION_MUTATION);
    }
}

impl Connectable for LetBinding {
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

impl BehaviorTarget for LetBinding {
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

#[cfg(test)]
mod tests {
    use trellis_core::ObjectRef;

    use super::*;
    use crate::parser::BindingType;
    use crate::resources::ResourceRegistry;

    #[test]
    fn test_let_writes_locals_synchronously() {
        let registry = ResourceRegistry::standalone();
        let vm = ObjectRef::from_pairs([("price", 3), ("quantity", 2)]);
        let scope = Scope::create(vm.clone()).unwrap();
        let source = registry.parser().parse("price * quantity", BindingType::Expression).unwrap();
        let binding = LetBinding::new(source, "total", false, registry).unwrap();

        binding.bind(LifecycleFlags::NONE, &scope).unwrap();
        let locals = scope.override_context().locals();
        assert_eq!(locals.get("total"), Value::from(6));
        assert!(!vm.has("total"));

        vm.set("quantity", 5);
        assert_eq!(locals.get("total"), Value::from(15));
    }

    #[test]
    fn test_let_to_view_model() {
        let registry = ResourceRegistry::standalone();
        let vm = ObjectRef::from_pairs([("first", "Ada")]);
        let source = registry.parser().parse("'Hi ' + first", BindingType::Expression).unwrap();
        let binding = LetBinding::new(source, "greeting", true, registry).unwrap();
        binding.bind(LifecycleFlags::NONE, &Scope::create(vm.clone()).unwrap()).unwrap();
        assert_eq!(vm.get("greeting"), Value::from("Hi Ada"));

        binding.unbind(LifecycleFlags::NONE);
        vm.set("first", "Grace");
        assert_eq!(vm.get("greeting"), Value::from("Hi Ada"));
    }
}
