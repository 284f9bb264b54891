use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use trellis_core::{AccessorRef, FunctionRef, LifecycleFlags, Value};

use super::{Bindable, BindingServices};
use crate::ast::ExpressionRef;
use crate::error::{Error, Result};
use crate::resources::{AppliedBehaviors, BehaviorTarget, BindingBehavior, ServiceLocator};
use crate::scope::Scope;

/// Installs a function on the target that evaluates the source expression
/// when called, as event handlers do (`click.call="save($event)"`).
///
/// Call arguments become scope locals for the duration of the call: an
/// object argument contributes each of its properties, anything else is
/// exposed as `$event`.
pub struct CallBinding {
    this: Weak<CallBinding>,
    source: ExpressionRef,
    target: Value,
    target_property: Rc<str>,
    services: BindingServices,
    scope: RefCell<Option<Rc<Scope>>>,
    accessor: RefCell<Option<AccessorRef>>,
    bound: Cell<bool>,
    behaviors: AppliedBehaviors,
}

impl CallBinding {
    /// Create an unbound call binding.
    pub fn new(
        source: ExpressionRef,
        target: impl Into<Value>,
        target_property: &str,
        locator: Rc<dyn ServiceLocator>,
    ) -> Result<Rc<Self>> {
        let services = BindingServices::resolve(locator)?;
        let target = target.into();
        Ok(Rc::new_cyclic(|this| Self {
            this: this.clone(),
            source,
            target,
            target_property: Rc::from(target_property),
            services,
            scope: RefCell::new(None),
            accessor: RefCell::new(None),
            bound: Cell::new(false),
            behaviors: AppliedBehaviors::default(),
        }))
    }

    /// Evaluate the source with `args` exposed as locals.
    pub fn call_source(&self, args: &[Value]) -> Result<Value> {
        let Some(scope) = self.scope.borrow().clone() else {
            return Err(Error::NullScope);
        };
        let locals = scope.override_context().locals().clone();

        let overrides: Vec<(Rc<str>, Value)> = match args.first() {
            Some(Value::Object(arg)) => arg
                .keys()
                .into_iter()
                .map(|key| {
                    let value = arg.get(&key);
                    (key, value)
                })
                .collect(),
            first => vec![(Rc::from("$event"), first.cloned().unwrap_or_default())],
        };

        let saved: Vec<(Rc<str>, Option<Value>)> = overrides
            .iter()
            .map(|(key, _)| (key.clone(), locals.has(key).then(|| locals.get(key))))
            .collect();
        for (key, value) in overrides {
            locals.set(&key, value);
        }

        let result = self
            .source
            .evaluate(LifecycleFlags::MUST_EVALUATE, &scope, &*self.services.locator);

        for (key, previous) in saved {
            match previous {
                Some(value) => locals.set(&key, value),
                None => {
                    locals.delete(&key);
                }
            }
        }
        result
    }
}

impl Bindable for CallBinding {
    fn bind(&self, flags: LifecycleFlags, scope: &Rc<Scope>) -> Result<()> {
        if self.bound.get() {
            if self.scope.borrow().as_ref().is_some_and(|current| Rc::ptr_eq(current, scope)) {
                return Ok(());
            }
            self.unbind(flags | LifecycleFlags::FROM_BIND);
        }
        *self.scope.borrow_mut() = Some(scope.clone());
        if self.source.has_bind() {
            if let Err(err) = self.source.bind(flags, scope, &*self.services.locator, self) {
                self.scope.borrow_mut().take();
                return Err(err);
            }
        }

        let accessor = self
            .services
            .observer_locator
            .get_accessor(flags, &self.target, &self.target_property);
        let this = self.this.clone();
        let handler = FunctionRef::new(self.target_property.clone(), move |_, args| match this.upgrade() {
            Some(binding) => binding.call_source(args).map_err(Into::into),
            None => Ok(Value::Undefined),
        });
        accessor.set_value(Value::Function(handler), flags);
        *self.accessor.borrow_mut() = Some(accessor);
        self.bound.set(true);
        Ok(())
    }

    fn unbind(&self, flags: LifecycleFlags) {
        if !self.bound.replace(false) {
            return;
        }
        if let Some(scope) = self.scope.borrow_mut().take() {
            if self.source.has_bind() {
                self.source.unbind(flags, &scope, self);
            }
        }
        if let Some(accessor) = self.accessor.borrow_mut().take() {
            accessor.set_value(Value::Null, flags);
        }
    }

    fn is_bound(&self) -> bool {
        self.bound.get()
    }
}

impl BehaviorTarget for CallBinding {
    fn applied_behavior(&self, name: &str) -> Option<Rc<dyn BindingBehavior>> {
        self.behaviors.get(name)
    }

    fn set_applied_behavior(&self, name: &str, behavior: Option<Rc<dyn BindingBehavior>>) {
        self.behaviors.set(name, behavior);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use trellis_core::ObjectRef;

    use super::*;
    use crate::parser::BindingType;
    use crate::resources::ResourceRegistry;

    fn setup(source: &str) -> (ObjectRef, ObjectRef, Rc<CallBinding>, Rc<RefCell<Vec<Value>>>) {
        let registry = ResourceRegistry::standalone();
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        let vm = ObjectRef::new();
        vm.set(
            "save",
            FunctionRef::new("save", move |_, args| {
                sink.borrow_mut().extend(args.iter().cloned());
                Ok(Value::from("saved"))
            }),
        );
        let button = ObjectRef::new();
        let expression = registry.parser().parse(source, BindingType::Expression).unwrap();
        let binding = CallBinding::new(expression, button.clone(), "onclick", registry).unwrap();
        binding.bind(LifecycleFlags::NONE, &Scope::create(vm.clone()).unwrap()).unwrap();
        (vm, button, binding, received)
    }

    #[test]
    fn test_call_passes_event_and_restores_locals() {
        let (_vm, button, binding, received) = setup("save($event)");
        let handler = button.get("onclick");
        let result = handler.as_function().unwrap().call(&Value::Undefined, &[Value::from(7)]).unwrap();
        assert_eq!(result, Value::from("saved"));
        assert_eq!(*received.borrow(), vec![Value::from(7)]);
        assert!(!binding.scope.borrow().as_ref().unwrap().override_context().locals().has("$event"));
    }

    #[test]
    fn test_call_merges_object_argument() {
        let (_vm, button, _binding, received) = setup("save(id)");
        let arg = ObjectRef::from_pairs([("id", 42)]);
        button
            .get("onclick")
            .as_function()
            .unwrap()
            .call(&Value::Undefined, &[Value::Object(arg)])
            .unwrap();
        assert_eq!(*received.borrow(), vec![Value::from(42)]);
    }

    #[test]
    fn test_missing_handler_is_an_error() {
        let (_vm, button, _binding, _received) = setup("nothing()");
        let err = button
            .get("onclick")
            .as_function()
            .unwrap()
            .call(&Value::Undefined, &[])
            .unwrap_err();
        assert_eq!(err, trellis_core::Error::host("'nothing' is not a function"));
    }

    #[test]
    fn test_unbind_clears_handler() {
        let (_vm, button, binding, _received) = setup("save()");
        binding.unbind(LifecycleFlags::NONE);
        assert_eq!(button.get("onclick"), Value::Null);
        assert!(!binding.is_bound());
    }
}
