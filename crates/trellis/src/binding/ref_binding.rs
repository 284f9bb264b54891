use std::cell::RefCell;
use std::rc::Rc;

use trellis_core::{LifecycleFlags, Value};

use super::{Bindable, BindingServices};
use crate::ast::ExpressionRef;
use crate::error::Result;
use crate::resources::{AppliedBehaviors, BehaviorTarget, BindingBehavior, ServiceLocator};
use crate::scope::Scope;

/// Assigns the target object itself to an assignable source expression
/// (`ref="nameInput"`), and clears it again on unbind.
pub struct RefBinding {
    source: ExpressionRef,
    target: Value,
    services: BindingServices,
    scope: RefCell<Option<Rc<Scope>>>,
    behaviors: AppliedBehaviors,
}

impl RefBinding {
    /// Create an unbound ref binding.
    pub fn new(source: ExpressionRef, target: impl Into<Value>, locator: Rc<dyn ServiceLocator>) -> Result<Rc<Self>> {
        Ok(Rc::new(Self {
            source,
            target: target.into(),
            services: BindingServices::resolve(locator)?,
            scope: RefCell::new(None),
            behaviors: AppliedBehaviors::default(),
        }))
    }
}

impl Bindable for RefBinding {
    fn bind(&self, flags: LifecycleFlags, scope: &Rc<Scope>) -> Result<()> {
        if self.is_bound() {
            if self.scope.borrow().as_ref().is_some_and(|current| Rc::ptr_eq(current, scope)) {
                return Ok(());
            }
            self.unbind(flags | LifecycleFlags::FROM_BIND);
        }
        let locator = &*self.services.locator;
        if self.source.has_bind() {
            self.source.bind(flags, scope, locator, self)?;
        }
        self.source.assign(flags, scope, locator, self.target.clone())?;
        *self.scope.borrow_mut() = Some(scope.clone());
        Ok(())
    }

    fn unbind(&self, flags: LifecycleFlags) {
        let Some(scope) = self.scope.borrow_mut().take() else {
            return;
        };
        let locator = &*self.services.locator;
        // Only clear the reference if nothing replaced it meanwhile.
        match self.source.evaluate(flags, &scope, locator) {
            Ok(current) if current.same_value(&self.target) => {
                if let Err(err) = self.source.assign(flags, &scope, locator, Value::Null) {
                    super::report(&self.source, "failed to clear ref", &err);
                }
            }
            Ok(_) => {}
            Err(err) => super::report(&self.source, "failed to read ref", &err),
        }
        if self.source.has_bind() {
            self.source.unbind(flags, &scope, self);
        }
    }

    fn is_bound(&self) -> bool {
        self.scope.borrow().is_some()
    }
}

impl BehaviorTarget for RefBinding {
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
    fn test_ref_assigns_and_clears() {
        let registry = ResourceRegistry::standalone();
        let input = ObjectRef::new();
        let vm = ObjectRef::new();
        let source = registry.parser().parse("form.input", BindingType::Ref).unwrap();
        let binding = RefBinding::new(source, input.clone(), registry).unwrap();

        binding.bind(LifecycleFlags::NONE, &Scope::create(vm.clone()).unwrap()).unwrap();
        let form = vm.get("form");
        assert!(form.as_object().unwrap().get("input").as_object().unwrap().ptr_eq(&input));

        binding.unbind(LifecycleFlags::NONE);
        assert_eq!(form.as_object().unwrap().get("input"), Value::Null);
    }

    #[test]
    fn test_unbind_keeps_replaced_reference() {
        let registry = ResourceRegistry::standalone();
        let vm = ObjectRef::new();
        let source = registry.parser().parse("el", BindingType::Ref).unwrap();
        let binding = RefBinding::new(source, ObjectRef::new(), registry).unwrap();
        binding.bind(LifecycleFlags::NONE, &Scope::create(vm.clone()).unwrap()).unwrap();

        vm.set("el", "replaced");
        binding.unbind(LifecycleFlags::NONE);
        assert_eq!(vm.get("el"), Value::from("replaced"));
    }
}
