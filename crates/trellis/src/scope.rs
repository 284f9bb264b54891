//! Evaluation scopes.
//!
//! A [`Scope`] pairs the object expressions are evaluated against (the
//! *binding context*, usually a view model) with an [`OverrideContext`]
//! holding scope-local names such as repeater loop variables or call
//! arguments. Override contexts form a chain through their parents, which is
//! what `$parent` walks and what unqualified names fall back through.
//!
//! Scopes created at a component boundary can additionally link a
//! `parent_scope`. That link is only consulted when a lookup carries
//! [`LifecycleFlags::ALLOW_PARENT_SCOPE_TRAVERSAL`].

use std::fmt;
use std::rc::Rc;

use trellis_core::{LifecycleFlags, ObjectRef, Value};

use crate::error::{Error, Result};

/// Scope-local names layered over a binding context.
pub struct OverrideContext {
    locals: ObjectRef,
    binding_context: Value,
    parent: Option<Rc<OverrideContext>>,
}

impl OverrideContext {
    /// A root override context.
    pub fn new(binding_context: impl Into<Value>) -> Rc<Self> {
        Rc::new(Self {
            locals: ObjectRef::new(),
            binding_context: binding_context.into(),
            parent: None,
        })
    }

    /// An override context chained below `parent`.
    pub fn with_parent(binding_context: impl Into<Value>, parent: Rc<OverrideContext>) -> Rc<Self> {
        Rc::new(Self {
            locals: ObjectRef::new(),
            binding_context: binding_context.into(),
            parent: Some(parent),
        })
    }

    /// The observable object holding the local names.
    pub fn locals(&self) -> &ObjectRef {
        &self.locals
    }

    /// The binding context this override context belongs to.
    pub fn binding_context(&self) -> &Value {
        &self.binding_context
    }

    /// The enclosing override context.
    pub fn parent(&self) -> Option<&Rc<OverrideContext>> {
        self.parent.as_ref()
    }

    /// Whether `name` is defined here, either as a local or on the binding
    /// context.
    fn defines(&self, name: &str) -> bool {
        self.locals.has(name) || has_property(&self.binding_context, name)
    }

    /// The object `name` should be read from at this level.
    fn context_for(&self, name: &str) -> Value {
        if self.locals.has(name) {
            Value::Object(self.locals.clone())
        } else {
            self.binding_context.clone()
        }
    }
}

impl fmt::Debug for OverrideContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideContext")
            .field("locals", &self.locals.keys())
            .field("binding_context", &self.binding_context.tag())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

fn has_property(target: &Value, name: &str) -> bool {
    match target {
        Value::Object(obj) => obj.has(name),
        Value::Array(_) | Value::String(_) => name == "length",
        Value::Map(_) | Value::Set(_) => name == "size",
        _ => false,
    }
}

/// The context an expression is evaluated against.
pub struct Scope {
    binding_context: Value,
    override_context: Rc<OverrideContext>,
    parent_scope: Option<Rc<Scope>>,
}

impl Scope {
    /// A root scope over `binding_context`.
    ///
    /// Fails with [`Error::NullScope`] for `null` or `undefined`.
    pub fn create(binding_context: impl Into<Value>) -> Result<Rc<Scope>> {
        let binding_context = binding_context.into();
        let override_context = OverrideContext::new(binding_context.clone());
        Self::with_override(binding_context, override_context)
    }

    /// A scope with an explicit override context.
    pub fn with_override(binding_context: impl Into<Value>, override_context: Rc<OverrideContext>) -> Result<Rc<Scope>> {
        let binding_context = binding_context.into();
        if binding_context.is_nullish() {
            return Err(Error::NullScope);
        }
        Ok(Rc::new(Self {
            binding_context,
            override_context,
            parent_scope: None,
        }))
    }

    /// A scope whose binding context is taken from `override_context`.
    pub fn from_override(override_context: Rc<OverrideContext>) -> Result<Rc<Scope>> {
        let binding_context = override_context.binding_context.clone();
        Self::with_override(binding_context, override_context)
    }

    /// A child scope whose override context chains to `parent`'s, as a
    /// repeater creates per item.
    pub fn from_parent(parent: &Scope, binding_context: impl Into<Value>) -> Result<Rc<Scope>> {
        let binding_context = binding_context.into();
        let override_context = OverrideContext::with_parent(binding_context.clone(), parent.override_context.clone());
        Self::with_override(binding_context, override_context)
    }

    /// A scope at a component boundary: a fresh override chain plus a
    /// `parent_scope` link for explicit traversal.
    pub fn with_parent_scope(parent: Rc<Scope>, binding_context: impl Into<Value>) -> Result<Rc<Scope>> {
        let binding_context = binding_context.into();
        let override_context = OverrideContext::new(binding_context.clone());
        if binding_context.is_nullish() {
            return Err(Error::NullScope);
        }
        Ok(Rc::new(Self {
            binding_context,
            override_context,
            parent_scope: Some(parent),
        }))
    }

    /// The binding context.
    pub fn binding_context(&self) -> &Value {
        &self.binding_context
    }

    /// The override context.
    pub fn override_context(&self) -> &Rc<OverrideContext> {
        &self.override_context
    }

    /// The scope across the nearest component boundary.
    pub fn parent_scope(&self) -> Option<&Rc<Scope>> {
        self.parent_scope.as_ref()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("binding_context", &self.binding_context.tag())
            .field("override_context", &self.override_context)
            .field("has_parent_scope", &self.parent_scope.is_some())
            .finish()
    }
}

/// Name resolution against a scope.
pub struct BindingContext;

impl BindingContext {
    /// The object `name` lives on.
    ///
    /// With `ancestor > 0` the override chain is walked up that many levels
    /// first (`$parent`); walking past the root yields `undefined`. Otherwise
    /// the chain is searched from the innermost level outwards, then across
    /// `parent_scope` links if the flags allow it. When nothing defines the
    /// name the scope's own binding context is returned, so assignments
    /// create the property there.
    pub fn get(flags: LifecycleFlags, scope: &Scope, name: &str, ancestor: u32) -> Value {
        if ancestor > 0 {
            return match Self::ancestor(&scope.override_context, ancestor) {
                Some(context) => context.context_for(name),
                None => Value::Undefined,
            };
        }

        if let Some(found) = Self::find(&scope.override_context, name) {
            return found;
        }

        if flags.contains(LifecycleFlags::ALLOW_PARENT_SCOPE_TRAVERSAL) {
            let mut parent = scope.parent_scope.as_ref();
            while let Some(current) = parent {
                if let Some(found) = Self::find(&current.override_context, name) {
                    return found;
                }
                parent = current.parent_scope.as_ref();
            }
        }

        scope.binding_context.clone()
    }

    /// The override context `ancestor` levels up, if the chain is that deep.
    pub fn ancestor(override_context: &Rc<OverrideContext>, ancestor: u32) -> Option<&Rc<OverrideContext>> {
        let mut current = override_context;
        for _ in 0..ancestor {
            current = current.parent.as_ref()?;
        }
        Some(current)
    }

    fn find(override_context: &Rc<OverrideContext>, name: &str) -> Option<Value> {
        let mut current = Some(override_context);
        while let Some(context) = current {
            if context.defines(name) {
                return Some(context.context_for(name));
            }
            current = context.parent.as_ref();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(pairs: &[(&str, i32)]) -> ObjectRef {
        ObjectRef::from_pairs(pairs.iter().map(|&(k, v)| (k, v)))
    }

    #[test]
    fn test_null_scope_is_rejected() {
        assert_eq!(Scope::create(Value::Null).unwrap_err(), Error::NullScope);
        assert_eq!(Scope::create(Value::Undefined).unwrap_err(), Error::NullScope);
        assert!(Scope::create(ObjectRef::new()).is_ok());
    }

    #[test]
    fn test_locals_shadow_binding_context() {
        let vm = object(&[("x", 1)]);
        let scope = Scope::create(vm.clone()).unwrap();
        scope.override_context().locals().set("x", 2);

        let context = BindingContext::get(LifecycleFlags::NONE, &scope, "x", 0);
        assert_eq!(context.as_object().unwrap().get("x"), Value::from(2));
    }

    #[test]
    fn test_lookup_walks_override_chain() {
        let parent_vm = object(&[("title", 1)]);
        let parent = Scope::create(parent_vm.clone()).unwrap();
        let child = Scope::from_parent(&parent, object(&[("item", 5)])).unwrap();

        let context = BindingContext::get(LifecycleFlags::NONE, &child, "title", 0);
        assert!(context.as_object().unwrap().ptr_eq(&parent_vm));

        // Unknown names resolve to the innermost binding context.
        let context = BindingContext::get(LifecycleFlags::NONE, &child, "missing", 0);
        assert_eq!(context.as_object().unwrap().get("item"), Value::from(5));
    }

    #[test]
    fn test_ancestor_beyond_chain_is_undefined() {
        let parent = Scope::create(object(&[("a", 1)])).unwrap();
        let child = Scope::from_parent(&parent, object(&[])).unwrap();

        let one_up = BindingContext::get(LifecycleFlags::NONE, &child, "a", 1);
        assert_eq!(one_up.as_object().unwrap().get("a"), Value::from(1));
        assert_eq!(BindingContext::get(LifecycleFlags::NONE, &child, "a", 2), Value::Undefined);
    }

    #[test]
    fn test_parent_scope_requires_flag() {
        let outer_vm = object(&[("theme", 3)]);
        let outer = Scope::create(outer_vm.clone()).unwrap();
        let inner_vm = object(&[]);
        let inner = Scope::with_parent_scope(outer, inner_vm.clone()).unwrap();

        let plain = BindingContext::get(LifecycleFlags::NONE, &inner, "theme", 0);
        assert!(plain.as_object().unwrap().ptr_eq(&inner_vm));

        let traversed = BindingContext::get(LifecycleFlags::ALLOW_PARENT_SCOPE_TRAVERSAL, &inner, "theme", 0);
        assert!(traversed.as_object().unwrap().ptr_eq(&outer_vm));
    }
}
