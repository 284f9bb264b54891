//! Services and named resources available to bindings.
//!
//! Bindings never hold global state. Everything they need at runtime (the
//! lifecycle, the observer locator, value converters named in `| name`,
//! binding behaviors named in `& name`) is looked up through a
//! [`ServiceLocator`]. [`ResourceRegistry`] is the standard implementation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use trellis_core::{DirtyChecker, Lifecycle, LifecycleFlags, ObserverLocator, Signaler, SubscriberRef, Value};

use crate::binding::BindingMode;
use crate::error::{Error, Result};
use crate::parser::ExpressionParser;
use crate::scope::Scope;

/// Identifies a service or named resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    /// The lifecycle queues.
    Lifecycle,
    /// The observer locator.
    ObserverLocator,
    /// The signal router.
    Signaler,
    /// The shared expression parser.
    ExpressionParser,
    /// A value converter by name.
    ValueConverter(String),
    /// A binding behavior by name.
    BindingBehavior(String),
}

/// A resolved service or resource.
#[derive(Clone)]
pub enum Resource {
    /// See [`ResourceKey::Lifecycle`].
    Lifecycle(Rc<Lifecycle>),
    /// See [`ResourceKey::ObserverLocator`].
    ObserverLocator(Rc<ObserverLocator>),
    /// See [`ResourceKey::Signaler`].
    Signaler(Rc<Signaler>),
    /// See [`ResourceKey::ExpressionParser`].
    ExpressionParser(Arc<ExpressionParser>),
    /// See [`ResourceKey::ValueConverter`].
    ValueConverter(Rc<dyn ValueConverter>),
    /// See [`ResourceKey::BindingBehavior`].
    BindingBehavior(Rc<dyn BindingBehavior>),
}

/// Resolves services and named resources.
pub trait ServiceLocator {
    /// The resource for `key`, if registered.
    fn get(&self, key: &ResourceKey) -> Option<Resource>;
}

/// Typed lookups on top of [`ServiceLocator::get`].
pub trait ServiceLocatorExt: ServiceLocator {
    /// The lifecycle.
    fn lifecycle(&self) -> Result<Rc<Lifecycle>> {
        match self.get(&ResourceKey::Lifecycle) {
            Some(Resource::Lifecycle(lifecycle)) => Ok(lifecycle),
            _ => Err(Error::MissingLocator("Lifecycle".into())),
        }
    }

    /// The observer locator.
    fn observer_locator(&self) -> Result<Rc<ObserverLocator>> {
        match self.get(&ResourceKey::ObserverLocator) {
            Some(Resource::ObserverLocator(locator)) => Ok(locator),
            _ => Err(Error::MissingLocator("ObserverLocator".into())),
        }
    }

    /// The signal router.
    fn signaler(&self) -> Result<Rc<Signaler>> {
        match self.get(&ResourceKey::Signaler) {
            Some(Resource::Signaler(signaler)) => Ok(signaler),
            _ => Err(Error::MissingLocator("Signaler".into())),
        }
    }

    /// The expression parser.
    fn expression_parser(&self) -> Result<Arc<ExpressionParser>> {
        match self.get(&ResourceKey::ExpressionParser) {
            Some(Resource::ExpressionParser(parser)) => Ok(parser),
            _ => Err(Error::MissingLocator("ExpressionParser".into())),
        }
    }

    /// The value converter registered as `name`.
    fn value_converter(&self, name: &str) -> Result<Rc<dyn ValueConverter>> {
        match self.get(&ResourceKey::ValueConverter(name.to_string())) {
            Some(Resource::ValueConverter(converter)) => Ok(converter),
            _ => Err(Error::ValueConverterNotFound(name.to_string())),
        }
    }

    /// The binding behavior registered as `name`.
    fn binding_behavior(&self, name: &str) -> Result<Rc<dyn BindingBehavior>> {
        match self.get(&ResourceKey::BindingBehavior(name.to_string())) {
            Some(Resource::BindingBehavior(behavior)) => Ok(behavior),
            _ => Err(Error::BindingBehaviorNotFound(name.to_string())),
        }
    }
}

impl<T: ServiceLocator + ?Sized> ServiceLocatorExt for T {}

/// Converts values between the model and the view (`value | name:arg`).
pub trait ValueConverter {
    /// Model to view.
    fn to_view(&self, value: Value, _args: &[Value]) -> Result<Value> {
        Ok(value)
    }

    /// View to model.
    fn from_view(&self, value: Value, _args: &[Value]) -> Result<Value> {
        Ok(value)
    }

    /// Signals that should re-evaluate bindings using this converter.
    fn signals(&self) -> Vec<String> {
        Vec::new()
    }
}

type ConvertFn = Box<dyn Fn(Value, &[Value]) -> Result<Value>>;

/// A [`ValueConverter`] built from closures.
pub struct FnValueConverter {
    to_view: ConvertFn,
    from_view: Option<ConvertFn>,
    signals: Vec<String>,
}

impl FnValueConverter {
    /// A converter that applies `to_view` and passes view values through.
    pub fn new<F>(to_view: F) -> Self
    where
        F: Fn(Value, &[Value]) -> Result<Value> + 'static,
    {
        Self {
            to_view: Box::new(to_view),
            from_view: None,
            signals: Vec::new(),
        }
    }

    /// Set the view-to-model conversion.
    pub fn with_from_view<F>(mut self, from_view: F) -> Self
    where
        F: Fn(Value, &[Value]) -> Result<Value> + 'static,
    {
        self.from_view = Some(Box::new(from_view));
        self
    }

    /// Re-evaluate on `signal`.
    pub fn with_signal(mut self, signal: impl Into<String>) -> Self {
        self.signals.push(signal.into());
        self
    }
}

impl ValueConverter for FnValueConverter {
    fn to_view(&self, value: Value, args: &[Value]) -> Result<Value> {
        (self.to_view)(value, args)
    }

    fn from_view(&self, value: Value, args: &[Value]) -> Result<Value> {
        match &self.from_view {
            Some(from_view) => from_view(value, args),
            None => Ok(value),
        }
    }

    fn signals(&self) -> Vec<String> {
        self.signals.clone()
    }
}

/// The view of a binding that binding behaviors operate on.
pub trait BehaviorTarget {
    /// The effective mode, for bindings that have one.
    fn mode(&self) -> Option<BindingMode> {
        None
    }

    /// Override the effective mode.
    fn set_mode(&self, _mode: BindingMode) {}

    /// The mode the binding was created with.
    fn declared_mode(&self) -> Option<BindingMode> {
        None
    }

    /// The subscriber that re-evaluates the binding when notified.
    fn listener(&self) -> Option<SubscriberRef> {
        None
    }

    /// The behavior applied under `name`, if any.
    fn applied_behavior(&self, name: &str) -> Option<Rc<dyn BindingBehavior>>;

    /// Record or clear the behavior applied under `name`.
    fn set_applied_behavior(&self, name: &str, behavior: Option<Rc<dyn BindingBehavior>>);
}

/// Storage for [`BehaviorTarget::applied_behavior`].
#[derive(Default)]
pub struct AppliedBehaviors(RefCell<HashMap<String, Rc<dyn BindingBehavior>>>);

impl AppliedBehaviors {
    /// The behavior applied under `name`.
    pub fn get(&self, name: &str) -> Option<Rc<dyn BindingBehavior>> {
        self.0.borrow().get(name).cloned()
    }

    /// Record or clear `name`.
    pub fn set(&self, name: &str, behavior: Option<Rc<dyn BindingBehavior>>) {
        let mut applied = self.0.borrow_mut();
        match behavior {
            Some(behavior) => {
                applied.insert(name.to_string(), behavior);
            }
            None => {
                applied.remove(name);
            }
        }
    }

    /// Whether nothing is applied.
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

/// Modifies a binding for as long as it is bound (`expression & name:arg`).
pub trait BindingBehavior {
    /// Apply to `binding`.
    fn bind(&self, flags: LifecycleFlags, scope: &Scope, binding: &dyn BehaviorTarget, args: &[Value]) -> Result<()>;

    /// Undo [`bind`](Self::bind).
    fn unbind(&self, _flags: LifecycleFlags, _scope: &Scope, _binding: &dyn BehaviorTarget) {}
}

/// Forces a binding mode: `oneTime`, `toView`, `fromView`, `twoWay`.
pub struct ModeBehavior(BindingMode);

impl ModeBehavior {
    /// A behavior forcing `mode`.
    pub fn new(mode: BindingMode) -> Self {
        Self(mode)
    }
}

impl BindingBehavior for ModeBehavior {
    fn bind(&self, _flags: LifecycleFlags, _scope: &Scope, binding: &dyn BehaviorTarget, _args: &[Value]) -> Result<()> {
        binding.set_mode(self.0);
        Ok(())
    }

    fn unbind(&self, _flags: LifecycleFlags, _scope: &Scope, binding: &dyn BehaviorTarget) {
        if let Some(declared) = binding.declared_mode() {
            binding.set_mode(declared);
        }
    }
}

/// Re-evaluates a binding whenever one of the named signals is dispatched
/// (`value & signal:'locale-changed'`).
pub struct SignalBehavior {
    signaler: Rc<Signaler>,
    listening: RefCell<Vec<(SubscriberRef, Vec<String>)>>,
}

impl SignalBehavior {
    /// A signal behavior dispatching through `signaler`.
    pub fn new(signaler: Rc<Signaler>) -> Self {
        Self {
            signaler,
            listening: RefCell::new(Vec::new()),
        }
    }
}

impl BindingBehavior for SignalBehavior {
    fn bind(&self, _flags: LifecycleFlags, _scope: &Scope, binding: &dyn BehaviorTarget, args: &[Value]) -> Result<()> {
        let Some(listener) = binding.listener() else {
            return Err(Error::InvalidInstruction("signal requires a binding that can be notified".into()));
        };
        if args.is_empty() {
            return Err(Error::InvalidInstruction("signal requires at least one signal name".into()));
        }
        let names: Vec<String> = args.iter().map(Value::to_display_string).collect();
        for name in &names {
            self.signaler.add_signal_listener(name, listener.clone());
        }
        self.listening.borrow_mut().push((listener, names));
        Ok(())
    }

    fn unbind(&self, _flags: LifecycleFlags, _scope: &Scope, binding: &dyn BehaviorTarget) {
        let Some(listener) = binding.listener() else {
            return;
        };
        let mut listening = self.listening.borrow_mut();
        if let Some(pos) = listening.iter().position(|(l, _)| Weak::ptr_eq(l, &listener)) {
            let (listener, names) = listening.swap_remove(pos);
            for name in &names {
                self.signaler.remove_signal_listener(name, &listener);
            }
        }
    }
}

/// The standard [`ServiceLocator`]: shared services plus named converters
/// and behaviors.
pub struct ResourceRegistry {
    lifecycle: Rc<Lifecycle>,
    observer_locator: Rc<ObserverLocator>,
    signaler: Rc<Signaler>,
    parser: Arc<ExpressionParser>,
    converters: RefCell<HashMap<String, Rc<dyn ValueConverter>>>,
    behaviors: RefCell<HashMap<String, Rc<dyn BindingBehavior>>>,
}

impl ResourceRegistry {
    /// A registry over the given services, with no resources registered.
    pub fn new(
        lifecycle: Rc<Lifecycle>,
        observer_locator: Rc<ObserverLocator>,
        signaler: Rc<Signaler>,
        parser: Arc<ExpressionParser>,
    ) -> Self {
        Self {
            lifecycle,
            observer_locator,
            signaler,
            parser,
            converters: RefCell::new(HashMap::new()),
            behaviors: RefCell::new(HashMap::new()),
        }
    }

    /// A registry with fresh services and the built-in behaviors.
    pub fn standalone() -> Rc<Self> {
        let lifecycle = Lifecycle::new();
        let observer_locator = ObserverLocator::new(lifecycle.clone(), DirtyChecker::new());
        let registry = Self::new(
            lifecycle,
            observer_locator,
            Rc::new(Signaler::new()),
            Arc::new(ExpressionParser::new()),
        );
        registry.register_builtin_behaviors();
        Rc::new(registry)
    }

    /// Register `oneTime`, `toView`, `fromView`, `twoWay` and `signal`.
    pub fn register_builtin_behaviors(&self) {
        self.register_binding_behavior("oneTime", Rc::new(ModeBehavior::new(BindingMode::ONE_TIME)));
        self.register_binding_behavior("toView", Rc::new(ModeBehavior::new(BindingMode::TO_VIEW)));
        self.register_binding_behavior("fromView", Rc::new(ModeBehavior::new(BindingMode::FROM_VIEW)));
        self.register_binding_behavior("twoWay", Rc::new(ModeBehavior::new(BindingMode::TWO_WAY)));
        self.register_binding_behavior("signal", Rc::new(SignalBehavior::new(self.signaler.clone())));
    }

    /// Register a value converter, replacing any previous one of that name.
    pub fn register_value_converter(&self, name: impl Into<String>, converter: Rc<dyn ValueConverter>) {
        let name = name.into();
        tracing::debug!(target: "trellis::binding", converter = %name, "registered value converter");
        self.converters.borrow_mut().insert(name, converter);
    }

    /// Register a binding behavior, replacing any previous one of that name.
    pub fn register_binding_behavior(&self, name: impl Into<String>, behavior: Rc<dyn BindingBehavior>) {
        let name = name.into();
        tracing::debug!(target: "trellis::binding", behavior = %name, "registered binding behavior");
        self.behaviors.borrow_mut().insert(name, behavior);
    }

    /// The lifecycle.
    pub fn lifecycle(&self) -> &Rc<Lifecycle> {
        &self.lifecycle
    }

    /// The observer locator.
    pub fn observer_locator(&self) -> &Rc<ObserverLocator> {
        &self.observer_locator
    }

    /// The signal router.
    pub fn signaler(&self) -> &Rc<Signaler> {
        &self.signaler
    }

    /// The expression parser.
    pub fn parser(&self) -> &Arc<ExpressionParser> {
        &self.parser
    }
}

impl ServiceLocator for ResourceRegistry {
    fn get(&self, key: &ResourceKey) -> Option<Resource> {
        Some(match key {
            ResourceKey::Lifecycle => Resource::Lifecycle(self.lifecycle.clone()),
            ResourceKey::ObserverLocator => Resource::ObserverLocator(self.observer_locator.clone()),
            ResourceKey::Signaler => Resource::Signaler(self.signaler.clone()),
            ResourceKey::ExpressionParser => Resource::ExpressionParser(self.parser.clone()),
            ResourceKey::ValueConverter(name) => Resource::ValueConverter(self.converters.borrow().get(name)?.clone()),
            ResourceKey::BindingBehavior(name) => Resource::BindingBehavior(self.behaviors.borrow().get(name)?.clone()),
        })
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut converters: Vec<_> = self.converters.borrow().keys().cloned().collect();
        converters.sort();
        let mut behaviors: Vec<_> = self.behaviors.borrow().keys().cloned().collect();
        behaviors.sort();
        f.debug_struct("ResourceRegistry")
            .field("converters", &converters)
            .field("behaviors", &behaviors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Default)]
    struct Target {
        mode: Cell<Option<BindingMode>>,
        applied: AppliedBehaviors,
    }

    impl BehaviorTarget for Target {
        fn mode(&self) -> Option<BindingMode> {
            self.mode.get()
        }

        fn set_mode(&self, mode: BindingMode) {
            self.mode.set(Some(mode));
        }

        fn declared_mode(&self) -> Option<BindingMode> {
            Some(BindingMode::TO_VIEW)
        }

        fn applied_behavior(&self, name: &str) -> Option<Rc<dyn BindingBehavior>> {
            self.applied.get(name)
        }

        fn set_applied_behavior(&self, name: &str, behavior: Option<Rc<dyn BindingBehavior>>) {
            self.applied.set(name, behavior);
        }
    }

    #[test]
    fn test_typed_lookups() {
        let registry = ResourceRegistry::standalone();
        assert!(registry.binding_behavior("oneTime").is_ok());
        assert_eq!(
            registry.value_converter("upper").err().map(|e| e.to_string()),
            Some("Value converter 'upper' not found".to_string())
        );

        registry.register_value_converter(
            "upper",
            Rc::new(FnValueConverter::new(|v, _| Ok(Value::from(v.to_display_string().to_uppercase())))),
        );
        let upper = registry.value_converter("upper").unwrap();
        assert_eq!(upper.to_view(Value::from("a"), &[]).unwrap(), Value::from("A"));
        assert_eq!(upper.from_view(Value::from("b"), &[]).unwrap(), Value::from("b"));
    }

    #[test]
    fn test_mode_behavior_restores_declared_mode() {
        let scope = Scope::create(trellis_core::ObjectRef::new()).unwrap();
        let target = Target::default();
        let behavior = ModeBehavior::new(BindingMode::ONE_TIME);
        behavior.bind(LifecycleFlags::FROM_BIND, &scope, &target, &[]).unwrap();
        assert_eq!(target.mode(), Some(BindingMode::ONE_TIME));
        behavior.unbind(LifecycleFlags::FROM_UNBIND, &scope, &target);
        assert_eq!(target.mode(), Some(BindingMode::TO_VIEW));
    }

    #[test]
    fn test_signal_behavior_requires_listener() {
        let scope = Scope::create(trellis_core::ObjectRef::new()).unwrap();
        let behavior = SignalBehavior::new(Rc::new(Signaler::new()));
        let result = behavior.bind(LifecycleFlags::FROM_BIND, &scope, &Target::default(), &[Value::from("x")]);
        assert!(matches!(result, Err(Error::InvalidInstruction(_))));
    }
}
