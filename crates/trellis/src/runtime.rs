//! Runtime assembly.
//!
//! A [`Runtime`] wires the shared services bindings consume (lifecycle,
//! observer locator, dirty checker, signaler, expression parser) into one
//! [`ResourceRegistry`], and offers the entry points for turning binding
//! instructions into live bindings and views.
//!
//! ```
//! use std::rc::Rc;
//! use trellis::resources::FnValueConverter;
//! use trellis::runtime::Runtime;
//! use trellis_core::{DirtyCheckSettings, Value};
//!
//! let runtime = Runtime::builder()
//!     .dirty_check(DirtyCheckSettings::default().with_frames_per_check(2))
//!     .value_converter(
//!         "upper",
//!         Rc::new(FnValueConverter::new(|value, _| Ok(Value::from(value.to_display_string().to_uppercase())))),
//!     )
//!     .build();
//! assert_eq!(runtime.config().dirty_check.frames_per_check, 2);
//! ```

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use trellis_core::{
    DirtyCheckSettings, DirtyChecker, Lifecycle, LifecycleConfig, ObjectObservationAdapter, ObserverLocator,
    Signaler, TargetObserverLocator, Value,
};

use crate::binding::{Bindable, BindingInstruction};
use crate::error::Result;
use crate::parser::ExpressionParser;
use crate::resources::{BindingBehavior, Resource, ResourceKey, ResourceRegistry, ServiceLocator, ValueConverter};
use crate::view::{View, ViewHooks};

/// Runtime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Dirty-checking behavior for properties that cannot be observed
    /// otherwise.
    pub dirty_check: DirtyCheckSettings,
    /// Register `oneTime`, `toView`, `fromView`, `twoWay` and `signal`.
    pub builtin_behaviors: bool,
    /// Lifecycle queue limits.
    pub lifecycle: LifecycleConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dirty_check: DirtyCheckSettings::default(),
            builtin_behaviors: true,
            lifecycle: LifecycleConfig::default(),
        }
    }
}

/// Builder for a [`Runtime`] with custom configuration and resources.
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    target_locator: Option<Rc<dyn TargetObserverLocator>>,
    adapters: Vec<Rc<dyn ObjectObservationAdapter>>,
    converters: Vec<(String, Rc<dyn ValueConverter>)>,
    behaviors: Vec<(String, Rc<dyn BindingBehavior>)>,
}

impl RuntimeBuilder {
    /// A builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the dirty-checking behavior.
    pub fn dirty_check(mut self, settings: DirtyCheckSettings) -> Self {
        self.config.dirty_check = settings;
        self
    }

    /// Whether to register the built-in binding behaviors.
    pub fn builtin_behaviors(mut self, enabled: bool) -> Self {
        self.config.builtin_behaviors = enabled;
        self
    }

    /// Set the lifecycle limits.
    pub fn lifecycle(mut self, config: LifecycleConfig) -> Self {
        self.config.lifecycle = config;
        self
    }

    /// Install the host-specific target observer locator.
    pub fn target_locator(mut self, locator: Rc<dyn TargetObserverLocator>) -> Self {
        self.target_locator = Some(locator);
        self
    }

    /// Add an observation adapter for accessor properties.
    pub fn adapter(mut self, adapter: Rc<dyn ObjectObservationAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Register a value converter.
    pub fn value_converter(mut self, name: impl Into<String>, converter: Rc<dyn ValueConverter>) -> Self {
        self.converters.push((name.into(), converter));
        self
    }

    /// Register a binding behavior. Registered after the built-ins, so it
    /// can replace one of them.
    pub fn binding_behavior(mut self, name: impl Into<String>, behavior: Rc<dyn BindingBehavior>) -> Self {
        self.behaviors.push((name.into(), behavior));
        self
    }

    /// Assemble the runtime.
    pub fn build(self) -> Runtime {
        let lifecycle = Lifecycle::with_config(self.config.lifecycle);
        let dirty_checker = DirtyChecker::with_settings(self.config.dirty_check);
        let observer_locator = ObserverLocator::new(lifecycle.clone(), dirty_checker.clone());
        if let Some(target_locator) = self.target_locator {
            observer_locator.set_target_locator(target_locator);
        }
        for adapter in self.adapters {
            observer_locator.add_adapter(adapter);
        }

        let registry = ResourceRegistry::new(
            lifecycle,
            observer_locator,
            Rc::new(Signaler::new()),
            Arc::new(ExpressionParser::new()),
        );
        if self.config.builtin_behaviors {
            registry.register_builtin_behaviors();
        }
        for (name, converter) in self.converters {
            registry.register_value_converter(name, converter);
        }
        for (name, behavior) in self.behaviors {
            registry.register_binding_behavior(name, behavior);
        }

        tracing::debug!(target: "trellis::binding", config = ?self.config, "runtime assembled");
        Runtime {
            config: self.config,
            dirty_checker,
            registry: Rc::new(registry),
        }
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.config)
            .field("target_locator", &self.target_locator.is_some())
            .field("adapters", &self.adapters.len())
            .field("converters", &self.converters.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .field("behaviors", &self.behaviors.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .finish()
    }
}

/// The assembled services.
pub struct Runtime {
    config: RuntimeConfig,
    dirty_checker: Rc<DirtyChecker>,
    registry: Rc<ResourceRegistry>,
}

impl Runtime {
    /// A runtime with default settings and the built-in behaviors.
    pub fn new() -> Self {
        RuntimeBuilder::new().build()
    }

    /// Start configuring a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// The settings the runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The lifecycle.
    pub fn lifecycle(&self) -> &Rc<Lifecycle> {
        self.registry.lifecycle()
    }

    /// The observer locator.
    pub fn observer_locator(&self) -> &Rc<ObserverLocator> {
        self.registry.observer_locator()
    }

    /// The dirty checker.
    pub fn dirty_checker(&self) -> &Rc<DirtyChecker> {
        &self.dirty_checker
    }

    /// The signal router.
    pub fn signaler(&self) -> &Rc<Signaler> {
        self.registry.signaler()
    }

    /// The expression parser.
    pub fn parser(&self) -> &Arc<ExpressionParser> {
        self.registry.parser()
    }

    /// The resource registry, for registering more resources later.
    pub fn registry(&self) -> &Rc<ResourceRegistry> {
        &self.registry
    }

    /// The registry as a service locator.
    pub fn locator(&self) -> Rc<dyn ServiceLocator> {
        self.registry.clone()
    }

    /// Create an unbound binding from an instruction.
    pub fn hydrate(&self, instruction: &BindingInstruction, target: &Value) -> Result<Rc<dyn Bindable>> {
        instruction.hydrate(target, self.locator())
    }

    /// Create a view holding one binding per `(target, instruction)` pair.
    pub fn create_view(
        &self,
        hooks: impl ViewHooks + 'static,
        instructions: &[(Value, BindingInstruction)],
    ) -> Result<Rc<View>> {
        let view = View::new(self.lifecycle().clone(), hooks);
        for (target, instruction) in instructions {
            view.add_binding(self.hydrate(instruction, target)?);
        }
        Ok(view)
    }

    /// Advance one frame: poll dirty-checked properties when due, then run
    /// every pending microtask. Returns the number of microtasks run.
    pub fn tick(&self) -> usize {
        self.dirty_checker.tick();
        self.lifecycle().drain_microtasks()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceLocator for Runtime {
    fn get(&self, key: &ResourceKey) -> Option<Resource> {
        self.registry.get(key)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}
