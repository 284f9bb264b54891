//! Bindings connect a source expression to a target property.
//!
//! A binding is created per target from a [`BindingInstruction`], bound to
//! a [`Scope`], and from then on keeps the two sides in sync:
//!
//! - to-view bindings connect the source expression, and on every change
//!   re-evaluate it and queue a target write on the lifecycle flush queue,
//!   so any number of synchronous changes produce one write per flush;
//! - from-view bindings subscribe to the target observer and assign the
//!   source expression when the target changes;
//! - one-time bindings write the target once at bind time.
//!
//! Every binding follows the same state machine: unbound, binding, bound,
//! unbinding, unbound. Binding an already bound binding to the same scope
//! is a no-op; binding it to a different scope unbinds it first.

mod call;
mod instruction;
mod interpolation;
mod let_binding;
mod property;
mod ref_binding;

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;
use trellis_core::{
    CollectionRef, CollectionSubscriberRef, Connectable, Lifecycle, LifecycleFlags, ObserverLocator,
    ObserverSlots, Signaler, SubscriberRef, Value,
};

pub use call::CallBinding;
pub use instruction::{BindingCommand, BindingInstruction};
pub use interpolation::{InterpolationBinding, MultiInterpolationBinding};
pub use let_binding::LetBinding;
pub use property::Binding;
pub use ref_binding::RefBinding;

use crate::ast::ExpressionRef;
use crate::error::Result;
use crate::resources::{ServiceLocator, ServiceLocatorExt};
use crate::scope::Scope;

bitflags! {
    /// Direction of data flow.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BindingMode: u8 {
        /// Write the target once at bind time.
        const ONE_TIME  = 1;
        /// Source to target, continuously.
        const TO_VIEW   = 2;
        /// Target to source, continuously.
        const FROM_VIEW = 4;
        /// Both directions.
        const TWO_WAY   = Self::TO_VIEW.bits() | Self::FROM_VIEW.bits();
    }
}

bitflags! {
    /// Position in the bind/unbind state machine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BindingState: u8 {
        /// Inside `bind`.
        const BINDING   = 1 << 0;
        /// Bound to a scope.
        const BOUND     = 1 << 1;
        /// Inside `unbind`.
        const UNBINDING = 1 << 2;
    }
}

/// Something that can be bound to a scope.
pub trait Bindable {
    /// Bind to `scope`. Binding again to the same scope is a no-op.
    fn bind(&self, flags: LifecycleFlags, scope: &Rc<Scope>) -> Result<()>;

    /// Release the scope and every subscription.
    fn unbind(&self, flags: LifecycleFlags);

    /// Whether the binding is currently bound.
    fn is_bound(&self) -> bool;
}

/// Services every binding resolves once at construction.
#[derive(Clone)]
pub(crate) struct BindingServices {
    pub(crate) locator: Rc<dyn ServiceLocator>,
    pub(crate) observer_locator: Rc<ObserverLocator>,
    pub(crate) lifecycle: Rc<Lifecycle>,
}

impl BindingServices {
    pub(crate) fn resolve(locator: Rc<dyn ServiceLocator>) -> Result<Self> {
        Ok(Self {
            observer_locator: locator.observer_locator()?,
            lifecycle: locator.lifecycle()?,
            locator,
        })
    }
}

/// The weak self-references a binding subscribes with.
#[derive(Clone)]
pub(crate) struct Listeners {
    pub(crate) changes: SubscriberRef,
    pub(crate) collections: CollectionSubscriberRef,
}

/// The observers a binding's source currently depends on.
///
/// Each refresh bumps the slot version, reconnects the expression and drops
/// whatever the new pass did not touch.
#[derive(Default)]
pub(crate) struct SourceObservation {
    slots: ObserverSlots,
    signals: RefCell<Vec<String>>,
    signaler: RefCell<Option<Rc<Signaler>>>,
}

impl SourceObservation {
    pub(crate) fn observe_property(
        &self,
        services: &BindingServices,
        flags: LifecycleFlags,
        obj: &Value,
        name: &str,
        subscriber: &SubscriberRef,
    ) {
        match services.observer_locator.get_observer(flags, obj, name) {
            Ok(observer) => self.slots.add_observer(observer, subscriber),
            Err(err) => tracing::warn!(target: "trellis::binding", property = name, error = %err, "property cannot be observed"),
        }
    }

    pub(crate) fn observe_collection(
        &self,
        services: &BindingServices,
        collection: &CollectionRef,
        subscriber: &CollectionSubscriberRef,
    ) {
        let observer = services.observer_locator.get_collection_observer(collection);
        self.slots.add_collection_observer(observer, subscriber);
    }

    pub(crate) fn observe_signal(&self, services: &BindingServices, name: &str, subscriber: &SubscriberRef) {
        if self.signals.borrow().iter().any(|s| s == name) {
            return;
        }
        let signaler = match self.signaler.borrow().clone() {
            Some(signaler) => signaler,
            None => match services.locator.signaler() {
                Ok(signaler) => {
                    *self.signaler.borrow_mut() = Some(signaler.clone());
                    signaler
                }
                Err(err) => {
                    tracing::warn!(target: "trellis::binding", signal = name, error = %err, "cannot listen for signal");
                    return;
                }
            },
        };
        signaler.add_signal_listener(name, subscriber.clone());
        self.signals.borrow_mut().push(name.to_string());
    }

    /// Reconnect `source` and drop stale observers.
    pub(crate) fn reconnect(
        &self,
        source: &ExpressionRef,
        flags: LifecycleFlags,
        scope: &Scope,
        locator: &dyn ServiceLocator,
        binding: &dyn Connectable,
        listeners: &Listeners,
    ) -> Result<()> {
        self.slots.bump_version();
        let result = source.connect(flags, scope, locator, binding);
        self.slots.unobserve(false, &listeners.changes, &listeners.collections);
        result
    }

    /// Drop every observer and signal listener.
    pub(crate) fn clear(&self, listeners: &Listeners) {
        self.slots.unobserve(true, &listeners.changes, &listeners.collections);
        let signals = std::mem::take(&mut *self.signals.borrow_mut());
        if let Some(signaler) = self.signaler.borrow().as_ref() {
            for name in &signals {
                signaler.remove_signal_listener(name, &listeners.changes);
            }
        }
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.slots.len()
    }
}

/// Log a failure inside a change handler, where there is no caller to
/// return it to.
pub(crate) fn report(source: &ExpressionRef, context: &'static str, err: &crate::error::Error) {
    tracing::error!(target: "trellis::binding", expression = %source, error = %err, "{context}");
}
