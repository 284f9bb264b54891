//! Named signals.
//!
//! A signal forces every listening binding to re-evaluate, regardless of
//! whether any observed value changed. Typical use: refreshing a value
//! converter whose output depends on something outside the binding's scope,
//! such as the current locale.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::flags::LifecycleFlags;
use crate::subscriber::{Subscriber, SubscriberRef, SubscriberSet};
use crate::value::Value;

/// Routes named signals to their listeners.
#[derive(Default)]
pub struct Signaler {
    signals: RefCell<HashMap<Rc<str>, SubscriberSet<dyn Subscriber>>>,
}

impl Signaler {
    /// A signaler with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for `name`.
    pub fn add_signal_listener(&self, name: &str, listener: SubscriberRef) {
        self.signals
            .borrow_mut()
            .entry(Rc::from(name))
            .or_default()
            .add(listener);
    }

    /// Stop listening for `name`.
    pub fn remove_signal_listener(&self, name: &str, listener: &SubscriberRef) {
        let mut signals = self.signals.borrow_mut();
        if let Some(listeners) = signals.get_mut(name) {
            listeners.remove(listener);
            if listeners.is_empty() {
                signals.remove(name);
            }
        }
    }

    /// Number of live listeners for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.signals.borrow().get(name).map_or(0, SubscriberSet::len)
    }

    /// Notify every listener of `name`. Returns how many were notified.
    pub fn dispatch_signal(&self, name: &str, flags: LifecycleFlags) -> usize {
        let listeners = match self.signals.borrow().get(name) {
            Some(listeners) => listeners.snapshot(),
            None => return 0,
        };
        let count = listeners.len();
        tracing::debug!(target: "trellis_core::observation", signal = name, listeners = count, "dispatching signal");
        SubscriberSet::notify(
            listeners,
            &Value::Undefined,
            &Value::Undefined,
            flags | LifecycleFlags::UPDATE_TARGET_INSTANCE,
        );
        count
    }
}

impl std::fmt::Debug for Signaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signaler")
            .field("signals", &self.signals.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counter(Cell<u32>);

    impl Subscriber for Counter {
        fn handle_change(&self, _: &Value, _: &Value, flags: LifecycleFlags) {
            assert!(flags.contains(LifecycleFlags::UPDATE_TARGET_INSTANCE));
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_dispatch_reaches_listeners() {
        let signaler = Signaler::new();
        let a = Rc::new(Counter(Cell::new(0)));
        let weak = Rc::downgrade(&a) as SubscriberRef;
        signaler.add_signal_listener("locale-changed", weak.clone());
        assert_eq!(signaler.dispatch_signal("locale-changed", LifecycleFlags::NONE), 1);
        assert_eq!(signaler.dispatch_signal("other", LifecycleFlags::NONE), 0);
        assert_eq!(a.0.get(), 1);

        signaler.remove_signal_listener("locale-changed", &weak);
        assert_eq!(signaler.listener_count("locale-changed"), 0);
        assert_eq!(signaler.dispatch_signal("locale-changed", LifecycleFlags::NONE), 0);
    }
}
