use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::{Accessor, ObserverKind, PropertyObserver};
use crate::flags::LifecycleFlags;
use crate::subscriber::{Subscriber, SubscriberRef, SubscriberSet};
use crate::value::{ObjectRef, PropertyWatcher, Value, WeakObjectRef};

/// Observer for a property of a primitive value.
///
/// Primitives are immutable, so this observer never notifies. Strings expose
/// their `length`.
#[derive(Debug)]
pub struct PrimitiveObserver {
    value: Value,
    name: Rc<str>,
}

impl PrimitiveObserver {
    /// Observe `name` on a primitive.
    pub fn new(value: Value, name: &str) -> Self {
        Self {
            value,
            name: Rc::from(name),
        }
    }
}

impl Accessor for PrimitiveObserver {
    fn get_value(&self) -> Value {
        match (&self.value, &*self.name) {
            (Value::String(s), "length") => Value::from(s.encode_utf16().count()),
            _ => Value::Undefined,
        }
    }

    fn set_value(&self, _value: Value, _flags: LifecycleFlags) {}
}

impl PropertyObserver for PrimitiveObserver {
    fn subscribe(&self, _subscriber: SubscriberRef) {}

    fn unsubscribe(&self, _subscriber: &SubscriberRef) {}

    fn subscriber_count(&self) -> usize {
        0
    }

    fn observer_kind(&self) -> ObserverKind {
        ObserverKind::Primitive
    }
}

/// Plain read/write access to an object property without observation.
pub struct PropertyAccessor {
    obj: ObjectRef,
    name: Rc<str>,
}

impl PropertyAccessor {
    /// Access `name` on `obj`.
    pub fn new(obj: ObjectRef, name: &str) -> Self {
        Self {
            obj,
            name: Rc::from(name),
        }
    }
}

impl Accessor for PropertyAccessor {
    fn get_value(&self) -> Value {
        self.obj.get(&self.name)
    }

    fn set_value(&self, value: Value, flags: LifecycleFlags) {
        self.obj.set_with_flags(&self.name, value, flags);
    }
}

/// Observes a property by watching writes to it.
///
/// Works for data properties and for accessor properties with a setter; in
/// the latter case the old and new values are read through the getter around
/// the write. The object only reports writes while at least one subscriber
/// is present.
pub struct SetterObserver {
    this: Weak<SetterObserver>,
    obj: WeakObjectRef,
    name: Rc<str>,
    subscribers: RefCell<SubscriberSet<dyn Subscriber>>,
}

impl SetterObserver {
    /// Observe `name` on `obj`.
    pub fn new(obj: &ObjectRef, name: &str) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            obj: obj.downgrade(),
            name: Rc::from(name),
            subscribers: RefCell::new(SubscriberSet::new()),
        })
    }

    /// The observed property name.
    pub fn property_name(&self) -> &str {
        &self.name
    }
}

impl Accessor for SetterObserver {
    fn get_value(&self) -> Value {
        self.obj
            .upgrade()
            .map_or(Value::Undefined, |obj| obj.get(&self.name))
    }

    fn set_value(&self, value: Value, flags: LifecycleFlags) {
        if let Some(obj) = self.obj.upgrade() {
            obj.set_with_flags(&self.name, value, flags);
        }
    }
}

impl PropertyObserver for SetterObserver {
    fn subscribe(&self, subscriber: SubscriberRef) {
        let first = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.prune();
            let was_empty = subscribers.is_empty();
            subscribers.add(subscriber) && was_empty
        };
        if first {
            if let Some(obj) = self.obj.upgrade() {
                obj.watch(&self.name, self.this.clone() as Weak<dyn PropertyWatcher>);
                tracing::trace!(target: "trellis_core::observation", property = %self.name, "watching property writes");
            }
        }
    }

    fn unsubscribe(&self, subscriber: &SubscriberRef) {
        let now_empty = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.remove(subscriber) && subscribers.is_empty()
        };
        if now_empty {
            if let Some(obj) = self.obj.upgrade() {
                obj.unwatch(&self.name, &(self.this.clone() as Weak<dyn PropertyWatcher>));
            }
        }
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    fn observer_kind(&self) -> ObserverKind {
        ObserverKind::Setter
    }
}

impl PropertyWatcher for SetterObserver {
    fn property_written(&self, new_value: &Value, previous_value: &Value, flags: LifecycleFlags) {
        let subscribers = self.subscribers.borrow().snapshot();
        SubscriberSet::notify(
            subscribers,
            new_value,
            previous_value,
            flags | LifecycleFlags::UPDATE_TARGET_INSTANCE,
        );
    }
}
