use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::{Accessor, CollectionObserver, ObserverKind, ObserverLocator, ObserverRef, PropertyObserver};
use crate::flags::LifecycleFlags;
use crate::index_map::IndexMap;
use crate::subscriber::{
    CollectionSubscriber, CollectionSubscriberRef, Subscriber, SubscriberRef, SubscriberSet,
};
use crate::tracking::{self, Dependency};
use crate::value::{AccessorDescriptor, ComputedOverrides, ObjectRef, Value, WeakObjectRef};

enum Upstream {
    Property(ObserverRef),
    Collection(Rc<CollectionObserver>),
}

/// Observes a computed (getter) property.
///
/// The getter runs inside a dependency tracker; every property and
/// collection it reads becomes an upstream subscription. When an upstream
/// source changes the getter is re-run and subscribers are notified if the
/// result differs.
///
/// [`ComputedOverrides`] select how dependencies are collected:
///
/// - default: recollected on every recomputation, so branches that start or
///   stop reading a source are followed.
/// - `is_static`: collected once, on first subscription.
/// - `volatile`: recollected on every read, and reads never use the cached
///   value.
pub struct GetterObserver {
    this: Weak<GetterObserver>,
    obj: WeakObjectRef,
    name: Rc<str>,
    descriptor: Rc<AccessorDescriptor>,
    overrides: ComputedOverrides,
    locator: Weak<ObserverLocator>,
    subscribers: RefCell<SubscriberSet<dyn Subscriber>>,
    current: RefCell<Value>,
    upstream: RefCell<Vec<Upstream>>,
    collected: Cell<bool>,
}

impl GetterObserver {
    pub(crate) fn new(
        locator: Weak<ObserverLocator>,
        obj: &ObjectRef,
        name: &str,
        descriptor: Rc<AccessorDescriptor>,
        overrides: ComputedOverrides,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            obj: obj.downgrade(),
            name: Rc::from(name),
            descriptor,
            overrides,
            locator,
            subscribers: RefCell::new(SubscriberSet::new()),
            current: RefCell::new(Value::Undefined),
            upstream: RefCell::new(Vec::new()),
            collected: Cell::new(false),
        })
    }

    /// The dependency-collection mode.
    pub fn overrides(&self) -> ComputedOverrides {
        self.overrides
    }

    /// Number of upstream sources currently subscribed to.
    pub fn dependency_count(&self) -> usize {
        self.upstream.borrow().len()
    }

    fn compute(&self, collect: bool) -> Value {
        let Some(obj) = self.obj.upgrade() else {
            return Value::Undefined;
        };
        if !collect {
            return tracking::untracked(|| self.descriptor.read(&obj));
        }
        self.unsubscribe_upstream();
        let (value, deps) = tracking::track(|| self.descriptor.read(&obj));
        self.subscribe_upstream(&obj, deps);
        self.collected.set(true);
        value
    }

    fn subscribe_upstream(&self, owner: &ObjectRef, deps: Vec<Dependency>) {
        let Some(locator) = self.locator.upgrade() else {
            return;
        };
        let as_subscriber = self.this.clone() as SubscriberRef;
        let as_collection_subscriber = self.this.clone() as CollectionSubscriberRef;
        let mut upstream = Vec::with_capacity(deps.len());
        for dep in deps {
            match dep {
                Dependency::Property(obj, name) => {
                    if obj.ptr_eq(owner) && name == self.name {
                        continue;
                    }
                    match locator.get_observer(LifecycleFlags::NONE, &Value::Object(obj), &name) {
                        Ok(observer) => {
                            observer.subscribe(as_subscriber.clone());
                            upstream.push(Upstream::Property(observer));
                        }
                        Err(error) => {
                            tracing::warn!(target: "trellis_core::observation", property = %name, %error, "computed dependency cannot be observed");
                        }
                    }
                }
                Dependency::Collection(collection) => {
                    let observer = locator.get_collection_observer(&collection);
                    observer.subscribe_collection(as_collection_subscriber.clone());
                    upstream.push(Upstream::Collection(observer));
                }
            }
        }
        tracing::trace!(
            target: "trellis_core::observation",
            property = %self.name,
            dependencies = upstream.len(),
            "computed dependencies collected"
        );
        *self.upstream.borrow_mut() = upstream;
    }

    fn unsubscribe_upstream(&self) {
        let upstream = std::mem::take(&mut *self.upstream.borrow_mut());
        let as_subscriber = self.this.clone() as SubscriberRef;
        let as_collection_subscriber = self.this.clone() as CollectionSubscriberRef;
        for source in upstream {
            match source {
                Upstream::Property(observer) => observer.unsubscribe(&as_subscriber),
                Upstream::Collection(observer) => observer.unsubscribe_collection(&as_collection_subscriber),
            }
        }
        self.collected.set(false);
    }

    fn recompute(&self, flags: LifecycleFlags) {
        if self.subscribers.borrow().is_empty() {
            return;
        }
        let collect = !self.overrides.is_static;
        let new_value = self.compute(collect);
        let previous = self.current.replace(new_value.clone());
        if !new_value.same_value(&previous) {
            let subscribers = self.subscribers.borrow().snapshot();
            SubscriberSet::notify(
                subscribers,
                &new_value,
                &previous,
                flags | LifecycleFlags::UPDATE_TARGET_INSTANCE,
            );
        }
    }
}

impl Accessor for GetterObserver {
    fn get_value(&self) -> Value {
        if self.subscribers.borrow().is_empty() {
            return self.compute(false);
        }
        if self.overrides.volatile {
            let value = self.compute(true);
            *self.current.borrow_mut() = value.clone();
            return value;
        }
        self.current.borrow().clone()
    }

    fn set_value(&self, value: Value, flags: LifecycleFlags) {
        match (&self.descriptor.set, self.obj.upgrade()) {
            (Some(_), Some(obj)) => obj.set_with_flags(&self.name, value, flags),
            _ => {
                tracing::trace!(target: "trellis_core::observation", property = %self.name, "ignoring write to computed property without setter");
            }
        }
    }
}

impl PropertyObserver for GetterObserver {
    fn subscribe(&self, subscriber: SubscriberRef) {
        let first = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.prune();
            let was_empty = subscribers.is_empty();
            subscribers.add(subscriber) && was_empty
        };
        if first && !self.collected.get() {
            let value = self.compute(true);
            *self.current.borrow_mut() = value;
        }
    }

    fn unsubscribe(&self, subscriber: &SubscriberRef) {
        let now_empty = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.remove(subscriber) && subscribers.is_empty()
        };
        if now_empty {
            self.unsubscribe_upstream();
        }
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    fn observer_kind(&self) -> ObserverKind {
        ObserverKind::Getter
    }
}

impl Subscriber for GetterObserver {
    fn handle_change(&self, _new_value: &Value, _previous_value: &Value, flags: LifecycleFlags) {
        self.recompute(flags);
    }
}

impl CollectionSubscriber for GetterObserver {
    fn handle_collection_change(&self, _index_map: &IndexMap, flags: LifecycleFlags) {
        self.recompute(flags);
    }
}

impl Drop for GetterObserver {
    fn drop(&mut self) {
        self.unsubscribe_upstream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Lifecycle;
    use crate::observer::{DirtyCheckSettings, DirtyChecker};

    #[derive(Default)]
    struct Recorder(RefCell<Vec<Value>>);

    impl Subscriber for Recorder {
        fn handle_change(&self, new_value: &Value, _previous: &Value, _flags: LifecycleFlags) {
            self.0.borrow_mut().push(new_value.clone());
        }
    }

    fn locator() -> Rc<ObserverLocator> {
        ObserverLocator::new(
            Lifecycle::new(),
            DirtyChecker::with_settings(DirtyCheckSettings::DEFAULT.with_warn(false)),
        )
    }

    fn pick() -> AccessorDescriptor {
        AccessorDescriptor::getter(|o| if o.get("flag").is_truthy() { o.get("a") } else { o.get("b") })
    }

    #[test]
    fn test_static_dependencies_are_collected_once() {
        let locator = locator();
        let obj = ObjectRef::from_pairs([("flag", Value::from(true)), ("a", Value::from(1)), ("b", Value::from(2))]);
        let observer = GetterObserver::new(Rc::downgrade(&locator), &obj, "pick", Rc::new(pick()), ComputedOverrides::STATIC);
        let recorder = Rc::new(Recorder::default());
        observer.subscribe(Rc::downgrade(&recorder) as SubscriberRef);
        assert_eq!(observer.dependency_count(), 2);

        obj.set("flag", false);
        assert_eq!(*recorder.0.borrow(), vec![Value::from(2)]);

        // `b` was not read during collection, so it stays unobserved.
        obj.set("b", 5);
        assert_eq!(recorder.0.borrow().len(), 1);
        assert_eq!(observer.dependency_count(), 2);
        assert_eq!(observer.get_value(), Value::from(2));
    }

    #[test]
    fn test_volatile_reads_bypass_the_cache() {
        let locator = locator();
        let counter = Rc::new(Cell::new(0));
        let obj = ObjectRef::new();
        let read = {
            let counter = counter.clone();
            move || {
                let source = counter.clone();
                Rc::new(AccessorDescriptor::getter(move |_| Value::from(source.get())))
            }
        };
        let cached = GetterObserver::new(Rc::downgrade(&locator), &obj, "cached", read(), ComputedOverrides::default());
        let volatile = GetterObserver::new(Rc::downgrade(&locator), &obj, "volatile", read(), ComputedOverrides::VOLATILE);
        let recorder = Rc::new(Recorder::default());
        cached.subscribe(Rc::downgrade(&recorder) as SubscriberRef);
        volatile.subscribe(Rc::downgrade(&recorder) as SubscriberRef);

        counter.set(7);
        assert_eq!(cached.get_value(), Value::from(0));
        assert_eq!(volatile.get_value(), Value::from(7));
    }

    #[test]
    fn test_last_unsubscribe_releases_upstream() {
        let locator = locator();
        let obj = ObjectRef::from_pairs([("flag", Value::from(true)), ("a", Value::from(1)), ("b", Value::from(2))]);
        let observer = GetterObserver::new(Rc::downgrade(&locator), &obj, "pick", Rc::new(pick()), ComputedOverrides::default());
        let recorder = Rc::new(Recorder::default());
        let subscriber = Rc::downgrade(&recorder) as SubscriberRef;
        observer.subscribe(subscriber.clone());
        assert_eq!(observer.dependency_count(), 2);

        observer.unsubscribe(&subscriber);
        assert_eq!(observer.dependency_count(), 0);
        obj.set("a", 10);
        assert!(recorder.0.borrow().is_empty());
    }
}
