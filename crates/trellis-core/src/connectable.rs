//! Dependency bookkeeping for bindings.
//!
//! Each time a binding re-evaluates its source, it reconnects: the
//! expression reports every observable it touched through [`Connectable`].
//! [`ObserverSlots`] remembers those observers together with the *version*
//! of the connect pass that last touched them. After a pass, any observer
//! still carrying an older version is no longer a dependency and is
//! unsubscribed, without diffing old and new dependency lists.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::collection::CollectionRef;
use crate::flags::LifecycleFlags;
use crate::observer::{CollectionObserver, ObserverRef};
use crate::subscriber::{CollectionSubscriberRef, SubscriberRef};
use crate::value::Value;

/// Receives the observables an expression touches while connecting.
pub trait Connectable {
    /// Observe `name` on `obj`.
    fn observe_property(&self, flags: LifecycleFlags, obj: &Value, name: &str);

    /// Observe the contents of a collection.
    fn observe_collection(&self, _flags: LifecycleFlags, _collection: &CollectionRef) {}

    /// Listen for a named signal.
    fn observe_signal(&self, _name: &str) {}
}

#[derive(Clone)]
enum Observed {
    Property(ObserverRef),
    Collection(Rc<CollectionObserver>),
}

impl Observed {
    fn same(&self, other: &Observed) -> bool {
        match (self, other) {
            (Self::Property(a), Self::Property(b)) => Rc::ptr_eq(a, b),
            (Self::Collection(a), Self::Collection(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Clone)]
struct Slot {
    observed: Observed,
    version: u32,
}

const INLINE: usize = 3;

/// Versioned observer slots: three inline, the rest in an overflow vector.
#[derive(Default)]
pub struct ObserverSlots {
    version: Cell<u32>,
    inline: RefCell<[Option<Slot>; INLINE]>,
    overflow: RefCell<Vec<Slot>>,
}

impl ObserverSlots {
    /// Empty slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current connect-pass version.
    pub fn version(&self) -> u32 {
        self.version.get()
    }

    /// Start a new connect pass.
    pub fn bump_version(&self) {
        self.version.set(self.version.get().wrapping_add(1));
    }

    /// Number of observers held.
    pub fn len(&self) -> usize {
        self.inline.borrow().iter().flatten().count() + self.overflow.borrow().len()
    }

    /// Whether no observer is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the observer is currently held.
    pub fn contains(&self, observer: &ObserverRef) -> bool {
        self.position(&Observed::Property(observer.clone())).is_some()
    }

    fn position(&self, observed: &Observed) -> Option<SlotIndex> {
        if let Some(i) = self
            .inline
            .borrow()
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.observed.same(observed)))
        {
            return Some(SlotIndex::Inline(i));
        }
        self.overflow
            .borrow()
            .iter()
            .position(|s| s.observed.same(observed))
            .map(SlotIndex::Overflow)
    }

    fn touch_or_insert(&self, observed: Observed) -> bool {
        let version = self.version.get();
        match self.position(&observed) {
            Some(SlotIndex::Inline(i)) => {
                if let Some(slot) = self.inline.borrow_mut()[i].as_mut() {
                    slot.version = version;
                }
                false
            }
            Some(SlotIndex::Overflow(i)) => {
                self.overflow.borrow_mut()[i].version = version;
                false
            }
            None => {
                let slot = Slot { observed, version };
                let mut inline = self.inline.borrow_mut();
                match inline.iter_mut().find(|s| s.is_none()) {
                    Some(empty) => *empty = Some(slot),
                    None => self.overflow.borrow_mut().push(slot),
                }
                true
            }
        }
    }

    /// Record a property observer for the current pass, subscribing
    /// `subscriber` the first time it is seen.
    pub fn add_observer(&self, observer: ObserverRef, subscriber: &SubscriberRef) {
        if self.touch_or_insert(Observed::Property(observer.clone())) {
            observer.subscribe(subscriber.clone());
        }
    }

    /// Record a collection observer for the current pass.
    pub fn add_collection_observer(&self, observer: Rc<CollectionObserver>, subscriber: &CollectionSubscriberRef) {
        if self.touch_or_insert(Observed::Collection(observer.clone())) {
            observer.subscribe_collection(subscriber.clone());
        }
    }

    /// Unsubscribe from observers not touched by the current pass, or from
    /// every observer when `all` is set.
    pub fn unobserve(&self, all: bool, subscriber: &SubscriberRef, collection_subscriber: &CollectionSubscriberRef) {
        let version = self.version.get();
        let stale = |slot: &Slot| all || slot.version != version;
        let mut removed = Vec::new();
        {
            let mut inline = self.inline.borrow_mut();
            for entry in inline.iter_mut() {
                if entry.as_ref().is_some_and(&stale) {
                    if let Some(slot) = entry.take() {
                        removed.push(slot);
                    }
                }
            }
            let mut overflow = self.overflow.borrow_mut();
            let mut kept = Vec::with_capacity(overflow.len());
            for slot in overflow.drain(..) {
                if stale(&slot) {
                    removed.push(slot);
                } else {
                    kept.push(slot);
                }
            }
            *overflow = kept;
        }
        for slot in removed {
            match slot.observed {
                Observed::Property(observer) => observer.unsubscribe(subscriber),
                Observed::Collection(observer) => observer.unsubscribe_collection(collection_subscriber),
            }
        }
    }
}

enum SlotIndex {
    Inline(usize),
    Overflow(usize),
}

impl std::fmt::Debug for ObserverSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSlots")
            .field("version", &self.version.get())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_map::IndexMap;
    use crate::lifecycle::Lifecycle;
    use crate::observer::{DirtyCheckSettings, DirtyChecker, ObserverLocator};
    use crate::subscriber::{CollectionSubscriber, Subscriber};
    use crate::value::ObjectRef;

    struct Sink;

    impl Subscriber for Sink {
        fn handle_change(&self, _: &Value, _: &Value, _: LifecycleFlags) {}
    }

    impl CollectionSubscriber for Sink {
        fn handle_collection_change(&self, _: &IndexMap, _: LifecycleFlags) {}
    }

    fn observers(n: usize) -> (Rc<ObserverLocator>, ObjectRef, Vec<ObserverRef>) {
        let locator = ObserverLocator::new(
            Lifecycle::new(),
            DirtyChecker::with_settings(DirtyCheckSettings::DEFAULT.with_warn(false)),
        );
        let obj = ObjectRef::new();
        let list = (0..n)
            .map(|i| {
                locator
                    .get_observer(LifecycleFlags::NONE, &Value::Object(obj.clone()), &format!("p{i}"))
                    .unwrap()
            })
            .collect();
        (locator, obj, list)
    }

    #[test]
    fn test_stale_observers_are_pruned() {
        let (_locator, _obj, list) = observers(5);
        let sink = Rc::new(Sink);
        let sub = Rc::downgrade(&sink) as SubscriberRef;
        let csub = Rc::downgrade(&sink) as CollectionSubscriberRef;
        let slots = ObserverSlots::new();

        slots.bump_version();
        for o in &list {
            slots.add_observer(o.clone(), &sub);
        }
        assert_eq!(slots.len(), 5);
        assert!(list.iter().all(|o| o.subscriber_count() == 1));

        slots.bump_version();
        slots.add_observer(list[0].clone(), &sub);
        slots.add_observer(list[4].clone(), &sub);
        slots.unobserve(false, &sub, &csub);

        assert_eq!(slots.len(), 2);
        assert!(slots.contains(&list[0]));
        assert!(slots.contains(&list[4]));
        assert_eq!(list[2].subscriber_count(), 0);
        assert_eq!(list[4].subscriber_count(), 1);
    }

    #[test]
    fn test_unobserve_all() {
        let (_locator, _obj, list) = observers(2);
        let sink = Rc::new(Sink);
        let sub = Rc::downgrade(&sink) as SubscriberRef;
        let csub = Rc::downgrade(&sink) as CollectionSubscriberRef;
        let slots = ObserverSlots::new();
        slots.add_observer(list[0].clone(), &sub);
        slots.add_observer(list[0].clone(), &sub);
        slots.add_observer(list[1].clone(), &sub);
        assert_eq!(list[0].subscriber_count(), 1);
        slots.unobserve(true, &sub, &csub);
        assert!(slots.is_empty());
        assert_eq!(list[0].subscriber_count(), 0);
    }
}
