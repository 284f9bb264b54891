//! Subscriber traits and subscriber storage.
//!
//! Observers hold their subscribers weakly: a binding that is dropped without
//! unsubscribing simply stops receiving notifications.

use std::rc::{Rc, Weak};

use crate::flags::LifecycleFlags;
use crate::index_map::IndexMap;
use crate::value::Value;

/// Receives value-change notifications from a property observer.
pub trait Subscriber {
    /// The observed value changed from `previous_value` to `new_value`.
    fn handle_change(&self, new_value: &Value, previous_value: &Value, flags: LifecycleFlags);
}

/// Receives mutation notifications from a collection observer.
pub trait CollectionSubscriber {
    /// The observed collection was mutated; `index_map` maps current items to
    /// their prior indices.
    fn handle_collection_change(&self, index_map: &IndexMap, flags: LifecycleFlags);
}

/// A weak handle to a property subscriber.
pub type SubscriberRef = Weak<dyn Subscriber>;

/// A weak handle to a collection subscriber.
pub type CollectionSubscriberRef = Weak<dyn CollectionSubscriber>;

const INLINE: usize = 3;

/// A set of weakly held subscribers.
///
/// The first three subscribers live in fixed slots and only further ones
/// spill into a vector, since most observers have one or two subscribers.
pub struct SubscriberSet<S: ?Sized> {
    inline: [Option<Weak<S>>; INLINE],
    overflow: Vec<Weak<S>>,
}

impl<S: ?Sized> Default for SubscriberSet<S> {
    fn default() -> Self {
        Self {
            inline: [None, None, None],
            overflow: Vec::new(),
        }
    }
}

impl<S: ?Sized> SubscriberSet<S> {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Returns `false` if it was already present.
    pub fn add(&mut self, subscriber: Weak<S>) -> bool {
        if self.contains(&subscriber) {
            return false;
        }
        if let Some(slot) = self.inline.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(subscriber);
        } else {
            self.overflow.push(subscriber);
        }
        true
    }

    /// Remove a subscriber. Returns `false` if it was not present.
    pub fn remove(&mut self, subscriber: &Weak<S>) -> bool {
        for slot in &mut self.inline {
            if slot.as_ref().is_some_and(|s| Weak::ptr_eq(s, subscriber)) {
                *slot = None;
                return true;
            }
        }
        let before = self.overflow.len();
        self.overflow.retain(|s| !Weak::ptr_eq(s, subscriber));
        self.overflow.len() != before
    }

    /// Whether the subscriber is present.
    pub fn contains(&self, subscriber: &Weak<S>) -> bool {
        self.iter().any(|s| Weak::ptr_eq(s, subscriber))
    }

    /// Number of subscribers that are still alive.
    pub fn len(&self) -> usize {
        self.iter().filter(|s| s.strong_count() > 0).count()
    }

    /// Whether no live subscriber remains.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries whose subscriber no longer exists.
    pub fn prune(&mut self) {
        for slot in &mut self.inline {
            if slot.as_ref().is_some_and(|s| s.strong_count() == 0) {
                *slot = None;
            }
        }
        self.overflow.retain(|s| s.strong_count() > 0);
    }

    /// Strong handles to every live subscriber.
    ///
    /// Notification iterates a snapshot, so subscribers may add or remove
    /// subscriptions from inside their callbacks.
    pub fn snapshot(&self) -> Vec<Rc<S>> {
        self.iter().filter_map(Weak::upgrade).collect()
    }

    fn iter(&self) -> impl Iterator<Item = &Weak<S>> {
        self.inline.iter().flatten().chain(self.overflow.iter())
    }
}

impl SubscriberSet<dyn Subscriber> {
    /// Notify every subscriber of a value change.
    pub fn notify(subscribers: Vec<Rc<dyn Subscriber>>, new_value: &Value, previous_value: &Value, flags: LifecycleFlags) {
        for subscriber in subscribers {
            subscriber.handle_change(new_value, previous_value, flags);
        }
    }
}

impl<S: ?Sized> std::fmt::Debug for SubscriberSet<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSet").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counter(Cell<usize>);

    impl Subscriber for Counter {
        fn handle_change(&self, _: &Value, _: &Value, _: LifecycleFlags) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn counter() -> Rc<Counter> {
        Rc::new(Counter(Cell::new(0)))
    }

    fn weak(p: &Rc<Counter>) -> SubscriberRef {
        Rc::downgrade(p) as SubscriberRef
    }

    #[test]
    fn test_add_is_idempotent() {
        let p = counter();
        let mut set: SubscriberSet<dyn Subscriber> = SubscriberSet::new();
        assert!(set.add(weak(&p)));
        assert!(!set.add(weak(&p)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_overflow_and_remove() {
        let counters: Vec<_> = (0..5).map(|_| counter()).collect();
        let mut set: SubscriberSet<dyn Subscriber> = SubscriberSet::new();
        for p in &counters {
            set.add(weak(p));
        }
        assert_eq!(set.len(), 5);
        assert!(set.remove(&weak(&counters[1])));
        assert!(set.remove(&weak(&counters[4])));
        assert!(!set.remove(&weak(&counters[4])));
        assert_eq!(set.len(), 3);

        SubscriberSet::notify(set.snapshot(), &Value::Null, &Value::Undefined, LifecycleFlags::NONE);
        let counts: Vec<_> = counters.iter().map(|p| p.0.get()).collect();
        assert_eq!(counts, vec![1, 0, 1, 1, 0]);
    }

    #[test]
    fn test_dead_subscribers_are_not_counted() {
        let mut set: SubscriberSet<dyn Subscriber> = SubscriberSet::new();
        {
            let p = counter();
            set.add(weak(&p));
        }
        assert!(set.is_empty());
        set.prune();
        assert!(set.snapshot().is_empty());
    }
}
