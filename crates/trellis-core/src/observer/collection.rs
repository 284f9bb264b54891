use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::{Accessor, ObserverKind, PropertyObserver};
use crate::collection::{CollectionKind, CollectionRef, WeakCollectionRef};
use crate::flags::LifecycleFlags;
use crate::index_map::IndexMap;
use crate::lifecycle::{Lifecycle, LifecycleNode, NodeSlot};
use crate::subscriber::{
    CollectionSubscriber, CollectionSubscriberRef, Subscriber, SubscriberRef, SubscriberSet,
};
use crate::value::Value;

/// Observes mutations of an array, map or set.
///
/// Mutations are recorded into an [`IndexMap`] and delivered to subscribers
/// in one batch when the lifecycle flushes. One observer exists per
/// collection; it is attached to the collection on creation.
pub struct CollectionObserver {
    this: Weak<CollectionObserver>,
    collection: WeakCollectionRef,
    kind: CollectionKind,
    lifecycle: Rc<Lifecycle>,
    node: NodeSlot,
    index_map: RefCell<IndexMap>,
    subscribers: RefCell<SubscriberSet<dyn CollectionSubscriber>>,
    length_observer: RefCell<Option<Rc<CollectionLengthObserver>>>,
}

impl CollectionObserver {
    /// The observer of `collection`, creating and attaching it if needed.
    pub fn for_collection(lifecycle: &Rc<Lifecycle>, collection: &CollectionRef) -> Rc<Self> {
        if let Some(existing) = collection.observer() {
            return existing;
        }
        let observer = Rc::new_cyclic(|this| Self {
            this: this.clone(),
            collection: collection.downgrade(),
            kind: collection.kind(),
            lifecycle: lifecycle.clone(),
            node: NodeSlot::new(),
            index_map: RefCell::new(IndexMap::identity(collection.len_untracked())),
            subscribers: RefCell::new(SubscriberSet::new()),
            length_observer: RefCell::new(None),
        });
        collection.attach_observer(observer.clone());
        tracing::trace!(target: "trellis_core::observation", kind = ?observer.kind, "collection observer attached");
        observer
    }

    /// The kind of collection observed.
    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    /// The observed collection, if still alive.
    pub fn collection(&self) -> Option<CollectionRef> {
        self.collection.upgrade()
    }

    /// A copy of the pending index map.
    pub fn index_map(&self) -> IndexMap {
        self.index_map.borrow().clone()
    }

    /// Add a subscriber.
    pub fn subscribe_collection(&self, subscriber: CollectionSubscriberRef) {
        self.subscribers.borrow_mut().add(subscriber);
    }

    /// Remove a subscriber.
    pub fn unsubscribe_collection(&self, subscriber: &CollectionSubscriberRef) {
        self.subscribers.borrow_mut().remove(subscriber);
    }

    /// Number of live subscribers.
    pub fn collection_subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// The observer of the collection's `length` (arrays) or `size`.
    pub fn length_observer(&self) -> Rc<CollectionLengthObserver> {
        let mut slot = self.length_observer.borrow_mut();
        slot.get_or_insert_with(|| {
            let len = self
                .collection
                .upgrade()
                .map_or(0, |c| c.len_untracked());
            Rc::new(CollectionLengthObserver::new(self.collection.clone(), len))
        })
        .clone()
    }

    /// Record a mutation and schedule a flush.
    pub(crate) fn record_mutation(&self, mutation: impl FnOnce(&mut IndexMap)) {
        mutation(&mut self.index_map.borrow_mut());
        let this = self.this.clone();
        let id = self
            .node
            .get_or_register(&self.lifecycle, || this as Weak<dyn LifecycleNode>);
        self.lifecycle.enqueue_flush(id);
    }
}

impl LifecycleNode for CollectionObserver {
    fn flush(&self, flags: LifecycleFlags) {
        let len = self.collection.upgrade().map_or(0, |c| c.len_untracked());
        let index_map = self.index_map.replace(IndexMap::identity(len));
        tracing::trace!(
            target: "trellis_core::observation",
            kind = ?self.kind,
            len,
            deleted = index_map.deleted().len(),
            "flushing collection changes"
        );

        let subscribers = self.subscribers.borrow().snapshot();
        let flags = flags | LifecycleFlags::IS_COLLECTION_MUTATION;
        for subscriber in subscribers {
            subscriber.handle_collection_change(&index_map, flags);
        }

        let length_observer = self.length_observer.borrow().clone();
        if let Some(length_observer) = length_observer {
            length_observer.refresh(len, flags);
        }
    }
}

impl Drop for CollectionObserver {
    fn drop(&mut self) {
        self.node.release(&self.lifecycle);
    }
}

/// Observes the `length` of an array or the `size` of a map or set.
pub struct CollectionLengthObserver {
    collection: WeakCollectionRef,
    current: Cell<usize>,
    subscribers: RefCell<SubscriberSet<dyn Subscriber>>,
}

impl CollectionLengthObserver {
    fn new(collection: WeakCollectionRef, len: usize) -> Self {
        Self {
            collection,
            current: Cell::new(len),
            subscribers: RefCell::new(SubscriberSet::new()),
        }
    }

    fn refresh(&self, len: usize, flags: LifecycleFlags) {
        let previous = self.current.replace(len);
        if previous != len {
            let subscribers = self.subscribers.borrow().snapshot();
            SubscriberSet::notify(
                subscribers,
                &Value::from(len),
                &Value::from(previous),
                flags | LifecycleFlags::UPDATE_TARGET_INSTANCE,
            );
        }
    }
}

impl Accessor for CollectionLengthObserver {
    fn get_value(&self) -> Value {
        match self.collection.upgrade() {
            Some(CollectionRef::Array(a)) => Value::from(a.len()),
            Some(CollectionRef::Map(m)) => Value::from(m.size()),
            Some(CollectionRef::Set(s)) => Value::from(s.size()),
            None => Value::Undefined,
        }
    }

    fn set_value(&self, value: Value, _flags: LifecycleFlags) {
        // Only array length is writable.
        if let Some(CollectionRef::Array(array)) = self.collection.upgrade() {
            let len = value.to_number();
            if len.is_finite() && len >= 0.0 {
                if let Err(error) = array.set_len(len as usize) {
                    tracing::warn!(target: "trellis_core::observation", %error, "ignoring array length write");
                }
            }
        }
    }
}

impl PropertyObserver for CollectionLengthObserver {
    fn subscribe(&self, subscriber: SubscriberRef) {
        self.subscribers.borrow_mut().add(subscriber);
    }

    fn unsubscribe(&self, subscriber: &SubscriberRef) {
        self.subscribers.borrow_mut().remove(subscriber);
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    fn observer_kind(&self) -> ObserverKind {
        ObserverKind::CollectionLength
    }
}
