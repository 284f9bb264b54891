//! Core systems for Trellis.
//!
//! This crate provides the observation and scheduling layer that Trellis
//! bindings are built on:
//!
//! - **Values**: dynamically typed [`Value`]s, shared [`ObjectRef`]s and
//!   observable collections ([`ArrayRef`], [`MapRef`], [`SetRef`])
//! - **Observers**: per-property and per-collection change notification,
//!   chosen by the [`ObserverLocator`]
//! - **Computed properties**: getters whose dependencies are discovered by
//!   tracking the reads they perform
//! - **Dirty checking**: a polling fallback for properties that cannot be
//!   observed otherwise
//! - **Lifecycle**: batched bind/attach/detach/unbind queues, awaitable
//!   tasks and minimal-move reordering
//! - **Signals**: named re-evaluation triggers
//!
//! Everything here is single-threaded: values are `Rc`-based and observers
//! are notified synchronously on the thread that made the change.
//!
//! # Observation Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use trellis_core::{
//!     DirtyChecker, Lifecycle, LifecycleFlags, ObjectRef, ObserverLocator, Subscriber,
//!     SubscriberRef, Value,
//! };
//!
//! struct Log(RefCell<Vec<String>>);
//!
//! impl Subscriber for Log {
//!     fn handle_change(&self, new_value: &Value, _previous: &Value, _flags: LifecycleFlags) {
//!         self.0.borrow_mut().push(new_value.to_display_string());
//!     }
//! }
//!
//! let locator = ObserverLocator::new(Lifecycle::new(), DirtyChecker::new());
//! let person = ObjectRef::from_pairs([("name", "Ada")]);
//! let observer = locator
//!     .get_observer(LifecycleFlags::NONE, &Value::Object(person.clone()), "name")
//!     .unwrap();
//!
//! let log = Rc::new(Log(RefCell::new(Vec::new())));
//! observer.subscribe(Rc::downgrade(&log) as SubscriberRef);
//!
//! person.set("name", "Grace");
//! assert_eq!(*log.0.borrow(), vec!["Grace".to_string()]);
//! ```
//!
//! # Collection Example
//!
//! ```
//! use trellis_core::{ArrayRef, DirtyChecker, Lifecycle, ObserverLocator, Value};
//!
//! let lifecycle = Lifecycle::new();
//! let locator = ObserverLocator::new(lifecycle.clone(), DirtyChecker::new());
//! let items = ArrayRef::from(vec![Value::from(1), Value::from(2)]);
//! let observer = locator.get_array_observer(&items);
//!
//! items.push([Value::from(3)]);
//! items.shift();
//! assert_eq!(observer.index_map().entries(), &[1, -2]);
//!
//! // Pending changes are delivered when the flush microtask runs.
//! lifecycle.drain_microtasks();
//! assert_eq!(observer.index_map().entries(), &[0, 1]);
//! ```

pub mod collection;
pub mod connectable;
mod error;
mod flags;
pub mod index_map;
pub mod lifecycle;
pub mod logging;
pub mod observer;
pub mod signaler;
pub mod subscriber;
pub mod tracking;
pub mod value;

pub use collection::{ArrayRef, CollectionKind, CollectionRef, MapRef, SetRef, WeakCollectionRef};
pub use connectable::{Connectable, ObserverSlots};
pub use error::{Error, Result};
pub use flags::LifecycleFlags;
pub use index_map::IndexMap;
pub use lifecycle::{
    Lifecycle, LifecycleConfig, LifecycleNode, LifecycleTask, NodeId, NodeSlot, Phase, QueueKind,
    TaskOutcome, TaskRef,
};
pub use logging::PerfSpan;
pub use observer::{
    Accessor, AccessorRef, CollectionLengthObserver, CollectionObserver, DirtyCheckProperty,
    DirtyCheckSettings, DirtyChecker, GetterObserver, ObjectObservationAdapter, ObserverKind,
    ObserverLocator, ObserverRef, PrimitiveObserver, PropertyAccessor, PropertyObserver,
    SetterObserver, TargetObserverLocator,
};
pub use signaler::Signaler;
pub use subscriber::{
    CollectionSubscriber, CollectionSubscriberRef, Subscriber, SubscriberRef, SubscriberSet,
};
pub use value::{
    AccessorDescriptor, ComputedOverrides, FunctionRef, ObjectRef, PropertyDescriptor,
    PropertyWatcher, Value, ValueTag, WeakObjectRef, format_number,
};
