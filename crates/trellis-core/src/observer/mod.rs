//! Property and collection observers.
//!
//! An observer wraps one `(object, property)` pair, or one collection, and
//! lets subscribers learn about changes. Observers are obtained through the
//! [`ObserverLocator`], which picks the right strategy for the target:
//!
//! | Target | Observer |
//! |--------|----------|
//! | primitive value | [`PrimitiveObserver`] (never notifies) |
//! | plain data property | [`SetterObserver`] |
//! | accessor with setter | [`SetterObserver`] over the accessor |
//! | getter-only accessor | [`GetterObserver`] (computed) |
//! | non-configurable accessor | [`DirtyCheckProperty`] |
//! | array / map / set | [`CollectionObserver`] |
//! | `length` / `size` of a collection | [`CollectionLengthObserver`] |

mod collection;
mod computed;
mod dirty_check;
mod locator;
mod property;

use std::rc::Rc;

pub use collection::{CollectionLengthObserver, CollectionObserver};
pub use computed::GetterObserver;
pub use dirty_check::{DirtyCheckProperty, DirtyCheckSettings, DirtyChecker};
pub use locator::{ObjectObservationAdapter, ObserverLocator, TargetObserverLocator};
pub use property::{PrimitiveObserver, PropertyAccessor, SetterObserver};

use crate::flags::LifecycleFlags;
use crate::subscriber::SubscriberRef;
use crate::value::Value;

/// Reads and writes one property of one target.
pub trait Accessor {
    /// Current value.
    fn get_value(&self) -> Value;

    /// Write a new value.
    fn set_value(&self, value: Value, flags: LifecycleFlags);
}

/// The strategy an observer uses, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverKind {
    /// Primitive property; never changes.
    Primitive,
    /// Write interception on a data or accessor property.
    Setter,
    /// Computed getter with dependency tracking.
    Getter,
    /// Periodic polling.
    DirtyCheck,
    /// Length or size of a collection.
    CollectionLength,
    /// Provided by an external locator or adapter.
    Custom,
}

/// An [`Accessor`] that can also notify subscribers of changes.
pub trait PropertyObserver: Accessor {
    /// Add a subscriber. Adding the same subscriber twice has no effect.
    fn subscribe(&self, subscriber: SubscriberRef);

    /// Remove a subscriber.
    fn unsubscribe(&self, subscriber: &SubscriberRef);

    /// Number of live subscribers.
    fn subscriber_count(&self) -> usize;

    /// The observation strategy.
    fn observer_kind(&self) -> ObserverKind {
        ObserverKind::Custom
    }
}

/// A shared property observer.
pub type ObserverRef = Rc<dyn PropertyObserver>;

/// A shared accessor.
pub type AccessorRef = Rc<dyn Accessor>;
