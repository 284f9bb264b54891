use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::{
    AccessorRef, CollectionObserver, DirtyChecker, GetterObserver, ObserverRef, PrimitiveObserver,
    PropertyAccessor, SetterObserver,
};
use crate::collection::{ArrayRef, CollectionRef, MapRef, SetRef};
use crate::error::Result;
use crate::flags::LifecycleFlags;
use crate::lifecycle::Lifecycle;
use crate::value::{AccessorDescriptor, ObjectRef, PropertyDescriptor, Value};

/// Observation for host-specific targets (elements, attributes) that the
/// generic strategies do not understand.
pub trait TargetObserverLocator {
    /// Whether this locator is responsible for `obj`.
    fn handles(&self, obj: &Value) -> bool;

    /// An observer for `name` on `obj`, or `None` to fall back to the
    /// generic strategies.
    fn get_observer(
        &self,
        flags: LifecycleFlags,
        locator: &ObserverLocator,
        obj: &Value,
        name: &str,
    ) -> Option<ObserverRef>;

    /// An accessor for `name` on `obj`, or `None` to fall back.
    fn get_accessor(
        &self,
        flags: LifecycleFlags,
        locator: &ObserverLocator,
        obj: &Value,
        name: &str,
    ) -> Option<AccessorRef>;
}

/// Supplies observers for accessor properties, taking precedence over
/// computed observation.
pub trait ObjectObservationAdapter {
    /// An observer for the accessor, or `None` if this adapter does not
    /// apply.
    fn get_observer(
        &self,
        flags: LifecycleFlags,
        obj: &ObjectRef,
        name: &str,
        descriptor: &AccessorDescriptor,
    ) -> Option<ObserverRef>;
}

/// Picks and caches the right observer for a target.
///
/// Resolution order for [`get_observer`](Self::get_observer):
///
/// 1. primitives get a [`PrimitiveObserver`];
/// 2. targets claimed by the [`TargetObserverLocator`] are delegated to it;
/// 3. `length` of arrays and `size` of maps and sets get the collection's
///    length observer;
/// 4. accessor properties go to the first [`ObjectObservationAdapter`] that
///    accepts them, else to computed observation, else (non-configurable)
///    to dirty checking;
/// 5. everything else gets a [`SetterObserver`].
///
/// Observers for object properties are memoized on the object, so every
/// caller observing the same property shares one observer.
pub struct ObserverLocator {
    this: Weak<ObserverLocator>,
    lifecycle: Rc<Lifecycle>,
    dirty_checker: Rc<DirtyChecker>,
    target_locator: RefCell<Option<Rc<dyn TargetObserverLocator>>>,
    adapters: RefCell<Vec<Rc<dyn ObjectObservationAdapter>>>,
}

impl ObserverLocator {
    /// Create a locator.
    pub fn new(lifecycle: Rc<Lifecycle>, dirty_checker: Rc<DirtyChecker>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            lifecycle,
            dirty_checker,
            target_locator: RefCell::new(None),
            adapters: RefCell::new(Vec::new()),
        })
    }

    /// The lifecycle collection observers flush through.
    pub fn lifecycle(&self) -> &Rc<Lifecycle> {
        &self.lifecycle
    }

    /// The dirty checker used as the last-resort strategy.
    pub fn dirty_checker(&self) -> &Rc<DirtyChecker> {
        &self.dirty_checker
    }

    /// Install the host-specific target locator.
    pub fn set_target_locator(&self, locator: Rc<dyn TargetObserverLocator>) {
        *self.target_locator.borrow_mut() = Some(locator);
    }

    /// Register an adapter for accessor properties.
    pub fn add_adapter(&self, adapter: Rc<dyn ObjectObservationAdapter>) {
        self.adapters.borrow_mut().push(adapter);
    }

    fn target_locator_for(&self, obj: &Value) -> Option<Rc<dyn TargetObserverLocator>> {
        self.target_locator
            .borrow()
            .as_ref()
            .filter(|locator| locator.handles(obj))
            .cloned()
    }

    /// The observer for `name` on `obj`.
    ///
    /// Fails only when dirty checking would be required and is configured
    /// to refuse.
    #[tracing::instrument(level = "trace", target = "trellis_core::observation", skip(self, obj), fields(tag = ?obj.tag()))]
    pub fn get_observer(&self, flags: LifecycleFlags, obj: &Value, name: &str) -> Result<ObserverRef> {
        if !obj.is_object_like() {
            return Ok(Rc::new(PrimitiveObserver::new(obj.clone(), name)));
        }

        if let Some(target_locator) = self.target_locator_for(obj) {
            if let Some(observer) = target_locator.get_observer(flags, self, obj, name) {
                return Ok(observer);
            }
        }

        match obj {
            Value::Object(o) => {
                if let Some(cached) = o.cached_observer(name) {
                    return Ok(cached);
                }
                let observer = self.create_property_observer(flags, o, name)?;
                o.cache_observer(name, observer.clone());
                Ok(observer)
            }
            Value::Array(a) if name == "length" => Ok(self.get_array_observer(a).length_observer()),
            Value::Map(m) if name == "size" => Ok(self.get_map_observer(m).length_observer()),
            Value::Set(s) if name == "size" => Ok(self.get_set_observer(s).length_observer()),
            _ => Ok(Rc::new(PrimitiveObserver::new(obj.clone(), name))),
        }
    }

    fn create_property_observer(&self, flags: LifecycleFlags, obj: &ObjectRef, name: &str) -> Result<ObserverRef> {
        let Some(PropertyDescriptor::Accessor(descriptor)) = obj.descriptor(name) else {
            return Ok(SetterObserver::new(obj, name));
        };

        let adapters = self.adapters.borrow().clone();
        for adapter in adapters {
            if let Some(observer) = adapter.get_observer(flags, obj, name, &descriptor) {
                return Ok(observer);
            }
        }
        self.create_computed_observer(obj, name, descriptor)
    }

    fn create_computed_observer(
        &self,
        obj: &ObjectRef,
        name: &str,
        descriptor: Rc<AccessorDescriptor>,
    ) -> Result<ObserverRef> {
        if !descriptor.configurable {
            let property = self.dirty_checker.create_property(obj, name)?;
            return Ok(property);
        }
        let overrides = descriptor.computed.unwrap_or_default();
        if descriptor.get.is_none() || (descriptor.set.is_some() && !overrides.volatile) {
            return Ok(SetterObserver::new(obj, name));
        }
        Ok(GetterObserver::new(
            self.this.clone(),
            obj,
            name,
            descriptor,
            overrides,
        ))
    }

    /// A plain accessor for `name` on `obj`, without observation.
    pub fn get_accessor(&self, flags: LifecycleFlags, obj: &Value, name: &str) -> AccessorRef {
        if let Some(target_locator) = self.target_locator_for(obj) {
            if let Some(accessor) = target_locator.get_accessor(flags, self, obj, name) {
                return accessor;
            }
        }
        match obj {
            Value::Object(o) => Rc::new(PropertyAccessor::new(o.clone(), name)),
            Value::Array(a) if name == "length" => self.get_array_observer(a).length_observer(),
            Value::Map(m) if name == "size" => self.get_map_observer(m).length_observer(),
            Value::Set(s) if name == "size" => self.get_set_observer(s).length_observer(),
            _ => Rc::new(PrimitiveObserver::new(obj.clone(), name)),
        }
    }

    /// The observer of an array.
    pub fn get_array_observer(&self, array: &ArrayRef) -> Rc<CollectionObserver> {
        CollectionObserver::for_collection(&self.lifecycle, &CollectionRef::Array(array.clone()))
    }

    /// The observer of a map.
    pub fn get_map_observer(&self, map: &MapRef) -> Rc<CollectionObserver> {
        CollectionObserver::for_collection(&self.lifecycle, &CollectionRef::Map(map.clone()))
    }

    /// The observer of a set.
    pub fn get_set_observer(&self, set: &SetRef) -> Rc<CollectionObserver> {
        CollectionObserver::for_collection(&self.lifecycle, &CollectionRef::Set(set.clone()))
    }

    /// The observer of any collection.
    pub fn get_collection_observer(&self, collection: &CollectionRef) -> Rc<CollectionObserver> {
        CollectionObserver::for_collection(&self.lifecycle, collection)
    }
}

impl std::fmt::Debug for ObserverLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverLocator")
            .field("target_locator", &self.target_locator.borrow().is_some())
            .field("adapters", &self.adapters.borrow().len())
            .finish()
    }
}
