//! Polling fallback for properties that cannot be observed otherwise.
//!
//! The host calls [`DirtyChecker::tick`] once per animation frame; every
//! `frames_per_check` ticks, each tracked property compares its cached value
//! with the live one and notifies on a difference. This costs time
//! proportional to the number of tracked properties on every check, so its
//! activation is reported (or refused) according to [`DirtyCheckSettings`].

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use parking_lot::RwLock;

use super::{Accessor, ObserverKind, PropertyObserver};
use crate::error::{Error, Result};
use crate::flags::LifecycleFlags;
use crate::logging::PerfSpan;
use crate::subscriber::{Subscriber, SubscriberRef, SubscriberSet};
use crate::value::{ObjectRef, Value, WeakObjectRef};

/// Dirty-checking behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyCheckSettings {
    /// Poll once every this many ticks.
    pub frames_per_check: u32,
    /// Never poll. Properties can still be created but never notify.
    pub disabled: bool,
    /// Log a warning whenever a property falls back to dirty checking.
    pub warn: bool,
    /// Refuse to create dirty-checked properties.
    pub throw: bool,
}

impl DirtyCheckSettings {
    /// Poll every 6th frame, warn on fallback.
    pub const DEFAULT: Self = Self {
        frames_per_check: 6,
        disabled: false,
        warn: true,
        throw: false,
    };

    /// Set the polling interval.
    pub fn with_frames_per_check(mut self, frames: u32) -> Self {
        self.frames_per_check = frames.max(1);
        self
    }

    /// Disable polling.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Warn on fallback.
    pub fn with_warn(mut self, warn: bool) -> Self {
        self.warn = warn;
        self
    }

    /// Refuse fallback.
    pub fn with_throw(mut self, throw: bool) -> Self {
        self.throw = throw;
        self
    }

    /// The process-wide defaults used by [`DirtyChecker::new`].
    pub fn global() -> Self {
        *GLOBAL_SETTINGS.read()
    }

    /// Replace the process-wide defaults.
    pub fn set_global(settings: Self) {
        *GLOBAL_SETTINGS.write() = settings;
    }

    /// Restore the built-in process-wide defaults.
    pub fn reset_global() {
        Self::set_global(Self::DEFAULT);
    }
}

impl Default for DirtyCheckSettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

static GLOBAL_SETTINGS: RwLock<DirtyCheckSettings> = RwLock::new(DirtyCheckSettings::DEFAULT);

/// Polls [`DirtyCheckProperty`]s.
pub struct DirtyChecker {
    this: Weak<DirtyChecker>,
    settings: Cell<DirtyCheckSettings>,
    tracked: RefCell<Vec<Weak<DirtyCheckProperty>>>,
    elapsed_frames: Cell<u32>,
}

impl DirtyChecker {
    /// A checker using the process-wide default settings.
    pub fn new() -> Rc<Self> {
        Self::with_settings(DirtyCheckSettings::global())
    }

    /// A checker with explicit settings.
    pub fn with_settings(settings: DirtyCheckSettings) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            settings: Cell::new(settings),
            tracked: RefCell::new(Vec::new()),
            elapsed_frames: Cell::new(0),
        })
    }

    /// Current settings.
    pub fn settings(&self) -> DirtyCheckSettings {
        self.settings.get()
    }

    /// Change settings at runtime.
    pub fn set_settings(&self, settings: DirtyCheckSettings) {
        self.settings.set(settings);
    }

    /// Create a dirty-checked property observer, honoring `warn`/`throw`.
    pub fn create_property(&self, obj: &ObjectRef, name: &str) -> Result<Rc<DirtyCheckProperty>> {
        let settings = self.settings.get();
        if settings.throw {
            return Err(Error::DirtyCheckRefused {
                property: name.to_string(),
            });
        }
        if settings.warn {
            tracing::warn!(target: "trellis_core::dirty_check", property = name, "property cannot be observed efficiently; falling back to dirty checking");
        }
        Ok(DirtyCheckProperty::new(self.this.clone(), obj, name))
    }

    /// Number of properties currently polled.
    pub fn tracked_count(&self) -> usize {
        self.tracked.borrow().iter().filter(|p| p.strong_count() > 0).count()
    }

    fn add_property(&self, property: Weak<DirtyCheckProperty>) {
        self.tracked.borrow_mut().push(property);
    }

    fn remove_property(&self, property: &Weak<DirtyCheckProperty>) {
        self.tracked.borrow_mut().retain(|p| !Weak::ptr_eq(p, property));
    }

    /// Advance one frame. Every `frames_per_check` frames, poll all tracked
    /// properties.
    ///
    /// Returns the number of properties that were found changed.
    pub fn tick(&self) -> usize {
        let settings = self.settings.get();
        if settings.disabled || self.tracked.borrow().is_empty() {
            return 0;
        }
        let frames = self.elapsed_frames.get() + 1;
        if frames < settings.frames_per_check {
            self.elapsed_frames.set(frames);
            return 0;
        }
        self.elapsed_frames.set(0);
        self.check()
    }

    /// Poll every tracked property now.
    pub fn check(&self) -> usize {
        let _span = PerfSpan::new(crate::logging::span_names::DIRTY_CHECK);
        let properties: Vec<Rc<DirtyCheckProperty>> = {
            let mut tracked = self.tracked.borrow_mut();
            tracked.retain(|p| p.strong_count() > 0);
            tracked.iter().filter_map(Weak::upgrade).collect()
        };
        let mut changed = 0;
        for property in properties {
            if property.is_dirty() {
                property.flush(LifecycleFlags::FROM_TICK);
                changed += 1;
            }
        }
        if changed > 0 {
            tracing::trace!(target: "trellis_core::dirty_check", changed, "dirty check found changes");
        }
        changed
    }
}

impl std::fmt::Debug for DirtyChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirtyChecker")
            .field("settings", &self.settings.get())
            .field("tracked", &self.tracked_count())
            .finish()
    }
}

/// A property observed by polling.
pub struct DirtyCheckProperty {
    this: Weak<DirtyCheckProperty>,
    checker: Weak<DirtyChecker>,
    obj: WeakObjectRef,
    name: Rc<str>,
    old_value: RefCell<Value>,
    subscribers: RefCell<SubscriberSet<dyn Subscriber>>,
}

impl DirtyCheckProperty {
    fn new(checker: Weak<DirtyChecker>, obj: &ObjectRef, name: &str) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            checker,
            obj: obj.downgrade(),
            name: Rc::from(name),
            old_value: RefCell::new(Value::Undefined),
            subscribers: RefCell::new(SubscriberSet::new()),
        })
    }

    fn live_value(&self) -> Value {
        self.obj
            .upgrade()
            .map_or(Value::Undefined, |obj| obj.get(&self.name))
    }

    /// Whether the live value differs from the last seen one.
    pub fn is_dirty(&self) -> bool {
        !self.old_value.borrow().same_value(&self.live_value())
    }

    /// Notify subscribers of the current value and remember it.
    pub fn flush(&self, flags: LifecycleFlags) {
        let new_value = self.live_value();
        let previous = self.old_value.replace(new_value.clone());
        let subscribers = self.subscribers.borrow().snapshot();
        SubscriberSet::notify(
            subscribers,
            &new_value,
            &previous,
            flags | LifecycleFlags::UPDATE_TARGET_INSTANCE,
        );
    }
}

impl Accessor for DirtyCheckProperty {
    fn get_value(&self) -> Value {
        self.live_value()
    }

    fn set_value(&self, value: Value, flags: LifecycleFlags) {
        if let Some(obj) = self.obj.upgrade() {
            obj.set_with_flags(&self.name, value, flags);
        }
    }
}

impl PropertyObserver for DirtyCheckProperty {
    fn subscribe(&self, subscriber: SubscriberRef) {
        let first = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.prune();
            let was_empty = subscribers.is_empty();
            subscribers.add(subscriber) && was_empty
        };
        if first {
            *self.old_value.borrow_mut() = self.live_value();
            if let Some(checker) = self.checker.upgrade() {
                checker.add_property(self.this.clone());
            }
        }
    }

    fn unsubscribe(&self, subscriber: &SubscriberRef) {
        let now_empty = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.remove(subscriber) && subscribers.is_empty()
        };
        if now_empty {
            if let Some(checker) = self.checker.upgrade() {
                checker.remove_property(&self.this);
            }
        }
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    fn observer_kind(&self) -> ObserverKind {
        ObserverKind::DirtyCheck
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::AccessorDescriptor;

    #[derive(Default)]
    struct Recorder(RefCell<Vec<Value>>);

    impl Subscriber for Recorder {
        fn handle_change(&self, new_value: &Value, _previous: &Value, _flags: LifecycleFlags) {
            self.0.borrow_mut().push(new_value.clone());
        }
    }

    fn sealed_counter(obj: &ObjectRef) {
        obj.set("hidden", 0);
        obj.define_accessor(
            "count",
            AccessorDescriptor::getter(|o| o.get("hidden")).non_configurable(),
        );
    }

    #[test]
    fn test_polls_every_nth_frame() {
        let checker = DirtyChecker::with_settings(DirtyCheckSettings::DEFAULT.with_warn(false).with_frames_per_check(3));
        let obj = ObjectRef::new();
        sealed_counter(&obj);
        let property = checker.create_property(&obj, "count").unwrap();
        let recorder = Rc::new(Recorder::default());
        property.subscribe(Rc::downgrade(&recorder) as SubscriberRef);
        assert_eq!(checker.tracked_count(), 1);

        obj.set("hidden", 5);
        assert_eq!(checker.tick(), 0);
        assert_eq!(checker.tick(), 0);
        assert_eq!(checker.tick(), 1);
        assert_eq!(*recorder.0.borrow(), vec![Value::from(5)]);
        assert_eq!(checker.check(), 0);
    }

    #[test]
    fn test_disabled_never_polls() {
        let checker = DirtyChecker::with_settings(
            DirtyCheckSettings::DEFAULT.with_warn(false).with_disabled(true).with_frames_per_check(1),
        );
        let obj = ObjectRef::new();
        sealed_counter(&obj);
        let property = checker.create_property(&obj, "count").unwrap();
        let recorder = Rc::new(Recorder::default());
        property.subscribe(Rc::downgrade(&recorder) as SubscriberRef);
        obj.set("hidden", 1);
        assert_eq!(checker.tick(), 0);
        assert!(recorder.0.borrow().is_empty());
    }

    #[test]
    fn test_throw_refuses() {
        let checker = DirtyChecker::with_settings(DirtyCheckSettings::DEFAULT.with_throw(true));
        let result = checker.create_property(&ObjectRef::new(), "x");
        assert!(matches!(result, Err(Error::DirtyCheckRefused { .. })));
    }

    #[test]
    fn test_unsubscribe_stops_tracking() {
        let checker = DirtyChecker::with_settings(DirtyCheckSettings::DEFAULT.with_warn(false));
        let obj = ObjectRef::new();
        let property = checker.create_property(&obj, "x").unwrap();
        let recorder = Rc::new(Recorder::default());
        let weak = Rc::downgrade(&recorder) as SubscriberRef;
        property.subscribe(weak.clone());
        property.unsubscribe(&weak);
        assert_eq!(checker.tracked_count(), 0);
    }

    #[test]
    fn test_global_settings_round_trip() {
        let custom = DirtyCheckSettings::DEFAULT.with_frames_per_check(2);
        DirtyCheckSettings::set_global(custom);
        assert_eq!(DirtyChecker::new().settings().frames_per_check, 2);
        DirtyCheckSettings::reset_global();
        assert_eq!(DirtyCheckSettings::global(), DirtyCheckSettings::DEFAULT);
    }
}
