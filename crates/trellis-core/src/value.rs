//! Dynamic values and observable objects.
//!
//! Everything a binding expression can read or write is a [`Value`]. Objects
//! are shared, single-threaded property bags ([`ObjectRef`]); collections live
//! in [`crate::collection`].
//!
//! # Observable properties
//!
//! Plain data properties are stored directly in the object. The first time an
//! observer subscribes to a property, it registers itself as the property's
//! *write watcher*; from then on every [`ObjectRef::set`] on that name is
//! reported to it. Nothing has to be redefined at runtime and unobserved
//! properties pay only for a hash lookup on write.
//!
//! # Example
//!
//! ```
//! use trellis_core::{ObjectRef, Value};
//!
//! let person = ObjectRef::new();
//! person.set("name", Value::from("Ada"));
//! assert_eq!(person.get("name"), Value::from("Ada"));
//! assert_eq!(person.get("missing"), Value::Undefined);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::collection::{ArrayRef, MapRef, SetRef};
use crate::error::Result;
use crate::flags::LifecycleFlags;
use crate::observer::ObserverRef;
use crate::tracking;

/// The runtime type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueTag {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// A boolean.
    Bool,
    /// A number.
    Number,
    /// A string.
    String,
    /// A plain object.
    Object,
    /// An observable array.
    Array,
    /// An observable map.
    Map,
    /// An observable set.
    Set,
    /// A callable function.
    Function,
}

impl ValueTag {
    /// A human readable name for error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Object => "object",
            Self::Array => "array",
            Self::Map => "map",
            Self::Set => "set",
            Self::Function => "function",
        }
    }
}

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    /// The absence of a value.
    #[default]
    Undefined,
    /// An explicit empty value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A double-precision number.
    Number(f64),
    /// An immutable string.
    String(Rc<str>),
    /// A shared object.
    Object(ObjectRef),
    /// A shared observable array.
    Array(ArrayRef),
    /// A shared observable map.
    Map(MapRef),
    /// A shared observable set.
    Set(SetRef),
    /// A callable function.
    Function(FunctionRef),
}

impl Value {
    /// The runtime tag of this value.
    pub fn tag(&self) -> ValueTag {
        match self {
            Self::Undefined => ValueTag::Undefined,
            Self::Null => ValueTag::Null,
            Self::Bool(_) => ValueTag::Bool,
            Self::Number(_) => ValueTag::Number,
            Self::String(_) => ValueTag::String,
            Self::Object(_) => ValueTag::Object,
            Self::Array(_) => ValueTag::Array,
            Self::Map(_) => ValueTag::Map,
            Self::Set(_) => ValueTag::Set,
            Self::Function(_) => ValueTag::Function,
        }
    }

    /// The result of the `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) => "function",
            Self::Null | Self::Object(_) | Self::Array(_) | Self::Map(_) | Self::Set(_) => "object",
        }
    }

    /// Whether this is `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Whether this value can carry properties and observers.
    pub fn is_object_like(&self) -> bool {
        matches!(
            self,
            Self::Object(_) | Self::Array(_) | Self::Map(_) | Self::Set(_) | Self::Function(_)
        )
    }

    /// Truthiness as used by `!`, `&&`, `||` and conditionals.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric conversion.
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Number(n) => *n,
            Self::String(s) => parse_number(s),
            Self::Array(a) => match a.len() {
                0 => 0.0,
                1 => a.get(0).to_number(),
                _ => f64::NAN,
            },
            _ => f64::NAN,
        }
    }

    /// String conversion with `String(value)` semantics.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.to_string(),
            Self::Object(_) => "[object Object]".to_string(),
            Self::Array(a) => a.join(","),
            Self::Map(_) => "[object Map]".to_string(),
            Self::Set(_) => "[object Set]".to_string(),
            Self::Function(f) => format!("function {}() {{ [native code] }}", f.name()),
        }
    }

    /// `Object.is` equality: the comparison used for change detection.
    ///
    /// `NaN` equals itself and `+0` differs from `-0`, so repeated writes of
    /// an unchanged value never produce a notification.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => {
                (a.is_nan() && b.is_nan())
                    || (a == b && a.is_sign_negative() == b.is_sign_negative())
            }
            _ => self.strict_equals(other),
        }
    }

    /// SameValueZero equality used for map keys and set members.
    pub fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => (a.is_nan() && b.is_nan()) || a == b,
            _ => self.strict_equals(other),
        }
    }

    /// The `===` operator.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            (Self::Map(a), Self::Map(b)) => a.ptr_eq(b),
            (Self::Set(a), Self::Set(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// The `==` operator.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.tag() == b.tag() => a.strict_equals(b),
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (Self::Number(n), Self::String(_)) => *n == other.to_number(),
            (Self::String(_), Self::Number(n)) => self.to_number() == *n,
            (Self::Bool(_), _) => Value::Number(self.to_number()).loose_equals(other),
            (_, Self::Bool(_)) => self.loose_equals(&Value::Number(other.to_number())),
            _ => false,
        }
    }

    /// Borrow the object, if this is one.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Borrow the array, if this is one.
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Borrow the function, if this is one.
    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Borrow the string contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The number, if this is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", format_number(*n)),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Object(o) => o.fmt(f),
            Self::Array(a) => a.fmt(f),
            Self::Map(m) => m.fmt(f),
            Self::Set(s) => s.fmt(f),
            Self::Function(func) => func.fmt(f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(Rc::from(value))
    }
}

impl From<Rc<str>> for Value {
    fn from(value: Rc<str>) -> Self {
        Self::String(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Self::Object(value)
    }
}

impl From<ArrayRef> for Value {
    fn from(value: ArrayRef) -> Self {
        Self::Array(value)
    }
}

impl From<MapRef> for Value {
    fn from(value: MapRef) -> Self {
        Self::Map(value)
    }
}

impl From<SetRef> for Value {
    fn from(value: SetRef) -> Self {
        Self::Set(value)
    }
}

impl From<FunctionRef> for Value {
    fn from(value: FunctionRef) -> Self {
        Self::Function(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Array(ArrayRef::from(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Format a number the way `String(n)` does.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim();
    match trimmed {
        "" => 0.0,
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => {
            if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
                return i64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
            }
            // Rust accepts "inf"/"nan" spellings that are not numbers here.
            if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
                return f64::NAN;
            }
            trimmed.parse::<f64>().unwrap_or(f64::NAN)
        }
    }
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

type NativeFn = dyn Fn(&Value, &[Value]) -> Result<Value>;

struct FunctionInner {
    name: Rc<str>,
    func: Box<NativeFn>,
}

/// A callable value.
///
/// The closure receives the `this` value the function was called on (the
/// object owning the method, or `undefined` for free calls) and the
/// evaluated arguments.
#[derive(Clone)]
pub struct FunctionRef(Rc<FunctionInner>);

impl FunctionRef {
    /// Wrap a native closure.
    pub fn new<F>(name: impl Into<Rc<str>>, func: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value> + 'static,
    {
        Self(Rc::new(FunctionInner {
            name: name.into(),
            func: Box::new(func),
        }))
    }

    /// The function's name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Invoke the function.
    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value> {
        (self.0.func)(this, args)
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &FunctionRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.name())
    }
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// Getter closure of an accessor property.
pub type Getter = Rc<dyn Fn(&ObjectRef) -> Value>;
/// Setter closure of an accessor property.
pub type Setter = Rc<dyn Fn(&ObjectRef, Value)>;

/// Declares how a computed (getter) property collects its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComputedOverrides {
    /// Dependencies are collected once, on first subscription, and never again.
    pub is_static: bool,
    /// Dependencies are recollected on every read, and the cached value is
    /// never trusted.
    pub volatile: bool,
}

impl ComputedOverrides {
    /// Dependencies collected once.
    pub const STATIC: Self = Self {
        is_static: true,
        volatile: false,
    };

    /// Dependencies recollected on every access.
    pub const VOLATILE: Self = Self {
        is_static: false,
        volatile: true,
    };
}

/// An accessor property definition.
#[derive(Clone)]
pub struct AccessorDescriptor {
    /// Reads the property.
    pub get: Option<Getter>,
    /// Writes the property.
    pub set: Option<Setter>,
    /// Non-configurable accessors can only be observed by dirty checking.
    pub configurable: bool,
    /// Dependency-collection declaration for computed observation.
    pub computed: Option<ComputedOverrides>,
}

impl AccessorDescriptor {
    /// A getter-only accessor.
    pub fn getter<G>(get: G) -> Self
    where
        G: Fn(&ObjectRef) -> Value + 'static,
    {
        Self {
            get: Some(Rc::new(get)),
            set: None,
            configurable: true,
            computed: None,
        }
    }

    /// Add a setter.
    pub fn with_setter<S>(mut self, set: S) -> Self
    where
        S: Fn(&ObjectRef, Value) + 'static,
    {
        self.set = Some(Rc::new(set));
        self
    }

    /// Declare dependency-collection overrides.
    pub fn with_computed(mut self, computed: ComputedOverrides) -> Self {
        self.computed = Some(computed);
        self
    }

    /// Mark the accessor non-configurable.
    pub fn non_configurable(mut self) -> Self {
        self.configurable = false;
        self
    }

    pub(crate) fn read(&self, obj: &ObjectRef) -> Value {
        self.get.as_ref().map_or(Value::Undefined, |get| get(obj))
    }
}

impl fmt::Debug for AccessorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessorDescriptor")
            .field("get", &self.get.is_some())
            .field("set", &self.set.is_some())
            .field("configurable", &self.configurable)
            .field("computed", &self.computed)
            .finish()
    }
}

/// Storage of one property.
#[derive(Clone)]
enum PropertySlot {
    Data(Value),
    Accessor(Rc<AccessorDescriptor>),
}

/// The shape of a property, as seen by the observer locator.
#[derive(Debug, Clone)]
pub enum PropertyDescriptor {
    /// A plain data property.
    Data,
    /// An accessor property.
    Accessor(Rc<AccessorDescriptor>),
}

/// Receives writes to a watched property.
///
/// Implemented by observers that convert a plain property into an observable
/// one.
pub trait PropertyWatcher {
    /// A write changed the property's value.
    fn property_written(&self, new_value: &Value, previous_value: &Value, flags: LifecycleFlags);
}

#[derive(Default)]
struct ObjectInner {
    properties: RefCell<HashMap<Rc<str>, PropertySlot>>,
    watchers: RefCell<HashMap<Rc<str>, Vec<Weak<dyn PropertyWatcher>>>>,
    observers: RefCell<HashMap<Rc<str>, ObserverRef>>,
}

/// A shared, single-threaded object with named properties.
#[derive(Clone, Default)]
pub struct ObjectRef(Rc<ObjectInner>);

/// A weak handle to an [`ObjectRef`].
#[derive(Clone)]
pub struct WeakObjectRef(Weak<ObjectInner>);

impl WeakObjectRef {
    /// Upgrade to a strong handle if the object is still alive.
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }
}

impl ObjectRef {
    /// Create an empty object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an object from name/value pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<Rc<str>>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let obj = Self::new();
        {
            let mut properties = obj.0.properties.borrow_mut();
            for (key, value) in pairs {
                properties.insert(key.into(), PropertySlot::Data(value.into()));
            }
        }
        obj
    }

    /// Downgrade to a weak handle.
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Rc::downgrade(&self.0))
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// A stable address usable as an identity key for logging.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// Read a property. Missing properties read as `undefined`.
    ///
    /// Reads are recorded by an active dependency tracker.
    pub fn get(&self, name: &str) -> Value {
        tracking::record_property(self, name);
        let slot = self.0.properties.borrow().get(name).cloned();
        match slot {
            Some(PropertySlot::Data(value)) => value,
            Some(PropertySlot::Accessor(descriptor)) => descriptor.read(self),
            None => Value::Undefined,
        }
    }

    /// Whether the object has an own property with this name.
    pub fn has(&self, name: &str) -> bool {
        self.0.properties.borrow().contains_key(name)
    }

    /// Write a property.
    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.set_with_flags(name, value.into(), LifecycleFlags::NONE);
    }

    /// Write a property, forwarding `flags` to the property's watchers.
    pub fn set_with_flags(&self, name: &str, value: Value, flags: LifecycleFlags) {
        let watchers = self.watchers(name);
        let accessor = match self.0.properties.borrow().get(name) {
            Some(PropertySlot::Accessor(descriptor)) => Some(descriptor.clone()),
            _ => None,
        };

        if let Some(descriptor) = accessor {
            let Some(setter) = descriptor.set.clone() else {
                tracing::trace!(target: "trellis_core::observation", property = name, "ignoring write to getter-only property");
                return;
            };
            if watchers.is_empty() {
                setter(self, value);
                return;
            }
            let previous = tracking::untracked(|| descriptor.read(self));
            setter(self, value);
            let current = tracking::untracked(|| descriptor.read(self));
            Self::notify_watchers(&watchers, &current, &previous, flags);
            return;
        }

        let previous = {
            let mut properties = self.0.properties.borrow_mut();
            match properties.get_mut(name) {
                Some(PropertySlot::Data(slot)) => std::mem::replace(slot, value.clone()),
                _ => {
                    properties.insert(Rc::from(name), PropertySlot::Data(value.clone()));
                    Value::Undefined
                }
            }
        };

        Self::notify_watchers(&watchers, &value, &previous, flags);
    }

    /// Remove a property. Returns `true` if it existed.
    ///
    /// Watchers stay registered, so observers of `name` keep reporting once
    /// the property is written again.
    pub fn delete(&self, name: &str) -> bool {
        let previous = tracking::untracked(|| self.get(name));
        let removed = self.0.properties.borrow_mut().remove(name);
        let Some(slot) = removed else {
            return false;
        };
        if matches!(slot, PropertySlot::Accessor(_)) {
            // The cached observer was built for the accessor.
            self.0.observers.borrow_mut().remove(name);
        }
        Self::notify_watchers(&self.watchers(name), &Value::Undefined, &previous, LifecycleFlags::NONE);
        true
    }

    /// Define (or replace) an accessor property.
    ///
    /// The cached observer is dropped since the new shape may need a
    /// different strategy. Existing watchers are told about the value change
    /// so their subscribers can reconnect to the new observer.
    pub fn define_accessor(&self, name: &str, descriptor: AccessorDescriptor) {
        let previous = tracking::untracked(|| self.get(name));
        self.0
            .properties
            .borrow_mut()
            .insert(Rc::from(name), PropertySlot::Accessor(Rc::new(descriptor)));
        self.0.observers.borrow_mut().remove(name);
        let watchers = self.watchers(name);
        if !watchers.is_empty() {
            let current = tracking::untracked(|| self.get(name));
            Self::notify_watchers(&watchers, &current, &previous, LifecycleFlags::NONE);
        }
    }

    /// Describe a property. `None` if the property does not exist.
    pub fn descriptor(&self, name: &str) -> Option<PropertyDescriptor> {
        self.0.properties.borrow().get(name).map(|slot| match slot {
            PropertySlot::Data(_) => PropertyDescriptor::Data,
            PropertySlot::Accessor(descriptor) => PropertyDescriptor::Accessor(descriptor.clone()),
        })
    }

    /// Own property names, sorted for deterministic iteration.
    pub fn keys(&self) -> Vec<Rc<str>> {
        let mut keys: Vec<Rc<str>> = self.0.properties.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Register a watcher that receives writes to `name`.
    ///
    /// A property may have several watchers; registering the same watcher
    /// twice has no effect.
    pub fn watch(&self, name: &str, watcher: Weak<dyn PropertyWatcher>) {
        let mut watchers = self.0.watchers.borrow_mut();
        let list = watchers.entry(Rc::from(name)).or_default();
        list.retain(|w| w.strong_count() > 0);
        if !list.iter().any(|w| Weak::ptr_eq(w, &watcher)) {
            list.push(watcher);
        }
    }

    /// Stop reporting writes to `name` to `watcher`.
    pub fn unwatch(&self, name: &str, watcher: &Weak<dyn PropertyWatcher>) {
        let mut watchers = self.0.watchers.borrow_mut();
        if let Some(list) = watchers.get_mut(name) {
            list.retain(|w| w.strong_count() > 0 && !Weak::ptr_eq(w, watcher));
            if list.is_empty() {
                watchers.remove(name);
            }
        }
    }

    /// Whether writes to `name` are currently reported to any watcher.
    pub fn is_watched(&self, name: &str) -> bool {
        !self.watchers(name).is_empty()
    }

    fn watchers(&self, name: &str) -> Vec<Rc<dyn PropertyWatcher>> {
        self.0
            .watchers
            .borrow()
            .get(name)
            .map(|list| list.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    fn notify_watchers(watchers: &[Rc<dyn PropertyWatcher>], current: &Value, previous: &Value, flags: LifecycleFlags) {
        if current.same_value(previous) {
            return;
        }
        for watcher in watchers {
            watcher.property_written(current, previous, flags);
        }
    }

    pub(crate) fn cached_observer(&self, name: &str) -> Option<ObserverRef> {
        self.0.observers.borrow().get(name).cloned()
    }

    pub(crate) fn cache_observer(&self, name: &str, observer: ObserverRef) {
        self.0.observers.borrow_mut().insert(Rc::from(name), observer);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys = self.keys();
        f.debug_struct("Object")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("keys", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingWatcher {
        writes: Cell<usize>,
        last: RefCell<Value>,
    }

    impl PropertyWatcher for CountingWatcher {
        fn property_written(&self, new_value: &Value, _previous: &Value, _flags: LifecycleFlags) {
            self.writes.set(self.writes.get() + 1);
            *self.last.borrow_mut() = new_value.clone();
        }
    }

    fn watcher() -> Rc<CountingWatcher> {
        Rc::new(CountingWatcher {
            writes: Cell::new(0),
            last: RefCell::new(Value::Undefined),
        })
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::from(ObjectRef::new()).is_truthy());
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(Value::from(" 12 ").to_number(), 12.0);
        assert_eq!(Value::from("").to_number(), 0.0);
        assert!(Value::from("abc").to_number().is_nan());
        assert!(Value::from("inf").to_number().is_nan());
        assert_eq!(Value::from("0x10").to_number(), 16.0);
    }

    #[test]
    fn test_same_value_semantics() {
        assert!(Value::Number(f64::NAN).same_value(&Value::Number(f64::NAN)));
        assert!(!Value::Number(0.0).same_value(&Value::Number(-0.0)));
        assert!(Value::Number(0.0).same_value_zero(&Value::Number(-0.0)));
        assert!(!Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)));
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(Value::from(1).loose_equals(&Value::from("1")));
        assert!(Value::from(true).loose_equals(&Value::from(1)));
        assert!(!Value::from(0).loose_equals(&Value::Null));
    }

    #[test]
    fn test_object_get_set() {
        let obj = ObjectRef::from_pairs([("a", 1)]);
        assert_eq!(obj.get("a"), Value::from(1));
        obj.set("b", "two");
        assert_eq!(obj.get("b"), Value::from("two"));
        assert!(obj.delete("a"));
        assert!(!obj.has("a"));
        assert_eq!(obj.keys(), vec![Rc::<str>::from("b")]);
    }

    #[test]
    fn test_watcher_sees_only_changes() {
        let obj = ObjectRef::from_pairs([("count", 1)]);
        let w = watcher();
        obj.watch("count", Rc::downgrade(&w) as Weak<dyn PropertyWatcher>);

        obj.set("count", 1);
        assert_eq!(w.writes.get(), 0);

        obj.set("count", 2);
        assert_eq!(w.writes.get(), 1);
        assert_eq!(*w.last.borrow(), Value::from(2));

        obj.unwatch("count", &(Rc::downgrade(&w) as Weak<dyn PropertyWatcher>));
        obj.set("count", 3);
        assert_eq!(w.writes.get(), 1);
        assert!(!obj.is_watched("count"));
    }

    #[test]
    fn test_watchers_survive_delete() {
        let obj = ObjectRef::from_pairs([("count", 1)]);
        let first = watcher();
        let second = watcher();
        obj.watch("count", Rc::downgrade(&first) as Weak<dyn PropertyWatcher>);
        obj.watch("count", Rc::downgrade(&second) as Weak<dyn PropertyWatcher>);

        assert!(obj.delete("count"));
        assert_eq!(*first.last.borrow(), Value::Undefined);
        obj.set("count", 5);
        assert_eq!(first.writes.get(), 2);
        assert_eq!(second.writes.get(), 2);
        assert_eq!(*second.last.borrow(), Value::from(5));
    }

    #[test]
    fn test_accessor_write_reports_getter_value() {
        let obj = ObjectRef::from_pairs([("first", "Ada"), ("last", "Lovelace")]);
        obj.define_accessor(
            "full",
            AccessorDescriptor::getter(|o| {
                Value::from(format!("{} {}", o.get("first"), o.get("last")))
            })
            .with_setter(|o, value| {
                let text = value.to_display_string();
                let mut parts = text.splitn(2, ' ');
                o.set("first", parts.next().unwrap_or_default());
                o.set("last", parts.next().unwrap_or_default());
            }),
        );

        let w = watcher();
        obj.watch("full", Rc::downgrade(&w) as Weak<dyn PropertyWatcher>);
        obj.set("full", "Grace Hopper");

        assert_eq!(obj.get("first"), Value::from("Grace"));
        assert_eq!(w.writes.get(), 1);
        assert_eq!(*w.last.borrow(), Value::from("Grace Hopper"));
    }

    #[test]
    fn test_getter_only_ignores_writes() {
        let obj = ObjectRef::new();
        obj.define_accessor("answer", AccessorDescriptor::getter(|_| Value::from(42)));
        obj.set("answer", 1);
        assert_eq!(obj.get("answer"), Value::from(42));
    }

    #[test]
    fn test_function_call() {
        let add = FunctionRef::new("add", |_, args| {
            Ok(Value::from(args.iter().map(Value::to_number).sum::<f64>()))
        });
        assert_eq!(
            add.call(&Value::Undefined, &[Value::from(1), Value::from(2)]).unwrap(),
            Value::from(3)
        );
        assert_eq!(add.name(), "add");
    }
}
