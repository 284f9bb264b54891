//! Observable arrays, maps and sets.
//!
//! Collections are plain shared containers until an observer is attached via
//! the observer locator. From then on every mutating method records what it
//! did in the observer's [`IndexMap`](crate::index_map::IndexMap) and asks
//! the lifecycle for a flush; subscribers see one batched notification per
//! flush no matter how many mutations happened in between.
//!
//! Maps and sets keep insertion order and compare keys with SameValueZero.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::index_map::IndexMap;
use crate::observer::CollectionObserver;
use crate::tracking;
use crate::value::Value;

/// The kind of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// An ordered list.
    Array,
    /// Key/value pairs.
    Map,
    /// Unique members.
    Set,
}

type ObserverCell = RefCell<Option<Rc<CollectionObserver>>>;

fn record_on(observer: &ObserverCell, mutation: impl FnOnce(&mut IndexMap)) {
    let observer = observer.borrow().clone();
    if let Some(observer) = observer {
        observer.record_mutation(mutation);
    }
}

// ---------------------------------------------------------------------------
// Array
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ArrayInner {
    items: RefCell<Vec<Value>>,
    observer: ObserverCell,
}

/// A shared observable array.
#[derive(Clone, Default)]
pub struct ArrayRef(Rc<ArrayInner>);

impl From<Vec<Value>> for ArrayRef {
    fn from(items: Vec<Value>) -> Self {
        Self(Rc::new(ArrayInner {
            items: RefCell::new(items),
            observer: RefCell::new(None),
        }))
    }
}

impl FromIterator<Value> for ArrayRef {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl ArrayRef {
    /// Largest length an indexed or `length` write may grow an array to.
    /// Pushes and splices are not capped.
    pub const MAX_LEN: usize = 1 << 20;

    /// An empty array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn track(&self) {
        tracking::record_collection(CollectionRef::Array(self.clone()));
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.track();
        self.0.items.borrow().len()
    }

    /// Whether the array is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The item at `index`, or `undefined` past the end.
    pub fn get(&self, index: usize) -> Value {
        self.track();
        self.0.items.borrow().get(index).cloned().unwrap_or_default()
    }

    /// A copy of the items.
    pub fn to_vec(&self) -> Vec<Value> {
        self.track();
        self.0.items.borrow().clone()
    }

    /// Position of the first strictly equal item.
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.track();
        self.0.items.borrow().iter().position(|v| v.strict_equals(value))
    }

    /// Whether an item equal under SameValueZero exists.
    pub fn includes(&self, value: &Value) -> bool {
        self.track();
        self.0.items.borrow().iter().any(|v| v.same_value_zero(value))
    }

    /// Join display strings; `null` and `undefined` render empty.
    pub fn join(&self, separator: &str) -> String {
        self.to_vec()
            .iter()
            .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Append items. Returns the new length.
    pub fn push(&self, values: impl IntoIterator<Item = Value>) -> usize {
        let (added, len) = {
            let mut items = self.0.items.borrow_mut();
            let before = items.len();
            items.extend(values);
            (items.len() - before, items.len())
        };
        if added > 0 {
            record_on(&self.0.observer, |map| map.push_new(added));
        }
        len
    }

    /// Remove and return the last item.
    pub fn pop(&self) -> Value {
        let removed = self.0.items.borrow_mut().pop();
        match removed {
            Some(value) => {
                record_on(&self.0.observer, IndexMap::pop);
                value
            }
            None => Value::Undefined,
        }
    }

    /// Remove and return the first item.
    pub fn shift(&self) -> Value {
        let removed = {
            let mut items = self.0.items.borrow_mut();
            if items.is_empty() { None } else { Some(items.remove(0)) }
        };
        match removed {
            Some(value) => {
                record_on(&self.0.observer, IndexMap::shift);
                value
            }
            None => Value::Undefined,
        }
    }

    /// Prepend items. Returns the new length.
    pub fn unshift(&self, values: impl IntoIterator<Item = Value>) -> usize {
        let values: Vec<Value> = values.into_iter().collect();
        let added = values.len();
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.splice(0..0, values);
            items.len()
        };
        if added > 0 {
            record_on(&self.0.observer, |map| map.unshift_new(added));
        }
        len
    }

    /// Remove `delete_count` items at `start` and insert `values` there.
    /// Returns the removed items.
    pub fn splice(&self, start: usize, delete_count: usize, values: Vec<Value>) -> Vec<Value> {
        let insert_count = values.len();
        let (start, removed) = {
            let mut items = self.0.items.borrow_mut();
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            let removed: Vec<Value> = items.splice(start..end, values).collect();
            (start, removed)
        };
        if !removed.is_empty() || insert_count > 0 {
            let deleted = removed.len();
            record_on(&self.0.observer, |map| map.splice(start, deleted, insert_count));
        }
        removed
    }

    /// Reverse in place.
    pub fn reverse(&self) {
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.reverse();
            items.len()
        };
        if len > 1 {
            record_on(&self.0.observer, IndexMap::reverse);
        }
    }

    /// Sort with the default ordering: `undefined` last, others by display
    /// string.
    pub fn sort(&self) {
        self.sort_by(|a, b| match (a, b) {
            (Value::Undefined, Value::Undefined) => Ordering::Equal,
            (Value::Undefined, _) => Ordering::Greater,
            (_, Value::Undefined) => Ordering::Less,
            _ => a.to_display_string().cmp(&b.to_display_string()),
        });
    }

    /// Stable sort with a comparator.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) {
        let snapshot = self.0.items.borrow().clone();
        let mut order: Vec<usize> = (0..snapshot.len()).collect();
        order.sort_by(|&a, &b| compare(&snapshot[a], &snapshot[b]));
        if order.iter().enumerate().all(|(i, &o)| i == o) {
            return;
        }
        let sorted: Vec<Value> = order.iter().map(|&i| snapshot[i].clone()).collect();
        *self.0.items.borrow_mut() = sorted;
        record_on(&self.0.observer, |map| map.permute(&order));
    }

    /// Assign the item at `index`, growing the array with `undefined` if
    /// needed.
    ///
    /// Fails with [`Error::ArrayTooLong`] when growing past [`Self::MAX_LEN`].
    pub fn set(&self, index: usize, value: Value) -> Result<()> {
        Self::check_growth(index.saturating_add(1), self.len())?;
        enum Change {
            None,
            Replaced,
            Grew(usize),
        }
        let change = {
            let mut items = self.0.items.borrow_mut();
            match items.get_mut(index) {
                Some(slot) if slot.same_value(&value) => Change::None,
                Some(slot) => {
                    *slot = value;
                    Change::Replaced
                }
                None => {
                    let grow = index + 1 - items.len();
                    items.resize(index, Value::Undefined);
                    items.push(value);
                    Change::Grew(grow)
                }
            }
        };
        match change {
            Change::None => {}
            Change::Replaced => record_on(&self.0.observer, |map| map.mark_replaced(index)),
            Change::Grew(count) => record_on(&self.0.observer, |map| map.push_new(count)),
        }
        Ok(())
    }

    /// Truncate, or pad with `undefined`, to `len` items.
    ///
    /// Shrinking always succeeds; padding past [`Self::MAX_LEN`] fails with
    /// [`Error::ArrayTooLong`].
    pub fn set_len(&self, len: usize) -> Result<()> {
        Self::check_growth(len, self.len())?;
        let changed = {
            let mut items = self.0.items.borrow_mut();
            let changed = items.len() != len;
            items.resize(len, Value::Undefined);
            changed
        };
        if changed {
            record_on(&self.0.observer, |map| map.set_len(len));
        }
        Ok(())
    }

    fn check_growth(requested: usize, current: usize) -> Result<()> {
        if requested > current && requested > Self::MAX_LEN {
            return Err(Error::ArrayTooLong {
                requested,
                max: Self::MAX_LEN,
            });
        }
        Ok(())
    }

    pub(crate) fn raw_len(&self) -> usize {
        self.0.items.borrow().len()
    }

    pub(crate) fn observer(&self) -> Option<Rc<CollectionObserver>> {
        self.0.observer.borrow().clone()
    }

    pub(crate) fn attach_observer(&self, observer: Rc<CollectionObserver>) {
        *self.0.observer.borrow_mut() = Some(observer);
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.items.borrow().iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MapInner {
    entries: RefCell<Vec<(Value, Value)>>,
    observer: ObserverCell,
}

/// A shared observable map with insertion order.
#[derive(Clone, Default)]
pub struct MapRef(Rc<MapInner>);

impl MapRef {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// A map from key/value pairs. Later duplicates overwrite earlier ones.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let map = Self::new();
        for (key, value) in pairs {
            map.set(key, value);
        }
        map
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &MapRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn track(&self) {
        tracking::record_collection(CollectionRef::Map(self.clone()));
    }

    fn position(&self, key: &Value) -> Option<usize> {
        self.0.entries.borrow().iter().position(|(k, _)| k.same_value_zero(key))
    }

    /// Number of entries.
    pub fn size(&self) -> usize {
        self.track();
        self.0.entries.borrow().len()
    }

    /// The value stored under `key`, or `undefined`.
    pub fn get(&self, key: &Value) -> Value {
        self.track();
        self.0
            .entries
            .borrow()
            .iter()
            .find(|(k, _)| k.same_value_zero(key))
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    /// Whether `key` is present.
    pub fn has(&self, key: &Value) -> bool {
        self.track();
        self.position(key).is_some()
    }

    /// A copy of the entries in insertion order.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.track();
        self.0.entries.borrow().clone()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    /// Values in insertion order.
    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// Insert or replace an entry.
    pub fn set(&self, key: Value, value: Value) {
        match self.position(&key) {
            Some(index) => {
                {
                    let mut entries = self.0.entries.borrow_mut();
                    if entries[index].1.same_value(&value) {
                        return;
                    }
                    entries[index].1 = value;
                }
                record_on(&self.0.observer, |map| map.mark_replaced(index));
            }
            None => {
                self.0.entries.borrow_mut().push((key, value));
                record_on(&self.0.observer, |map| map.push_new(1));
            }
        }
    }

    /// Remove an entry. Returns `true` if it existed.
    pub fn delete(&self, key: &Value) -> bool {
        let Some(index) = self.position(key) else {
            return false;
        };
        self.0.entries.borrow_mut().remove(index);
        record_on(&self.0.observer, |map| map.splice(index, 1, 0));
        true
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let had_entries = {
            let mut entries = self.0.entries.borrow_mut();
            let had = !entries.is_empty();
            entries.clear();
            had
        };
        if had_entries {
            record_on(&self.0.observer, IndexMap::clear);
        }
    }

    pub(crate) fn raw_len(&self) -> usize {
        self.0.entries.borrow().len()
    }

    pub(crate) fn observer(&self) -> Option<Rc<CollectionObserver>> {
        self.0.observer.borrow().clone()
    }

    pub(crate) fn attach_observer(&self, observer: Rc<CollectionObserver>) {
        *self.0.observer.borrow_mut() = Some(observer);
    }
}

impl fmt::Debug for MapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.entries.borrow().iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Set
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SetInner {
    members: RefCell<Vec<Value>>,
    observer: ObserverCell,
}

/// A shared observable set with insertion order.
#[derive(Clone, Default)]
pub struct SetRef(Rc<SetInner>);

impl SetRef {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set of the given members; duplicates are dropped.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let set = Self::new();
        for value in values {
            set.add(value);
        }
        set
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &SetRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn track(&self) {
        tracking::record_collection(CollectionRef::Set(self.clone()));
    }

    fn position(&self, value: &Value) -> Option<usize> {
        self.0.members.borrow().iter().position(|m| m.same_value_zero(value))
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.track();
        self.0.members.borrow().len()
    }

    /// Whether `value` is a member.
    pub fn has(&self, value: &Value) -> bool {
        self.track();
        self.position(value).is_some()
    }

    /// Members in insertion order.
    pub fn values(&self) -> Vec<Value> {
        self.track();
        self.0.members.borrow().clone()
    }

    /// Add a member. Returns `false` if it was already present.
    pub fn add(&self, value: Value) -> bool {
        if self.position(&value).is_some() {
            return false;
        }
        self.0.members.borrow_mut().push(value);
        record_on(&self.0.observer, |map| map.push_new(1));
        true
    }

    /// Remove a member. Returns `true` if it existed.
    pub fn delete(&self, value: &Value) -> bool {
        let Some(index) = self.position(value) else {
            return false;
        };
        self.0.members.borrow_mut().remove(index);
        record_on(&self.0.observer, |map| map.splice(index, 1, 0));
        true
    }

    /// Remove every member.
    pub fn clear(&self) {
        let had_members = {
            let mut members = self.0.members.borrow_mut();
            let had = !members.is_empty();
            members.clear();
            had
        };
        if had_members {
            record_on(&self.0.observer, IndexMap::clear);
        }
    }

    pub(crate) fn raw_len(&self) -> usize {
        self.0.members.borrow().len()
    }

    pub(crate) fn observer(&self) -> Option<Rc<CollectionObserver>> {
        self.0.observer.borrow().clone()
    }

    pub(crate) fn attach_observer(&self, observer: Rc<CollectionObserver>) {
        *self.0.observer.borrow_mut() = Some(observer);
    }
}

impl fmt::Debug for SetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.members.borrow().iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Any collection
// ---------------------------------------------------------------------------

/// Any observable collection.
#[derive(Clone, Debug)]
pub enum CollectionRef {
    /// An array.
    Array(ArrayRef),
    /// A map.
    Map(MapRef),
    /// A set.
    Set(SetRef),
}

impl CollectionRef {
    /// The collection's value, if it is one.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(a) => Some(Self::Array(a.clone())),
            Value::Map(m) => Some(Self::Map(m.clone())),
            Value::Set(s) => Some(Self::Set(s.clone())),
            _ => None,
        }
    }

    /// The kind of collection.
    pub fn kind(&self) -> CollectionKind {
        match self {
            Self::Array(_) => CollectionKind::Array,
            Self::Map(_) => CollectionKind::Map,
            Self::Set(_) => CollectionKind::Set,
        }
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &CollectionRef) -> bool {
        match (self, other) {
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            (Self::Map(a), Self::Map(b)) => a.ptr_eq(b),
            (Self::Set(a), Self::Set(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Number of items without recording a dependency.
    pub fn len_untracked(&self) -> usize {
        match self {
            Self::Array(a) => a.raw_len(),
            Self::Map(m) => m.raw_len(),
            Self::Set(s) => s.raw_len(),
        }
    }

    /// Downgrade to a weak handle.
    pub fn downgrade(&self) -> WeakCollectionRef {
        match self {
            Self::Array(a) => WeakCollectionRef(WeakInner::Array(Rc::downgrade(&a.0))),
            Self::Map(m) => WeakCollectionRef(WeakInner::Map(Rc::downgrade(&m.0))),
            Self::Set(s) => WeakCollectionRef(WeakInner::Set(Rc::downgrade(&s.0))),
        }
    }

    /// Wrap back into a [`Value`].
    pub fn to_value(&self) -> Value {
        match self {
            Self::Array(a) => Value::Array(a.clone()),
            Self::Map(m) => Value::Map(m.clone()),
            Self::Set(s) => Value::Set(s.clone()),
        }
    }

    pub(crate) fn observer(&self) -> Option<Rc<CollectionObserver>> {
        match self {
            Self::Array(a) => a.observer(),
            Self::Map(m) => m.observer(),
            Self::Set(s) => s.observer(),
        }
    }

    pub(crate) fn attach_observer(&self, observer: Rc<CollectionObserver>) {
        match self {
            Self::Array(a) => a.attach_observer(observer),
            Self::Map(m) => m.attach_observer(observer),
            Self::Set(s) => s.attach_observer(observer),
        }
    }
}

/// A weak handle to a collection.
#[derive(Clone)]
pub struct WeakCollectionRef(WeakInner);

#[derive(Clone)]
enum WeakInner {
    Array(Weak<ArrayInner>),
    Map(Weak<MapInner>),
    Set(Weak<SetInner>),
}

impl WeakCollectionRef {
    /// Upgrade if the collection is still alive.
    pub fn upgrade(&self) -> Option<CollectionRef> {
        match &self.0 {
            WeakInner::Array(a) => a.upgrade().map(|inner| CollectionRef::Array(ArrayRef(inner))),
            WeakInner::Map(m) => m.upgrade().map(|inner| CollectionRef::Map(MapRef(inner))),
            WeakInner::Set(s) => s.upgrade().map(|inner| CollectionRef::Set(SetRef(inner))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nums(values: &[i32]) -> Vec<Value> {
        values.iter().map(|&v| Value::from(v)).collect()
    }

    #[test]
    fn test_array_basic_mutations() {
        let arr = ArrayRef::from(nums(&[1, 2, 3]));
        assert_eq!(arr.push(nums(&[4])), 4);
        assert_eq!(arr.pop(), Value::from(4));
        assert_eq!(arr.shift(), Value::from(1));
        assert_eq!(arr.unshift(nums(&[0])), 3);
        assert_eq!(arr.to_vec(), nums(&[0, 2, 3]));
    }

    #[test]
    fn test_array_splice_returns_removed() {
        let arr = ArrayRef::from(nums(&[1, 2, 3, 4]));
        let removed = arr.splice(1, 2, nums(&[9]));
        assert_eq!(removed, nums(&[2, 3]));
        assert_eq!(arr.to_vec(), nums(&[1, 9, 4]));
    }

    #[test]
    fn test_array_sort_default_and_custom() {
        let arr = ArrayRef::from(vec![Value::from(10), Value::Undefined, Value::from(9)]);
        arr.sort();
        assert_eq!(arr.to_vec(), vec![Value::from(10), Value::from(9), Value::Undefined]);

        let arr = ArrayRef::from(nums(&[3, 1, 2]));
        arr.sort_by(|a, b| a.to_number().total_cmp(&b.to_number()));
        assert_eq!(arr.to_vec(), nums(&[1, 2, 3]));
    }

    #[test]
    fn test_array_set_grows() {
        let arr = ArrayRef::new();
        arr.set(2, Value::from("x")).unwrap();
        assert_eq!(arr.to_vec(), vec![Value::Undefined, Value::Undefined, Value::from("x")]);
        assert_eq!(arr.join("-"), "--x");
    }

    #[test]
    fn test_array_growth_is_capped() {
        let arr = ArrayRef::from(nums(&[1, 2]));
        assert!(matches!(
            arr.set(4_000_000_000, Value::from(1)),
            Err(Error::ArrayTooLong { max: ArrayRef::MAX_LEN, .. })
        ));
        assert!(arr.set_len(ArrayRef::MAX_LEN + 1).is_err());
        assert_eq!(arr.len(), 2);

        arr.set_len(0).unwrap();
        assert!(arr.is_empty());
    }

    #[test]
    fn test_map_same_value_zero_keys() {
        let map = MapRef::new();
        map.set(Value::Number(f64::NAN), Value::from(1));
        map.set(Value::Number(0.0), Value::from("zero"));
        assert_eq!(map.get(&Value::Number(f64::NAN)), Value::from(1));
        assert_eq!(map.get(&Value::Number(-0.0)), Value::from("zero"));
        assert!(map.delete(&Value::Number(0.0)));
        assert_eq!(map.size(), 1);
    }

    #[test]
    fn test_set_dedupes() {
        let set = SetRef::from_values(nums(&[1, 1, 2]));
        assert_eq!(set.size(), 2);
        assert!(!set.add(Value::from(2)));
        assert!(set.delete(&Value::from(1)));
        assert_eq!(set.values(), nums(&[2]));
    }

    #[test]
    fn test_weak_handle_upgrade() {
        let arr = ArrayRef::new();
        let weak = CollectionRef::Array(arr.clone()).downgrade();
        assert!(weak.upgrade().is_some());
        drop(arr);
        assert!(weak.upgrade().is_none());
    }
}
