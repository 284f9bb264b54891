//! Dependency tracking for computed properties.
//!
//! While a getter runs inside [`track`], every property read through
//! [`ObjectRef::get`](crate::ObjectRef::get) and every collection read is
//! recorded. The computed observer then subscribes to exactly those sources.

use std::cell::RefCell;
use std::rc::Rc;

use crate::collection::CollectionRef;
use crate::value::ObjectRef;

/// A source read during a tracked computation.
#[derive(Clone)]
pub enum Dependency {
    /// A named property of an object.
    Property(ObjectRef, Rc<str>),
    /// The contents of a collection.
    Collection(CollectionRef),
}

impl Dependency {
    fn same_source(&self, other: &Dependency) -> bool {
        match (self, other) {
            (Self::Property(a, an), Self::Property(b, bn)) => a.ptr_eq(b) && an == bn,
            (Self::Collection(a), Self::Collection(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Property(obj, name) => write!(f, "Property({:#x}.{name})", obj.addr()),
            Self::Collection(c) => write!(f, "Collection({:?})", c.kind()),
        }
    }
}

thread_local! {
    // `None` frames suppress recording for nested untracked reads.
    static FRAMES: RefCell<Vec<Option<Vec<Dependency>>>> = const { RefCell::new(Vec::new()) };
}

struct FrameGuard;

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

/// Run `f` and return every source it read.
pub fn track<R>(f: impl FnOnce() -> R) -> (R, Vec<Dependency>) {
    FRAMES.with(|frames| frames.borrow_mut().push(Some(Vec::new())));
    let guard = FrameGuard;
    let result = f();
    let deps = FRAMES.with(|frames| {
        frames
            .borrow_mut()
            .last_mut()
            .and_then(Option::take)
            .unwrap_or_default()
    });
    drop(guard);
    (result, deps)
}

/// Run `f` without recording its reads into an enclosing tracker.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    FRAMES.with(|frames| frames.borrow_mut().push(None));
    let _guard = FrameGuard;
    f()
}

/// Whether reads are currently being recorded.
pub fn is_tracking() -> bool {
    FRAMES.with(|frames| matches!(frames.borrow().last(), Some(Some(_))))
}

fn record(make: impl FnOnce() -> Dependency) {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        if let Some(Some(deps)) = frames.last_mut() {
            let dep = make();
            if !deps.iter().any(|d| d.same_source(&dep)) {
                deps.push(dep);
            }
        }
    });
}

pub(crate) fn record_property(obj: &ObjectRef, name: &str) {
    record(|| Dependency::Property(obj.clone(), Rc::from(name)));
}

pub(crate) fn record_collection(collection: CollectionRef) {
    record(|| Dependency::Collection(collection));
}
