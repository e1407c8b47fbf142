#![forbid(unsafe_code)]

//! Sequential containers and their mutation interceptor.
//!
//! In-place mutation of an array never goes through a member write hook, so
//! change detection happens at the operation level instead. Every mutating
//! operation on [`Array`] runs natively and then, when the array is observed,
//! hands off to its [`MutationInterceptor`], which:
//!
//! 1. observes the newly inserted items (push/unshift: all of them; splice:
//!    the items after the delete count);
//! 2. notifies the array's structure registry.
//!
//! The native result is returned unchanged.
//!
//! Reads (`len`, `get`, `to_vec`) never notify. On an observed array they
//! record the structure registry with the evaluating watcher, so a watcher
//! rooted at the array itself still hears about structural changes.
//!
//! Index assignment through [`Array::set_index`] is not intercepted; use
//! [`Runtime::set_item`](crate::Runtime::set_item) for a visible write.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::dep::Dep;
use crate::observer;
use crate::value::{ContainerId, Value};

/// The in-place mutating operations that notify observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayMethod {
    Push,
    Pop,
    Shift,
    Unshift,
    Splice,
    Sort,
    Reverse,
}

impl ArrayMethod {
    /// Every intercepted operation.
    pub const ALL: [Self; 7] = [
        Self::Push,
        Self::Pop,
        Self::Shift,
        Self::Unshift,
        Self::Splice,
        Self::Sort,
        Self::Reverse,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Shift => "shift",
            Self::Unshift => "unshift",
            Self::Splice => "splice",
            Self::Sort => "sort",
            Self::Reverse => "reverse",
        }
    }

    /// Look up an operation by name. Non-mutating names yield `None`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|method| method.name() == name)
    }

    /// Whether the operation can insert items.
    #[must_use]
    pub const fn inserts(self) -> bool {
        matches!(self, Self::Push | Self::Unshift | Self::Splice)
    }
}

impl fmt::Display for ArrayMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Installed on an observed array; runs after every mutating operation.
#[derive(Clone)]
pub(crate) struct MutationInterceptor {
    dep: Dep,
}

impl MutationInterceptor {
    pub(crate) fn new(dep: Dep) -> Self {
        Self { dep }
    }

    fn after(&self, method: ArrayMethod, inserted: &[Value]) {
        debug_assert!(method.inserts() || inserted.is_empty());
        if let Some(runtime) = self.dep.runtime() {
            observer::observe_items(&runtime, inserted);
        }
        tracing::trace!(
            method = method.name(),
            inserted = inserted.len(),
            dep_id = self.dep.id().raw(),
            "array mutation"
        );
        self.dep.notify();
    }
}

#[derive(Default)]
pub(crate) struct ArrayData {
    items: Vec<Value>,
    interceptor: Option<MutationInterceptor>,
}

/// An ordered container.
///
/// Cloning an `Array` creates a new handle to the **same** items.
#[derive(Clone, Default)]
pub struct Array {
    inner: Rc<RefCell<ArrayData>>,
}

impl Array {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of this array.
    #[must_use]
    pub fn id(&self) -> ContainerId {
        ContainerId::of(&self.inner)
    }

    /// Whether both handles alias the same array.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the mutation interceptor is installed.
    #[must_use]
    pub fn is_reactive(&self) -> bool {
        self.inner.borrow().interceptor.is_some()
    }

    // ── Reads ───────────────────────────────────────────────────────────

    #[must_use]
    pub fn len(&self) -> usize {
        self.track();
        self.len_untracked()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Item at `index`, or [`Value::Undefined`] past the end.
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        self.track();
        self.inner
            .borrow()
            .items
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of all items.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.track();
        self.items_untracked()
    }

    /// Untracked, unintercepted `arr[index] = value`.
    ///
    /// Grows the array with `undefined` when `index` is past the end.
    pub fn set_index(&self, index: usize, value: impl Into<Value>) {
        let mut data = self.inner.borrow_mut();
        if index >= data.items.len() {
            data.items.resize(index + 1, Value::Undefined);
        }
        data.items[index] = value.into();
    }

    // ── Intercepted mutations ───────────────────────────────────────────

    /// Append items; returns the new length.
    pub fn push(&self, items: impl IntoIterator<Item = Value>) -> usize {
        let items: Vec<Value> = items.into_iter().collect();
        self.intercept(ArrayMethod::Push, |data| {
            data.extend(items.iter().cloned());
            (data.len(), items)
        })
    }

    /// Remove the last item, or return `undefined` when empty.
    pub fn pop(&self) -> Value {
        self.intercept(ArrayMethod::Pop, |data| (data.pop().unwrap_or_default(), Vec::new()))
    }

    /// Remove the first item, or return `undefined` when empty.
    pub fn shift(&self) -> Value {
        self.intercept(ArrayMethod::Shift, |data| {
            let first = if data.is_empty() {
                Value::Undefined
            } else {
                data.remove(0)
            };
            (first, Vec::new())
        })
    }

    /// Prepend items, keeping their order; returns the new length.
    pub fn unshift(&self, items: impl IntoIterator<Item = Value>) -> usize {
        let items: Vec<Value> = items.into_iter().collect();
        self.intercept(ArrayMethod::Unshift, |data| {
            let mut rebuilt = items.clone();
            rebuilt.append(data);
            *data = rebuilt;
            (data.len(), items)
        })
    }

    /// Remove `delete_count` items at `start` and insert `items` there.
    ///
    /// `start` and `delete_count` are clamped to the array bounds. Returns
    /// the removed items.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = Value>,
    ) -> Vec<Value> {
        let items: Vec<Value> = items.into_iter().collect();
        self.intercept(ArrayMethod::Splice, |data| {
            let start = start.min(data.len());
            let end = start + delete_count.min(data.len() - start);
            let removed: Vec<Value> = data.splice(start..end, items.iter().cloned()).collect();
            (removed, items)
        })
    }

    /// Stable sort in the default order: by string conversion, with
    /// `undefined` last.
    pub fn sort(&self) -> Self {
        self.sort_by(default_order)
    }

    /// Stable sort with a comparator.
    ///
    /// The comparator runs on a copy of the items with no borrow held, so it
    /// may read the array; such reads see the unsorted items.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) -> Self {
        let mut items = self.items_untracked();
        items.sort_by(|a, b| compare(a, b));
        self.rearrange(ArrayMethod::Sort, items);
        self.clone()
    }

    /// Reverse in place.
    pub fn reverse(&self) -> Self {
        let mut items = self.items_untracked();
        items.reverse();
        self.rearrange(ArrayMethod::Reverse, items);
        self.clone()
    }

    /// Store reordered items computed outside the borrow.
    fn rearrange(&self, method: ArrayMethod, items: Vec<Value>) {
        self.intercept(method, |data| {
            *data = items;
            ((), Vec::new())
        });
    }

    /// Run a native mutation, then the interceptor if one is installed.
    fn intercept<R>(
        &self,
        method: ArrayMethod,
        op: impl FnOnce(&mut Vec<Value>) -> (R, Vec<Value>),
    ) -> R {
        let (result, inserted, interceptor) = {
            let mut data = self.inner.borrow_mut();
            let (result, inserted) = op(&mut data.items);
            (result, inserted, data.interceptor.clone())
        };
        if let Some(interceptor) = interceptor {
            interceptor.after(method, &inserted);
        }
        result
    }

    fn track(&self) {
        let dep = self
            .inner
            .borrow()
            .interceptor
            .as_ref()
            .map(|interceptor| interceptor.dep.clone());
        if let Some(dep) = dep {
            dep.depend();
        }
    }

    // ── Crate internals ─────────────────────────────────────────────────

    pub(crate) fn len_untracked(&self) -> usize {
        self.inner.borrow().items.len()
    }

    pub(crate) fn items_untracked(&self) -> Vec<Value> {
        self.inner.borrow().items.clone()
    }

    /// Grow to at least `len` items with `undefined`, without notifying.
    pub(crate) fn pad_untracked(&self, len: usize) {
        let mut data = self.inner.borrow_mut();
        if data.items.len() < len {
            data.items.resize(len, Value::Undefined);
        }
    }

    pub(crate) fn install_interceptor(&self, interceptor: MutationInterceptor) {
        let mut data = self.inner.borrow_mut();
        if data.interceptor.is_none() {
            data.interceptor = Some(interceptor);
        }
    }

    pub(crate) fn downgrade(&self) -> WeakArray {
        WeakArray(Rc::downgrade(&self.inner))
    }
}

fn default_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => Ordering::Equal,
        (Value::Undefined, _) => Ordering::Greater,
        (_, Value::Undefined) => Ordering::Less,
        _ => a.to_js_string().cmp(&b.to_js_string()),
    }
}

impl<V: Into<Value>> FromIterator<V> for Array {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ArrayData {
                items: iter.into_iter().map(Into::into).collect(),
                interceptor: None,
            })),
        }
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.borrow();
        f.debug_struct("Array")
            .field("id", &self.id().raw())
            .field("len", &data.items.len())
            .field("reactive", &data.interceptor.is_some())
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakArray(Weak<RefCell<ArrayData>>);

impl WeakArray {
    pub(crate) fn upgrade(&self) -> Option<Array> {
        self.0.upgrade().map(|inner| Array { inner })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
