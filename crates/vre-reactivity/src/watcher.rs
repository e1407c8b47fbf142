#![forbid(unsafe_code)]

//! Watchers: computations that re-run when what they read changes.
//!
//! # Design
//!
//! A [`Watcher`] evaluates an [`Expression`] against a root value while
//! holding the runtime's active slot. Every tracked read during that window
//! calls [`Watcher::add_dep`], which joins the read registry unless the
//! watcher already belongs to it. When any joined registry notifies, the
//! watcher re-evaluates and calls its callback with `(new, old)`.
//!
//! # Invariants
//!
//! 1. `dep_ids` is exactly the set of ids of `deps`.
//! 2. Reading the same member several times in one evaluation joins its
//!    registry once, so one write produces one callback.
//! 3. After [`Watcher::teardown`], no registry holds the watcher and updates
//!    are ignored.
//!
//! # Failure Modes
//!
//! - **Re-entrant evaluation**: evaluation while another watcher holds the
//!   active slot fails with [`ReactiveError::ReentrantEvaluation`]; the
//!   watcher keeps its previous value.
//! - **Getter panics**: the active slot is released during unwinding.
//! - **Callback re-triggers its own watcher**: the nested update refreshes the
//!   cached value but skips the callback instead of re-entering it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashSet;

use crate::dep::{Dep, DepId};
use crate::error::{ReactiveError, Result};
use crate::path::KeyPath;
use crate::runtime::Runtime;
use crate::value::Value;

/// Unique watcher id, allocated by the owning [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher#{}", self.0)
    }
}

/// What a watcher evaluates.
#[derive(Clone)]
pub enum Expression {
    /// A dotted key-path resolved against the root.
    Path(KeyPath),
    /// An arbitrary computation over the root.
    Computation(Rc<dyn Fn(&Value) -> Value>),
}

impl Expression {
    /// Compile a key-path expression.
    pub fn path(path: &str) -> Result<Self> {
        KeyPath::parse(path)
            .map(Self::Path)
            .ok_or_else(|| ReactiveError::InvalidKeyPath {
                path: path.to_owned(),
            })
    }

    pub fn computation(getter: impl Fn(&Value) -> Value + 'static) -> Self {
        Self::Computation(Rc::new(getter))
    }

    fn get(&self, root: &Value) -> Value {
        match self {
            Self::Path(path) => path.resolve(root),
            Self::Computation(getter) => getter(root),
        }
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(&path.as_str()).finish(),
            Self::Computation(_) => f.write_str("Computation(..)"),
        }
    }
}

/// Options recognized by [`Runtime::watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchOptions {
    /// Depend on every value reachable from the result.
    pub deep: bool,
    /// Call the callback once at construction, with `undefined` as the old
    /// value.
    pub immediate: bool,
}

impl WatchOptions {
    #[must_use]
    pub fn with_deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }

    #[must_use]
    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }
}

/// Change callback, called with `(new, old)`.
pub type Callback = Box<dyn FnMut(&Value, &Value)>;

struct WatcherInner {
    id: WatcherId,
    runtime: Runtime,
    root: Value,
    expression: Expression,
    deep: bool,
    callback: RefCell<Option<Callback>>,
    value: RefCell<Value>,
    dep_ids: RefCell<AHashSet<DepId>>,
    deps: RefCell<Vec<Dep>>,
    active: Cell<bool>,
}

/// A subscriber bound to an expression.
///
/// Cloning a `Watcher` creates a new handle to the **same** watcher.
#[derive(Clone)]
pub struct Watcher {
    inner: Rc<WatcherInner>,
}

impl Watcher {
    /// Create a watcher and run its first evaluation.
    pub fn new(
        runtime: &Runtime,
        root: Value,
        expression: Expression,
        callback: Callback,
        options: WatchOptions,
    ) -> Result<Self> {
        let watcher = Self {
            inner: Rc::new(WatcherInner {
                id: runtime.next_watcher_id(),
                runtime: runtime.clone(),
                root,
                expression,
                deep: options.deep,
                callback: RefCell::new(Some(callback)),
                value: RefCell::new(Value::Undefined),
                dep_ids: RefCell::new(AHashSet::new()),
                deps: RefCell::new(Vec::new()),
                active: Cell::new(true),
            }),
        };
        let value = watcher.evaluate()?;
        *watcher.inner.value.borrow_mut() = value.clone();
        tracing::debug!(
            runtime = %runtime.label(),
            watcher_id = watcher.inner.id.raw(),
            expression = ?watcher.inner.expression,
            deps = watcher.dep_count(),
            deep = options.deep,
            "watcher created"
        );
        if options.immediate {
            watcher.invoke(&value, &Value::Undefined);
        }
        Ok(watcher)
    }

    #[must_use]
    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    /// The value produced by the last evaluation.
    #[must_use]
    pub fn value(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    /// Number of joined registries.
    #[must_use]
    pub fn dep_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }

    /// Ids of joined registries, in join order.
    #[must_use]
    pub fn dep_ids(&self) -> Vec<DepId> {
        self.inner.deps.borrow().iter().map(Dep::id).collect()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Run the expression with this watcher recording dependencies.
    pub fn evaluate(&self) -> Result<Value> {
        let runtime = &self.inner.runtime;
        let _guard = runtime.enter(self)?;
        let value = self.inner.expression.get(&self.inner.root);
        if self.inner.deep {
            runtime.traverse(&value);
        }
        Ok(value)
    }

    /// Join `dep` unless already joined. Torn-down watchers join nothing.
    pub fn add_dep(&self, dep: &Dep) {
        if !self.inner.active.get() {
            return;
        }
        if !self.inner.dep_ids.borrow_mut().insert(dep.id()) {
            return;
        }
        self.inner.deps.borrow_mut().push(dep.clone());
        dep.add_subscriber(self);
    }

    /// Re-evaluate and call the callback with `(new, old)`.
    pub fn update(&self) -> Result<()> {
        if !self.inner.active.get() {
            return Ok(());
        }
        let value = self.evaluate()?;
        let old = self.inner.value.replace(value.clone());
        self.invoke(&value, &old);
        Ok(())
    }

    /// Leave every joined registry. Safe to call repeatedly.
    pub fn teardown(&self) {
        if !self.inner.active.replace(false) {
            return;
        }
        let deps = std::mem::take(&mut *self.inner.deps.borrow_mut());
        self.inner.dep_ids.borrow_mut().clear();
        for dep in &deps {
            dep.remove_subscriber(self);
        }
        tracing::debug!(
            watcher_id = self.inner.id.raw(),
            deps = deps.len(),
            "watcher torn down"
        );
    }

    fn invoke(&self, value: &Value, old: &Value) {
        let taken = self.inner.callback.borrow_mut().take();
        let Some(callback) = taken else {
            tracing::debug!(
                watcher_id = self.inner.id.raw(),
                "nested update skipped callback"
            );
            return;
        };
        let mut lease = CallbackLease {
            slot: &self.inner.callback,
            callback: Some(callback),
        };
        if let Some(callback) = lease.callback.as_mut() {
            callback(value, old);
        }
    }

    pub(crate) fn downgrade(&self) -> WeakWatcher {
        WeakWatcher(Rc::downgrade(&self.inner))
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("expression", &self.inner.expression)
            .field("deps", &self.dep_count())
            .field("deep", &self.inner.deep)
            .field("active", &self.inner.active.get())
            .finish()
    }
}

/// Returns a taken callback to its slot on drop, including during unwinding.
struct CallbackLease<'a> {
    slot: &'a RefCell<Option<Callback>>,
    callback: Option<Callback>,
}

impl Drop for CallbackLease<'_> {
    fn drop(&mut self) {
        let Some(callback) = self.callback.take() else {
            return;
        };
        let mut slot = self.slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(callback);
        }
    }
}

/// Non-owning watcher reference held by registries.
#[derive(Clone)]
pub(crate) struct WeakWatcher(Weak<WatcherInner>);

impl WeakWatcher {
    pub(crate) fn upgrade(&self) -> Option<Watcher> {
        self.0.upgrade().map(|inner| Watcher { inner })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Identity comparison.
    pub(crate) fn is(&self, watcher: &Watcher) -> bool {
        std::ptr::eq(self.0.as_ptr(), Rc::as_ptr(&watcher.inner))
    }
}

/// Keeps a watcher subscribed; tears it down when dropped.
///
/// This is the only supported way to unsubscribe.
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct WatchHandle {
    watcher: Watcher,
    detached: bool,
}

impl WatchHandle {
    pub(crate) fn new(watcher: Watcher) -> Self {
        Self {
            watcher,
            detached: false,
        }
    }

    /// Unsubscribe. Safe to call repeatedly.
    pub fn unwatch(&self) {
        self.watcher.teardown();
    }

    /// The watcher's last evaluated value.
    #[must_use]
    pub fn value(&self) -> Value {
        self.watcher.value()
    }

    #[must_use]
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    /// Give up the drop-teardown and return the watcher. It stays subscribed
    /// for as long as the returned handle is alive.
    #[must_use]
    pub fn detach(mut self) -> Watcher {
        self.detached = true;
        self.watcher.clone()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.unwatch();
        }
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("watcher", &self.watcher)
            .field("detached", &self.detached)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
