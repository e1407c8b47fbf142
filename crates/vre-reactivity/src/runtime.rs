#![forbid(unsafe_code)]

//! The reactive runtime.
//!
//! A [`Runtime`] owns everything the tracking algorithm needs to share:
//!
//! - the **active slot**: the single watcher currently evaluating, whose reads
//!   are recorded as dependencies;
//! - the **dep-id allocator** for [`Dep`] registries;
//! - the **observer side-table** mapping container identity to its
//!   [`Observer`], which makes observation idempotent without tagging the
//!   observed value.
//!
//! # Evaluation discipline
//!
//! Only one watcher may evaluate at a time. [`Runtime::enter`] hands out an
//! [`EvaluationGuard`] that clears the slot when dropped, including during
//! unwinding. A second evaluation attempted while the slot is occupied fails
//! with [`ReactiveError::ReentrantEvaluation`] instead of silently attributing
//! reads to the wrong watcher.
//!
//! # Reactive add/delete
//!
//! Adding or removing a member bypasses the member interceptors, so observers
//! cannot see it. [`Runtime::set_property`], [`Runtime::delete_property`],
//! [`Runtime::set_item`] and [`Runtime::delete_item`] perform the change and
//! notify the container's observer registry.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::array::Array;
use crate::config::RuntimeConfig;
use crate::dep::{Dep, DepId};
use crate::error::{ReactiveError, Result};
use crate::observer::{self, Observer};
use crate::traverse;
use crate::value::{ContainerId, Object, Value};
use crate::watcher::{Expression, WatchHandle, WatchOptions, Watcher, WatcherId};

/// Side-table registrations between automatic [`Runtime::prune`] passes.
pub(crate) const PRUNE_INTERVAL: u64 = 256;

struct RuntimeInner {
    config: RuntimeConfig,
    registrations: Cell<u64>,
    next_dep_id: Cell<u64>,
    next_watcher_id: Cell<u64>,
    active: RefCell<Option<Watcher>>,
    observers: RefCell<AHashMap<ContainerId, Observer>>,
}

/// Handle to a reactive runtime.
///
/// Cloning a `Runtime` creates a new handle to the **same** runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                registrations: Cell::new(0),
                next_dep_id: Cell::new(0),
                next_watcher_id: Cell::new(0),
                active: RefCell::new(None),
                observers: RefCell::new(AHashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.config.label
    }

    // ── Observation ─────────────────────────────────────────────────────

    /// Make a container reactive.
    ///
    /// Returns the container's observer, creating it on first call.
    /// Primitives and frozen objects yield `None`.
    pub fn observe(&self, value: &Value) -> Option<Observer> {
        observer::observe(self, value)
    }

    /// The observer of a container, if it has been observed.
    #[must_use]
    pub fn observer_of(&self, value: &Value) -> Option<Observer> {
        value.container_id().and_then(|id| self.lookup_observer(id))
    }

    pub(crate) fn lookup_observer(&self, id: ContainerId) -> Option<Observer> {
        self.inner
            .observers
            .borrow()
            .get(&id)
            .filter(|observer| observer.is_alive())
            .cloned()
    }

    /// Every [`PRUNE_INTERVAL`] registrations the table drops entries whose
    /// container is gone, so short-lived data does not accumulate.
    pub(crate) fn register_observer(&self, id: ContainerId, observer: Observer) {
        self.inner.observers.borrow_mut().insert(id, observer);
        let registrations = self.inner.registrations.get() + 1;
        self.inner.registrations.set(registrations);
        if registrations % PRUNE_INTERVAL == 0 {
            self.prune();
        }
    }

    /// Drop side-table entries whose container no longer exists.
    ///
    /// Also runs automatically as new observers are registered.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self) -> usize {
        let mut observers = self.inner.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|_, observer| observer.is_alive());
        let removed = before - observers.len();
        if removed > 0 {
            tracing::debug!(runtime = %self.label(), removed, "pruned observers");
        }
        removed
    }

    /// Number of side-table entries (live or not yet pruned).
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    /// Visit every value reachable from `value`, recording each read with the
    /// watcher currently evaluating.
    ///
    /// Returns the number of containers visited.
    pub fn traverse(&self, value: &Value) -> usize {
        traverse::traverse(self, value)
    }

    // ── Watching ────────────────────────────────────────────────────────

    /// Subscribe `callback` to changes of `expression` evaluated against
    /// `root`.
    ///
    /// The callback receives `(new, old)`. Dropping the returned handle, or
    /// calling [`WatchHandle::unwatch`], tears the subscription down.
    pub fn watch(
        &self,
        root: impl Into<Value>,
        expression: Expression,
        callback: impl FnMut(&Value, &Value) + 'static,
        options: WatchOptions,
    ) -> Result<WatchHandle> {
        let watcher = Watcher::new(self, root.into(), expression, Box::new(callback), options)?;
        Ok(WatchHandle::new(watcher))
    }

    /// Watch a dotted key-path using the configured default options.
    pub fn watch_path(
        &self,
        root: impl Into<Value>,
        path: &str,
        callback: impl FnMut(&Value, &Value) + 'static,
    ) -> Result<WatchHandle> {
        let options = self.inner.config.default_watch;
        self.watch(root, Expression::path(path)?, callback, options)
    }

    /// Watch a computation using the configured default options.
    pub fn watch_fn(
        &self,
        root: impl Into<Value>,
        getter: impl Fn(&Value) -> Value + 'static,
        callback: impl FnMut(&Value, &Value) + 'static,
    ) -> Result<WatchHandle> {
        let options = self.inner.config.default_watch;
        self.watch(root, Expression::computation(getter), callback, options)
    }

    /// Whether a watcher is currently evaluating.
    #[must_use]
    pub fn is_evaluating(&self) -> bool {
        self.inner.active.borrow().is_some()
    }

    /// Occupy the active slot for `watcher`.
    pub(crate) fn enter(&self, watcher: &Watcher) -> Result<EvaluationGuard<'_>> {
        let mut active = self.inner.active.borrow_mut();
        if let Some(current) = active.as_ref() {
            return Err(ReactiveError::ReentrantEvaluation {
                active: current.id(),
                requested: watcher.id(),
            });
        }
        *active = Some(watcher.clone());
        Ok(EvaluationGuard { runtime: self })
    }

    pub(crate) fn active_watcher(&self) -> Option<Watcher> {
        self.inner.active.borrow().clone()
    }

    pub(crate) fn next_dep_id(&self) -> DepId {
        let id = self.inner.next_dep_id.get();
        self.inner.next_dep_id.set(id + 1);
        DepId::new(id)
    }

    pub(crate) fn next_watcher_id(&self) -> WatcherId {
        let id = self.inner.next_watcher_id.get();
        self.inner.next_watcher_id.set(id + 1);
        WatcherId::new(id)
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Rc::downgrade(&self.inner))
    }

    // ── Reactive add/delete ─────────────────────────────────────────────

    /// Set a member so that observers see it, even when the key is new.
    ///
    /// An existing key is a plain write. A new key on an observed object gets
    /// an interceptor and the object's observer registry is notified.
    pub fn set_property(&self, object: &Object, key: &str, value: impl Into<Value>) {
        let value = value.into();
        if object.contains_key(key) || object.is_frozen() {
            object.set(key, value);
            return;
        }
        object.set(key, value);
        let Some(observer) = self.lookup_observer(object.id()) else {
            return;
        };
        observer::define_reactive(self, object, key);
        tracing::trace!(runtime = %self.label(), key, "reactive property added");
        observer.dep().notify();
    }

    /// Remove a member and notify the object's observer registry.
    ///
    /// Absent keys and frozen objects are left untouched.
    pub fn delete_property(&self, object: &Object, key: &str) -> Option<Value> {
        let removed = object.remove(key)?;
        if let Some(observer) = self.lookup_observer(object.id()) {
            tracing::trace!(runtime = %self.label(), key, "reactive property deleted");
            observer.dep().notify();
        }
        Some(removed)
    }

    /// Replace (or append) the item at `index` through the intercepted
    /// `splice`, padding with `undefined` when `index` is past the end.
    pub fn set_item(&self, array: &Array, index: usize, value: impl Into<Value>) {
        array.pad_untracked(index);
        let _ = array.splice(index, 1, [value.into()]);
    }

    /// Remove the item at `index` through the intercepted `splice`.
    pub fn delete_item(&self, array: &Array, index: usize) -> Option<Value> {
        if index >= array.len_untracked() {
            return None;
        }
        array.splice(index, 1, []).into_iter().next()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("label", &self.inner.config.label)
            .field("observers", &self.inner.observers.borrow().len())
            .field("evaluating", &self.is_evaluating())
            .finish()
    }
}

/// Weak handle held by registries so the side-table does not keep its own
/// runtime alive.
#[derive(Clone)]
pub(crate) struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }
}

/// Releases the active slot on drop.
#[must_use = "the active slot is released when the guard is dropped"]
pub(crate) struct EvaluationGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        self.runtime.inner.active.borrow_mut().take();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
