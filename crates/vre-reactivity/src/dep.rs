#![forbid(unsafe_code)]

//! Dependency registries.
//!
//! A [`Dep`] is the set of watchers interested in one observed member (or in
//! the structure of one observed container). Watchers join a registry while
//! they evaluate and are updated, in join order, when it notifies.
//!
//! # Invariants
//!
//! 1. A watcher appears at most once per registry.
//! 2. [`Dep::notify`] iterates a snapshot: a watcher joining during
//!    notification waits for the next pass, and one torn down during it is
//!    skipped.
//! 3. Ids are unique and increase monotonically within one [`Runtime`].
//!
//! # Failure Modes
//!
//! - **Watcher dropped**: registries hold watchers weakly. A dropped watcher
//!   is skipped during notification and pruned on the next join.
//! - **Update fails**: the failure is logged and the remaining watchers are
//!   still updated.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::runtime::{Runtime, WeakRuntime};
use crate::watcher::{WeakWatcher, Watcher};

/// Unique registry id, allocated by the owning [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(u64);

impl DepId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dep#{}", self.0)
    }
}

struct DepInner {
    id: DepId,
    runtime: WeakRuntime,
    subscribers: RefCell<Vec<WeakWatcher>>,
}

/// A dependency registry.
///
/// Cloning a `Dep` creates a new handle to the **same** registry.
#[derive(Clone)]
pub struct Dep {
    inner: Rc<DepInner>,
}

impl Dep {
    /// Create a registry owned by `runtime`.
    #[must_use]
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            inner: Rc::new(DepInner {
                id: runtime.next_dep_id(),
                runtime: runtime.downgrade(),
                subscribers: RefCell::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> DepId {
        self.inner.id
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .borrow()
            .iter()
            .filter(|sub| sub.is_alive())
            .count()
    }

    /// Whether `watcher` is subscribed.
    #[must_use]
    pub fn has_subscriber(&self, watcher: &Watcher) -> bool {
        self.inner
            .subscribers
            .borrow()
            .iter()
            .any(|sub| sub.is(watcher))
    }

    /// Append `watcher` unless it is already subscribed.
    pub(crate) fn add_subscriber(&self, watcher: &Watcher) {
        let mut subscribers = self.inner.subscribers.borrow_mut();
        subscribers.retain(WeakWatcher::is_alive);
        if !subscribers.iter().any(|sub| sub.is(watcher)) {
            subscribers.push(watcher.downgrade());
        }
    }

    /// Remove the first entry for `watcher`; no-op if absent.
    pub(crate) fn remove_subscriber(&self, watcher: &Watcher) {
        let mut subscribers = self.inner.subscribers.borrow_mut();
        if let Some(index) = subscribers.iter().position(|sub| sub.is(watcher)) {
            subscribers.remove(index);
        }
    }

    /// Record this registry as a dependency of the watcher currently
    /// evaluating, if any.
    pub fn depend(&self) {
        let Some(runtime) = self.runtime() else {
            return;
        };
        if let Some(watcher) = runtime.active_watcher() {
            watcher.add_dep(self);
        }
    }

    /// Update every subscriber, in join order.
    pub fn notify(&self) {
        let subscribers: Vec<WeakWatcher> = self.inner.subscribers.borrow().clone();
        tracing::trace!(
            dep_id = self.inner.id.raw(),
            subscribers = subscribers.len(),
            "dep notify"
        );
        for sub in subscribers {
            let Some(watcher) = sub.upgrade() else {
                continue;
            };
            if let Err(err) = watcher.update() {
                tracing::warn!(
                    dep_id = self.inner.id.raw(),
                    watcher_id = watcher.id().raw(),
                    error = %err,
                    "watcher update failed"
                );
            }
        }
    }

    pub(crate) fn runtime(&self) -> Option<Runtime> {
        self.inner.runtime.upgrade()
    }
}

impl PartialEq for Dep {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Dep {}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.inner.id)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
