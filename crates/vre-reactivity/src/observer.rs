#![forbid(unsafe_code)]

//! Container observers and member interceptors.
//!
//! Observing a container makes it reactive:
//!
//! - an [`Object`] gets a [`PropertyHook`] on every own member, so reads
//!   record the member's [`Dep`] and writes notify it;
//! - an [`Array`] gets a [`MutationInterceptor`] so its mutating operations
//!   notify the array's structure registry, and every item is observed.
//!
//! Nested containers are observed before the member hook is installed, so a
//! structure is reactive all the way down before it is first read.
//!
//! # Invariants
//!
//! 1. `observe(v)` returns the same [`Observer`] for the same live container.
//! 2. The observer is registered before its members are walked, so
//!    self-referencing structures terminate.
//! 3. A member hook never tears down the child observer it replaces.

use std::fmt;
use std::rc::Rc;

use crate::array::{Array, MutationInterceptor, WeakArray};
use crate::dep::Dep;
use crate::runtime::Runtime;
use crate::value::{Object, Value, WeakObject};

#[derive(Clone)]
pub(crate) enum WeakContainer {
    Object(WeakObject),
    Array(WeakArray),
}

impl WeakContainer {
    fn upgrade(&self) -> Option<Value> {
        match self {
            Self::Object(object) => object.upgrade().map(Value::Object),
            Self::Array(array) => array.upgrade().map(Value::Array),
        }
    }
}

struct ObserverInner {
    dep: Dep,
    target: WeakContainer,
}

/// The observer attached to one container.
///
/// Its [`dep`](Observer::dep) carries structure-level notifications (items
/// inserted or removed, members added or deleted), distinct from the
/// registries of individual members.
#[derive(Clone)]
pub struct Observer {
    inner: Rc<ObserverInner>,
}

impl Observer {
    fn new(dep: Dep, target: WeakContainer) -> Self {
        Self {
            inner: Rc::new(ObserverInner { dep, target }),
        }
    }

    /// Structure-level registry.
    #[must_use]
    pub fn dep(&self) -> &Dep {
        &self.inner.dep
    }

    /// The observed container, if it is still alive.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.inner.target.upgrade()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.value().is_some()
    }

    /// Whether both handles refer to the same observer.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.inner.dep)
            .field("alive", &self.is_alive())
            .finish()
    }
}

pub(crate) fn observe(runtime: &Runtime, value: &Value) -> Option<Observer> {
    match value {
        Value::Object(object) if !object.is_frozen() => Some(observe_object(runtime, object)),
        Value::Array(array) => Some(observe_array(runtime, array)),
        _ => None,
    }
}

fn observe_object(runtime: &Runtime, object: &Object) -> Observer {
    if let Some(existing) = runtime.lookup_observer(object.id()) {
        return existing;
    }
    let observer = Observer::new(
        Dep::new(runtime),
        WeakContainer::Object(object.downgrade()),
    );
    runtime.register_observer(object.id(), observer.clone());
    tracing::debug!(
        runtime = %runtime.label(),
        dep_id = observer.dep().id().raw(),
        kind = "object",
        members = object.len(),
        "observer created"
    );
    walk(runtime, object);
    observer
}

fn observe_array(runtime: &Runtime, array: &Array) -> Observer {
    if let Some(existing) = runtime.lookup_observer(array.id()) {
        return existing;
    }
    let observer = Observer::new(Dep::new(runtime), WeakContainer::Array(array.downgrade()));
    runtime.register_observer(array.id(), observer.clone());
    tracing::debug!(
        runtime = %runtime.label(),
        dep_id = observer.dep().id().raw(),
        kind = "array",
        items = array.len_untracked(),
        "observer created"
    );
    array.install_interceptor(MutationInterceptor::new(observer.dep().clone()));
    observe_items(runtime, &array.items_untracked());
    observer
}

/// Install an interceptor on every own member.
fn walk(runtime: &Runtime, object: &Object) {
    for key in object.keys() {
        define_reactive(runtime, object, &key);
    }
}

pub(crate) fn observe_items(runtime: &Runtime, items: &[Value]) {
    for item in items {
        observe(runtime, item);
    }
}

/// Turn an existing member into an intercepted one.
///
/// A member that already has an interceptor is left as is.
pub(crate) fn define_reactive(runtime: &Runtime, object: &Object, key: &str) {
    if object.is_reactive(key) {
        return;
    }
    let Some(value) = object.raw_get(key) else {
        return;
    };
    let child = observe(runtime, &value);
    object.install_hook(
        key,
        PropertyHook {
            dep: Dep::new(runtime),
            child,
        },
    );
}

/// Read/write interception state of one object member.
#[derive(Clone)]
pub(crate) struct PropertyHook {
    dep: Dep,
    child: Option<Observer>,
}

impl PropertyHook {
    pub(crate) fn dep(&self) -> &Dep {
        &self.dep
    }

    pub(crate) fn set_child(&mut self, child: Option<Observer>) {
        self.child = child;
    }

    /// Read side: the member's registry, plus the nested container's
    /// structure registry so structural changes reach readers of the member.
    pub(crate) fn depend(&self) {
        self.dep.depend();
        if let Some(child) = &self.child {
            child.dep().depend();
        }
    }

    /// Write side, called once the value is known to differ.
    pub(crate) fn write(&self, object: &Object, key: &str, value: Value) {
        let child = self
            .dep
            .runtime()
            .and_then(|runtime| observe(&runtime, &value));
        object.store_intercepted(key, value, child);
        self.dep.notify();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
