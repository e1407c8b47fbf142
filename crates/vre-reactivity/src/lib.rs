#![forbid(unsafe_code)]

//! Dependency-tracking reactivity for plain data.
//!
//! Observing a value graph installs interceptors on every reachable member
//! and array. Watchers evaluate a key-path or a computation against a root
//! value; every read made during that evaluation is recorded, and a later
//! write to any of those members re-runs the watcher and invokes its
//! callback with the new and previous values.
//!
//! - [`Runtime`]: the active-watcher slot, id allocation and the observer
//!   side-table. Every other handle belongs to one runtime.
//! - [`Dep`]: a registry of watchers interested in one member or container.
//! - [`Observer`]: the per-container record created by [`Runtime::observe`].
//! - [`Watcher`] / [`WatchHandle`]: a subscription and its RAII owner.
//! - [`Value`], [`Object`], [`Array`]: the data model, with JavaScript-style
//!   strict equality.
//!
//! # Architecture
//!
//! All handles are `Rc`-based and single-threaded. Registries hold watchers
//! weakly; a [`WatchHandle`] owns its watcher and tears it down on drop.
//! Observers are found through a side-table keyed by container identity, so
//! observed values carry no marker of their own.
//!
//! # Invariants
//!
//! 1. Observing a container twice yields the same [`Observer`].
//! 2. Writing a value strictly equal to the current one notifies nobody.
//! 3. A watcher is subscribed at most once to any registry, however often it
//!    reads the member.
//! 4. Only one watcher evaluates at a time; nested evaluation fails with
//!    [`ReactiveError::ReentrantEvaluation`].
//! 5. Deep traversal visits each container once, so cycles terminate.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use serde_json::json;
//! use vre_reactivity::{Runtime, Value};
//!
//! let runtime = Runtime::new();
//! let data = Value::from(json!({"user": {"name": "ada"}}));
//! runtime.observe(&data);
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let log = Rc::clone(&seen);
//! let _handle = runtime.watch_path(data.clone(), "user.name", move |new, old| {
//!     log.borrow_mut().push((new.to_js_string(), old.to_js_string()));
//! })?;
//!
//! let user = data.as_object().map(|root| root.get("user")).unwrap_or_default();
//! if let Some(user) = user.as_object() {
//!     user.set("name", "grace");
//! }
//! assert_eq!(*seen.borrow(), vec![("grace".to_owned(), "ada".to_owned())]);
//! # Ok::<(), vre_reactivity::ReactiveError>(())
//! ```

pub mod array;
pub mod config;
pub mod dep;
pub mod error;
pub mod observer;
pub mod path;
pub mod runtime;
mod traverse;
pub mod value;
pub mod watcher;

pub use array::{Array, ArrayMethod};
pub use config::RuntimeConfig;
pub use dep::{Dep, DepId};
pub use error::{ReactiveError, Result};
pub use observer::Observer;
pub use path::KeyPath;
pub use runtime::Runtime;
pub use value::{ContainerId, Object, Value};
pub use watcher::{Callback, Expression, WatchHandle, WatchOptions, Watcher, WatcherId};
