#![forbid(unsafe_code)]

//! Deep traversal for `deep` watchers.
//!
//! Reading every reachable value through the tracking read paths makes the
//! evaluating watcher depend on all of it. Containers are visited once per
//! call: observed containers are keyed by their observer registry id,
//! unobserved ones by identity. Primitives and frozen objects are skipped.

use ahash::AHashSet;

use crate::dep::DepId;
use crate::runtime::Runtime;
use crate::value::{ContainerId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SeenKey {
    Observed(DepId),
    Plain(ContainerId),
}

pub(crate) fn traverse(runtime: &Runtime, value: &Value) -> usize {
    let mut seen = AHashSet::new();
    visit(runtime, value, &mut seen);
    seen.len()
}

fn visit(runtime: &Runtime, value: &Value, seen: &mut AHashSet<SeenKey>) {
    let Some(id) = value.container_id() else {
        return;
    };
    if value.as_object().is_some_and(|object| object.is_frozen()) {
        return;
    }
    let key = runtime
        .lookup_observer(id)
        .map_or(SeenKey::Plain(id), |observer| {
            SeenKey::Observed(observer.dep().id())
        });
    if !seen.insert(key) {
        return;
    }
    match value {
        Value::Object(object) => {
            for key in object.keys() {
                visit(runtime, &object.get(&key), seen);
            }
        }
        Value::Array(array) => {
            for index in (0..array.len()).rev() {
                visit(runtime, &array.get(index), seen);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
