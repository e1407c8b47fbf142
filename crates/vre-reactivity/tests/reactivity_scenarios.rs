//! End-to-end reactivity scenarios.
//!
//! Each test drives the public API the way a host templating layer would:
//! observe the data, subscribe with `watch*`, mutate, and check which
//! callbacks ran with which `(new, old)` pairs.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use vre_reactivity::{
    Array, Expression, Object, Observer, ReactiveError, Runtime, RuntimeConfig, Value,
    WatchOptions,
};

// ── Helpers ─────────────────────────────────────────────────────────────

type Calls = Rc<RefCell<Vec<(Value, Value)>>>;

fn recorder() -> (Calls, impl FnMut(&Value, &Value) + 'static) {
    let calls: Calls = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&calls);
    (calls, move |new: &Value, old: &Value| {
        sink.borrow_mut().push((new.clone(), old.clone()));
    })
}

fn observed(runtime: &Runtime, source: serde_json::Value) -> Value {
    let value = Value::from(source);
    runtime.observe(&value);
    value
}

fn object(value: &Value) -> &Object {
    value.as_object().expect("object value")
}

fn array(value: &Value) -> &Array {
    value.as_array().expect("array value")
}

// ═════════════════════════════════════════════════════════════════════════
// Observation
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn observe_twice_returns_same_observer() {
    let runtime = Runtime::new();
    let data = Value::from(json!({"a": {"b": [1, 2]}}));
    let first = runtime.observe(&data).expect("container");
    let second = runtime.observe(&data).expect("container");
    assert!(Observer::ptr_eq(&first, &second));

    let nested = object(&data).get("a");
    let nested_first = runtime.observer_of(&nested).expect("observed during walk");
    let nested_second = runtime.observe(&nested).expect("container");
    assert!(Observer::ptr_eq(&nested_first, &nested_second));
}

#[test]
fn observe_non_container_yields_nothing() {
    let runtime = Runtime::new();
    for value in [
        Value::Undefined,
        Value::Null,
        Value::from(true),
        Value::from(1.5),
        Value::from("text"),
    ] {
        assert!(runtime.observe(&value).is_none(), "{value:?}");
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Writes
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn equal_write_is_a_noop() {
    let runtime = Runtime::new();
    let data = observed(&runtime, json!({"a": 1}));
    let (calls, cb) = recorder();
    let _handle = runtime.watch_path(data.clone(), "a", cb).expect("watch");

    object(&data).set("a", 1);
    assert!(calls.borrow().is_empty());
}

#[test]
fn nan_write_counts_as_change_and_negative_zero_does_not() {
    let runtime = Runtime::new();
    let data = observed(&runtime, json!({"n": 0}));
    let (calls, cb) = recorder();
    let _handle = runtime.watch_path(data.clone(), "n", cb).expect("watch");

    object(&data).set("n", -0.0);
    assert!(calls.borrow().is_empty());

    object(&data).set("n", f64::NAN);
    object(&data).set("n", f64::NAN);
    assert_eq!(calls.borrow().len(), 2);
}

#[test]
fn same_container_write_is_a_noop() {
    let runtime = Runtime::new();
    let data = observed(&runtime, json!({"a": {"x": 1}}));
    let (calls, cb) = recorder();
    let _handle = runtime.watch_path(data.clone(), "a", cb).expect("watch");

    let same = object(&data).get("a");
    object(&data).set("a", same);
    assert!(calls.borrow().is_empty());

    // Structurally equal but a different container.
    object(&data).set("a", Value::from(json!({"x": 1})));
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn reading_twice_subscribes_once() {
    let runtime = Runtime::new();
    let data = observed(&runtime, json!({"a": 1}));
    let (calls, cb) = recorder();
    let handle = runtime
        .watch_fn(
            data.clone(),
            |root| {
                let object = root.as_object().expect("object");
                let first = object.get("a").as_number().unwrap_or_default();
                let second = object.get("a").as_number().unwrap_or_default();
                Value::from(first + second)
            },
            cb,
        )
        .expect("watch");
    assert_eq!(handle.watcher().dep_count(), 1);
    let dep = object(&data).property_dep("a").expect("intercepted");
    assert_eq!(dep.subscriber_count(), 1);

    object(&data).set("a", 2);
    assert_eq!(*calls.borrow(), vec![(Value::from(4), Value::from(2))]);
}

#[test]
fn subscribers_fire_in_subscription_order() {
    let runtime = Runtime::new();
    let data = observed(&runtime, json!({"a": 1}));
    let order = Rc::new(RefCell::new(Vec::new()));
    let handles: Vec<_> = ["first", "second", "third"]
        .into_iter()
        .map(|name| {
            let order = Rc::clone(&order);
            runtime
                .watch_path(data.clone(), "a", move |_, _| order.borrow_mut().push(name))
                .expect("watch")
        })
        .collect();

    object(&data).set("a", 2);
    assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    drop(handles);
}

// ═════════════════════════════════════════════════════════════════════════
// Arrays
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn push_notifies_length_watcher() {
    let runtime = Runtime::new();
    let list = observed(&runtime, json!([1, 2]));
    let (calls, cb) = recorder();
    let _handle = runtime
        .watch_fn(
            list.clone(),
            |root| Value::from(root.as_array().map_or(0, Array::len)),
            cb,
        )
        .expect("watch");

    assert_eq!(array(&list).push([Value::from(3)]), 3);
    assert_eq!(*calls.borrow(), vec![(Value::from(3), Value::from(2))]);
}

#[test]
fn pushed_container_becomes_reactive() {
    let runtime = Runtime::new();
    let list = observed(&runtime, json!([]));
    array(&list).push([Value::from(json!({"x": 1}))]);

    let item = array(&list).get(0);
    assert!(object(&item).is_reactive("x"));

    let (calls, cb) = recorder();
    let _handle = runtime.watch_path(item.clone(), "x", cb).expect("watch");
    object(&item).set("x", 2);
    assert_eq!(*calls.borrow(), vec![(Value::from(2), Value::from(1))]);
}

#[test]
fn every_mutating_operation_notifies_once() {
    let runtime = Runtime::new();
    let data = observed(&runtime, json!({"list": [3, 1, 2]}));
    let (calls, cb) = recorder();
    let _handle = runtime.watch_path(data.clone(), "list", cb).expect("watch");

    let list = object(&data).get("list");
    let list = array(&list);
    list.push([Value::from(4)]);
    list.pop();
    list.shift();
    list.unshift([Value::from(0)]);
    list.splice(1, 1, [Value::from(9), Value::from(8)]);
    list.sort();
    list.reverse();
    assert_eq!(calls.borrow().len(), 7);
    assert_eq!(
        list.to_vec(),
        vec![Value::from(9), Value::from(8), Value::from(2), Value::from(0)]
    );
}

#[test]
fn spliced_containers_become_reactive() {
    let runtime = Runtime::new();
    let list = observed(&runtime, json!([1, 2, 3]));
    let removed = array(&list).splice(1, 1, [Value::from(json!({"k": true}))]);
    assert_eq!(removed, vec![Value::from(2)]);
    let inserted = array(&list).get(1);
    assert!(object(&inserted).is_reactive("k"));
}

#[test]
fn index_assignment_is_invisible_but_set_item_is_not() {
    let runtime = Runtime::new();
    let data = observed(&runtime, json!({"list": [1, 2]}));
    let (calls, cb) = recorder();
    let _handle = runtime.watch_path(data.clone(), "list", cb).expect("watch");

    let list = object(&data).get("list");
    array(&list).set_index(0, 10);
    assert!(calls.borrow().is_empty());

    runtime.set_item(array(&list), 1, 20);
    assert_eq!(calls.borrow().len(), 1);
    assert_eq!(array(&list).to_vec(), vec![Value::from(10), Value::from(20)]);
}

// ═════════════════════════════════════════════════════════════════════════
// Deep watching
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn deep_watch_hears_nested_writes() {
    let runtime = Runtime::new();
    let data = observed(&runtime, json!({"a": {"b": 1}}));
    let (deep_calls, deep_cb) = recorder();
    let (shallow_calls, shallow_cb) = recorder();
    let _deep = runtime
        .watch(
            data.clone(),
            Expression::path("a").expect("valid"),
            deep_cb,
            WatchOptions::default().with_deep(true),
        )
        .expect("deep watch");
    let _shallow = runtime
        .watch_path(data.clone(), "a", shallow_cb)
        .expect("shallow watch");

    let a = object(&data).get("a");
    object(&a).set("b", 2);

    assert_eq!(deep_calls.borrow().len(), 1);
    let (new, old) = deep_calls.borrow()[0].clone();
    assert_eq!(new, a);
    assert_eq!(old, a);
    assert!(shallow_calls.borrow().is_empty());
}

#[test]
fn deep_watch_reaches_array_items() {
    let runtime = Runtime::new();
    let data = observed(&runtime, json!({"rows": [{"done": false}]}));
    let (calls, cb) = recorder();
    let _handle = runtime
        .watch(
            data.clone(),
            Expression::path("rows").expect("valid"),
            cb,
            WatchOptions::default().with_deep(true),
        )
        .expect("watch");

    let rows = object(&data).get("rows");
    let row = array(&rows).get(0);
    object(&row).set("done", true);
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn cyclic_structure_traversal_terminates() {
    let runtime = Runtime::new();
    let node = Object::new();
    node.set("self", node.clone());
    let value = Value::from(node.clone());
    runtime.observe(&value);
    assert_eq!(runtime.traverse(&value), 1);

    let (calls, cb) = recorder();
    let _handle = runtime
        .watch(
            value.clone(),
            Expression::path("self").expect("valid"),
            cb,
            WatchOptions::default().with_deep(true),
        )
        .expect("deep watch over a cycle");
    node.set("extra", 1);
    assert!(calls.borrow().is_empty());
}

// ═════════════════════════════════════════════════════════════════════════
// Lifecycle
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn teardown_stops_callbacks() {
    let runtime = Runtime::new();
    let data = observed(&runtime, json!({"a": 1}));
    let (calls, cb) = recorder();
    let handle = runtime.watch_path(data.clone(), "a", cb).expect("watch");

    object(&data).set("a", 2);
    handle.watcher().teardown();
    object(&data).set("a", 3);
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn immediate_option_runs_callback_at_subscription() {
    let runtime = Runtime::with_config(
        RuntimeConfig::default()
            .with_default_watch(WatchOptions::default().with_immediate(true)),
    );
    let data = observed(&runtime, json!({"a": "x"}));
    let (calls, cb) = recorder();
    let _handle = runtime.watch_path(data, "a", cb).expect("watch");
    assert_eq!(*calls.borrow(), vec![(Value::from("x"), Value::Undefined)]);
}

#[test]
fn missing_path_resolves_to_undefined_until_created() {
    let runtime = Runtime::new();
    let data = observed(&runtime, json!({"a": null}));
    let (calls, cb) = recorder();
    let handle = runtime.watch_path(data.clone(), "a.b", cb).expect("watch");
    assert_eq!(handle.value(), Value::Undefined);

    object(&data).set("a", Value::from(json!({"b": 5})));
    assert_eq!(*calls.borrow(), vec![(Value::from(5), Value::Undefined)]);
}

#[test]
fn set_and_delete_property_reach_parent_watchers() {
    let runtime = Runtime::new();
    let data = observed(&runtime, json!({"user": {}}));
    let (calls, cb) = recorder();
    let _handle = runtime
        .watch(
            data.clone(),
            Expression::path("user").expect("valid"),
            cb,
            WatchOptions::default().with_deep(true),
        )
        .expect("watch");

    let user = object(&data).get("user");
    runtime.set_property(object(&user), "name", "ada");
    assert_eq!(calls.borrow().len(), 1);

    // The new member is intercepted and the deep watcher now depends on it.
    object(&user).set("name", "grace");
    assert_eq!(calls.borrow().len(), 2);

    assert_eq!(
        runtime.delete_property(object(&user), "name"),
        Some(Value::from("grace"))
    );
    assert_eq!(calls.borrow().len(), 3);
}

// ═════════════════════════════════════════════════════════════════════════
// Re-entrancy
// ═════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct CaptureState {
    warnings: Vec<String>,
}

struct WarnCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl<S> Layer<S> for WarnCapture
where
    S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != tracing::Level::WARN {
            return;
        }
        struct V {
            message: String,
        }
        impl tracing::field::Visit for V {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.message = format!("{value:?}");
                }
            }
        }
        let mut visitor = V {
            message: String::new(),
        };
        event.record(&mut visitor);
        self.state
            .lock()
            .expect("capture lock")
            .warnings
            .push(visitor.message);
    }
}

#[test]
fn write_inside_getter_is_reported_not_misattributed() {
    let state = Arc::new(Mutex::new(CaptureState::default()));
    let subscriber = tracing_subscriber::registry().with(WarnCapture {
        state: Arc::clone(&state),
    });

    tracing::subscriber::with_default(subscriber, || {
        let runtime = Runtime::new();
        let data = observed(&runtime, json!({"source": 1, "mirror": 0}));
        let (mirror_calls, mirror_cb) = recorder();
        let _mirror = runtime
            .watch_path(data.clone(), "mirror", mirror_cb)
            .expect("watch mirror");

        let writer = runtime
            .watch_fn(
                data.clone(),
                |root| {
                    let object = root.as_object().expect("object");
                    let source = object.get("source");
                    object.set("mirror", source.clone());
                    source
                },
                |_, _| {},
            )
            .expect("watch writer");

        assert!(mirror_calls.borrow().is_empty());
        assert_eq!(writer.watcher().dep_count(), 1);
        assert!(!runtime.is_evaluating());
    });

    let warnings = &state.lock().expect("capture lock").warnings;
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("watcher update failed"));
}

#[test]
fn nested_watch_from_getter_fails_fast() {
    let runtime = Runtime::new();
    let data = observed(&runtime, json!({"a": 1}));
    let nested_error = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&nested_error);
    let inner = runtime.clone();
    let root = data.clone();
    let _outer = runtime
        .watch_fn(
            data,
            move |value| {
                if let Err(err) = inner.watch_path(root.clone(), "a", |_, _| {}) {
                    *slot.borrow_mut() = Some(err);
                }
                value.as_object().map(|o| o.get("a")).unwrap_or_default()
            },
            |_, _| {},
        )
        .expect("outer watch");

    let err = nested_error.borrow_mut().take().expect("nested watch failed");
    assert!(err.is_reentrant());
    assert!(matches!(err, ReactiveError::ReentrantEvaluation { .. }));
}
