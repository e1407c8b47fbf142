#![forbid(unsafe_code)]

//! Dynamic value model observed by the reactivity core.
//!
//! [`Value`] mirrors the value kinds a script host hands to the engine:
//! primitives plus two reference types, [`Object`] (keyed members in
//! insertion order) and [`Array`](crate::array::Array) (ordered items).
//! Reference types are shared handles; cloning a handle aliases the same
//! container, and identity is what `===` compares.
//!
//! # Tracking
//!
//! [`Object::get`] is the read hook of an intercepted member: it records the
//! member's registry (and the registry of a nested observer) with the watcher
//! currently evaluating. [`Object::set`] is the write hook. Members that were
//! never intercepted behave as plain storage.
//!
//! # Equality
//!
//! [`Value::strict_eq`] (and `PartialEq`) follow `===`: `NaN` is never equal
//! to itself, `0` equals `-0`, strings compare by content and containers by
//! identity.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::array::Array;
use crate::dep::Dep;
use crate::observer::PropertyHook;

/// Identity of a live container allocation.
///
/// Two handles with the same id alias the same container. Ids of dropped
/// containers may be reused by later allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(usize);

impl ContainerId {
    pub(crate) fn of<T>(rc: &Rc<T>) -> Self {
        Self(Rc::as_ptr(rc).cast::<()>() as usize)
    }

    /// Raw identity value.
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }
}

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Object),
    Array(Array),
}

impl Value {
    /// `===` comparison.
    #[must_use]
    pub fn strict_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// `undefined` or `null`.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Object or array.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    /// Identity of the container, if this value is one.
    #[must_use]
    pub fn container_id(&self) -> Option<ContainerId> {
        match self {
            Self::Object(object) => Some(object.id()),
            Self::Array(array) => Some(array.id()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The `typeof`-style name of this value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
        }
    }

    /// String conversion used by the default array sort order.
    ///
    /// Arrays join their items with `,`; an array reached again while it is
    /// being joined contributes an empty string.
    #[must_use]
    pub fn to_js_string(&self) -> String {
        let mut joining = Vec::new();
        self.write_js_string(&mut joining)
    }

    fn write_js_string(&self, joining: &mut Vec<ContainerId>) -> String {
        match self {
            Self::Undefined => "undefined".to_owned(),
            Self::Null => "null".to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.to_string(),
            Self::Object(_) => "[object Object]".to_owned(),
            Self::Array(array) => {
                let id = array.id();
                if joining.contains(&id) {
                    return String::new();
                }
                joining.push(id);
                let parts: Vec<String> = array
                    .items_untracked()
                    .iter()
                    .map(|item| {
                        if item.is_nullish() {
                            String::new()
                        } else {
                            item.write_js_string(joining)
                        }
                    })
                    .collect();
                joining.pop();
                parts.join(",")
            }
        }
    }

    /// Convert to JSON without recording any dependency.
    ///
    /// `undefined`, non-finite numbers and back-references into a container
    /// that is already being converted become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut stack = Vec::new();
        self.write_json(&mut stack)
    }

    fn write_json(&self, stack: &mut Vec<ContainerId>) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Undefined | Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => json_number(*n),
            Self::String(s) => Json::String(s.to_string()),
            Self::Object(object) => {
                let id = object.id();
                if stack.contains(&id) {
                    return Json::Null;
                }
                stack.push(id);
                let map = object
                    .entries_untracked()
                    .into_iter()
                    .map(|(key, value)| (key, value.write_json(stack)))
                    .collect();
                stack.pop();
                Json::Object(map)
            }
            Self::Array(array) => {
                let id = array.id();
                if stack.contains(&id) {
                    return Json::Null;
                }
                stack.push(id);
                let items = array
                    .items_untracked()
                    .iter()
                    .map(|item| item.write_json(stack))
                    .collect();
                stack.pop();
                Json::Array(items)
            }
        }
    }
}

fn json_number(n: f64) -> serde_json::Value {
    const EXACT: f64 = 9_007_199_254_740_992.0;
    if n.fract() == 0.0 && n.abs() <= EXACT {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_owned()
    } else if n == 0.0 {
        "0".to_owned()
    } else {
        n.to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Object(object) => object.fmt(f),
            Self::Array(array) => array.fmt(f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_js_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(Rc::from(value))
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Self::Object(value)
    }
}

impl From<Array> for Value {
    fn from(value: Array) -> Self {
        Self::Array(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Self::from(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Json::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

/// One keyed member: its value and, once observed, its interceptor.
struct Member {
    value: Value,
    hook: Option<PropertyHook>,
}

impl Member {
    fn plain(value: Value) -> Self {
        Self { value, hook: None }
    }
}

#[derive(Default)]
pub(crate) struct ObjectData {
    members: IndexMap<String, Member>,
    frozen: bool,
}

/// A keyed container with insertion-ordered members.
///
/// Cloning an `Object` creates a new handle to the **same** members.
#[derive(Clone, Default)]
pub struct Object {
    inner: Rc<RefCell<ObjectData>>,
}

impl Object {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of this object.
    #[must_use]
    pub fn id(&self) -> ContainerId {
        ContainerId::of(&self.inner)
    }

    /// Whether both handles alias the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read a member, recording dependencies if it is intercepted.
    ///
    /// Missing keys read as [`Value::Undefined`].
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        let (value, hook) = {
            let data = self.inner.borrow();
            match data.members.get(key) {
                Some(member) => (member.value.clone(), member.hook.clone()),
                None => return Value::Undefined,
            }
        };
        if let Some(hook) = hook {
            hook.depend();
        }
        value
    }

    /// Write a member.
    ///
    /// An intercepted member ignores a strictly equal value and otherwise
    /// notifies its subscribers. New keys are stored as plain members; use
    /// [`Runtime::set_property`](crate::Runtime::set_property) to add a
    /// reactive one. Writes to a frozen object are ignored.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let hook = {
            let data = self.inner.borrow();
            if data.frozen {
                tracing::debug!(key, "write to frozen object ignored");
                return;
            }
            match data.members.get(key) {
                Some(Member {
                    value: current,
                    hook: Some(hook),
                }) => {
                    if current.strict_eq(&value) {
                        return;
                    }
                    Some(hook.clone())
                }
                _ => None,
            }
        };
        match hook {
            Some(hook) => hook.write(self, key, value),
            None => {
                let mut data = self.inner.borrow_mut();
                match data.members.get_mut(key) {
                    Some(member) => member.value = value,
                    None => {
                        data.members.insert(key.to_owned(), Member::plain(value));
                    }
                }
            }
        }
    }

    /// Remove a member without notifying anyone.
    ///
    /// Use [`Runtime::delete_property`](crate::Runtime::delete_property) for a
    /// deletion that observers can see.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut data = self.inner.borrow_mut();
        if data.frozen {
            return None;
        }
        data.members.shift_remove(key).map(|member| member.value)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.borrow().members.contains_key(key)
    }

    /// Own keys in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.borrow().members.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().members.is_empty()
    }

    /// Freeze the object: later writes and removals are ignored and the
    /// object is never observed or deep-traversed.
    pub fn freeze(&self) {
        self.inner.borrow_mut().frozen = true;
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.inner.borrow().frozen
    }

    /// Registry backing an intercepted member.
    #[must_use]
    pub fn property_dep(&self, key: &str) -> Option<Dep> {
        let data = self.inner.borrow();
        data.members
            .get(key)
            .and_then(|member| member.hook.as_ref())
            .map(|hook| hook.dep().clone())
    }

    /// Whether the member has an interceptor installed.
    #[must_use]
    pub fn is_reactive(&self, key: &str) -> bool {
        self.inner
            .borrow()
            .members
            .get(key)
            .is_some_and(|member| member.hook.is_some())
    }

    pub(crate) fn raw_get(&self, key: &str) -> Option<Value> {
        self.inner
            .borrow()
            .members
            .get(key)
            .map(|member| member.value.clone())
    }

    pub(crate) fn entries_untracked(&self) -> Vec<(String, Value)> {
        self.inner
            .borrow()
            .members
            .iter()
            .map(|(key, member)| (key.clone(), member.value.clone()))
            .collect()
    }

    /// Install an interceptor on an existing member that has none.
    pub(crate) fn install_hook(&self, key: &str, hook: PropertyHook) -> bool {
        let mut data = self.inner.borrow_mut();
        match data.members.get_mut(key) {
            Some(member) if member.hook.is_none() => {
                member.hook = Some(hook);
                true
            }
            _ => false,
        }
    }

    /// Store a value behind an installed interceptor, replacing its child
    /// observer.
    pub(crate) fn store_intercepted(
        &self,
        key: &str,
        value: Value,
        child: Option<crate::observer::Observer>,
    ) {
        let mut data = self.inner.borrow_mut();
        if let Some(member) = data.members.get_mut(key) {
            member.value = value;
            if let Some(hook) = member.hook.as_mut() {
                hook.set_child(child);
            }
        }
    }

    pub(crate) fn downgrade(&self) -> WeakObject {
        WeakObject(Rc::downgrade(&self.inner))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let members = iter
            .into_iter()
            .map(|(key, value)| (key.into(), Member::plain(value.into())))
            .collect();
        Self {
            inner: Rc::new(RefCell::new(ObjectData {
                members,
                frozen: false,
            })),
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow: members may reference this object again.
        let data = self.inner.borrow();
        f.debug_struct("Object")
            .field("id", &self.id().raw())
            .field("keys", &data.members.keys().collect::<Vec<_>>())
            .field("frozen", &data.frozen)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakObject(Weak<RefCell<ObjectData>>);

impl WeakObject {
    pub(crate) fn upgrade(&self) -> Option<Object> {
        self.0.upgrade().map(|inner| Object { inner })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_eq_numbers() {
        assert!(!Value::from(f64::NAN).strict_eq(&Value::from(f64::NAN)));
        assert!(Value::from(0.0).strict_eq(&Value::from(-0.0)));
        assert!(Value::from(1).strict_eq(&Value::from(1.0)));
        assert!(!Value::from(1).strict_eq(&Value::from("1")));
    }

    #[test]
    fn strict_eq_containers_by_identity() {
        let a = Object::new();
        let b = Object::new();
        assert!(Value::from(a.clone()).strict_eq(&Value::from(a.clone())));
        assert!(!Value::from(a).strict_eq(&Value::from(b)));
    }

    #[test]
    fn undefined_and_null_differ() {
        assert_ne!(Value::Undefined, Value::Null);
        assert!(Value::Undefined.is_nullish());
        assert!(Value::Null.is_nullish());
        assert!(!Value::from(false).is_nullish());
    }

    #[test]
    fn missing_key_reads_undefined() {
        let object = Object::new();
        assert_eq!(object.get("nope"), Value::Undefined);
    }

    #[test]
    fn plain_set_and_get() {
        let object = Object::new();
        object.set("a", 1);
        object.set("b", "two");
        assert_eq!(object.get("a"), Value::from(1));
        assert_eq!(object.get("b").as_str(), Some("two"));
        assert_eq!(object.keys(), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn frozen_object_ignores_writes() {
        let object: Object = [("a", 1)].into_iter().collect();
        object.freeze();
        object.set("a", 2);
        object.set("b", 3);
        assert_eq!(object.get("a"), Value::from(1));
        assert!(!object.contains_key("b"));
        assert_eq!(object.remove("a"), None);
    }

    #[test]
    fn remove_keeps_order() {
        let object: Object = [("a", 1), ("b", 2), ("c", 3)].into_iter().collect();
        assert_eq!(object.remove("b"), Some(Value::from(2)));
        assert_eq!(object.keys(), vec!["a".to_owned(), "c".to_owned()]);
    }

    #[test]
    fn json_conversion_preserves_shape() {
        let source = json!({"a": {"b": [1, 2, {"c": null}]}, "d": "x"});
        let value = Value::from(source.clone());
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn to_json_cuts_cycles() {
        let object = Object::new();
        object.set("self", object.clone());
        assert_eq!(Value::from(object).to_json(), json!({"self": null}));
    }

    #[test]
    fn js_string_conversion() {
        assert_eq!(Value::from(3).to_js_string(), "3");
        assert_eq!(Value::from(1.5).to_js_string(), "1.5");
        assert_eq!(Value::from(f64::NAN).to_js_string(), "NaN");
        assert_eq!(Value::from(-0.0).to_js_string(), "0");
        assert_eq!(Value::from(Object::new()).to_js_string(), "[object Object]");
        let nested = Value::from(json!([1, [2, 3], null]));
        assert_eq!(nested.to_js_string(), "1,2,3,");
    }

    #[test]
    fn debug_is_shallow_for_cycles() {
        let object = Object::new();
        object.set("self", object.clone());
        let dbg = format!("{:?}", Value::from(object));
        assert!(dbg.contains("Object"));
        assert!(dbg.contains("self"));
    }
}
