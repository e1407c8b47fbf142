#![forbid(unsafe_code)]

//! Dotted key-path resolution (`"a.b.c"`).
//!
//! A [`KeyPath`] is compiled once and then resolved against a root value on
//! every evaluation. Resolution goes through the tracking read paths, so a
//! watcher resolving `a.b.c` depends on each member along the way.
//!
//! Paths may only contain ASCII word characters, `.` and `$`. Anything else
//! is not a key-path and [`KeyPath::parse`] rejects it.

use std::fmt;

use crate::value::Value;

/// A compiled key-path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    source: String,
    segments: Vec<String>,
}

impl KeyPath {
    /// Compile `path`, or `None` if it contains a character outside
    /// `[A-Za-z0-9_.$]`.
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        if !path.chars().all(is_path_char) {
            return None;
        }
        Some(Self {
            source: path.to_owned(),
            segments: path.split('.').map(str::to_owned).collect(),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Read the addressed value off `root`.
    ///
    /// A nullish intermediate value or a missing member yields
    /// [`Value::Undefined`].
    #[must_use]
    pub fn resolve(&self, root: &Value) -> Value {
        let mut current = root.clone();
        for segment in &self.segments {
            if current.is_nullish() {
                return Value::Undefined;
            }
            current = member(&current, segment);
        }
        current
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$')
}

fn member(value: &Value, segment: &str) -> Value {
    match value {
        Value::Object(object) => object.get(segment),
        Value::Array(array) => {
            if segment == "length" {
                Value::from(array.len())
            } else {
                parse_index(segment).map_or(Value::Undefined, |index| array.get(index))
            }
        }
        Value::String(s) if segment == "length" => Value::from(s.encode_utf16().count()),
        _ => Value::Undefined,
    }
}

/// Canonical array index: decimal digits without a leading zero.
fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || (segment.len() > 1 && segment.starts_with('0')) {
        return None;
    }
    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
