#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! Environment overrides (read by [`RuntimeConfig::from_env`]):
//!
//! | Variable              | Field                         |
//! |-----------------------|-------------------------------|
//! | `VRE_LABEL`           | `label`                       |
//! | `VRE_WATCH_DEEP`      | `default_watch.deep`          |
//! | `VRE_WATCH_IMMEDIATE` | `default_watch.immediate`     |
//!
//! Booleans accept `1`/`true`/`yes`/`on` and `0`/`false`/`no`/`off`; other
//! values leave the default in place.

use crate::watcher::WatchOptions;

pub const ENV_LABEL: &str = "VRE_LABEL";
pub const ENV_WATCH_DEEP: &str = "VRE_WATCH_DEEP";
pub const ENV_WATCH_IMMEDIATE: &str = "VRE_WATCH_IMMEDIATE";

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Name attached to the runtime's log events.
    pub label: String,
    /// Options used by `watch_path`/`watch_fn`.
    pub default_watch: WatchOptions,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            label: "vre".to_owned(),
            default_watch: WatchOptions::default(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `VRE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(label) = lookup(ENV_LABEL).filter(|label| !label.trim().is_empty()) {
            config.label = label.trim().to_owned();
        }
        if let Some(deep) = lookup(ENV_WATCH_DEEP).as_deref().and_then(parse_bool) {
            config.default_watch.deep = deep;
        }
        if let Some(immediate) = lookup(ENV_WATCH_IMMEDIATE).as_deref().and_then(parse_bool) {
            config.default_watch.immediate = immediate;
        }
        config
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_default_watch(mut self, options: WatchOptions) -> Self {
        self.default_watch = options;
        self
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
