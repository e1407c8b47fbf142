use thiserror::Error;

use crate::watcher::WatcherId;

pub type Result<T> = std::result::Result<T, ReactiveError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    #[error("re-entrant evaluation: {requested} started while {active} is evaluating")]
    ReentrantEvaluation {
        active: WatcherId,
        requested: WatcherId,
    },

    #[error("not a key-path: {path:?}")]
    InvalidKeyPath { path: String },
}

impl ReactiveError {
    /// Whether the error comes from evaluation order rather than bad input.
    #[must_use]
    pub fn is_reentrant(&self) -> bool {
        matches!(self, Self::ReentrantEvaluation { .. })
    }
}
