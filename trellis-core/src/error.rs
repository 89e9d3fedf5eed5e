//! Error types.
//!
//! None of these ever escape the flush loop. Evaluation errors are reported
//! and turn into `Value::Undefined`; callback errors are escalated to the
//! next tick. They are public so hosts can inspect what was reported.

use thiserror::Error;

/// An error raised while evaluating (or assigning through) a watcher's
/// computation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// A key was read from `undefined` or `null`.
    #[error("cannot read property `{key}` of {base}")]
    UndefinedBase {
        /// The key that was being read.
        key: String,
        /// `"undefined"` or `"null"`.
        base: &'static str,
    },

    /// A string expression could not be parsed as a key path.
    #[error("invalid path expression `{expression}`: {reason}")]
    InvalidPath {
        /// The offending source text.
        expression: String,
        /// What the parser tripped over.
        reason: String,
    },

    /// The computation has no setter (function getters, computed values
    /// created without one).
    #[error("expression `{0}` has no setter")]
    NoSetter(String),

    /// A user getter failed.
    #[error("{0}")]
    Custom(String),
}

impl EvalError {
    /// Build a custom evaluation error from any message.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

/// The error type returned by watcher callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self(message.to_owned())
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// A callback failure captured during a flush and delivered on a later tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    /// The callback returned an error.
    #[error("callback for watcher `{expression}` failed: {source}")]
    Callback {
        /// Source expression of the watcher.
        expression: String,
        /// What the callback returned.
        #[source]
        source: CallbackError,
    },

    /// The callback panicked.
    #[error("callback for watcher `{expression}` panicked: {message}")]
    Panicked {
        /// Source expression of the watcher.
        expression: String,
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Failure to load a [`Config`](crate::config::Config).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The input was not valid JSON for the config schema.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failure to export or import a [`Value`](crate::observe::Value).
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The value refers back to one of its own ancestors.
    #[error("value contains a reference cycle")]
    Cycle,

    /// JSON encoding or decoding failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding failed.
    #[error("msgpack: {0}")]
    MsgPack(#[from] rmp_serde::encode::Error),
}
