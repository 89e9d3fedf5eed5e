//! Runtime Configuration
//!
//! Process-wide knobs for batching and diagnostics. The configuration is
//! read on every enqueue and flush, so changes take effect for the next
//! cycle without restarting anything.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::config::Config;
//!
//! Config::update(|config| config.max_update_count = 50);
//! let loaded = Config::from_json(r#"{ "silent": true }"#)?;
//! Config::set(loaded);
//! ```

use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

static CONFIG: RwLock<Config> = parking_lot::const_rwlock(Config::DEFAULT);

/// How the deferred task queue is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TickMode {
    /// Drain as soon as the driver is woken.
    Microtask,

    /// Coarser fallback: wait this long after being woken before draining.
    Timer {
        /// Delay in milliseconds.
        millis: u64,
    },
}

impl TickMode {
    /// Delay the driver applies before draining a batch.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Microtask => None,
            Self::Timer { millis } => Some(Duration::from_millis(*millis)),
        }
    }
}

/// Global configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Batch watcher updates. When `false` every watcher behaves as `sync`.
    pub async_updates: bool,

    /// Suppress all diagnostics.
    pub silent: bool,

    /// Report errors thrown by computations and setters.
    pub warn_expression_errors: bool,

    /// How many times one watcher may be re-queued during a single flush
    /// before it is considered a runaway cycle.
    pub max_update_count: u32,

    /// Driver for the deferred task queue.
    pub tick_mode: TickMode,
}

impl Config {
    /// The built-in defaults.
    pub const DEFAULT: Config = Config {
        async_updates: true,
        silent: false,
        warn_expression_errors: true,
        max_update_count: 100,
        tick_mode: TickMode::Microtask,
    };

    /// Snapshot of the current configuration.
    pub fn get() -> Config {
        CONFIG.read().clone()
    }

    /// Replace the current configuration.
    pub fn set(config: Config) {
        *CONFIG.write() = config;
    }

    /// Modify the current configuration in place.
    pub fn update<F>(f: F)
    where
        F: FnOnce(&mut Config),
    {
        f(&mut CONFIG.write());
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(input: &str) -> Result<Config, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    pub(crate) fn async_updates() -> bool {
        CONFIG.read().async_updates
    }

    pub(crate) fn max_update_count() -> u32 {
        CONFIG.read().max_update_count
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}
