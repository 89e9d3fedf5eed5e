//! Trellis Core
//!
//! This crate provides a reactive state-tracking engine. It observes mutable
//! data, records which computations read which pieces of it, and re-runs
//! only the affected computations when the data changes, batched into one
//! ordered flush per tick.
//!
//! It implements:
//!
//! - Observable data (objects and lists with intercepted reads and writes)
//! - Dependency tracking (dependency nodes, watchers, computed values)
//! - A batch scheduler with phase ordering and runaway-cycle protection
//! - A deferred task queue driven synchronously or by a tokio `LocalSet`
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `observe`: the `Value` model, observers, key paths and snapshots
//! - `reactive`: dependency nodes, watchers, computed values and instances
//! - `batch`: the scheduler and the deferred task queue
//! - `config`, `diagnostics`, `error`: the ambient plumbing
//!
//! Everything is single-threaded: values and watchers are `Rc`-based and
//! the scheduler is per thread.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::batch;
//! use trellis_core::observe::{Object, Value};
//! use trellis_core::reactive::{Instance, WatchOptions};
//!
//! let data = Value::from_json(serde_json::json!({ "a": 1, "b": { "c": 2 } }));
//! let vm = Instance::new(data.as_object().cloned().unwrap_or_default());
//!
//! vm.watch("b.c", |new, old| {
//!     println!("b.c: {old:?} -> {new:?}");
//!     Ok(())
//! }, WatchOptions::default());
//!
//! if let Value::Object(b) = vm.data().get("b") {
//!     b.set("c", 3);
//! }
//! batch::drain();
//! // prints: "b.c: 2 -> 3"
//! ```

pub mod batch;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod observe;
pub mod reactive;

pub use batch::{next_tick, Scheduler};
pub use config::Config;
pub use error::{CallbackError, EvalError, WatchError};
pub use observe::{List, Object, Value};
pub use reactive::{Computed, Instance, WatchOptions, Watcher, WatcherOptions};
