//! Reactive Core
//!
//! This module implements dependency tracking: dependency nodes, the
//! watchers that subscribe to them, and the computed values and instances
//! built on top.
//!
//! # Concepts
//!
//! ## Dependency nodes
//!
//! A [`Dep`] stands for one observable slot: a reactive field, or the shape
//! of an observed container. Reading the slot while a watcher is evaluating
//! subscribes the watcher; changing it notifies every subscriber.
//!
//! ## Watchers
//!
//! A [`Watcher`] is a computation plus a callback. It re-collects its
//! dependencies on every evaluation, so conditional reads are tracked
//! precisely, and it is re-run through the batch scheduler when one of them
//! changes.
//!
//! ## Computed values
//!
//! A [`Computed`] is a lazy watcher behind an accessor: it caches its value
//! and re-evaluates only when read after an input changed.
//!
//! # Implementation Notes
//!
//! The active reader lives on a thread-local stack managed by
//! [`ReactiveContext`] guards. Dependency nodes hold weak references to
//! their subscribers and watchers hold the nodes, so the graph never owns
//! itself; teardown clears both sides.

mod computed;
mod context;
mod dep;
mod instance;
mod subscriber;
mod watcher;

pub use computed::Computed;
pub use context::ReactiveContext;
pub use dep::{Dep, DepId};
pub use instance::{Instance, InstanceId, WatchOptions};
pub use subscriber::{Subscriber, WatcherId};
pub use watcher::{Callback, Expression, Getter, Watcher, WatcherOptions};
