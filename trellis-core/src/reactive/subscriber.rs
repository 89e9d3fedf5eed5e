//! Subscriber types for the reactive system.
//!
//! A Subscriber is anything a [`Dep`](super::Dep) can notify: in practice a
//! [`Watcher`](super::Watcher), but the dependency node only sees this trait.

use std::sync::atomic::{AtomicU64, Ordering};

use super::Dep;

/// Unique identifier for a subscriber.
///
/// Ids are handed out in creation order. The scheduler relies on that:
/// a lower id was created earlier and is flushed first, which keeps
/// ancestors ahead of the descendants they create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Generate a new unique id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WatcherId {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber to dependency nodes.
pub trait Subscriber {
    /// The subscriber's id, used for set membership in dependency nodes.
    fn id(&self) -> WatcherId;

    /// One of the subscriber's dependencies changed.
    fn update(&self);

    /// Record that `dep` was read while this subscriber was the active
    /// reader.
    fn add_dependency(&self, dep: &Dep);
}
