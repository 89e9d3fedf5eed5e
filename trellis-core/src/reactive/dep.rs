//! Dependency Node
//!
//! A `Dep` is a publish point: one per observed field and one per observed
//! container (its structural node). It keeps an ordered set of subscribers
//! and notifies them, in subscription order, when the thing it stands for
//! changes.
//!
//! # Ownership
//!
//! Watchers own the deps they read (strong handles); deps only hold weak
//! back-references to their subscribers. Teardown clears both sides, and a
//! subscriber that was dropped without teardown is pruned on the next
//! notify.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::context::ReactiveContext;
use super::{Subscriber, WatcherId};

/// Unique identifier for a dependency node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepId(u64);

impl DepId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

struct DepInner {
    id: DepId,
    subscribers: RefCell<IndexMap<WatcherId, Weak<dyn Subscriber>>>,
}

/// A dependency node. Cloning shares the node.
#[derive(Clone)]
pub struct Dep(Rc<DepInner>);

impl Dep {
    /// Create a node with no subscribers.
    pub fn new() -> Self {
        Self(Rc::new(DepInner {
            id: DepId::next(),
            subscribers: RefCell::new(IndexMap::new()),
        }))
    }

    /// Get the node's unique id.
    pub fn id(&self) -> DepId {
        self.0.id
    }

    /// Append a subscriber unless it is already present.
    pub fn add_subscriber(&self, id: WatcherId, subscriber: Weak<dyn Subscriber>) {
        self.0
            .subscribers
            .borrow_mut()
            .entry(id)
            .or_insert(subscriber);
    }

    /// Remove a subscriber. No-op if it is not subscribed.
    pub fn remove_subscriber(&self, id: WatcherId) {
        self.0.subscribers.borrow_mut().shift_remove(&id);
    }

    /// Register this node with the active reader, if there is one.
    pub fn depend(&self) {
        if let Some(reader) = ReactiveContext::current() {
            reader.add_dependency(self);
        }
    }

    /// Call `update` on every subscriber, in subscription order.
    ///
    /// The subscriber list is snapshotted first, so subscribers added or
    /// removed as a side effect of this notification do not disturb it.
    pub fn notify(&self) {
        let snapshot: Vec<Weak<dyn Subscriber>> = {
            let mut subscribers = self.0.subscribers.borrow_mut();
            subscribers.retain(|_, weak| weak.strong_count() > 0);
            subscribers.values().cloned().collect()
        };

        for weak in snapshot {
            if let Some(subscriber) = weak.upgrade() {
                subscriber.update();
            }
        }
    }

    /// Whether `id` is currently subscribed.
    pub fn has_subscriber(&self, id: WatcherId) -> bool {
        self.0.subscribers.borrow().contains_key(&id)
    }

    /// Ids of the current subscribers, in subscription order.
    pub fn subscriber_ids(&self) -> Vec<WatcherId> {
        self.0.subscribers.borrow().keys().copied().collect()
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.0.subscribers.borrow().len()
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.0.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
