//! Reactive Context
//!
//! The reactive context tracks which watcher is currently evaluating.
//! This enables automatic dependency tracking: when an observed field is
//! read, the dependency node asks the context for the active reader and
//! subscribes it.
//!
//! # Implementation
//!
//! We use a thread-local stack. Evaluating a watcher pushes it and the
//! returned guard pops it, so a computed value evaluated while another
//! watcher is active hands the slot back to the outer watcher afterwards.
//! Callbacks run under an [`untracked`](ReactiveContext::untracked) entry so
//! that whatever they read is never attributed to an enclosing watcher.

use std::cell::RefCell;
use std::rc::Rc;

use super::{Subscriber, WatcherId};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Option<Rc<dyn Subscriber>>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub struct ReactiveContext {
    subscriber_id: Option<WatcherId>,
}

impl ReactiveContext {
    /// Make `subscriber` the active reader until the guard is dropped.
    pub fn enter(subscriber: Rc<dyn Subscriber>) -> Self {
        let subscriber_id = Some(subscriber.id());
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Some(subscriber)));
        Self { subscriber_id }
    }

    /// Suspend tracking until the guard is dropped.
    pub fn untracked() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(None));
        Self {
            subscriber_id: None,
        }
    }

    /// Check if a reader is currently active.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }

    /// The active reader, if any.
    pub fn current() -> Option<Rc<dyn Subscriber>> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned().flatten())
    }

    /// Id of the active reader, if any.
    pub fn current_subscriber() -> Option<WatcherId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .and_then(|entry| entry.as_ref().map(|s| s.id()))
        })
    }

    /// Number of entries on the stack, tracked or not.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        // Catch mismatched guards early.
        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.as_ref().map(|s| s.id()),
                self.subscriber_id,
                "ReactiveContext mismatch"
            );
        }
    }
}
