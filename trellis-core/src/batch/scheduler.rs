//! Update Scheduler
//!
//! The scheduler coalesces every watcher invalidated within one tick into a
//! single flush.
//!
//! # Algorithm
//!
//! 1. `enqueue` marks the watcher pending (repeat calls are no-ops) and
//!    appends it to the internal queue, or to the user queue for user
//!    watchers. The first enqueue of a cycle schedules a flush with
//!    [`next_tick`].
//!
//! 2. The flush sorts both queues by watcher id, so watchers enqueued in the
//!    same tick run in creation order, then runs the internal queue to
//!    completion before starting the user queue. Both are walked by live
//!    index: watchers enqueued mid-flush are appended and still run.
//!
//! 3. An internal watcher invalidated by a user callback is inserted right
//!    after the running user watcher, so it settles before the next user
//!    callback sees the state.
//!
//! 4. A watcher re-marked pending more than `max_update_count` times in one
//!    flush is halted for the rest of it and a diagnostic is reported once.
//!
//! 5. Everything is reset at the end of the flush, even if a watcher
//!    panicked.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use super::tick::next_tick;
use crate::config::Config;
use crate::diagnostics;
use crate::error::WatchError;
use crate::reactive::{Watcher, WatcherId};

#[derive(Default)]
struct Batcher {
    queue: Vec<Watcher>,
    user_queue: Vec<Watcher>,
    pending: HashSet<WatcherId>,
    circular: HashMap<WatcherId, u32>,
    halted: HashSet<WatcherId>,
    waiting: bool,
    flushing: bool,
    internal_depleted: bool,
    insert_at: usize,
}

thread_local! {
    static BATCHER: RefCell<Batcher> = RefCell::new(Batcher::default());
    static UNHANDLED: RefCell<Vec<WatchError>> = const { RefCell::new(Vec::new()) };
}

enum Enqueued {
    Queued { schedule: bool },
    AlreadyPending,
    Halted,
    Runaway,
}

#[derive(Clone, Copy)]
enum Phase {
    Internal,
    User,
}

/// The batch scheduler for this thread.
pub struct Scheduler;

impl Scheduler {
    /// Queue a watcher for the next flush.
    pub fn enqueue(watcher: &Watcher) {
        let id = watcher.id();
        let user = watcher.is_user();
        let max_updates = Config::max_update_count();

        let outcome = BATCHER.with(|batcher| {
            let mut b = batcher.borrow_mut();
            if b.halted.contains(&id) {
                return Enqueued::Halted;
            }
            if b.pending.contains(&id) {
                return Enqueued::AlreadyPending;
            }

            if b.flushing {
                let count = b.circular.entry(id).or_insert(0);
                *count += 1;
                if *count > max_updates {
                    b.halted.insert(id);
                    return Enqueued::Runaway;
                }
            }

            b.pending.insert(id);
            if b.internal_depleted && !user {
                let at = b.insert_at.min(b.user_queue.len());
                b.user_queue.insert(at, watcher.clone());
                b.insert_at = at + 1;
            } else if user {
                b.user_queue.push(watcher.clone());
            } else {
                b.queue.push(watcher.clone());
            }

            let schedule = !b.waiting;
            b.waiting = true;
            Enqueued::Queued { schedule }
        });

        match outcome {
            Enqueued::Queued { schedule } => {
                tracing::trace!(watcher = id.raw(), user, "watcher queued");
                if schedule {
                    next_tick(Scheduler::flush);
                }
            }
            Enqueued::AlreadyPending => {}
            Enqueued::Halted => watcher.clear_queued(),
            Enqueued::Runaway => {
                watcher.clear_queued();
                diagnostics::report(
                    format!(
                        "you may have an infinite update loop for watcher with expression \"{}\"",
                        watcher.source()
                    ),
                    watcher.owner(),
                );
            }
        }
    }

    /// Run every queued watcher: internal ones first, then user ones.
    ///
    /// Normally invoked through [`next_tick`]; calling it directly flushes
    /// synchronously.
    pub fn flush() {
        let _reset = ResetOnDrop;

        let (internal, user) = BATCHER.with(|batcher| {
            let mut b = batcher.borrow_mut();
            b.flushing = true;
            b.queue.sort_by_key(Watcher::id);
            b.user_queue.sort_by_key(Watcher::id);
            (b.queue.len(), b.user_queue.len())
        });
        tracing::debug!(internal, user, "flush started");

        let mut ran = Self::run_queue(Phase::Internal);
        BATCHER.with(|batcher| batcher.borrow_mut().internal_depleted = true);
        ran += Self::run_queue(Phase::User);

        tracing::debug!(ran, "flush finished");
    }

    fn run_queue(phase: Phase) -> usize {
        let mut index = 0;
        let mut ran = 0;
        loop {
            let next = BATCHER.with(|batcher| {
                let mut b = batcher.borrow_mut();
                let watcher = match phase {
                    Phase::Internal => b.queue.get(index).cloned(),
                    Phase::User => b.user_queue.get(index).cloned(),
                }?;
                let id = watcher.id();
                b.pending.remove(&id);
                b.insert_at = index + 1;
                Some((watcher, b.halted.contains(&id)))
            });
            let Some((watcher, halted)) = next else {
                break;
            };

            if halted {
                watcher.clear_queued();
            } else {
                watcher.run();
                ran += 1;
            }
            index += 1;
        }
        ran
    }

    /// Whether a flush is in progress.
    pub fn is_flushing() -> bool {
        BATCHER.with(|batcher| batcher.borrow().flushing)
    }

    /// Whether a flush has been scheduled and not finished yet.
    pub fn is_waiting() -> bool {
        BATCHER.with(|batcher| batcher.borrow().waiting)
    }

    /// Number of watchers marked pending.
    pub fn pending_len() -> usize {
        BATCHER.with(|batcher| batcher.borrow().pending.len())
    }

    /// Deliver a callback failure on a later tick, so the current flush can
    /// carry on.
    pub(crate) fn escalate(error: WatchError) {
        next_tick(move || {
            tracing::error!(error = %error, "watcher callback failed");
            UNHANDLED.with(|errors| errors.borrow_mut().push(error));
        });
    }

    /// Take the callback failures delivered so far on this thread.
    pub fn take_unhandled_errors() -> Vec<WatchError> {
        UNHANDLED.with(|errors| std::mem::take(&mut *errors.borrow_mut()))
    }
}

struct ResetOnDrop;

impl Drop for ResetOnDrop {
    fn drop(&mut self) {
        let stale = BATCHER.with(|batcher| std::mem::take(&mut *batcher.borrow_mut()));
        drop(stale);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
