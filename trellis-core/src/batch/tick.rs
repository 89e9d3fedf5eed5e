//! Deferred Execution
//!
//! `next_tick` queues a task to run after the current synchronous work.
//! Tasks queued during one tick run together, in queue order, on the next;
//! tasks queued while a batch is running go to the batch after it.
//!
//! Nothing runs on its own. A host either drains the queue itself
//! ([`run_pending`], [`drain`]) or drives it with [`run_loop`] on a tokio
//! `LocalSet`. The loop sleeps on a [`Notify`] that is signalled when the
//! queue goes from empty to non-empty, so at most one wake-up is issued per
//! batch. With [`TickMode::Timer`](crate::config::TickMode) it also waits
//! for the configured delay before running the batch.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tokio::sync::{oneshot, Notify};

use crate::config::Config;

type Task = Box<dyn FnOnce()>;

thread_local! {
    static TASKS: RefCell<VecDeque<Task>> = const { RefCell::new(VecDeque::new()) };
    static WAKER: Rc<Notify> = Rc::new(Notify::new());
}

/// Queue `task` for the next tick.
pub fn next_tick<F>(task: F)
where
    F: FnOnce() + 'static,
{
    let first = TASKS.with(|tasks| {
        let mut tasks = tasks.borrow_mut();
        tasks.push_back(Box::new(task));
        tasks.len() == 1
    });
    if first {
        WAKER.with(|waker| waker.notify_one());
    }
}

/// Whether any task is waiting.
pub fn has_pending() -> bool {
    TASKS.with(|tasks| !tasks.borrow().is_empty())
}

/// Run the tasks queued so far and return how many ran.
pub fn run_pending() -> usize {
    let batch = TASKS.with(|tasks| std::mem::take(&mut *tasks.borrow_mut()));
    let count = batch.len();
    if count > 0 {
        tracing::trace!(tasks = count, "running tick");
    }
    for task in batch {
        task();
    }
    count
}

/// Run ticks until the queue stays empty and return how many tasks ran.
pub fn drain() -> usize {
    let mut total = 0;
    loop {
        match run_pending() {
            0 => return total,
            n => total += n,
        }
    }
}

/// Drive the queue forever. Spawn it with `tokio::task::spawn_local` and
/// abort the handle to stop it.
pub async fn run_loop() {
    let waker = WAKER.with(Rc::clone);
    loop {
        if !has_pending() {
            waker.notified().await;
        }
        if let Some(delay) = Config::get().tick_mode.delay() {
            tokio::time::sleep(delay).await;
        }
        run_pending();
        tokio::task::yield_now().await;
    }
}

/// Resolve once every task queued before this call has run. Needs
/// [`run_loop`] (or some other driver) to make progress.
pub async fn next_tick_async() {
    let (tx, rx) = oneshot::channel();
    next_tick(move || {
        let _ = tx.send(());
    });
    let _ = rx.await;
}
