//! Batched Updates
//!
//! Watchers invalidated during one tick are not re-run on the spot. They are
//! handed to the [`Scheduler`], which runs them together in a single flush
//! on the next tick. The deferred-execution primitive behind that is in
//! [`tick`].

mod scheduler;
pub mod tick;

pub use scheduler::Scheduler;
pub use tick::{drain, next_tick, next_tick_async, run_loop, run_pending};
