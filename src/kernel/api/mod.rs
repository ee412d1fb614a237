//! Kernel primitives
//!
//! Every blocking operation a strand can perform is a `Command` frame that
//! suspends, registers a wakeup with the event loop or another strand, and
//! releases that registration on every exit path.

mod cooperate;
mod join;
mod sleep;
mod strand_ops;
mod timeout;

pub use cooperate::Cooperate;
pub use join::Join;
pub use sleep::Sleep;
pub use strand_ops::{CurrentStrand, Execute, StopKernel, TerminateStrand};
pub use timeout::Timeout;

use super::error::Exception;
use super::event_loop::EventLoop;
use super::strand::Resumer;
use super::value::Value;
use tracing::debug;

/// Deliver `result` through `resumer` on the next turn
///
/// Used when the wakeup originates inside another strand's tick, so one
/// strand's exit never runs another strand's frames on the same call stack.
pub(crate) fn resume_on_next_tick(event_loop: &dyn EventLoop, resumer: Resumer, result: Result<Value, Exception>) {
    event_loop.schedule_next_tick(Box::new(move || deliver(&resumer, result)));
}

/// Deliver `result` now, dropping it if the suspension already ended
pub(crate) fn deliver(resumer: &Resumer, result: Result<Value, Exception>) {
    if let Err(e) = resumer.resume(result) {
        debug!(strand = %resumer.strand().id(), error = %e, "dropped wakeup");
    }
}
