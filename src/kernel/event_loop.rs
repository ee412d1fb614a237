//! The event loop seam
//!
//! The kernel never waits on anything itself. Every wakeup (the first tick
//! of a new strand, a timer, a deferred resume) is a callback handed to an
//! `EventLoop`. The bundled implementation is `Reactor`; tests substitute
//! their own.

use super::error::Exception;
use std::time::Duration;

/// A callback run by the event loop
pub type Callback = Box<dyn FnOnce()>;

/// Cancels a timer created by `EventLoop::create_timer`
pub trait TimerHandle {
    /// Cancel the timer. Cancelling a fired or cancelled timer is a no-op.
    fn cancel(&self);
}

/// Minimal event loop interface the kernel runs on
pub trait EventLoop {
    /// Run `callback` on the next turn, after callbacks already queued
    fn schedule_next_tick(&self, callback: Callback);

    /// Run `callback` once `delay` has elapsed
    fn create_timer(&self, delay: Duration, callback: Callback) -> Box<dyn TimerHandle>;

    /// Run until stopped or idle
    fn run(&self) -> Result<(), Exception>;

    /// Make a `run` in progress return after the current callback
    fn stop(&self);
}
