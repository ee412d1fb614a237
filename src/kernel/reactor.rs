//! The bundled event loop
//!
//! A single-threaded reactor with two sources of work:
//! - next-tick callbacks, run in FIFO order
//! - timers, run in deadline order (ties broken by creation order)
//!
//! Each turn runs the callbacks that were queued when the turn began, then
//! every timer that is due. Callbacks queued during a turn wait for the next
//! one. When there is nothing queued the reactor sleeps until the earliest
//! deadline; with no timers either, `run` returns.

use super::clock::{Clock, SystemClock};
use super::error::{Exception, LoopError};
use super::event_loop::{Callback, EventLoop, TimerHandle};
use super::timer::{TimerId, TimerQueue};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{error, trace};

struct ReactorInner {
    clock: Rc<dyn Clock>,
    ticks: RefCell<VecDeque<Callback>>,
    timers: RefCell<TimerQueue<Callback>>,
    running: Cell<bool>,
    stop_requested: Cell<bool>,
}

/// Single-threaded event loop
#[derive(Clone)]
pub struct Reactor {
    inner: Rc<ReactorInner>,
}

impl Reactor {
    pub fn new() -> Self {
        Self::with_clock(Rc::new(SystemClock::new()))
    }

    /// A reactor driven by `clock`; pass a `ManualClock` for virtual time
    pub fn with_clock(clock: Rc<dyn Clock>) -> Self {
        Self {
            inner: Rc::new(ReactorInner {
                clock,
                ticks: RefCell::new(VecDeque::new()),
                timers: RefCell::new(TimerQueue::new()),
                running: Cell::new(false),
                stop_requested: Cell::new(false),
            }),
        }
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        self.inner.clock.clone()
    }

    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Number of queued next-tick callbacks
    pub fn pending_ticks(&self) -> usize {
        self.inner.ticks.borrow().len()
    }

    /// Number of timers that have neither fired nor been cancelled
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().pending_count()
    }

    fn turn(&self) -> Result<bool, LoopError> {
        let inner = &self.inner;

        let queued = inner.ticks.borrow().len();
        for _ in 0..queued {
            let callback = inner.ticks.borrow_mut().pop_front();
            let Some(callback) = callback else { break };
            invoke(callback)?;
            if inner.stop_requested.get() {
                return Ok(false);
            }
        }

        let now = inner.clock.now();
        loop {
            let callback = inner.timers.borrow_mut().pop_expired(now);
            let Some(callback) = callback else { break };
            invoke(callback)?;
            if inner.stop_requested.get() {
                return Ok(false);
            }
        }

        if !inner.ticks.borrow().is_empty() {
            return Ok(true);
        }

        let deadline = inner.timers.borrow_mut().next_deadline();
        match deadline {
            Some(deadline) => {
                trace!(?deadline, "reactor idle until next timer");
                inner.clock.sleep_until(deadline);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

fn invoke(callback: Callback) -> Result<(), LoopError> {
    catch_unwind(AssertUnwindSafe(callback)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(%message, "event loop callback panicked");
        LoopError::CallbackPanicked { message }
    })
}

impl EventLoop for Reactor {
    fn schedule_next_tick(&self, callback: Callback) {
        self.inner.ticks.borrow_mut().push_back(callback);
    }

    fn create_timer(&self, delay: Duration, callback: Callback) -> Box<dyn TimerHandle> {
        let now = self.inner.clock.now();
        let id = self.inner.timers.borrow_mut().schedule(delay, now, callback);
        Box::new(ReactorTimer {
            reactor: Rc::downgrade(&self.inner),
            id,
        })
    }

    fn run(&self) -> Result<(), Exception> {
        let inner = &self.inner;
        if inner.running.replace(true) {
            return Err(LoopError::AlreadyRunning.into());
        }
        inner.stop_requested.set(false);

        let result = loop {
            match self.turn() {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(e) => break Err(e.into()),
            }
        };

        inner.running.set(false);
        inner.stop_requested.set(false);
        result
    }

    fn stop(&self) {
        if self.inner.running.get() {
            self.inner.stop_requested.set(true);
        }
    }
}

struct ReactorTimer {
    reactor: Weak<ReactorInner>,
    id: TimerId,
}

impl TimerHandle for ReactorTimer {
    fn cancel(&self) {
        if let Some(reactor) = self.reactor.upgrade() {
            let callback = reactor.timers.borrow_mut().cancel(self.id);
            drop(callback);
        }
    }
}
