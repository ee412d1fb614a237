//! The kernel - strand scheduling over an event loop
//!
//! The kernel owns an event loop and the set of live strands. It never runs
//! strand code itself: `execute` schedules a strand's first tick on the loop,
//! and every later tick is a loop callback (a timer, a deferred resume).
//!
//! Failure model:
//! - a strand whose exception nobody observes panics the kernel
//! - a failure of the loop itself panics the kernel
//! - a panic stops the loop and is returned from `run`

pub mod api;
pub mod clock;
pub mod command;
pub mod config;
pub mod coroutine;
pub mod error;
pub mod event_loop;
pub mod reactor;
pub mod strand;
pub mod timer;
pub mod value;

pub use api::{Cooperate, CurrentStrand, Execute, Join, Sleep, StopKernel, TerminateStrand, Timeout};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, Immediate, Source};
pub use config::{ConfigError, KernelConfig, StopPolicy};
pub use coroutine::{Api, Coroutine, CoroutineFrame, Resume, Step};
pub use error::{Exception, KernelPanic, KernelStopped, LoopError, StrandError, StrandException, StrandResult, TimedOut};
pub use event_loop::{Callback, EventLoop, TimerHandle};
pub use reactor::Reactor;
pub use strand::{ObserverId, Resumer, Strand, StrandExit, StrandId, StrandInfo, StrandState};
pub use value::Value;

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, error, warn};

pub(crate) struct KernelShared {
    event_loop: Rc<dyn EventLoop>,
    config: KernelConfig,
    strands: RefCell<BTreeMap<StrandId, Strand>>,
    next_id: Cell<u64>,
    running: Cell<bool>,
    stopping: Cell<bool>,
    panic: RefCell<Option<KernelPanic>>,
}

/// Schedules strands on an event loop
///
/// `Kernel` is a cheap handle; clones refer to the same kernel.
#[derive(Clone)]
pub struct Kernel {
    shared: Rc<KernelShared>,
}

impl Kernel {
    /// A kernel on a fresh `Reactor` with the system clock
    pub fn new() -> Self {
        Self::with_event_loop(Rc::new(Reactor::new()))
    }

    pub fn with_event_loop(event_loop: Rc<dyn EventLoop>) -> Self {
        Self::with_config(KernelConfig::default(), event_loop)
    }

    pub fn with_config(config: KernelConfig, event_loop: Rc<dyn EventLoop>) -> Self {
        Self {
            shared: Rc::new(KernelShared {
                event_loop,
                config,
                strands: RefCell::new(BTreeMap::new()),
                next_id: Cell::new(1),
                running: Cell::new(false),
                stopping: Cell::new(false),
                panic: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Rc<KernelShared>) -> Self {
        Self { shared }
    }

    pub fn event_loop(&self) -> Rc<dyn EventLoop> {
        self.shared.event_loop.clone()
    }

    pub fn config(&self) -> KernelConfig {
        self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.get()
    }

    /// Look up a live strand
    pub fn strand(&self, id: StrandId) -> Option<Strand> {
        self.shared.strands.borrow().get(&id).cloned()
    }

    /// Number of strands that have not exited
    pub fn strand_count(&self) -> usize {
        self.shared.strands.borrow().len()
    }

    /// Create a strand for `source`
    ///
    /// The strand does nothing until its first tick, which is scheduled on
    /// the event loop rather than run on the caller's stack.
    pub fn execute(&self, source: impl Into<Source>) -> Strand {
        let id = StrandId(self.shared.next_id.get());
        self.shared.next_id.set(id.0 + 1);

        let strand = Strand::new(id, Rc::downgrade(&self.shared), source.into().into_command());
        self.shared.strands.borrow_mut().insert(id, strand.clone());
        debug!(strand = %id, "strand created");

        let first_tick = strand.clone();
        self.shared
            .event_loop
            .schedule_next_tick(Box::new(move || first_tick.start()));
        strand
    }

    /// Run the event loop until it is stopped or runs out of work
    ///
    /// Once the loop has stopped, strands still suspended are handled per
    /// `KernelConfig::stop_policy`. A loop failure, or an unhandled strand
    /// exception, is returned as a `KernelPanic`.
    pub fn run(&self) -> Result<(), KernelPanic> {
        let shared = &self.shared;
        if shared.running.get() {
            warn!("kernel is already running");
            return Ok(());
        }
        if let Some(panic) = shared.panic.borrow_mut().take() {
            return Err(panic);
        }

        shared.running.set(true);
        debug!("kernel running");
        let result = shared.event_loop.run();

        if result.is_ok() && shared.stopping.get() {
            self.halt_pending();
        }
        shared.running.set(false);
        shared.stopping.set(false);
        debug!("kernel stopped");

        if let Err(cause) = result {
            error!(%cause, "event loop failed");
            return Err(KernelPanic::EventLoop(cause));
        }
        match shared.panic.borrow_mut().take() {
            Some(panic) => Err(panic),
            None => Ok(()),
        }
    }

    /// Ask a running kernel to stop after the current callback
    ///
    /// Idempotent, and a no-op when the kernel is not running.
    pub fn stop(&self) {
        let shared = &self.shared;
        if !shared.running.get() || shared.stopping.replace(true) {
            return;
        }
        debug!("kernel stop requested");
        shared.event_loop.stop();
    }

    fn halt_pending(&self) {
        let policy = self.shared.config.stop_policy;
        let pending: Vec<Strand> = self
            .shared
            .strands
            .borrow()
            .values()
            .filter(|s| s.state() == StrandState::Suspended)
            .cloned()
            .collect();

        for strand in pending {
            // An earlier strand's cleanup may have finished this one
            if strand.state() != StrandState::Suspended {
                continue;
            }
            debug!(strand = %strand.id(), ?policy, "halting pending strand");
            match policy {
                StopPolicy::Notify => {
                    if let Err(e) = strand.resume_with_exception(KernelStopped.into()) {
                        warn!(strand = %strand.id(), error = %e, "could not notify strand");
                    }
                }
                StopPolicy::Terminate => strand.terminate(),
            }
        }
    }

    /// Terminate every live strand
    pub fn shutdown(&self) {
        let strands: Vec<Strand> = self.shared.strands.borrow().values().cloned().collect();
        for strand in strands {
            strand.terminate();
        }
    }

    /// Called by a strand as it exits, before its observers run
    pub(crate) fn strand_exited(&self, strand: &Strand, exit: &StrandExit, observed: bool) {
        self.shared.strands.borrow_mut().remove(&strand.id());

        let StrandExit::Threw(cause) = exit else { return };
        if observed || cause.is::<KernelStopped>() {
            return;
        }

        let exception = StrandException::new(strand.clone(), cause.clone());
        error!(%exception, "unhandled strand exception");
        {
            let mut panic = self.shared.panic.borrow_mut();
            if panic.is_none() {
                *panic = Some(KernelPanic::UnhandledException(exception));
            }
        }
        self.stop();
    }

    /// A serialisable view of the kernel's state
    pub fn snapshot(&self) -> KernelSnapshot {
        KernelSnapshot {
            running: self.is_running(),
            strands: self.shared.strands.borrow().values().map(Strand::info).collect(),
        }
    }

    /// Run `source` on a fresh kernel until it exits, then tear down
    ///
    /// Returns the strand's value, or the very exception it threw. If the
    /// kernel stops before the strand exits, fails with `KernelStopped`; a
    /// kernel panic is returned as the error.
    pub fn start(source: impl Into<Source>, event_loop: Option<Rc<dyn EventLoop>>) -> Result<Value, Exception> {
        let kernel = match event_loop {
            Some(event_loop) => Kernel::with_event_loop(event_loop),
            None => Kernel::new(),
        };
        kernel.start_strand(source)
    }

    /// Like `start`, on this kernel
    pub fn start_strand(&self, source: impl Into<Source>) -> Result<Value, Exception> {
        let outcome: Rc<RefCell<Option<(StrandExit, bool)>>> = Rc::default();

        let strand = self.execute(source);
        let slot = outcome.clone();
        strand.on_exit(move |strand, exit| {
            let kernel = strand.kernel().ok();
            let halted = kernel.as_ref().is_some_and(|k| k.shared.stopping.get());
            *slot.borrow_mut() = Some((exit.clone(), halted));
            if let Some(kernel) = kernel {
                kernel.stop();
            }
        });

        let result = self.run();
        self.shutdown();
        result?;

        let outcome = outcome.borrow_mut().take();
        match outcome {
            Some((StrandExit::Returned(value), _)) => Ok(value),
            Some((StrandExit::Threw(exception), _)) => Err(exception),
            Some((StrandExit::Terminated, true)) | None => Err(KernelStopped.into()),
            Some((StrandExit::Terminated, false)) => Err(StrandError::Terminated { id: strand.id() }.into()),
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("running", &self.is_running())
            .field("strands", &self.strand_count())
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Kernel state at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSnapshot {
    pub running: bool,
    pub strands: Vec<StrandInfo>,
}
