//! Strands
//!
//! A strand is the unit of scheduling in skein: a lightweight logical task
//! with its own call stack of resumable frames.
//!
//! Design:
//! - The stack is a `Vec<Box<dyn Command>>`; the top is the active frame
//! - While one of its methods runs, the active frame is off the stack and
//!   reports how its tick ends through a single directive slot
//! - A driver loop applies directives until the strand suspends or exits,
//!   so frame transitions never recurse, however deep the stack
//! - Every suspension bumps a generation counter; a `Resumer` only wakes
//!   the suspension it was created for

use super::command::{Command, Source};
use super::error::{Exception, StrandError, StrandResult};
use super::value::Value;
use super::{Kernel, KernelShared};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};

/// Unique identifier for a strand
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StrandId(pub u64);

impl StrandId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StrandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Strand execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrandState {
    /// Created, first tick not yet delivered
    Ready,
    /// A frame method is executing
    Running,
    /// Waiting on an external event
    Suspended,
    /// Finished; absorbing
    Terminated,
}

/// How a strand ended
#[derive(Debug, Clone)]
pub enum StrandExit {
    /// The outermost frame returned a value
    Returned(Value),
    /// The outermost frame threw
    Threw(Exception),
    /// The strand was terminated
    Terminated,
}

impl StrandExit {
    /// Convert to the result a waiter receives
    pub fn into_result(self, id: StrandId) -> Result<Value, Exception> {
        match self {
            Self::Returned(value) => Ok(value),
            Self::Threw(exception) => Err(exception),
            Self::Terminated => Err(StrandError::Terminated { id }.into()),
        }
    }
}

/// Handle for removing an exit observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ExitObserver = Box<dyn FnOnce(&Strand, &StrandExit)>;

/// How the active frame's tick ends
enum Directive {
    Suspend,
    Return(Value),
    Throw(Exception),
    Push(Box<dyn Command>),
    Terminate,
}

impl Directive {
    fn name(&self) -> &'static str {
        match self {
            Self::Suspend => "suspend",
            Self::Return(_) => "return",
            Self::Throw(_) => "throw",
            Self::Push(_) => "push",
            Self::Terminate => "terminate",
        }
    }
}

/// What the driver delivers to the top frame
enum Signal {
    Call,
    Value(Value),
    Exception(Exception),
    Terminate,
}

impl Signal {
    fn name(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Value(_) => "value",
            Self::Exception(_) => "exception",
            Self::Terminate => "terminate",
        }
    }
}

struct StrandInner {
    id: StrandId,
    kernel: Weak<KernelShared>,
    state: Cell<StrandState>,
    generation: Cell<u64>,
    stack: RefCell<Vec<Box<dyn Command>>>,
    /// Name of the frame that is off the stack while it runs
    active: Cell<Option<&'static str>>,
    directive: RefCell<Option<Directive>>,
    popped: Cell<bool>,
    observers: RefCell<Vec<(ObserverId, ExitObserver)>>,
    next_observer: Cell<u64>,
    exit: RefCell<Option<StrandExit>>,
}

/// A cooperatively scheduled task with its own call stack
///
/// `Strand` is a cheap handle; clones refer to the same strand.
#[derive(Clone)]
pub struct Strand(Rc<StrandInner>);

impl Strand {
    pub(crate) fn new(id: StrandId, kernel: Weak<KernelShared>, frame: Box<dyn Command>) -> Self {
        Self(Rc::new(StrandInner {
            id,
            kernel,
            state: Cell::new(StrandState::Ready),
            generation: Cell::new(0),
            stack: RefCell::new(vec![frame]),
            active: Cell::new(None),
            directive: RefCell::new(None),
            popped: Cell::new(false),
            observers: RefCell::new(Vec::new()),
            next_observer: Cell::new(0),
            exit: RefCell::new(None),
        }))
    }

    /// A strand with no kernel and no frames, for unit tests
    #[cfg(test)]
    pub(crate) fn detached(id: StrandId) -> Self {
        let strand = Self::new(id, Weak::new(), Box::new(super::command::Immediate::new(Value::unit())));
        strand.0.stack.borrow_mut().clear();
        strand
    }

    pub fn id(&self) -> StrandId {
        self.0.id
    }

    pub fn state(&self) -> StrandState {
        self.0.state.get()
    }

    /// The kernel that owns this strand
    pub fn kernel(&self) -> StrandResult<Kernel> {
        self.0
            .kernel
            .upgrade()
            .map(Kernel::from_shared)
            .ok_or(StrandError::Detached { id: self.id() })
    }

    /// How the strand ended, once it has
    pub fn exit(&self) -> Option<StrandExit> {
        self.0.exit.borrow().clone()
    }

    /// Names of the frames on the call stack, outermost first
    pub fn frames(&self) -> Vec<&'static str> {
        let mut frames: Vec<&'static str> = self.0.stack.borrow().iter().map(|f| f.name()).collect();
        frames.extend(self.0.active.get());
        frames
    }

    /// Check whether two handles refer to the same strand
    pub fn ptr_eq(a: &Strand, b: &Strand) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    // ========================================================================
    // Directives - issued by the active frame during its tick
    // ========================================================================

    /// End the active frame's tick without completing it
    ///
    /// The frame must have arranged for a later resume (a timer, a next-tick
    /// callback) before returning. Capture a `Resumer` after this call.
    pub fn suspend(&self) -> StrandResult<()> {
        self.direct(Directive::Suspend)?;
        self.0.generation.set(self.0.generation.get() + 1);
        Ok(())
    }

    /// Complete the active frame with a value for its caller
    pub fn return_value(&self, value: Value) -> StrandResult<()> {
        self.direct(Directive::Return(value))
    }

    /// Complete the active frame with an exception for its caller
    pub fn throw_exception(&self, exception: Exception) -> StrandResult<()> {
        self.direct(Directive::Throw(exception))
    }

    /// Call a nested operation; its result is delivered back to the active frame
    pub fn push(&self, source: impl Into<Source>) -> StrandResult<()> {
        self.direct(Directive::Push(source.into().into_command()))
    }

    /// Remove the active frame without delivering a payload
    pub fn pop(&self) -> StrandResult<()> {
        self.require_running()?;
        self.0.popped.set(true);
        Ok(())
    }

    fn require_running(&self) -> StrandResult<()> {
        if self.state() == StrandState::Running {
            Ok(())
        } else {
            Err(StrandError::NotRunning { id: self.id() })
        }
    }

    fn direct(&self, directive: Directive) -> StrandResult<()> {
        self.require_running()?;
        let mut slot = self.0.directive.borrow_mut();
        // A pending terminate outranks whatever the frame issues after it
        if matches!(slot.as_ref(), Some(Directive::Terminate)) {
            return Ok(());
        }
        if let Some(existing) = slot.as_ref() {
            return Err(StrandError::DirectiveConflict {
                id: self.id(),
                existing: existing.name(),
            });
        }
        *slot = Some(directive);
        Ok(())
    }

    // ========================================================================
    // Resumption and termination
    // ========================================================================

    /// Resume a suspended strand, delivering `value` to the active frame
    pub fn resume_with_value(&self, value: Value) -> StrandResult<()> {
        self.require_suspended()?;
        self.drive(Signal::Value(value));
        Ok(())
    }

    /// Resume a suspended strand, delivering `exception` to the active frame
    pub fn resume_with_exception(&self, exception: Exception) -> StrandResult<()> {
        self.require_suspended()?;
        self.drive(Signal::Exception(exception));
        Ok(())
    }

    fn require_suspended(&self) -> StrandResult<()> {
        match self.state() {
            StrandState::Suspended => Ok(()),
            state => Err(StrandError::NotSuspended { id: self.id(), state }),
        }
    }

    /// Terminate the strand, top frame first, until the stack is empty
    ///
    /// Every frame's `terminate` runs, so every pending registration is
    /// released. Idempotent. From inside the strand's own tick the request is
    /// honoured as soon as the active frame returns.
    pub fn terminate(&self) {
        match self.state() {
            StrandState::Terminated => {}
            StrandState::Running => {
                *self.0.directive.borrow_mut() = Some(Directive::Terminate);
            }
            StrandState::Ready | StrandState::Suspended => {
                debug!(strand = %self.id(), "terminating");
                self.drive(Signal::Terminate);
            }
        }
    }

    /// A handle that resumes the current suspension, and only that one
    pub fn resumer(&self) -> Resumer {
        Resumer {
            strand: self.clone(),
            generation: self.0.generation.get(),
        }
    }

    /// Deliver the first tick
    pub(crate) fn start(&self) {
        if self.state() == StrandState::Ready {
            self.drive(Signal::Call);
        } else {
            trace!(strand = %self.id(), state = ?self.state(), "first tick skipped");
        }
    }

    // ========================================================================
    // Exit observers
    // ========================================================================

    /// Run `observer` once the strand exits
    ///
    /// A strand with observers is considered awaited: its unhandled exception
    /// goes to the observers instead of panicking the kernel. If the strand
    /// has already exited, `observer` runs immediately.
    pub fn on_exit(&self, observer: impl FnOnce(&Strand, &StrandExit) + 'static) -> ObserverId {
        let id = ObserverId(self.0.next_observer.get());
        self.0.next_observer.set(id.0 + 1);

        if let Some(exit) = self.exit() {
            observer(self, &exit);
        } else {
            self.0.observers.borrow_mut().push((id, Box::new(observer)));
        }
        id
    }

    /// Detach an exit observer. Returns true if it was still attached.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.0.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|(observer, _)| *observer != id);
        observers.len() != before
    }

    // ========================================================================
    // Driver
    // ========================================================================

    fn drive(&self, mut signal: Signal) {
        loop {
            let frame = self.0.stack.borrow_mut().pop();
            let Some(mut frame) = frame else {
                self.finish(StrandExit::Terminated);
                return;
            };

            let terminating = matches!(signal, Signal::Terminate);
            trace!(strand = %self.id(), frame = frame.name(), signal = signal.name(), "dispatch");

            self.0.state.set(StrandState::Running);
            self.0.active.set(Some(frame.name()));
            let result = match signal {
                Signal::Call => frame.call(self),
                Signal::Value(value) => frame.resume_with_value(self, value),
                Signal::Exception(exception) => frame.resume_with_exception(self, exception),
                Signal::Terminate => frame.terminate(self),
            };
            self.0.active.set(None);
            let directive = self.0.directive.borrow_mut().take();
            let popped = self.0.popped.replace(false);

            if terminating {
                if let Err(exception) = result {
                    warn!(strand = %self.id(), frame = frame.name(), %exception, "frame failed to terminate");
                }
                drop(frame);
                if self.0.stack.borrow().is_empty() {
                    self.finish(StrandExit::Terminated);
                    return;
                }
                signal = Signal::Terminate;
                continue;
            }

            let directive = match (result, directive) {
                (result, Some(Directive::Terminate)) => {
                    if let Err(exception) = result {
                        debug!(strand = %self.id(), frame = frame.name(), %exception, "exception dropped by pending terminate");
                    }
                    Directive::Terminate
                }
                (Err(exception), _) => Directive::Throw(exception),
                (Ok(()), Some(directive)) => directive,
                (Ok(()), None) => {
                    warn!(strand = %self.id(), frame = frame.name(), "frame neither suspended nor completed");
                    Directive::Throw(
                        StrandError::Stalled {
                            id: self.id(),
                            frame: frame.name(),
                        }
                        .into(),
                    )
                }
            };

            signal = match directive {
                Directive::Suspend => {
                    if !popped {
                        self.0.stack.borrow_mut().push(frame);
                    }
                    self.0.state.set(StrandState::Suspended);
                    return;
                }
                Directive::Return(value) => {
                    drop(frame);
                    if self.0.stack.borrow().is_empty() {
                        self.finish(StrandExit::Returned(value));
                        return;
                    }
                    Signal::Value(value)
                }
                Directive::Throw(exception) => {
                    drop(frame);
                    if self.0.stack.borrow().is_empty() {
                        self.finish(StrandExit::Threw(exception));
                        return;
                    }
                    Signal::Exception(exception)
                }
                Directive::Push(command) => {
                    let mut stack = self.0.stack.borrow_mut();
                    if !popped {
                        stack.push(frame);
                    }
                    stack.push(command);
                    Signal::Call
                }
                Directive::Terminate => {
                    if !popped {
                        self.0.stack.borrow_mut().push(frame);
                    }
                    Signal::Terminate
                }
            };
        }
    }

    fn finish(&self, exit: StrandExit) {
        self.0.state.set(StrandState::Terminated);
        self.0.generation.set(self.0.generation.get() + 1);
        *self.0.exit.borrow_mut() = Some(exit.clone());

        let observers = std::mem::take(&mut *self.0.observers.borrow_mut());
        debug!(strand = %self.id(), ?exit, observers = observers.len(), "strand exited");

        if let Ok(kernel) = self.kernel() {
            kernel.strand_exited(self, &exit, !observers.is_empty());
        }
        for (_, observer) in observers {
            observer(self, &exit);
        }
    }

    /// A serialisable view of this strand
    pub fn info(&self) -> StrandInfo {
        StrandInfo {
            id: self.id(),
            state: self.state(),
            frames: self.frames().into_iter().map(String::from).collect(),
        }
    }
}

impl PartialEq for Strand {
    fn eq(&self, other: &Self) -> bool {
        Strand::ptr_eq(self, other)
    }
}

impl Eq for Strand {}

impl fmt::Debug for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strand")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Snapshot of one strand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrandInfo {
    pub id: StrandId,
    pub state: StrandState,
    pub frames: Vec<String>,
}

/// Resumes one particular suspension of a strand
///
/// Wakeups that arrive after the strand was resumed by another path, moved
/// on to a later suspension, or was terminated are rejected with
/// `StrandError::StaleResumption` instead of being delivered to the wrong
/// frame.
#[derive(Clone)]
pub struct Resumer {
    strand: Strand,
    generation: u64,
}

impl Resumer {
    pub fn strand(&self) -> &Strand {
        &self.strand
    }

    /// Check whether the suspension this resumer belongs to is still pending
    pub fn is_current(&self) -> bool {
        self.strand.state() == StrandState::Suspended
            && self.strand.0.generation.get() == self.generation
    }

    fn check(&self) -> StrandResult<()> {
        if self.strand.0.generation.get() != self.generation {
            return Err(StrandError::StaleResumption {
                id: self.strand.id(),
            });
        }
        Ok(())
    }

    pub fn resume_with_value(&self, value: Value) -> StrandResult<()> {
        self.check()?;
        self.strand.resume_with_value(value)
    }

    pub fn resume_with_exception(&self, exception: Exception) -> StrandResult<()> {
        self.check()?;
        self.strand.resume_with_exception(exception)
    }

    pub fn resume(&self, result: Result<Value, Exception>) -> StrandResult<()> {
        match result {
            Ok(value) => self.resume_with_value(value),
            Err(exception) => self.resume_with_exception(exception),
        }
    }
}

impl fmt::Debug for Resumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumer")
            .field("strand", &self.strand.id())
            .field("generation", &self.generation)
            .finish()
    }
}
