//! Error types for the kernel
//!
//! Three kinds of failure leave a strand or the kernel:
//! - `StrandException`: a strand's outermost frame threw and nothing caught it
//! - `KernelPanic`: the event loop failed, or an unhandled strand exception
//!   reached the kernel
//! - `KernelStopped`: injected into strands still pending when the kernel halts
//!
//! Inside a strand every failure travels as an `Exception`, a reference
//! counted wrapper around any `std::error::Error`. Cloning an exception keeps
//! its identity, so the object thrown deep inside a strand is the same object
//! its caller finally receives.

use super::strand::{Strand, StrandId, StrandState};
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Result type for strand operations
pub type StrandResult<T> = Result<T, StrandError>;

/// A dynamically typed, identity preserving exception
#[derive(Clone)]
pub struct Exception {
    error: Rc<dyn Error + 'static>,
    type_name: &'static str,
}

impl Exception {
    /// Wrap an error. Wrapping an `Exception` returns it unchanged.
    pub fn new<E: Error + 'static>(error: E) -> Self {
        if let Some(exception) = (&error as &dyn Any).downcast_ref::<Exception>() {
            return exception.clone();
        }
        Self {
            error: Rc::new(error),
            type_name: short_type_name(std::any::type_name::<E>()),
        }
    }

    /// Unqualified type name of the wrapped error (`TimedOut`, not a full path)
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The wrapped error
    pub fn error(&self) -> &(dyn Error + 'static) {
        self.error.as_ref()
    }

    /// Check the concrete type of the wrapped error
    pub fn is<E: Error + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// Borrow the wrapped error as `E`, if that is its type
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.error.downcast_ref::<E>()
    }

    /// Check whether two exceptions are the same thrown object
    pub fn ptr_eq(a: &Exception, b: &Exception) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&a.error), Rc::as_ptr(&b.error))
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exception")
            .field("type", &self.type_name)
            .field("error", &self.error)
            .finish()
    }
}

impl Error for Exception {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.error.source()
    }
}

/// Strip the module path from a type name
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let end = full.find('<').unwrap_or(full.len());
    let start = full[..end].rfind("::").map(|i| i + 2).unwrap_or(0);
    &full[start..]
}

/// A strand's outermost frame threw and there was no frame left to catch it
#[derive(Debug, thiserror::Error)]
#[error(
    "Unhandled exception in strand {}: {} ({}).",
    .strand.id(),
    .cause.type_name(),
    .cause
)]
pub struct StrandException {
    strand: Strand,
    #[source]
    cause: Exception,
}

impl StrandException {
    pub fn new(strand: Strand, cause: Exception) -> Self {
        Self { strand, cause }
    }

    /// The failed strand
    pub fn strand(&self) -> &Strand {
        &self.strand
    }

    /// The exception that caused the failure
    pub fn cause(&self) -> &Exception {
        &self.cause
    }
}

/// A fatal failure of a kernel instance
#[derive(Debug, thiserror::Error)]
pub enum KernelPanic {
    /// The event loop's `run()` failed
    #[error("kernel panic: the event loop failed: {0}")]
    EventLoop(#[source] Exception),
    /// A strand nobody was waiting on exited with an exception
    #[error("kernel panic: {0}")]
    UnhandledException(#[source] StrandException),
}

impl KernelPanic {
    /// The original failure
    pub fn cause(&self) -> &Exception {
        match self {
            Self::EventLoop(cause) => cause,
            Self::UnhandledException(exception) => exception.cause(),
        }
    }

    /// The failed strand, if a strand caused the panic
    pub fn strand(&self) -> Option<&Strand> {
        match self {
            Self::EventLoop(_) => None,
            Self::UnhandledException(exception) => Some(exception.strand()),
        }
    }
}

/// Delivered to a strand that was still pending when the kernel stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the kernel was stopped before the strand completed")]
pub struct KernelStopped;

/// Thrown by `Timeout` when the wrapped operation loses the race
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation timed out after {duration:?}")]
pub struct TimedOut {
    pub duration: Duration,
}

/// Misuse of the strand protocol
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrandError {
    /// Resume requested while the strand was not waiting
    #[error("strand {id} is not suspended (state: {state:?})")]
    NotSuspended { id: StrandId, state: StrandState },
    /// A frame directive was issued outside the strand's tick
    #[error("strand {id} is not running")]
    NotRunning { id: StrandId },
    /// The active frame already decided how its tick ends
    #[error("strand {id}: the active frame already issued a {existing} directive")]
    DirectiveConflict { id: StrandId, existing: &'static str },
    /// The active frame returned without suspending or completing
    #[error("strand {id}: frame `{frame}` neither suspended nor completed")]
    Stalled { id: StrandId, frame: &'static str },
    /// A frame that runs once was invoked again
    #[error("frame `{frame}` was already called")]
    AlreadyCalled { frame: &'static str },
    /// An awaited strand was terminated before producing a result
    #[error("strand {id} was terminated")]
    Terminated { id: StrandId },
    /// A strand tried to wait on itself
    #[error("strand {id} cannot join itself")]
    SelfJoin { id: StrandId },
    /// The strand's kernel no longer exists
    #[error("strand {id} is not attached to a kernel")]
    Detached { id: StrandId },
    /// A wakeup arrived for a suspension that already ended
    #[error("stale resumption of strand {id}")]
    StaleResumption { id: StrandId },
    /// An async body awaited something other than a kernel operation
    #[error("async body awaited a future that is not a kernel operation")]
    ForeignAwait,
    /// An async body awaited two kernel operations at once
    #[error("async body awaited two kernel operations at once")]
    ConcurrentAwait,
    /// A kernel operation produced a value of the wrong type
    #[error("unexpected value from `{operation}`")]
    UnexpectedValue { operation: &'static str },
}

/// Failures of the bundled event loop
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoopError {
    #[error("the event loop is already running")]
    AlreadyRunning,
    #[error("an event loop callback panicked: {message}")]
    CallbackPanicked { message: String },
}

macro_rules! impl_into_exception {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Exception {
                fn from(error: $ty) -> Self {
                    Exception::new(error)
                }
            }
        )*
    };
}

impl_into_exception!(
    StrandError,
    StrandException,
    KernelPanic,
    KernelStopped,
    TimedOut,
    LoopError,
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Error(String);

    fn failed_strand(id: u64) -> Strand {
        Strand::detached(StrandId(id))
    }

    #[test]
    fn test_strand_exception_message() {
        let strand = failed_strand(123);
        let cause = Exception::new(Error("<message>".into()));
        let exception = StrandException::new(strand, cause);

        assert_eq!(
            exception.to_string(),
            "Unhandled exception in strand #123: Error (<message>)."
        );
    }

    #[test]
    fn test_strand_exception_exposes_strand() {
        let strand = failed_strand(123);
        let exception = StrandException::new(strand.clone(), Exception::new(Error("x".into())));

        assert_eq!(exception.strand(), &strand);
        assert_eq!(exception.strand().id(), StrandId(123));
    }

    #[test]
    fn test_strand_exception_exposes_cause() {
        let cause = Exception::new(Error("<message>".into()));
        let exception = StrandException::new(failed_strand(123), cause.clone());

        assert!(Exception::ptr_eq(exception.cause(), &cause));

        let source = exception.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("<message>"));
    }

    #[test]
    fn test_exception_wrapping_is_idempotent() {
        let original = Exception::new(KernelStopped);
        let wrapped = Exception::new(original.clone());

        assert!(Exception::ptr_eq(&original, &wrapped));
        assert_eq!(wrapped.type_name(), "KernelStopped");
    }

    #[test]
    fn test_exception_downcast() {
        let exception: Exception = TimedOut {
            duration: Duration::from_millis(5),
        }
        .into();

        assert!(exception.is::<TimedOut>());
        assert!(!exception.is::<KernelStopped>());
        assert_eq!(
            exception.downcast_ref::<TimedOut>().map(|t| t.duration),
            Some(Duration::from_millis(5))
        );
        assert_eq!(exception.to_string(), "operation timed out after 5ms");
    }

    #[test]
    fn test_clones_share_identity() {
        let a = Exception::new(Error("a".into()));
        let b = a.clone();
        let c = Exception::new(Error("a".into()));

        assert!(Exception::ptr_eq(&a, &b));
        assert!(!Exception::ptr_eq(&a, &c));
    }

    #[test]
    fn test_panic_exposes_cause() {
        let cause = Exception::new(Error("loop broke".into()));
        let panic = KernelPanic::EventLoop(cause.clone());

        assert!(Exception::ptr_eq(panic.cause(), &cause));
        assert!(panic.strand().is_none());
        assert_eq!(
            panic.to_string(),
            "kernel panic: the event loop failed: loop broke"
        );
    }

    #[test]
    fn test_panic_from_strand() {
        let strand = failed_strand(7);
        let cause = Exception::new(Error("boom".into()));
        let panic = KernelPanic::UnhandledException(StrandException::new(strand.clone(), cause.clone()));

        assert!(Exception::ptr_eq(panic.cause(), &cause));
        assert_eq!(panic.strand(), Some(&strand));
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("a::b::Foo"), "Foo");
        assert_eq!(short_type_name("Foo"), "Foo");
        assert_eq!(short_type_name("a::Foo<b::Bar>"), "Foo<b::Bar>");
    }

    #[test]
    fn test_strand_error_display() {
        let err = StrandError::NotSuspended {
            id: StrandId(4),
            state: StrandState::Running,
        };
        assert_eq!(err.to_string(), "strand #4 is not suspended (state: Running)");
    }
}
