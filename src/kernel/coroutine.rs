//! Coroutine frames
//!
//! Most strand logic is easier to write as straight-line code that calls
//! nested operations and gets their results back. A `Coroutine` is a
//! resumable step function: each time it is resumed it either yields a nested
//! operation, returns, or throws. `CoroutineFrame` adapts it to the command
//! contract so it can sit on a strand's stack like any other frame.
//!
//! `from_async` builds a coroutine from an async body. The body is polled
//! with a no-op waker; the only futures it may await are the ones produced
//! by its `Api` handle, which hand their operation to the frame through a
//! one-slot mailbox and receive the result on the next resume.

use super::api::{Cooperate, CurrentStrand, Execute, Join, Sleep, StopKernel, TerminateStrand, Timeout};
use super::command::{Command, Source};
use super::error::{Exception, StrandError, short_type_name};
use super::strand::Strand;
use super::value::Value;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Input delivered to a coroutine
#[derive(Debug)]
pub enum Resume {
    /// First resume
    Start,
    /// The yielded operation returned
    Value(Value),
    /// The yielded operation threw
    Exception(Exception),
}

/// What a coroutine did with its input
#[derive(Debug)]
pub enum Step {
    /// Call a nested operation; its result is the next `Resume`
    Yield(Source),
    Return(Value),
    Throw(Exception),
}

/// A resumable step function
pub trait Coroutine {
    fn resume(&mut self, input: Resume) -> Step;

    fn name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }
}

/// Adapts a coroutine to the command contract
pub struct CoroutineFrame {
    coroutine: Option<Box<dyn Coroutine>>,
    name: &'static str,
}

impl CoroutineFrame {
    pub fn new(coroutine: Box<dyn Coroutine>) -> Self {
        let name = coroutine.name();
        Self {
            coroutine: Some(coroutine),
            name,
        }
    }

    fn step(&mut self, strand: &Strand, input: Resume) -> Result<(), Exception> {
        let coroutine = self
            .coroutine
            .as_mut()
            .ok_or(StrandError::AlreadyCalled { frame: self.name })?;

        match coroutine.resume(input) {
            Step::Yield(source) => strand.push(source)?,
            Step::Return(value) => {
                self.coroutine = None;
                strand.return_value(value)?;
            }
            Step::Throw(exception) => {
                self.coroutine = None;
                strand.throw_exception(exception)?;
            }
        }
        Ok(())
    }
}

impl Command for CoroutineFrame {
    fn call(&mut self, strand: &Strand) -> Result<(), Exception> {
        self.step(strand, Resume::Start)
    }

    fn resume_with_value(&mut self, strand: &Strand, value: Value) -> Result<(), Exception> {
        self.step(strand, Resume::Value(value))
    }

    fn resume_with_exception(&mut self, strand: &Strand, exception: Exception) -> Result<(), Exception> {
        self.step(strand, Resume::Exception(exception))
    }

    fn terminate(&mut self, strand: &Strand) -> Result<(), Exception> {
        self.coroutine = None;
        strand.pop()?;
        strand.terminate();
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

// ============================================================================
// Closure coroutines
// ============================================================================

/// Coroutine backed by a closure
pub struct FnCoroutine<F> {
    f: F,
}

impl<F: FnMut(Resume) -> Step> Coroutine for FnCoroutine<F> {
    fn resume(&mut self, input: Resume) -> Step {
        (self.f)(input)
    }

    fn name(&self) -> &'static str {
        "FnCoroutine"
    }
}

/// Build a coroutine from a step closure
pub fn from_fn<F: FnMut(Resume) -> Step + 'static>(f: F) -> Source {
    Source::coroutine(FnCoroutine { f })
}

// ============================================================================
// Async coroutines
// ============================================================================

#[derive(Default)]
struct Mailbox {
    request: RefCell<Option<Source>>,
    reply: RefCell<Option<Result<Value, Exception>>>,
}

type Body = Pin<Box<dyn Future<Output = Result<Value, Exception>>>>;

/// Coroutine backed by an async body
pub struct AsyncCoroutine {
    body: Option<Body>,
    mailbox: Rc<Mailbox>,
}

impl Coroutine for AsyncCoroutine {
    fn resume(&mut self, input: Resume) -> Step {
        let Some(body) = self.body.as_mut() else {
            return Step::Throw(StrandError::AlreadyCalled { frame: "AsyncCoroutine" }.into());
        };

        match input {
            Resume::Start => {}
            Resume::Value(value) => *self.mailbox.reply.borrow_mut() = Some(Ok(value)),
            Resume::Exception(exception) => *self.mailbox.reply.borrow_mut() = Some(Err(exception)),
        }

        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        let poll = body.as_mut().poll(&mut cx);
        self.mailbox.reply.borrow_mut().take();
        let request = self.mailbox.request.borrow_mut().take();

        match poll {
            Poll::Ready(result) => {
                self.body = None;
                match result {
                    Ok(value) => Step::Return(value),
                    Err(exception) => Step::Throw(exception),
                }
            }
            Poll::Pending => match request {
                Some(source) => Step::Yield(source),
                None => {
                    self.body = None;
                    Step::Throw(StrandError::ForeignAwait.into())
                }
            },
        }
    }
}

/// Build a coroutine from an async body
///
/// ```ignore
/// let source = coroutine::from_async(|api| async move {
///     api.sleep(Duration::from_millis(10)).await?;
///     Ok(Value::new("rested"))
/// });
/// ```
pub fn from_async<F, Fut>(body: F) -> Source
where
    F: FnOnce(Api) -> Fut,
    Fut: Future<Output = Result<Value, Exception>> + 'static,
{
    let mailbox = Rc::new(Mailbox::default());
    let api = Api {
        mailbox: mailbox.clone(),
    };
    Source::coroutine(AsyncCoroutine {
        body: Some(Box::pin(body(api))),
        mailbox,
    })
}

/// Kernel operations available to an async body
#[derive(Clone)]
pub struct Api {
    mailbox: Rc<Mailbox>,
}

impl Api {
    /// Call any operation as a nested frame
    pub fn perform(&self, source: impl Into<Source>) -> Perform {
        Perform {
            mailbox: self.mailbox.clone(),
            state: PerformState::Unsent(source.into()),
        }
    }

    pub fn sleep(&self, duration: Duration) -> Perform {
        self.perform(Source::command(Sleep::new(duration)))
    }

    /// Yield to other strands for one turn of the event loop
    pub fn cooperate(&self) -> Perform {
        self.perform(Source::command(Cooperate))
    }

    /// The strand running this body
    pub fn strand(&self) -> impl Future<Output = Result<Strand, Exception>> + 'static {
        expect_strand(self.perform(Source::command(CurrentStrand)), "strand")
    }

    /// Start `source` on a new strand and return its handle
    pub fn execute(&self, source: impl Into<Source>) -> impl Future<Output = Result<Strand, Exception>> + 'static {
        expect_strand(self.perform(Source::command(Execute::new(source))), "execute")
    }

    /// Wait for `strand` to exit and take its result
    pub fn join(&self, strand: &Strand) -> Perform {
        self.perform(Source::command(Join::new(strand.clone())))
    }

    /// Run `source` on a child strand, failing with `TimedOut` after `duration`
    pub fn timeout(&self, duration: Duration, source: impl Into<Source>) -> Perform {
        self.perform(Source::command(Timeout::new(duration, source)))
    }

    pub fn terminate(&self, strand: &Strand) -> Perform {
        self.perform(Source::command(TerminateStrand::new(strand.clone())))
    }

    /// Stop the kernel
    pub fn stop(&self) -> Perform {
        self.perform(Source::command(StopKernel))
    }
}

async fn expect_strand(perform: Perform, operation: &'static str) -> Result<Strand, Exception> {
    let value = perform.await?;
    value
        .get::<Strand>()
        .ok_or_else(|| StrandError::UnexpectedValue { operation }.into())
}

enum PerformState {
    Unsent(Source),
    Sent,
    Done,
}

/// Future for one kernel operation awaited from an async body
#[must_use = "kernel operations do nothing unless awaited"]
pub struct Perform {
    mailbox: Rc<Mailbox>,
    state: PerformState,
}

impl Future for Perform {
    type Output = Result<Value, Exception>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match std::mem::replace(&mut self.state, PerformState::Done) {
            PerformState::Unsent(source) => {
                let mut request = self.mailbox.request.borrow_mut();
                if request.is_some() {
                    return Poll::Ready(Err(StrandError::ConcurrentAwait.into()));
                }
                *request = Some(source);
                drop(request);
                self.state = PerformState::Sent;
                Poll::Pending
            }
            PerformState::Sent => {
                let reply = self.mailbox.reply.borrow_mut().take();
                match reply {
                    Some(reply) => Poll::Ready(reply),
                    None => {
                        self.state = PerformState::Sent;
                        Poll::Pending
                    }
                }
            }
            PerformState::Done => Poll::Ready(Err(StrandError::AlreadyCalled { frame: "Perform" }.into())),
        }
    }
}

impl Drop for Perform {
    fn drop(&mut self) {
        // A request that was never picked up belongs to this future
        if matches!(self.state, PerformState::Sent) {
            self.mailbox.request.borrow_mut().take();
        }
    }
}
