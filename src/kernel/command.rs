//! The resumable command contract
//!
//! A command is one frame on a strand's call stack. The strand calls exactly
//! one of its methods per tick, and the method ends the tick by issuing one
//! directive on the strand: `suspend`, `return_value`, `throw_exception`,
//! `push`, or (from `terminate`) `pop` followed by `terminate`.
//!
//! Returning `Err` from a method is shorthand for `throw_exception`.

use super::coroutine::{Coroutine, CoroutineFrame};
use super::error::{Exception, short_type_name};
use super::strand::Strand;
use super::value::Value;
use std::fmt;

/// A frame on a strand's call stack
pub trait Command {
    /// Begin the operation. Invoked once, when the frame reaches the top of
    /// the stack for the first time.
    fn call(&mut self, strand: &Strand) -> Result<(), Exception>;

    /// Continue after the pending event produced a value
    ///
    /// The default passes the value on to the caller.
    fn resume_with_value(&mut self, strand: &Strand, value: Value) -> Result<(), Exception> {
        strand.return_value(value)?;
        Ok(())
    }

    /// Continue after the pending event produced an exception
    ///
    /// The default rethrows it to the caller.
    fn resume_with_exception(&mut self, strand: &Strand, exception: Exception) -> Result<(), Exception> {
        strand.throw_exception(exception)?;
        Ok(())
    }

    /// Release everything the frame holds, then pop it and continue
    /// terminating the strand
    ///
    /// Frames that registered a timer, observer, or similar must cancel it
    /// here. Any resumption that arrives afterwards is a protocol violation.
    fn terminate(&mut self, strand: &Strand) -> Result<(), Exception> {
        strand.pop()?;
        strand.terminate();
        Ok(())
    }

    /// Name shown in snapshots and logs
    fn name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }
}

/// Something that can be executed as a strand or called from a frame
pub enum Source {
    Command(Box<dyn Command>),
    Coroutine(Box<dyn Coroutine>),
    Value(Value),
}

impl Source {
    pub fn command(command: impl Command + 'static) -> Self {
        Self::Command(Box::new(command))
    }

    pub fn coroutine(coroutine: impl Coroutine + 'static) -> Self {
        Self::Coroutine(Box::new(coroutine))
    }

    pub fn value(value: Value) -> Self {
        Self::Value(value)
    }

    /// Normalise to a single frame
    pub(crate) fn into_command(self) -> Box<dyn Command> {
        match self {
            Self::Command(command) => command,
            Self::Coroutine(coroutine) => Box::new(CoroutineFrame::new(coroutine)),
            Self::Value(value) => Box::new(Immediate::new(value)),
        }
    }
}

impl From<Box<dyn Command>> for Source {
    fn from(command: Box<dyn Command>) -> Self {
        Self::Command(command)
    }
}

impl From<Box<dyn Coroutine>> for Source {
    fn from(coroutine: Box<dyn Coroutine>) -> Self {
        Self::Coroutine(coroutine)
    }
}

impl From<Value> for Source {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(command) => write!(f, "Source::Command({})", command.name()),
            Self::Coroutine(coroutine) => write!(f, "Source::Coroutine({})", coroutine.name()),
            Self::Value(value) => write!(f, "Source::Value({:?})", value),
        }
    }
}

/// Returns a value without suspending
pub struct Immediate {
    value: Option<Value>,
}

impl Immediate {
    pub fn new(value: Value) -> Self {
        Self { value: Some(value) }
    }
}

impl Command for Immediate {
    fn call(&mut self, strand: &Strand) -> Result<(), Exception> {
        let value = self.value.take().unwrap_or_default();
        strand.return_value(value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::strand::{StrandExit, StrandId};
    use std::rc::Weak;

    fn run(source: Source) -> Option<StrandExit> {
        let strand = Strand::new(StrandId(1), Weak::new(), source.into_command());
        strand.start();
        strand.exit()
    }

    #[test]
    fn test_immediate_returns_value() {
        match run(Source::value(Value::new("done"))) {
            Some(StrandExit::Returned(value)) => assert_eq!(value.get::<&str>(), Some("done")),
            other => panic!("unexpected exit: {:?}", other),
        }
    }

    #[test]
    fn test_default_name_is_unqualified() {
        assert_eq!(Immediate::new(Value::unit()).name(), "Immediate");
    }

    #[test]
    fn test_source_debug() {
        let source = Source::command(Immediate::new(Value::unit()));
        assert_eq!(format!("{:?}", source), "Source::Command(Immediate)");
        assert_eq!(format!("{:?}", Source::value(Value::new(2i64))), "Source::Value(Value(2))");
    }
}
