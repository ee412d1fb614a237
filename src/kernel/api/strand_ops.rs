use crate::kernel::command::{Command, Source};
use crate::kernel::error::{Exception, StrandError};
use crate::kernel::strand::Strand;
use crate::kernel::value::Value;

/// Returns the calling strand's handle
pub struct CurrentStrand;

impl Command for CurrentStrand {
    fn call(&mut self, strand: &Strand) -> Result<(), Exception> {
        strand.return_value(Value::new(strand.clone()))?;
        Ok(())
    }
}

/// Starts a new strand on the caller's kernel and returns its handle
///
/// The new strand runs independently; use `Join` to wait for it.
pub struct Execute {
    source: Option<Source>,
}

impl Execute {
    pub fn new(source: impl Into<Source>) -> Self {
        Self {
            source: Some(source.into()),
        }
    }
}

impl Command for Execute {
    fn call(&mut self, strand: &Strand) -> Result<(), Exception> {
        let source = self
            .source
            .take()
            .ok_or(StrandError::AlreadyCalled { frame: "Execute" })?;
        let child = strand.kernel()?.execute(source);
        strand.return_value(Value::new(child))?;
        Ok(())
    }
}

/// Terminates a strand; terminating the caller ends it immediately
pub struct TerminateStrand {
    target: Strand,
}

impl TerminateStrand {
    pub fn new(target: Strand) -> Self {
        Self { target }
    }
}

impl Command for TerminateStrand {
    fn call(&mut self, strand: &Strand) -> Result<(), Exception> {
        if Strand::ptr_eq(&self.target, strand) {
            strand.terminate();
        } else {
            self.target.terminate();
            strand.return_value(Value::unit())?;
        }
        Ok(())
    }
}

/// Stops the caller's kernel, then returns
pub struct StopKernel;

impl Command for StopKernel {
    fn call(&mut self, strand: &Strand) -> Result<(), Exception> {
        strand.kernel()?.stop();
        strand.return_value(Value::unit())?;
        Ok(())
    }
}
