use super::{deliver, resume_on_next_tick};
use crate::kernel::command::Command;
use crate::kernel::error::{Exception, StrandError};
use crate::kernel::strand::{ObserverId, Strand};
use crate::kernel::value::Value;

/// Wait for another strand to exit and take on its result
///
/// A strand that returned delivers its value, one that threw delivers the
/// same exception object, and one that was terminated delivers
/// `StrandError::Terminated`. Joining makes the target observed, so its
/// exception never panics the kernel.
pub struct Join {
    target: Strand,
    observer: Option<ObserverId>,
}

impl Join {
    pub fn new(target: Strand) -> Self {
        Self { target, observer: None }
    }

    /// Stop observing the target; a no-op once the observer has fired
    fn detach(&mut self) {
        if let Some(observer) = self.observer.take() {
            self.target.remove_observer(observer);
        }
    }
}

impl Command for Join {
    fn call(&mut self, strand: &Strand) -> Result<(), Exception> {
        if Strand::ptr_eq(&self.target, strand) {
            return Err(StrandError::SelfJoin { id: strand.id() }.into());
        }

        if let Some(exit) = self.target.exit() {
            match exit.into_result(self.target.id()) {
                Ok(value) => strand.return_value(value)?,
                Err(exception) => strand.throw_exception(exception)?,
            }
            return Ok(());
        }

        strand.suspend()?;
        let resumer = strand.resumer();
        self.observer = Some(self.target.on_exit(move |joined, exit| {
            let result = exit.clone().into_result(joined.id());
            match joined.kernel() {
                Ok(kernel) => resume_on_next_tick(kernel.event_loop().as_ref(), resumer, result),
                Err(_) => deliver(&resumer, result),
            }
        }));
        Ok(())
    }

    fn resume_with_value(&mut self, strand: &Strand, value: Value) -> Result<(), Exception> {
        self.detach();
        strand.return_value(value)?;
        Ok(())
    }

    fn resume_with_exception(&mut self, strand: &Strand, exception: Exception) -> Result<(), Exception> {
        self.detach();
        strand.throw_exception(exception)?;
        Ok(())
    }

    fn terminate(&mut self, strand: &Strand) -> Result<(), Exception> {
        self.detach();
        strand.pop()?;
        strand.terminate();
        Ok(())
    }
}
