use super::{deliver, resume_on_next_tick};
use crate::kernel::command::{Command, Source};
use crate::kernel::error::{Exception, StrandError, TimedOut};
use crate::kernel::event_loop::TimerHandle;
use crate::kernel::strand::{ObserverId, Strand};
use crate::kernel::value::Value;
use std::time::Duration;

/// Run an operation on a child strand, giving up after a duration
///
/// Whichever finishes first wins. If the timer wins, the child is terminated
/// and the caller receives `TimedOut`. The timer, the child and the exit
/// observer are released on every path, including termination of the caller.
pub struct Timeout {
    duration: Duration,
    source: Option<Source>,
    child: Option<(Strand, ObserverId)>,
    timer: Option<Box<dyn TimerHandle>>,
}

impl Timeout {
    pub fn new(duration: Duration, source: impl Into<Source>) -> Self {
        Self {
            duration,
            source: Some(source.into()),
            child: None,
            timer: None,
        }
    }

    fn release(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        if let Some((child, observer)) = self.child.take() {
            child.remove_observer(observer);
            child.terminate();
        }
    }
}

impl Command for Timeout {
    fn call(&mut self, strand: &Strand) -> Result<(), Exception> {
        let source = self
            .source
            .take()
            .ok_or(StrandError::AlreadyCalled { frame: "Timeout" })?;
        let kernel = strand.kernel()?;
        strand.suspend()?;

        let child = kernel.execute(source);
        let resumer = strand.resumer();

        let on_exit = resumer.clone();
        let observer = child.on_exit(move |child, exit| {
            let result = exit.clone().into_result(child.id());
            match child.kernel() {
                Ok(kernel) => resume_on_next_tick(kernel.event_loop().as_ref(), on_exit, result),
                Err(_) => deliver(&on_exit, result),
            }
        });
        self.child = Some((child, observer));

        let duration = self.duration;
        self.timer = Some(kernel.event_loop().create_timer(
            duration,
            Box::new(move || deliver(&resumer, Err(TimedOut { duration }.into()))),
        ));
        Ok(())
    }

    fn resume_with_value(&mut self, strand: &Strand, value: Value) -> Result<(), Exception> {
        self.release();
        strand.return_value(value)?;
        Ok(())
    }

    fn resume_with_exception(&mut self, strand: &Strand, exception: Exception) -> Result<(), Exception> {
        self.release();
        strand.throw_exception(exception)?;
        Ok(())
    }

    fn terminate(&mut self, strand: &Strand) -> Result<(), Exception> {
        self.release();
        strand.pop()?;
        strand.terminate();
        Ok(())
    }
}
