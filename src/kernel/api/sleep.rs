use super::deliver;
use crate::kernel::command::Command;
use crate::kernel::error::Exception;
use crate::kernel::event_loop::TimerHandle;
use crate::kernel::strand::Strand;
use crate::kernel::value::Value;
use std::time::Duration;

/// Suspend the calling strand for a duration
///
/// Resumes with unit once the timer fires. Resuming early by another path
/// cancels the timer; so does terminating the strand.
pub struct Sleep {
    duration: Duration,
    timer: Option<Box<dyn TimerHandle>>,
}

impl Sleep {
    pub fn new(duration: Duration) -> Self {
        Self { duration, timer: None }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

impl Command for Sleep {
    fn call(&mut self, strand: &Strand) -> Result<(), Exception> {
        let kernel = strand.kernel()?;
        strand.suspend()?;

        let resumer = strand.resumer();
        self.timer = Some(kernel.event_loop().create_timer(
            self.duration,
            Box::new(move || deliver(&resumer, Ok(Value::unit()))),
        ));
        Ok(())
    }

    fn resume_with_value(&mut self, strand: &Strand, value: Value) -> Result<(), Exception> {
        self.cancel_timer();
        strand.return_value(value)?;
        Ok(())
    }

    fn resume_with_exception(&mut self, strand: &Strand, exception: Exception) -> Result<(), Exception> {
        self.cancel_timer();
        strand.throw_exception(exception)?;
        Ok(())
    }

    fn terminate(&mut self, strand: &Strand) -> Result<(), Exception> {
        self.cancel_timer();
        strand.pop()?;
        strand.terminate();
        Ok(())
    }
}
