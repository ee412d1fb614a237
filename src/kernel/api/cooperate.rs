use super::resume_on_next_tick;
use crate::kernel::command::Command;
use crate::kernel::error::Exception;
use crate::kernel::strand::Strand;
use crate::kernel::value::Value;

/// Yield to other strands, resuming on the next turn of the event loop
pub struct Cooperate;

impl Command for Cooperate {
    fn call(&mut self, strand: &Strand) -> Result<(), Exception> {
        let kernel = strand.kernel()?;
        strand.suspend()?;
        resume_on_next_tick(kernel.event_loop().as_ref(), strand.resumer(), Ok(Value::unit()));
        Ok(())
    }
}
