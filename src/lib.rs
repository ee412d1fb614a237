//! skein - a cooperative strand kernel
//!
//! Many lightweight tasks ("strands") share one single-threaded event loop.
//! A strand runs until it suspends on a timer, a yield, or another strand,
//! and is later resumed with a value or an exception.
//!
//! Design principles:
//! - Run to completion: one loop callback drives one strand until it suspends
//! - Every wakeup is exactly once; stale wakeups are rejected, not delivered
//! - Cancellation releases every pending registration, however deep the stack
//! - Exceptions travel one frame at a time and keep their identity
//!
//! ```ignore
//! use skein::kernel::{coroutine, Kernel, Value};
//! use std::time::Duration;
//!
//! let result = Kernel::start(
//!     coroutine::from_async(|api| async move {
//!         api.sleep(Duration::from_millis(10)).await?;
//!         Ok(Value::new("done"))
//!     }),
//!     None,
//! );
//! ```

pub mod kernel;

pub use kernel::{Exception, Kernel, KernelPanic, Source, Strand, StrandException, Value};
