//! End-to-end strand scenarios on the bundled reactor
//!
//! Every test runs on a `ManualClock`, so timers fire in virtual time.

use skein::kernel::{
    Clock, EventLoop, Exception, Kernel, KernelStopped, ManualClock, Reactor, Sleep, Source, Strand, StrandError,
    StrandExit, TimedOut, Value, coroutine,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

fn manual_loop() -> (Rc<Reactor>, Rc<ManualClock>) {
    let clock = Rc::new(ManualClock::new());
    (Rc::new(Reactor::with_clock(clock.clone())), clock)
}

fn start(source: Source) -> Result<Value, Exception> {
    let (reactor, _) = manual_loop();
    Kernel::start(source, Some(reactor))
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Failure(&'static str);

// ============================================================================
// start()
// ============================================================================

#[test]
fn test_start_returns_the_coroutine_result() {
    let result = start(coroutine::from_async(|api| async move {
        api.sleep(ms(10)).await?;
        api.cooperate().await?;
        Ok(Value::new(String::from("finished")))
    }));

    assert_eq!(result.ok().and_then(|v| v.get::<String>()).as_deref(), Some("finished"));
}

#[test]
fn test_start_propagates_uncaught_exceptions() {
    let thrown = Exception::new(Failure("<exception>"));
    let inner = thrown.clone();

    let result = start(coroutine::from_async(move |api| async move {
        api.cooperate().await?;
        Err(inner)
    }));

    let caught = result.expect_err("expected the exception");
    assert!(Exception::ptr_eq(&caught, &thrown));
    assert_eq!(caught.to_string(), "<exception>");
}

#[test]
fn test_start_fails_if_kernel_stops_before_strand_exits() {
    let result = start(coroutine::from_async(|api| async move {
        api.execute(coroutine::from_async(|api| async move {
            let strand = api.strand().await?;
            strand.kernel()?.stop();
            Ok(Value::unit())
        }))
        .await?;

        api.sleep(Duration::from_secs(10)).await?;
        Ok(Value::unit())
    }));

    let caught = result.expect_err("expected KernelStopped");
    assert!(caught.is::<KernelStopped>());
}

#[test]
fn test_start_uses_the_given_event_loop() {
    let (reactor, _) = manual_loop();
    let given: Rc<dyn EventLoop> = reactor;

    let result = Kernel::start(
        coroutine::from_async(|api| async move {
            let strand = api.strand().await?;
            Ok(Value::new(strand.kernel()?.event_loop()))
        }),
        Some(given.clone()),
    );

    let used = result.ok().and_then(|v| v.get::<Rc<dyn EventLoop>>()).expect("event loop");
    assert!(Rc::ptr_eq(&used, &given));
}

#[test]
fn test_start_reports_background_panic() {
    let result = start(coroutine::from_async(|api| async move {
        api.execute(coroutine::from_fn(|_| skein::kernel::Step::Throw(Exception::new(Failure("background")))))
            .await?;
        api.sleep(ms(100)).await?;
        Ok(Value::unit())
    }));

    let caught = result.expect_err("expected a kernel panic");
    assert_eq!(
        caught.to_string(),
        "kernel panic: Unhandled exception in strand #2: Failure (background)."
    );
}

// ============================================================================
// Sleep timing
// ============================================================================

#[test]
fn test_sleepers_wake_in_deadline_order() {
    let (reactor, clock) = manual_loop();
    let kernel = Kernel::with_event_loop(reactor);
    let order = Rc::new(RefCell::new(Vec::new()));

    for delay in [30u64, 10, 20] {
        let order = order.clone();
        let clock = clock.clone();
        kernel.execute(coroutine::from_async(move |api| async move {
            api.sleep(ms(delay)).await?;
            order.borrow_mut().push((delay, clock.now()));
            Ok(Value::unit())
        }));
    }
    kernel.run().unwrap();

    assert_eq!(
        order.borrow().as_slice(),
        &[(10, ms(10)), (20, ms(20)), (30, ms(30))]
    );
}

#[test]
fn test_cooperate_interleaves_strands() {
    let (reactor, _) = manual_loop();
    let kernel = Kernel::with_event_loop(reactor);
    let log = Rc::new(RefCell::new(Vec::new()));

    for name in ["a", "b"] {
        let log = log.clone();
        kernel.execute(coroutine::from_async(move |api| async move {
            for step in 0..3 {
                log.borrow_mut().push(format!("{}{}", name, step));
                api.cooperate().await?;
            }
            Ok(Value::unit())
        }));
    }
    kernel.run().unwrap();

    assert_eq!(log.borrow().join(" "), "a0 b0 a1 b1 a2 b2");
}

// ============================================================================
// Join
// ============================================================================

#[test]
fn test_join_adopts_returned_value() {
    let result = start(coroutine::from_async(|api| async move {
        let child = api
            .execute(coroutine::from_async(|api| async move {
                api.sleep(ms(5)).await?;
                Ok(Value::new(42i64))
            }))
            .await?;
        api.join(&child).await
    }));

    assert_eq!(result.ok().and_then(|v| v.get::<i64>()), Some(42));
}

#[test]
fn test_join_adopts_thrown_exception_without_panic() {
    let thrown = Exception::new(Failure("child failed"));
    let inner = thrown.clone();

    let result = start(coroutine::from_async(move |api| async move {
        let child = api
            .execute(coroutine::from_async(move |api| async move {
                api.sleep(ms(5)).await?;
                Err(inner)
            }))
            .await?;
        match api.join(&child).await {
            Err(e) => Ok(Value::new(e)),
            Ok(_) => Ok(Value::unit()),
        }
    }));

    let caught = result.ok().and_then(|v| v.get::<Exception>()).expect("joined exception");
    assert!(Exception::ptr_eq(&caught, &thrown));
}

#[test]
fn test_join_terminated_strand() {
    let result = start(coroutine::from_async(|api| async move {
        let child = api.execute(Source::command(Sleep::new(Duration::from_secs(60)))).await?;
        api.cooperate().await?;
        api.terminate(&child).await?;
        api.join(&child).await
    }));

    let caught = result.expect_err("join should fail");
    assert!(matches!(
        caught.downcast_ref::<StrandError>(),
        Some(StrandError::Terminated { .. })
    ));
}

#[test]
fn test_join_self_is_rejected() {
    let result = start(coroutine::from_async(|api| async move {
        let me = api.strand().await?;
        api.join(&me).await
    }));

    let caught = result.expect_err("self join should fail");
    assert!(matches!(
        caught.downcast_ref::<StrandError>(),
        Some(StrandError::SelfJoin { .. })
    ));
}

// ============================================================================
// Timeout
// ============================================================================

#[test]
fn test_timeout_returns_result_of_fast_operation() {
    let (reactor, clock) = manual_loop();
    let timers = reactor.clone();

    let result = Kernel::start(
        coroutine::from_async(|api| async move {
            api.timeout(
                ms(100),
                coroutine::from_async(|api| async move {
                    api.sleep(ms(10)).await?;
                    Ok(Value::new(7i64))
                }),
            )
            .await
        }),
        Some(reactor),
    );

    assert_eq!(result.ok().and_then(|v| v.get::<i64>()), Some(7));
    // The losing timer was cancelled, so the clock never reached it
    assert_eq!(clock.now(), ms(10));
    assert_eq!(timers.pending_timers(), 0);
}

#[test]
fn test_timeout_terminates_slow_operation() {
    let (reactor, clock) = manual_loop();
    let child: Rc<RefCell<Option<Strand>>> = Rc::default();
    let released = Rc::new(Cell::new(false));

    struct Release(Rc<Cell<bool>>);
    impl Drop for Release {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    let seen = child.clone();
    let flag = released.clone();
    let result = Kernel::start(
        coroutine::from_async(move |api| async move {
            api.timeout(
                ms(20),
                coroutine::from_async(move |api| async move {
                    let _release = Release(flag);
                    *seen.borrow_mut() = Some(api.strand().await?);
                    api.sleep(Duration::from_secs(3600)).await?;
                    Ok(Value::unit())
                }),
            )
            .await
        }),
        Some(reactor),
    );

    let caught = result.expect_err("expected a timeout");
    assert_eq!(caught.downcast_ref::<TimedOut>(), Some(&TimedOut { duration: ms(20) }));
    assert!(released.get());
    assert_eq!(clock.now(), ms(20));

    let child = child.borrow_mut().take().expect("child ran");
    assert!(matches!(child.exit(), Some(StrandExit::Terminated)));
}

// ============================================================================
// Termination
// ============================================================================

/// Drop guard that records its depth
struct Frame {
    depth: usize,
    log: Rc<RefCell<Vec<usize>>>,
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.log.borrow_mut().push(self.depth);
    }
}

fn nested(depth: usize, levels: usize, log: Rc<RefCell<Vec<usize>>>) -> Source {
    if depth == levels {
        return Source::command(Sleep::new(Duration::from_secs(60)));
    }
    coroutine::from_async(move |api| async move {
        let _frame = Frame {
            depth,
            log: log.clone(),
        };
        api.perform(nested(depth + 1, levels, log)).await
    })
}

#[test]
fn test_terminate_unwinds_deep_stack_top_down() {
    const LEVELS: usize = 500;

    let (reactor, _) = manual_loop();
    let kernel = Kernel::with_event_loop(reactor.clone());
    let log = Rc::new(RefCell::new(Vec::new()));

    let strand = kernel.execute(nested(0, LEVELS, log.clone()));

    let stopper = strand.clone();
    reactor.create_timer(ms(1), Box::new(move || stopper.terminate()));
    kernel.run().unwrap();

    assert_eq!(strand.frames().len(), 0);
    assert!(matches!(strand.exit(), Some(StrandExit::Terminated)));
    assert_eq!(*log.borrow(), (0..LEVELS).rev().collect::<Vec<_>>());
    assert_eq!(reactor.pending_timers(), 0);
}

#[test]
fn test_strand_can_terminate_itself() {
    let (reactor, _) = manual_loop();
    let kernel = Kernel::with_event_loop(reactor);
    let after = Rc::new(Cell::new(false));

    let flag = after.clone();
    let strand = kernel.execute(coroutine::from_async(move |api| async move {
        let me = api.strand().await?;
        api.terminate(&me).await?;
        flag.set(true);
        Ok(Value::unit())
    }));
    kernel.run().unwrap();

    assert!(!after.get());
    assert!(matches!(strand.exit(), Some(StrandExit::Terminated)));
}

#[test]
fn test_strand_terminating_itself_directly_then_returning() {
    let (reactor, _) = manual_loop();
    let kernel = Kernel::with_event_loop(reactor);

    let strand = kernel.execute(coroutine::from_async(|api| async move {
        let me = api.strand().await?;
        me.terminate();
        Ok(Value::new(1i64))
    }));
    kernel.run().unwrap();

    assert!(matches!(strand.exit(), Some(StrandExit::Terminated)));
}

#[test]
fn test_strand_terminating_itself_directly_then_awaiting() {
    let (reactor, _) = manual_loop();
    let kernel = Kernel::with_event_loop(reactor.clone());
    let after = Rc::new(Cell::new(false));

    let flag = after.clone();
    let strand = kernel.execute(coroutine::from_async(move |api| async move {
        let me = api.strand().await?;
        me.terminate();
        api.sleep(ms(50)).await?;
        flag.set(true);
        Ok(Value::unit())
    }));
    kernel.run().unwrap();

    assert!(!after.get());
    assert!(matches!(strand.exit(), Some(StrandExit::Terminated)));
    assert_eq!(reactor.pending_timers(), 0);
}

#[test]
fn test_shutdown_from_inside_a_strand() {
    let (reactor, clock) = manual_loop();
    let kernel = Kernel::with_event_loop(reactor);
    let after = Rc::new(Cell::new(false));

    let sleeper = kernel.execute(Source::command(Sleep::new(Duration::from_secs(60))));
    let flag = after.clone();
    let closer = kernel.execute(coroutine::from_async(move |api| async move {
        api.strand().await?.kernel()?.shutdown();
        api.cooperate().await?;
        flag.set(true);
        Ok(Value::unit())
    }));

    assert!(kernel.run().is_ok());
    assert!(!after.get());
    assert!(matches!(sleeper.exit(), Some(StrandExit::Terminated)));
    assert!(matches!(closer.exit(), Some(StrandExit::Terminated)));
    assert_eq!(kernel.strand_count(), 0);
    // The sleeper's timer was released, so virtual time never moved
    assert_eq!(clock.now(), Duration::ZERO);
}
