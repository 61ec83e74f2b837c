use super::core::{pause, InFlight, RejectReason, Rejected, Scheduler, Task, IO_SCHEDULER};
use super::scratch::ScratchPool;
use crate::exception::panic_message;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::error;

/// Runs tasks inline on the calling thread.
///
/// Registered as `io`: useful for routes whose work never blocks (negotiation-only endpoints,
/// handlers that immediately return a future). There is no queue, so the only rejection is
/// `ShuttingDown`.
pub struct ImmediateScheduler {
    name: Arc<str>,
    scratch: ScratchPool,
    in_flight: Arc<AtomicUsize>,
    accepting: AtomicBool,
}

impl ImmediateScheduler {
    pub fn new() -> Self {
        Self::named(IO_SCHEDULER)
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            scratch: ScratchPool::default(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            accepting: AtomicBool::new(true),
        }
    }
}

impl Default for ImmediateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ImmediateScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self, task: Task) -> Result<(), Rejected> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Rejected {
                reason: RejectReason::ShuttingDown,
                task,
            });
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let counter = Arc::clone(&self.in_flight);
        let task = task.hold(InFlight::new(move || {
            counter.fetch_sub(1, Ordering::AcqRel);
        }));
        let mut scratch = self.scratch.acquire();
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| {
            task.run(&mut scratch, &self.name, None);
        })) {
            error!(
                scheduler = %self.name,
                panic_message = %panic_message(&*panic),
                "Inline task panicked outside handler recovery"
            );
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    fn await_termination(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let n = self.in_flight.load(Ordering::Acquire);
            if n == 0 || Instant::now() >= deadline {
                return n;
            }
            pause(Duration::from_millis(1));
        }
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}
