use super::core::{pause, InFlight, RejectReason, Rejected, Scheduler, Task};
use super::scratch::ScratchPool;
use crate::exception::panic_message;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Job handed to a user executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// User executor: runs the job somewhere, or hands it back to refuse it
pub type Executor = dyn Fn(Job) -> Result<(), Job> + Send + Sync;

struct Inner {
    name: Arc<str>,
    scratch: ScratchPool,
    in_flight: AtomicUsize,
}

/// Adapts a user-supplied executor function into a named [`Scheduler`].
///
/// ```rust
/// use brrtdispatch::scheduler::{CustomScheduler, Scheduler, Task};
///
/// let threads = CustomScheduler::new("threads", |job| {
///     std::thread::spawn(job);
///     Ok(())
/// });
/// assert_eq!(threads.name(), "threads");
/// ```
pub struct CustomScheduler {
    inner: Arc<Inner>,
    executor: Box<Executor>,
    accepting: AtomicBool,
}

impl CustomScheduler {
    pub fn new<E>(name: &str, executor: E) -> Self
    where
        E: Fn(Job) -> Result<(), Job> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                name: Arc::from(name),
                scratch: ScratchPool::default(),
                in_flight: AtomicUsize::new(0),
            }),
            executor: Box::new(executor),
            accepting: AtomicBool::new(true),
        }
    }
}

impl Scheduler for CustomScheduler {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn schedule(&self, task: Task) -> Result<(), Rejected> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Rejected {
                reason: RejectReason::ShuttingDown,
                task,
            });
        }

        // The task stays reachable here so a refused job can be handed back to the caller.
        let slot = Arc::new(Mutex::new(Some(task)));
        let job_slot = Arc::clone(&slot);
        let inner = Arc::clone(&self.inner);
        inner.in_flight.fetch_add(1, Ordering::AcqRel);

        let job: Job = Box::new(move || {
            let task = job_slot.lock().take();
            if let Some(task) = task {
                let done = Arc::clone(&inner);
                let task = task.hold(InFlight::new(move || {
                    done.in_flight.fetch_sub(1, Ordering::AcqRel);
                }));
                let mut scratch = inner.scratch.acquire();
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| {
                    task.run(&mut scratch, &inner.name, None);
                })) {
                    error!(
                        scheduler = %inner.name,
                        panic_message = %panic_message(&*panic),
                        "Custom executor task panicked outside handler recovery"
                    );
                }
            }
        });

        match (self.executor)(job) {
            Ok(()) => Ok(()),
            Err(_refused) => match slot.lock().take() {
                Some(task) => {
                    self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
                    warn!(scheduler = %self.inner.name, "Custom executor refused task");
                    Err(Rejected {
                        reason: RejectReason::QueueFull { bound: 0 },
                        task,
                    })
                }
                // The executor ran the job before refusing it.
                None => Ok(()),
            },
        }
    }

    fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    fn await_termination(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let n = self.inner.in_flight.load(Ordering::Acquire);
            if n == 0 || Instant::now() >= deadline {
                return n;
            }
            pause(Duration::from_millis(1));
        }
    }

    fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_runs_on_executor_thread() {
        let scheduler = CustomScheduler::new("threads", |job| {
            std::thread::spawn(job);
            Ok(())
        });
        let (tx, rx) = mpsc::channel();
        let caller = std::thread::current().id();
        scheduler
            .schedule(Task::from_fn(move |_, info| {
                tx.send((std::thread::current().id(), info.scheduler.to_string()))
                    .unwrap();
            }))
            .unwrap();
        let (ran_on, name) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_ne!(ran_on, caller);
        assert_eq!(name, "threads");
        assert_eq!(scheduler.await_termination(Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_refused_job_returns_task() {
        let scheduler = CustomScheduler::new("refuser", Err);
        let rejected = scheduler.schedule(Task::from_fn(|_, _| {})).unwrap_err();
        assert!(matches!(rejected.reason, RejectReason::QueueFull { .. }));
        assert_eq!(scheduler.in_flight(), 0);
    }
}
