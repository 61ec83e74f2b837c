use super::scratch::Scratch;
use super::worker_pool::WorkerPoolMetrics;
use crate::config::{SchedulerTimeout, TimeoutMode};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name of the mandatory default worker pool scheduler
pub const DEFAULT_SCHEDULER: &str = "biz";

/// Name of the scheduler that runs work inline on the calling (IO) thread
pub const IO_SCHEDULER: &str = "io";

/// Why a scheduler refused or abandoned a task
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// The pool's in-flight bound was reached
    #[error("rejected while queued: queue full (bound {bound})")]
    QueueFull { bound: usize },
    /// The scheduler no longer accepts work
    #[error("rejected while queued: scheduler is shutting down")]
    ShuttingDown,
    /// The task waited in the queue longer than the scheduler's queued timeout
    #[error("rejected while queued: waited {waited:?}")]
    QueuedTimeout { waited: Duration },
    /// The request exceeded its time-to-first-byte budget
    #[error("rejected at time to first byte: {elapsed:?} since arrival")]
    TtfbTimeout { elapsed: Duration },
    /// The connection became unusable before the response could be flushed
    #[error("rejected at time to first byte: connection closed")]
    ConnectionClosed,
}

/// Whether a rejection happened before execution started or while trying to respond
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectPhase {
    Queued,
    Ttfb,
}

impl RejectReason {
    pub fn phase(&self) -> RejectPhase {
        match self {
            RejectReason::QueueFull { .. }
            | RejectReason::ShuttingDown
            | RejectReason::QueuedTimeout { .. } => RejectPhase::Queued,
            RejectReason::TtfbTimeout { .. } | RejectReason::ConnectionClosed => RejectPhase::Ttfb,
        }
    }
}

/// One unit of a scheduler's in-flight count.
///
/// The scheduler hands the slot to the task it runs; dropping it (or calling
/// [`release`](Self::release)) marks the task finished. A task whose result arrives later
/// keeps its slot until then, so shutdown and the pool bound both see asynchronous work.
pub struct InFlight {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl InFlight {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A slot that counts nothing
    pub fn untracked() -> Self {
        Self { release: None }
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("tracked", &self.release.is_some())
            .finish()
    }
}

/// Context handed to a task when it runs
#[derive(Debug)]
pub struct TaskInfo {
    /// Scheduler the task runs on
    pub scheduler: Arc<str>,
    /// Time spent between `schedule` and execution
    pub queued_for: Duration,
    /// Worker index for pool schedulers
    pub worker_id: Option<usize>,
    /// The task's in-flight slot; released when dropped
    pub slot: InFlight,
}

/// Unit of work accepted by a [`Scheduler`].
///
/// Exactly one of `run` or `reject` is called for every task handed to a scheduler.
pub trait Runnable: Send + 'static {
    fn run(self: Box<Self>, scratch: &mut Scratch, info: TaskInfo);

    fn reject(self: Box<Self>, reason: RejectReason);
}

struct FnRunnable<F>(F);

impl<F> Runnable for FnRunnable<F>
where
    F: FnOnce(&mut Scratch, TaskInfo) + Send + 'static,
{
    fn run(self: Box<Self>, scratch: &mut Scratch, info: TaskInfo) {
        (self.0)(scratch, info)
    }

    fn reject(self: Box<Self>, reason: RejectReason) {
        warn!(reason = %reason, "Task rejected");
    }
}

/// A scheduled unit of work plus its timing budget
pub struct Task {
    runnable: Box<dyn Runnable>,
    enqueued_at: Instant,
    received_at: Instant,
    timeout: Option<SchedulerTimeout>,
    slot: InFlight,
}

impl Task {
    pub fn new<R: Runnable>(runnable: R) -> Self {
        let now = Instant::now();
        Self {
            runnable: Box::new(runnable),
            enqueued_at: now,
            received_at: now,
            timeout: None,
            slot: InFlight::untracked(),
        }
    }

    /// Task from a closure; rejection is only logged
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce(&mut Scratch, TaskInfo) + Send + 'static,
    {
        Self::new(FnRunnable(f))
    }

    /// Attach a timeout. `received_at` is the request arrival time used by `ttfb` timeouts.
    pub fn with_timeout(mut self, timeout: Option<SchedulerTimeout>, received_at: Instant) -> Self {
        self.timeout = timeout;
        self.received_at = received_at;
        self
    }

    /// Attach the scheduler's in-flight slot; it travels with the task until the work is done
    pub fn hold(mut self, slot: InFlight) -> Self {
        self.slot = slot;
        self
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Rejection reason if the task's timeout has already elapsed
    pub fn expired(&self) -> Option<RejectReason> {
        let timeout = self.timeout?;
        match timeout.mode {
            TimeoutMode::Queued => {
                let waited = self.enqueued_at.elapsed();
                (waited > timeout.duration()).then_some(RejectReason::QueuedTimeout { waited })
            }
            TimeoutMode::Ttfb => {
                let elapsed = self.received_at.elapsed();
                (elapsed > timeout.duration()).then_some(RejectReason::TtfbTimeout { elapsed })
            }
        }
    }

    /// Run the task, or reject it if its timeout elapsed while it was queued
    pub fn run(self, scratch: &mut Scratch, scheduler: &Arc<str>, worker_id: Option<usize>) {
        if let Some(reason) = self.expired() {
            debug!(scheduler = %scheduler, reason = %reason, "Task expired before execution");
            self.runnable.reject(reason);
            return;
        }
        let info = TaskInfo {
            scheduler: Arc::clone(scheduler),
            queued_for: self.enqueued_at.elapsed(),
            worker_id,
            slot: self.slot,
        };
        scratch.reset();
        self.runnable.run(scratch, info);
    }

    pub fn reject(self, reason: RejectReason) {
        self.runnable.reject(reason);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("enqueued_at", &self.enqueued_at)
            .field("timeout", &self.timeout)
            .field("slot", &self.slot)
            .finish()
    }
}

/// Synchronous rejection: the reason plus the task, handed back to the caller
#[derive(Debug)]
pub struct Rejected {
    pub reason: RejectReason,
    pub task: Task,
}

/// A named execution context that runs [`Task`]s.
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &str;

    /// Accept a task or reject it synchronously
    fn schedule(&self, task: Task) -> Result<(), Rejected>;

    /// Stop accepting new tasks; already accepted tasks still run
    fn shutdown(&self);

    /// Wait for accepted tasks to finish; returns how many are still unfinished
    fn await_termination(&self, timeout: Duration) -> usize;

    /// Tasks accepted but not finished
    fn in_flight(&self) -> usize;

    fn metrics(&self) -> Option<Arc<WorkerPoolMetrics>> {
        None
    }
}

/// Outcome of a graceful shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Unfinished task count per scheduler, only for schedulers that did not drain
    pub unfinished: BTreeMap<String, usize>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.unfinished.is_empty()
    }

    pub fn total_unfinished(&self) -> usize {
        self.unfinished.values().sum()
    }
}

/// Registry of schedulers by name, resolved once at startup
#[derive(Clone)]
pub struct Schedulers {
    by_name: HashMap<String, Arc<dyn Scheduler>>,
    order: Vec<String>,
    default_name: String,
}

impl Schedulers {
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            by_name: HashMap::new(),
            order: Vec::new(),
            default_name: default_name.into(),
        }
    }

    /// Register a scheduler, replacing one with the same name
    pub fn register(&mut self, scheduler: Arc<dyn Scheduler>) {
        let name = scheduler.name().to_string();
        if self.by_name.insert(name.clone(), scheduler).is_none() {
            self.order.push(name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Scheduler>> {
        self.by_name.get(name).cloned()
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Scheduler for a route: the named one, or the default when `None`
    pub fn resolve(&self, name: Option<&str>) -> Option<Arc<dyn Scheduler>> {
        self.get(name.unwrap_or(&self.default_name))
    }

    /// Names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Stop every scheduler and wait up to `timeout` in total for them to drain
    pub fn shutdown_all(&self, timeout: Duration) -> ShutdownReport {
        for name in &self.order {
            if let Some(s) = self.by_name.get(name) {
                s.shutdown();
            }
        }
        let deadline = Instant::now() + timeout;
        let mut report = ShutdownReport::default();
        for name in &self.order {
            let Some(s) = self.by_name.get(name) else {
                continue;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            let unfinished = s.await_termination(remaining);
            if unfinished > 0 {
                warn!(
                    scheduler = %name,
                    unfinished = unfinished,
                    "Scheduler did not drain before termination timeout"
                );
                report.unfinished.insert(name.clone(), unfinished);
            } else {
                info!(scheduler = %name, "Scheduler drained");
            }
        }
        report
    }
}

impl fmt::Debug for Schedulers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedulers")
            .field("names", &self.order)
            .field("default", &self.default_name)
            .finish()
    }
}

/// Sleep that yields when called from a coroutine
pub(crate) fn pause(duration: Duration) {
    may::coroutine::sleep(duration);
}
