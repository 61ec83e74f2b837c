//! # Worker Pool Scheduler
//!
//! A bounded pool of `may` worker coroutines sharing one task queue. This is the scheduler
//! behind the mandatory default name (`biz`) and any additional pools configured by name.
//!
//! ## Features
//!
//! - **Worker coroutines**: N workers share one MPSC receiver and load balance automatically
//! - **Bounded in-flight work**: at most `queue_bound` tasks are queued, running, or waiting on
//!   an asynchronous handler result at once
//! - **Backpressure**: `shed` rejects immediately at the bound; `block` waits up to
//!   `backpressure_timeout_ms` for capacity and then rejects
//! - **Per-worker scratch**: each worker owns a [`Scratch`] reused across tasks
//! - **Metrics**: shed count, in-flight depth, dispatched and completed counts
//! - **Graceful drain**: after `shutdown` the queue is closed, workers finish what was accepted
//!
//! ## Configuration
//!
//! - `BRRTD_HANDLER_WORKERS`: Number of worker coroutines (default: 4)
//! - `BRRTD_HANDLER_QUEUE_BOUND`: Maximum in-flight tasks (default: 1024)
//! - `BRRTD_BACKPRESSURE_MODE`: `block` or `shed` (default: shed)
//! - `BRRTD_BACKPRESSURE_TIMEOUT_MS`: How long `block` waits for capacity (default: 50)
//! - `BRRTD_STACK_SIZE`: Worker coroutine stack size, decimal or `0x` hex (default: 0x10000)

use super::core::{pause, InFlight, RejectReason, Rejected, Scheduler, Task};
use super::scratch::Scratch;
use crate::config::parse_stack_size;
use may::sync::mpsc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Configuration for worker pool backpressure behavior
///
/// `schedule` is called from [`Dispatcher::service`](crate::dispatcher::Dispatcher::service),
/// which runs on the transport's IO thread. `Block` parks that thread (or coroutine) for up
/// to `backpressure_timeout_ms` while the pool is full, so it trades IO latency for fewer
/// rejections; the default is `Shed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureMode {
    /// Wait for capacity up to the backpressure timeout, then reject
    Block,
    /// Reject immediately when the pool is at its bound
    #[default]
    Shed,
}

impl BackpressureMode {
    /// Parse backpressure mode from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "block" => Some(Self::Block),
            "shed" => Some(Self::Shed),
            _ => None,
        }
    }
}

fn default_num_workers() -> usize {
    4
}

fn default_queue_bound() -> usize {
    1024
}

fn default_backpressure_timeout_ms() -> u64 {
    50
}

fn default_stack_size() -> usize {
    0x10000
}

/// Configuration for a worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of worker coroutines
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Maximum number of tasks queued or running
    #[serde(default = "default_queue_bound")]
    pub queue_bound: usize,
    /// Backpressure mode
    #[serde(default)]
    pub backpressure_mode: BackpressureMode,
    /// Timeout for block mode in milliseconds
    #[serde(default = "default_backpressure_timeout_ms")]
    pub backpressure_timeout_ms: u64,
    /// Stack size for worker coroutines
    #[serde(default = "default_stack_size")]
    pub stack_size: usize,
}

impl WorkerPoolConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let num_workers = std::env::var("BRRTD_HANDLER_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_num_workers);

        let queue_bound = std::env::var("BRRTD_HANDLER_QUEUE_BOUND")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_queue_bound);

        let backpressure_mode = std::env::var("BRRTD_BACKPRESSURE_MODE")
            .ok()
            .and_then(|s| BackpressureMode::parse(&s))
            .unwrap_or_default();

        let backpressure_timeout_ms = std::env::var("BRRTD_BACKPRESSURE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_backpressure_timeout_ms);

        let stack_size = std::env::var("BRRTD_STACK_SIZE")
            .ok()
            .and_then(|s| parse_stack_size(&s))
            .unwrap_or_else(default_stack_size);

        Self {
            num_workers,
            queue_bound,
            backpressure_mode,
            backpressure_timeout_ms,
            stack_size,
        }
    }

    /// Create a custom configuration
    pub fn new(
        num_workers: usize,
        queue_bound: usize,
        backpressure_mode: BackpressureMode,
        backpressure_timeout_ms: u64,
        stack_size: usize,
    ) -> Self {
        Self {
            num_workers,
            queue_bound,
            backpressure_mode,
            backpressure_timeout_ms,
            stack_size,
        }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            queue_bound: default_queue_bound(),
            backpressure_mode: BackpressureMode::Shed,
            backpressure_timeout_ms: default_backpressure_timeout_ms(),
            stack_size: default_stack_size(),
        }
    }
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Number of tasks rejected because the pool was at its bound
    pub shed_count: AtomicU64,
    /// Tasks currently queued, running, or waiting on an asynchronous result
    pub queue_depth: AtomicUsize,
    /// Total tasks accepted
    pub dispatched_count: AtomicU64,
    /// Total tasks finished (response final or rejected by timeout)
    pub completed_count: AtomicU64,
}

impl WorkerPoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim one in-flight slot if the depth is below `bound`
    pub fn try_reserve(&self, bound: usize) -> bool {
        self.queue_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                (depth < bound).then_some(depth + 1)
            })
            .is_ok()
    }

    /// Give back a slot claimed by `try_reserve` without dispatching
    pub fn release(&self) {
        self.queue_depth.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn record_shed(&self) {
        self.shed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn get_shed_count(&self) -> u64 {
        self.shed_count.load(Ordering::Relaxed)
    }

    pub fn get_queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Acquire)
    }

    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }
}

/// A bounded worker pool scheduler
pub struct WorkerPool {
    name: Arc<str>,
    config: WorkerPoolConfig,
    /// `None` once shut down; dropping the sender lets workers drain and exit
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    metrics: Arc<WorkerPoolMetrics>,
    accepting: AtomicBool,
    live_workers: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a new worker pool and spawn its workers
    ///
    /// # Safety
    ///
    /// This function is marked unsafe because it spawns coroutines using
    /// `may::coroutine::Builder::spawn()`, which is unsafe in the `may` runtime. Tasks run on
    /// these coroutines must not hold thread-local references across blocking calls or block
    /// the OS thread with non-`may` primitives for long periods.
    ///
    /// # Errors
    ///
    /// Returns the spawn error if any worker coroutine could not be created.
    pub unsafe fn new(name: &str, config: WorkerPoolConfig) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Task>();
        let rx = Arc::new(rx);
        let name: Arc<str> = Arc::from(name);
        let metrics = Arc::new(WorkerPoolMetrics::new());
        let live_workers = Arc::new(AtomicUsize::new(0));

        info!(
            scheduler = %name,
            num_workers = config.num_workers,
            queue_bound = config.queue_bound,
            backpressure_mode = ?config.backpressure_mode,
            stack_size = config.stack_size,
            "Creating worker pool"
        );

        for worker_id in 0..config.num_workers.max(1) {
            let rx = Arc::clone(&rx);
            let worker_name = Arc::clone(&name);
            let metrics = Arc::clone(&metrics);
            let live = Arc::clone(&live_workers);
            live.fetch_add(1, Ordering::AcqRel);

            let spawn_result = may::coroutine::Builder::new()
                .name(format!("{}-{}", name, worker_id))
                .stack_size(config.stack_size)
                .spawn(move || {
                    let name = worker_name;
                    debug!(scheduler = %name, worker_id = worker_id, "Worker coroutine started");
                    let mut scratch = Scratch::default();

                    // All workers share the receiver and load balance across tasks.
                    while let Ok(task) = rx.recv() {
                        // The slot stays taken until the task's response is final, which
                        // for asynchronous handlers is after this loop iteration.
                        let done = Arc::clone(&metrics);
                        let task = task.hold(InFlight::new(move || done.record_completion()));
                        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| {
                            task.run(&mut scratch, &name, Some(worker_id));
                        })) {
                            error!(
                                scheduler = %name,
                                worker_id = worker_id,
                                panic_message = %crate::exception::panic_message(&*panic),
                                "Task panicked outside handler recovery - CRITICAL"
                            );
                            scratch = Scratch::default();
                        }
                    }

                    live.fetch_sub(1, Ordering::AcqRel);
                    debug!(scheduler = %name, worker_id = worker_id, "Worker coroutine exiting");
                });

            if let Err(e) = spawn_result {
                live_workers.fetch_sub(1, Ordering::AcqRel);
                error!(
                    scheduler = %name,
                    worker_id = worker_id,
                    error = %e,
                    "Failed to spawn worker coroutine"
                );
                return Err(e);
            }
        }

        Ok(Self {
            name,
            config,
            sender: Mutex::new(Some(tx)),
            metrics,
            accepting: AtomicBool::new(true),
            live_workers,
        })
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Number of worker coroutines still running
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::Acquire)
    }

    /// Claim capacity according to the backpressure mode
    fn reserve(&self) -> Result<(), RejectReason> {
        let bound = self.config.queue_bound.max(1);
        if self.metrics.try_reserve(bound) {
            return Ok(());
        }
        match self.config.backpressure_mode {
            BackpressureMode::Shed => {}
            BackpressureMode::Block => {
                let deadline =
                    Instant::now() + Duration::from_millis(self.config.backpressure_timeout_ms);
                while Instant::now() < deadline {
                    if !self.accepting.load(Ordering::Acquire) {
                        return Err(RejectReason::ShuttingDown);
                    }
                    pause(Duration::from_millis(1));
                    if self.metrics.try_reserve(bound) {
                        return Ok(());
                    }
                }
            }
        }
        self.metrics.record_shed();
        warn!(
            scheduler = %self.name,
            queue_depth = self.metrics.get_queue_depth(),
            queue_bound = bound,
            backpressure_mode = ?self.config.backpressure_mode,
            "Worker pool at capacity - rejecting task"
        );
        Err(RejectReason::QueueFull { bound })
    }
}

impl Scheduler for WorkerPool {
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
        if let Err(reason) = self.reserve() {
            return Err(Rejected { reason, task });
        }

        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            self.metrics.release();
            return Err(Rejected {
                reason: RejectReason::ShuttingDown,
                task,
            });
        };
        match sender.send(task) {
            Ok(()) => {
                self.metrics.record_dispatch();
                Ok(())
            }
            Err(std::sync::mpsc::SendError(task)) => {
                self.metrics.release();
                error!(scheduler = %self.name, "Worker pool channel disconnected");
                Err(Rejected {
                    reason: RejectReason::ShuttingDown,
                    task,
                })
            }
        }
    }

    fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!(
                scheduler = %self.name,
                in_flight = self.metrics.get_queue_depth(),
                "Worker pool shutting down"
            );
        }
        self.sender.lock().take();
    }

    fn await_termination(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let depth = self.metrics.get_queue_depth();
            if depth == 0 || Instant::now() >= deadline {
                return depth;
            }
            pause(Duration::from_millis(1));
        }
    }

    fn in_flight(&self) -> usize {
        self.metrics.get_queue_depth()
    }

    fn metrics(&self) -> Option<Arc<WorkerPoolMetrics>> {
        Some(Arc::clone(&self.metrics))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.lock().take();
    }
}
