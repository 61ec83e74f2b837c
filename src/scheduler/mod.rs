//! # Scheduler Dispatch Module
//!
//! Schedulers decide where the resolution and invocation work for a matched route runs. The
//! dispatcher routes inline on the calling (IO) thread and then makes exactly one hand-off:
//! it wraps the rest of the request in a [`Task`] and submits it to the route's scheduler.
//!
//! ## Built-in schedulers
//!
//! - [`WorkerPool`] - bounded pool of `may` worker coroutines; the mandatory default `biz`
//! - [`ImmediateScheduler`] - runs on the calling thread; registered as `io`
//! - [`CustomScheduler`] - wraps any user executor function
//!
//! ## Rejection
//!
//! A scheduler that cannot accept a task returns it synchronously inside [`Rejected`] with a
//! [`RejectReason`]. Reasons are split by [`RejectPhase`]: *queued* rejections (pool saturated,
//! shutting down, queued timeout) happen before execution starts; *time-to-first-byte*
//! rejections (TTFB budget exceeded, connection closed) happen when the response could not be
//! delivered. Every task gets exactly one of `run` or `reject`.
//!
//! ## Timeouts
//!
//! A task carries an optional [`SchedulerTimeout`](crate::config::SchedulerTimeout). When a
//! worker picks up a task whose timeout already elapsed, the task is rejected without running.
//!
//! ## In-flight accounting
//!
//! Every scheduler attaches an [`InFlight`] slot to the tasks it runs. The slot is released
//! when the task drops it, which for a route is when its response is final, not when the
//! handler returned a pending result.

mod core;
mod custom;
mod immediate;
mod scratch;
mod worker_pool;

pub use core::{
    InFlight, RejectPhase, RejectReason, Rejected, Runnable, Scheduler, Schedulers, ShutdownReport,
    Task, TaskInfo, DEFAULT_SCHEDULER, IO_SCHEDULER,
};
pub use custom::{CustomScheduler, Executor, Job};
pub use immediate::ImmediateScheduler;
pub use scratch::{PooledScratch, Scratch, ScratchPool};
pub use worker_pool::{BackpressureMode, WorkerPool, WorkerPoolConfig, WorkerPoolMetrics};
