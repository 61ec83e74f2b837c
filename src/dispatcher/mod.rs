//! # Dispatcher Module
//!
//! The dispatcher composes routing, scheduling, argument resolution, invocation, result
//! unification and exception mapping into one `service` call per request.
//!
//! ## Request Flow
//!
//! ```text
//! transport thread                         route scheduler
//! ----------------                         ---------------
//! service(ctx)
//!   route (inline, non-blocking)
//!   |- mismatch -> global exception chain -> completion
//!   '- match -> Task ---- schedule ------> route filters
//!                   |                        resolve arguments
//!                   |                        invoke handler -> Completion<Reply>
//!                   |                        write response (negotiated)
//!                   |                        failure -> route exception chain
//!                   |                        connection / TTFB check
//!                   '- rejected -> RejectHandler
//! ```
//!
//! Routing never blocks and the hand-off to the scheduler is the only thread crossing. The
//! worker never waits on the transport thread.
//!
//! ## Building
//!
//! [`DispatcherBuilder`] is the composition root: routes, resolver registry, error handlers,
//! filters, schedulers and the reject hook are registered explicitly and checked once in
//! `build`. The built-in schedulers are `io` (inline) and `biz` (worker pool, always
//! created); `DispatchConfig::worker_pools` adds more.
//!
//! ## Redeploy and Shutdown
//!
//! [`Dispatcher::redeploy`] compiles a new route registry and swaps it in with `arc-swap`;
//! requests already routed keep their route. [`Dispatcher::shutdown`] stops accepting work,
//! closes every scheduler and reports tasks still unfinished after the timeout.
//!
//! ## Error Handling
//!
//! - routing, resolution and handler failures go through the exception chains
//! - scheduler rejections go to the [`RejectHandler`] (503/504 by default)
//! - failures no mapper handles become a generic 500 with the cause logged

mod builder;
mod core;
mod execution;
mod reject;

pub use builder::DispatcherBuilder;
pub use core::Dispatcher;
pub use execution::{
    BoundRoute, CompletionCallback, DefaultExecutionFactory, Execution, ExecutionFactory,
    Invocation, RouteDefinition,
};
pub use reject::{DefaultRejectHandler, RejectHandler};
