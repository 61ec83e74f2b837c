//! # Async Result Unifier
//!
//! Handlers may produce a plain value or one of several unrelated asynchronous results. All of
//! them are normalized into one canonical type, [`Completion`], before the rest of the pipeline
//! sees them.
//!
//! ## Supported return shapes
//!
//! | [`ReturnKind`] | Handler returns | Adapter |
//! |----------------|-----------------|---------|
//! | `Sync` | `Result<Reply, Failure>` | [`Completion::from_result`] |
//! | `Future` | any `Future<Output = Result<Reply, Failure>> + Send` | [`from_future`] |
//! | `Coroutine` | `may::coroutine::JoinHandle<Result<Reply, Failure>>` | [`from_coroutine`] |
//! | `Channel` | `may::sync::mpsc::Receiver<Result<Reply, Failure>>` | [`from_channel`] |
//! | `Completion` | `Completion<Reply>` | identity |
//!
//! The adapter is chosen once, when the handler's
//! [`HandlerMethod`](crate::resolver::HandlerMethod) is built, never per call.
//!
//! ## Guarantees
//!
//! - A `Failure` produced by the foreign result is delivered unchanged (no extra wrapping)
//! - A completion completes exactly once
//! - Completing from any thread or coroutine is safe

pub mod adapters;
mod core;

pub use adapters::{
    from_channel, from_coroutine, from_future, raise_waiter_stack_size, waiter_stack_size,
};
pub use core::{pair, Completer, Completion};

/// Which adapter a handler's return value goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Sync,
    Future,
    Coroutine,
    Channel,
    Completion,
}

impl ReturnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnKind::Sync => "sync",
            ReturnKind::Future => "future",
            ReturnKind::Coroutine => "coroutine",
            ReturnKind::Channel => "channel",
            ReturnKind::Completion => "completion",
        }
    }

    pub fn is_async(&self) -> bool {
        !matches!(self, ReturnKind::Sync)
    }
}
