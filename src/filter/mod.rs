//! # Filter Chain Module
//!
//! Chain-of-responsibility around the dispatch pipeline. Two independent chains exist:
//!
//! - **connection filters** (`Filter<ConnectionContext>`) run once when the transport accepts
//!   a connection, through [`Dispatcher::accept_connection`](crate::dispatcher::Dispatcher::accept_connection)
//! - **route filters** (`Filter<RequestContext>`) run once per matched route, on the route's
//!   scheduler, around argument resolution, invocation and response writing
//!
//! Each filter gets the context by value and an owned [`Next`] continuation. Not calling
//! `next` short-circuits the chain; returning a pending completion and calling `next` from its
//! callback makes the filter asynchronous.
//!
//! The classic [`Middleware`] (synchronous `before`/`after` hooks) plugs in through
//! [`MiddlewareFilter`].

mod core;
mod metrics;
mod middleware;
mod tracing;

pub use core::{Filter, FilterChain, Next, Terminal};
pub use metrics::MetricsMiddleware;
pub use middleware::{Middleware, MiddlewareFilter};
pub use tracing::TracingFilter;
