//! # Exception Mapper Module
//!
//! Failures raised anywhere in the dispatch pipeline are values of [`Failure`], tagged with a
//! static [`ErrorKind`]. Kinds form a single-inheritance hierarchy (each kind names its
//! parent), which gives exception mapping a well-defined "nearest superclass" distance.
//!
//! ## Built-in kinds
//!
//! ```text
//! Failure
//! ├── FrameworkFailure
//! │   ├── RoutingFailure
//! │   ├── ResolutionFailure
//! │   │   ├── MissingRequiredValue
//! │   │   ├── UnsupportedMediaType
//! │   │   ├── NotAcceptable
//! │   │   └── ConversionFailure
//! │   ├── SchedulingFailure
//! │   └── Abandoned
//! └── RuntimeFailure
//!     ├── IllegalArgument
//!     ├── IllegalState
//!     └── HandlerPanic
//! ```
//!
//! Applications add their own kinds with [`error_kind!`](crate::error_kind).
//!
//! ## Lookup
//!
//! A [`KindMapper`] holds `kind -> resolver` entries. An exact entry wins; otherwise the entry
//! with the smallest parent distance is used. Results are memoized per kind.
//!
//! ## Scopes
//!
//! Each route gets an [`ExceptionChain`] compiled at startup, queried in strict order:
//!
//! 1. handler-only mappers ([`ErrorHandlers::for_owner`]) whose owner is the route
//!    handler's owner type
//! 2. advice mappers ([`ErrorHandlers::advice`]) whose [`AdviceSelector`] selects the handler,
//!    ordered by priority and then declaration
//! 3. the [`InternalExceptionMapper`], which handles the `FrameworkFailure` subtree
//!    (404/405/400/415/406/500)
//!
//! The first mapper returning a resolver handles the failure. A failure nothing maps is
//! answered with a generic 500 and logged with its cause ([`write_unhandled`]).
//!
//! Error handlers are ordinary [`HandlerMethod`](crate::resolver::HandlerMethod)s: their
//! arguments and responses go through the same resolver framework as route handlers, and a
//! `ParamSource::Failure` parameter binds the failure being handled.

mod failure;
mod internal;
mod kind;
mod mapper;
mod scope;

pub use failure::{panic_message, Failure, FailureCategory};
pub use internal::{
    framework_status, write_unhandled, ErrorBodyWriter, InternalExceptionMapper,
    InternalExceptionResolver,
};
pub use kind::{
    ErrorKind, ABANDONED, CONVERSION_FAILURE, FAILURE, FRAMEWORK_FAILURE, HANDLER_PANIC,
    ILLEGAL_ARGUMENT, ILLEGAL_STATE, MISSING_REQUIRED_VALUE, NOT_ACCEPTABLE, RESOLUTION_FAILURE,
    ROUTING_FAILURE, RUNTIME_FAILURE, SCHEDULING_FAILURE, UNSUPPORTED_MEDIA_TYPE,
};
pub use mapper::{
    ExceptionMapper, ExceptionResolver, ExceptionResolverFactory, HandlerExceptionResolver,
    HandlerExceptionResolverFactory, KindMapper, KindMapperBuilder,
};
pub use scope::{
    AdviceSelector, ErrorHandlers, ExceptionChain, ExceptionRegistry, ExceptionRegistryBuilder,
    MapperScope,
};
