//! # brrtdispatch
//!
//! **brrtdispatch** is the request dispatch core of a coroutine-powered HTTP stack, built on
//! the `may` runtime. It sits between a transport (which owns sockets and parses HTTP) and
//! application handlers: given a parsed request it picks a route, moves the work onto the
//! route's scheduler, binds handler arguments, invokes the handler, unifies whatever
//! asynchronous result it returns, maps failures to responses and serializes the reply.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//!
//! - **[`mapping`]** - Declarative route predicates (paths, methods, params, headers,
//!   consumes, produces) and their structural `combine`
//! - **[`router`]** - Route registry with a segment radix index and typed mismatch reasons
//! - **[`resolver`]** - Ordered resolver factories, converters, serializers and advices that
//!   bind handler arguments and write handler replies
//! - **[`completion`]** - The canonical [`Completion`](completion::Completion) every handler
//!   result is unified into, with adapters for futures, coroutines and channels
//! - **[`exception`]** - Error kinds, failures and scoped exception mappers
//! - **[`scheduler`]** - Named execution contexts: inline, worker pools and custom executors
//! - **[`filter`]** - Connection and route filter chains, middleware adapter, tracing filter
//! - **[`dispatcher`]** - The orchestrator composing all of the above
//! - **[`http`]** / **[`media`]** - Request context, response, media types and negotiation
//! - **[`config`]** / **[`logging`]** - Environment and file configuration, `tracing` setup
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Transport
//!     participant Dispatcher
//!     participant Router as RouteRegistry
//!     participant Scheduler
//!     participant Filters as Route Filters
//!     participant Resolvers as CompiledHandler
//!     participant Handler
//!     participant Mapper as ExceptionChain
//!
//!     Transport->>Dispatcher: service(RequestContext)
//!     Dispatcher->>Router: route_with(ctx, scratch)
//!     alt No Route Match
//!         Router-->>Dispatcher: RouteMismatch (reason)
//!         Dispatcher->>Mapper: global chain
//!         Mapper-->>Transport: 404 / 405 / 406 / 415
//!     end
//!     Router-->>Dispatcher: RouteMatch (BoundRoute, params, accept)
//!     Dispatcher->>Scheduler: schedule(Task)
//!     alt Rejected
//!         Scheduler-->>Dispatcher: Rejected (reason, task)
//!         Dispatcher-->>Transport: 503 / 504 via RejectHandler
//!     end
//!     Scheduler->>Filters: run(ctx, next)
//!     Filters->>Resolvers: resolve arguments
//!     Resolvers->>Handler: invoke(ctx, args)
//!     Handler-->>Resolvers: Completion<Reply>
//!     alt Failure
//!         Resolvers->>Mapper: route chain (handler, advice, internal)
//!     end
//!     Resolvers->>Resolvers: negotiate and serialize reply
//!     Resolvers-->>Transport: Completion<RequestContext>
//! ```
//!
//! ### Key Architectural Patterns
//!
//! 1. **Compile once, read forever**: routes, resolvers and exception chains are built at
//!    startup and only read while serving; redeploy swaps the route registry atomically
//! 2. **One hand-off**: routing runs on the transport thread, everything else on the route's
//!    scheduler
//! 3. **One result type**: sync values, futures, coroutines and channels all become a
//!    `Completion`
//! 4. **Errors are responses**: failures are mapped and serialized by the same machinery as
//!    normal replies
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use brrtdispatch::dispatcher::Dispatcher;
//! use brrtdispatch::http::RequestContext;
//! use brrtdispatch::mapping::Mapping;
//! use brrtdispatch::resolver::{HandlerMethod, Param, Reply};
//! use http::Method;
//! use serde_json::json;
//!
//! let get_user = HandlerMethod::builder("get_user")
//!     .param(Param::path("id"))
//!     .sync(|_req, args| Ok(Reply::Value(json!({ "id": args.str("id") }))));
//!
//! let dispatcher = Dispatcher::builder()
//!     .route(
//!         Mapping::builder()
//!             .path("/users/{id}")
//!             .method(Method::GET)
//!             .produces("application/json")
//!             .build(),
//!         get_user,
//!     )
//!     .build()
//!     .expect("dispatcher");
//!
//! let request = RequestContext::new(Method::GET, "/users/42").with_header("Accept", "application/json");
//! let done = dispatcher.service(request).wait().expect("response");
//! assert_eq!(done.response.status, 200);
//! ```
//!
//! ## Configuration
//!
//! See [`config`] for `BRRTD_*` environment variables and the YAML/TOML file format, and
//! [`logging`] for log level, format and sampling.

pub mod completion;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod exception;
pub mod filter;
pub mod http;
pub mod ids;
pub mod logging;
pub mod mapping;
pub mod media;
pub mod resolver;
pub mod router;
pub mod scheduler;

pub use completion::Completion;
pub use config::DispatchConfig;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::BuildError;
pub use exception::{ErrorKind, Failure};
pub use http::{HttpResponse, RequestContext};
pub use mapping::Mapping;
pub use resolver::{HandlerMethod, Param, ParamType, Reply};
