use crate::completion::Completion;
use crate::config::SchedulerTimeout;
use crate::exception::{write_unhandled, ErrorBodyWriter, ExceptionChain, Failure};
use crate::http::RequestContext;
use crate::mapping::Mapping;
use crate::media::MediaType;
use crate::resolver::{CompiledHandler, HandlerMethod};
use crate::scheduler::Scheduler;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A route as registered with the builder, before compilation
#[derive(Debug, Clone)]
pub struct RouteDefinition {
    pub mapping: Mapping,
    pub handler: HandlerMethod,
    /// Scheduler name; `None` uses the configured default
    pub scheduler: Option<String>,
}

impl RouteDefinition {
    pub fn new(mapping: Mapping, handler: HandlerMethod) -> Self {
        Self {
            mapping,
            handler,
            scheduler: None,
        }
    }

    pub fn on(mut self, scheduler: impl Into<String>) -> Self {
        self.scheduler = Some(scheduler.into());
        self
    }
}

/// Everything a matched route needs at request time, resolved once at startup
pub struct BoundRoute {
    pub(crate) compiled: CompiledHandler,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) timeout: Option<SchedulerTimeout>,
    pub(crate) exceptions: ExceptionChain,
    pub(crate) produces: Vec<MediaType>,
    pub(crate) executions: Arc<dyn ExecutionFactory>,
    pub(crate) errors: ErrorBodyWriter,
}

impl BoundRoute {
    pub fn handler(&self) -> &HandlerMethod {
        self.compiled.handler()
    }

    pub fn scheduler_name(&self) -> &str {
        self.scheduler.name()
    }

    pub fn timeout(&self) -> Option<SchedulerTimeout> {
        self.timeout
    }

    pub fn exceptions(&self) -> &ExceptionChain {
        &self.exceptions
    }

    /// Hand `failure` to the route's exception chain; unmapped failures become a generic 500
    pub(crate) fn handle_failure(&self, failure: Failure, mut request: RequestContext) -> Completion<RequestContext> {
        match self.exceptions.resolver_for(&failure) {
            Some(resolver) => {
                debug!(
                    request_id = %request.request_id,
                    handler = %self.handler().name(),
                    kind = failure.kind().name(),
                    "Failure mapped by exception chain"
                );
                resolver.resolve(&failure, request)
            }
            None => {
                write_unhandled(&self.errors, &failure, &mut request);
                Completion::ready(request)
            }
        }
    }
}

impl fmt::Debug for BoundRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundRoute")
            .field("handler", &self.handler().name())
            .field("scheduler", &self.scheduler.name())
            .field("timeout", &self.timeout)
            .field("exceptions", &self.exceptions.len())
            .finish()
    }
}

/// Runs after the response for a request is final, on the thread that finished it
pub type CompletionCallback = Box<dyn FnOnce(&RequestContext) + Send>;

/// One unit of request handling: the invocation step for a matched route plus an optional
/// completion callback.
///
/// Built per dispatch by the route's [`ExecutionFactory`] and consumed by the scheduled task.
pub struct Execution {
    invocation: Invocation,
    callback: Option<CompletionCallback>,
}

impl Execution {
    pub fn new(route: Arc<BoundRoute>, accept: Vec<MediaType>) -> Self {
        Self {
            invocation: Invocation { route, accept },
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: CompletionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn route(&self) -> &Arc<BoundRoute> {
        &self.invocation.route
    }

    /// Response types the request accepts, best first
    pub fn accept(&self) -> &[MediaType] {
        &self.invocation.accept
    }

    /// See [`Invocation::invoke`]
    pub fn invoke(&self, request: RequestContext, args: &mut Vec<Value>) -> Completion<RequestContext> {
        self.invocation.invoke(request, args)
    }

    /// The shareable invocation step and the one-shot callback
    pub(crate) fn into_parts(self) -> (Invocation, Option<CompletionCallback>) {
        (self.invocation, self.callback)
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("route", &self.invocation.route)
            .field("accept", &self.invocation.accept)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// The invocation step of an [`Execution`]; `Send + Sync`, so a filter chain terminal can
/// hold it
#[derive(Debug, Clone)]
pub struct Invocation {
    route: Arc<BoundRoute>,
    accept: Vec<MediaType>,
}

impl Invocation {
    pub fn route(&self) -> &Arc<BoundRoute> {
        &self.route
    }

    /// Resolve arguments, invoke the handler and write its reply into `request.response`.
    ///
    /// Every failure on the way goes through the route's exception chain, so the returned
    /// completion fails only when an exception resolver itself fails.
    pub fn invoke(&self, mut request: RequestContext, args: &mut Vec<Value>) -> Completion<RequestContext> {
        let pending = self.route.compiled.call(&mut request, None, args);
        let route = Arc::clone(&self.route);
        let accept = self.accept.clone();
        pending.then(move |outcome| {
            let written = outcome.and_then(|reply| {
                route
                    .compiled
                    .write_response(reply, &mut request, &accept, &route.produces)
            });
            match written {
                Ok(()) => Completion::ready(request),
                Err(failure) => {
                    if failure.status().map_or(true, |s| s >= 500) {
                        warn!(
                            request_id = %request.request_id,
                            handler = %route.handler().name(),
                            error = %failure,
                            "Handler failed"
                        );
                    }
                    route.handle_failure(failure, request)
                }
            }
        })
    }
}

/// Creates the [`Execution`] for each dispatch of a route
pub trait ExecutionFactory: Send + Sync {
    fn create(&self, route: &Arc<BoundRoute>, request: &RequestContext, accept: Vec<MediaType>) -> Execution;
}

/// Plain invocation with no completion callback
#[derive(Debug, Default)]
pub struct DefaultExecutionFactory;

impl ExecutionFactory for DefaultExecutionFactory {
    fn create(&self, route: &Arc<BoundRoute>, _request: &RequestContext, accept: Vec<MediaType>) -> Execution {
        Execution::new(Arc::clone(route), accept)
    }
}
