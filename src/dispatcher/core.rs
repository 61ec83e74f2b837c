//! Dispatcher core module - hot path for request dispatch.
//!
//! Routing runs inline on the caller's thread; everything after it (route filters, argument
//! resolution, invocation, response writing and exception mapping) runs on the matched
//! route's scheduler inside a single [`Task`].

use super::builder::{DispatcherBuilder, RouteCompiler};
use super::execution::{BoundRoute, CompletionCallback, Execution, Invocation, RouteDefinition};
use super::reject::RejectHandler;
use crate::completion::{pair, Completer, Completion};
use crate::config::{DispatchConfig, SchedulerTimeout, TimeoutMode};
use crate::error::BuildError;
use crate::exception::{write_unhandled, ErrorBodyWriter, ExceptionChain, Failure};
use crate::filter::FilterChain;
use crate::http::{ConnectionContext, RequestContext};
use crate::router::{RouteMatch, RouteMismatch, RouteRegistry};
use crate::scheduler::{
    InFlight, RejectReason, Rejected, Runnable, Schedulers, Scratch, ScratchPool, ShutdownReport,
    Task, TaskInfo, WorkerPoolMetrics,
};
use arc_swap::ArcSwap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub(crate) struct Inner {
    pub(crate) routes: ArcSwap<RouteRegistry<BoundRoute>>,
    pub(crate) compiler: RouteCompiler,
    pub(crate) global_exceptions: ExceptionChain,
    pub(crate) route_filters: FilterChain<RequestContext>,
    pub(crate) connection_filters: FilterChain<ConnectionContext>,
    pub(crate) reject: Arc<dyn RejectHandler>,
    pub(crate) errors: ErrorBodyWriter,
    pub(crate) scratch: ScratchPool,
    pub(crate) accepting: AtomicBool,
}

/// Top-level orchestrator: route, schedule, resolve, invoke, write, and map failures.
///
/// Cheap to clone; every clone shares the same registries and schedulers. The transport calls
/// [`accept_connection`](Self::accept_connection) once per connection and
/// [`service`](Self::service) once per request, then writes `response` from the context the
/// returned completion yields.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub(crate) fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.compiler.config
    }

    pub fn schedulers(&self) -> &Schedulers {
        &self.inner.compiler.schedulers
    }

    /// Snapshot of the active route registry
    pub fn routes(&self) -> Arc<RouteRegistry<BoundRoute>> {
        self.inner.routes.load_full()
    }

    /// Route without dispatching
    pub fn route(&self, request: &RequestContext) -> Result<RouteMatch<BoundRoute>, RouteMismatch> {
        let registry = self.inner.routes.load();
        let mut scratch = self.inner.scratch.acquire();
        registry.route_with(request, &mut scratch)
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Dispatch one request.
    ///
    /// The returned completion yields the context with `response` filled in. It fails only
    /// when nothing should be written: the connection closed before the response was ready
    /// (a `SchedulingFailure`), or an exception resolver itself failed.
    pub fn service(&self, mut request: RequestContext) -> Completion<RequestContext> {
        let inner = &self.inner;
        if !inner.accepting.load(Ordering::Acquire) {
            let (completer, completion) = pair();
            respond_rejected(inner.reject.as_ref(), RejectReason::ShuttingDown, request, completer);
            return completion;
        }

        let matched = {
            let registry = inner.routes.load();
            let mut scratch = inner.scratch.acquire();
            registry.route_with(&request, &mut scratch)
        };
        let RouteMatch {
            name,
            target: route,
            path_params,
            matrix_params,
            accept,
            ..
        } = match matched {
            Ok(m) => m,
            Err(mismatch) => return self.route_failed(mismatch, request),
        };

        request.route_name = Some(name);
        request.path_params = path_params;
        request.matrix_params = matrix_params;

        let execution = route.executions.create(&route, &request, accept);
        let (completer, completion) = pair();
        let received_at = request.received_at;
        let job = RouteJob {
            request,
            execution,
            filters: inner.route_filters.clone(),
            reject: Arc::clone(&inner.reject),
            completer,
        };
        let task = Task::new(job).with_timeout(route.timeout, received_at);
        if let Err(Rejected { reason, task }) = route.scheduler.schedule(task) {
            task.reject(reason);
        }
        completion
    }

    fn route_failed(&self, mismatch: RouteMismatch, mut request: RequestContext) -> Completion<RequestContext> {
        let failure = Failure::routing(mismatch);
        match self.inner.global_exceptions.resolver_for(&failure) {
            Some(resolver) => resolver.resolve(&failure, request),
            None => {
                write_unhandled(&self.inner.errors, &failure, &mut request);
                Completion::ready(request)
            }
        }
    }

    /// Run the connection filters for a newly accepted connection. A failed completion means
    /// the transport should close it.
    pub fn accept_connection(&self, connection: ConnectionContext) -> Completion<ConnectionContext> {
        if !self.is_accepting() {
            return Completion::failed(Failure::rejected(RejectReason::ShuttingDown));
        }
        debug!(connection_id = %connection.id, peer = ?connection.peer, "Connection accepted");
        self.inner
            .connection_filters
            .run(
                connection,
                Arc::new(|connection: ConnectionContext| Completion::ready(connection)),
            )
    }

    /// Compile `routes` against the existing resolvers, exception handlers and schedulers and
    /// swap them in atomically. Requests already routed finish on the routes they matched.
    pub fn redeploy(&self, routes: Vec<RouteDefinition>) -> Result<(), BuildError> {
        let registry = self.inner.compiler.compile(routes)?;
        let count = registry.len();
        self.inner.routes.store(Arc::new(registry));
        info!(routes = count, "Routes redeployed");
        Ok(())
    }

    /// Stop accepting work and wait up to `timeout` for scheduled tasks to finish
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        if self.inner.accepting.swap(false, Ordering::AcqRel) {
            info!(timeout_ms = timeout.as_millis() as u64, "Dispatcher shutting down");
        }
        let report = self.inner.compiler.schedulers.shutdown_all(timeout);
        if report.is_clean() {
            info!("Dispatcher stopped cleanly");
        } else {
            warn!(
                unfinished = report.total_unfinished(),
                schedulers = ?report.unfinished,
                "Dispatcher stopped with unfinished work"
            );
        }
        report
    }

    /// [`shutdown`](Self::shutdown) with the configured termination timeout
    pub fn stop(&self) -> ShutdownReport {
        self.shutdown(self.inner.compiler.config.termination_timeout())
    }

    /// Worker pool metrics for `scheduler`, if it is a pool
    pub fn metrics(&self, scheduler: &str) -> Option<Arc<WorkerPoolMetrics>> {
        self.inner.compiler.schedulers.get(scheduler)?.metrics()
    }

    /// Tasks queued, running, or awaiting an asynchronous result across all schedulers
    pub fn in_flight(&self) -> usize {
        let schedulers = &self.inner.compiler.schedulers;
        schedulers
            .names()
            .filter_map(|n| schedulers.get(n))
            .map(|s| s.in_flight())
            .sum()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.inner.routes.load().len())
            .field("schedulers", &self.inner.compiler.schedulers)
            .field("route_filters", &self.inner.route_filters.len())
            .field("connection_filters", &self.inner.connection_filters.len())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

/// The scheduled remainder of one request
struct RouteJob {
    request: RequestContext,
    execution: Execution,
    filters: FilterChain<RequestContext>,
    reject: Arc<dyn RejectHandler>,
    completer: Completer<RequestContext>,
}

impl Runnable for RouteJob {
    fn run(self: Box<Self>, scratch: &mut Scratch, info: TaskInfo) {
        let RouteJob {
            request,
            execution,
            filters,
            reject,
            completer,
        } = *self;
        let TaskInfo {
            scheduler,
            queued_for,
            worker_id,
            slot,
        } = info;

        debug!(
            request_id = %request.request_id,
            route = request.route_name.as_deref().unwrap_or("-"),
            scheduler = %scheduler,
            worker_id = ?worker_id,
            queued_us = queued_for.as_micros() as u64,
            "Route execution start"
        );

        let (invocation, callback) = execution.into_parts();
        let ttfb = invocation
            .route()
            .timeout()
            .filter(|t| t.mode == TimeoutMode::Ttfb);
        let pending = if filters.is_empty() {
            invocation.invoke(request, &mut scratch.args)
        } else {
            run_filtered(&filters, invocation, request)
        };
        // The slot is held until the response is final, however long an asynchronous
        // handler takes.
        pending.on_complete(move |outcome| finish(outcome, slot, ttfb, callback, reject, completer));
    }

    fn reject(self: Box<Self>, reason: RejectReason) {
        let RouteJob {
            request,
            reject,
            completer,
            ..
        } = *self;
        respond_rejected(reject.as_ref(), reason, request, completer);
    }
}

/// Route filters around the invocation. A filter that fails or panics before producing a
/// response has its failure mapped by the route's exception chain, against the request as
/// it was before the filters ran.
fn run_filtered(
    filters: &FilterChain<RequestContext>,
    invocation: Invocation,
    request: RequestContext,
) -> Completion<RequestContext> {
    let route = Arc::clone(invocation.route());
    let fallback = request.clone();
    let terminal = Arc::new(move |request: RequestContext| {
        let mut args = Vec::with_capacity(invocation.route().handler().params().len());
        invocation.invoke(request, &mut args)
    });
    let pending = match catch_unwind(AssertUnwindSafe(|| filters.run(request, terminal))) {
        Ok(pending) => pending,
        Err(panic) => Completion::failed(Failure::panic(&*panic)),
    };
    pending.or_else(move |failure| {
        warn!(
            request_id = %fallback.request_id,
            route = fallback.route_name.as_deref().unwrap_or("-"),
            kind = failure.kind().name(),
            error = %failure,
            "Route filter failed"
        );
        route.handle_failure(failure, fallback)
    })
}

fn finish(
    outcome: Result<RequestContext, Failure>,
    slot: InFlight,
    ttfb: Option<SchedulerTimeout>,
    callback: Option<CompletionCallback>,
    reject: Arc<dyn RejectHandler>,
    completer: Completer<RequestContext>,
) {
    slot.release();
    let request = match outcome {
        Ok(request) => request,
        Err(failure) => {
            error!(
                kind = failure.kind().name(),
                error = %failure,
                "Request failed without a response"
            );
            completer.fail(failure);
            return;
        }
    };

    if !request.connection.is_active() {
        respond_rejected(reject.as_ref(), RejectReason::ConnectionClosed, request, completer);
        return;
    }
    if let Some(timeout) = ttfb {
        let elapsed = request.elapsed();
        if elapsed > timeout.duration() {
            respond_rejected(
                reject.as_ref(),
                RejectReason::TtfbTimeout { elapsed },
                request,
                completer,
            );
            return;
        }
    }

    debug!(
        request_id = %request.request_id,
        status = request.response.status,
        latency_us = request.elapsed().as_micros() as u64,
        "Route execution complete"
    );
    if let Some(callback) = callback {
        callback(&request);
    }
    completer.succeed(request);
}

fn respond_rejected(
    handler: &dyn RejectHandler,
    reason: RejectReason,
    mut request: RequestContext,
    completer: Completer<RequestContext>,
) {
    if handler.on_reject(&reason, &mut request) {
        completer.succeed(request);
    } else {
        completer.fail(Failure::rejected(reason));
    }
}
