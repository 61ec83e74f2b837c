use super::core::{Dispatcher, Inner};
use super::execution::{BoundRoute, DefaultExecutionFactory, ExecutionFactory, RouteDefinition};
use super::reject::{DefaultRejectHandler, RejectHandler};
use crate::completion::raise_waiter_stack_size;
use crate::config::DispatchConfig;
use crate::error::BuildError;
use crate::exception::{
    ErrorBodyWriter, ErrorHandlers, ExceptionMapper, ExceptionRegistry, ExceptionRegistryBuilder,
    HandlerExceptionResolverFactory, MapperScope,
};
use crate::filter::{Filter, FilterChain, Middleware, MiddlewareFilter};
use crate::http::{ConnectionContext, RequestContext};
use crate::mapping::Mapping;
use crate::media::MediaType;
use crate::resolver::{HandlerMethod, ResolverRegistry};
use crate::router::RouteRegistry;
use crate::scheduler::{
    ImmediateScheduler, Scheduler, Schedulers, ScratchPool, WorkerPool, WorkerPoolConfig,
    DEFAULT_SCHEDULER,
};
use arc_swap::ArcSwap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything needed to turn [`RouteDefinition`]s into a route registry; kept by the
/// dispatcher for redeploys
pub(crate) struct RouteCompiler {
    pub(crate) config: DispatchConfig,
    pub(crate) resolvers: ResolverRegistry,
    pub(crate) exceptions: ExceptionRegistry,
    pub(crate) schedulers: Schedulers,
    pub(crate) executions: Arc<dyn ExecutionFactory>,
    pub(crate) errors: ErrorBodyWriter,
}

impl RouteCompiler {
    pub(crate) fn compile(&self, routes: Vec<RouteDefinition>) -> Result<RouteRegistry<BoundRoute>, BuildError> {
        let mut builder = RouteRegistry::builder().negotiation_param(self.config.negotiation_param.clone());
        for def in routes {
            let route_name = def
                .mapping
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| def.mapping.to_string());
            let scheduler_name = def
                .scheduler
                .as_deref()
                .unwrap_or(self.schedulers.default_name());
            let scheduler = self.schedulers.get(scheduler_name).ok_or_else(|| {
                BuildError::UnknownScheduler {
                    route: route_name.clone(),
                    scheduler: scheduler_name.to_string(),
                }
            })?;
            let produces: Vec<MediaType> = def
                .mapping
                .compile()?
                .produces()
                .producible()
                .cloned()
                .collect();
            let compiled = self.resolvers.compile(&def.handler)?;
            debug!(
                route = %route_name,
                handler = %def.handler.name(),
                scheduler = %scheduler_name,
                return_kind = def.handler.return_kind().as_str(),
                params = def.handler.params().len(),
                "Route bound"
            );
            let bound = BoundRoute {
                compiled,
                timeout: self.config.timeout_for(scheduler_name),
                scheduler,
                exceptions: self.exceptions.chain_for(&def.handler),
                produces,
                executions: Arc::clone(&self.executions),
                errors: self.errors.clone(),
            };
            builder = builder.route(def.mapping, bound);
        }
        let registry = builder.build()?;
        debug!(table = %registry.describe(), "Route table");
        Ok(registry)
    }
}

/// Composition root for a [`Dispatcher`].
///
/// Everything is registered explicitly and checked once in [`build`](Self::build): unknown
/// schedulers, unsupported handler parameters and invalid mapping expressions are startup
/// errors.
///
/// ```rust,no_run
/// use brrtdispatch::dispatcher::Dispatcher;
/// use brrtdispatch::mapping::Mapping;
/// use brrtdispatch::resolver::{HandlerMethod, Param, Reply};
/// use serde_json::json;
///
/// let get_user = HandlerMethod::builder("get_user")
///     .param(Param::path("id"))
///     .sync(|_req, args| Ok(Reply::Value(json!({ "id": args.str("id") }))));
///
/// let dispatcher = Dispatcher::builder()
///     .route(Mapping::get("/users/{id}"), get_user)
///     .build()
///     .expect("dispatcher");
/// ```
pub struct DispatcherBuilder {
    config: DispatchConfig,
    routes: Vec<RouteDefinition>,
    resolvers: Option<ResolverRegistry>,
    exceptions: ExceptionRegistryBuilder,
    route_filters: Vec<Arc<dyn Filter<RequestContext>>>,
    connection_filters: Vec<Arc<dyn Filter<ConnectionContext>>>,
    schedulers: Vec<Arc<dyn Scheduler>>,
    reject: Option<Arc<dyn RejectHandler>>,
    executions: Option<Arc<dyn ExecutionFactory>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            config: DispatchConfig::default(),
            routes: Vec::new(),
            resolvers: None,
            exceptions: ExceptionRegistry::builder(),
            route_filters: Vec::new(),
            connection_filters: Vec::new(),
            schedulers: Vec::new(),
            reject: None,
            executions: None,
        }
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Route on the default scheduler
    pub fn route(self, mapping: Mapping, handler: HandlerMethod) -> Self {
        self.definition(RouteDefinition::new(mapping, handler))
    }

    /// Route on a named scheduler
    pub fn route_on(self, mapping: Mapping, handler: HandlerMethod, scheduler: &str) -> Self {
        self.definition(RouteDefinition::new(mapping, handler).on(scheduler))
    }

    pub fn definition(mut self, route: RouteDefinition) -> Self {
        self.routes.push(route);
        self
    }

    /// Replace the default resolver registry
    pub fn resolvers(mut self, resolvers: ResolverRegistry) -> Self {
        self.resolvers = Some(resolvers);
        self
    }

    pub fn error_handlers(mut self, handlers: ErrorHandlers) -> Self {
        self.exceptions = self.exceptions.handlers(handlers);
        self
    }

    pub fn exception_mapper(mut self, scope: MapperScope, mapper: Arc<dyn ExceptionMapper>) -> Self {
        self.exceptions = self.exceptions.mapper(scope, mapper);
        self
    }

    /// Replace the built-in mapper for framework failures
    pub fn internal_mapper(mut self, mapper: Arc<dyn ExceptionMapper>) -> Self {
        self.exceptions = self.exceptions.internal(mapper);
        self
    }

    pub fn route_filter(mut self, filter: Arc<dyn Filter<RequestContext>>) -> Self {
        self.route_filters.push(filter);
        self
    }

    /// Add a `before`/`after` middleware as a route filter
    pub fn middleware(self, middleware: Arc<dyn Middleware>) -> Self {
        self.route_filter(Arc::new(MiddlewareFilter::new(middleware)))
    }

    pub fn connection_filter(mut self, filter: Arc<dyn Filter<ConnectionContext>>) -> Self {
        self.connection_filters.push(filter);
        self
    }

    /// Register a scheduler; replaces a built-in or configured one with the same name
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.schedulers.push(scheduler);
        self
    }

    pub fn reject_handler(mut self, handler: Arc<dyn RejectHandler>) -> Self {
        self.reject = Some(handler);
        self
    }

    pub fn execution_factory(mut self, factory: Arc<dyn ExecutionFactory>) -> Self {
        self.executions = Some(factory);
        self
    }

    pub fn build(self) -> Result<Dispatcher, BuildError> {
        let DispatcherBuilder {
            config,
            routes,
            resolvers,
            exceptions,
            route_filters,
            connection_filters,
            schedulers,
            reject,
            executions,
        } = self;

        let schedulers = start_schedulers(&config, schedulers)?;
        let resolvers = resolvers.unwrap_or_default();
        let factory =
            HandlerExceptionResolverFactory::new(resolvers.clone(), config.negotiation_param.clone());
        let errors = factory.error_bodies().clone();
        let exceptions = exceptions.error_bodies(errors.clone()).build(&factory)?;
        let global_exceptions = exceptions.global_chain();

        let compiler = RouteCompiler {
            config,
            resolvers,
            exceptions,
            schedulers,
            executions: executions.unwrap_or_else(|| Arc::new(DefaultExecutionFactory)),
            errors: errors.clone(),
        };
        let registry = compiler.compile(routes)?;

        info!(
            routes = registry.len(),
            schedulers = ?compiler.schedulers.names().collect::<Vec<_>>(),
            default_scheduler = %compiler.schedulers.default_name(),
            route_filters = route_filters.len(),
            connection_filters = connection_filters.len(),
            "Dispatcher ready"
        );

        Ok(Dispatcher::from_inner(Inner {
            routes: ArcSwap::from_pointee(registry),
            compiler,
            global_exceptions,
            route_filters: FilterChain::new(route_filters),
            connection_filters: FilterChain::new(connection_filters),
            reject: reject.unwrap_or_else(|| Arc::new(DefaultRejectHandler::new(errors.clone()))),
            errors,
            scratch: ScratchPool::default(),
            accepting: AtomicBool::new(true),
        }))
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `io` first, then user schedulers, then any configured pool not already registered. The
/// `biz` pool is always present.
fn start_schedulers(
    config: &DispatchConfig,
    custom: Vec<Arc<dyn Scheduler>>,
) -> Result<Schedulers, BuildError> {
    let mut schedulers = Schedulers::new(config.default_scheduler.clone());
    schedulers.register(Arc::new(ImmediateScheduler::new()));
    for scheduler in custom {
        schedulers.register(scheduler);
    }

    let mut pools: Vec<(String, WorkerPoolConfig)> = config
        .worker_pools
        .iter()
        .filter(|(name, _)| !schedulers.contains(name))
        .map(|(name, pool)| (name.clone(), pool.clone()))
        .collect();
    if !schedulers.contains(DEFAULT_SCHEDULER) && !config.worker_pools.contains_key(DEFAULT_SCHEDULER) {
        pools.push((DEFAULT_SCHEDULER.to_string(), WorkerPoolConfig::from_env()));
    }

    // Waiters complete asynchronous results and then run the rest of the pipeline, so they
    // need as much stack as the pool workers.
    if let Some(largest) = pools.iter().map(|(_, pool)| pool.stack_size).max() {
        raise_waiter_stack_size(largest);
    }

    for (name, pool_config) in pools {
        // SAFETY: WorkerPool::new spawns may coroutines. Tasks only run dispatch work that
        // blocks on may primitives (Completion::wait uses may channels), and the pool is
        // created during startup before any request is served.
        #[allow(unsafe_code)]
        let pool = unsafe { WorkerPool::new(&name, pool_config) }
            .map_err(|source| BuildError::SchedulerStart {
                name: name.clone(),
                source,
            })?;
        schedulers.register(Arc::new(pool));
    }

    if !schedulers.contains(schedulers.default_name()) {
        return Err(BuildError::MissingDefaultScheduler(
            schedulers.default_name().to_string(),
        ));
    }
    Ok(schedulers)
}
