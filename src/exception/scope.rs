use super::failure::Failure;
use super::internal::{ErrorBodyWriter, InternalExceptionMapper};
use super::kind::ErrorKind;
use super::mapper::{ExceptionMapper, ExceptionResolver, ExceptionResolverFactory, KindMapper};
use crate::error::BuildError;
use crate::resolver::{HandlerMethod, HandlerOwner};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Which handlers a cross-cutting advice applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdviceSelector {
    /// Every handler, and route-less failures such as route not found
    Any,
    /// Handlers whose owner lives in this module path or below it
    ModulePrefix(&'static str),
    /// Handlers whose owner is, or declares as a supertype, this type
    AssignableTo(&'static str),
    /// Handlers whose owner carries this marker
    Marker(&'static str),
}

impl AdviceSelector {
    pub fn selects(&self, owner: &HandlerOwner) -> bool {
        match self {
            AdviceSelector::Any => true,
            AdviceSelector::ModulePrefix(prefix) => {
                owner.module_path == *prefix
                    || owner
                        .module_path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with("::"))
            }
            AdviceSelector::AssignableTo(type_name) => owner.is_assignable_to(type_name),
            AdviceSelector::Marker(marker) => owner.has_marker(marker),
        }
    }
}

/// Precedence class of a mapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapperScope {
    /// Only for handlers declared by this owner type; highest precedence
    Handler { owner: &'static str },
    /// Cross-cutting, gated by a selector and ordered by priority (lower first), then by
    /// declaration order
    Advice {
        selector: AdviceSelector,
        priority: i32,
    },
}

enum Target {
    Method(HandlerMethod),
    Resolver(Arc<dyn ExceptionResolver>),
}

/// A group of error handlers sharing one scope, compiled into one [`KindMapper`].
///
/// ```rust
/// use brrtdispatch::exception::{AdviceSelector, ErrorHandlers, RUNTIME_FAILURE};
/// use brrtdispatch::resolver::{HandlerMethod, Param, ParamType, Reply};
///
/// let advice = ErrorHandlers::advice()
///     .selector(AdviceSelector::ModulePrefix("app::api"))
///     .priority(10)
///     .on(
///         &RUNTIME_FAILURE,
///         HandlerMethod::builder("on_runtime")
///             .param(Param::failure().of(ParamType::String))
///             .status(500)
///             .sync(|_, args| Ok(Reply::Text(args.str("failure").unwrap_or("").to_string()))),
///     );
/// assert_eq!(advice.len(), 1);
/// ```
pub struct ErrorHandlers {
    scope: MapperScope,
    entries: Vec<(&'static ErrorKind, Target)>,
}

impl ErrorHandlers {
    /// Handlers that only apply to routes whose handler owner is `owner`
    pub fn for_owner(owner: &'static str) -> Self {
        Self {
            scope: MapperScope::Handler { owner },
            entries: Vec::new(),
        }
    }

    /// Cross-cutting handlers; selector `Any` and priority 0 unless changed
    pub fn advice() -> Self {
        Self {
            scope: MapperScope::Advice {
                selector: AdviceSelector::Any,
                priority: 0,
            },
            entries: Vec::new(),
        }
    }

    pub fn selector(mut self, selector: AdviceSelector) -> Self {
        if let MapperScope::Advice { selector: s, .. } = &mut self.scope {
            *s = selector;
        }
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        if let MapperScope::Advice { priority: p, .. } = &mut self.scope {
            *p = priority;
        }
        self
    }

    /// Handle `kind` and its descendants with an error handler method
    pub fn on(mut self, kind: &'static ErrorKind, handler: HandlerMethod) -> Self {
        self.entries.push((kind, Target::Method(handler)));
        self
    }

    /// Handle `kind` and its descendants with a ready-made resolver
    pub fn on_resolver(mut self, kind: &'static ErrorKind, resolver: Arc<dyn ExceptionResolver>) -> Self {
        self.entries.push((kind, Target::Resolver(resolver)));
        self
    }

    pub fn scope(&self) -> &MapperScope {
        &self.scope
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn compile(self, factory: &dyn ExceptionResolverFactory) -> Result<(MapperScope, Arc<dyn ExceptionMapper>), BuildError> {
        let mut builder = KindMapper::builder();
        for (kind, target) in self.entries {
            let resolver = match target {
                Target::Method(handler) => factory.create_resolver(&handler)?,
                Target::Resolver(resolver) => resolver,
            };
            builder = builder.on(kind, resolver);
        }
        Ok((self.scope, Arc::new(builder.build())))
    }
}

struct AdviceEntry {
    selector: AdviceSelector,
    priority: i32,
    mapper: Arc<dyn ExceptionMapper>,
}

/// Every registered mapper, grouped by scope.
///
/// Read-only after build; [`chain_for`](Self::chain_for) computes a route's chain once at
/// startup.
pub struct ExceptionRegistry {
    handler_scoped: Vec<(&'static str, Arc<dyn ExceptionMapper>)>,
    advice: Vec<AdviceEntry>,
    internal: Arc<dyn ExceptionMapper>,
}

impl ExceptionRegistry {
    pub fn builder() -> ExceptionRegistryBuilder {
        ExceptionRegistryBuilder {
            groups: Vec::new(),
            mappers: Vec::new(),
            internal: None,
            error_bodies: None,
        }
    }

    /// Mapper chain for a route's handler: handler-only mappers of the handler's owner, then
    /// selected advice, then the internal mapper
    pub fn chain_for(&self, handler: &HandlerMethod) -> ExceptionChain {
        let owner = handler.owner();
        let mut mappers: Vec<Arc<dyn ExceptionMapper>> = self
            .handler_scoped
            .iter()
            .filter(|(scope_owner, m)| *scope_owner == owner.type_name && m.is_applicable(handler))
            .map(|(_, m)| Arc::clone(m))
            .collect();
        mappers.extend(
            self.advice
                .iter()
                .filter(|a| a.selector.selects(owner) && a.mapper.is_applicable(handler))
                .map(|a| Arc::clone(&a.mapper)),
        );
        mappers.push(Arc::clone(&self.internal));
        debug!(
            handler = %handler.name(),
            mappers = mappers.len(),
            "Exception chain compiled"
        );
        ExceptionChain { mappers }
    }

    /// Chain for failures with no handler (route not found, rejected before routing): advice
    /// without a selector, then the internal mapper
    pub fn global_chain(&self) -> ExceptionChain {
        let mut mappers: Vec<Arc<dyn ExceptionMapper>> = self
            .advice
            .iter()
            .filter(|a| a.selector == AdviceSelector::Any)
            .map(|a| Arc::clone(&a.mapper))
            .collect();
        mappers.push(Arc::clone(&self.internal));
        ExceptionChain { mappers }
    }
}

impl fmt::Debug for ExceptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionRegistry")
            .field(
                "handler_scoped",
                &self.handler_scoped.iter().map(|(o, _)| *o).collect::<Vec<_>>(),
            )
            .field(
                "advice",
                &self
                    .advice
                    .iter()
                    .map(|a| (&a.selector, a.priority))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

pub struct ExceptionRegistryBuilder {
    groups: Vec<ErrorHandlers>,
    mappers: Vec<(MapperScope, Arc<dyn ExceptionMapper>)>,
    internal: Option<Arc<dyn ExceptionMapper>>,
    error_bodies: Option<ErrorBodyWriter>,
}

impl ExceptionRegistryBuilder {
    pub fn handlers(mut self, handlers: ErrorHandlers) -> Self {
        self.groups.push(handlers);
        self
    }

    /// Register a custom mapper in `scope`
    pub fn mapper(mut self, scope: MapperScope, mapper: Arc<dyn ExceptionMapper>) -> Self {
        self.mappers.push((scope, mapper));
        self
    }

    /// Replace the built-in internal mapper
    pub fn internal(mut self, mapper: Arc<dyn ExceptionMapper>) -> Self {
        self.internal = Some(mapper);
        self
    }

    /// Writer the built-in internal mapper uses for error bodies
    pub fn error_bodies(mut self, writer: ErrorBodyWriter) -> Self {
        self.error_bodies = Some(writer);
        self
    }

    /// Compile every error handler with `factory`. Declaration order is the order of the
    /// `handlers` and `mapper` calls, handler groups first.
    pub fn build(self, factory: &dyn ExceptionResolverFactory) -> Result<ExceptionRegistry, BuildError> {
        let mut scoped = Vec::with_capacity(self.groups.len() + self.mappers.len());
        for group in self.groups {
            scoped.push(group.compile(factory)?);
        }
        scoped.extend(self.mappers);

        let mut handler_scoped = Vec::new();
        let mut advice = Vec::new();
        for (scope, mapper) in scoped {
            match scope {
                MapperScope::Handler { owner } => handler_scoped.push((owner, mapper)),
                MapperScope::Advice { selector, priority } => advice.push(AdviceEntry {
                    selector,
                    priority,
                    mapper,
                }),
            }
        }
        // Stable: equal priorities keep declaration order
        advice.sort_by_key(|a| a.priority);

        Ok(ExceptionRegistry {
            handler_scoped,
            advice,
            internal: match self.internal {
                Some(internal) => internal,
                None => Arc::new(InternalExceptionMapper::new(
                    self.error_bodies.unwrap_or_default(),
                )),
            },
        })
    }
}

/// Mappers for one route in precedence order
#[derive(Clone)]
pub struct ExceptionChain {
    mappers: Vec<Arc<dyn ExceptionMapper>>,
}

impl ExceptionChain {
    /// Resolver from the first mapper that maps the failure's kind, or `None` when the
    /// failure is unmapped
    pub fn resolver_for(&self, failure: &Failure) -> Option<Arc<dyn ExceptionResolver>> {
        self.mappers.iter().find_map(|m| m.map_to(failure.kind()))
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

impl fmt::Debug for ExceptionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionChain")
            .field("mappers", &self.mappers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Completion;
    use crate::exception::{HandlerExceptionResolverFactory, ILLEGAL_ARGUMENT, ROUTING_FAILURE, RUNTIME_FAILURE};
    use crate::http::RequestContext;
    use crate::resolver::{Reply, ResolverRegistry};
    use http::Method;

    struct Tagged(&'static str);

    impl ExceptionResolver for Tagged {
        fn resolve(&self, _failure: &Failure, mut request: RequestContext) -> Completion<RequestContext> {
            request.response.body = self.0.as_bytes().to_vec();
            Completion::ready(request)
        }
    }

    fn handler(owner: HandlerOwner) -> HandlerMethod {
        HandlerMethod::builder("h")
            .owner(owner)
            .sync(|_, _| Ok(Reply::Empty))
    }

    fn tag(chain: &ExceptionChain, failure: Failure) -> Option<String> {
        let resolver = chain.resolver_for(&failure)?;
        let req = resolver
            .resolve(&failure, RequestContext::new(Method::GET, "/"))
            .wait()
            .ok()?;
        req.response.body_str().map(str::to_string)
    }

    fn factory() -> HandlerExceptionResolverFactory {
        HandlerExceptionResolverFactory::new(ResolverRegistry::default(), None)
    }

    #[test]
    fn test_handler_scope_beats_advice() {
        let registry = ExceptionRegistry::builder()
            .handlers(ErrorHandlers::advice().on_resolver(&RUNTIME_FAILURE, Arc::new(Tagged("advice"))))
            .handlers(
                ErrorHandlers::for_owner("UserController")
                    .on_resolver(&ILLEGAL_ARGUMENT, Arc::new(Tagged("local"))),
            )
            .build(&factory())
            .unwrap();

        let users = registry.chain_for(&handler(HandlerOwner::new("UserController", "app::users")));
        assert_eq!(tag(&users, Failure::illegal_argument("bad")).as_deref(), Some("local"));
        assert_eq!(tag(&users, Failure::illegal_state("bad")).as_deref(), Some("advice"));

        let orders = registry.chain_for(&handler(HandlerOwner::new("OrderController", "app::orders")));
        assert_eq!(tag(&orders, Failure::illegal_argument("bad")).as_deref(), Some("advice"));
    }

    #[test]
    fn test_advice_priority_then_declaration() {
        let registry = ExceptionRegistry::builder()
            .handlers(
                ErrorHandlers::advice()
                    .priority(5)
                    .on_resolver(&RUNTIME_FAILURE, Arc::new(Tagged("late"))),
            )
            .handlers(
                ErrorHandlers::advice()
                    .priority(1)
                    .on_resolver(&RUNTIME_FAILURE, Arc::new(Tagged("first"))),
            )
            .handlers(
                ErrorHandlers::advice()
                    .priority(1)
                    .on_resolver(&RUNTIME_FAILURE, Arc::new(Tagged("second"))),
            )
            .build(&factory())
            .unwrap();
        let chain = registry.chain_for(&handler(HandlerOwner::default()));
        assert_eq!(chain.len(), 4);
        assert_eq!(tag(&chain, Failure::runtime("x")).as_deref(), Some("first"));
    }

    #[test]
    fn test_selectors() {
        let owner = HandlerOwner::new("UserController", "app::api::users")
            .supertype("BaseController")
            .marker("RestController");
        assert!(AdviceSelector::ModulePrefix("app::api").selects(&owner));
        assert!(AdviceSelector::ModulePrefix("app::api::users").selects(&owner));
        assert!(!AdviceSelector::ModulePrefix("app::ap").selects(&owner));
        assert!(AdviceSelector::AssignableTo("BaseController").selects(&owner));
        assert!(AdviceSelector::Marker("RestController").selects(&owner));
        assert!(!AdviceSelector::Marker("Controller").selects(&owner));
    }

    #[test]
    fn test_selected_advice_only_in_matching_chains() {
        let registry = ExceptionRegistry::builder()
            .handlers(
                ErrorHandlers::advice()
                    .selector(AdviceSelector::ModulePrefix("app::admin"))
                    .on_resolver(&RUNTIME_FAILURE, Arc::new(Tagged("admin"))),
            )
            .build(&factory())
            .unwrap();
        let admin = registry.chain_for(&handler(HandlerOwner::new("Panel", "app::admin")));
        assert_eq!(tag(&admin, Failure::runtime("x")).as_deref(), Some("admin"));
        let public = registry.chain_for(&handler(HandlerOwner::new("Home", "app::public")));
        assert!(public.resolver_for(&Failure::runtime("x")).is_none());
        // Selected advice does not take part in the route-less chain
        assert_eq!(registry.global_chain().len(), 1);
    }

    #[test]
    fn test_internal_mapper_is_last() {
        let registry = ExceptionRegistry::builder().build(&factory()).unwrap();
        let chain = registry.global_chain();
        let routing = Failure::new(&ROUTING_FAILURE, "no route").with_status(404);
        assert!(chain.resolver_for(&routing).is_some());
        assert!(chain.resolver_for(&Failure::runtime("x")).is_none());
    }
}
