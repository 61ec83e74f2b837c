use super::failure::Failure;
use super::internal::ErrorBodyWriter;
use super::kind::ErrorKind;
use crate::completion::Completion;
use crate::error::BuildError;
use crate::http::{HttpResponse, RequestContext};
use crate::media::negotiate_accept;
use crate::resolver::{CompiledHandler, HandlerMethod, ResolverRegistry};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Handles one failure by writing a response into the request.
///
/// Resolvers always hand the request back: a resolver that cannot produce its own response
/// writes a generic 500 itself.
pub trait ExceptionResolver: Send + Sync {
    fn resolve(&self, failure: &Failure, request: RequestContext) -> Completion<RequestContext>;
}

/// Maps failure kinds to resolvers
pub trait ExceptionMapper: Send + Sync {
    /// Resolver for `kind`, or `None` when this mapper does not handle it
    fn map_to(&self, kind: &'static ErrorKind) -> Option<Arc<dyn ExceptionResolver>>;

    /// Whether this mapper takes part in the chain of `handler`'s route
    fn is_applicable(&self, _handler: &HandlerMethod) -> bool {
        true
    }
}

/// Turns an error handler method into an [`ExceptionResolver`]
pub trait ExceptionResolverFactory: Send + Sync {
    fn create_resolver(&self, handler: &HandlerMethod) -> Result<Arc<dyn ExceptionResolver>, BuildError>;
}

/// Nearest-ancestor lookup over a fixed set of `kind -> resolver` entries.
///
/// An exact entry always wins. Otherwise the entry whose kind is the fewest parent hops above
/// the failure's kind is chosen; equal distances keep the first registered entry. Results are
/// memoized per kind, and the memo starts out holding every exact entry.
pub struct KindMapper {
    entries: Vec<(&'static ErrorKind, Arc<dyn ExceptionResolver>)>,
    memo: DashMap<&'static str, Option<usize>>,
}

impl KindMapper {
    pub fn builder() -> KindMapperBuilder {
        KindMapperBuilder {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered kinds in registration order
    pub fn kinds(&self) -> impl Iterator<Item = &'static ErrorKind> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    fn lookup(&self, kind: &'static ErrorKind) -> Option<usize> {
        if let Some(hit) = self.memo.get(kind.name()) {
            return *hit;
        }
        let mut best: Option<(usize, usize)> = None;
        for (idx, (registered, _)) in self.entries.iter().enumerate() {
            if let Some(distance) = kind.distance_to(registered) {
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((idx, distance));
                }
            }
        }
        let found = best.map(|(idx, _)| idx);
        debug!(
            kind = kind.name(),
            mapped = ?found.map(|i| self.entries[i].0.name()),
            "Exception kind resolved by ancestor walk"
        );
        self.memo.insert(kind.name(), found);
        found
    }
}

impl ExceptionMapper for KindMapper {
    fn map_to(&self, kind: &'static ErrorKind) -> Option<Arc<dyn ExceptionResolver>> {
        self.lookup(kind).map(|idx| Arc::clone(&self.entries[idx].1))
    }
}

impl fmt::Debug for KindMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindMapper")
            .field("kinds", &self.kinds().map(ErrorKind::name).collect::<Vec<_>>())
            .field("memoized", &self.memo.len())
            .finish()
    }
}

pub struct KindMapperBuilder {
    entries: Vec<(&'static ErrorKind, Arc<dyn ExceptionResolver>)>,
}

impl KindMapperBuilder {
    /// Map `kind` (and its descendants) to `resolver`; registering a kind again replaces its
    /// resolver in place
    pub fn on(mut self, kind: &'static ErrorKind, resolver: Arc<dyn ExceptionResolver>) -> Self {
        match self.entries.iter_mut().find(|(k, _)| *k == kind) {
            Some(entry) => entry.1 = resolver,
            None => self.entries.push((kind, resolver)),
        }
        self
    }

    pub fn build(self) -> KindMapper {
        let memo = DashMap::with_capacity(self.entries.len());
        for (idx, (kind, _)) in self.entries.iter().enumerate() {
            memo.insert(kind.name(), Some(idx));
        }
        KindMapper {
            entries: self.entries,
            memo,
        }
    }
}

/// Runs an error handler method through the normal argument and response machinery.
///
/// The failure is available to the handler through `ParamSource::Failure` parameters. The
/// response status is the handler's status override, else the failure's status, else 500.
pub struct HandlerExceptionResolver {
    compiled: Arc<CompiledHandler>,
    negotiation_param: Option<String>,
    errors: ErrorBodyWriter,
}

impl HandlerExceptionResolver {
    pub fn new(compiled: CompiledHandler, negotiation_param: Option<String>) -> Self {
        Self {
            compiled: Arc::new(compiled),
            negotiation_param,
            errors: ErrorBodyWriter::default(),
        }
    }

    /// Writer for the 500 written when the error handler itself fails
    pub fn with_error_bodies(mut self, errors: ErrorBodyWriter) -> Self {
        self.errors = errors;
        self
    }
}

impl ExceptionResolver for HandlerExceptionResolver {
    fn resolve(&self, failure: &Failure, mut request: RequestContext) -> Completion<RequestContext> {
        let accept = negotiate_accept(
            self.negotiation_param
                .as_deref()
                .and_then(|p| request.query_param(p)),
            request.accept().as_deref(),
        );
        request.response = HttpResponse::new(failure.status().unwrap_or(500));

        let mut args = Vec::with_capacity(self.compiled.handler().params().len());
        let pending = self.compiled.call(&mut request, Some(failure), &mut args);
        let compiled = Arc::clone(&self.compiled);
        let original = failure.clone();
        let errors = self.errors.clone();
        pending.then(move |outcome| {
            let written =
                outcome.and_then(|reply| compiled.write_response(reply, &mut request, &accept, &[]));
            if let Err(nested) = written {
                error!(
                    handler = %compiled.handler().name(),
                    request_id = %request.request_id,
                    original = %original,
                    error = %nested,
                    "Error handler failed"
                );
                errors.write(&mut request, 500, "Internal Server Error");
            }
            Completion::ready(request)
        })
    }
}

/// Compiles error handler methods with a [`ResolverRegistry`]
pub struct HandlerExceptionResolverFactory {
    registry: ResolverRegistry,
    negotiation_param: Option<String>,
    errors: ErrorBodyWriter,
}

impl HandlerExceptionResolverFactory {
    pub fn new(registry: ResolverRegistry, negotiation_param: Option<String>) -> Self {
        let errors = ErrorBodyWriter::new(registry.serializers().to_vec(), negotiation_param.clone());
        Self {
            registry,
            negotiation_param,
            errors,
        }
    }

    /// Error body writer over the registry's serializers
    pub fn error_bodies(&self) -> &ErrorBodyWriter {
        &self.errors
    }
}

impl ExceptionResolverFactory for HandlerExceptionResolverFactory {
    fn create_resolver(&self, handler: &HandlerMethod) -> Result<Arc<dyn ExceptionResolver>, BuildError> {
        let compiled = self.registry.compile(handler)?;
        Ok(Arc::new(
            HandlerExceptionResolver::new(compiled, self.negotiation_param.clone())
                .with_error_bodies(self.errors.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{
        FAILURE, ILLEGAL_ARGUMENT, ILLEGAL_STATE, MISSING_REQUIRED_VALUE, RESOLUTION_FAILURE,
        RUNTIME_FAILURE,
    };
    use crate::resolver::{Param, ParamType, Reply};
    use http::Method;
    use serde_json::json;

    crate::error_kind!(NUMBER_FORMAT = "MapperTestNumberFormat": ILLEGAL_ARGUMENT);

    /// Writes its tag as the response body
    struct Tagged(&'static str);

    impl ExceptionResolver for Tagged {
        fn resolve(&self, _failure: &Failure, mut request: RequestContext) -> Completion<RequestContext> {
            request.response.body = self.0.as_bytes().to_vec();
            Completion::ready(request)
        }
    }

    fn tag_of(mapper: &KindMapper, kind: &'static ErrorKind) -> Option<String> {
        let resolver = mapper.map_to(kind)?;
        let req = resolver
            .resolve(&Failure::new(kind, "x"), RequestContext::new(Method::GET, "/"))
            .wait()
            .unwrap();
        req.response.body_str().map(str::to_string)
    }

    #[test]
    fn test_exact_match_wins_over_nearer_ancestor_order() {
        let mapper = KindMapper::builder()
            .on(&FAILURE, Arc::new(Tagged("failure")))
            .on(&NUMBER_FORMAT, Arc::new(Tagged("number")))
            .on(&ILLEGAL_ARGUMENT, Arc::new(Tagged("illegal")))
            .build();
        assert_eq!(tag_of(&mapper, &NUMBER_FORMAT).as_deref(), Some("number"));
        assert_eq!(tag_of(&mapper, &ILLEGAL_ARGUMENT).as_deref(), Some("illegal"));
    }

    #[test]
    fn test_nearest_ancestor() {
        let mapper = KindMapper::builder()
            .on(&FAILURE, Arc::new(Tagged("failure")))
            .on(&RUNTIME_FAILURE, Arc::new(Tagged("runtime")))
            .on(&ILLEGAL_ARGUMENT, Arc::new(Tagged("illegal")))
            .build();
        assert_eq!(tag_of(&mapper, &NUMBER_FORMAT).as_deref(), Some("illegal"));
        assert_eq!(tag_of(&mapper, &ILLEGAL_STATE).as_deref(), Some("runtime"));
        assert_eq!(tag_of(&mapper, &MISSING_REQUIRED_VALUE).as_deref(), Some("failure"));
        // Memoized result is stable
        assert_eq!(tag_of(&mapper, &ILLEGAL_STATE).as_deref(), Some("runtime"));
    }

    #[test]
    fn test_unrelated_kinds_are_not_candidates() {
        let mapper = KindMapper::builder()
            .on(&RUNTIME_FAILURE, Arc::new(Tagged("runtime")))
            .build();
        assert!(mapper.map_to(&RESOLUTION_FAILURE).is_none());
        assert!(mapper.map_to(&FAILURE).is_none());
    }

    #[test]
    fn test_reregistering_replaces() {
        let mapper = KindMapper::builder()
            .on(&RUNTIME_FAILURE, Arc::new(Tagged("first")))
            .on(&RUNTIME_FAILURE, Arc::new(Tagged("second")))
            .build();
        assert_eq!(mapper.len(), 1);
        assert_eq!(tag_of(&mapper, &ILLEGAL_STATE).as_deref(), Some("second"));
    }

    #[test]
    fn test_handler_resolver_binds_failure() {
        let handler = HandlerMethod::builder("on_illegal")
            .param(Param::failure().of(ParamType::String))
            .status(422)
            .sync(|_, args| Ok(Reply::Value(json!({ "reason": args.str("failure") }))));
        let factory = HandlerExceptionResolverFactory::new(ResolverRegistry::default(), None);
        let resolver = factory.create_resolver(&handler).unwrap();
        let req = resolver
            .resolve(
                &Failure::illegal_argument("id must be numeric"),
                RequestContext::new(Method::GET, "/users/x"),
            )
            .wait()
            .unwrap();
        assert_eq!(req.response.status, 422);
        assert_eq!(
            req.response.body_json(),
            Some(json!({"reason": "id must be numeric"}))
        );
    }

    #[test]
    fn test_failing_error_handler_writes_500() {
        let handler = HandlerMethod::builder("broken")
            .sync(|_, _| Err(Failure::illegal_state("handler bug")));
        let factory = HandlerExceptionResolverFactory::new(ResolverRegistry::default(), None);
        let resolver = factory.create_resolver(&handler).unwrap();
        let req = resolver
            .resolve(
                &Failure::illegal_argument("x"),
                RequestContext::new(Method::GET, "/"),
            )
            .wait()
            .unwrap();
        assert_eq!(req.response.status, 500);
    }
}
