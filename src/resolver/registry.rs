use super::converter::{ConversionError, ConverterLookup};
use super::core::{
    AdvisedResolver, EntityParamResolver, ParamResolver, ParamResolverFactory,
    RequestEntityResolverFactory, ResolveContext, ResolverAdviceFactory, ResponseEntity,
    ResponseEntityAdvice, ResponseEntityAdviceFactory, ResponseEntityResolver,
    ResponseEntityResolverFactory,
};
use super::entity::BodyResolverFactory;
use super::handler::{Arguments, HandlerMethod, Reply};
use super::named::{FailureResolverFactory, NamedValueResolverFactory, RequestIdResolverFactory};
use super::response::{HttpEntityAdviceFactory, NegotiatingResponseResolverFactory};
use super::serializer::{JsonSerializer, Serializer, TextSerializer, YamlSerializer};
use crate::completion::Completion;
use crate::error::BuildError;
use crate::exception::Failure;
use crate::http::RequestContext;
use crate::media::MediaType;
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Ordered resolver factories, serializers and converters.
///
/// Built once at startup; [`compile`](Self::compile) picks every resolver a handler needs so
/// that nothing is looked up per request.
#[derive(Clone)]
pub struct ResolverRegistry {
    param_factories: Vec<Arc<dyn ParamResolverFactory>>,
    entity_factories: Vec<Arc<dyn RequestEntityResolverFactory>>,
    advice_factories: Vec<Arc<dyn ResolverAdviceFactory>>,
    response_factories: Vec<Arc<dyn ResponseEntityResolverFactory>>,
    response_advice_factories: Vec<Arc<dyn ResponseEntityAdviceFactory>>,
    serializers: Vec<Arc<dyn Serializer>>,
    converters: Arc<ConverterLookup>,
}

impl ResolverRegistry {
    /// Builder preloaded with the built-in factories and serializers
    pub fn builder() -> ResolverRegistryBuilder {
        ResolverRegistryBuilder::empty()
            .param_factory(NamedValueResolverFactory::path())
            .param_factory(NamedValueResolverFactory::query())
            .param_factory(NamedValueResolverFactory::header())
            .param_factory(NamedValueResolverFactory::cookie())
            .param_factory(NamedValueResolverFactory::attribute())
            .param_factory(NamedValueResolverFactory::matrix())
            .param_factory(RequestIdResolverFactory)
            .param_factory(FailureResolverFactory)
            .entity_factory(BodyResolverFactory)
            .response_factory(NegotiatingResponseResolverFactory)
            .response_advice(HttpEntityAdviceFactory)
            .serializer(JsonSerializer::new())
            .serializer(YamlSerializer::new())
            .serializer(TextSerializer::new())
    }

    pub fn serializers(&self) -> &[Arc<dyn Serializer>] {
        &self.serializers
    }

    pub fn converters(&self) -> &Arc<ConverterLookup> {
        &self.converters
    }

    /// Select the resolvers for every parameter and the response writer of `handler`
    pub fn compile(&self, handler: &HandlerMethod) -> Result<CompiledHandler, BuildError> {
        let mut resolvers = Vec::with_capacity(handler.params().len());
        for param in handler.params() {
            let resolver = if let Some(factory) =
                self.entity_factories.iter().find(|f| f.supports(param))
            {
                let entity = factory.create_resolver(param, &self.converters, &self.serializers)?;
                Arc::new(EntityParamResolver {
                    param: param.clone(),
                    entity,
                }) as Arc<dyn ParamResolver>
            } else if let Some(factory) = self.param_factories.iter().find(|f| f.supports(param)) {
                factory.create_resolver(param, &self.converters)?
            } else {
                return Err(BuildError::NoParamResolver {
                    handler: handler.name().to_string(),
                    param: param.name().to_string(),
                });
            };
            let advices = self
                .advice_factories
                .iter()
                .filter(|f| f.supports(param))
                .map(|f| f.create_advice(param))
                .collect();
            resolvers.push(AdvisedResolver {
                param: param.clone(),
                resolver,
                advices,
            });
        }

        let response = self
            .response_factories
            .iter()
            .find(|f| f.supports(handler))
            .map(|f| f.create_resolver(handler, &self.serializers))
            .ok_or_else(|| BuildError::NoResponseResolver {
                handler: handler.name().to_string(),
            })?;
        let response_advices = self
            .response_advice_factories
            .iter()
            .filter(|f| f.supports(handler))
            .map(|f| f.create_advice(handler))
            .collect();

        debug!(
            handler = %handler.name(),
            params = handler.params().len(),
            return_kind = handler.return_kind().as_str(),
            "Handler compiled"
        );

        Ok(CompiledHandler {
            handler: handler.clone(),
            resolvers,
            response,
            response_advices,
        })
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("param_factories", &self.param_factories.len())
            .field("entity_factories", &self.entity_factories.len())
            .field("advice_factories", &self.advice_factories.len())
            .field("response_factories", &self.response_factories.len())
            .field(
                "serializers",
                &self
                    .serializers
                    .iter()
                    .map(|s| s.media_type().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("converters", &self.converters)
            .finish()
    }
}

/// Explicit registration list; factories are ordered by `order()` when built, ties keeping
/// registration order
pub struct ResolverRegistryBuilder {
    param_factories: Vec<Arc<dyn ParamResolverFactory>>,
    entity_factories: Vec<Arc<dyn RequestEntityResolverFactory>>,
    advice_factories: Vec<Arc<dyn ResolverAdviceFactory>>,
    response_factories: Vec<Arc<dyn ResponseEntityResolverFactory>>,
    response_advice_factories: Vec<Arc<dyn ResponseEntityAdviceFactory>>,
    serializers: Vec<Arc<dyn Serializer>>,
    converters: ConverterLookup,
}

impl ResolverRegistryBuilder {
    /// Builder without any built-in factory
    pub fn empty() -> Self {
        Self {
            param_factories: Vec::new(),
            entity_factories: Vec::new(),
            advice_factories: Vec::new(),
            response_factories: Vec::new(),
            response_advice_factories: Vec::new(),
            serializers: Vec::new(),
            converters: ConverterLookup::new(),
        }
    }

    pub fn param_factory(mut self, factory: impl ParamResolverFactory + 'static) -> Self {
        self.param_factories.push(Arc::new(factory));
        self
    }

    pub fn entity_factory(mut self, factory: impl RequestEntityResolverFactory + 'static) -> Self {
        self.entity_factories.push(Arc::new(factory));
        self
    }

    pub fn advice(mut self, factory: impl ResolverAdviceFactory + 'static) -> Self {
        self.advice_factories.push(Arc::new(factory));
        self
    }

    pub fn response_factory(mut self, factory: impl ResponseEntityResolverFactory + 'static) -> Self {
        self.response_factories.push(Arc::new(factory));
        self
    }

    pub fn response_advice(mut self, factory: impl ResponseEntityAdviceFactory + 'static) -> Self {
        self.response_advice_factories.push(Arc::new(factory));
        self
    }

    /// Serializers are tried in registration order
    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializers.push(Arc::new(serializer));
        self
    }

    pub fn converter<F>(mut self, type_name: &'static str, converter: F) -> Self
    where
        F: Fn(&str) -> Result<Value, ConversionError> + Send + Sync + 'static,
    {
        self.converters.register(type_name, converter);
        self
    }

    pub fn build(mut self) -> ResolverRegistry {
        self.param_factories.sort_by_key(|f| f.order());
        self.entity_factories.sort_by_key(|f| f.order());
        self.advice_factories.sort_by_key(|f| f.order());
        self.response_factories.sort_by_key(|f| f.order());
        self.response_advice_factories.sort_by_key(|f| f.order());
        ResolverRegistry {
            param_factories: self.param_factories,
            entity_factories: self.entity_factories,
            advice_factories: self.advice_factories,
            response_factories: self.response_factories,
            response_advice_factories: self.response_advice_factories,
            serializers: self.serializers,
            converters: Arc::new(self.converters),
        }
    }
}

/// A handler with its resolvers selected, ready to serve requests
pub struct CompiledHandler {
    handler: HandlerMethod,
    resolvers: Vec<AdvisedResolver>,
    response: Arc<dyn ResponseEntityResolver>,
    response_advices: Vec<Arc<dyn ResponseEntityAdvice>>,
}

impl CompiledHandler {
    pub fn handler(&self) -> &HandlerMethod {
        &self.handler
    }

    /// Resolve every argument into `args` (cleared first). `failure` is set for error
    /// handlers.
    pub fn resolve_arguments(
        &self,
        request: &mut RequestContext,
        failure: Option<&Failure>,
        args: &mut Vec<Value>,
    ) -> Result<(), Failure> {
        args.clear();
        let mut ctx = ResolveContext { request, failure };
        for resolver in &self.resolvers {
            args.push(resolver.resolve(&mut ctx)?);
        }
        Ok(())
    }

    /// Call the handler with resolved arguments; a panic becomes a `HandlerPanic` failure
    pub fn invoke(&self, request: &mut RequestContext, args: &[Value]) -> Completion<Reply> {
        let arguments = Arguments::new(self.handler.params(), args);
        match catch_unwind(AssertUnwindSafe(|| self.handler.invoke(request, &arguments))) {
            Ok(completion) => completion,
            Err(payload) => {
                let failure = Failure::panic(payload.as_ref());
                error!(
                    handler = %self.handler.name(),
                    request_id = %request.request_id,
                    panic = %failure.message(),
                    "Handler panicked"
                );
                Completion::failed(failure)
            }
        }
    }

    /// Resolve arguments and invoke in one step
    pub fn call(
        &self,
        request: &mut RequestContext,
        failure: Option<&Failure>,
        args: &mut Vec<Value>,
    ) -> Completion<Reply> {
        match self.resolve_arguments(request, failure, args) {
            Ok(()) => self.invoke(request, args),
            Err(failure) => Completion::failed(failure),
        }
    }

    /// Write a handler result into `request.response`: the status override, then every
    /// response advice, then the response resolver
    pub fn write_response(
        &self,
        reply: Reply,
        request: &mut RequestContext,
        accept: &[MediaType],
        produces: &[MediaType],
    ) -> Result<(), Failure> {
        if let Some(status) = self.handler.status() {
            request.response.status = status;
        }
        let mut entity = ResponseEntity {
            handler: &self.handler,
            request,
            accept,
            produces,
        };
        let mut reply = reply;
        for advice in &self.response_advices {
            reply = advice.before_write(reply, &mut entity)?;
        }
        self.response.write(reply, &mut entity)?;
        for advice in self.response_advices.iter().rev() {
            advice.after_write(&mut entity)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CompiledHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledHandler")
            .field("handler", &self.handler.name())
            .field("params", &self.resolvers.len())
            .field("response_advices", &self.response_advices.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{HANDLER_PANIC, ILLEGAL_ARGUMENT, MISSING_REQUIRED_VALUE};
    use crate::resolver::{Param, ParamType, ResolverAdvice};
    use http::Method;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_unsupported_param_is_a_build_error() {
        let handler = HandlerMethod::builder("whoami")
            .param(Param::custom("session", "user"))
            .sync(|_, _| Ok(Reply::Empty));
        let err = ResolverRegistry::default().compile(&handler).unwrap_err();
        assert!(matches!(err, BuildError::NoParamResolver { ref param, .. } if param == "user"));
    }

    #[test]
    fn test_unknown_named_type_is_a_build_error() {
        let handler = HandlerMethod::builder("price")
            .param(Param::query("amount").of(ParamType::Named("Money")))
            .sync(|_, _| Ok(Reply::Empty));
        assert!(matches!(
            ResolverRegistry::default().compile(&handler),
            Err(BuildError::NoConverter { .. })
        ));

        let registry = ResolverRegistry::builder()
            .converter("Money", |raw| Ok(json!({ "raw": raw })))
            .build();
        assert!(registry.compile(&handler).is_ok());
    }

    #[test]
    fn test_resolve_invoke_write() {
        let handler = HandlerMethod::builder("greet")
            .param(Param::query("name").default_value(json!("world")))
            .param(Param::query("times").of(ParamType::U64).default_value(json!(1)))
            .sync(|_, args| {
                let name: String = args.get(0)?;
                let times: u64 = args.get(1)?;
                Ok(Reply::Text(format!("hello {}", name).repeat(times as usize)))
            });
        let compiled = ResolverRegistry::default().compile(&handler).unwrap();
        let mut req = RequestContext::new(Method::GET, "/greet?times=2");
        let mut args = Vec::new();
        let reply = compiled.call(&mut req, None, &mut args).wait().unwrap();
        assert_eq!(args, vec![json!("world"), json!(2)]);
        compiled
            .write_response(reply, &mut req, &[MediaType::all()], &[])
            .unwrap();
        assert_eq!(req.response.body_str(), Some("hello worldhello world"));
    }

    #[test]
    fn test_missing_required_fails_before_invocation() {
        let handler = HandlerMethod::builder("search")
            .param(Param::query("name"))
            .sync(|_, _| Err(Failure::illegal_argument("must not run")));
        let compiled = ResolverRegistry::default().compile(&handler).unwrap();
        let mut req = RequestContext::new(Method::GET, "/search");
        let err = compiled.call(&mut req, None, &mut Vec::new()).wait().unwrap_err();
        assert!(err.is(&MISSING_REQUIRED_VALUE));
        assert!(!err.is(&ILLEGAL_ARGUMENT));
    }

    #[test]
    fn test_panic_becomes_failure() {
        let handler = HandlerMethod::builder("boom").sync(|_, _| panic!("kaboom"));
        let compiled = ResolverRegistry::default().compile(&handler).unwrap();
        let mut req = RequestContext::new(Method::GET, "/");
        let err = compiled.call(&mut req, None, &mut Vec::new()).wait().unwrap_err();
        assert!(err.is(&HANDLER_PANIC));
        assert_eq!(err.message(), "kaboom");
    }

    struct Recording {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ResolverAdvice for Recording {
        fn before(&self, _param: &Param, _ctx: &mut ResolveContext<'_>) -> Result<(), Failure> {
            self.log.lock().push(format!("before:{}", self.tag));
            Ok(())
        }

        fn after(&self, _param: &Param, _ctx: &mut ResolveContext<'_>, value: Value) -> Result<Value, Failure> {
            self.log.lock().push(format!("after:{}", self.tag));
            Ok(value)
        }
    }

    struct RecordingFactory {
        tag: &'static str,
        order: i32,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ResolverAdviceFactory for RecordingFactory {
        fn supports(&self, param: &Param) -> bool {
            param.has_marker("audited")
        }

        fn create_advice(&self, _param: &Param) -> Arc<dyn ResolverAdvice> {
            Arc::new(Recording {
                tag: self.tag,
                log: Arc::clone(&self.log),
            })
        }

        fn order(&self) -> i32 {
            self.order
        }
    }

    #[test]
    fn test_advices_wrap_resolver_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ResolverRegistry::builder()
            .advice(RecordingFactory {
                tag: "outer",
                order: 2,
                log: Arc::clone(&log),
            })
            .advice(RecordingFactory {
                tag: "inner",
                order: 1,
                log: Arc::clone(&log),
            })
            .build();
        let handler = HandlerMethod::builder("audited")
            .param(Param::query("q").marker("audited"))
            .param(Param::query("plain").required(false))
            .sync(|_, _| Ok(Reply::Empty));
        let compiled = registry.compile(&handler).unwrap();
        let mut req = RequestContext::new(Method::GET, "/?q=x");
        compiled
            .resolve_arguments(&mut req, None, &mut Vec::new())
            .unwrap();
        assert_eq!(
            *log.lock(),
            vec!["before:inner", "before:outer", "after:outer", "after:inner"]
        );
    }
}
