use super::converter::ConverterLookup;
use super::handler::{HandlerMethod, Reply};
use super::param::Param;
use super::serializer::Serializer;
use crate::error::BuildError;
use crate::exception::Failure;
use crate::http::RequestContext;
use crate::media::MediaType;
use serde_json::Value;
use std::sync::Arc;

/// What a parameter resolver sees while binding one argument
pub struct ResolveContext<'a> {
    pub request: &'a mut RequestContext,
    /// Set when resolving the arguments of an error handler
    pub failure: Option<&'a Failure>,
}

/// Binds one handler parameter for one request
pub trait ParamResolver: Send + Sync {
    fn resolve(&self, ctx: &mut ResolveContext<'_>) -> Result<Value, Failure>;
}

/// Creates a [`ParamResolver`] for the parameters it supports.
///
/// Factories are consulted in ascending [`order`](Self::order) once per parameter at
/// startup; the first one whose [`supports`](Self::supports) returns true wins.
pub trait ParamResolverFactory: Send + Sync {
    fn supports(&self, param: &Param) -> bool;

    fn create_resolver(
        &self,
        param: &Param,
        converters: &Arc<ConverterLookup>,
    ) -> Result<Arc<dyn ParamResolver>, BuildError>;

    fn order(&self) -> i32 {
        0
    }
}

/// A body parameter paired with the request it is read from
pub struct RequestEntity<'a> {
    pub param: &'a Param,
    pub request: &'a mut RequestContext,
}

/// Binds an aggregate (whole body) parameter through content negotiation
pub trait RequestEntityResolver: Send + Sync {
    fn resolve(&self, entity: RequestEntity<'_>) -> Result<Value, Failure>;
}

pub trait RequestEntityResolverFactory: Send + Sync {
    fn supports(&self, param: &Param) -> bool;

    fn create_resolver(
        &self,
        param: &Param,
        converters: &Arc<ConverterLookup>,
        serializers: &[Arc<dyn Serializer>],
    ) -> Result<Arc<dyn RequestEntityResolver>, BuildError>;

    fn order(&self) -> i32 {
        0
    }
}

/// Wraps parameter resolution with before/after hooks.
///
/// Advices on one parameter run as a decorator chain: every `before` in registration order,
/// the resolver once, then every `after` in reverse order.
pub trait ResolverAdvice: Send + Sync {
    fn before(&self, _param: &Param, _ctx: &mut ResolveContext<'_>) -> Result<(), Failure> {
        Ok(())
    }

    fn after(
        &self,
        _param: &Param,
        _ctx: &mut ResolveContext<'_>,
        value: Value,
    ) -> Result<Value, Failure> {
        Ok(value)
    }
}

pub trait ResolverAdviceFactory: Send + Sync {
    fn supports(&self, param: &Param) -> bool;

    fn create_advice(&self, param: &Param) -> Arc<dyn ResolverAdvice>;

    fn order(&self) -> i32 {
        0
    }
}

/// Everything needed to write one handler result
pub struct ResponseEntity<'a> {
    pub handler: &'a HandlerMethod,
    pub request: &'a mut RequestContext,
    /// Requested types, best first (format parameter or `Accept`)
    pub accept: &'a [MediaType],
    /// Types the route declares it produces; empty means anything a serializer can write
    pub produces: &'a [MediaType],
}

/// Writes a handler's [`Reply`] into the response
pub trait ResponseEntityResolver: Send + Sync {
    fn write(&self, reply: Reply, entity: &mut ResponseEntity<'_>) -> Result<(), Failure>;
}

pub trait ResponseEntityResolverFactory: Send + Sync {
    fn supports(&self, handler: &HandlerMethod) -> bool;

    fn create_resolver(
        &self,
        handler: &HandlerMethod,
        serializers: &[Arc<dyn Serializer>],
    ) -> Arc<dyn ResponseEntityResolver>;

    fn order(&self) -> i32 {
        0
    }
}

/// Adapts a reply before it is serialized (e.g., unwrapping an envelope)
pub trait ResponseEntityAdvice: Send + Sync {
    fn before_write(&self, reply: Reply, entity: &mut ResponseEntity<'_>) -> Result<Reply, Failure>;

    fn after_write(&self, _entity: &mut ResponseEntity<'_>) -> Result<(), Failure> {
        Ok(())
    }
}

pub trait ResponseEntityAdviceFactory: Send + Sync {
    fn supports(&self, handler: &HandlerMethod) -> bool;

    fn create_advice(&self, handler: &HandlerMethod) -> Arc<dyn ResponseEntityAdvice>;

    fn order(&self) -> i32 {
        0
    }
}

/// A parameter resolver with its advices applied
pub(crate) struct AdvisedResolver {
    pub(crate) param: Param,
    pub(crate) resolver: Arc<dyn ParamResolver>,
    pub(crate) advices: Vec<Arc<dyn ResolverAdvice>>,
}

impl AdvisedResolver {
    pub(crate) fn resolve(&self, ctx: &mut ResolveContext<'_>) -> Result<Value, Failure> {
        for advice in &self.advices {
            advice.before(&self.param, ctx)?;
        }
        let mut value = self.resolver.resolve(ctx)?;
        for advice in self.advices.iter().rev() {
            value = advice.after(&self.param, ctx, value)?;
        }
        Ok(value)
    }
}

/// Presents an entity resolver as a parameter resolver
pub(crate) struct EntityParamResolver {
    pub(crate) param: Param,
    pub(crate) entity: Arc<dyn RequestEntityResolver>,
}

impl ParamResolver for EntityParamResolver {
    fn resolve(&self, ctx: &mut ResolveContext<'_>) -> Result<Value, Failure> {
        self.entity.resolve(RequestEntity {
            param: &self.param,
            request: &mut *ctx.request,
        })
    }
}
