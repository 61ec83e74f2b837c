//! # Resolver Framework
//!
//! Turns request data into a handler's argument array, and a handler's result back into
//! response bytes. Everything pluggable sits behind small factory traits selected once per
//! handler at startup.
//!
//! ## Parameters
//!
//! Each handler parameter is described by a [`Param`] (source, declared [`ParamType`],
//! required flag, lazy default, markers). When a handler is compiled through
//! [`ResolverRegistry::compile`], every parameter is matched against the registered factories
//! in ascending `order()`; the first factory whose `supports` returns true creates the
//! resolver. A parameter that no factory supports is a [`BuildError`](crate::error::BuildError),
//! never a per-request failure.
//!
//! Built-in parameter factories, in order:
//!
//! | Order | Source | Factory |
//! |-------|--------|---------|
//! | 100 | path variable | [`NamedValueResolverFactory::path`] |
//! | 200 | query parameter | [`NamedValueResolverFactory::query`] |
//! | 300 | header | [`NamedValueResolverFactory::header`] |
//! | 400 | cookie | [`NamedValueResolverFactory::cookie`] |
//! | 500 | request attribute | [`NamedValueResolverFactory::attribute`] |
//! | 600 | matrix variable | [`NamedValueResolverFactory::matrix`] |
//! | 700 | request id | [`RequestIdResolverFactory`] |
//! | 800 | failure (error handlers) | [`FailureResolverFactory`] |
//!
//! Single-value resolvers share the [`NameAndValue`] contract: an absent value takes the
//! default if one is configured, fails with `MissingRequiredValue` when required, and is
//! `null` otherwise.
//!
//! ## Entities
//!
//! Body parameters go through a [`RequestEntityResolverFactory`]. The built-in
//! [`NegotiatingBodyResolver`] converts `text/plain` (or untyped) bodies with the parameter's
//! converter and otherwise tries each [`Serializer`] supporting the content type in order.
//!
//! ## Responses
//!
//! A handler returns a [`Reply`]. Response advices run first (the built-in
//! [`HttpEntityAdvice`] unwraps [`HttpEntity`] envelopes), then the response resolver
//! negotiates an output type from the requested types and the route's `produces`.
//!
//! ## Advices
//!
//! [`ResolverAdvice`]s wrap a single parameter's resolver as a decorator chain: `before` hooks
//! in order, one resolve call, `after` hooks in reverse.

mod converter;
mod core;
mod entity;
mod handler;
mod named;
mod param;
mod registry;
mod response;
mod serializer;

pub use converter::{ConversionError, Converter, ConverterLookup};
pub use core::{
    ParamResolver, ParamResolverFactory, RequestEntity, RequestEntityResolver,
    RequestEntityResolverFactory, ResolveContext, ResolverAdvice, ResolverAdviceFactory,
    ResponseEntity, ResponseEntityAdvice, ResponseEntityAdviceFactory, ResponseEntityResolver,
    ResponseEntityResolverFactory,
};
pub use entity::{BodyResolverFactory, NegotiatingBodyResolver};
pub use handler::{Arguments, HandlerMethod, HandlerMethodBuilder, HandlerOwner, HttpEntity, Invoker, Reply};
pub use named::{
    AttributeResolver, FailureResolverFactory, NameAndValue, NamedValueResolver,
    NamedValueResolverFactory, RequestIdResolverFactory,
};
pub use param::{DefaultValue, Param, ParamSource, ParamType};
pub use registry::{CompiledHandler, ResolverRegistry, ResolverRegistryBuilder};
pub use response::{
    HttpEntityAdvice, HttpEntityAdviceFactory, NegotiatingResponseResolver,
    NegotiatingResponseResolverFactory,
};
pub use serializer::{JsonSerializer, Serializer, SerializerError, TextSerializer, YamlSerializer};
