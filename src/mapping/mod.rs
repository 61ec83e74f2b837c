//! # Mapping Module
//!
//! Declarative predicate sets that decide whether a route applies to a request.
//!
//! ## Overview
//!
//! A [`Mapping`] is built once at startup from raw expressions:
//!
//! - **paths**: `/users/{id}`, `/users/{id:\d+}`, `/files/*/meta`, `/static/**`,
//!   `/static/{*rest}`
//! - **methods**: any `http::Method`; empty means every method
//! - **params**: `name`, `!name`, `name=value`, `name!=value` against the query string
//! - **headers**: same syntax against request headers; `Content-Type=...` and `Accept=...`
//!   are folded into consumes/produces
//! - **consumes / produces**: media types, optionally negated (`!text/plain`)
//!
//! [`Mapping::combine`] merges a parent (class-level) mapping with a child (method-level)
//! one. [`Mapping::compile`] parses everything into a [`CompiledMapping`] which the
//! [`RouteRegistry`](crate::router::RouteRegistry) evaluates per request.
//!
//! ## Evaluation Order
//!
//! ```text
//! path pattern -> method -> params -> headers -> consumes -> produces
//! ```
//!
//! The first failing step names the [`RouteFailure`](crate::router::RouteFailure).

mod core;
mod pattern;
mod predicate;

pub use core::{CompiledMapping, Mapping, MappingBuilder};
pub use pattern::{split_request_path, PathPattern, PatternSpecificity, Segment};
pub use predicate::{ConsumesCondition, MediaTypeExpr, NameValuePredicate, ProducesCondition};

/// A mapping expression that failed to parse at startup
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("invalid predicate '{0}'")]
    InvalidPredicate(String),
    #[error("invalid media type {0}")]
    InvalidMediaType(String),
}
