//! # HTTP Model Module
//!
//! The normalized request/response model the dispatch core operates on. The transport layer
//! (socket accept, TLS, framing, codec) is outside this crate; it builds a [`RequestContext`]
//! per request, hands it to [`Dispatcher::service`](crate::dispatcher::Dispatcher::service),
//! and writes back the [`HttpResponse`] carried by the completed context.
//!
//! ## Hot-path collections
//!
//! Query parameters, path variables and headers are stored as [`ParamVec`] / [`HeaderVec`]
//! (`SmallVec` of `(Arc<str>, String)` pairs). Typical requests stay on the stack, and lookups
//! scan from the end so that the last occurrence of a repeated name wins.

mod connection;
mod request;
mod response;

pub use connection::{ConnectionContext, ConnectionHandle};
pub use request::{parse_cookies, parse_query_params, RequestContext};
pub use response::HttpResponse;

use smallvec::SmallVec;
use std::sync::Arc;

/// Maximum number of path/query parameters stored inline before heap allocation
pub const MAX_INLINE_PARAMS: usize = 8;

/// Maximum number of headers stored inline before heap allocation
pub const MAX_INLINE_HEADERS: usize = 16;

/// Name/value pairs for path variables, matrix variables, query parameters and cookies
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Header name/value pairs; names are stored lowercase
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Last value stored under `name` (exact match)
pub(crate) fn last_value<'a, A: smallvec::Array<Item = (Arc<str>, String)>>(
    values: &'a SmallVec<A>,
    name: &str,
) -> Option<&'a str> {
    values
        .iter()
        .rfind(|(k, _)| k.as_ref() == name)
        .map(|(_, v)| v.as_str())
}

/// Last value stored under `name`, ignoring ASCII case
pub(crate) fn last_value_ignore_case<'a, A: smallvec::Array<Item = (Arc<str>, String)>>(
    values: &'a SmallVec<A>,
    name: &str,
) -> Option<&'a str> {
    values
        .iter()
        .rfind(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
