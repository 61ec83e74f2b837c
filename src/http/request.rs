use super::{last_value, last_value_ignore_case, ConnectionHandle, HeaderVec, HttpResponse, ParamVec};
use crate::ids::RequestId;
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-request state owned by exactly one logical request flow.
///
/// Created by the transport, moved onto the route's scheduler by the dispatcher, and handed
/// back (with [`response`](Self::response) filled in) through the completion returned from
/// [`Dispatcher::service`](crate::dispatcher::Dispatcher::service). It is never shared
/// between threads except through that single hand-off.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request identifier (from `x-request-id` when valid)
    pub request_id: RequestId,
    /// HTTP method
    pub method: Method,
    /// Request path without the query string, as received
    pub path: String,
    /// Raw query string (without `?`)
    pub query: Option<String>,
    /// Decoded query parameters in arrival order
    pub query_params: ParamVec,
    /// Headers with lowercase names
    pub headers: HeaderVec,
    /// Cookies parsed from the `Cookie` header
    pub cookies: ParamVec,
    /// Raw request body
    pub body: Option<Vec<u8>>,
    /// Path variables bound by routing
    pub path_params: ParamVec,
    /// Matrix variables (`;name=value` path segment parameters) bound by routing
    pub matrix_params: ParamVec,
    /// Free-form attributes shared between filters, resolvers and handlers
    pub attributes: HashMap<String, Value>,
    /// When the transport handed the request over
    pub received_at: Instant,
    /// Liveness of the underlying connection
    pub connection: ConnectionHandle,
    /// Response under construction
    pub response: HttpResponse,
    /// Name of the matched route, set by the dispatcher
    pub route_name: Option<Arc<str>>,
}

impl RequestContext {
    /// Create a context for `method` and a request target such as `/users/42?verbose=true`
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (target.to_string(), None),
        };
        let query_params = query
            .as_deref()
            .map(parse_query_params)
            .unwrap_or_default();
        Self {
            request_id: RequestId::new(),
            method,
            path,
            query,
            query_params,
            headers: HeaderVec::new(),
            cookies: ParamVec::new(),
            body: None,
            path_params: ParamVec::new(),
            matrix_params: ParamVec::new(),
            attributes: HashMap::new(),
            received_at: Instant::now(),
            connection: ConnectionHandle::new(),
            response: HttpResponse::default(),
            route_name: None,
        }
    }

    /// Add a header. `cookie` and `x-request-id` are also interpreted.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        match name.as_str() {
            "cookie" => self.cookies.extend(parse_cookies(&value)),
            "x-request-id" => self.request_id = RequestId::from_header_or_new(Some(&value)),
            _ => {}
        }
        self.headers.push((Arc::from(name), value));
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_connection(mut self, connection: ConnectionHandle) -> Self {
        self.connection = connection;
        self
    }

    /// Case-insensitive header lookup (last occurrence wins)
    pub fn header(&self, name: &str) -> Option<&str> {
        last_value_ignore_case(&self.headers, name)
    }

    /// All values of a header in arrival order
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Query parameter lookup (last occurrence wins)
    pub fn query_param(&self, name: &str) -> Option<&str> {
        last_value(&self.query_params, name)
    }

    /// All values of a repeated query parameter in arrival order
    pub fn query_param_values(&self, name: &str) -> Vec<&str> {
        self.query_params
            .iter()
            .filter(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        last_value(&self.path_params, name)
    }

    pub fn matrix_param(&self, name: &str) -> Option<&str> {
        last_value(&self.matrix_params, name)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        last_value(&self.cookies, name)
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// All `Accept` values joined, so repeated headers negotiate together
    pub fn accept(&self) -> Option<String> {
        let joined = self.header_values("accept").collect::<Vec<_>>().join(",");
        if joined.trim().is_empty() {
            None
        } else {
            Some(joined)
        }
    }

    pub fn body_str(&self) -> Option<&str> {
        self.body
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Time since the request was received
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }
}

/// Parse a `Cookie` header value into name/value pairs
pub fn parse_cookies(header: &str) -> ParamVec {
    header
        .split(';')
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, '=');
            let name = parts.next()?.trim();
            if name.is_empty() {
                return None;
            }
            let value = parts.next().unwrap_or("").trim().to_string();
            Some((Arc::from(name), value))
        })
        .collect()
}

/// Decode a form-urlencoded query string into name/value pairs
pub fn parse_query_params(query: &str) -> ParamVec {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (Arc::from(k.as_ref()), v.into_owned()))
        .collect()
}
