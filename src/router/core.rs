//! Router core module - hot path for request routing.

use super::failure::{RouteFailure, RouteMismatch};
use super::radix::RadixIndex;
use crate::http::{ParamVec, RequestContext};
use crate::mapping::{split_request_path, CompiledMapping, Mapping, MappingError, PatternSpecificity};
use crate::media::{negotiate_accept, MediaType};
use crate::scheduler::Scratch;
use http::Method;
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{debug, info};

/// One registered route: a compiled mapping bound to a target
#[derive(Debug)]
pub struct Route<T> {
    name: Arc<str>,
    mapping: Arc<CompiledMapping>,
    target: Arc<T>,
}

impl<T> Route<T> {
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn mapping(&self) -> &Arc<CompiledMapping> {
        &self.mapping
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }
}

/// Result of successfully matching a request to a route
#[derive(Debug)]
pub struct RouteMatch<T> {
    /// Route name (the mapping's name, or `METHODS pattern`)
    pub name: Arc<str>,
    /// Whatever the registry was built with, typically a bound handler
    pub target: Arc<T>,
    pub mapping: Arc<CompiledMapping>,
    /// Path variables (e.g., `{id}` → `("id", "123")`)
    pub path_params: ParamVec,
    /// `;name=value` matrix variables from every segment
    pub matrix_params: ParamVec,
    /// Requested response types after format/Accept negotiation
    pub accept: Vec<MediaType>,
}

impl<T> RouteMatch<T> {
    /// Get a path parameter by name
    ///
    /// Uses "last write wins" semantics: if duplicate parameter names exist
    /// at different path depths (e.g., `/org/{id}/team/{team_id}/user/{id}`),
    /// returns the last occurrence (the user id, not the org id).
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Ranking of a fully matching candidate; greater wins
type Rank = (PatternSpecificity, usize, Reverse<usize>);

/// Immutable set of compiled routes.
///
/// Built once and then only read; the dispatcher swaps whole registries on redeploy.
/// Lookup narrows candidates with a segment tree, then evaluates each candidate's predicates
/// in order. Among full matches the most specific path wins, then the route declaring more
/// predicates, then the first registered.
#[derive(Debug)]
pub struct RouteRegistry<T> {
    routes: Vec<Route<T>>,
    index: RadixIndex,
    negotiation_param: Option<String>,
}

impl<T> RouteRegistry<T> {
    pub fn builder() -> RouteRegistryBuilder<T> {
        RouteRegistryBuilder {
            entries: Vec::new(),
            negotiation_param: None,
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route<T>> {
        self.routes.iter()
    }

    /// Route a request using a temporary scratch buffer
    pub fn route(&self, request: &RequestContext) -> Result<RouteMatch<T>, RouteMismatch> {
        let mut scratch = Scratch::default();
        self.route_with(request, &mut scratch)
    }

    /// Route a request, decoding path segments into the caller's scratch buffer
    pub fn route_with(
        &self,
        request: &RequestContext,
        scratch: &mut Scratch,
    ) -> Result<RouteMatch<T>, RouteMismatch> {
        let mut matrix_params = ParamVec::new();
        split_request_path(&request.path, &mut scratch.segments, &mut matrix_params);
        let segments = &scratch.segments;

        let format = self
            .negotiation_param
            .as_deref()
            .and_then(|p| request.query_param(p));
        let accept = negotiate_accept(format, request.accept().as_deref());

        let mut best: Option<(Rank, usize, ParamVec)> = None;
        let mut furthest = RouteFailure::PatternMismatch;
        let mut allowed_methods: Vec<Method> = Vec::new();

        for (route_idx, pattern_idx) in self.index.candidates(segments) {
            let Some(route) = self.routes.get(route_idx) else {
                continue;
            };
            let Some(pattern) = route.mapping.patterns().get(pattern_idx) else {
                continue;
            };
            let Some(vars) = pattern.matches(segments) else {
                continue;
            };
            for m in route.mapping.methods() {
                if !allowed_methods.contains(m) {
                    allowed_methods.push(m.clone());
                }
            }
            match route.mapping.evaluate(request, &accept) {
                Ok(()) => {
                    let rank = (
                        pattern.specificity(),
                        route.mapping.predicate_count(),
                        Reverse(route_idx),
                    );
                    if best.as_ref().map_or(true, |(b, _, _)| rank > *b) {
                        best = Some((rank, route_idx, vars));
                    }
                }
                Err(reason) => {
                    if reason > furthest {
                        furthest = reason;
                    }
                }
            }
        }

        match best.and_then(|(_, idx, vars)| self.routes.get(idx).map(|r| (r, vars))) {
            Some((route, path_params)) => {
                debug!(
                    method = %request.method,
                    path = %request.path,
                    route = %route.name,
                    "Route matched"
                );
                Ok(RouteMatch {
                    name: Arc::clone(&route.name),
                    target: Arc::clone(&route.target),
                    mapping: Arc::clone(&route.mapping),
                    path_params,
                    matrix_params,
                    accept,
                })
            }
            None => {
                debug!(
                    method = %request.method,
                    path = %request.path,
                    reason = %furthest,
                    "No route matched"
                );
                let mut mismatch =
                    RouteMismatch::new(furthest, request.method.clone(), request.path.clone());
                if furthest == RouteFailure::MethodMismatch {
                    mismatch.allowed_methods = allowed_methods;
                }
                Err(mismatch)
            }
        }
    }

    /// One `METHODS pattern -> name` line per route pattern
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for route in &self.routes {
            let methods = if route.mapping.methods().is_empty() {
                "*".to_string()
            } else {
                route
                    .mapping
                    .methods()
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join("|")
            };
            for pattern in route.mapping.patterns() {
                out.push_str(&format!("{:<8} {} -> {}\n", methods, pattern, route.name));
            }
        }
        out
    }
}

/// Collects `(Mapping, target)` pairs and compiles them into a [`RouteRegistry`]
pub struct RouteRegistryBuilder<T> {
    entries: Vec<(Mapping, T)>,
    negotiation_param: Option<String>,
}

impl<T> RouteRegistryBuilder<T> {
    /// Query parameter whose short format name overrides `Accept` (e.g., `format`)
    pub fn negotiation_param(mut self, param: Option<String>) -> Self {
        self.negotiation_param = param;
        self
    }

    pub fn route(mut self, mapping: Mapping, target: T) -> Self {
        self.entries.push((mapping, target));
        self
    }

    pub fn build(self) -> Result<RouteRegistry<T>, MappingError> {
        let mut routes = Vec::with_capacity(self.entries.len());
        let mut index = RadixIndex::new();
        for (route_idx, (mapping, target)) in self.entries.into_iter().enumerate() {
            let compiled = mapping.compile()?;
            for (pattern_idx, pattern) in compiled.patterns().iter().enumerate() {
                index.insert(pattern, (route_idx, pattern_idx));
            }
            let name: Arc<str> = match mapping.name() {
                Some(n) => Arc::from(n),
                None => Arc::from(mapping.to_string().as_str()),
            };
            routes.push(Route {
                name,
                mapping: Arc::new(compiled),
                target: Arc::new(target),
            });
        }
        info!(routes = routes.len(), "Route registry compiled");
        Ok(RouteRegistry {
            routes,
            index,
            negotiation_param: self.negotiation_param,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(routes: Vec<(Mapping, &'static str)>) -> RouteRegistry<&'static str> {
        routes
            .into_iter()
            .fold(RouteRegistry::builder(), |b, (m, t)| b.route(m, t))
            .negotiation_param(Some("format".to_string()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_literal_beats_variable() {
        let reg = registry(vec![
            (Mapping::get("/users/{id}"), "show"),
            (Mapping::get("/users/me"), "me"),
        ]);
        let m = reg.route(&RequestContext::new(Method::GET, "/users/me")).unwrap();
        assert_eq!(*m.target, "me");
        let m = reg.route(&RequestContext::new(Method::GET, "/users/7")).unwrap();
        assert_eq!(*m.target, "show");
        assert_eq!(m.get_path_param("id"), Some("7"));
    }

    #[test]
    fn test_more_predicates_win_then_first_registered() {
        let reg = registry(vec![
            (Mapping::get("/search"), "plain"),
            (
                Mapping::builder()
                    .path("/search")
                    .method(Method::GET)
                    .params(["q"])
                    .build(),
                "query",
            ),
            (Mapping::get("/search"), "duplicate"),
        ]);
        let m = reg
            .route(&RequestContext::new(Method::GET, "/search?q=rust"))
            .unwrap();
        assert_eq!(*m.target, "query");
        let m = reg.route(&RequestContext::new(Method::GET, "/search")).unwrap();
        assert_eq!(*m.target, "plain");
    }

    #[test]
    fn test_furthest_reason_wins() {
        let reg = registry(vec![
            (Mapping::get("/items"), "list"),
            (
                Mapping::builder()
                    .path("/items")
                    .method(Method::POST)
                    .consumes("application/json")
                    .build(),
                "create",
            ),
        ]);
        let err = reg
            .route(&RequestContext::new(Method::POST, "/items").with_header("content-type", "text/plain"))
            .unwrap_err();
        assert_eq!(err.reason, RouteFailure::ConsumesMismatch);

        let err = reg
            .route(&RequestContext::new(Method::DELETE, "/items"))
            .unwrap_err();
        assert_eq!(err.reason, RouteFailure::MethodMismatch);
        assert_eq!(err.allowed_methods, vec![Method::GET, Method::POST]);

        let err = reg
            .route(&RequestContext::new(Method::GET, "/nothing"))
            .unwrap_err();
        assert_eq!(err.reason, RouteFailure::PatternMismatch);
        assert!(err.allowed_methods.is_empty());
    }

    #[test]
    fn test_regex_constraint_falls_through_to_pattern_mismatch() {
        let reg = registry(vec![(Mapping::get(r"/orders/{id:\d+}"), "order")]);
        assert!(reg.route(&RequestContext::new(Method::GET, "/orders/12")).is_ok());
        let err = reg
            .route(&RequestContext::new(Method::GET, "/orders/abc"))
            .unwrap_err();
        assert_eq!(err.reason, RouteFailure::PatternMismatch);
    }

    #[test]
    fn test_negotiation_param_overrides_accept() {
        let reg = registry(vec![(
            Mapping::builder()
                .path("/report")
                .method(Method::GET)
                .produces("application/yaml")
                .build(),
            "report",
        )]);
        let req = RequestContext::new(Method::GET, "/report?format=yaml")
            .with_header("accept", "application/json");
        let m = reg.route(&req).unwrap();
        assert_eq!(m.accept, vec![MediaType::yaml()]);

        let req = RequestContext::new(Method::GET, "/report").with_header("accept", "application/json");
        assert_eq!(reg.route(&req).unwrap_err().reason, RouteFailure::ProducesMismatch);
    }

    #[test]
    fn test_matrix_params_and_describe() {
        let reg = registry(vec![(
            Mapping::builder()
                .path("/cars/{make}")
                .method(Method::GET)
                .name("car")
                .build(),
            "car",
        )]);
        let m = reg
            .route(&RequestContext::new(Method::GET, "/cars/volvo;color=red"))
            .unwrap();
        assert_eq!(m.get_path_param("make"), Some("volvo"));
        assert_eq!(m.matrix_params[0].1, "red");
        assert_eq!(reg.describe().trim(), "GET      /cars/{make} -> car");
    }
}
