use super::pattern::{split_request_path, PathPattern, PatternSpecificity};
use super::predicate::{ConsumesCondition, MediaTypeExpr, NameValuePredicate, ProducesCondition};
use super::MappingError;
use crate::http::{ParamVec, RequestContext};
use crate::media::MediaType;
use crate::router::RouteFailure;
use http::Method;
use std::fmt;

const CONTENT_TYPE: &str = "content-type";
const ACCEPT: &str = "accept";

/// Immutable predicate set describing when a route applies.
///
/// Holds the raw expressions as declared; [`compile`](Self::compile) turns them into a
/// [`CompiledMapping`] once at startup.
///
/// ```rust
/// use brrtdispatch::mapping::Mapping;
///
/// let users = Mapping::builder().path("/users").produces("application/json").build();
/// let show = Mapping::get("/{id}");
/// let combined = users.combine(&show);
/// assert_eq!(combined.paths(), ["/users/{id}"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    paths: Vec<String>,
    methods: Vec<Method>,
    params: Vec<String>,
    headers: Vec<String>,
    consumes: Vec<String>,
    produces: Vec<String>,
    name: Option<String>,
}

impl Mapping {
    pub fn builder() -> MappingBuilder {
        MappingBuilder::default()
    }

    pub fn get(path: &str) -> Self {
        Self::builder().path(path).method(Method::GET).build()
    }

    pub fn post(path: &str) -> Self {
        Self::builder().path(path).method(Method::POST).build()
    }

    pub fn put(path: &str) -> Self {
        Self::builder().path(path).method(Method::PUT).build()
    }

    pub fn delete(path: &str) -> Self {
        Self::builder().path(path).method(Method::DELETE).build()
    }

    pub fn patch(path: &str) -> Self {
        Self::builder().path(path).method(Method::PATCH).build()
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn consumes(&self) -> &[String] {
        &self.consumes
    }

    pub fn produces(&self) -> &[String] {
        &self.produces
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Merge a parent (`self`) with a child mapping.
    ///
    /// Paths are concatenated pairwise (an empty side yields the other side), methods, params
    /// and headers are unioned. A child that constrains the request or response media type
    /// (through `consumes`/`produces` or a `Content-Type`/`Accept` header predicate) replaces
    /// the parent's constraint for that side instead of adding to it.
    pub fn combine(&self, child: &Mapping) -> Mapping {
        let paths = match (self.paths.is_empty(), child.paths.is_empty()) {
            (true, _) => child.paths.clone(),
            (_, true) => self.paths.clone(),
            _ => self
                .paths
                .iter()
                .flat_map(|p| child.paths.iter().map(move |c| PathPattern::join(p, c)))
                .collect(),
        };

        let mut methods = self.methods.clone();
        for m in &child.methods {
            if !methods.contains(m) {
                methods.push(m.clone());
            }
        }

        let child_sets_content_type = !child.consumes.is_empty() || child.has_header(CONTENT_TYPE);
        let child_sets_accept = !child.produces.is_empty() || child.has_header(ACCEPT);

        let mut headers: Vec<String> = self
            .headers
            .iter()
            .filter(|h| {
                let name = header_name(h);
                !(child_sets_content_type && name.eq_ignore_ascii_case(CONTENT_TYPE)
                    || child_sets_accept && name.eq_ignore_ascii_case(ACCEPT))
            })
            .cloned()
            .collect();
        union_into(&mut headers, &child.headers);

        let mut params = self.params.clone();
        union_into(&mut params, &child.params);

        let consumes = if child_sets_content_type {
            child.consumes.clone()
        } else {
            self.consumes.clone()
        };
        let produces = if child_sets_accept {
            child.produces.clone()
        } else {
            self.produces.clone()
        };

        Mapping {
            paths,
            methods,
            params,
            headers,
            consumes,
            produces,
            name: child.name.clone().or_else(|| self.name.clone()),
        }
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|h| header_name(h).eq_ignore_ascii_case(name))
    }

    /// Parse every expression. Header predicates naming `Content-Type` or `Accept` with a
    /// value are folded into the consumes/produces conditions.
    pub fn compile(&self) -> Result<CompiledMapping, MappingError> {
        let patterns = if self.paths.is_empty() {
            vec![PathPattern::parse("/")?]
        } else {
            self.paths
                .iter()
                .map(|p| PathPattern::parse(p))
                .collect::<Result<Vec<_>, _>>()?
        };

        let params = self
            .params
            .iter()
            .map(|p| NameValuePredicate::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut consumes = self
            .consumes
            .iter()
            .map(|c| MediaTypeExpr::parse(c))
            .collect::<Result<Vec<_>, _>>()?;
        let mut produces = self
            .produces
            .iter()
            .map(|p| MediaTypeExpr::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut headers = Vec::with_capacity(self.headers.len());
        for raw in &self.headers {
            let predicate = NameValuePredicate::parse(raw)?;
            match (predicate.value(), predicate.is_negated()) {
                (Some(value), false) if predicate.names_header(CONTENT_TYPE) => {
                    consumes.extend(MediaTypeExpr::parse_list(value)?);
                }
                (Some(value), false) if predicate.names_header(ACCEPT) => {
                    produces.extend(MediaTypeExpr::parse_list(value)?);
                }
                _ => headers.push(predicate),
            }
        }

        Ok(CompiledMapping {
            source: self.clone(),
            patterns,
            methods: self.methods.clone(),
            params,
            headers,
            consumes: ConsumesCondition::new(consumes),
            produces: ProducesCondition::new(produces),
        })
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.methods.is_empty() {
            f.write_str("*")?;
        } else {
            let methods: Vec<&str> = self.methods.iter().map(Method::as_str).collect();
            f.write_str(&methods.join("|"))?;
        }
        if self.paths.is_empty() {
            f.write_str(" /")?;
        } else {
            write!(f, " {}", self.paths.join(" || "))?;
        }
        for (label, list) in [
            ("params", &self.params),
            ("headers", &self.headers),
            ("consumes", &self.consumes),
            ("produces", &self.produces),
        ] {
            if !list.is_empty() {
                write!(f, " {}={}", label, list.join(","))?;
            }
        }
        Ok(())
    }
}

fn header_name(expr: &str) -> &str {
    expr.trim_start_matches('!')
        .split(|c| c == '=' || c == '!')
        .next()
        .unwrap_or("")
        .trim()
}

fn union_into(target: &mut Vec<String>, extra: &[String]) {
    for item in extra {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

/// Builder for [`Mapping`]
#[derive(Debug, Default)]
pub struct MappingBuilder {
    mapping: Mapping,
}

impl MappingBuilder {
    pub fn path(mut self, path: &str) -> Self {
        self.mapping.paths.push(path.to_string());
        self
    }

    pub fn paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mapping.paths.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        if !self.mapping.methods.contains(&method) {
            self.mapping.methods.push(method);
        }
        self
    }

    pub fn methods<I: IntoIterator<Item = Method>>(mut self, methods: I) -> Self {
        for m in methods {
            self = self.method(m);
        }
        self
    }

    /// `name`, `!name`, `name=value` or `name!=value`
    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mapping.params.extend(params.into_iter().map(Into::into));
        self
    }

    pub fn headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mapping.headers.extend(headers.into_iter().map(Into::into));
        self
    }

    pub fn consumes<S: Into<String>>(mut self, media: S) -> Self {
        self.mapping.consumes.push(media.into());
        self
    }

    pub fn produces<S: Into<String>>(mut self, media: S) -> Self {
        self.mapping.produces.push(media.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.mapping.name = Some(name.into());
        self
    }

    pub fn build(self) -> Mapping {
        self.mapping
    }
}

/// Parsed form of a [`Mapping`], evaluated per request
#[derive(Debug, Clone)]
pub struct CompiledMapping {
    source: Mapping,
    patterns: Vec<PathPattern>,
    methods: Vec<Method>,
    params: Vec<NameValuePredicate>,
    headers: Vec<NameValuePredicate>,
    consumes: ConsumesCondition,
    produces: ProducesCondition,
}

impl CompiledMapping {
    pub fn source(&self) -> &Mapping {
        &self.source
    }

    pub fn patterns(&self) -> &[PathPattern] {
        &self.patterns
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn produces(&self) -> &ProducesCondition {
        &self.produces
    }

    /// Number of declared non-path predicates, used to rank routes sharing a path
    pub fn predicate_count(&self) -> usize {
        usize::from(!self.methods.is_empty())
            + self.params.len()
            + self.headers.len()
            + self.consumes.len()
            + self.produces.len()
    }

    /// Most specific pattern matching `segments`, with its bound variables
    pub fn match_path(&self, segments: &[String]) -> Option<(PatternSpecificity, ParamVec)> {
        self.patterns
            .iter()
            .filter_map(|p| p.matches(segments).map(|vars| (p.specificity(), vars)))
            .max_by(|a, b| a.0.cmp(&b.0))
    }

    /// Evaluate the non-path predicates in order: method, params, headers, consumes, produces.
    /// The first failing predicate names the mismatch.
    pub fn evaluate(&self, request: &RequestContext, accept: &[MediaType]) -> Result<(), RouteFailure> {
        if !self.methods.is_empty() && !self.methods.contains(&request.method) {
            return Err(RouteFailure::MethodMismatch);
        }
        if !self
            .params
            .iter()
            .all(|p| p.matches(request.query_param(p.name())))
        {
            return Err(RouteFailure::ParamMismatch);
        }
        if !self
            .headers
            .iter()
            .all(|h| h.matches(request.header(h.name())))
        {
            return Err(RouteFailure::HeaderMismatch);
        }
        if !self.consumes.matches(request.content_type()) {
            return Err(RouteFailure::ConsumesMismatch);
        }
        if !self.produces.matches(accept) {
            return Err(RouteFailure::ProducesMismatch);
        }
        Ok(())
    }

    /// Full evaluation against one request: path first, then [`evaluate`](Self::evaluate).
    /// Returns the bound path variables.
    pub fn matches(&self, request: &RequestContext) -> Result<ParamVec, RouteFailure> {
        let mut segments = Vec::new();
        let mut matrix = ParamVec::new();
        split_request_path(&request.path, &mut segments, &mut matrix);
        let (_, vars) = self
            .match_path(&segments)
            .ok_or(RouteFailure::PatternMismatch)?;
        let accept = crate::media::parse_accept(request.accept().as_deref());
        self.evaluate(request, &accept)?;
        Ok(vars)
    }
}
