use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Declared type of a handler parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    String,
    I64,
    U64,
    F64,
    Bool,
    /// Arbitrary JSON value (objects, arrays, ...)
    Json,
    /// Raw bytes, bound as an array of numbers
    Bytes,
    /// Repeated values, or one comma-separated value
    List(Box<ParamType>),
    /// May be absent; implies not required
    Optional(Box<ParamType>),
    /// Custom type converted by a converter registered under this name
    Named(&'static str),
}

impl ParamType {
    pub fn list(inner: ParamType) -> Self {
        ParamType::List(Box::new(inner))
    }

    pub fn optional(inner: ParamType) -> Self {
        ParamType::Optional(Box::new(inner))
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, ParamType::Optional(_))
    }

    /// The type with any `Optional` wrapper removed
    pub fn value_type(&self) -> &ParamType {
        match self {
            ParamType::Optional(inner) => inner.value_type(),
            other => other,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::String => f.write_str("string"),
            ParamType::I64 => f.write_str("i64"),
            ParamType::U64 => f.write_str("u64"),
            ParamType::F64 => f.write_str("f64"),
            ParamType::Bool => f.write_str("bool"),
            ParamType::Json => f.write_str("json"),
            ParamType::Bytes => f.write_str("bytes"),
            ParamType::List(inner) => write!(f, "list<{}>", inner),
            ParamType::Optional(inner) => write!(f, "optional<{}>", inner),
            ParamType::Named(name) => f.write_str(name),
        }
    }
}

/// Where a parameter's value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamSource {
    Path,
    Query,
    Header,
    Cookie,
    Attribute,
    Matrix,
    /// Whole request body, through content negotiation
    Body,
    RequestId,
    /// The failure being handled (error handlers only)
    Failure,
    /// Tag understood by a third-party resolver factory
    Custom(&'static str),
}

impl fmt::Display for ParamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamSource::Path => f.write_str("path"),
            ParamSource::Query => f.write_str("query"),
            ParamSource::Header => f.write_str("header"),
            ParamSource::Cookie => f.write_str("cookie"),
            ParamSource::Attribute => f.write_str("attribute"),
            ParamSource::Matrix => f.write_str("matrix"),
            ParamSource::Body => f.write_str("body"),
            ParamSource::RequestId => f.write_str("request-id"),
            ParamSource::Failure => f.write_str("failure"),
            ParamSource::Custom(tag) => write!(f, "custom:{}", tag),
        }
    }
}

/// Lazily evaluated default, only called when the value is absent
pub type DefaultValue = Arc<dyn Fn() -> Value + Send + Sync>;

/// Descriptor of one handler parameter, built once at startup.
///
/// ```rust
/// use brrtdispatch::resolver::{Param, ParamType};
/// use serde_json::json;
///
/// let page = Param::query("page").of(ParamType::U64).default_value(json!(1));
/// assert!(!page.is_required());
/// ```
#[derive(Clone)]
pub struct Param {
    index: usize,
    name: Arc<str>,
    source: ParamSource,
    ty: ParamType,
    required: bool,
    default: Option<DefaultValue>,
    markers: Vec<&'static str>,
    owner: Option<Arc<str>>,
}

impl Param {
    pub fn new(source: ParamSource, name: &str) -> Self {
        Self {
            index: 0,
            name: Arc::from(name),
            source,
            ty: ParamType::String,
            required: true,
            default: None,
            markers: Vec::new(),
            owner: None,
        }
    }

    pub fn path(name: &str) -> Self {
        Self::new(ParamSource::Path, name)
    }

    pub fn query(name: &str) -> Self {
        Self::new(ParamSource::Query, name)
    }

    pub fn header(name: &str) -> Self {
        Self::new(ParamSource::Header, name)
    }

    pub fn cookie(name: &str) -> Self {
        Self::new(ParamSource::Cookie, name)
    }

    pub fn attribute(name: &str) -> Self {
        Self::new(ParamSource::Attribute, name)
    }

    pub fn matrix(name: &str) -> Self {
        Self::new(ParamSource::Matrix, name)
    }

    /// Whole body, deserialized by content type
    pub fn body() -> Self {
        Self::new(ParamSource::Body, "body").of(ParamType::Json)
    }

    pub fn request_id() -> Self {
        Self::new(ParamSource::RequestId, "requestId")
    }

    /// The failure being handled: the message for `String`, `{kind, message, status}` for
    /// `Json`
    pub fn failure() -> Self {
        Self::new(ParamSource::Failure, "failure").of(ParamType::Json)
    }

    pub fn custom(tag: &'static str, name: &str) -> Self {
        Self::new(ParamSource::Custom(tag), name)
    }

    pub fn of(mut self, ty: ParamType) -> Self {
        if ty.is_optional() {
            self.required = false;
        }
        self.ty = ty;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Default used when the value is absent; makes the parameter not required
    pub fn default_value(self, value: Value) -> Self {
        self.default_with(move || value.clone())
    }

    pub fn default_with<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(Arc::new(supplier));
        self.required = false;
        self
    }

    /// Attach a marker (annotation-like tag) that advice factories can select on
    pub fn marker(mut self, marker: &'static str) -> Self {
        self.markers.push(marker);
        self
    }

    pub(crate) fn bind(&mut self, index: usize, owner: &Arc<str>) {
        self.index = index;
        self.owner = Some(Arc::clone(owner));
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn source(&self) -> ParamSource {
        self.source
    }

    pub fn param_type(&self) -> &ParamType {
        &self.ty
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn default(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| *m == marker)
    }

    /// Name of the handler owning this parameter, once bound
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Whether this parameter stands for the whole request body
    pub fn is_aggregate(&self) -> bool {
        self.source == ParamSource::Body
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("source", &self.source)
            .field("type", &self.ty)
            .field("required", &self.required)
            .field("has_default", &self.default.is_some())
            .field("markers", &self.markers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_optional_type_is_not_required() {
        let p = Param::query("limit").of(ParamType::optional(ParamType::U64));
        assert!(!p.is_required());
        assert_eq!(p.param_type().value_type(), &ParamType::U64);
        assert_eq!(p.param_type().to_string(), "optional<u64>");
    }

    #[test]
    fn test_default_is_lazy_and_clears_required() {
        let p = Param::header("x-page").default_value(json!(3));
        assert!(!p.is_required());
        let supplier = p.default().unwrap();
        assert_eq!(supplier(), json!(3));
    }

    #[test]
    fn test_body_is_aggregate() {
        assert!(Param::body().is_aggregate());
        assert!(!Param::path("id").is_aggregate());
        assert_eq!(Param::custom("form", "file").source().to_string(), "custom:form");
    }
}
