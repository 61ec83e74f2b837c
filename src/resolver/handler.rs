use super::param::Param;
use crate::completion::{from_channel, from_coroutine, from_future, Completion, ReturnKind};
use crate::exception::Failure;
use crate::http::{HeaderVec, RequestContext};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a handler produced, before response negotiation
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// No body
    Empty,
    /// Serialized by the negotiated serializer
    Value(Value),
    /// Written as `text/plain` unless negotiation picks another writer
    Text(String),
    /// Written as-is
    Bytes(Vec<u8>),
    /// Status and headers plus a nested body
    Entity(HttpEntity),
}

impl Reply {
    /// Serialize any value into a `Reply::Value`
    pub fn json<T: Serialize>(value: &T) -> Result<Self, Failure> {
        serde_json::to_value(value)
            .map(Reply::Value)
            .map_err(|e| Failure::from_error(&crate::exception::ILLEGAL_STATE, e))
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<HttpEntity> for Reply {
    fn from(entity: HttpEntity) -> Self {
        Reply::Entity(entity)
    }
}

/// Response envelope: status, extra headers and a body
#[derive(Debug, Clone, PartialEq)]
pub struct HttpEntity {
    pub status: u16,
    pub headers: HeaderVec,
    pub body: Box<Reply>,
}

impl HttpEntity {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: Box::new(Reply::Empty),
        }
    }

    pub fn ok(body: impl Into<Reply>) -> Self {
        Self::new(200).body(body)
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((Arc::from(name.to_ascii_lowercase()), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Reply>) -> Self {
        self.body = Box::new(body.into());
        self
    }
}

/// Resolved arguments handed to a handler, borrowed from the worker's scratch buffer
pub struct Arguments<'a> {
    params: &'a [Param],
    values: &'a [Value],
}

impl<'a> Arguments<'a> {
    pub fn new(params: &'a [Param], values: &'a [Value]) -> Self {
        Self { params, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value by position
    pub fn value(&self, index: usize) -> Option<&'a Value> {
        self.values.get(index)
    }

    /// Raw value by parameter name
    pub fn named(&self, name: &str) -> Option<&'a Value> {
        self.params
            .iter()
            .position(|p| p.name().as_ref() == name)
            .and_then(|i| self.values.get(i))
    }

    /// String value by parameter name
    pub fn str(&self, name: &str) -> Option<&'a str> {
        self.named(name).and_then(Value::as_str)
    }

    /// Typed value by position; a type mismatch is an `IllegalArgument` failure
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, Failure> {
        let value = self.values.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            Failure::illegal_argument(format!("argument {} has the wrong type: {}", index, e))
        })
    }

    /// Typed value by parameter name
    pub fn get_named<T: DeserializeOwned>(&self, name: &str) -> Result<T, Failure> {
        let value = self.named(name).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            Failure::illegal_argument(format!("argument '{}' has the wrong type: {}", name, e))
        })
    }
}

/// Invocation function with the return adapter already applied
pub type Invoker =
    Arc<dyn Fn(&mut RequestContext, &Arguments<'_>) -> Completion<Reply> + Send + Sync>;

/// The type that declares a handler, for exception-mapper and advice selection.
///
/// `supertypes` stands in for "assignable to": a selector naming any of them matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOwner {
    pub type_name: &'static str,
    pub module_path: &'static str,
    pub supertypes: Vec<&'static str>,
    pub markers: Vec<&'static str>,
}

impl HandlerOwner {
    pub fn new(type_name: &'static str, module_path: &'static str) -> Self {
        Self {
            type_name,
            module_path,
            supertypes: Vec::new(),
            markers: Vec::new(),
        }
    }

    pub fn supertype(mut self, name: &'static str) -> Self {
        self.supertypes.push(name);
        self
    }

    pub fn marker(mut self, marker: &'static str) -> Self {
        self.markers.push(marker);
        self
    }

    pub fn is_assignable_to(&self, type_name: &str) -> bool {
        self.type_name == type_name || self.supertypes.iter().any(|s| *s == type_name)
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| *m == marker)
    }
}

impl Default for HandlerOwner {
    fn default() -> Self {
        Self::new("", "")
    }
}

/// A handler function with its parameter descriptors, owner and return adapter.
///
/// The return shape is fixed when the handler is built:
///
/// ```rust
/// use brrtdispatch::resolver::{HandlerMethod, Param, Reply};
/// use brrtdispatch::completion::ReturnKind;
/// use serde_json::json;
///
/// let show = HandlerMethod::builder("show_user")
///     .param(Param::path("id"))
///     .sync(|_req, args| Ok(Reply::Value(json!({ "id": args.str("id") }))));
/// assert_eq!(show.return_kind(), ReturnKind::Sync);
/// ```
#[derive(Clone)]
pub struct HandlerMethod {
    name: Arc<str>,
    owner: Arc<HandlerOwner>,
    params: Vec<Param>,
    return_kind: ReturnKind,
    invoker: Invoker,
    status: Option<u16>,
}

impl HandlerMethod {
    pub fn builder(name: &str) -> HandlerMethodBuilder {
        HandlerMethodBuilder {
            name: Arc::from(name),
            owner: Arc::new(HandlerOwner::default()),
            params: Vec::new(),
            status: None,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn owner(&self) -> &HandlerOwner {
        &self.owner
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn return_kind(&self) -> ReturnKind {
        self.return_kind
    }

    /// Status written on success instead of the default 200
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn invoke(&self, request: &mut RequestContext, args: &Arguments<'_>) -> Completion<Reply> {
        (self.invoker)(request, args)
    }
}

impl fmt::Debug for HandlerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerMethod")
            .field("name", &self.name)
            .field("owner", &self.owner.type_name)
            .field("params", &self.params)
            .field("return_kind", &self.return_kind)
            .field("status", &self.status)
            .finish()
    }
}

/// Builder for [`HandlerMethod`]; the terminal method picks the return adapter
pub struct HandlerMethodBuilder {
    name: Arc<str>,
    owner: Arc<HandlerOwner>,
    params: Vec<Param>,
    status: Option<u16>,
}

impl HandlerMethodBuilder {
    pub fn owner(mut self, owner: HandlerOwner) -> Self {
        self.owner = Arc::new(owner);
        self
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    fn finish(mut self, return_kind: ReturnKind, invoker: Invoker) -> HandlerMethod {
        for (i, p) in self.params.iter_mut().enumerate() {
            p.bind(i, &self.name);
        }
        HandlerMethod {
            name: self.name,
            owner: self.owner,
            params: self.params,
            return_kind,
            invoker,
            status: self.status,
        }
    }

    /// Plain result, wrapped in an already-completed completion
    pub fn sync<F>(self, f: F) -> HandlerMethod
    where
        F: Fn(&mut RequestContext, &Arguments<'_>) -> Result<Reply, Failure> + Send + Sync + 'static,
    {
        self.finish(
            ReturnKind::Sync,
            Arc::new(move |req, args| Completion::from_result(f(req, args))),
        )
    }

    /// `std::future::Future`, polled on whichever thread wakes it
    pub fn future<F, Fut>(self, f: F) -> HandlerMethod
    where
        F: Fn(&mut RequestContext, &Arguments<'_>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, Failure>> + Send + 'static,
    {
        self.finish(
            ReturnKind::Future,
            Arc::new(move |req, args| from_future(f(req, args))),
        )
    }

    /// `may` coroutine handle
    pub fn coroutine<F>(self, f: F) -> HandlerMethod
    where
        F: Fn(&mut RequestContext, &Arguments<'_>) -> may::coroutine::JoinHandle<Result<Reply, Failure>>
            + Send
            + Sync
            + 'static,
    {
        self.finish(
            ReturnKind::Coroutine,
            Arc::new(move |req, args| from_coroutine(f(req, args))),
        )
    }

    /// One-shot `may` channel
    pub fn channel<F>(self, f: F) -> HandlerMethod
    where
        F: Fn(&mut RequestContext, &Arguments<'_>) -> may::sync::mpsc::Receiver<Result<Reply, Failure>>
            + Send
            + Sync
            + 'static,
    {
        self.finish(
            ReturnKind::Channel,
            Arc::new(move |req, args| from_channel(f(req, args))),
        )
    }

    /// Already canonical
    pub fn completion<F>(self, f: F) -> HandlerMethod
    where
        F: Fn(&mut RequestContext, &Arguments<'_>) -> Completion<Reply> + Send + Sync + 'static,
    {
        self.finish(ReturnKind::Completion, Arc::new(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use serde_json::json;

    #[test]
    fn test_params_are_bound_to_handler() {
        let h = HandlerMethod::builder("create")
            .param(Param::path("id"))
            .param(Param::body())
            .status(201)
            .sync(|_, _| Ok(Reply::Empty));
        assert_eq!(h.params()[1].index(), 1);
        assert_eq!(h.params()[0].owner(), Some("create"));
        assert_eq!(h.status(), Some(201));
    }

    #[test]
    fn test_arguments_typed_access() {
        let params = vec![Param::path("id"), Param::query("tags")];
        let values = vec![json!("42"), json!(["a", "b"])];
        let args = Arguments::new(&params, &values);
        assert_eq!(args.str("id"), Some("42"));
        let tags: Vec<String> = args.get_named("tags").unwrap();
        assert_eq!(tags, vec!["a", "b"]);
        assert!(args.get::<u32>(0).is_err());
        assert!(args.named("missing").is_none());
    }

    #[test]
    fn test_sync_invoker_completes_immediately() {
        let h = HandlerMethod::builder("hello").sync(|_, _| Ok("hi".into()));
        let mut req = RequestContext::new(Method::GET, "/");
        let completion = h.invoke(&mut req, &Arguments::new(&[], &[]));
        assert!(completion.is_done());
        assert_eq!(completion.wait().unwrap(), Reply::Text("hi".into()));
    }

    #[test]
    fn test_owner_selectors() {
        let owner = HandlerOwner::new("UserController", "app::users")
            .supertype("BaseController")
            .marker("RestController");
        assert!(owner.is_assignable_to("UserController"));
        assert!(owner.is_assignable_to("BaseController"));
        assert!(!owner.is_assignable_to("OrderController"));
        assert!(owner.has_marker("RestController"));
        let entity = HttpEntity::ok(json!({"a": 1})).header("X-Id", "1");
        assert_eq!(entity.headers[0].0.as_ref(), "x-id");
    }
}
