use super::kind::{
    ErrorKind, ABANDONED, CONVERSION_FAILURE, FRAMEWORK_FAILURE, HANDLER_PANIC, ILLEGAL_ARGUMENT,
    ILLEGAL_STATE, MISSING_REQUIRED_VALUE, NOT_ACCEPTABLE, RESOLUTION_FAILURE, ROUTING_FAILURE,
    RUNTIME_FAILURE, SCHEDULING_FAILURE, UNSUPPORTED_MEDIA_TYPE,
};
use crate::router::RouteMismatch;
use crate::scheduler::RejectReason;
use serde_json::{json, Value};
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Coarse failure taxonomy used for logging and reject handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// No route matched
    Routing,
    /// Arguments or body could not be produced, or the response could not be negotiated
    Resolution,
    /// Application handler code failed
    Invocation,
    /// A scheduler refused the work
    Scheduling,
}

/// A failure flowing through the dispatch pipeline.
///
/// Handlers return `Result<Reply, Failure>`; resolvers, schedulers and the router produce
/// failures of the framework kinds. The original cause is kept as a shared `source` so that
/// passing a failure through a completion adapter never re-wraps it.
#[derive(Clone)]
pub struct Failure {
    kind: &'static ErrorKind,
    message: String,
    status: Option<u16>,
    route: Option<RouteMismatch>,
    rejection: Option<RejectReason>,
    source: Option<Arc<dyn Error + Send + Sync>>,
}

impl Failure {
    pub fn new(kind: &'static ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            route: None,
            rejection: None,
            source: None,
        }
    }

    /// Wrap an error of any type, keeping it as the source
    pub fn from_error<E>(kind: &'static ErrorKind, error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::new(kind, error.to_string()).with_source(error)
    }

    pub fn routing(mismatch: RouteMismatch) -> Self {
        let mut failure = Self::new(&ROUTING_FAILURE, mismatch.to_string());
        failure.status = Some(mismatch.reason.status());
        failure.route = Some(mismatch);
        failure
    }

    pub fn missing_required(name: &str) -> Self {
        Self::new(
            &MISSING_REQUIRED_VALUE,
            format!("Missing required value '{}'", name),
        )
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(&UNSUPPORTED_MEDIA_TYPE, message)
    }

    pub fn not_acceptable(message: impl Into<String>) -> Self {
        Self::new(&NOT_ACCEPTABLE, message)
    }

    pub fn conversion<E>(name: &str, error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::new(
            &CONVERSION_FAILURE,
            format!("Cannot convert value '{}': {}", name, error),
        )
        .with_source(error)
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(&ILLEGAL_ARGUMENT, message)
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(&ILLEGAL_STATE, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(&RUNTIME_FAILURE, message)
    }

    pub fn abandoned(message: impl Into<String>) -> Self {
        Self::new(&ABANDONED, message)
    }

    /// Failure for a caught panic payload
    pub fn panic(payload: &(dyn Any + Send)) -> Self {
        Self::new(&HANDLER_PANIC, panic_message(payload))
    }

    pub fn rejected(reason: RejectReason) -> Self {
        let mut failure = Self::new(&SCHEDULING_FAILURE, reason.to_string());
        failure.rejection = Some(reason);
        failure
    }

    /// Status to use when a mapper writes this failure without choosing its own
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn kind(&self) -> &'static ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn route_mismatch(&self) -> Option<&RouteMismatch> {
        self.route.as_ref()
    }

    pub fn rejection(&self) -> Option<&RejectReason> {
        self.rejection.as_ref()
    }

    /// Whether this failure is of `kind` or one of its descendants
    pub fn is(&self, kind: &ErrorKind) -> bool {
        self.kind.is_a(kind)
    }

    pub fn category(&self) -> FailureCategory {
        if self.is(&ROUTING_FAILURE) {
            FailureCategory::Routing
        } else if self.is(&SCHEDULING_FAILURE) {
            FailureCategory::Scheduling
        } else if self.is(&RESOLUTION_FAILURE) || self.is(&FRAMEWORK_FAILURE) {
            FailureCategory::Resolution
        } else {
            FailureCategory::Invocation
        }
    }

    /// JSON view bound to error handler parameters of type `Json`
    pub fn to_json(&self) -> Value {
        json!({
            "kind": self.kind.name(),
            "message": self.message,
            "status": self.status,
        })
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Failure");
        d.field("kind", &self.kind)
            .field("message", &self.message)
            .field("status", &self.status);
        if let Some(route) = &self.route {
            d.field("route", route);
        }
        if let Some(rejection) = &self.rejection {
            d.field("rejection", rejection);
        }
        if let Some(source) = &self.source {
            d.field("source", &source.to_string());
        }
        d.finish()
    }
}

impl Error for Failure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
