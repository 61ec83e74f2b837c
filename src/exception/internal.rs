use super::failure::Failure;
use super::kind::{
    ErrorKind, ABANDONED, CONVERSION_FAILURE, FRAMEWORK_FAILURE, MISSING_REQUIRED_VALUE,
    NOT_ACCEPTABLE, SCHEDULING_FAILURE, UNSUPPORTED_MEDIA_TYPE,
};
use super::mapper::{ExceptionMapper, ExceptionResolver};
use crate::completion::Completion;
use crate::http::{HttpResponse, RequestContext};
use crate::media::negotiate_accept;
use crate::resolver::{
    JsonSerializer, NegotiatingResponseResolver, Serializer, TextSerializer, YamlSerializer,
};
use crate::router::RouteFailure;
use crate::scheduler::RejectPhase;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Writes framework error bodies (`{"error": message, "status": status}`) in the type the
/// request negotiated, the same way handler replies are negotiated.
///
/// A request that accepts nothing the serializers can write still gets the JSON body.
#[derive(Clone)]
pub struct ErrorBodyWriter {
    resolver: Arc<NegotiatingResponseResolver>,
    negotiation_param: Option<String>,
}

impl ErrorBodyWriter {
    pub fn new(serializers: Vec<Arc<dyn Serializer>>, negotiation_param: Option<String>) -> Self {
        Self {
            resolver: Arc::new(NegotiatingResponseResolver::new(serializers)),
            negotiation_param,
        }
    }

    /// Replace `request.response` with an error response for `status`
    pub fn write(&self, request: &mut RequestContext, status: u16, message: &str) {
        let accept = negotiate_accept(
            self.negotiation_param
                .as_deref()
                .and_then(|p| request.query_param(p)),
            request.accept().as_deref(),
        );
        let body = json!({ "error": message, "status": status });
        let mut response = HttpResponse::new(status);
        if !self.resolver.write_value(&body, &accept, &[], &mut response) {
            response = HttpResponse::json(status, &body);
        }
        request.response = response;
    }
}

impl Default for ErrorBodyWriter {
    fn default() -> Self {
        Self::new(
            vec![
                Arc::new(JsonSerializer::new()),
                Arc::new(YamlSerializer::new()),
                Arc::new(TextSerializer::new()),
            ],
            Some("format".to_string()),
        )
    }
}

impl fmt::Debug for ErrorBodyWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorBodyWriter")
            .field(
                "serializers",
                &self
                    .resolver
                    .serializers()
                    .iter()
                    .map(|s| s.media_type().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("negotiation_param", &self.negotiation_param)
            .finish()
    }
}

/// Lowest-precedence mapper: handles every framework failure with a negotiated error body
#[derive(Debug, Default)]
pub struct InternalExceptionMapper {
    resolver: Arc<InternalExceptionResolver>,
}

impl InternalExceptionMapper {
    pub fn new(errors: ErrorBodyWriter) -> Self {
        Self {
            resolver: Arc::new(InternalExceptionResolver::new(errors)),
        }
    }
}

impl ExceptionMapper for InternalExceptionMapper {
    fn map_to(&self, kind: &'static ErrorKind) -> Option<Arc<dyn ExceptionResolver>> {
        kind.is_a(&FRAMEWORK_FAILURE)
            .then(|| Arc::clone(&self.resolver) as Arc<dyn ExceptionResolver>)
    }
}

/// Writes the error body with the status for the failure
#[derive(Debug, Default)]
pub struct InternalExceptionResolver {
    errors: ErrorBodyWriter,
}

impl InternalExceptionResolver {
    pub fn new(errors: ErrorBodyWriter) -> Self {
        Self { errors }
    }
}

/// Status the internal mapper uses for a framework failure
pub fn framework_status(failure: &Failure) -> u16 {
    if let Some(mismatch) = failure.route_mismatch() {
        return mismatch.reason.status();
    }
    if let Some(rejection) = failure.rejection() {
        return match rejection.phase() {
            RejectPhase::Queued => 503,
            RejectPhase::Ttfb => 504,
        };
    }
    let kind = failure.kind();
    if kind.is_a(&MISSING_REQUIRED_VALUE) || kind.is_a(&CONVERSION_FAILURE) {
        400
    } else if kind.is_a(&UNSUPPORTED_MEDIA_TYPE) {
        415
    } else if kind.is_a(&NOT_ACCEPTABLE) {
        406
    } else if kind.is_a(&SCHEDULING_FAILURE) {
        503
    } else if kind.is_a(&ABANDONED) {
        500
    } else {
        failure.status().unwrap_or(500)
    }
}

impl ExceptionResolver for InternalExceptionResolver {
    fn resolve(&self, failure: &Failure, mut request: RequestContext) -> Completion<RequestContext> {
        let status = framework_status(failure);
        debug!(
            request_id = %request.request_id,
            kind = failure.kind().name(),
            status = status,
            "Framework failure mapped"
        );
        if status >= 500 {
            // Internal details stay in the log
            error!(
                request_id = %request.request_id,
                error = %failure,
                "Framework failure"
            );
            self.errors.write(&mut request, status, "Internal Server Error");
        } else {
            self.errors.write(&mut request, status, failure.message());
        }
        if let Some(mismatch) = failure.route_mismatch() {
            if mismatch.reason == RouteFailure::MethodMismatch && !mismatch.allowed_methods.is_empty() {
                let allow = mismatch
                    .allowed_methods
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                request.response.set_header("allow", allow);
            }
        }
        Completion::ready(request)
    }
}

/// Last resort for a failure no mapper handles: generic 500, cause logged
pub fn write_unhandled(errors: &ErrorBodyWriter, failure: &Failure, request: &mut RequestContext) {
    error!(
        request_id = %request.request_id,
        route = request.route_name.as_deref().unwrap_or("-"),
        kind = failure.kind().name(),
        error = %failure,
        source = ?std::error::Error::source(failure).map(ToString::to_string),
        "Unhandled failure"
    );
    errors.write(request, 500, "Internal Server Error");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::RUNTIME_FAILURE;
    use crate::router::RouteMismatch;
    use crate::scheduler::RejectReason;
    use http::Method;
    use std::time::Duration;

    fn resolve(failure: Failure) -> HttpResponse {
        InternalExceptionResolver::default()
            .resolve(&failure, RequestContext::new(Method::GET, "/users"))
            .wait()
            .unwrap()
            .response
    }

    #[test]
    fn test_only_framework_kinds_are_mapped() {
        let mapper = InternalExceptionMapper::default();
        assert!(mapper.map_to(&MISSING_REQUIRED_VALUE).is_some());
        assert!(mapper.map_to(&ABANDONED).is_some());
        assert!(mapper.map_to(&RUNTIME_FAILURE).is_none());
    }

    #[test]
    fn test_routing_statuses() {
        let mut mismatch = RouteMismatch::new(RouteFailure::MethodMismatch, Method::DELETE, "/users");
        mismatch.allowed_methods = vec![Method::GET, Method::POST];
        let res = resolve(Failure::routing(mismatch));
        assert_eq!(res.status, 405);
        assert_eq!(res.get_header("allow"), Some("GET, POST"));

        let res = resolve(Failure::routing(RouteMismatch::new(
            RouteFailure::PatternMismatch,
            Method::GET,
            "/nope",
        )));
        assert_eq!(res.status, 404);
        assert_eq!(res.get_header("allow"), None);
    }

    #[test]
    fn test_resolution_statuses() {
        assert_eq!(resolve(Failure::missing_required("name")).status, 400);
        assert_eq!(resolve(Failure::unsupported_media_type("xml")).status, 415);
        assert_eq!(resolve(Failure::not_acceptable("xml")).status, 406);
        let res = resolve(Failure::abandoned("gone"));
        assert_eq!(res.status, 500);
        assert_eq!(
            res.body_json().and_then(|v| v["error"].as_str().map(str::to_string)),
            Some("Internal Server Error".to_string())
        );
    }

    #[test]
    fn test_rejection_statuses() {
        assert_eq!(
            framework_status(&Failure::rejected(RejectReason::QueueFull { bound: 4 })),
            503
        );
        assert_eq!(
            framework_status(&Failure::rejected(RejectReason::TtfbTimeout {
                elapsed: Duration::from_millis(20)
            })),
            504
        );
    }

    #[test]
    fn test_unhandled_is_generic_500() {
        let mut req = RequestContext::new(Method::GET, "/");
        write_unhandled(
            &ErrorBodyWriter::default(),
            &Failure::illegal_state("secret detail"),
            &mut req,
        );
        assert_eq!(req.response.status, 500);
        assert!(!req.response.body_str().unwrap_or("").contains("secret"));
    }

    #[test]
    fn test_error_body_follows_negotiation() {
        let writer = ErrorBodyWriter::default();
        let mut req = RequestContext::new(Method::GET, "/nope?format=yaml");
        writer.write(&mut req, 404, "Not Found");
        assert_eq!(req.response.status, 404);
        assert_eq!(req.response.content_type(), Some("application/yaml"));
        let body: serde_json::Value =
            serde_yaml::from_str(req.response.body_str().unwrap()).unwrap();
        assert_eq!(body["error"], "Not Found");
        assert_eq!(body["status"], 404);
    }

    #[test]
    fn test_error_body_falls_back_to_json() {
        let writer = ErrorBodyWriter::default();
        let mut req = RequestContext::new(Method::GET, "/").with_header("accept", "image/png");
        writer.write(&mut req, 415, "Unsupported Media Type");
        assert_eq!(req.response.content_type(), Some("application/json"));
        assert_eq!(
            req.response.body_json().and_then(|v| v["status"].as_u64()),
            Some(415)
        );
    }
}
