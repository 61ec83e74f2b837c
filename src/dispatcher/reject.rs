use crate::exception::ErrorBodyWriter;
use crate::http::RequestContext;
use crate::scheduler::{RejectPhase, RejectReason};
use tracing::{info, warn};

/// Hook for requests a scheduler refused or could not answer.
///
/// Rejections bypass the exception chain because the handler never ran. Return `true` when
/// `request.response` should be sent, `false` when nothing can be written (the dispatcher
/// then fails the request's completion with a `SchedulingFailure`).
pub trait RejectHandler: Send + Sync {
    fn on_reject(&self, reason: &RejectReason, request: &mut RequestContext) -> bool;
}

/// 503 for saturation and shutdown, 504 for timeouts; a closed connection is only logged
#[derive(Debug, Default)]
pub struct DefaultRejectHandler {
    errors: ErrorBodyWriter,
}

impl DefaultRejectHandler {
    pub fn new(errors: ErrorBodyWriter) -> Self {
        Self { errors }
    }
}

impl RejectHandler for DefaultRejectHandler {
    fn on_reject(&self, reason: &RejectReason, request: &mut RequestContext) -> bool {
        let status = match reason {
            RejectReason::QueueFull { .. } | RejectReason::ShuttingDown => 503,
            RejectReason::QueuedTimeout { .. } | RejectReason::TtfbTimeout { .. } => 504,
            RejectReason::ConnectionClosed => {
                info!(
                    request_id = %request.request_id,
                    route = request.route_name.as_deref().unwrap_or("-"),
                    "Connection closed before response; dropping it"
                );
                return false;
            }
        };
        warn!(
            request_id = %request.request_id,
            route = request.route_name.as_deref().unwrap_or("-"),
            phase = ?reason.phase(),
            reason = %reason,
            status = status,
            "Request rejected by scheduler"
        );
        let message = if status == 504 {
            "Gateway Timeout"
        } else {
            "Service Unavailable"
        };
        self.errors.write(request, status, message);
        if reason.phase() == RejectPhase::Queued {
            request.response.set_header("retry-after", "1");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::time::Duration;

    #[test]
    fn test_default_statuses() {
        let handler = DefaultRejectHandler::default();
        let mut req = RequestContext::new(Method::GET, "/");
        assert!(handler.on_reject(&RejectReason::QueueFull { bound: 4 }, &mut req));
        assert_eq!(req.response.status, 503);
        assert_eq!(req.response.get_header("retry-after"), Some("1"));

        let mut req = RequestContext::new(Method::GET, "/");
        let reason = RejectReason::TtfbTimeout {
            elapsed: Duration::from_millis(30),
        };
        assert!(handler.on_reject(&reason, &mut req));
        assert_eq!(req.response.status, 504);
        assert_eq!(req.response.get_header("retry-after"), None);
    }

    #[test]
    fn test_rejection_body_is_negotiated() {
        let handler = DefaultRejectHandler::default();
        let mut req = RequestContext::new(Method::GET, "/").with_header("accept", "application/yaml");
        assert!(handler.on_reject(&RejectReason::ShuttingDown, &mut req));
        assert_eq!(req.response.status, 503);
        assert_eq!(req.response.content_type(), Some("application/yaml"));
    }

    #[test]
    fn test_connection_closed_writes_nothing() {
        let mut req = RequestContext::new(Method::GET, "/");
        let handler = DefaultRejectHandler::default();
        assert!(!handler.on_reject(&RejectReason::ConnectionClosed, &mut req));
        assert_eq!(req.response.status, 200);
    }
}
