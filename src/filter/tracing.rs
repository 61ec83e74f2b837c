use super::core::{Filter, Next};
use crate::completion::Completion;
use crate::http::RequestContext;
use tracing::{field, info, info_span};

/// Opens a `request` span around the rest of the chain and records status and latency when
/// the response is ready.
///
/// The span is only entered while the chain runs synchronously; the completion may finish on
/// another worker, so the final fields are recorded on the span rather than through a guard.
#[derive(Debug, Default)]
pub struct TracingFilter;

impl Filter<RequestContext> for TracingFilter {
    fn filter(&self, ctx: RequestContext, next: Next<RequestContext>) -> Completion<RequestContext> {
        let span = info_span!(
            "request",
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            route = ctx.route_name.as_deref().unwrap_or("-"),
            status = field::Empty,
            latency_ms = field::Empty,
        );
        let pending = {
            let _entered = span.enter();
            next.run(ctx)
        };
        pending.map(move |ctx| {
            let latency_ms = ctx.elapsed().as_millis() as u64;
            span.record("status", ctx.response.status);
            span.record("latency_ms", latency_ms);
            span.in_scope(|| {
                info!(
                    status = ctx.response.status,
                    latency_ms = latency_ms,
                    "Request completed"
                )
            });
            ctx
        })
    }
}
