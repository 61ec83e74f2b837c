use super::core::{Filter, Next};
use crate::completion::Completion;
use crate::http::{HttpResponse, RequestContext};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Synchronous before/after hooks around a matched route.
///
/// `before` may answer the request itself by returning a response, in which case neither the
/// handler nor any later filter runs. `after` sees the final response and the time spent in
/// the rest of the chain.
pub trait Middleware: Send + Sync {
    fn before(&self, _req: &RequestContext) -> Option<HttpResponse> {
        None
    }

    fn after(&self, _req: &RequestContext, _res: &mut HttpResponse, _latency: Duration) {}
}

/// Adapts a [`Middleware`] into a route [`Filter`]
pub struct MiddlewareFilter {
    middleware: Arc<dyn Middleware>,
}

impl MiddlewareFilter {
    pub fn new(middleware: Arc<dyn Middleware>) -> Self {
        Self { middleware }
    }
}

impl Filter<RequestContext> for MiddlewareFilter {
    fn filter(&self, mut ctx: RequestContext, next: Next<RequestContext>) -> Completion<RequestContext> {
        if let Some(response) = self.middleware.before(&ctx) {
            ctx.response = response;
            return Completion::ready(ctx);
        }
        let started = Instant::now();
        let middleware = Arc::clone(&self.middleware);
        next.run(ctx).map(move |mut ctx| {
            let mut response = std::mem::take(&mut ctx.response);
            middleware.after(&ctx, &mut response, started.elapsed());
            ctx.response = response;
            ctx
        })
    }
}
