use super::middleware::Middleware;
use crate::http::{HttpResponse, RequestContext};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Lock-free request counters for routed requests
///
/// Counts every request that reaches the route filters, accumulates latency, and splits
/// responses into client (4xx) and server (5xx) errors.
#[derive(Debug, Default)]
pub struct MetricsMiddleware {
    request_count: AtomicUsize,
    total_latency_ns: AtomicU64,
    client_errors: AtomicUsize,
    server_errors: AtomicUsize,
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Mean latency over all completed requests; zero before the first one
    pub fn average_latency(&self) -> Duration {
        let count = self.request_count.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    pub fn client_errors(&self) -> usize {
        self.client_errors.load(Ordering::Relaxed)
    }

    pub fn server_errors(&self) -> usize {
        self.server_errors.load(Ordering::Relaxed)
    }
}

impl Middleware for MetricsMiddleware {
    fn after(&self, _req: &RequestContext, res: &mut HttpResponse, latency: Duration) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        match res.status {
            400..=499 => {
                self.client_errors.fetch_add(1, Ordering::Relaxed);
            }
            500..=599 => {
                self.server_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn test_counts_by_status_class() {
        let metrics = MetricsMiddleware::new();
        let req = RequestContext::new(Method::GET, "/");
        metrics.after(&req, &mut HttpResponse::new(200), Duration::from_millis(2));
        metrics.after(&req, &mut HttpResponse::new(404), Duration::from_millis(4));
        metrics.after(&req, &mut HttpResponse::new(503), Duration::from_millis(6));
        assert_eq!(metrics.request_count(), 3);
        assert_eq!(metrics.client_errors(), 1);
        assert_eq!(metrics.server_errors(), 1);
        assert_eq!(metrics.average_latency(), Duration::from_millis(4));
    }
}
