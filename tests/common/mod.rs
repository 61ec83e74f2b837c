#![allow(dead_code)]

use brrtdispatch::config::DispatchConfig;
use brrtdispatch::dispatcher::{Dispatcher, DispatcherBuilder};
use brrtdispatch::http::RequestContext;
use brrtdispatch::scheduler::{BackpressureMode, WorkerPoolConfig, DEFAULT_SCHEDULER};
use std::sync::Once;

static INIT: Once = Once::new();

/// Configure the may runtime once per test binary
pub fn init() {
    INIT.call_once(|| {
        may::config().set_workers(2);
    });
}

/// Small pool config so tests do not depend on `BRRTD_*` environment variables
pub fn pool(num_workers: usize, queue_bound: usize, mode: BackpressureMode) -> WorkerPoolConfig {
    WorkerPoolConfig::new(num_workers, queue_bound, mode, 10, 0x10000)
}

/// Dispatch config with a two-worker `biz` pool
pub fn test_config() -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config
        .worker_pools
        .insert(DEFAULT_SCHEDULER.to_string(), pool(2, 64, BackpressureMode::Block));
    config
}

pub fn builder() -> DispatcherBuilder {
    init();
    Dispatcher::builder().config(test_config())
}

/// Run a request through the dispatcher and wait for its response
pub fn serve(dispatcher: &Dispatcher, request: RequestContext) -> RequestContext {
    dispatcher
        .service(request)
        .wait()
        .expect("request completes with a response")
}
