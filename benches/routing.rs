use brrtdispatch::http::RequestContext;
use brrtdispatch::mapping::Mapping;
use brrtdispatch::router::RouteRegistry;
use brrtdispatch::scheduler::ScratchPool;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use http::Method;

/// About a hundred routes over a handful of resource trees
fn zoo_routes() -> RouteRegistry<usize> {
    let mut builder = RouteRegistry::builder().negotiation_param(Some("format".to_string()));
    let mut id = 0usize;
    for resource in [
        "animals", "keepers", "habitats", "feeds", "toys", "visits", "tickets", "events",
    ] {
        for (method, path) in [
            (Method::GET, format!("/zoo/{resource}")),
            (Method::POST, format!("/zoo/{resource}")),
            (Method::GET, format!("/zoo/{resource}/{{id}}")),
            (Method::PUT, format!("/zoo/{resource}/{{id}}")),
            (Method::PATCH, format!("/zoo/{resource}/{{id}}")),
            (Method::DELETE, format!("/zoo/{resource}/{{id}}")),
            (Method::GET, format!(r"/zoo/{resource}/{{id:\d+}}/history")),
            (Method::GET, format!("/zoo/{resource}/{{id}}/notes/{{note_id}}")),
            (Method::GET, format!("/zoo/{resource}/search")),
            (Method::GET, format!("/zoo/{resource}/export/{{*rest}}")),
            (Method::GET, format!("/admin/{resource}/{{id}}/audit")),
            (Method::POST, format!("/admin/{resource}/{{id}}/audit")),
        ] {
            builder = builder.route(
                Mapping::builder()
                    .path(&path)
                    .method(method)
                    .produces("application/json")
                    .build(),
                id,
            );
            id += 1;
        }
    }
    builder
        .route(Mapping::get("/complex/{a}/{b}/{c}/{d}/{e}/{f}/{g}/{h}/{i}"), id)
        .build()
        .expect("valid routes")
}

fn bench_route_match(c: &mut Criterion) {
    let registry = zoo_routes();
    let pool = ScratchPool::new(1);
    let requests = [
        RequestContext::new(Method::GET, "/zoo/animals/123"),
        RequestContext::new(Method::GET, "/zoo/keepers/7/notes/42"),
        RequestContext::new(Method::GET, "/zoo/habitats/88/history"),
        RequestContext::new(Method::GET, "/zoo/tickets/export/2024/03/summary.csv"),
        RequestContext::new(Method::POST, "/admin/events/9/audit"),
        RequestContext::new(Method::GET, "/complex/1/2/3/4/5/6/7/8/9"),
    ];
    c.bench_function("route_match", |b| {
        b.iter(|| {
            for req in requests.iter() {
                let mut scratch = pool.acquire();
                let res = registry.route_with(req, &mut scratch);
                black_box(&res);
            }
        })
    });

    let misses = [
        RequestContext::new(Method::GET, "/zoo/unknown/1"),
        RequestContext::new(Method::DELETE, "/zoo/animals"),
    ];
    c.bench_function("route_mismatch", |b| {
        b.iter(|| {
            for req in misses.iter() {
                let mut scratch = pool.acquire();
                let res = registry.route_with(req, &mut scratch);
                black_box(&res);
            }
        })
    });
}

criterion_group!(benches, bench_route_match);
criterion_main!(benches);
