#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Argument binding and response writing through the dispatcher
//!
//! # Test Coverage
//!
//! - Header, cookie, matrix, attribute and request id parameters
//! - Request bodies read by content type (JSON, YAML, plain text)
//! - Application converters for named parameter types
//! - Response negotiation, including the `format` query override
//! - `HttpEntity` replies carrying status and headers

mod common;

use brrtdispatch::error::BuildError;
use brrtdispatch::http::RequestContext;
use brrtdispatch::mapping::Mapping;
use brrtdispatch::resolver::{
    ConversionError, HandlerMethod, HttpEntity, Param, ParamType, Reply, ResolverRegistry,
};
use common::{builder, serve};
use http::Method;
use serde_json::{json, Value};

fn echo_body() -> HandlerMethod {
    HandlerMethod::builder("echo_body")
        .param(Param::body())
        .sync(|_, args| Ok(Reply::Value(args.named("body").cloned().unwrap_or_default())))
}

fn post(path: &str, content_type: &str, body: &str) -> RequestContext {
    RequestContext::new(Method::POST, path)
        .with_header("Content-Type", content_type)
        .with_header("Accept", "application/json")
        .with_body(body)
}

#[test]
fn test_body_read_by_content_type() {
    let dispatcher = builder()
        .route(Mapping::post("/echo"), echo_body())
        .build()
        .unwrap();

    let from_json = serve(&dispatcher, post("/echo", "application/json", r#"{"n": 1}"#));
    assert_eq!(from_json.response.body_json().unwrap(), json!({ "n": 1 }));

    let from_yaml = serve(&dispatcher, post("/echo", "application/yaml", "n: 1\n"));
    assert_eq!(from_yaml.response.body_json().unwrap(), json!({ "n": 1 }));

    let unreadable = serve(&dispatcher, post("/echo", "application/xml", "<n>1</n>"));
    assert_eq!(unreadable.response.status, 415);
}

#[test]
fn test_request_scoped_params() {
    let inspect = HandlerMethod::builder("inspect")
        .param(Param::header("x-tenant"))
        .param(Param::cookie("session"))
        .param(Param::matrix("color").required(false))
        .param(Param::attribute("user").required(false))
        .param(Param::request_id())
        .sync(|_, args| {
            Ok(Reply::Value(json!({
                "tenant": args.str("x-tenant"),
                "session": args.str("session"),
                "color": args.str("color"),
                "has_request_id": args.str("requestId").is_some_and(|id| !id.is_empty()),
            })))
        });
    let dispatcher = builder()
        .route(Mapping::get("/cars/{model}"), inspect)
        .build()
        .unwrap();

    let done = serve(
        &dispatcher,
        RequestContext::new(Method::GET, "/cars/roadster;color=red")
            .with_header("X-Tenant", "acme")
            .with_header("Cookie", "session=abc; theme=dark"),
    );
    assert_eq!(
        done.response.body_json().unwrap(),
        json!({
            "tenant": "acme",
            "session": "abc",
            "color": "red",
            "has_request_id": true,
        })
    );
}

#[test]
fn test_named_type_converter() {
    let resolvers = ResolverRegistry::builder()
        .converter("Money", |raw| {
            let cents = raw
                .strip_prefix('$')
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| ConversionError::Invalid {
                    expected: "Money".to_string(),
                    value: raw.to_string(),
                })?;
            Ok(json!((cents * 100.0).round() as i64))
        })
        .build();
    let price = HandlerMethod::builder("price")
        .param(Param::query("amount").of(ParamType::Named("Money")))
        .sync(|_, args| Ok(Reply::Value(json!({ "cents": args.get_named::<i64>("amount")? }))));
    let dispatcher = builder()
        .resolvers(resolvers)
        .route(Mapping::get("/price"), price)
        .build()
        .unwrap();

    let ok = serve(&dispatcher, RequestContext::new(Method::GET, "/price?amount=$4.20"));
    assert_eq!(ok.response.body_json().unwrap(), json!({ "cents": 420 }));

    let bad = serve(&dispatcher, RequestContext::new(Method::GET, "/price?amount=4.20"));
    assert_eq!(bad.response.status, 400);
}

#[test]
fn test_named_type_without_converter_fails_build() {
    let price = HandlerMethod::builder("price")
        .param(Param::query("amount").of(ParamType::Named("Money")))
        .sync(|_, _| Ok(Reply::Empty));
    let err = builder()
        .route(Mapping::get("/price"), price)
        .build()
        .unwrap_err();
    assert!(matches!(err, BuildError::NoConverter { .. }));
}

#[test]
fn test_list_param_collects_repeated_values() {
    let tags = HandlerMethod::builder("tags")
        .param(Param::query("tag").of(ParamType::list(ParamType::String)))
        .sync(|_, args| Ok(Reply::Value(args.named("tag").cloned().unwrap_or_default())));
    let dispatcher = builder().route(Mapping::get("/tags"), tags).build().unwrap();

    let done = serve(&dispatcher, RequestContext::new(Method::GET, "/tags?tag=a&tag=b"));
    assert_eq!(done.response.body_json().unwrap(), json!(["a", "b"]));
}

#[test]
fn test_format_param_selects_yaml() {
    let report = HandlerMethod::builder("report")
        .sync(|_, _| Ok(Reply::Value(json!({ "total": 3 }))));
    let dispatcher = builder()
        .route(
            Mapping::builder()
                .path("/report")
                .method(Method::GET)
                .produces("application/json")
                .produces("application/yaml")
                .build(),
            report,
        )
        .build()
        .unwrap();

    let json = serve(&dispatcher, RequestContext::new(Method::GET, "/report"));
    assert_eq!(json.response.content_type(), Some("application/json"));

    let yaml = serve(
        &dispatcher,
        RequestContext::new(Method::GET, "/report?format=yaml").with_header("Accept", "application/json"),
    );
    assert_eq!(yaml.response.content_type(), Some("application/yaml"));
    let parsed: Value = serde_yaml::from_slice(&yaml.response.body).unwrap();
    assert_eq!(parsed, json!({ "total": 3 }));
}

#[test]
fn test_http_entity_sets_status_and_headers() {
    let create = HandlerMethod::builder("create").sync(|_, _| {
        Ok(Reply::Entity(
            HttpEntity::new(201)
                .header("location", "/users/7")
                .body(json!({ "id": 7 })),
        ))
    });
    let dispatcher = builder().route(Mapping::post("/users"), create).build().unwrap();

    let done = serve(
        &dispatcher,
        RequestContext::new(Method::POST, "/users").with_header("Accept", "application/json"),
    );
    assert_eq!(done.response.status, 201);
    assert_eq!(done.response.get_header("location"), Some("/users/7"));
    assert_eq!(done.response.body_json().unwrap(), json!({ "id": 7 }));
}
