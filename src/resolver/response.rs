use super::core::{
    ResponseEntity, ResponseEntityAdvice, ResponseEntityAdviceFactory, ResponseEntityResolver,
    ResponseEntityResolverFactory,
};
use super::handler::{HandlerMethod, Reply};
use super::serializer::Serializer;
use crate::exception::Failure;
use crate::http::HttpResponse;
use crate::media::{refuses, MediaType, TEXT_PLAIN};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Default response writer; supports every handler
#[derive(Debug, Default)]
pub struct NegotiatingResponseResolverFactory;

impl ResponseEntityResolverFactory for NegotiatingResponseResolverFactory {
    fn supports(&self, _handler: &HandlerMethod) -> bool {
        true
    }

    fn create_resolver(
        &self,
        _handler: &HandlerMethod,
        serializers: &[Arc<dyn Serializer>],
    ) -> Arc<dyn ResponseEntityResolver> {
        Arc::new(NegotiatingResponseResolver {
            serializers: serializers.to_vec(),
        })
    }

    fn order(&self) -> i32 {
        i32::MAX
    }
}

/// Writes a [`Reply`] through content negotiation.
///
/// Candidate types are the route's `produces` types, or every serializer's type when the
/// route declares none. For each requested type (best first) the first compatible candidate
/// whose serializer accepts the value is written. `Text` replies prefer `text/plain` when it
/// is acceptable. No writable combination is a `NotAcceptable` failure.
pub struct NegotiatingResponseResolver {
    serializers: Vec<Arc<dyn Serializer>>,
}

impl NegotiatingResponseResolver {
    pub fn new(serializers: Vec<Arc<dyn Serializer>>) -> Self {
        Self { serializers }
    }

    fn offered(&self, produces: &[MediaType], prefer_text: bool) -> Vec<MediaType> {
        let mut offered: Vec<MediaType> = if produces.is_empty() {
            self.serializers
                .iter()
                .map(|s| s.media_type().without_params())
                .collect()
        } else {
            produces.to_vec()
        };
        if prefer_text {
            if let Some(pos) = offered.iter().position(|m| m.essence() == TEXT_PLAIN) {
                let text = offered.remove(pos);
                offered.insert(0, text);
            }
        }
        offered
    }

    /// Serialize `value` for the best acceptable type, returning the bytes and written type
    fn negotiate(
        &self,
        value: &Value,
        accept: &[MediaType],
        offered: &[MediaType],
    ) -> Option<(Vec<u8>, MediaType)> {
        for requested in accept.iter().filter(|a| a.quality() > 0.0) {
            for candidate in offered {
                if !requested.is_compatible_with(candidate) {
                    continue;
                }
                let chosen = candidate.most_specific(requested);
                if chosen.is_wildcard_type() || chosen.is_wildcard_subtype() {
                    continue;
                }
                if refuses(accept, chosen) {
                    continue;
                }
                for serializer in self.serializers.iter().filter(|s| s.supports(chosen)) {
                    match serializer.serialize(value) {
                        Ok(bytes) => return Some((bytes, chosen.without_params())),
                        Err(e) => debug!(
                            media = %chosen,
                            error = %e,
                            "Serializer could not write value"
                        ),
                    }
                }
            }
        }
        None
    }

    /// Negotiate and write `value` straight into `response`, outside any handler.
    ///
    /// Returns `false`, leaving `response` untouched, when no acceptable type can be written.
    pub fn write_value(
        &self,
        value: &Value,
        accept: &[MediaType],
        produces: &[MediaType],
        response: &mut HttpResponse,
    ) -> bool {
        let offered = self.offered(produces, false);
        match self.negotiate(value, accept, &offered) {
            Some((bytes, media)) => {
                response.set_header("content-type", media.to_string());
                response.body = bytes;
                true
            }
            None => false,
        }
    }

    pub fn serializers(&self) -> &[Arc<dyn Serializer>] {
        &self.serializers
    }

    fn write_bytes(bytes: Vec<u8>, entity: &mut ResponseEntity<'_>) -> Result<(), Failure> {
        // Raw bytes take the first concrete produces type the client accepts
        let media = entity
            .produces
            .iter()
            .find(|p| {
                !p.is_wildcard_type()
                    && !p.is_wildcard_subtype()
                    && !refuses(entity.accept, p)
                    && entity
                        .accept
                        .iter()
                        .any(|a| a.quality() > 0.0 && a.is_compatible_with(p))
            })
            .map(MediaType::without_params)
            .unwrap_or_else(MediaType::octet_stream);
        let response = &mut entity.request.response;
        response.set_header("content-type", media.to_string());
        response.body = bytes;
        Ok(())
    }
}

impl ResponseEntityResolver for NegotiatingResponseResolver {
    fn write(&self, reply: Reply, entity: &mut ResponseEntity<'_>) -> Result<(), Failure> {
        let (value, prefer_text) = match reply {
            Reply::Empty => {
                entity.request.response.body.clear();
                return Ok(());
            }
            Reply::Bytes(bytes) => return Self::write_bytes(bytes, entity),
            Reply::Text(text) => (Value::String(text), true),
            Reply::Value(value) => (value, false),
            Reply::Entity(inner) => {
                // Only reachable when the envelope advice is not registered
                return self.write(*inner.body, entity);
            }
        };

        let offered = self.offered(entity.produces, prefer_text);
        match self.negotiate(&value, entity.accept, &offered) {
            Some((bytes, media)) => {
                let response = &mut entity.request.response;
                response.set_header("content-type", media.to_string());
                response.body = bytes;
                Ok(())
            }
            None => Err(Failure::not_acceptable(format!(
                "No serializer can write the response for handler '{}' as any of [{}]",
                entity.handler.name(),
                entity
                    .accept
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// Unwraps [`HttpEntity`](super::HttpEntity) replies: status and headers go to the response,
/// the nested body continues to the writer
#[derive(Debug, Default)]
pub struct HttpEntityAdvice;

impl ResponseEntityAdvice for HttpEntityAdvice {
    fn before_write(&self, reply: Reply, entity: &mut ResponseEntity<'_>) -> Result<Reply, Failure> {
        let mut reply = reply;
        while let Reply::Entity(envelope) = reply {
            let response = &mut entity.request.response;
            response.status = envelope.status;
            for (name, value) in envelope.headers {
                response.add_header(&name, value);
            }
            reply = *envelope.body;
        }
        Ok(reply)
    }
}

#[derive(Debug, Default)]
pub struct HttpEntityAdviceFactory;

impl ResponseEntityAdviceFactory for HttpEntityAdviceFactory {
    fn supports(&self, _handler: &HandlerMethod) -> bool {
        true
    }

    fn create_advice(&self, _handler: &HandlerMethod) -> Arc<dyn ResponseEntityAdvice> {
        Arc::new(HttpEntityAdvice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::NOT_ACCEPTABLE;
    use crate::http::RequestContext;
    use crate::media::parse_accept;
    use crate::resolver::{HttpEntity, JsonSerializer, TextSerializer, YamlSerializer};
    use http::Method;
    use serde_json::json;

    fn resolver() -> NegotiatingResponseResolver {
        NegotiatingResponseResolver::new(vec![
            Arc::new(JsonSerializer::new()),
            Arc::new(YamlSerializer::new()),
            Arc::new(TextSerializer::new()),
        ])
    }

    fn write(reply: Reply, accept: &str, produces: &[MediaType]) -> Result<RequestContext, Failure> {
        let handler = HandlerMethod::builder("h").sync(|_, _| Ok(Reply::Empty));
        let mut req = RequestContext::new(Method::GET, "/");
        let accept = parse_accept(Some(accept));
        let mut entity = ResponseEntity {
            handler: &handler,
            request: &mut req,
            accept: &accept,
            produces,
        };
        let reply = HttpEntityAdvice.before_write(reply, &mut entity)?;
        resolver().write(reply, &mut entity)?;
        Ok(req)
    }

    #[test]
    fn test_json_is_default_for_any() {
        let req = write(Reply::Value(json!({"id": "42"})), "*/*", &[]).unwrap();
        assert_eq!(req.response.content_type(), Some("application/json"));
        assert_eq!(req.response.body_json(), Some(json!({"id": "42"})));
    }

    #[test]
    fn test_accept_selects_yaml() {
        let req = write(
            Reply::Value(json!({"name": "rex"})),
            "application/yaml, application/json;q=0.5",
            &[],
        )
        .unwrap();
        assert_eq!(req.response.content_type(), Some("application/yaml"));
        assert_eq!(req.response.body_str().map(str::trim), Some("name: rex"));
    }

    #[test]
    fn test_text_prefers_plain() {
        let req = write(Reply::Text("ok".into()), "*/*", &[]).unwrap();
        assert_eq!(req.response.content_type(), Some("text/plain"));
        assert_eq!(req.response.body, b"ok");
    }

    #[test]
    fn test_produces_constrains_candidates() {
        let err = write(
            Reply::Value(json!({"a": 1})),
            "text/plain",
            &[MediaType::json()],
        )
        .unwrap_err();
        assert!(err.is(&NOT_ACCEPTABLE));

        // Objects cannot be written as text; the next acceptable type is used
        let req = write(Reply::Value(json!({"a": 1})), "text/plain, application/json;q=0.1", &[]).unwrap();
        assert_eq!(req.response.content_type(), Some("application/json"));
    }

    #[test]
    fn test_entity_envelope_is_unwrapped() {
        let reply = Reply::Entity(
            HttpEntity::new(201)
                .header("Location", "/users/42")
                .body(json!({"id": "42"})),
        );
        let req = write(reply, "application/json", &[]).unwrap();
        assert_eq!(req.response.status, 201);
        assert_eq!(req.response.get_header("location"), Some("/users/42"));
        assert_eq!(req.response.body_json(), Some(json!({"id": "42"})));
    }

    #[test]
    fn test_zero_quality_is_not_acceptable() {
        let err = write(Reply::Value(json!({"a": 1})), "application/json;q=0", &[]).unwrap_err();
        assert!(err.is(&NOT_ACCEPTABLE));

        let req = write(Reply::Value(json!({"a": 1})), "application/json;q=0, */*", &[]).unwrap();
        assert_eq!(req.response.content_type(), Some("application/yaml"));
    }

    #[test]
    fn test_write_value_outside_handler() {
        let mut response = HttpResponse::new(404);
        let accept = parse_accept(Some("application/yaml"));
        assert!(resolver().write_value(&json!({"error": "Not Found"}), &accept, &[], &mut response));
        assert_eq!(response.content_type(), Some("application/yaml"));
        assert_eq!(response.status, 404);

        let mut response = HttpResponse::new(404);
        let accept = parse_accept(Some("image/png"));
        assert!(!resolver().write_value(&json!({"error": "Not Found"}), &accept, &[], &mut response));
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_bytes_use_octet_stream() {
        let req = write(Reply::Bytes(vec![1, 2, 3]), "*/*", &[]).unwrap();
        assert_eq!(req.response.content_type(), Some("application/octet-stream"));
        assert_eq!(req.response.body, vec![1, 2, 3]);
    }
}
