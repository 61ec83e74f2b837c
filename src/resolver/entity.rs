use super::converter::ConverterLookup;
use super::core::{RequestEntity, RequestEntityResolver, RequestEntityResolverFactory};
use super::named::NameAndValue;
use super::param::{Param, ParamSource, ParamType};
use super::serializer::Serializer;
use crate::error::BuildError;
use crate::exception::Failure;
use crate::media::MediaType;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Supports every `ParamSource::Body` parameter
#[derive(Debug, Default)]
pub struct BodyResolverFactory;

impl RequestEntityResolverFactory for BodyResolverFactory {
    fn supports(&self, param: &Param) -> bool {
        param.source() == ParamSource::Body
    }

    fn create_resolver(
        &self,
        param: &Param,
        converters: &Arc<ConverterLookup>,
        serializers: &[Arc<dyn Serializer>],
    ) -> Result<Arc<dyn RequestEntityResolver>, BuildError> {
        Ok(Arc::new(NegotiatingBodyResolver {
            nv: NameAndValue::from_param(param),
            ty: param.param_type().clone(),
            converters: Arc::clone(converters),
            serializers: serializers.to_vec(),
        }))
    }

    fn order(&self) -> i32 {
        100
    }
}

/// Reads the request body by content type.
///
/// - absent or `text/plain` content type: the converter for the parameter's type
/// - otherwise: every serializer supporting the content type is tried in order and the first
///   successful `deserialize` wins; none means `UnsupportedMediaType`
pub struct NegotiatingBodyResolver {
    nv: NameAndValue,
    ty: ParamType,
    converters: Arc<ConverterLookup>,
    serializers: Vec<Arc<dyn Serializer>>,
}

impl NegotiatingBodyResolver {
    fn convert_text(&self, bytes: &[u8]) -> Result<Value, Failure> {
        let text = std::str::from_utf8(bytes).map_err(|e| Failure::conversion(&self.nv.name, e))?;
        match self.ty.value_type() {
            // A JSON-typed body without a content type is still read as JSON when it parses
            ParamType::Json => Ok(serde_json::from_str(text)
                .unwrap_or_else(|_| Value::String(text.to_string()))),
            ty => self
                .converters
                .convert(ty, text)
                .map_err(|e| Failure::conversion(&self.nv.name, e)),
        }
    }

    fn deserialize(&self, content_type: &MediaType, bytes: &[u8]) -> Result<Value, Failure> {
        let mut tried = 0usize;
        for serializer in self.serializers.iter().filter(|s| s.supports(content_type)) {
            tried += 1;
            match serializer.deserialize(bytes) {
                Ok(value) => return Ok(value),
                Err(e) => debug!(
                    param = %self.nv.name,
                    serializer = %serializer.media_type(),
                    error = %e,
                    "Serializer could not read body"
                ),
            }
        }
        Err(Failure::unsupported_media_type(format!(
            "Cannot read '{}' as {} ({} serializer(s) tried)",
            self.nv.name, content_type, tried
        )))
    }
}

impl RequestEntityResolver for NegotiatingBodyResolver {
    fn resolve(&self, entity: RequestEntity<'_>) -> Result<Value, Failure> {
        let request = &*entity.request;
        let bytes = match request.body.as_deref() {
            Some(b) if !b.is_empty() => b,
            _ => return self.nv.or_absent(None),
        };

        if matches!(self.ty.value_type(), ParamType::Bytes) {
            return Ok(Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()));
        }

        let content_type = match request.content_type() {
            None => return self.convert_text(bytes),
            Some(raw) => MediaType::parse(raw).map_err(|e| {
                Failure::unsupported_media_type(format!("Invalid Content-Type: {}", e))
            })?,
        };
        if content_type.essence() == crate::media::TEXT_PLAIN {
            return self.convert_text(bytes);
        }
        self.deserialize(&content_type, bytes)
    }
}
