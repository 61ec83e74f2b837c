use crate::media::MediaType;
use serde_json::Value;

/// Why a serializer could not read or write a value
#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{media} cannot represent {what}")]
    Unsupported { media: String, what: &'static str },

    #[error("body is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),
}

/// Reads request bodies into, and writes handler results from, one media type family
pub trait Serializer: Send + Sync {
    /// The media type written in `Content-Type`
    fn media_type(&self) -> &MediaType;

    /// Whether this serializer handles the concrete `media` type
    fn supports(&self, media: &MediaType) -> bool {
        self.media_type().includes(media)
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializerError>;
}

/// `application/json` and `application/*+json`
#[derive(Debug)]
pub struct JsonSerializer {
    media: MediaType,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self {
            media: MediaType::json(),
        }
    }
}

impl Default for JsonSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer for JsonSerializer {
    fn media_type(&self) -> &MediaType {
        &self.media
    }

    fn supports(&self, media: &MediaType) -> bool {
        media.main_type() == "application"
            && (media.sub_type() == "json" || media.sub_type().ends_with("+json"))
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializerError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// `application/yaml`, also reading `application/x-yaml` and `text/yaml`
#[derive(Debug)]
pub struct YamlSerializer {
    media: MediaType,
}

impl YamlSerializer {
    pub fn new() -> Self {
        Self {
            media: MediaType::yaml(),
        }
    }
}

impl Default for YamlSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer for YamlSerializer {
    fn media_type(&self) -> &MediaType {
        &self.media
    }

    fn supports(&self, media: &MediaType) -> bool {
        matches!(
            (media.main_type(), media.sub_type()),
            ("application", "yaml") | ("application", "x-yaml") | ("text", "yaml")
        )
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
        Ok(serde_yaml::to_string(value)?.into_bytes())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializerError> {
        Ok(serde_yaml::from_slice(bytes)?)
    }
}

/// `text/plain`: scalars only
#[derive(Debug)]
pub struct TextSerializer {
    media: MediaType,
}

impl TextSerializer {
    pub fn new() -> Self {
        Self {
            media: MediaType::text_plain(),
        }
    }
}

impl Default for TextSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer for TextSerializer {
    fn media_type(&self) -> &MediaType {
        &self.media
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
        match value {
            Value::String(s) => Ok(s.clone().into_bytes()),
            Value::Number(n) => Ok(n.to_string().into_bytes()),
            Value::Bool(b) => Ok(b.to_string().into_bytes()),
            Value::Null => Ok(Vec::new()),
            Value::Array(_) => Err(self.unsupported("arrays")),
            Value::Object(_) => Err(self.unsupported("objects")),
        }
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializerError> {
        Ok(Value::String(std::str::from_utf8(bytes)?.to_string()))
    }
}

impl TextSerializer {
    fn unsupported(&self, what: &'static str) -> SerializerError {
        SerializerError::Unsupported {
            media: self.media.to_string(),
            what,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_supports_suffix_types() {
        let s = JsonSerializer::new();
        assert!(s.supports(&MediaType::parse("application/vnd.api+json").unwrap()));
        assert!(!s.supports(&MediaType::text_plain()));
        assert_eq!(s.serialize(&json!({"id": "42"})).unwrap(), br#"{"id":"42"}"#);
        assert!(s.deserialize(b"{not json").is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let s = YamlSerializer::new();
        let bytes = s.serialize(&json!({"name": "rex"})).unwrap();
        assert_eq!(String::from_utf8(bytes.clone()).unwrap().trim(), "name: rex");
        assert_eq!(s.deserialize(&bytes).unwrap(), json!({"name": "rex"}));
    }

    #[test]
    fn test_text_only_writes_scalars() {
        let s = TextSerializer::new();
        assert_eq!(s.serialize(&json!("ok")).unwrap(), b"ok");
        assert_eq!(s.serialize(&json!(3)).unwrap(), b"3");
        assert!(matches!(
            s.serialize(&json!({"a": 1})),
            Err(SerializerError::Unsupported { .. })
        ));
        assert_eq!(s.deserialize(b"hello").unwrap(), json!("hello"));
    }
}
