use super::{last_value_ignore_case, HeaderVec};
use serde_json::Value;
use std::sync::Arc;

/// Response produced by the dispatch pipeline.
///
/// The body is already serialized; the transport writes status, headers and body as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers with lowercase names
    pub headers: HeaderVec,
    /// Serialized body
    pub body: Vec<u8>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new(200)
    }
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: Vec::new(),
        }
    }

    /// JSON response with `content-type: application/json`
    pub fn json(status: u16, body: &Value) -> Self {
        let mut res = Self::new(status);
        res.body = serde_json::to_vec(body).unwrap_or_default();
        res.set_header("content-type", crate::media::APPLICATION_JSON);
        res
    }

    /// Error response with a JSON body: `{"error": message, "status": status}`
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(
            status,
            &serde_json::json!({ "error": message, "status": status }),
        )
    }

    /// Set a header, replacing any existing value with the same name (case-insensitive)
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(k, _)| k.as_ref() != name);
        self.headers.push((Arc::from(name), value.into()));
    }

    /// Append a header without replacing existing values (e.g. `set-cookie`)
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .push((Arc::from(name.to_ascii_lowercase()), value.into()));
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        last_value_ignore_case(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get_header("content-type")
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Body parsed as JSON, if it is JSON
    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_body_shape() {
        let res = HttpResponse::error(404, "No route");
        assert_eq!(res.status, 404);
        assert_eq!(res.content_type(), Some("application/json"));
        assert_eq!(res.body_json(), Some(json!({"error": "No route", "status": 404})));
    }

    #[test]
    fn test_set_header_replaces() {
        let mut res = HttpResponse::new(204);
        res.set_header("X-Trace", "a");
        res.set_header("x-trace", "b");
        res.add_header("set-cookie", "a=1");
        res.add_header("Set-Cookie", "b=2");
        assert_eq!(res.get_header("X-TRACE"), Some("b"));
        assert_eq!(res.headers.len(), 3);
        assert!(res.is_success());
    }
}
