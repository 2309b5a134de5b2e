// HTTP request and response types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A query parameter value: scalar or list.
///
/// A key repeated in the query string becomes `Many`, as does any key written
/// with a `[]` suffix, even when it appears only once. A bare `k=` yields an
/// empty-string `Single`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Single(String),
    Many(Vec<String>),
}

impl QueryValue {
    /// Scalar view; the first element for `Many`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            QueryValue::Single(s) => Some(s),
            QueryValue::Many(v) => v.first().map(|s| s.as_str()),
        }
    }

    /// List view; a one-element slice for `Single`.
    pub fn as_slice(&self) -> Vec<&str> {
        match self {
            QueryValue::Single(s) => vec![s.as_str()],
            QueryValue::Many(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }

    /// Convert into a JSON value for handler argument binding.
    pub fn to_json(&self) -> Value {
        match self {
            QueryValue::Single(s) => Value::String(s.clone()),
            QueryValue::Many(v) => Value::Array(v.iter().cloned().map(Value::String).collect()),
        }
    }
}

/// Parse a query string into a name -> value(s) map.
///
/// Percent-decoding is applied to both names and values. Keys suffixed with
/// `[]` are stored under the bare name and always produce `Many`.
pub fn parse_query_string(query: &str) -> HashMap<String, QueryValue> {
    let mut params: HashMap<String, QueryValue> = HashMap::new();

    for part in query.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = match part.split_once('=') {
            Some((k, v)) => (k, v),
            None => (part, ""),
        };

        let key = urlencoding::decode(raw_key)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw_key.to_string());
        let value = urlencoding::decode(raw_value)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw_value.to_string());

        let (key, force_array) = match key.strip_suffix("[]") {
            Some(bare) => (bare.to_string(), true),
            None => (key, false),
        };

        match params.entry(key) {
            std::collections::hash_map::Entry::Vacant(e) => {
                if force_array {
                    e.insert(QueryValue::Many(vec![value]));
                } else {
                    e.insert(QueryValue::Single(value));
                }
            }
            std::collections::hash_map::Entry::Occupied(mut e) => match e.get_mut() {
                QueryValue::Single(existing) => {
                    let first = std::mem::take(existing);
                    *e.get_mut() = QueryValue::Many(vec![first, value]);
                }
                QueryValue::Many(list) => list.push(value),
            },
        }
    }

    params
}

/// HTTP request wrapper
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub path_params: HashMap<String, String>,
    pub query_params: HashMap<String, QueryValue>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
            body: Vec::new(),
            path_params: HashMap::new(),
            query_params: HashMap::new(),
        }
    }

    /// Parse the request body as JSON
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, crate::Error> {
        serde_json::from_slice(&self.body).map_err(|e| crate::Error::Deserialization(e.to_string()))
    }

    /// Get a path parameter by name
    pub fn param(&self, name: &str) -> Option<&String> {
        self.path_params.get(name)
    }

    /// Get a query parameter by name
    pub fn query(&self, name: &str) -> Option<&QueryValue> {
        self.query_params.get(name)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        let lowered = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&lowered))
            .map(|(_, v)| v.as_str())
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }
}

/// HTTP response wrapper
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn created() -> Self {
        Self::new(201)
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn internal_server_error() -> Self {
        Self::new(500)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body = text.into().into_bytes();
        self.headers
            .insert("Content-Type".to_string(), "text/plain".to_string());
        self
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, crate::Error> {
        self.body =
            serde_json::to_vec(value).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// The body as UTF-8 text, lossy.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON.
    pub fn body_json(&self) -> Result<Value, crate::Error> {
        serde_json::from_slice(&self.body).map_err(|e| crate::Error::Deserialization(e.to_string()))
    }

    /// Whether the response declares a JSON content type.
    pub fn is_json(&self) -> bool {
        self.headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("content-type") && v.contains("application/json"))
    }
}

// ========== Response envelope ==========

/// Wrap a handler result in the standard success envelope.
pub fn success_envelope(result: Value) -> Value {
    serde_json::json!({ "success": true, "result": result })
}

/// Build the standard error envelope.
pub fn error_envelope(code: u16, message: &str) -> Value {
    serde_json::json!({ "success": false, "code": code, "message": message })
}

/// A value is "already enveloped" when it is an object carrying a boolean
/// `success` field; such values pass through unwrapped.
pub fn is_enveloped(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|obj| obj.get("success"))
        .map(|v| v.is_boolean())
        .unwrap_or(false)
}
