//! Structured view of a request's caller-controlled data.
//!
//! Query string, path parameters and body are parsed once into
//! `serde_json::Value` trees so the sanitizer and the access controller
//! work on the same representation.

use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::routing::matcher::PathParams;

/// How the body was encoded, so it can be written back the same way.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadBody {
    None,
    Json(Value),
    Form(Map<String, Value>),
    /// Content type the gateway does not inspect.
    Opaque,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestPayload {
    pub params: PathParams,
    pub query: Map<String, Value>,
    pub body: PayloadBody,
}

#[derive(Debug, thiserror::Error)]
#[error("malformed JSON body: {0}")]
pub struct PayloadError(#[from] serde_json::Error);

impl RequestPayload {
    pub fn empty() -> Self {
        Self {
            params: PathParams::new(),
            query: Map::new(),
            body: PayloadBody::None,
        }
    }

    /// Parse query string and body. An empty body is `PayloadBody::None`.
    pub fn parse(
        params: PathParams,
        query: Option<&str>,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<Self, PayloadError> {
        let query = query.map(parse_form).unwrap_or_default();

        let body = if body.is_empty() {
            PayloadBody::None
        } else {
            let mime = content_type
                .and_then(|ct| ct.split(';').next())
                .map(|ct| ct.trim().to_ascii_lowercase())
                .unwrap_or_default();
            if mime == "application/json" || mime.ends_with("+json") {
                PayloadBody::Json(serde_json::from_slice(body)?)
            } else if mime == "application/x-www-form-urlencoded" {
                PayloadBody::Form(parse_form(&String::from_utf8_lossy(body)))
            } else {
                PayloadBody::Opaque
            }
        };

        Ok(Self {
            params,
            query,
            body,
        })
    }

    /// Re-encode the query string; `None` when there is nothing to encode.
    pub fn encode_query(&self) -> Option<String> {
        if self.query.is_empty() {
            None
        } else {
            Some(encode_form(&self.query))
        }
    }

    /// Re-encode the body; `None` means the original bytes stay as they are.
    pub fn encode_body(&self) -> Option<Vec<u8>> {
        match &self.body {
            PayloadBody::Json(value) => serde_json::to_vec(value).ok(),
            PayloadBody::Form(map) => Some(encode_form(map).into_bytes()),
            PayloadBody::None | PayloadBody::Opaque => None,
        }
    }

    /// Look up a top-level string (or number) field in the body.
    pub fn body_field(&self, name: &str) -> Option<String> {
        let value = match &self.body {
            PayloadBody::Json(Value::Object(map)) => map.get(name),
            PayloadBody::Form(map) => map.get(name),
            _ => None,
        }?;
        scalar_to_string(value)
    }

    pub fn query_field(&self, name: &str) -> Option<String> {
        self.query.get(name).and_then(scalar_to_string)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Repeated keys collect into an array.
fn parse_form(input: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in form_urlencoded::parse(input.as_bytes()) {
        let value = Value::String(value.into_owned());
        match map.get_mut(key.as_ref()) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    map
}

fn encode_form(map: &Map<String, Value>) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in map {
        match value {
            Value::Array(items) => {
                for item in items {
                    serializer.append_pair(key, &form_value(item));
                }
            }
            other => {
                serializer.append_pair(key, &form_value(other));
            }
        }
    }
    serializer.finish()
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
