//! Call signatures used as cache and deduplication keys

use http::HeaderMap;
use serde_json::Value as JsonValue;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::types::{HttpMethod, HttpRequest};

/// Deterministic key for "the same logical call": `METHOD:url:body`.
///
/// The body is rendered as JSON with object keys sorted, so two bodies that
/// differ only in key order produce the same signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSignature(String);

impl CallSignature {
    pub fn new(method: HttpMethod, url: &str, body: Option<&JsonValue>) -> Self {
        let mut signature = format!("{}:{}:", method.as_str(), url);
        if let Some(body) = body {
            write_canonical(body, &mut signature);
        }
        Self(signature)
    }

    pub fn from_request(request: &HttpRequest) -> Self {
        Self::new(request.method, &request.url, request.body.as_ref())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deduplication key for this call sent with `credentials`.
    ///
    /// Calls carrying different credentials never share an outcome. The
    /// credentials are hashed so tokens do not end up in keys or logs.
    pub fn dedup_key(&self, credentials: &HeaderMap) -> String {
        if credentials.is_empty() {
            return self.0.clone();
        }

        let mut entries: Vec<(&str, &[u8])> = credentials
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_bytes()))
            .collect();
        entries.sort();

        let mut hasher = DefaultHasher::new();
        entries.hash(&mut hasher);
        format!("{}#{:016x}", self.0, hasher.finish())
    }

    /// Whether a signature string belongs to a read of `url`, ignoring query strings
    pub fn is_read_of(signature: &str, url: &str) -> bool {
        let target = strip_query(url);
        [HttpMethod::Get, HttpMethod::Head, HttpMethod::Options]
            .iter()
            .any(|method| {
                signature
                    .strip_prefix(method.as_str())
                    .and_then(|rest| rest.strip_prefix(':'))
                    .and_then(|rest| rest.strip_prefix(target))
                    .map(|tail| tail.starts_with([':', '?', '#']))
                    .unwrap_or(false)
            })
    }
}

impl fmt::Display for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CallSignature> for String {
    fn from(signature: CallSignature) -> Self {
        signature.0
    }
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
