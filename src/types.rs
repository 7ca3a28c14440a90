//! Core types shared by the indices, the chunk builder and the router.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How long a fetched chunk payload stays fresh.
pub const CACHE_TTL: Duration = Duration::from_secs(120);

/// Default first URL segment that marks a view path (`/view/{component}/...`).
pub const DEFAULT_VIEW_PREFIX: &str = "view";

/// HTTP methods an operation can be declared under, in contract order.
pub const HTTP_METHODS: &[HttpMethod] = &[
    HttpMethod::Get,
    HttpMethod::Put,
    HttpMethod::Post,
    HttpMethod::Delete,
    HttpMethod::Options,
    HttpMethod::Head,
    HttpMethod::Patch,
    HttpMethod::Trace,
];

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// HTTP verb of an operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl HttpMethod {
    /// Lowercase name as used for path-item keys and operation id prefixes.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Put => "put",
            HttpMethod::Post => "post",
            HttpMethod::Delete => "delete",
            HttpMethod::Options => "options",
            HttpMethod::Head => "head",
            HttpMethod::Patch => "patch",
            HttpMethod::Trace => "trace",
        }
    }

    /// Parse a method name, case-insensitive.
    ///
    /// Returns `None` for unknown values (caller should error).
    pub fn parse(s: &str) -> Option<Self> {
        HTTP_METHODS
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the data an operation returns (or accepts), as seen by views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    Array,
    /// A primitive body (string, number, boolean).
    Value,
    /// No body at all, or a body the index could not classify.
    #[default]
    None,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::Value => "value",
            SchemaType::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "object" => Some(SchemaType::Object),
            "array" => Some(SchemaType::Array),
            "value" => Some(SchemaType::Value),
            "none" => Some(SchemaType::None),
            _ => None,
        }
    }

    /// Classify a JSON Schema body.
    ///
    /// `$ref` and composition keywords count as objects, `items` as arrays.
    pub fn of_schema(schema: &Value) -> Self {
        let Some(map) = schema.as_object() else {
            return SchemaType::None;
        };
        match map.get("type").and_then(Value::as_str) {
            Some("array") => return SchemaType::Array,
            Some("object") => return SchemaType::Object,
            Some(_) => return SchemaType::Value,
            None => {}
        }
        if map.contains_key("items") {
            SchemaType::Array
        } else if map.contains_key("$ref")
            || map.contains_key("properties")
            || map.contains_key("allOf")
            || map.contains_key("oneOf")
            || map.contains_key("anyOf")
        {
            SchemaType::Object
        } else {
            SchemaType::None
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query-string parameters forwarded to the transport.
pub type Query = BTreeMap<String, String>;

/// JSON pointer to a location in a document (`/paths/~1providers/get`).
pub fn json_pointer(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| format!("/{}", p.replace('~', "~0").replace('/', "~1")))
        .collect()
}

/// Returns true if a route segment is a `{param}` placeholder.
pub fn is_placeholder(segment: &str) -> bool {
    segment.len() > 2 && segment.starts_with('{') && segment.ends_with('}')
}

/// Name inside a `{param}` placeholder, or `None` for literal segments.
pub fn placeholder_name(segment: &str) -> Option<&str> {
    if is_placeholder(segment) {
        Some(&segment[1..segment.len() - 1])
    } else {
        None
    }
}

/// Names of every placeholder still present in a route.
pub fn unresolved_placeholders(route: &[String]) -> Vec<String> {
    route
        .iter()
        .filter_map(|s| placeholder_name(s).map(String::from))
        .collect()
}

/// Split a template path (`/providers/{id}`) or a URL path into segments.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Convert a schema name (`ProviderContract`) to its snake-case prefix
/// (`provider_contract`).
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch == '-' || ch == ' ' || ch == '.' {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        } else if ch.is_uppercase() {
            if prev_lower && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// Options for the router.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// First segment of view URLs (`/{view_prefix}/{component}/...`).
    pub view_prefix: String,
    /// Freshness window for cached chunk payloads.
    pub cache_ttl: Duration,
}

impl RouterOptions {
    /// Options with the default `view` prefix and the 120 second TTL.
    pub fn new() -> Self {
        Self {
            view_prefix: DEFAULT_VIEW_PREFIX.to_string(),
            cache_ttl: CACHE_TTL,
        }
    }

    /// Set the view prefix. Leading and trailing slashes are dropped.
    pub fn view_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.view_prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn http_method_parse() {
        assert_eq!(HttpMethod::parse("GET"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::parse("patch"), Some(HttpMethod::Patch));
        assert_eq!(HttpMethod::parse("fetch"), None);
    }

    #[test]
    fn schema_type_of_schema() {
        assert_eq!(
            SchemaType::of_schema(&json!({"type": "array", "items": {}})),
            SchemaType::Array
        );
        assert_eq!(
            SchemaType::of_schema(&json!({"$ref": "#/components/schemas/Provider"})),
            SchemaType::Object
        );
        assert_eq!(
            SchemaType::of_schema(&json!({"type": "string"})),
            SchemaType::Value
        );
        assert_eq!(SchemaType::of_schema(&json!({})), SchemaType::None);
    }

    #[test]
    fn placeholders() {
        assert_eq!(placeholder_name("{id}"), Some("id"));
        assert_eq!(placeholder_name("providers"), None);
        assert_eq!(placeholder_name("{}"), None);

        let route = split_path("/providers/{provider_id}/contracts/7");
        assert_eq!(unresolved_placeholders(&route), vec!["provider_id"]);
    }

    #[test]
    fn snake_case_schema_names() {
        assert_eq!(snake_case("Provider"), "provider");
        assert_eq!(snake_case("ProviderContract"), "provider_contract");
        assert_eq!(snake_case("api-key"), "api_key");
    }

    #[test]
    fn router_options_trims_prefix() {
        let opts = RouterOptions::new().view_prefix("/screens/");
        assert_eq!(opts.view_prefix, "screens");
        assert_eq!(opts.cache_ttl, CACHE_TTL);
    }
}
