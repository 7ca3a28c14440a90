//! Schema index - schema bodies, their properties, and which operations use them.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::IndexError;
use crate::loader::navigate_fragment;
use crate::types::{json_pointer, HttpMethod, SchemaType, HTTP_METHODS};

const SCHEMA_REF_PREFIX: &str = "#/components/schemas/";

/// Candidate patterns for the property that names a record, in priority order.
const SUBJECT_PATTERNS: &[&str] = &[r"(?i)name$", r"(?i)title$", r"(?i)^label$", r"(?i)^email$", r"(?i)^id$"];

/// Candidate patterns for the secondary display property, in priority order.
const INFO_PATTERNS: &[&str] = &[r"(?i)description$", r"(?i)summary$", r"(?i)status$", r"(?i)type$"];

fn subject_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| compile(SUBJECT_PATTERNS))
}

fn info_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| compile(INFO_PATTERNS))
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

/// Name of the schema a `$ref` points at.
///
/// `#/components/schemas/Provider` -> `Provider`. Other pointers yield
/// their last segment.
pub fn schema_ref_name(reference: &str) -> &str {
    reference
        .strip_prefix(SCHEMA_REF_PREFIX)
        .unwrap_or_else(|| reference.rsplit('/').next().unwrap_or(reference))
}

/// One property of a schema, as a view sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyRef {
    pub name: String,
    /// Display type: `text`, `number`, `boolean`, `date`, `enum`, `object`, `array`.
    pub display_type: String,
    /// Whether the property is an object or a list of records.
    pub schema_type: SchemaType,
    /// Schema the property references, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Property breakdown of one named schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaRef {
    pub name: String,
    /// Referenced child schemas, in property order, without duplicates.
    pub children: Vec<String>,
    pub properties: Vec<PropertyRef>,
    /// Property that best names a record of this schema.
    pub subject: Option<String>,
    /// Property that best describes a record of this schema.
    pub info: Option<String>,
}

impl SchemaRef {
    pub fn property(&self, name: &str) -> Option<&PropertyRef> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// One place an operation consumes or produces a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaUsage {
    pub operation_id: String,
    pub schema_type: SchemaType,
    pub method: HttpMethod,
    /// Response status code; `None` when the schema is the request body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl SchemaUsage {
    /// A usage key is either a status code (responses) or a method name
    /// (request bodies).
    pub fn matches_key(&self, key: &str) -> bool {
        match &self.status {
            Some(code) => code == key,
            None => self.method.as_str().eq_ignore_ascii_case(key),
        }
    }
}

/// Schemas of a contract and every operation that uses each of them.
#[derive(Debug, Clone, Default)]
pub struct SchemaIndex {
    schemas: Map<String, Value>,
    refs: HashMap<String, SchemaRef>,
    usages: HashMap<String, Vec<SchemaUsage>>,
}

impl SchemaIndex {
    /// Index `components.schemas` and scan every operation body.
    ///
    /// Problems are pushed to `issues`; the index keeps whatever it could read.
    pub fn build(contract: &Value, issues: &mut Vec<IndexError>) -> Self {
        let mut index = SchemaIndex::default();

        match contract
            .get("components")
            .and_then(|c| c.get("schemas"))
            .and_then(Value::as_object)
        {
            Some(schemas) => index.schemas = schemas.clone(),
            None => issues.push(IndexError::MissingSchemas),
        }

        for (name, schema) in &index.schemas {
            let schema_ref = describe_schema(name, resolve_local(contract, schema));
            index.refs.insert(name.clone(), schema_ref);
        }

        if let Some(paths) = contract.get("paths").and_then(Value::as_object) {
            for (path, item) in paths {
                for method in HTTP_METHODS {
                    let Some(operation) = item.get(method.as_str()) else {
                        continue;
                    };
                    let Some(id) = operation.get("operationId").and_then(Value::as_str) else {
                        continue;
                    };
                    index.scan_operation(contract, path, *method, id, operation, issues);
                }
            }
        }

        log::debug!(
            "indexed {} schemas, {} with operation usages",
            index.schemas.len(),
            index.usages.len()
        );
        index
    }

    fn scan_operation(
        &mut self,
        contract: &Value,
        path: &str,
        method: HttpMethod,
        id: &str,
        operation: &Value,
        issues: &mut Vec<IndexError>,
    ) {
        if let Some(body) = operation.get("requestBody") {
            let body = resolve_local(contract, body);
            for schema in content_schemas(body) {
                let location = json_pointer(&["paths", path, method.as_str(), "requestBody"]);
                self.register(contract, schema, SchemaType::Object, id, method, None, &location, issues);
            }
        }

        if let Some(responses) = operation.get("responses").and_then(Value::as_object) {
            for (code, response) in responses {
                let response = resolve_local(contract, response);
                for schema in content_schemas(response) {
                    let location = json_pointer(&["paths", path, method.as_str(), "responses", code.as_str()]);
                    self.register(
                        contract,
                        schema,
                        SchemaType::Object,
                        id,
                        method,
                        Some(code.as_str()),
                        &location,
                        issues,
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn register(
        &mut self,
        contract: &Value,
        schema: &Value,
        schema_type: SchemaType,
        id: &str,
        method: HttpMethod,
        status: Option<&str>,
        location: &str,
        issues: &mut Vec<IndexError>,
    ) {
        let Some(map) = schema.as_object() else {
            return;
        };

        if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
            let name = schema_ref_name(reference);
            if !self.schemas.contains_key(name) {
                issues.push(IndexError::UnknownSchemaRef {
                    reference: reference.to_string(),
                    location: location.to_string(),
                });
                return;
            }
            let usage = SchemaUsage {
                operation_id: id.to_string(),
                schema_type,
                method,
                status: status.map(String::from),
            };
            let usages = self.usages.entry(name.to_string()).or_default();
            if !usages.contains(&usage) {
                usages.push(usage);
            }
            return;
        }

        if let Some(items) = map.get("items") {
            self.register(contract, items, SchemaType::Array, id, method, status, location, issues);
        }

        for key in ["oneOf", "anyOf", "allOf"] {
            if let Some(Value::Array(branches)) = map.get(key) {
                for branch in branches {
                    self.register(contract, branch, schema_type, id, method, status, location, issues);
                }
            }
        }
    }

    /// Schema body by name.
    pub fn schema(&self, name: &str) -> Option<&Value> {
        self.schemas.get(name)
    }

    /// Property breakdown by schema name.
    pub fn schema_ref(&self, name: &str) -> Option<&SchemaRef> {
        self.refs.get(name)
    }

    /// Every recorded usage of a schema, in contract declaration order.
    pub fn usages(&self, name: &str) -> &[SchemaUsage] {
        self.usages.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Schema names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// First operation that uses `schema` as `schema_type` under `key`
    /// (a status code for responses, a method for request bodies).
    ///
    /// Usage order is contract declaration order, so the first match wins.
    pub fn get_operation_id_for_schema(
        &self,
        schema: &str,
        schema_type: SchemaType,
        key: &str,
    ) -> Option<&str> {
        self.usages(schema)
            .iter()
            .find(|u| u.schema_type == schema_type && u.matches_key(key))
            .map(|u| u.operation_id.as_str())
    }
}

/// Follow a local `$ref` (e.g. to `#/components/responses/...`) one level.
pub(crate) fn resolve_local<'a>(contract: &'a Value, value: &'a Value) -> &'a Value {
    match value.get("$ref").and_then(Value::as_str) {
        Some(reference) if reference.starts_with('#') && !reference.starts_with(SCHEMA_REF_PREFIX) => {
            navigate_fragment(contract, reference).unwrap_or(value)
        }
        _ => value,
    }
}

/// Every media-type schema under a request body or response `content`.
pub(crate) fn content_schemas(body: &Value) -> impl Iterator<Item = &Value> {
    body.get("content")
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|content| content.values())
        .filter_map(|media| media.get("schema"))
}

/// Schema a body references directly or through its `items`.
pub(crate) fn referenced_schema(schema: &Value) -> Option<&str> {
    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        return Some(schema_ref_name(reference));
    }
    if let Some(items) = schema.get("items") {
        return referenced_schema(items);
    }
    for key in ["allOf", "oneOf", "anyOf"] {
        if let Some(Value::Array(branches)) = schema.get(key) {
            if let Some(name) = branches.iter().find_map(referenced_schema) {
                return Some(name);
            }
        }
    }
    None
}

fn describe_schema(name: &str, schema: &Value) -> SchemaRef {
    let mut schema_ref = SchemaRef {
        name: name.to_string(),
        ..SchemaRef::default()
    };

    let mut properties = Map::new();
    collect_properties(schema, &mut properties);

    for (prop_name, prop) in &properties {
        let property = describe_property(prop_name, prop);
        if let Some(reference) = &property.reference {
            if !schema_ref.children.contains(reference) {
                schema_ref.children.push(reference.clone());
            }
        }
        schema_ref.properties.push(property);
    }

    schema_ref.subject = pick_property(&schema_ref.properties, subject_patterns());
    schema_ref.info = pick_property(&schema_ref.properties, info_patterns())
        .filter(|info| schema_ref.subject.as_ref() != Some(info));
    schema_ref
}

/// Merge `properties` of the schema and of its `allOf` branches.
fn collect_properties(schema: &Value, out: &mut Map<String, Value>) {
    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (k, v) in props {
            out.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    if let Some(Value::Array(branches)) = schema.get("allOf") {
        for branch in branches {
            collect_properties(branch, out);
        }
    }
}

fn describe_property(name: &str, prop: &Value) -> PropertyRef {
    let schema_type = SchemaType::of_schema(prop);
    let reference = match schema_type {
        SchemaType::Object | SchemaType::Array => referenced_schema(prop).map(String::from),
        _ => None,
    };

    let display_type = match schema_type {
        SchemaType::Object => "object",
        SchemaType::Array => "array",
        _ => match (
            prop.get("type").and_then(Value::as_str),
            prop.get("format").and_then(Value::as_str),
        ) {
            (_, Some("date" | "date-time")) => "date",
            _ if prop.get("enum").is_some() => "enum",
            (Some("integer" | "number"), _) => "number",
            (Some("boolean"), _) => "boolean",
            _ => "text",
        },
    };

    PropertyRef {
        name: name.to_string(),
        display_type: display_type.to_string(),
        schema_type,
        reference,
    }
}

/// First property matching the earliest pattern; pattern order is the tie-break.
fn pick_property(properties: &[PropertyRef], patterns: &[Regex]) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        properties
            .iter()
            .filter(|p| p.reference.is_none())
            .find(|p| pattern.is_match(&p.name))
            .map(|p| p.name.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contract() -> Value {
        json!({
            "paths": {
                "/providers": {
                    "get": {
                        "operationId": "get_providers",
                        "responses": {"200": {"content": {"application/json": {"schema": {
                            "type": "array", "items": {"$ref": "#/components/schemas/Provider"}
                        }}}}}
                    },
                    "post": {
                        "operationId": "post_providers",
                        "requestBody": {"content": {"application/json": {"schema": {
                            "$ref": "#/components/schemas/Provider"
                        }}}},
                        "responses": {"201": {"$ref": "#/components/responses/ProviderCreated"}}
                    }
                },
                "/providers/{id}": {
                    "get": {
                        "operationId": "get_provider",
                        "responses": {"200": {"content": {"application/json": {"schema": {
                            "oneOf": [{"$ref": "#/components/schemas/Provider"}]
                        }}}}}
                    }
                }
            },
            "components": {
                "responses": {
                    "ProviderCreated": {"content": {"application/json": {"schema": {
                        "$ref": "#/components/schemas/Provider"
                    }}}}
                },
                "schemas": {
                    "Provider": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "integer"},
                            "display_name": {"type": "string"},
                            "status": {"type": "string", "enum": ["active", "retired"]},
                            "created": {"type": "string", "format": "date-time"},
                            "contracts": {"type": "array", "items": {"$ref": "#/components/schemas/Contract"}},
                            "address": {"$ref": "#/components/schemas/Address"}
                        }
                    },
                    "Contract": {"type": "object", "properties": {"title": {"type": "string"}}},
                    "Address": {"type": "object", "properties": {"street": {"type": "string"}}}
                }
            }
        })
    }

    #[test]
    fn usages_follow_declaration_order() {
        let mut issues = Vec::new();
        let index = SchemaIndex::build(&contract(), &mut issues);
        assert!(issues.is_empty(), "{:?}", issues);

        let usages = index.usages("Provider");
        let ids: Vec<_> = usages.iter().map(|u| u.operation_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["get_providers", "post_providers", "post_providers", "get_provider"]
        );
        assert_eq!(usages[0].schema_type, SchemaType::Array);
        assert_eq!(usages[1].status, None);
        assert_eq!(usages[2].status.as_deref(), Some("201"));
    }

    #[test]
    fn get_operation_id_for_schema_first_match_wins() {
        let mut issues = Vec::new();
        let index = SchemaIndex::build(&contract(), &mut issues);

        assert_eq!(
            index.get_operation_id_for_schema("Provider", SchemaType::Array, "200"),
            Some("get_providers")
        );
        assert_eq!(
            index.get_operation_id_for_schema("Provider", SchemaType::Object, "200"),
            Some("get_provider")
        );
        assert_eq!(
            index.get_operation_id_for_schema("Provider", SchemaType::Object, "post"),
            Some("post_providers")
        );
        assert_eq!(
            index.get_operation_id_for_schema("Contract", SchemaType::Array, "200"),
            None
        );
    }

    #[test]
    fn schema_ref_properties_and_display_hints() {
        let mut issues = Vec::new();
        let index = SchemaIndex::build(&contract(), &mut issues);
        let provider = index.schema_ref("Provider").unwrap();

        assert_eq!(provider.children, vec!["Contract", "Address"]);
        assert_eq!(provider.subject.as_deref(), Some("display_name"));
        assert_eq!(provider.info.as_deref(), Some("status"));

        let contracts = provider.property("contracts").unwrap();
        assert_eq!(contracts.schema_type, SchemaType::Array);
        assert_eq!(contracts.reference.as_deref(), Some("Contract"));
        assert_eq!(provider.property("created").unwrap().display_type, "date");
        assert_eq!(provider.property("status").unwrap().display_type, "enum");
        assert_eq!(provider.property("id").unwrap().display_type, "number");
    }

    #[test]
    fn missing_schemas_and_unknown_refs_are_reported() {
        let contract = json!({
            "paths": {
                "/things": {"get": {
                    "operationId": "get_things",
                    "responses": {"200": {"content": {"application/json": {"schema": {
                        "$ref": "#/components/schemas/Thing"
                    }}}}}
                }}
            }
        });
        let mut issues = Vec::new();
        let index = SchemaIndex::build(&contract, &mut issues);

        assert!(index.is_empty());
        assert_eq!(issues[0], IndexError::MissingSchemas);
        assert!(matches!(
            &issues[1],
            IndexError::UnknownSchemaRef { reference, .. } if reference == "#/components/schemas/Thing"
        ));
    }

    #[test]
    fn schema_ref_name_strips_prefix() {
        assert_eq!(schema_ref_name("#/components/schemas/Provider"), "Provider");
        assert_eq!(schema_ref_name("#/definitions/Legacy"), "Legacy");
    }
}
