//! Operation index - path templates, their operations, and the relations
//! between operations on neighbouring resources.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::error::IndexError;
use crate::schema_index::{content_schemas, referenced_schema, resolve_local};
use crate::types::{is_placeholder, placeholder_name, split_path, HttpMethod, SchemaType, HTTP_METHODS};

/// Compiled schema of a path parameter, used to check URL segments.
#[derive(Clone)]
pub struct SegmentCheck(Arc<jsonschema::Validator>);

impl SegmentCheck {
    fn compile(schema: &Value) -> Option<Self> {
        match jsonschema::validator_for(schema) {
            Ok(validator) => Some(SegmentCheck(Arc::new(validator))),
            Err(e) => {
                log::warn!("ignoring uncompilable parameter schema {}: {}", schema, e);
                None
            }
        }
    }

    /// A segment is compatible if it validates as a string, a number or a boolean.
    pub fn accepts(&self, segment: &str) -> bool {
        segment_candidates(segment)
            .iter()
            .any(|candidate| self.0.is_valid(candidate))
    }
}

impl fmt::Debug for SegmentCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SegmentCheck")
    }
}

fn segment_candidates(segment: &str) -> Vec<Value> {
    let mut candidates = vec![Value::String(segment.to_string())];
    if let Ok(int) = segment.parse::<i64>() {
        candidates.push(Value::Number(int.into()));
    } else if let Some(float) = segment.parse::<f64>().ok().and_then(Number::from_f64) {
        candidates.push(Value::Number(float));
    }
    match segment {
        "true" => candidates.push(Value::Bool(true)),
        "false" => candidates.push(Value::Bool(false)),
        _ => {}
    }
    candidates
}

/// A declared operation parameter.
#[derive(Debug, Clone, Serialize)]
pub struct Parameter {
    pub name: String,
    /// `path`, `query`, `header` or `cookie`.
    pub location: String,
    pub required: bool,
    pub schema: Value,
    #[serde(skip)]
    pub check: Option<SegmentCheck>,
}

impl Parameter {
    pub fn is_path(&self) -> bool {
        self.location == "path"
    }
}

/// A contract endpoint.
///
/// Built once while indexing and never mutated afterwards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Operation {
    pub id: String,
    pub http_method: HttpMethod,
    /// Template path as declared (`/providers/{id}`).
    pub path: String,
    /// Template segments (`["providers", "{id}"]`).
    pub route: Vec<String>,
    pub parameters: Vec<Parameter>,
    /// Schema of the response body, falling back to the request body.
    pub schema_name: Option<String>,
    /// Schema of the request body.
    pub request_schema_name: Option<String>,
    pub view_data_type: SchemaType,
    pub security_scheme: Option<String>,
    /// GET operation on the closest enclosing resource.
    pub parent_operation_id: Option<String>,
    /// Operations on the same path under other methods.
    pub sibling_ids: Vec<String>,
    /// GET operations one segment below this path.
    pub child_ids: Vec<String>,
}

impl Operation {
    /// True for the placeholder returned when nothing matches.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    pub fn path_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.is_path())
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// One path template and the operations declared under it.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    /// Joined segments (`providers/{id}`).
    pub key: String,
    pub route: Vec<String>,
    /// Method -> operation id, in declaration order.
    pub methods: Vec<(HttpMethod, String)>,
    checks: Vec<Option<SegmentCheck>>,
}

impl PathTemplate {
    pub fn operation_id(&self, method: HttpMethod) -> Option<&str> {
        self.methods
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, id)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.route.len()
    }

    pub fn is_empty(&self) -> bool {
        self.route.is_empty()
    }

    /// Number of literal (non-placeholder) segments.
    pub fn literal_count(&self) -> usize {
        self.route.iter().filter(|s| !is_placeholder(s)).count()
    }

    /// Whether `segment` can stand at position `pos` of this template.
    ///
    /// Literals must be equal; placeholders accept any segment that
    /// validates against the parameter's declared schema.
    pub fn accepts(&self, pos: usize, segment: &str) -> bool {
        let Some(template) = self.route.get(pos) else {
            return false;
        };
        if !is_placeholder(template) {
            return template == segment;
        }
        match self.checks.get(pos).and_then(Option::as_ref) {
            Some(check) => check.accepts(segment),
            None => true,
        }
    }
}

/// A template reachable from a part keyword, with the keyword's position.
#[derive(Debug, Clone, Copy)]
pub struct KeywordEntry {
    pub template: usize,
    pub offset: usize,
}

/// Path table and operation records of a contract.
#[derive(Debug, Clone, Default)]
pub struct OperationIndex {
    templates: Vec<PathTemplate>,
    by_keyword: HashMap<String, Vec<KeywordEntry>>,
    by_key: HashMap<String, usize>,
    top_level: HashSet<String>,
    operations: HashMap<String, Operation>,
    order: Vec<String>,
    empty: Operation,
}

impl OperationIndex {
    /// Index every path and method that carries an operation id.
    ///
    /// Problems are pushed to `issues`; a contract without paths yields an
    /// empty index.
    pub fn build(contract: &Value, issues: &mut Vec<IndexError>) -> Self {
        let mut index = OperationIndex::default();

        let Some(paths) = contract.get("paths").and_then(Value::as_object) else {
            issues.push(IndexError::MissingPaths);
            return index;
        };

        let global_security = first_security_scheme(contract.get("security"));

        for (path, item) in paths {
            let route = split_path(path);
            let path_params = item.get("parameters");
            let mut template = PathTemplate {
                key: route.join("/"),
                route: route.clone(),
                methods: Vec::new(),
                checks: vec![None; route.len()],
            };

            for method in HTTP_METHODS {
                let Some(raw) = item.get(method.as_str()) else {
                    continue;
                };
                let Some(id) = raw.get("operationId").and_then(Value::as_str) else {
                    issues.push(IndexError::MissingOperationId {
                        method: method.to_string(),
                        path: path.clone(),
                    });
                    continue;
                };
                if index.operations.contains_key(id) {
                    issues.push(IndexError::DuplicateOperationId {
                        id: id.to_string(),
                        method: method.to_string(),
                        path: path.clone(),
                    });
                    continue;
                }

                let operation = build_operation(
                    contract,
                    path,
                    &route,
                    *method,
                    id,
                    raw,
                    path_params,
                    global_security.as_deref(),
                );

                for (pos, segment) in route.iter().enumerate() {
                    if template.checks[pos].is_some() {
                        continue;
                    }
                    if let Some(name) = placeholder_name(segment) {
                        template.checks[pos] = operation
                            .parameter(name)
                            .and_then(|p| p.check.clone());
                    }
                }

                template.methods.push((*method, id.to_string()));
                index.order.push(id.to_string());
                index.operations.insert(id.to_string(), operation);
            }

            if template.methods.is_empty() || template.route.is_empty() {
                continue;
            }
            index.by_key.insert(template.key.clone(), index.templates.len());
            index.templates.push(template);
        }

        index.link_keywords();
        index.link_relations();

        log::info!(
            "indexed {} operations over {} paths ({} top-level keys)",
            index.operations.len(),
            index.templates.len(),
            index.top_level.len()
        );
        index
    }

    /// Register every template under each of its part keywords.
    ///
    /// A keyword is a literal segment that also starts some template.
    fn link_keywords(&mut self) {
        self.top_level = self
            .templates
            .iter()
            .filter_map(|t| t.route.first())
            .filter(|s| !is_placeholder(s))
            .cloned()
            .collect();

        for (template_idx, template) in self.templates.iter().enumerate() {
            for (offset, segment) in template.route.iter().enumerate() {
                if self.top_level.contains(segment) {
                    self.by_keyword
                        .entry(segment.clone())
                        .or_default()
                        .push(KeywordEntry {
                            template: template_idx,
                            offset,
                        });
                }
            }
        }
    }

    /// Store siblings, parent and children directly on each operation.
    fn link_relations(&mut self) {
        let mut relations: Vec<(String, Vec<String>, Option<String>, Vec<String>)> = Vec::new();

        for template in &self.templates {
            let children: Vec<String> = self
                .templates
                .iter()
                .filter(|t| {
                    t.route.len() == template.route.len() + 1
                        && same_shape(&t.route[..template.route.len()], &template.route)
                })
                .filter_map(|t| t.operation_id(HttpMethod::Get).map(String::from))
                .collect();

            let parent = (1..template.route.len()).rev().find_map(|len| {
                self.templates
                    .iter()
                    .filter(|t| same_shape(&t.route, &template.route[..len]))
                    .find_map(|t| t.operation_id(HttpMethod::Get))
                    .map(String::from)
            });

            for (_, id) in &template.methods {
                let siblings = template
                    .methods
                    .iter()
                    .filter(|(_, other)| other != id)
                    .map(|(_, other)| other.clone())
                    .collect();
                relations.push((id.clone(), siblings, parent.clone(), children.clone()));
            }
        }

        for (id, siblings, parent, children) in relations {
            if let Some(operation) = self.operations.get_mut(&id) {
                operation.sibling_ids = siblings;
                operation.parent_operation_id = parent;
                operation.child_ids = children;
            }
        }
    }

    /// The placeholder operation returned when nothing matches.
    pub fn empty(&self) -> &Operation {
        &self.empty
    }

    /// Operation by id, or the empty operation.
    pub fn get_operation_by_id(&self, id: &str) -> &Operation {
        self.operations.get(id).unwrap_or(&self.empty)
    }

    /// Best operation for a concrete route.
    ///
    /// Only templates with as many segments as the route are considered.
    /// Among compatible templates the one with the most literal segments
    /// wins; remaining ties go to declaration order.
    pub fn get_operation(&self, route: &[String], method: HttpMethod) -> &Operation {
        let mut best: Option<(&PathTemplate, usize)> = None;
        for template in &self.templates {
            if template.len() != route.len() || template.operation_id(method).is_none() {
                continue;
            }
            if !route.iter().enumerate().all(|(pos, s)| template.accepts(pos, s)) {
                continue;
            }
            let score = template.literal_count();
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((template, score));
            }
        }

        best.and_then(|(template, _)| template.operation_id(method))
            .map(|id| self.get_operation_by_id(id))
            .unwrap_or(&self.empty)
    }

    /// Operations on the same resource as `id` (including itself), minus `exclude`.
    pub fn get_operations(&self, id: &str, exclude: Option<&str>) -> Vec<&Operation> {
        let operation = self.get_operation_by_id(id);
        if operation.is_empty() {
            return Vec::new();
        }
        std::iter::once(operation.id.as_str())
            .chain(operation.sibling_ids.iter().map(String::as_str))
            .filter(|other| Some(*other) != exclude)
            .filter_map(|other| self.operations.get(other))
            .collect()
    }

    /// GET operations one segment below `id`'s path.
    pub fn get_child_operations(&self, id: &str) -> Vec<&Operation> {
        self.get_operation_by_id(id)
            .child_ids
            .iter()
            .filter_map(|child| self.operations.get(child))
            .collect()
    }

    /// Sibling ids derived from the `{method}_{resource}` naming convention.
    ///
    /// Only used to check contracts; resolution relies on `sibling_ids`.
    pub fn naming_convention_siblings(&self, id: &str) -> Vec<String> {
        let operation = self.get_operation_by_id(id);
        let prefix = format!("{}_", operation.http_method);
        let Some(resource) = operation.id.strip_prefix(&prefix) else {
            return Vec::new();
        };
        HTTP_METHODS
            .iter()
            .filter(|m| **m != operation.http_method)
            .map(|m| format!("{}_{}", m, resource))
            .filter(|candidate| self.operations.contains_key(candidate))
            .collect()
    }

    /// Whether a URL segment starts a new part.
    pub fn is_top_level(&self, segment: &str) -> bool {
        self.top_level.contains(segment)
    }

    /// Templates reachable from a part keyword, in declaration order.
    pub fn templates_for(&self, keyword: &str) -> impl Iterator<Item = (&PathTemplate, usize)> {
        self.by_keyword
            .get(keyword)
            .into_iter()
            .flatten()
            .map(|entry| (&self.templates[entry.template], entry.offset))
    }

    pub fn template(&self, key: &str) -> Option<&PathTemplate> {
        self.by_key.get(key).map(|&idx| &self.templates[idx])
    }

    pub fn templates(&self) -> &[PathTemplate] {
        &self.templates
    }

    /// Operations in declaration order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.order.iter().filter_map(|id| self.operations.get(id))
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[allow(clippy::too_many_arguments)]
fn build_operation(
    contract: &Value,
    path: &str,
    route: &[String],
    method: HttpMethod,
    id: &str,
    raw: &Value,
    path_params: Option<&Value>,
    global_security: Option<&str>,
) -> Operation {
    let mut parameters: Vec<Parameter> = Vec::new();
    // Operation-level parameters override path-level ones of the same name.
    for source in [raw.get("parameters"), path_params].into_iter().flatten() {
        let Some(list) = source.as_array() else {
            continue;
        };
        for param in list {
            let param = resolve_local(contract, param);
            let Some(name) = param.get("name").and_then(Value::as_str) else {
                continue;
            };
            if parameters.iter().any(|p| p.name == name) {
                continue;
            }
            let location = param.get("in").and_then(Value::as_str).unwrap_or("query");
            let schema = param.get("schema").cloned().unwrap_or(Value::Object(Map::new()));
            let check = if location == "path" {
                SegmentCheck::compile(&schema)
            } else {
                None
            };
            parameters.push(Parameter {
                name: name.to_string(),
                location: location.to_string(),
                required: param.get("required").and_then(Value::as_bool).unwrap_or(location == "path"),
                schema,
                check,
            });
        }
    }

    let response_schema = success_schema(contract, raw);
    let request_schema = raw
        .get("requestBody")
        .map(|body| resolve_local(contract, body))
        .and_then(|body| content_schemas(body).next());

    let request_schema_name = request_schema.and_then(referenced_schema).map(String::from);
    let (schema_name, view_data_type) = match (response_schema, request_schema) {
        (Some(schema), _) => (
            referenced_schema(schema).map(String::from),
            SchemaType::of_schema(schema),
        ),
        (None, Some(schema)) => (request_schema_name.clone(), SchemaType::of_schema(schema)),
        (None, None) => (None, SchemaType::None),
    };

    let security_scheme = match raw.get("security") {
        Some(security) => first_security_scheme(Some(security)),
        None => global_security.map(String::from),
    };

    Operation {
        id: id.to_string(),
        http_method: method,
        path: path.to_string(),
        route: route.to_vec(),
        parameters,
        schema_name,
        request_schema_name,
        view_data_type,
        security_scheme,
        ..Operation::default()
    }
}

/// Routes of equal length whose literals agree; placeholder names are ignored.
fn same_shape(a: &[String], b: &[String]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x == y || (is_placeholder(x) && is_placeholder(y)))
}

/// Schema of the first 2xx response that has a body.
fn success_schema<'a>(contract: &'a Value, raw: &'a Value) -> Option<&'a Value> {
    let responses = raw.get("responses")?.as_object()?;
    responses
        .iter()
        .filter(|(code, _)| code.starts_with('2'))
        .find_map(|(_, response)| content_schemas(resolve_local(contract, response)).next())
}

fn first_security_scheme(security: Option<&Value>) -> Option<String> {
    security?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .find_map(|requirement| requirement.keys().next().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn route(path: &str) -> Vec<String> {
        split_path(path)
    }

    fn contract() -> Value {
        json!({
            "security": [{"bearer": []}],
            "paths": {
                "/providers": {
                    "get": {"operationId": "get_providers", "responses": {"200": {"content": {"application/json": {
                        "schema": {"type": "array", "items": {"$ref": "#/components/schemas/Provider"}}
                    }}}}},
                    "post": {"operationId": "post_providers", "security": [],
                        "requestBody": {"content": {"application/json": {"schema": {"$ref": "#/components/schemas/Provider"}}}},
                        "responses": {"201": {"description": "created"}}}
                },
                "/providers/search": {
                    "get": {"operationId": "get_providers_search", "responses": {"200": {"description": "ok"}}}
                },
                "/providers/{id}": {
                    "parameters": [{"name": "id", "in": "path", "required": true, "schema": {"type": "integer"}}],
                    "get": {"operationId": "get_provider", "responses": {"200": {"content": {"application/json": {
                        "schema": {"$ref": "#/components/schemas/Provider"}
                    }}}}},
                    "delete": {"operationId": "delete_provider", "responses": {"204": {"description": "gone"}}}
                },
                "/providers/{provider_id}/contracts": {
                    "get": {"operationId": "get_provider_contracts", "responses": {"200": {"content": {"application/json": {
                        "schema": {"type": "array", "items": {"$ref": "#/components/schemas/Contract"}}
                    }}}}}
                },
                "/contracts": {
                    "get": {"operationId": "get_contracts"},
                    "put": {"responses": {}}
                }
            },
            "components": {"schemas": {
                "Provider": {"type": "object"},
                "Contract": {"type": "object"}
            }}
        })
    }

    fn index() -> (OperationIndex, Vec<IndexError>) {
        let mut issues = Vec::new();
        let index = OperationIndex::build(&contract(), &mut issues);
        (index, issues)
    }

    #[test]
    fn build_records_operations_and_issues() {
        let (index, issues) = index();
        assert_eq!(index.len(), 7);
        assert_eq!(
            issues,
            vec![IndexError::MissingOperationId {
                method: "put".into(),
                path: "/contracts".into()
            }]
        );

        let op = index.get_operation_by_id("get_provider");
        assert_eq!(op.route, vec!["providers", "{id}"]);
        assert_eq!(op.view_data_type, SchemaType::Object);
        assert_eq!(op.schema_name.as_deref(), Some("Provider"));
        assert_eq!(op.security_scheme.as_deref(), Some("bearer"));
        assert!(op.parameter("id").unwrap().is_path());

        let post = index.get_operation_by_id("post_providers");
        assert_eq!(post.security_scheme, None);
        assert_eq!(post.request_schema_name.as_deref(), Some("Provider"));
        assert_eq!(post.view_data_type, SchemaType::Object);
    }

    #[test]
    fn missing_paths_yields_empty_index() {
        let mut issues = Vec::new();
        let index = OperationIndex::build(&json!({"openapi": "3.0.3"}), &mut issues);
        assert!(index.is_empty());
        assert_eq!(issues, vec![IndexError::MissingPaths]);
        assert!(index.get_operation(&route("providers"), HttpMethod::Get).is_empty());
    }

    #[test]
    fn get_operation_prefers_literal_segments() {
        let (index, _) = index();
        assert_eq!(
            index.get_operation(&route("providers/search"), HttpMethod::Get).id,
            "get_providers_search"
        );
        assert_eq!(
            index.get_operation(&route("providers/42"), HttpMethod::Get).id,
            "get_provider"
        );
        assert_eq!(
            index.get_operation(&route("providers/42"), HttpMethod::Delete).id,
            "delete_provider"
        );
    }

    #[test]
    fn get_operation_checks_parameter_types() {
        let (index, _) = index();
        // `id` is declared as an integer
        assert!(index.get_operation(&route("providers/abc"), HttpMethod::Get).is_empty());
        assert!(index.get_operation(&route("nothing/here"), HttpMethod::Get).is_empty());
    }

    #[test]
    fn relations_are_stored_on_operations() {
        let (index, _) = index();

        let list = index.get_operation_by_id("get_providers");
        assert_eq!(list.sibling_ids, vec!["post_providers"]);
        assert_eq!(list.child_ids, vec!["get_providers_search", "get_provider"]);
        assert_eq!(list.parent_operation_id, None);

        let contracts = index.get_operation_by_id("get_provider_contracts");
        assert_eq!(contracts.parent_operation_id.as_deref(), Some("get_provider"));

        let ids: Vec<_> = index
            .get_operations("get_provider", Some("get_provider"))
            .iter()
            .map(|o| o.id.as_str())
            .collect();
        assert_eq!(ids, vec!["delete_provider"]);

        let children: Vec<_> = index
            .get_child_operations("get_provider")
            .iter()
            .map(|o| o.id.as_str())
            .collect();
        assert_eq!(children, vec!["get_provider_contracts"]);
    }

    #[test]
    fn naming_convention_matches_explicit_siblings() {
        let (index, _) = index();
        assert_eq!(
            index.naming_convention_siblings("get_provider"),
            vec!["delete_provider"]
        );
        assert_eq!(
            index.naming_convention_siblings("get_providers"),
            vec!["post_providers"]
        );
    }

    #[test]
    fn keywords_index_nested_templates() {
        let (index, _) = index();
        assert!(index.is_top_level("providers"));
        assert!(index.is_top_level("contracts"));
        assert!(!index.is_top_level("search"));

        let nested: Vec<_> = index
            .templates_for("contracts")
            .map(|(t, offset)| (t.key.as_str(), offset))
            .collect();
        assert_eq!(
            nested,
            vec![("providers/{provider_id}/contracts", 2), ("contracts", 0)]
        );
    }
}
