//! Chunk builder - splits a URL into parts and binds each prefix of a part
//! to the operation that best matches it.

use std::collections::BTreeMap;

use crate::cache::{CacheKey, ChunkCache};
use crate::chunk::{Chunk, ChunkGroup, RelationOperation, Values};
use crate::index::ContractIndex;
use crate::operation_index::{Operation, OperationIndex};
use crate::types::{is_placeholder, placeholder_name, snake_case, HttpMethod, SchemaType};

/// Value keys too ambiguous to share across chunks.
const AMBIGUOUS_KEYS: &[&str] = &["id", "{id}"];

/// Status code whose response schemas define relation targets.
const RELATION_STATUS: &str = "200";

/// Slice a route at every segment that starts a registered top-level path.
///
/// Leading segments before the first boundary form a part of their own.
pub fn split_route_in_parts(index: &OperationIndex, route: &[String]) -> BTreeMap<usize, Vec<String>> {
    let mut parts: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    let mut current = 0;
    for (pos, segment) in route.iter().enumerate() {
        if pos > 0 && index.is_top_level(segment) {
            current = pos;
        }
        parts.entry(current).or_default().push(segment.clone());
    }
    parts
}

/// Values for every placeholder of `operation.route`, read positionally from `route`.
///
/// Each value is stored as `name` and `{name}`; names without an underscore
/// are also stored with the schema prefix (`provider_id`, `{provider_id}`).
pub fn get_route_values(operation: &Operation, route: &[String]) -> Values {
    let mut values = Values::new();
    for (pos, (template, value)) in operation.route.iter().zip(route).enumerate() {
        let Some(name) = placeholder_name(template) else {
            continue;
        };
        values.insert(name.to_string(), value.clone());
        values.insert(template.clone(), value.clone());
        if !name.contains('_') {
            if let Some(prefix) = schema_prefix(operation, pos) {
                let prefixed = format!("{}_{}", prefix, name);
                values.insert(format!("{{{}}}", prefixed), value.clone());
                values.insert(prefixed, value.clone());
            }
        }
    }
    values
}

/// Prefix used to disambiguate a parameter: the schema name in snake case,
/// or the singular of the literal segment before the parameter.
fn schema_prefix(operation: &Operation, pos: usize) -> Option<String> {
    if let Some(schema) = &operation.schema_name {
        return Some(snake_case(schema));
    }
    operation.route[..pos]
        .iter()
        .rev()
        .find(|s| !is_placeholder(s))
        .map(|s| snake_case(s.strip_suffix('s').unwrap_or(s)))
}

/// An operation matched to a route slice.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub operation: &'a Operation,
    /// Full operation route: borrowed leading segments plus the slice.
    pub route: Vec<String>,
    /// How many leading segments were borrowed from earlier parts.
    pub borrowed: usize,
}

/// Builds chunks into a group using the contract index and the data cache.
pub struct ChunkBuilder<'a> {
    index: &'a ContractIndex,
    cache: &'a mut ChunkCache,
}

impl<'a> ChunkBuilder<'a> {
    pub fn new(index: &'a ContractIndex, cache: &'a mut ChunkCache) -> Self {
        Self { index, cache }
    }

    /// Create chunks for every part prefix ending after segment `resume_at`.
    ///
    /// Chunks already in the group are left alone. Returns the indices of
    /// the chunks that were added.
    pub fn build(&mut self, group: &mut ChunkGroup, resume_at: usize) -> Vec<usize> {
        let operations = self.index.operations();
        group.parts = split_route_in_parts(operations, &group.full_route);

        let parts: Vec<(usize, Vec<String>)> = group
            .parts
            .iter()
            .map(|(start, part)| (*start, part.clone()))
            .collect();
        let total = group.full_route.len();
        let mut created = Vec::new();

        for (part_start, part) in parts {
            let has_previous_part = part_start > 0;
            for len in 1..=part.len() {
                let end = part_start + len;
                if end <= resume_at {
                    continue;
                }
                let method = if end == total { group.method } else { HttpMethod::Get };
                let slice = &part[..len];

                let mut found =
                    self.match_route_to_operation(slice, method, group, part_start, has_previous_part);
                if found.is_none() && method != HttpMethod::Get {
                    found = self.match_route_to_operation(
                        slice,
                        HttpMethod::Get,
                        group,
                        part_start,
                        has_previous_part,
                    );
                }

                let Some(found) = found else {
                    log::debug!("no operation for /{}", slice.join("/"));
                    continue;
                };

                let chunk = self.create_chunk(&found, group, part_start, end);
                if let Some(index) = add_chunk_to_map(group, chunk) {
                    created.push(index);
                }
            }
        }

        group.refresh_route();
        created
    }

    /// Best operation for a part prefix.
    ///
    /// Templates registered under the slice's first segment are tried. A
    /// template where that segment sits further in (`providers/{provider_id}/contracts`
    /// for a `contracts` slice) is only considered when a previous part
    /// exists; its leading segments are borrowed from the URL before the
    /// part and from values already resolved in the group. Candidates rank
    /// by template length, then literal count; ties go to declaration order.
    pub fn match_route_to_operation(
        &self,
        slice: &[String],
        method: HttpMethod,
        group: &ChunkGroup,
        part_start: usize,
        has_previous_part: bool,
    ) -> Option<RouteMatch<'a>> {
        let operations: &'a OperationIndex = self.index.operations();
        let keyword = slice.first()?;
        let before = &group.full_route[..part_start.min(group.full_route.len())];

        let mut best: Option<(RouteMatch<'a>, (usize, usize))> = None;
        for (template, offset) in operations.templates_for(keyword) {
            let Some(id) = template.operation_id(method) else {
                continue;
            };
            if offset > 0 && !has_previous_part {
                continue;
            }
            if offset + slice.len() != template.len() {
                continue;
            }
            if !slice
                .iter()
                .enumerate()
                .all(|(pos, segment)| template.accepts(offset + pos, segment))
            {
                continue;
            }

            let mut route = Vec::with_capacity(template.len());
            for pos in 0..offset {
                let segment = &template.route[pos];
                let resolved = match placeholder_name(segment) {
                    None => before.contains(segment).then(|| segment.clone()),
                    Some(_) => group
                        .values
                        .get(segment)
                        .cloned()
                        .or_else(|| {
                            // fall back to the URL segment in the same position
                            let at = (part_start + pos).checked_sub(offset)?;
                            before.get(at).cloned()
                        })
                        .filter(|value| template.accepts(pos, value)),
                };
                match resolved {
                    Some(value) => route.push(value),
                    None => break,
                }
            }
            if route.len() + slice.len() != template.len() {
                continue;
            }
            route.extend(slice.iter().cloned());

            let score = (template.len(), template.literal_count());
            if best.as_ref().map_or(true, |(_, best_score)| score > *best_score) {
                let operation = operations.get_operation_by_id(id);
                best = Some((
                    RouteMatch {
                        operation,
                        route,
                        borrowed: offset,
                    },
                    score,
                ));
            }
        }

        best.map(|(found, _)| found)
    }

    /// Materialize a chunk for a matched operation.
    ///
    /// The chunk is not yet in the group; [`add_chunk_to_map`] places it and
    /// anchors its change and link routes, which hold only the operation's
    /// open tail until then.
    pub fn create_chunk(&mut self, found: &RouteMatch<'_>, group: &ChunkGroup, part: usize, end: usize) -> Chunk {
        let operations = self.index.operations();
        let operation = found.operation;
        let values = get_route_values(operation, &found.route);

        let key_values = operation
            .route
            .iter()
            .zip(&found.route)
            .filter(|(template, _)| is_placeholder(template))
            .map(|(_, value)| value.clone());
        let cache_key = CacheKey::new(&operation.id, key_values);
        let stream = self.cache.stream(&cache_key);

        let operation_ids: Vec<String> = operations
            .get_operations(&operation.id, Some(&operation.id))
            .iter()
            .map(|o| o.id.clone())
            .collect();

        // a child addressed by a parameter wins over literal children
        let children: Vec<&Operation> = operations
            .get_child_operations(&operation.id)
            .into_iter()
            .filter(|child| !operation_ids.contains(&child.id))
            .collect();
        let link = children
            .iter()
            .find(|child| child.route.last().is_some_and(|s| is_placeholder(s)))
            .or_else(|| children.first())
            .copied();

        let relation_operations = self.relation_operations(operation, &operation_ids, link);

        Chunk {
            index: 0,
            group_id: group.id,
            part,
            start: end - (found.route.len() - found.borrowed),
            end,
            route: Vec::new(),
            smart_route: Vec::new(),
            self_route: Vec::new(),
            change_route: operation
                .route
                .last()
                .filter(|s| is_placeholder(s))
                .cloned()
                .into_iter()
                .collect(),
            link_route: link
                .map(|l| l.route[operation.route.len().min(l.route.len())..].to_vec())
                .unwrap_or_default(),
            resource_route: found.route.clone(),
            operation_id: operation.id.clone(),
            method: operation.http_method,
            operation_ids,
            link_operation_id: link.map(|l| l.id.clone()),
            relation_operations,
            values,
            schema_type: operation.view_data_type,
            schema_name: operation.schema_name.clone(),
            component: None,
            view_key: None,
            view_chunks: BTreeMap::new(),
            cache_key,
            contributed: Vec::new(),
            stream,
        }
    }

    /// Operations reachable through schema properties.
    ///
    /// Properties of the operation's schemas (and its siblings' schemas) that
    /// reference another schema become relations when some operation reads
    /// that schema with the same shape.
    fn relation_operations(
        &self,
        operation: &Operation,
        sibling_ids: &[String],
        link: Option<&Operation>,
    ) -> Vec<RelationOperation> {
        let operations = self.index.operations();
        let schemas = self.index.schemas();

        let mut schema_names: Vec<&str> = Vec::new();
        let sibling_ops = sibling_ids.iter().map(|id| operations.get_operation_by_id(id));
        for op in std::iter::once(operation).chain(sibling_ops) {
            for name in [&op.schema_name, &op.request_schema_name].into_iter().flatten() {
                if !schema_names.contains(&name.as_str()) {
                    schema_names.push(name.as_str());
                }
            }
        }

        let mut relations: Vec<RelationOperation> = Vec::new();
        for schema_ref in schema_names.iter().filter_map(|name| schemas.schema_ref(name)) {
            for property in &schema_ref.properties {
                let Some(reference) = &property.reference else {
                    continue;
                };
                if !matches!(property.schema_type, SchemaType::Object | SchemaType::Array) {
                    continue;
                }
                let Some(target) =
                    schemas.get_operation_id_for_schema(reference, property.schema_type, RELATION_STATUS)
                else {
                    continue;
                };
                let taken = target == operation.id
                    || sibling_ids.iter().any(|s| s == target)
                    || link.is_some_and(|l| l.id == target)
                    || relations.iter().any(|r| r.property == property.name);
                if taken {
                    continue;
                }
                relations.push(RelationOperation {
                    property: property.name.clone(),
                    schema_name: reference.clone(),
                    operation_id: target.to_string(),
                });
            }
        }
        relations
    }
}

/// Append a chunk to the group unless it repeats the previous chunk's operation.
///
/// Computes the chunk's minimal route (segments after the previous chunk),
/// its smart/self/change/link routes, and merges its values into the group.
/// A value already recorded in the group is never overwritten. Returns the
/// new chunk's index.
pub fn add_chunk_to_map(group: &mut ChunkGroup, mut chunk: Chunk) -> Option<usize> {
    let previous = group.last_chunk();
    if previous.is_some_and(|p| p.operation_id == chunk.operation_id) {
        log::debug!("skipping repeated operation {}", chunk.operation_id);
        return None;
    }

    let (index, prev_end, mut smart_route) = match previous {
        Some(p) => (p.index + 1, p.end, p.smart_route.clone()),
        None => (0, 0, Vec::new()),
    };

    let from = prev_end.min(chunk.end);
    chunk.index = index;
    chunk.route = group.full_route[from..chunk.end].to_vec();
    smart_route.extend(chunk.route.iter().cloned());
    chunk.self_route = smart_route.clone();

    // The last resolved parameter stays open so another record can be chosen.
    let open = chunk.change_route.pop();
    chunk.change_route = smart_route.clone();
    if let (Some(open), Some(last)) = (open, chunk.change_route.last_mut()) {
        *last = open;
    }

    if !chunk.link_route.is_empty() {
        let mut link_route = smart_route.clone();
        link_route.extend(chunk.link_route.drain(..));
        chunk.link_route = link_route;
    }
    chunk.smart_route = smart_route;

    for (key, value) in &chunk.values {
        if AMBIGUOUS_KEYS.contains(&key.as_str()) {
            continue;
        }
        match group.values.get(key) {
            Some(existing) if existing != value => {
                log::warn!(
                    "{} resolves {} to {} but the group already has {}; keeping {}",
                    chunk.operation_id,
                    key,
                    value,
                    existing,
                    existing
                );
            }
            Some(_) => {}
            None => {
                group.values.insert(key.clone(), value.clone());
                chunk.contributed.push(key.clone());
            }
        }
    }

    group.chunks.insert(index, chunk);
    Some(index)
}
