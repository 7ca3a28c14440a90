//! View matcher - groups consecutive chunks into views by their schema types.

use std::collections::BTreeMap;

use crate::chunk::{ChunkGroup, ChunkView};
use crate::types::SchemaType;
use crate::views::{PatternAction, ViewDefinition, ViewRegistry};

/// A chosen view for a window of chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ViewMatch {
    view: String,
    /// `(chunk index, role)` in window order.
    roles: Vec<(usize, String)>,
}

/// Match a window of `(chunk index, schema type)` against one view.
///
/// Returns the role of every chunk, or `None` when the view has no pattern
/// for this sequence, the pattern is `ignore`, or the role list does not
/// line up with the window.
pub fn match_view_type_map(view: &ViewDefinition, chunks: &[(usize, SchemaType)]) -> Option<Vec<(usize, String)>> {
    let types: Vec<SchemaType> = chunks.iter().map(|(_, t)| *t).collect();
    let produced: Vec<(usize, String)> = match view.pattern(&types)? {
        PatternAction::Ignore => Vec::new(),
        // roles beyond the window have no chunk to land on
        PatternAction::Roles(roles) if roles.len() > chunks.len() => Vec::new(),
        PatternAction::Roles(roles) => chunks
            .iter()
            .enumerate()
            .map(|(pos, (index, schema_type))| {
                let role = roles
                    .get(pos)
                    .cloned()
                    .flatten()
                    .unwrap_or_else(|| schema_type.as_str().to_string());
                (*index, role)
            })
            .collect(),
    };

    (produced.len() == chunks.len()).then_some(produced)
}

/// Assign views to every chunk of the group and rebuild its chunk views.
///
/// For each chunk the longest trailing window ending at it (reaching back at
/// most into the previous part) is matched: first against the view
/// preferred for the chunk's route, then against every view in declaration
/// order. A window that reaches back over an earlier chain absorbs it: the
/// earlier chain is dropped and its head no longer carries a view.
/// Chunks no pattern accepts are left out of the views.
pub fn match_components_to_chunks(views: &ViewRegistry, group: &mut ChunkGroup) {
    for chunk in group.chunks.values_mut() {
        chunk.component = None;
        chunk.view_key = None;
        chunk.view_chunks.clear();
    }

    let order: Vec<(usize, usize, SchemaType)> = group
        .chunks
        .values()
        .map(|c| (c.index, c.part, c.schema_type))
        .collect();

    // chain start position -> end position
    let mut chains: BTreeMap<usize, usize> = BTreeMap::new();

    for pos in 0..order.len() {
        let (index, part, _) = order[pos];
        let lowest = window_floor(&order, pos);
        let longest = views.max_len().min(pos + 1 - lowest);
        if longest == 0 {
            continue;
        }

        let chunk_route = match group.chunk(index) {
            Some(chunk) => group.full_route[part.min(chunk.end)..chunk.end].to_vec(),
            None => continue,
        };
        let preferred = views.weigh_preference(&chunk_route).and_then(|name| views.view(name));

        let window = |len: usize| -> Vec<(usize, SchemaType)> {
            order[pos + 1 - len..=pos]
                .iter()
                .map(|(index, _, schema_type)| (*index, *schema_type))
                .collect()
        };

        let try_view = |view: &ViewDefinition, len: usize| {
            match_view_type_map(view, &window(len)).map(|roles| ViewMatch {
                view: view.name.clone(),
                roles,
            })
        };

        let found = preferred
            .and_then(|view| (1..=longest).rev().find_map(|len| try_view(view, len)))
            .or_else(|| {
                (1..=longest)
                    .rev()
                    .find_map(|len| views.views().iter().find_map(|view| try_view(view, len)))
            });

        let Some(found) = found else {
            log::debug!("no view for chunk {} ({})", index, order[pos].2);
            continue;
        };

        log::debug!(
            "chunk {} heads view {} over {} chunk(s)",
            index,
            found.view,
            found.roles.len()
        );

        // chains reaching into the new window are subsumed by it
        let start = pos + 1 - found.roles.len();
        let subsumed: Vec<usize> = chains
            .iter()
            .filter(|(_, end)| **end >= start)
            .map(|(chain_start, _)| *chain_start)
            .collect();
        let mut demoted = Vec::with_capacity(subsumed.len());
        for chain_start in subsumed {
            if let Some(end) = chains.remove(&chain_start) {
                demoted.push(order[end].0);
            }
        }
        chains.insert(start, pos);

        assign_view(group, index, found);
        for head in demoted.into_iter().filter(|head| *head != index) {
            if let Some(chunk) = group.chunks.get_mut(&head) {
                chunk.component = None;
                chunk.view_chunks.clear();
            }
        }
    }

    let chains: Vec<(usize, usize)> = chains
        .into_iter()
        .map(|(start, end)| (order[start].0, order[end].0))
        .collect();
    make_chunk_views_from_chains(group, &chains);
}

/// Lowest window position for the chunk at `pos`: the first chunk of the
/// previous part, or of its own part when it is in the first one.
fn window_floor(order: &[(usize, usize, SchemaType)], pos: usize) -> usize {
    let part = order[pos].1;
    let previous_part = order[..pos]
        .iter()
        .rev()
        .map(|(_, p, _)| *p)
        .find(|p| *p < part);
    let floor_part = previous_part.unwrap_or(part);
    order
        .iter()
        .position(|(_, p, _)| *p == floor_part)
        .unwrap_or(pos)
}

/// Record roles on the window's chunks and make `head` carry the view.
fn assign_view(group: &mut ChunkGroup, head: usize, found: ViewMatch) {
    let mut collected: BTreeMap<String, usize> = BTreeMap::new();

    for (index, role) in &found.roles {
        collected.insert(role.clone(), *index);
        let Some(chunk) = group.chunks.get_mut(index) else {
            continue;
        };
        if chunk.view_key.is_none() {
            chunk.view_key = Some(role.clone());
        }
    }

    // siblings hand over whatever they collected before
    for (index, _) in &found.roles {
        if *index == head {
            continue;
        }
        if let Some(chunk) = group.chunks.get(index) {
            for (role, collected_index) in &chunk.view_chunks {
                collected.entry(role.clone()).or_insert(*collected_index);
            }
        }
    }

    if let Some(chunk) = group.chunks.get_mut(&head) {
        chunk.component = Some(found.view);
        chunk.view_chunks = collected;
    }
}

/// Build one chunk view per `(first, last)` chunk chain.
///
/// Routes are concatenated, values merged with the earlier chunk winning,
/// and the component taken from the chain's last chunk. The group's
/// component becomes the last view's.
pub fn make_chunk_views_from_chains(group: &mut ChunkGroup, chains: &[(usize, usize)]) {
    group.views.clear();

    for &(start, end) in chains {
        let mut view = ChunkView {
            start,
            end,
            route: Vec::new(),
            values: Default::default(),
            component: None,
        };
        for chunk in group.chunks.range(start..=end).map(|(_, c)| c) {
            view.route.extend(chunk.route.iter().cloned());
            for (key, value) in &chunk.values {
                view.values.entry(key.clone()).or_insert_with(|| value.clone());
            }
            view.component = chunk.component.clone();
        }
        group.views.insert(start, view);
    }

    group.component = group.views.values().next_back().and_then(|v| v.component.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ChunkBuilder;
    use crate::cache::ChunkCache;
    use crate::index::ContractIndex;
    use crate::types::{split_path, HttpMethod};
    use serde_json::json;

    fn registry() -> ViewRegistry {
        ViewRegistry::from_value(&json!({
            "views": {
                "list": {"array": ["array"]},
                "details": {"object": ["object"], "array,object": "ignore"},
                "master": {"object,array": ["header", null]}
            }
        }))
        .unwrap()
    }

    fn group_for(path: &str, views: &ViewRegistry) -> ChunkGroup {
        let array = |name: &str| json!({"200": {"content": {"application/json": {"schema": {
            "type": "array", "items": {"$ref": format!("#/components/schemas/{}", name)}
        }}}}});
        let object = |name: &str| json!({"200": {"content": {"application/json": {"schema": {
            "$ref": format!("#/components/schemas/{}", name)
        }}}}});
        let index = ContractIndex::build(&json!({
            "paths": {
                "/providers": {"get": {"operationId": "get_providers", "responses": array("Provider")}},
                "/providers/{id}": {"get": {"operationId": "get_provider", "responses": object("Provider")}},
                "/providers/{provider_id}/contracts": {
                    "get": {"operationId": "get_provider_contracts", "responses": array("Contract")}
                },
                "/contracts": {"get": {"operationId": "get_contracts", "responses": array("Contract")}}
            },
            "components": {"schemas": {
                "Provider": {"type": "object", "properties": {"name": {"type": "string"}}},
                "Contract": {"type": "object", "properties": {"title": {"type": "string"}}}
            }}
        }));
        let mut cache = ChunkCache::default();
        let mut group = ChunkGroup::new(1, HttpMethod::Get, split_path(path), Default::default());
        ChunkBuilder::new(&index, &mut cache).build(&mut group, 0);
        match_components_to_chunks(views, &mut group);
        group
    }

    fn details() -> ViewDefinition {
        registry().view("details").unwrap().clone()
    }

    #[test]
    fn match_view_type_map_assigns_roles() {
        let master = registry().view("master").unwrap().clone();
        let roles = match_view_type_map(&master, &[(1, SchemaType::Object), (2, SchemaType::Array)]);
        assert_eq!(
            roles,
            Some(vec![(1, "header".to_string()), (2, "array".to_string())])
        );
    }

    #[test]
    fn match_view_type_map_rejects_ignore_and_unknown_sequences() {
        let view = details();
        assert_eq!(
            match_view_type_map(&view, &[(0, SchemaType::Array), (1, SchemaType::Object)]),
            None
        );
        assert_eq!(match_view_type_map(&view, &[(0, SchemaType::Array)]), None);
    }

    #[test]
    fn match_view_type_map_rejects_longer_role_lists() {
        let registry = ViewRegistry::new().with_pattern("pair", &[SchemaType::Object], &["left", "right"]);
        let view = registry.view("pair").unwrap();
        assert_eq!(match_view_type_map(view, &[(0, SchemaType::Object)]), None);
    }

    #[test]
    fn list_then_details() {
        let group = group_for("providers/42", &registry());
        let components: Vec<_> = group.views.values().map(|v| v.component.as_deref()).collect();
        assert_eq!(components, vec![Some("list"), Some("details")]);
        assert_eq!(group.component.as_deref(), Some("details"));

        let view = &group.views[&1];
        assert_eq!(view.route, vec!["42"]);
        assert_eq!(view.values.get("id").map(String::as_str), Some("42"));
        assert_eq!(group.chunk(1).unwrap().view_key.as_deref(), Some("object"));
    }

    #[test]
    fn nested_window_absorbs_previous_chain() {
        let group = group_for("providers/42/contracts", &registry());
        assert_eq!(group.len(), 3);

        let keys: Vec<_> = group.views.keys().copied().collect();
        assert_eq!(keys, vec![0, 1]);
        let master = &group.views[&1];
        assert_eq!((master.start, master.end), (1, 2));
        assert_eq!(master.component.as_deref(), Some("master"));
        assert_eq!(master.route, vec!["42", "contracts"]);

        let head = group.chunk(2).unwrap();
        assert_eq!(head.view_chunks.get("header"), Some(&1));
        assert_eq!(head.view_chunks.get("array"), Some(&2));
        // first assignment wins
        assert_eq!(group.chunk(1).unwrap().view_key.as_deref(), Some("object"));
        assert_eq!(group.chunk(1).unwrap().component, None);
    }

    #[test]
    fn overlapping_window_drops_the_earlier_chain() {
        let views = ViewRegistry::from_value(&json!({
            "views": {
                "pair": {"array,object": [null, null]},
                "master": {"object,array": ["header", null]}
            }
        }))
        .unwrap();
        let group = group_for("providers/42/contracts", &views);

        let keys: Vec<_> = group.views.keys().copied().collect();
        assert_eq!(keys, vec![1]);
        assert!(group.views.values().all(|v| v.component.is_some()));
        assert_eq!(group.views[&1].component.as_deref(), Some("master"));
        assert!(group.view_of(0).is_none());

        let demoted = group.chunk(1).unwrap();
        assert_eq!(demoted.component, None);
        assert!(demoted.view_chunks.is_empty());
        assert_eq!(group.chunk(2).unwrap().component.as_deref(), Some("master"));
        assert_eq!(group.component.as_deref(), Some("master"));
    }

    #[test]
    fn preferred_view_is_tried_first() {
        let views = registry()
            .with_pattern("grid", &[SchemaType::Array], &["rows"])
            .with_preference("providers", "grid");
        let group = group_for("providers", &views);
        assert_eq!(group.component.as_deref(), Some("grid"));
        assert_eq!(group.chunk(0).unwrap().view_key.as_deref(), Some("rows"));
    }

    #[test]
    fn unmatched_chunks_have_no_view() {
        let views = ViewRegistry::new().with_pattern("list", &[SchemaType::Array], &["array"]);
        let group = group_for("providers/42", &views);
        assert_eq!(group.views.len(), 1);
        assert!(group.view_of(1).is_none());
        assert_eq!(group.component.as_deref(), Some("list"));
    }
}
