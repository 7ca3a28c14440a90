//! Chunks, chunk views and the chunk group that owns them.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::cache::{CacheKey, DataStream};
use crate::types::{HttpMethod, Query, SchemaType};

/// Resolved `{param}` values, keyed both bracketed and bare.
pub type Values = BTreeMap<String, String>;

/// An operation reachable through a schema property rather than the URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationOperation {
    /// Property of the chunk's schema that references the related schema.
    pub property: String,
    pub schema_name: String,
    pub operation_id: String,
}

/// One run of URL segments bound to an operation.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    /// Position in the group; strictly increasing.
    pub index: usize,
    /// Identifier of the owning group (a lookup key, not a reference).
    pub group_id: u64,
    /// Start segment of the URL part this chunk came from.
    pub part: usize,
    /// URL segments `start..end` are covered by this chunk.
    pub start: usize,
    pub end: usize,
    /// Segments this chunk adds beyond the chunks before it.
    pub route: Vec<String>,
    /// Routes of every earlier chunk plus this one.
    pub smart_route: Vec<String>,
    /// Route written to the address bar when this chunk is shown.
    pub self_route: Vec<String>,
    /// Route to another record at this level; the last parameter is left open.
    pub change_route: Vec<String>,
    /// Route into the linked child; its parameter is left open.
    pub link_route: Vec<String>,
    /// The operation's full route with every placeholder filled.
    pub resource_route: Vec<String>,
    pub operation_id: String,
    pub method: HttpMethod,
    /// Other verbs on the same resource.
    pub operation_ids: Vec<String>,
    pub link_operation_id: Option<String>,
    pub relation_operations: Vec<RelationOperation>,
    pub values: Values,
    pub schema_type: SchemaType,
    pub schema_name: Option<String>,
    /// View assigned when this chunk heads a matched pattern.
    pub component: Option<String>,
    /// Role within its chunk view (`object`, `array`, `header`, ...).
    pub view_key: Option<String>,
    /// Role -> chunk index for every chunk this head collected.
    pub view_chunks: BTreeMap<String, usize>,
    pub cache_key: CacheKey,
    /// Group-level value keys this chunk introduced.
    #[serde(skip)]
    pub(crate) contributed: Vec<String>,
    #[serde(skip)]
    pub(crate) stream: Arc<DataStream>,
}

impl Chunk {
    /// Fresh cached payload, if any (see [`DataStream::get_data`]).
    pub fn get_data(&self) -> Option<Value> {
        self.stream.get_data()
    }

    pub fn set_data(&self, value: Value) {
        self.stream.set_data(value);
    }

    pub fn clear_data(&self, complete: bool) {
        self.stream.clear_data(complete);
    }

    /// The shared stream backing this chunk's data.
    pub fn stream(&self) -> &Arc<DataStream> {
        &self.stream
    }
}

/// A contiguous run of chunks displayed by one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkView {
    pub start: usize,
    pub end: usize,
    pub route: Vec<String>,
    pub values: Values,
    pub component: Option<String>,
}

impl ChunkView {
    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }
}

/// Everything resolved for one URL.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkGroup {
    pub id: u64,
    pub method: HttpMethod,
    /// URL segments after the view prefix.
    pub full_route: Vec<String>,
    pub query: Query,
    /// Part start -> part segments.
    pub parts: BTreeMap<usize, Vec<String>>,
    pub chunks: BTreeMap<usize, Chunk>,
    /// First chunk index -> view.
    pub views: BTreeMap<usize, ChunkView>,
    pub values: Values,
    /// Concatenation of every chunk's route.
    pub route: Vec<String>,
    /// Component of the last view.
    pub component: Option<String>,
}

impl ChunkGroup {
    pub fn new(id: u64, method: HttpMethod, full_route: Vec<String>, query: Query) -> Self {
        Self {
            id,
            method,
            full_route,
            query,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(&index)
    }

    /// Closest chunk before `index`.
    pub fn previous(&self, index: usize) -> Option<&Chunk> {
        self.chunks.range(..index).next_back().map(|(_, c)| c)
    }

    /// Closest chunk after `index`.
    pub fn next(&self, index: usize) -> Option<&Chunk> {
        self.chunks.range(index + 1..).next().map(|(_, c)| c)
    }

    pub fn last_chunk(&self) -> Option<&Chunk> {
        self.chunks.values().next_back()
    }

    /// View containing chunk `index`.
    pub fn view_of(&self, index: usize) -> Option<&ChunkView> {
        self.views.values().find(|v| v.contains(index))
    }

    /// Chunks that belong to this group and share the given cache key.
    pub fn chunks_for_key<'a>(&'a self, key: &'a CacheKey) -> impl Iterator<Item = &'a Chunk> + 'a {
        self.chunks.values().filter(move |c| &c.cache_key == key)
    }

    /// Recompute the concatenated route from the chunks.
    pub(crate) fn refresh_route(&mut self) {
        self.route = self
            .chunks
            .values()
            .flat_map(|c| c.route.iter().cloned())
            .collect();
    }
}
