//! Router - owns the live chunk group and drives navigation.
//!
//! The router turns locations into chunk groups (builder + matcher), keeps
//! the data cache, and publishes two replaying streams: the current group
//! and the chunk currently in view. Navigation failures are returned and
//! also broadcast to every error subscriber.

use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::builder::ChunkBuilder;
use crate::cache::ChunkCache;
use crate::chunk::{Chunk, ChunkGroup};
use crate::error::{NavigationContext, NavigationError, TransportError};
use crate::index::ContractIndex;
use crate::matcher::match_components_to_chunks;
use crate::operation_index::Operation;
use crate::types::{placeholder_name, split_path, unresolved_placeholders, HttpMethod, Query, RouterOptions};
use crate::views::ViewRegistry;

/// Component segment written when a chunk has no view.
pub const NO_COMPONENT: &str = "-";

const ERROR_CHANNEL_CAPACITY: usize = 32;

/// Executes operations on behalf of the router.
///
/// The router never performs I/O itself; reads and writes go through this
/// collaborator with the operation's fully resolved route.
pub trait Transport {
    fn execute(&self, operation: &Operation, route: &[String], query: &Query) -> Result<Value, TransportError>;

    fn submit(
        &self,
        operation: &Operation,
        route: &[String],
        payload: &Value,
        query: &Query,
    ) -> Result<Value, TransportError>;
}

/// Which route a chunk navigation follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    /// Drill into the chunk's linked child.
    Link,
    /// Pick another record at the chunk's level.
    Change,
    /// Return to the previous chunk.
    Back,
}

impl NavigationKind {
    pub fn from_flags(use_change_route: bool, go_back: bool) -> Self {
        if go_back {
            NavigationKind::Back
        } else if use_change_route {
            NavigationKind::Change
        } else {
            NavigationKind::Link
        }
    }
}

/// The resolution engine.
///
/// Methods take `&mut self`, so navigations never overlap: each one runs
/// to completion before the next starts.
pub struct Router<T: Transport> {
    index: ContractIndex,
    views: ViewRegistry,
    options: RouterOptions,
    transport: T,
    cache: ChunkCache,
    group: ChunkGroup,
    next_group_id: u64,
    current: Option<usize>,
    location: Vec<String>,
    group_tx: watch::Sender<ChunkGroup>,
    chunk_tx: watch::Sender<Option<Chunk>>,
    error_tx: broadcast::Sender<NavigationError>,
}

impl<T: Transport> Router<T> {
    pub fn new(index: ContractIndex, views: ViewRegistry, transport: T, options: RouterOptions) -> Self {
        let (group_tx, _) = watch::channel(ChunkGroup::default());
        let (chunk_tx, _) = watch::channel(None);
        let (error_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            index,
            views,
            cache: ChunkCache::new(options.cache_ttl),
            options,
            transport,
            group: ChunkGroup::default(),
            next_group_id: 1,
            current: None,
            location: Vec::new(),
            group_tx,
            chunk_tx,
            error_tx,
        }
    }

    pub fn index(&self) -> &ContractIndex {
        &self.index
    }

    pub fn views(&self) -> &ViewRegistry {
        &self.views
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    pub fn group(&self) -> &ChunkGroup {
        &self.group
    }

    /// Chunk currently in view.
    pub fn current_chunk(&self) -> Option<&Chunk> {
        self.current.and_then(|index| self.group.chunk(index))
    }

    /// Address-bar path: `/{view_prefix}/{component}/{self_route...}`.
    pub fn location(&self) -> String {
        format!("/{}", self.location.join("/"))
    }

    pub fn subscribe_group(&self) -> watch::Receiver<ChunkGroup> {
        self.group_tx.subscribe()
    }

    pub fn subscribe_chunk(&self) -> watch::Receiver<Option<Chunk>> {
        self.chunk_tx.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<NavigationError> {
        self.error_tx.subscribe()
    }

    /// Follow an external location (`/view/details/providers/42?page=2`).
    ///
    /// Opens the location and fetches data for every chunk.
    pub fn navigate_to(&mut self, location: &str) -> Vec<usize> {
        let created = self.open_location(HttpMethod::Get, location);
        self.resolve_data(&created);
        created
    }

    /// Resolve a location without fetching any data.
    ///
    /// The view prefix and component are stripped, the group is rebuilt
    /// and the last chunk becomes current. Returns the new chunk indices.
    pub fn open_location(&mut self, method: HttpMethod, location: &str) -> Vec<usize> {
        let (path, query) = parse_location(location);
        let mut route = split_path(path);
        if route.first().map(String::as_str) == Some(self.options.view_prefix.as_str()) {
            let strip = route.len().min(2);
            route.drain(..strip);
        }

        let created = self.get_chunk_group(method, route, query);
        if let Some(last) = self.group.last_chunk().map(|c| c.index) {
            if let Err(e) = self.chunk_switch(last) {
                log::debug!("no location for {}: {}", path, e);
            }
        }
        created
    }

    /// Build a fresh group for `route`, replacing the live one.
    ///
    /// Cache entries the new group still uses are kept; the rest are
    /// evicted. Returns the indices of every chunk in the new group.
    pub fn get_chunk_group(&mut self, method: HttpMethod, route: Vec<String>, query: Query) -> Vec<usize> {
        let id = self.next_group_id;
        self.next_group_id += 1;

        let mut group = ChunkGroup::new(id, method, route, query);
        let created = ChunkBuilder::new(&self.index, &mut self.cache).build(&mut group, 0);
        match_components_to_chunks(&self.views, &mut group);

        let previous = std::mem::replace(&mut self.group, group);
        for chunk in previous.chunks.values() {
            if self.group.chunks_for_key(&chunk.cache_key).next().is_none() {
                self.cache.evict(&chunk.cache_key);
            }
        }

        log::info!(
            "group {} resolved /{} into {} chunk(s), component {}",
            id,
            self.group.full_route.join("/"),
            self.group.len(),
            self.group.component.as_deref().unwrap_or(NO_COMPONENT)
        );
        self.current = None;
        self.publish_group();
        created
    }

    /// Rebuild the live group from chunk `last_kept` onwards.
    ///
    /// Chunks after `last_kept` are evicted: their streams are completed and
    /// the values they introduced are dropped from the group. `None` evicts
    /// every chunk. Builder and matcher then run on the rest of `new_route`.
    /// Returns the indices of the chunks created.
    pub fn update_chunk_group(&mut self, last_kept: Option<usize>, method: HttpMethod, new_route: Vec<String>) -> Vec<usize> {
        for chunk in truncate_group(&mut self.group, last_kept) {
            if self.group.chunks_for_key(&chunk.cache_key).next().is_none() {
                self.cache.evict(&chunk.cache_key);
            }
        }

        let resume_at = self.group.last_chunk().map_or(0, |c| c.end);
        self.group.method = method;
        self.group.full_route = new_route;

        let created = ChunkBuilder::new(&self.index, &mut self.cache).build(&mut self.group, resume_at);
        match_components_to_chunks(&self.views, &mut self.group);

        log::info!(
            "group {} updated to /{}: kept {:?}, created {:?}",
            self.group.id,
            self.group.full_route.join("/"),
            last_kept,
            created
        );
        if self.current.is_some_and(|index| self.group.chunk(index).is_none()) {
            self.current = None;
        }
        self.publish_group();
        created
    }

    /// Navigate from chunk `index` along its link, change or back route.
    ///
    /// Placeholders left in the route are filled from `payload` using the
    /// target operation's path parameters. On failure nothing changes: the
    /// error is returned and broadcast. On success the group is updated,
    /// data is fetched for the new chunks and the target chunk is switched
    /// to. Returns the created indices.
    pub fn chunk_navigation(
        &mut self,
        index: usize,
        payload: Option<&Value>,
        kind: NavigationKind,
    ) -> Result<Vec<usize>, NavigationError> {
        let (route, last_kept) = match self.navigation_target(index, payload, kind) {
            Ok(target) => target,
            Err(e) => return Err(self.report(e)),
        };

        let created = self.update_chunk_group(last_kept, HttpMethod::Get, route);
        self.resolve_data(&created);

        let target = match kind {
            NavigationKind::Back => last_kept,
            _ => created.last().copied().or(last_kept),
        };
        if let Some(target) = target {
            self.chunk_switch(target)?;
        }
        Ok(created)
    }

    /// Route to navigate to and the last chunk it keeps.
    fn navigation_target(
        &self,
        index: usize,
        payload: Option<&Value>,
        kind: NavigationKind,
    ) -> Result<(Vec<String>, Option<usize>), NavigationError> {
        let chunk = self
            .group
            .chunk(index)
            .ok_or(NavigationError::UnknownChunk { index })?;

        let mut context = NavigationContext {
            operation_id: Some(chunk.operation_id.clone()),
            component: self.component_of(index),
            route: Vec::new(),
        };

        let (mut route, last_kept, operation_id) = match kind {
            NavigationKind::Back => {
                let Some(previous) = self.group.previous(index) else {
                    return Err(NavigationError::MissingSelfRoute { context });
                };
                (previous.self_route.clone(), Some(previous.index), None)
            }
            NavigationKind::Change => (
                chunk.change_route.clone(),
                self.group.previous(index).map(|c| c.index),
                Some(chunk.operation_id.clone()),
            ),
            NavigationKind::Link => {
                let Some(link) = &chunk.link_operation_id else {
                    return Err(NavigationError::NoOperation { context });
                };
                (chunk.link_route.clone(), Some(index), Some(link.clone()))
            }
        };
        context.route = route.clone();

        if !unresolved_placeholders(&route).is_empty() {
            let Some(payload) = payload else {
                return Err(NavigationError::MissingPayload { context });
            };
            let operation = operation_id
                .as_deref()
                .map(|id| self.index.operations().get_operation_by_id(id))
                .filter(|op| !op.is_empty())
                .ok_or_else(|| NavigationError::NoOperation {
                    context: context.clone(),
                })?;
            fill_placeholders(&mut route, operation, payload);
            context.route = route.clone();
        }

        let missing = unresolved_placeholders(&route);
        if !missing.is_empty() {
            return Err(NavigationError::UnresolvedPlaceholders { missing, context });
        }
        if route.is_empty() {
            return Err(NavigationError::MissingSelfRoute { context });
        }
        if kind != NavigationKind::Back && !self.resolves_new_chunks(last_kept, &route) {
            return Err(NavigationError::NoOperation { context });
        }
        Ok((route, last_kept))
    }

    /// Whether rebuilding after `last_kept` along `route` yields any chunk.
    ///
    /// Runs the builder on a copy of the group with a scratch cache, so the
    /// live group and its streams stay untouched.
    fn resolves_new_chunks(&self, last_kept: Option<usize>, route: &[String]) -> bool {
        let mut group = self.group.clone();
        truncate_group(&mut group, last_kept);
        let resume_at = group.last_chunk().map_or(0, |c| c.end);
        group.method = HttpMethod::Get;
        group.full_route = route.to_vec();

        let mut scratch = ChunkCache::new(self.options.cache_ttl);
        !ChunkBuilder::new(&self.index, &mut scratch)
            .build(&mut group, resume_at)
            .is_empty()
    }

    /// Make chunk `index` the chunk in view and rewrite the location.
    pub fn chunk_switch(&mut self, index: usize) -> Result<(), NavigationError> {
        let chunk = match self.group.chunk(index) {
            Some(chunk) => chunk,
            None => return Err(self.report(NavigationError::UnknownChunk { index })),
        };
        let component = self.component_of(index);
        let context = NavigationContext {
            operation_id: Some(chunk.operation_id.clone()),
            component: component.clone(),
            route: chunk.self_route.clone(),
        };

        let missing = unresolved_placeholders(&chunk.self_route);
        if chunk.self_route.is_empty() {
            return Err(self.report(NavigationError::MissingSelfRoute { context }));
        }
        if !missing.is_empty() {
            return Err(self.report(NavigationError::UnresolvedPlaceholders { missing, context }));
        }

        let mut location = vec![
            self.options.view_prefix.clone(),
            component.unwrap_or_else(|| NO_COMPONENT.to_string()),
        ];
        location.extend(chunk.self_route.iter().cloned());
        let chunk = chunk.clone();

        self.location = location;
        self.current = Some(index);
        log::debug!("switched to chunk {} at {}", index, self.location());
        self.chunk_tx.send_replace(Some(chunk));
        Ok(())
    }

    /// Data of chunk `index`: the cached payload, or a fresh fetch.
    pub fn chunk_data(&self, index: usize) -> Result<Option<Value>, TransportError> {
        let Some(chunk) = self.group.chunk(index) else {
            return Ok(None);
        };
        if let Some(data) = chunk.get_data() {
            return Ok(Some(data));
        }
        let operation = self.index.operations().get_operation_by_id(&chunk.operation_id);
        let data = self
            .transport
            .execute(operation, &chunk.resource_route, &self.group.query)?;
        chunk.set_data(data.clone());
        Ok(Some(data))
    }

    /// Fetch data for the given chunks; failures are logged.
    pub fn resolve_data(&self, indices: &[usize]) {
        for &index in indices {
            if let Err(e) = self.chunk_data(index) {
                log::warn!("chunk {}: {}", index, e);
            }
        }
    }

    /// Run the sibling `method` operation of chunk `index` with `payload`.
    ///
    /// On success the chunk's cached payload is cleared (the stream stays
    /// open) so the next read fetches again.
    pub fn submit(&self, index: usize, method: HttpMethod, payload: &Value) -> Result<Value, TransportError> {
        let Some(chunk) = self.group.chunk(index) else {
            return Err(TransportError {
                operation_id: String::new(),
                message: format!("no chunk at index {}", index),
            });
        };
        let operations = self.index.operations();
        let operation = operations
            .get_operations(&chunk.operation_id, None)
            .into_iter()
            .find(|op| op.http_method == method)
            .ok_or_else(|| TransportError {
                operation_id: chunk.operation_id.clone(),
                message: format!("no {} operation on this resource", method),
            })?;

        let result = self
            .transport
            .submit(operation, &chunk.resource_route, payload, &self.group.query)?;
        log::debug!("{} succeeded, clearing {}", operation.id, chunk.cache_key);
        chunk.clear_data(false);
        Ok(result)
    }

    /// Swap in a new contract index and rebuild the current location.
    ///
    /// Every chunk is evicted first, so no stream outlives the old index.
    pub fn reinit(&mut self, index: ContractIndex) -> Vec<usize> {
        let method = self.group.method;
        let route = self.group.full_route.clone();
        let query = self.group.query.clone();

        self.cache.clear();
        self.group.chunks.clear();
        self.index = index;

        let created = self.get_chunk_group(method, route, query);
        self.resolve_data(&created);
        if let Some(last) = self.group.last_chunk().map(|c| c.index) {
            if let Err(e) = self.chunk_switch(last) {
                log::debug!("no location after reinit: {}", e);
            }
        }
        created
    }

    /// Component of the view holding chunk `index`, or the group's.
    fn component_of(&self, index: usize) -> Option<String> {
        self.group
            .view_of(index)
            .and_then(|v| v.component.clone())
            .or_else(|| self.group.component.clone())
    }

    fn report(&self, error: NavigationError) -> NavigationError {
        log::warn!("navigation failed: {}", error);
        // no subscribers is fine
        let _ = self.error_tx.send(error.clone());
        error
    }

    fn publish_group(&self) {
        self.group_tx.send_replace(self.group.clone());
    }
}

/// Remove every chunk after `last_kept` (all of them for `None`) along with
/// the values it introduced. Returns the removed chunks.
fn truncate_group(group: &mut ChunkGroup, last_kept: Option<usize>) -> Vec<Chunk> {
    let evicted: Vec<usize> = group
        .chunks
        .keys()
        .copied()
        .filter(|index| last_kept.map_or(true, |kept| *index > kept))
        .collect();

    let mut removed = Vec::with_capacity(evicted.len());
    for index in evicted {
        if let Some(chunk) = group.chunks.remove(&index) {
            for key in &chunk.contributed {
                group.values.remove(key);
            }
            removed.push(chunk);
        }
    }
    removed
}

/// Split `path?query` into the path and its key/value pairs.
fn parse_location(location: &str) -> (&str, Query) {
    let (path, query) = location.split_once('?').unwrap_or((location, ""));
    let query = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.to_string(), value.to_string())
        })
        .collect();
    (path, query)
}

/// Replace `{param}` segments with values from `payload`.
///
/// Only the operation's path parameters are filled; an operation without
/// declared parameters accepts every placeholder.
fn fill_placeholders(route: &mut [String], operation: &Operation, payload: &Value) {
    let declared: Vec<&str> = operation.path_parameters().map(|p| p.name.as_str()).collect();
    for segment in route.iter_mut() {
        let Some(name) = placeholder_name(segment) else {
            continue;
        };
        if !declared.is_empty() && !declared.contains(&name) {
            continue;
        }
        let value = match payload.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => continue,
        };
        *segment = value;
    }
}
