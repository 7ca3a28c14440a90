//! Contract Router
//!
//! Resolves application URLs to contract operations and display views.
//!
//! An OpenAPI contract is indexed once into a [`ContractIndex`]. A URL is
//! then split into chunks, each bound to the operation matching a prefix of
//! the URL, and runs of chunks are grouped into views by matching their
//! schema types against a [`ViewRegistry`]. The [`Router`] owns the live
//! [`ChunkGroup`], caches fetched payloads per resource, and computes
//! link/change/back navigation routes.
//!
//! # Example
//!
//! ```
//! use contract_router::{ChunkBuilder, ChunkCache, ChunkGroup, ContractIndex, HttpMethod, SchemaType, ViewRegistry};
//! use contract_router::{match_components_to_chunks, split_path};
//! use serde_json::json;
//!
//! let contract = json!({
//!     "paths": {
//!         "/providers": {"get": {"operationId": "get_providers", "responses": {"200": {
//!             "content": {"application/json": {"schema": {
//!                 "type": "array", "items": {"$ref": "#/components/schemas/Provider"}
//!             }}}
//!         }}}},
//!         "/providers/{id}": {"get": {"operationId": "get_provider", "responses": {"200": {
//!             "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Provider"}}}
//!         }}}}
//!     },
//!     "components": {"schemas": {"Provider": {"type": "object"}}}
//! });
//!
//! let index = ContractIndex::build(&contract);
//! let views = ViewRegistry::new()
//!     .with_pattern("list", &[SchemaType::Array], &["array"])
//!     .with_pattern("details", &[SchemaType::Object], &["object"]);
//!
//! let mut cache = ChunkCache::default();
//! let mut group = ChunkGroup::new(1, HttpMethod::Get, split_path("providers/42"), Default::default());
//! ChunkBuilder::new(&index, &mut cache).build(&mut group, 0);
//! match_components_to_chunks(&views, &mut group);
//!
//! assert_eq!(group.len(), 2);
//! assert_eq!(group.component.as_deref(), Some("details"));
//! assert_eq!(group.values.get("{provider_id}").map(String::as_str), Some("42"));
//! ```
//!
//! # View Tables
//!
//! | Entry | Meaning |
//! |-------|---------|
//! | `"object,array": ["header", null]` | Two chunks; the first plays `header`, the second its own type |
//! | `"array,object": "ignore"` | This view never displays the sequence |
//! | `"preferences": {"settings": "form"}` | Routes ending in `settings` try `form` first |

mod builder;
mod cache;
mod chunk;
mod error;
mod index;
mod linter;
mod loader;
mod matcher;
mod navigator;
mod operation_index;
mod schema_index;
mod types;
mod views;

pub use builder::{add_chunk_to_map, get_route_values, split_route_in_parts, ChunkBuilder, RouteMatch};
pub use cache::{CacheKey, CachedPayload, ChunkCache, DataStream};
pub use chunk::{Chunk, ChunkGroup, ChunkView, RelationOperation, Values};
pub use error::{IndexError, LoadError, NavigationContext, NavigationError, TransportError, ViewConfigError};
pub use index::ContractIndex;
pub use linter::{lint, lint_file, Diagnostic, FileResult, FileStatus, LintResult, Severity};
pub use loader::{is_url, load_document, load_document_auto, load_document_str, navigate_fragment};
pub use matcher::{make_chunk_views_from_chains, match_components_to_chunks, match_view_type_map};
pub use navigator::{NavigationKind, Router, Transport, NO_COMPONENT};
pub use operation_index::{KeywordEntry, Operation, OperationIndex, Parameter, PathTemplate, SegmentCheck};
pub use schema_index::{schema_ref_name, PropertyRef, SchemaIndex, SchemaRef, SchemaUsage};
pub use types::{
    is_placeholder, json_pointer, placeholder_name, split_path, unresolved_placeholders, HttpMethod, Query,
    RouterOptions, SchemaType, CACHE_TTL, DEFAULT_VIEW_PREFIX,
};
pub use views::{PatternAction, ViewDefinition, ViewPattern, ViewRegistry, DEFAULT_PREFERENCES, IGNORE};

#[cfg(feature = "remote")]
pub use loader::load_document_url;
