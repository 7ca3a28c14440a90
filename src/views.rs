//! View-pattern registry.
//!
//! A view is a named component that can display a run of chunks. Each view
//! declares patterns: a sequence of schema types (one per chunk) mapped to
//! the role each chunk plays, or to `"ignore"` to reject that sequence.
//!
//! # Table format
//!
//! ```json
//! {
//!   "views": {
//!     "list":    { "array": ["array"] },
//!     "master":  { "object,array": ["header", null] },
//!     "details": { "object": ["object"], "array,object": "ignore" }
//!   },
//!   "preferences": { "settings": "details" }
//! }
//! ```
//!
//! A `null` role means "use the chunk's own schema type". Declaration order
//! of views and patterns is the tie-break order used by the matcher.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::error::ViewConfigError;
use crate::loader::{load_document, load_document_auto};
use crate::types::{is_placeholder, json_type_name, SchemaType};

/// Marker that makes a pattern reject its sequence.
pub const IGNORE: &str = "ignore";

/// Keyword -> preferred view, for well-known resource names.
pub const DEFAULT_PREFERENCES: &[(&str, &str)] = &[
    ("search", "list"),
    ("history", "timeline"),
    ("stats", "chart"),
    ("dashboard", "dashboard"),
    ("profile", "details"),
    ("settings", "form"),
];

/// What a pattern does with a matching schema-type sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternAction {
    /// The sequence is explicitly not displayable by this view.
    Ignore,
    /// One role per position; `None` positions take the chunk's schema type.
    Roles(Vec<Option<String>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewPattern {
    pub types: Vec<SchemaType>,
    pub action: PatternAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDefinition {
    pub name: String,
    pub patterns: Vec<ViewPattern>,
}

impl ViewDefinition {
    /// Pattern registered for exactly this sequence.
    pub fn pattern(&self, types: &[SchemaType]) -> Option<&PatternAction> {
        self.patterns
            .iter()
            .find(|p| p.types == types)
            .map(|p| &p.action)
    }
}

/// Registered views plus the keyword preference table.
///
/// Read-only once handed to the router.
#[derive(Debug, Clone)]
pub struct ViewRegistry {
    views: Vec<ViewDefinition>,
    preferences: HashMap<String, String>,
    max_len: usize,
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewRegistry {
    /// Empty registry with the default preference vocabulary.
    pub fn new() -> Self {
        Self {
            views: Vec::new(),
            preferences: DEFAULT_PREFERENCES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            max_len: 0,
        }
    }

    /// Register a role pattern for a view.
    ///
    /// Roles shorter than `types` leave the tail to the chunks' own types.
    pub fn with_pattern(mut self, view: &str, types: &[SchemaType], roles: &[&str]) -> Self {
        let roles = roles.iter().map(|r| Some(r.to_string())).collect();
        self.register(view, types.to_vec(), PatternAction::Roles(roles));
        self
    }

    /// Register an ignore pattern for a view.
    pub fn with_ignore(mut self, view: &str, types: &[SchemaType]) -> Self {
        self.register(view, types.to_vec(), PatternAction::Ignore);
        self
    }

    /// Map a path keyword to a preferred view.
    pub fn with_preference(mut self, keyword: &str, view: &str) -> Self {
        self.preferences.insert(keyword.to_string(), view.to_string());
        self
    }

    /// Add a pattern; a later pattern for the same sequence replaces the earlier one.
    pub fn register(&mut self, view: &str, types: Vec<SchemaType>, action: PatternAction) {
        self.max_len = self.max_len.max(types.len());
        let position = self.views.iter().position(|v| v.name == view);
        let definition = match position {
            Some(idx) => &mut self.views[idx],
            None => {
                self.views.push(ViewDefinition {
                    name: view.to_string(),
                    patterns: Vec::new(),
                });
                let last = self.views.len() - 1;
                &mut self.views[last]
            }
        };
        match definition.patterns.iter_mut().find(|p| p.types == types) {
            Some(existing) => existing.action = action,
            None => definition.patterns.push(ViewPattern { types, action }),
        }
    }

    /// Parse a view table (see module docs).
    pub fn from_value(table: &Value) -> Result<Self, ViewConfigError> {
        let views = table
            .get("views")
            .and_then(Value::as_object)
            .ok_or(ViewConfigError::NotAnObject)?;

        let mut registry = ViewRegistry::new();
        for (view, patterns) in views {
            let patterns = patterns
                .as_object()
                .ok_or_else(|| ViewConfigError::InvalidView { view: view.clone() })?;
            for (sequence, action) in patterns {
                let types = parse_sequence(view, sequence)?;
                let action = parse_action(view, sequence, action)?;
                registry.register(view, types, action);
            }
        }

        if let Some(preferences) = table.get("preferences").and_then(Value::as_object) {
            for (keyword, view) in preferences {
                let view = view
                    .as_str()
                    .ok_or_else(|| ViewConfigError::InvalidPreference {
                        keyword: keyword.clone(),
                    })?;
                registry.preferences.insert(keyword.clone(), view.to_string());
            }
        }

        log::debug!(
            "registered {} views, longest pattern {}",
            registry.views.len(),
            registry.max_len
        );
        Ok(registry)
    }

    /// Load a view table from a file.
    pub fn load(path: &Path) -> Result<Self, ViewConfigError> {
        Self::from_value(&load_document(path)?)
    }

    /// Load a view table from a file path or URL.
    pub fn load_auto(source: &str) -> Result<Self, ViewConfigError> {
        Self::from_value(&load_document_auto(source)?)
    }

    pub fn view(&self, name: &str) -> Option<&ViewDefinition> {
        self.views.iter().find(|v| v.name == name)
    }

    /// Views in declaration order.
    pub fn views(&self) -> &[ViewDefinition] {
        &self.views
    }

    /// Length of the longest registered sequence.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Preferred view for a route: the last segment found in the preference
    /// table decides. Placeholders are skipped.
    pub fn weigh_preference(&self, route: &[String]) -> Option<&str> {
        route
            .iter()
            .rev()
            .filter(|s| !is_placeholder(s))
            .find_map(|s| self.preferences.get(s.as_str()))
            .map(String::as_str)
    }
}

fn parse_sequence(view: &str, sequence: &str) -> Result<Vec<SchemaType>, ViewConfigError> {
    sequence
        .split(',')
        .map(|token| {
            SchemaType::parse(token).ok_or_else(|| ViewConfigError::UnknownSchemaType {
                view: view.to_string(),
                pattern: sequence.to_string(),
                token: token.trim().to_string(),
            })
        })
        .collect()
}

fn parse_action(view: &str, sequence: &str, action: &Value) -> Result<PatternAction, ViewConfigError> {
    let invalid = |actual: &Value| ViewConfigError::InvalidPattern {
        view: view.to_string(),
        pattern: sequence.to_string(),
        actual: json_type_name(actual).to_string(),
    };

    match action {
        Value::String(s) if s == IGNORE => Ok(PatternAction::Ignore),
        Value::Array(roles) => roles
            .iter()
            .map(|role| match role {
                Value::String(s) => Ok(Some(s.clone())),
                Value::Null => Ok(None),
                other => Err(invalid(other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(PatternAction::Roles),
        other => Err(invalid(other)),
    }
}
