//! Error types for contract loading, indexing, view configuration and navigation.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Errors while loading a contract or a view table.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("fragment not found: {fragment}")]
    FragmentNotFound { fragment: String },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

/// Problems found while indexing a contract.
///
/// These never abort the build: they are collected on the index and the
/// engine keeps running with whatever could be indexed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("contract has no paths section")]
    MissingPaths,

    #[error("contract has no components.schemas section")]
    MissingSchemas,

    #[error("{method} {path} has no operationId")]
    MissingOperationId { method: String, path: String },

    #[error("operation id '{id}' is declared more than once (again at {method} {path})")]
    DuplicateOperationId {
        id: String,
        method: String,
        path: String,
    },

    #[error("unknown schema reference '{reference}' at {location}")]
    UnknownSchemaRef { reference: String, location: String },
}

/// Errors in a view-pattern table.
#[derive(Debug, Error)]
pub enum ViewConfigError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("view table must be an object with a \"views\" object")]
    NotAnObject,

    #[error("view '{view}' must map schema-type sequences to patterns")]
    InvalidView { view: String },

    #[error("unknown schema type \"{token}\" in pattern '{pattern}' of view '{view}'")]
    UnknownSchemaType {
        view: String,
        pattern: String,
        token: String,
    },

    #[error("pattern '{pattern}' of view '{view}': expected \"ignore\" or a role list, got {actual}")]
    InvalidPattern {
        view: String,
        pattern: String,
        actual: String,
    },

    #[error("preference for '{keyword}' must be a view name string")]
    InvalidPreference { keyword: String },
}

impl ViewConfigError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ViewConfigError::Load(e) => e.exit_code(),
            _ => 2,
        }
    }
}

/// Where a navigation failure happened, for user-facing display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NavigationContext {
    /// Operation bound to the chunk the navigation started from.
    pub operation_id: Option<String>,
    /// Component the chunk was rendered with.
    pub component: Option<String>,
    /// Route that was attempted (possibly still holding placeholders).
    pub route: Vec<String>,
}

impl std::fmt::Display for NavigationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "operation={} component={} route=/{}",
            self.operation_id.as_deref().unwrap_or("-"),
            self.component.as_deref().unwrap_or("-"),
            self.route.join("/")
        )
    }
}

/// Navigation failures.
///
/// Navigation is aborted without touching the live chunk group; the error
/// is returned and also published on the router's error channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("no chunk at index {index}")]
    UnknownChunk { index: usize },

    #[error("navigation needs a payload to fill the route ({context})")]
    MissingPayload { context: NavigationContext },

    #[error("no operation can be associated with the navigation ({context})")]
    NoOperation { context: NavigationContext },

    #[error("unresolved route parameters: {} ({context})", missing.join(", "))]
    UnresolvedPlaceholders {
        missing: Vec<String>,
        context: NavigationContext,
    },

    #[error("chunk has no route to switch to ({context})")]
    MissingSelfRoute { context: NavigationContext },
}

impl NavigationError {
    /// Context of the failure, when there is a chunk to attach it to.
    pub fn context(&self) -> Option<&NavigationContext> {
        match self {
            NavigationError::UnknownChunk { .. } => None,
            NavigationError::MissingPayload { context }
            | NavigationError::NoOperation { context }
            | NavigationError::UnresolvedPlaceholders { context, .. }
            | NavigationError::MissingSelfRoute { context } => Some(context),
        }
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Failure reported by the transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation_id} failed: {message}")]
pub struct TransportError {
    pub operation_id: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_exit_codes() {
        let err = LoadError::FileNotFound {
            path: PathBuf::from("contract.json"),
        };
        assert_eq!(err.exit_code(), 3);

        let err = LoadError::FragmentNotFound {
            fragment: "#/components/schemas/Nope".into(),
        };
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn view_config_error_exit_codes() {
        let err = ViewConfigError::NotAnObject;
        assert_eq!(err.exit_code(), 2);

        let err = ViewConfigError::Load(LoadError::FileNotFound {
            path: PathBuf::from("views.json"),
        });
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn unresolved_placeholders_display_names_params() {
        let err = NavigationError::UnresolvedPlaceholders {
            missing: vec!["id".into(), "provider_id".into()],
            context: NavigationContext {
                operation_id: Some("get_provider".into()),
                component: Some("details".into()),
                route: vec!["providers".into(), "{id}".into()],
            },
        };
        assert_eq!(
            err.to_string(),
            "unresolved route parameters: id, provider_id \
             (operation=get_provider component=details route=/providers/{id})"
        );
        assert_eq!(
            err.context().and_then(|c| c.operation_id.as_deref()),
            Some("get_provider")
        );
    }

    #[test]
    fn index_error_display() {
        let err = IndexError::MissingOperationId {
            method: "get".into(),
            path: "/providers".into(),
        };
        assert_eq!(err.to_string(), "get /providers has no operationId");
    }
}
