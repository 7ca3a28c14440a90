//! Document loading from files, strings and HTTP URLs.
//!
//! Contracts and view-pattern tables are both plain JSON documents and go
//! through the same loaders.

use std::path::Path;

use serde_json::Value;

use crate::error::LoadError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a JSON document from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_document(path: &Path) -> Result<Value, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    log::debug!("loaded {} ({} bytes)", path.display(), content.len());
    load_document_str(&content)
}

/// Load a JSON document from a string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_document_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a JSON document from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails or the body
/// isn't JSON.
#[cfg(feature = "remote")]
pub fn load_document_url(url: &str) -> Result<Value, LoadError> {
    let network = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    let response = client.get(url).send().map_err(network)?;

    // Check for HTTP errors before parsing
    let response = response.error_for_status().map_err(network)?;

    response.json().map_err(network)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load a document from a file path or URL.
///
/// URL loading requires the `remote` feature.
pub fn load_document_auto(source: &str) -> Result<Value, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_document_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_document(Path::new(source))
    }
}

/// Navigate a JSON Pointer fragment (e.g. `#/components/schemas/Provider`).
///
/// Returns a reference into `document`; `#` alone yields the document itself.
pub fn navigate_fragment<'a>(document: &'a Value, fragment: &str) -> Result<&'a Value, LoadError> {
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Ok(document);
    }

    let mut current = document;
    for part in path.split('/') {
        // Unescape JSON Pointer encoding (~1 = /, ~0 = ~)
        let key = part.replace("~1", "/").replace("~0", "~");
        current = current
            .get(&key)
            .ok_or_else(|| LoadError::FragmentNotFound {
                fragment: fragment.to_string(),
            })?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_document_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"openapi": "3.0.3", "paths": {{}}}}"#).unwrap();

        let doc = load_document(file.path()).unwrap();
        assert_eq!(doc["openapi"], "3.0.3");
    }

    #[test]
    fn load_document_file_not_found() {
        let result = load_document(Path::new("/nonexistent/contract.json"));
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
    }

    #[test]
    fn load_document_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "paths: not json").unwrap();

        let result = load_document(file.path());
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn load_document_str_invalid() {
        let result = load_document_str("{");
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn is_url_detection() {
        assert!(is_url("https://api.example.com/openapi.json"));
        assert!(is_url("http://localhost:8080/openapi.json"));
        assert!(!is_url("./openapi.json"));
    }

    #[test]
    fn load_document_auto_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"views": {{}}}}"#).unwrap();

        let doc = load_document_auto(file.path().to_str().unwrap()).unwrap();
        assert!(doc["views"].is_object());
    }

    #[test]
    fn navigate_fragment_component_schema() {
        let doc = json!({
            "components": {
                "schemas": {
                    "Provider": { "type": "object" },
                    "a/b": { "type": "string" }
                }
            }
        });
        let provider = navigate_fragment(&doc, "#/components/schemas/Provider").unwrap();
        assert_eq!(provider["type"], "object");

        let escaped = navigate_fragment(&doc, "#/components/schemas/a~1b").unwrap();
        assert_eq!(escaped["type"], "string");

        assert!(std::ptr::eq(navigate_fragment(&doc, "#").unwrap(), &doc));
        assert!(matches!(
            navigate_fragment(&doc, "#/components/schemas/Contract"),
            Err(LoadError::FragmentNotFound { .. })
        ));
    }
}
