//! Contract linting - static analysis of OpenAPI contract files.
//!
//! Checks contract files for:
//! - JSON syntax errors
//! - Missing `paths` / `components.schemas` sections
//! - Operations without (or with duplicate) operation ids
//! - `$ref`s to schemas that are not declared
//! - Operation ids that break the `{method}_{resource}` naming convention

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::IndexError;
use crate::index::ContractIndex;
use crate::loader::load_document;
use crate::types::json_pointer;

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub file: PathBuf,
    /// JSON pointer to the issue (e.g., "/paths/~1providers/get")
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    /// Path template the issue sits under (`/providers/{id}`), if any.
    pub fn template(&self) -> Option<String> {
        let rest = self.path.strip_prefix("/paths/")?;
        let segment = rest.split('/').next().filter(|s| !s.is_empty())?;
        Some(segment.replace("~1", "/").replace("~0", "~"))
    }
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl FileResult {
    /// Whether this file fails the run; under `strict` warnings fail too.
    pub fn fails(&self, strict: bool) -> bool {
        match self.status {
            FileStatus::Ok => false,
            FileStatus::Warning => strict,
            FileStatus::Error => true,
        }
    }

    /// Diagnostics grouped by path template, in order of first appearance.
    /// Document-level diagnostics are grouped under `None`.
    pub fn by_template(&self) -> Vec<(Option<String>, Vec<&Diagnostic>)> {
        let mut groups: Vec<(Option<String>, Vec<&Diagnostic>)> = Vec::new();
        for diagnostic in &self.diagnostics {
            let template = diagnostic.template();
            match groups.iter_mut().find(|(t, _)| *t == template) {
                Some((_, members)) => members.push(diagnostic),
                None => groups.push((template, vec![diagnostic])),
            }
        }
        groups
    }
}

/// Status of a linted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if no contract has errors.
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }

    /// Whether the run succeeds; under `strict` any warning fails it.
    pub fn passed(&self, strict: bool) -> bool {
        self.is_ok() && (!strict || self.warnings == 0)
    }
}

/// Lint a contract file or every `.json` contract below a directory.
///
/// With `strict`, contracts with warnings count as failed.
pub fn lint(path: &Path, strict: bool) -> LintResult {
    let results: Vec<FileResult> = contract_files(path)
        .iter()
        .map(|file| lint_file(file, path))
        .collect();

    let count = |severity: Severity| {
        results
            .iter()
            .flat_map(|r| &r.diagnostics)
            .filter(|d| d.severity == severity)
            .count()
    };
    let errors = count(Severity::Error);
    let warnings = count(Severity::Warning);
    let failed = results.iter().filter(|r| r.fails(strict)).count();

    log::debug!(
        "linted {} contract(s): {} error(s), {} warning(s)",
        results.len(),
        errors,
        warnings
    );

    LintResult {
        path: path.to_path_buf(),
        files_checked: results.len(),
        passed: results.len() - failed,
        failed,
        errors,
        warnings,
        results,
    }
}

/// Lint a single contract file.
pub fn lint_file(file: &Path, base_path: &Path) -> FileResult {
    let display = file.strip_prefix(base_path).unwrap_or(file).to_path_buf();
    let diagnostic = |severity: Severity, code: &str, path: String, message: String| Diagnostic {
        severity,
        code: code.to_string(),
        file: file.to_path_buf(),
        path,
        message,
    };

    let contract = match load_document(file) {
        Ok(c) => c,
        Err(e) => {
            return FileResult {
                file: display,
                status: FileStatus::Error,
                diagnostics: vec![diagnostic(
                    Severity::Error,
                    "E001",
                    "/".to_string(),
                    format!("syntax error: {}", e),
                )],
            };
        }
    };

    let index = ContractIndex::build(&contract);
    let mut diagnostics: Vec<Diagnostic> = index
        .issues()
        .iter()
        .map(|issue| {
            let (severity, code, path) = classify(issue);
            diagnostic(severity, code, path, issue.to_string())
        })
        .collect();

    // Naming convention: `{method}_{resource}`, shared by every verb on a path.
    let operations = index.operations();
    for operation in operations.operations() {
        let path = json_pointer(&["paths", operation.path.as_str(), operation.http_method.as_str()]);
        let prefix = format!("{}_", operation.http_method);
        if !operation.id.starts_with(&prefix) {
            diagnostics.push(diagnostic(
                Severity::Warning,
                "W002",
                path,
                format!(
                    "operation id '{}' does not follow {{method}}_{{resource}} (expected prefix '{}')",
                    operation.id, prefix
                ),
            ));
            continue;
        }
        let strays: Vec<String> = operations
            .naming_convention_siblings(&operation.id)
            .into_iter()
            .filter(|sibling| !operation.sibling_ids.contains(sibling))
            .collect();
        if !strays.is_empty() {
            diagnostics.push(diagnostic(
                Severity::Warning,
                "W002",
                path,
                format!(
                    "operation id '{}' names the same resource as {} on a different path",
                    operation.id,
                    strays.join(", ")
                ),
            ));
        }
    }

    let has_errors = diagnostics.iter().any(|d| d.severity == Severity::Error);
    let has_warnings = diagnostics.iter().any(|d| d.severity == Severity::Warning);

    let status = if has_errors {
        FileStatus::Error
    } else if has_warnings {
        FileStatus::Warning
    } else {
        FileStatus::Ok
    };

    FileResult {
        file: display,
        status,
        diagnostics,
    }
}

/// Severity, code and location of an indexing issue.
fn classify(issue: &IndexError) -> (Severity, &'static str, String) {
    match issue {
        IndexError::MissingPaths => (Severity::Error, "E002", "/paths".to_string()),
        IndexError::MissingOperationId { method, path } => (
            Severity::Error,
            "E003",
            json_pointer(&["paths", path.as_str(), method.as_str()]),
        ),
        IndexError::UnknownSchemaRef { location, .. } => (Severity::Error, "E004", location.clone()),
        IndexError::MissingSchemas => (Severity::Warning, "W001", "/components/schemas".to_string()),
        IndexError::DuplicateOperationId { method, path, .. } => (
            Severity::Warning,
            "W003",
            json_pointer(&["paths", path.as_str(), method.as_str()]),
        ),
    }
}

/// Contract files under `path`, sorted; a file path is taken as is when it
/// has the `.json` extension.
fn contract_files(path: &Path) -> Vec<PathBuf> {
    let is_contract = |p: &Path| p.extension().is_some_and(|e| e == "json");
    if path.is_file() {
        return if is_contract(path) { vec![path.to_path_buf()] } else { Vec::new() };
    }

    let mut files = Vec::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let entry = entry.path();
            if entry.is_dir() {
                pending.push(entry);
            } else if is_contract(&entry) {
                files.push(entry);
            }
        }
    }
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    const VALID: &str = r##"{
        "paths": {
            "/providers": {
                "get": {"operationId": "get_providers", "responses": {"200": {"content": {"application/json": {
                    "schema": {"type": "array", "items": {"$ref": "#/components/schemas/Provider"}}
                }}}}},
                "post": {"operationId": "post_providers"}
            }
        },
        "components": {"schemas": {"Provider": {"type": "object"}}}
    }"##;

    fn lint_str(content: &str) -> FileResult {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        lint_file(file.path(), file.path().parent().unwrap())
    }

    fn codes(result: &FileResult) -> Vec<&str> {
        result.diagnostics.iter().map(|d| d.code.as_str()).collect()
    }

    #[test]
    fn lint_valid_contract() {
        let result = lint_str(VALID);
        assert_eq!(result.status, FileStatus::Ok);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn lint_invalid_json_syntax() {
        let result = lint_str("{ not json");
        assert_eq!(result.status, FileStatus::Error);
        assert_eq!(codes(&result), vec!["E001"]);
    }

    #[test]
    fn lint_missing_sections() {
        let result = lint_str("{}");
        assert_eq!(result.status, FileStatus::Error);
        assert_eq!(codes(&result), vec!["W001", "E002"]);
        assert_eq!(result.diagnostics[1].path, "/paths");
    }

    #[test]
    fn lint_missing_operation_id() {
        let result = lint_str(
            r#"{"paths": {"/providers": {"get": {}}}, "components": {"schemas": {}}}"#,
        );
        assert_eq!(codes(&result), vec!["E003"]);
        assert_eq!(result.diagnostics[0].path, "/paths/~1providers/get");
    }

    #[test]
    fn lint_unknown_schema_ref() {
        let result = lint_str(
            r##"{"paths": {"/providers": {"get": {"operationId": "get_providers", "responses": {"200": {
                "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Missing"}}}
            }}}}}, "components": {"schemas": {}}}"##,
        );
        assert_eq!(codes(&result), vec!["E004"]);
        assert_eq!(
            result.diagnostics[0].path,
            "/paths/~1providers/get/responses/200"
        );
    }

    #[test]
    fn lint_naming_convention() {
        let result = lint_str(
            r#"{"paths": {
                "/providers": {"get": {"operationId": "listProviders"}},
                "/suppliers": {"post": {"operationId": "post_providers"}},
                "/vendors": {"get": {"operationId": "get_providers"}}
            }, "components": {"schemas": {}}}"#,
        );
        assert_eq!(result.status, FileStatus::Warning);
        assert_eq!(codes(&result), vec!["W002", "W002", "W002"]);
        assert!(result.diagnostics[0].message.contains("listProviders"));
    }

    #[test]
    fn lint_duplicate_operation_id() {
        let result = lint_str(
            r#"{"paths": {
                "/providers": {"get": {"operationId": "get_providers"}},
                "/vendors/{id}": {"get": {"operationId": "get_providers"}}
            }, "components": {"schemas": {}}}"#,
        );
        assert_eq!(codes(&result), vec!["W003"]);
    }

    #[test]
    fn diagnostics_grouped_by_path_template() {
        let result = lint_str(
            r##"{"paths": {
                "/providers": {"get": {}},
                "/providers/{id}": {"get": {"operationId": "fetchProvider", "responses": {"200": {
                    "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Missing"}}}
                }}}}
            }, "components": {"schemas": {}}}"##,
        );

        let groups: Vec<(Option<String>, Vec<&str>)> = result
            .by_template()
            .into_iter()
            .map(|(template, members)| (template, members.into_iter().map(|d| d.code.as_str()).collect()))
            .collect();
        assert_eq!(
            groups,
            vec![
                (Some("/providers/{id}".to_string()), vec!["E004", "W002"]),
                (Some("/providers".to_string()), vec!["E003"]),
            ]
        );
        assert!(result.fails(false));
    }

    #[test]
    fn document_level_diagnostics_have_no_template() {
        let result = lint_str("{}");
        let groups = result.by_template();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, None);
        assert_eq!(groups[0].1.len(), 2);
    }

    #[test]
    fn lint_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("good.json"), VALID).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/bad.json"), "{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let result = lint(dir.path(), false);
        assert_eq!(result.files_checked, 2);
        assert_eq!(result.passed, 1);
        assert_eq!(result.failed, 1);
        assert!(!result.is_ok());
        assert_eq!(result.results[0].file, PathBuf::from("good.json"));
    }

    #[test]
    fn lint_strict_mode() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("warn.json"),
            r#"{"paths": {"/providers": {"get": {"operationId": "providers"}}}, "components": {"schemas": {}}}"#,
        )
        .unwrap();

        let relaxed = lint(dir.path(), false);
        assert_eq!(relaxed.failed, 0);
        assert!(relaxed.passed(false));

        let strict = lint(dir.path(), true);
        assert_eq!(strict.failed, 1);
        assert_eq!(strict.warnings, 1);
        assert!(!strict.passed(true));
    }
}
