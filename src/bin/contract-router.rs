//! Contract Router CLI
//!
//! Command-line interface for inspecting contracts and resolving routes.

use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use contract_router::{
    lint, load_document_auto, ContractIndex, FileStatus, HttpMethod, LintResult, Operation, Query, Router,
    RouterOptions, Severity, Transport, TransportError, ViewRegistry,
};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "contract-router")]
#[command(about = "Resolve application routes against an OpenAPI contract")]
#[command(version)]
struct Cli {
    /// Show debug logging on stderr
    #[arg(long, short, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors; for lint, only show failing files
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the operations of a contract
    Operations {
        /// Contract source: file path or URL (http:// or https://)
        contract: String,

        /// Output the operations as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve a route into chunks and views
    Resolve {
        /// Contract source: file path or URL (http:// or https://)
        contract: String,

        /// View table source: file path or URL
        #[arg(long)]
        views: String,

        /// Route to resolve (e.g., /view/details/providers/42)
        path: String,

        /// HTTP method of the last chunk
        #[arg(long, default_value = "get")]
        method: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Lint contract files for errors (syntax, missing ids, unknown refs)
    Lint {
        /// File or directory to lint
        path: std::path::PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,
    },
}

/// Transport for commands that never fetch data.
struct Offline;

impl Transport for Offline {
    fn execute(&self, operation: &Operation, _route: &[String], _query: &Query) -> Result<Value, TransportError> {
        Err(offline(operation))
    }

    fn submit(
        &self,
        operation: &Operation,
        _route: &[String],
        _payload: &Value,
        _query: &Query,
    ) -> Result<Value, TransportError> {
        Err(offline(operation))
    }
}

fn offline(operation: &Operation) -> TransportError {
    TransportError {
        operation_id: operation.id.clone(),
        message: "offline".to_string(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Error);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let result = match cli.command {
        Commands::Operations { contract, json } => run_operations(&contract, json),

        Commands::Resolve {
            contract,
            views,
            path,
            method,
            pretty,
        } => run_resolve(&contract, &views, &path, &method, pretty),

        Commands::Lint {
            path,
            format,
            strict,
        } => run_lint(&path, &format, strict, cli.quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn load_index(source: &str) -> Result<ContractIndex, u8> {
    let contract = load_document_auto(source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    Ok(ContractIndex::build(&contract))
}

fn to_json(value: &impl serde::Serialize, pretty: bool) -> Result<String, u8> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })
}

fn run_operations(source: &str, json: bool) -> Result<(), u8> {
    let index = load_index(source)?;
    let operations: Vec<&Operation> = index.operations().operations().collect();

    if json {
        println!("{}", to_json(&operations, true)?);
        return Ok(());
    }

    for op in &operations {
        let schema = match &op.schema_name {
            Some(name) => format!("{} {}", op.view_data_type, name),
            None => op.view_data_type.to_string(),
        };
        println!(
            "{:<7} {:<40} {:<32} {}",
            op.http_method.as_str().to_uppercase(),
            op.path,
            op.id,
            schema
        );
    }
    if !index.issues().is_empty() {
        eprintln!("{} indexing issue(s); run `lint` for details", index.issues().len());
    }
    Ok(())
}

fn run_resolve(contract: &str, views: &str, path: &str, method: &str, pretty: bool) -> Result<(), u8> {
    let Some(method) = HttpMethod::parse(method) else {
        eprintln!("Error: unknown method: {}", method);
        return Err(2);
    };

    let index = load_index(contract)?;
    let views = ViewRegistry::load_auto(views).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let mut router = Router::new(index, views, Offline, RouterOptions::default());
    router.open_location(method, path);

    let output = serde_json::json!({
        "location": router.location(),
        "group": router.group(),
    });
    println!("{}", to_json(&output, pretty)?);

    if router.group().is_empty() {
        eprintln!("Error: no operation matches {}", path);
        return Err(1);
    }
    Ok(())
}

fn run_lint(path: &Path, format: &str, strict: bool, quiet: bool) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(2);
    }

    let result = lint(path, strict);
    if format == "json" {
        println!("{}", to_json(&result, true)?);
    } else {
        print_lint_report(&result, strict, quiet);
    }

    if result.passed(strict) {
        Ok(())
    } else {
        Err(1)
    }
}

/// One block per contract, diagnostics listed under their path template.
/// `quiet` hides passing contracts and warnings.
fn print_lint_report(result: &LintResult, strict: bool, quiet: bool) {
    for file in &result.results {
        if quiet && file.status == FileStatus::Ok {
            continue;
        }
        let mark = match file.status {
            FileStatus::Ok => "\x1b[32m✓\x1b[0m",
            FileStatus::Warning => "\x1b[33m⚠\x1b[0m",
            FileStatus::Error => "\x1b[31m✗\x1b[0m",
        };
        println!("{} {}", mark, file.file.display());

        for (template, diagnostics) in file.by_template() {
            let shown: Vec<_> = diagnostics
                .into_iter()
                .filter(|d| !quiet || d.severity == Severity::Error)
                .collect();
            if shown.is_empty() {
                continue;
            }
            println!("  {}", template.as_deref().unwrap_or("(contract)"));
            for d in shown {
                let (color, label) = match d.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                println!("    {}{}[{}]\x1b[0m {}", color, label, d.code, d.message);
            }
        }
    }

    if result.passed(strict) {
        println!(
            "\x1b[32m✓ {} contract(s) checked, no problems\x1b[0m",
            result.files_checked
        );
    } else {
        println!(
            "\x1b[31m✗ {} contract(s) checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
            result.files_checked, result.passed, result.failed, result.errors, result.warnings
        );
    }
}
