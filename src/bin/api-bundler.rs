//! API Bundler CLI
//!
//! Command-line interface for bundling multi-file API descriptions and
//! validating payloads against them.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use api_bundler::{
    bundle_collection, collection_name, load_collection, load_document, parsed_content,
    related_files, resolve_pool_remote_refs, validate_payload, BundleError, BundleOptions,
    BundleOutput, DocumentNode, MissingRef, RefFetcher, RemoteRefs, SpecVersion, ValidateError,
    ValidationTarget,
};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "api-bundler")]
#[command(about = "Bundle multi-file OpenAPI and Swagger descriptions")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bundle a root document and the files it references into one document
    Bundle {
        /// Root document
        root: PathBuf,

        /// Collection directory (default: the root's directory)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Description version: 2.0 (Swagger) or 3.x (OpenAPI). Detected from the root if omitted
        #[arg(long = "spec-version")]
        spec_version: Option<SpecVersion>,

        /// Fetch http(s) references and bundle them too
        #[arg(long)]
        remote: bool,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long, conflicts_with = "yaml")]
        pretty: bool,

        /// Emit YAML instead of JSON
        #[arg(long)]
        yaml: bool,

        /// Emit only the promoted container entries
        #[arg(long)]
        components_only: bool,

        /// Fail (exit 1) if any reference could not be resolved
        #[arg(long)]
        strict: bool,
    },

    /// List the files reachable from a root document
    Related {
        /// Root document
        root: PathBuf,

        /// Collection directory (default: the root's directory)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Follow the http(s) references reachable from a document
    Remote {
        /// Document to start from
        root: PathBuf,
    },

    /// Validate a payload against a schema of a bundled document
    Validate {
        /// Root document
        document: PathBuf,

        /// Payload file (JSON or YAML)
        payload: PathBuf,

        /// Collection directory (default: the document's directory)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Local reference of the schema (e.g., #/components/schemas/Pet)
        #[arg(
            long,
            conflicts_with_all = ["path", "method"],
            required_unless_present = "path"
        )]
        pointer: Option<String>,

        /// Operation path (e.g., /pets)
        #[arg(long, requires = "method")]
        path: Option<String>,

        /// Operation method (e.g., post)
        #[arg(long, requires = "path")]
        method: Option<String>,

        /// Response status; validates the request body if omitted
        #[arg(long, requires = "path")]
        status: Option<String>,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Bundle {
            root,
            dir,
            spec_version,
            remote,
            output,
            pretty,
            yaml,
            components_only,
            strict,
        } => {
            let args = BundleArgs {
                root,
                dir,
                spec_version,
                remote,
                output,
                format: OutputFormat::from_flags(pretty, yaml),
                components_only,
                strict,
            };
            run_bundle(args).await
        }

        Commands::Related { root, dir, json } => run_related(&root, dir.as_deref(), json),

        Commands::Remote { root } => run_remote(&root).await,

        Commands::Validate {
            document,
            payload,
            dir,
            pointer,
            path,
            method,
            status,
            json,
        } => {
            let target = match (pointer, path, method) {
                (Some(pointer), _, _) => ValidationTarget::Pointer(pointer),
                (None, Some(path), Some(method)) => match status {
                    Some(status) => ValidationTarget::Response {
                        path,
                        method,
                        status,
                    },
                    None => ValidationTarget::RequestBody { path, method },
                },
                _ => {
                    report_error(json, "either --pointer or --path with --method is required");
                    return ExitCode::from(2);
                }
            };
            run_validate(&document, &payload, dir.as_deref(), &target, json)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// Logs go to stderr so stdout stays machine-readable. `RUST_LOG` wins over
/// `--verbose`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Clone, Copy)]
enum OutputFormat {
    Compact,
    Pretty,
    Yaml,
}

impl OutputFormat {
    fn from_flags(pretty: bool, yaml: bool) -> Self {
        if yaml {
            OutputFormat::Yaml
        } else if pretty {
            OutputFormat::Pretty
        } else {
            OutputFormat::Compact
        }
    }

    fn render<T: Serialize>(self, value: &T) -> Result<String, String> {
        match self {
            OutputFormat::Compact => serde_json::to_string(value).map_err(|e| e.to_string()),
            OutputFormat::Pretty => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
            OutputFormat::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
        }
    }
}

struct BundleArgs {
    root: PathBuf,
    dir: Option<PathBuf>,
    spec_version: Option<SpecVersion>,
    remote: bool,
    output: Option<PathBuf>,
    format: OutputFormat,
    components_only: bool,
    strict: bool,
}

/// A loaded collection and the name of its root document.
struct Collection {
    root_name: String,
    pool: Vec<DocumentNode>,
}

impl Collection {
    fn root(&self) -> Option<&DocumentNode> {
        self.pool.iter().find(|n| n.file_name == self.root_name)
    }
}

/// Load the collection around `root`, naming files relative to `dir`.
fn load_input(root: &Path, dir: Option<&Path>) -> Result<Collection, BundleError> {
    let root = root.canonicalize().map_err(|_| BundleError::FileNotFound {
        path: root.to_path_buf(),
    })?;
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let dir = dir
        .canonicalize()
        .map_err(|_| BundleError::FileNotFound { path: dir.clone() })?;

    let root_name = collection_name(&dir, &root).ok_or_else(|| BundleError::UnknownRoot {
        file: root.display().to_string(),
    })?;
    let pool = load_collection(&dir)?;
    if !pool.iter().any(|n| n.file_name == root_name) {
        return Err(BundleError::UnknownRoot { file: root_name });
    }
    debug!(root = %root_name, files = pool.len(), "collection ready");
    Ok(Collection { root_name, pool })
}

fn detect_version(collection: &Collection, explicit: Option<SpecVersion>) -> Result<SpecVersion, BundleError> {
    if let Some(version) = explicit {
        return Ok(version);
    }
    let Some(root) = collection.root() else {
        return Ok(SpecVersion::default());
    };
    let version = SpecVersion::detect(&parsed_content(root)?).unwrap_or_default();
    debug!(?version, "detected description version");
    Ok(version)
}

#[cfg(feature = "remote")]
fn http_fetcher() -> Result<Box<dyn RefFetcher>, u8> {
    api_bundler::HttpFetcher::new()
        .map(|f| Box::new(f) as Box<dyn RefFetcher>)
        .map_err(|e| {
            eprintln!("Error: {}", e);
            2u8
        })
}

#[cfg(not(feature = "remote"))]
fn http_fetcher() -> Result<Box<dyn RefFetcher>, u8> {
    eprintln!("Error: remote references require the `remote` feature");
    Err(2)
}

async fn run_bundle(args: BundleArgs) -> Result<(), u8> {
    let mut collection = load_input(&args.root, args.dir.as_deref()).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    let version = detect_version(&collection, args.spec_version).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let mut options = BundleOptions::new(version);
    if args.remote {
        let fetcher = http_fetcher()?;
        let fetched = resolve_pool_remote_refs(&collection.pool, fetcher.as_ref())
            .await
            .map_err(|e| {
                eprintln!("Error: {}", e);
                e.exit_code() as u8
            })?;
        info!(fetched = fetched.remote_refs.len(), "remote documents added to pool");
        for missing in &fetched.missing_remote_refs {
            report_missing(missing);
        }
        collection.pool.extend(fetched.documents);
        options = options.remote_pool(true);
    }

    let output = bundle_collection(&collection.root_name, &collection.pool, &options).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    for missing in &output.missing {
        report_missing(missing);
    }
    let has_missing = !output.missing.is_empty();

    let rendered = render_bundle(output, version, args.components_only, args.format).map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, &rendered).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", rendered.trim_end());
        }
    }

    if args.strict && has_missing {
        return Err(1);
    }
    Ok(())
}

fn render_bundle(
    output: BundleOutput,
    version: SpecVersion,
    components_only: bool,
    format: OutputFormat,
) -> Result<String, String> {
    if components_only {
        format.render(&output.components)
    } else {
        format.render(&output.into_document(version))
    }
}

fn report_missing(missing: &MissingRef) {
    match missing {
        MissingRef::Path { path } => eprintln!("warning: unresolved reference to {}", path),
        MissingRef::Unreachable { reference } => {
            eprintln!("warning: unreachable reference {}", reference)
        }
    }
}

fn run_related(root: &Path, dir: Option<&Path>, json_output: bool) -> Result<(), u8> {
    let collection = load_input(root, dir).map_err(|e| {
        report_error(json_output, &e.to_string());
        e.exit_code() as u8
    })?;
    let version = detect_version(&collection, None).map_err(|e| {
        report_error(json_output, &e.to_string());
        e.exit_code() as u8
    })?;
    let Some(root_node) = collection.root() else {
        report_error(json_output, &format!("unknown root document: {}", collection.root_name));
        return Err(3);
    };

    let traversal = related_files(root_node, &collection.pool, &BundleOptions::new(version))
        .map_err(|e| {
            report_error(json_output, &e.to_string());
            e.exit_code() as u8
        })?;

    if json_output {
        let rendered = serde_json::to_string(&traversal).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", rendered);
    } else {
        for file in &traversal.traverse_order {
            println!("{}", file);
        }
        for missing in &traversal.missing {
            report_missing(missing);
        }
    }
    Ok(())
}

#[cfg(feature = "remote")]
async fn fetch_remote_refs(document: &DocumentNode) -> Result<RemoteRefs, u8> {
    api_bundler::resolve_remote_refs_http(document)
        .await
        .map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })
}

#[cfg(not(feature = "remote"))]
async fn fetch_remote_refs(_document: &DocumentNode) -> Result<RemoteRefs, u8> {
    eprintln!("Error: remote references require the `remote` feature");
    Err(2)
}

async fn run_remote(root: &Path) -> Result<(), u8> {
    let file_name = root.display().to_string();
    let document = load_document(root, file_name).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    let found = fetch_remote_refs(&document).await?;

    let rendered = serde_json::to_string_pretty(&found).map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", rendered);
    Ok(())
}

fn run_validate(
    document: &Path,
    payload_path: &Path,
    dir: Option<&Path>,
    target: &ValidationTarget,
    json_output: bool,
) -> Result<(), u8> {
    let payload = load_document(payload_path, payload_path.display().to_string())
        .and_then(|node| parsed_content(&node))
        .map_err(|e| {
            report_error(json_output, &format!("loading payload: {}", e));
            e.exit_code() as u8
        })?;

    let collection = load_input(document, dir).map_err(|e| {
        report_error(json_output, &e.to_string());
        e.exit_code() as u8
    })?;
    let version = detect_version(&collection, None).map_err(|e| {
        report_error(json_output, &e.to_string());
        e.exit_code() as u8
    })?;
    let bundled = bundle_collection(
        &collection.root_name,
        &collection.pool,
        &BundleOptions::new(version),
    )
    .map_err(|e| {
        report_error(json_output, &e.to_string());
        e.exit_code() as u8
    })?
    .into_document(version);

    match validate_payload(&bundled, target, &payload) {
        Ok(()) => {
            if json_output {
                println!(r#"{{"valid":true}}"#);
            } else {
                println!("Valid");
            }
            Ok(())
        }
        Err(ValidateError::Invalid { errors }) => {
            if json_output {
                let output = serde_json::json!({
                    "valid": false,
                    "errors": errors
                });
                println!("{}", output);
            } else {
                eprintln!("Validation failed:");
                for error in errors {
                    eprintln!("  {}", error);
                }
            }
            Err(1)
        }
        Err(e) => {
            report_error(json_output, &e.to_string());
            Err(e.exit_code() as u8)
        }
    }
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({"valid": false, "error": msg}));
    } else {
        eprintln!("Error: {}", msg);
    }
}
