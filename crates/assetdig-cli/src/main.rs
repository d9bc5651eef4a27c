//! assetdig - Extract typed game tables from serialized asset containers
//!
//! This tool locates the block and resource databases in a directory of
//! `.assets` containers, decodes them with their type descriptions and emits
//! the records as JSON.

use anyhow::{bail, Context, Result};
use assetdig_core::{
    trim, Container, ContainerParser, DatabaseConfig, DatabaseDecoder, DecodeOptions, PathFilter,
    Schema, SchemaBuilder, TableMatches,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Type description of the block table
const BLOCK_SCHEMA: &str = include_str!("../../../schemas/Block.cs");
/// Type description of the resource table
const RESOURCE_SCHEMA: &str = include_str!("../../../schemas/ResourceItem.cs");

/// Extract block and resource databases from asset containers
#[derive(Parser, Debug)]
#[command(name = "assetdig")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the preload entries of one container or a directory of containers
    List(ListArgs),
    /// Write the payload of one behaviour to a file
    Dump(DumpArgs),
    /// Decode the block and resource tables to JSON
    Extract(ExtractArgs),
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single container
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory searched for *.assets containers
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ListArgs {
    #[command(flatten)]
    input: InputMode,

    /// Only show these path ids
    #[arg(long = "path-id")]
    path_ids: Vec<u64>,

    /// Print one JSON object per entry
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct DumpArgs {
    /// Container holding the behaviour
    #[arg(short, long)]
    file: PathBuf,

    /// Path id of the behaviour
    #[arg(short, long)]
    path_id: u64,

    /// Output file for the raw payload
    #[arg(short, long)]
    output: PathBuf,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Game data directory holding the *.assets containers
    #[arg(short, long, env = "ASSETDIG_DATA_DIR")]
    data_dir: PathBuf,

    /// Type description of the block table (defaults to the bundled one)
    #[arg(long)]
    block_schema: Option<PathBuf>,

    /// Type description of the resource table (defaults to the bundled one)
    #[arg(long)]
    resource_schema: Option<PathBuf>,

    /// Keep unavailable and equivalent blocks
    #[arg(long)]
    no_trim: bool,

    /// Print section coverage for every decoded block to stderr
    #[arg(long)]
    diagnostics: bool,

    /// Output file (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pretty-print the JSON
    #[arg(long)]
    pretty: bool,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,
}

/// One row of `list` output
#[derive(Debug, Serialize)]
struct Listing<'a> {
    file: &'a Path,
    path_id: u64,
    class_id: u32,
    size: usize,
    name: Option<&'a str>,
    fingerprint: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::List(args) => list(&args),
        Command::Dump(args) => dump(&args),
        Command::Extract(args) => extract(&args),
    }
}

/// Short content hash of a payload (first 8 chars of blake3)
fn fingerprint(payload: &[u8]) -> String {
    blake3::hash(payload).to_hex()[..8].to_string()
}

/// Whether a path looks like a serialized asset container
fn is_container(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false);
    !hidden && path.extension().and_then(|e| e.to_str()) == Some("assets")
}

/// Containers below `directory`, in file name order
fn find_containers(directory: &Path) -> Result<Vec<PathBuf>> {
    if !directory.exists() {
        bail!("Directory does not exist: {}", directory.display());
    }
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());
    let containers: Vec<PathBuf> = WalkDir::new(directory)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_container(e.path()))
        .map(|e| e.into_path())
        .collect();
    debug!("Found {} containers", containers.len());
    Ok(containers)
}

fn parse_container(path: &Path, filter: &PathFilter) -> Result<Container> {
    trace!("Parsing {}", path.display());
    ContainerParser::new()
        .parse_file(path, filter)
        .with_context(|| format!("Failed to parse container: {}", path.display()))
}

/// Collect both tables from `paths`, earlier files first.
#[cfg(not(feature = "parallel"))]
fn locate_tables(paths: &[PathBuf], config: &DatabaseConfig) -> TableMatches {
    let filter = config.path_filter();
    let mut matches = TableMatches::new();
    for path in paths {
        match parse_container(path, &filter) {
            Ok(container) => matches.collect(&container, config),
            Err(e) => warn!("{:#}", e),
        }
        if matches.is_complete() {
            debug!("Both tables found after {}", path.display());
            break;
        }
    }
    matches
}

/// Collect both tables from `paths`, earlier files first.
#[cfg(feature = "parallel")]
fn locate_tables(paths: &[PathBuf], config: &DatabaseConfig) -> TableMatches {
    use rayon::prelude::*;

    let filter = config.path_filter();
    let parsed: Vec<_> = paths
        .par_iter()
        .map(|path| parse_container(path, &filter))
        .collect();

    let mut matches = TableMatches::new();
    for result in parsed {
        match result {
            Ok(container) => matches.collect(&container, config),
            Err(e) => warn!("{:#}", e),
        }
    }
    matches
}

fn list(args: &ListArgs) -> Result<()> {
    let paths = match (&args.input.file, &args.input.directory) {
        (Some(file), _) => vec![file.clone()],
        (None, Some(directory)) => find_containers(directory)?,
        (None, None) => bail!("Either --file or --directory must be specified"),
    };
    let filter = if args.path_ids.is_empty() {
        PathFilter::All
    } else {
        PathFilter::only(args.path_ids.iter().copied())
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for path in &paths {
        let container = match parse_container(path, &filter) {
            Ok(container) => container,
            Err(e) if args.input.directory.is_some() => {
                // Keep going with the remaining files
                warn!("{:#}", e);
                continue;
            }
            Err(e) => return Err(e),
        };

        for (path_id, asset) in &container.assets {
            let behaviour = asset.behaviour.as_ref();
            let row = Listing {
                file: path,
                path_id: *path_id,
                class_id: asset.entry.class.class_id,
                size: asset.entry.size,
                name: behaviour.map(|b| b.name.as_str()),
                fingerprint: behaviour.map(|b| fingerprint(&b.payload)),
            };
            if args.json {
                writeln!(out, "{}", serde_json::to_string(&row)?)?;
            } else {
                writeln!(
                    out,
                    "{}\t{:>8}\t{:>4}\t{:>9}\t{}\t{}",
                    row.file.display(),
                    row.path_id,
                    row.class_id,
                    row.size,
                    row.fingerprint.as_deref().unwrap_or("-"),
                    row.name.unwrap_or("-")
                )?;
            }
        }
    }
    Ok(())
}

fn dump(args: &DumpArgs) -> Result<()> {
    let container = parse_container(&args.file, &PathFilter::only([args.path_id]))?;
    let Some(asset) = container.assets.get(&args.path_id) else {
        bail!("No preload entry with path id {} in {}", args.path_id, args.file.display());
    };
    let Some(behaviour) = &asset.behaviour else {
        bail!(
            "Path id {} is class {}, not a readable behaviour",
            args.path_id,
            asset.entry.class.class_id
        );
    };

    write_output(&args.output, &behaviour.payload, args.force)?;
    println!(
        "Wrote {} ({} bytes, '{}')",
        args.output.display(),
        behaviour.payload.len(),
        behaviour.name
    );
    Ok(())
}

/// Build a schema from a file, or from the bundled description
fn load_schema(builder: &mut SchemaBuilder, path: Option<&Path>, bundled: &str) -> Result<Schema> {
    let text = match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read type description: {}", path.display()))?,
        None => bundled.to_string(),
    };
    builder.build(&text).context("Failed to build schema")
}

fn extract(args: &ExtractArgs) -> Result<()> {
    let config = DatabaseConfig::new();

    let mut builder = config.schema_builder();
    let block_schema = load_schema(&mut builder, args.block_schema.as_deref(), BLOCK_SCHEMA)?;
    let resource_schema =
        load_schema(&mut builder, args.resource_schema.as_deref(), RESOURCE_SCHEMA)?;

    let containers = find_containers(&args.data_dir)?;
    let (blocks, resources) = locate_tables(&containers, &config)
        .into_tables(&config)
        .with_context(|| format!("Searched {} containers", containers.len()))?;
    info!("Block table {} bytes, resource table {} bytes", blocks.len(), resources.len());

    let mut database = DatabaseDecoder::new(&block_schema, &resource_schema, config)
        .with_options(DecodeOptions::new().diagnostics(args.diagnostics))
        .unpack(&blocks, &resources)
        .context("Failed to decode tables")?;

    if args.diagnostics {
        for coverage in &database.coverage {
            eprintln!("{coverage}");
        }
    }
    if !database.skipped.is_empty() || database.unresolved > 0 {
        warn!(
            "Skipped {} suspicious and {} unresolved blocks",
            database.skipped.len(),
            database.unresolved
        );
    }

    if !args.no_trim {
        let stats = trim(&mut database.blocks);
        eprintln!(
            "Trimmed blocks: {} unavailable, {} equivalent.",
            stats.unavailable, stats.equivalent
        );
    }

    let json = if args.pretty {
        serde_json::to_string_pretty(&database)?
    } else {
        serde_json::to_string(&database)?
    };

    match &args.output {
        Some(path) => {
            write_output(path, json.as_bytes(), args.force)?;
            eprintln!(
                "Wrote {} blocks and {} resources to {}",
                database.blocks.len(),
                database.resources.len(),
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Write a file, creating parent directories
fn write_output(output_path: &Path, content: &[u8], force: bool) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if output_path.exists() && !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            output_path.display()
        );
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;
    file.write_all(content)
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}
