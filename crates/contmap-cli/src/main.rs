//! contmap - Map the byte-level structure of container files
//!
//! This tool recursively decomposes PDF, MPEG audio, JPEG and zlib data into
//! sections, segments and fragments and writes one JSON report per input
//! file.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, ValueEnum};
use contmap_core::mapping::DEFAULT_MAX_DEPTH;
use contmap_core::{MappingConfig, MimeTable, Section, StructureMapper, UNCOVERED_KEY};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Map the byte-level structure of container files
#[derive(Parser, Debug)]
#[command(name = "contmap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Descend into subdirectories in directory mode
    #[arg(short, long)]
    recursive: bool,

    /// Output directory for reports
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Maximum recursion depth for embedded structures
    #[arg(long, env = "CONTMAP_MAX_DEPTH", default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// JSON mime table replacing the built-in one
    #[arg(long, env = "CONTMAP_MIME_TABLE")]
    mime_table: Option<PathBuf>,

    /// Overwrite existing reports
    #[arg(long)]
    force: bool,

    /// Conflict resolution strategy for inputs sharing a file name
    #[arg(long, value_enum, default_value = "hash-suffix")]
    conflict_strategy: ConflictStrategy,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single file to map
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of files to map
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Compact JSON report file
    Json,
    /// Indented JSON report file
    Pretty,
    /// One line per section on stdout, no report file
    Summary,
}

/// Strategy for resolving naming conflicts
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictStrategy {
    /// Append a short content hash: file~a1b2c3d4.json
    HashSuffix,
    /// Skip conflicting files (keep first occurrence only)
    SkipConflicts,
}

#[derive(Serialize)]
struct Report<'a> {
    meta: ReportMeta<'a>,
    sections: &'a [Section],
}

#[derive(Serialize)]
struct ReportMeta<'a> {
    file: FileMeta<'a>,
    mapping: MappingMeta,
}

#[derive(Serialize)]
struct FileMeta<'a> {
    name: &'a str,
    size: usize,
    blake3: &'a str,
}

#[derive(Serialize)]
struct MappingMeta {
    max_depth: usize,
    sections: usize,
}

/// Tracks mapped inputs for deduplication
#[derive(Default)]
struct ReportRegistry {
    /// Maps input file name -> (content_hash, output_path)
    seen: HashMap<String, Vec<(String, PathBuf)>>,
    /// Statistics
    stats: RegistryStats,
}

#[derive(Default)]
struct RegistryStats {
    total_found: usize,
    duplicates_skipped: usize,
    conflicts_renamed: usize,
    written: usize,
}

impl ReportRegistry {
    fn new() -> Self {
        Self::default()
    }

    /// Compute a short hash of the content (first 8 chars of blake3)
    fn short_hash(content_hash: &str) -> &str {
        &content_hash[..8]
    }

    /// Check if identical content was already mapped under any name
    fn is_duplicate(&self, content_hash: &str) -> bool {
        self.seen
            .values()
            .flatten()
            .any(|(h, _)| h == content_hash)
    }

    /// Get the number of variants we've seen for this filename
    fn variant_count(&self, filename: &str) -> usize {
        self.seen.get(filename).map(|e| e.len()).unwrap_or(0)
    }

    /// Register an input file and return the resolved report path
    fn register(
        &mut self,
        filename: &str,
        content_hash: &str,
        output_dir: &Path,
        strategy: ConflictStrategy,
    ) -> Option<PathBuf> {
        self.stats.total_found += 1;

        if self.is_duplicate(content_hash) {
            debug!("Skipping duplicate: {} (hash: {})", filename, content_hash);
            self.stats.duplicates_skipped += 1;
            return None;
        }

        let report_name = format!("{}.json", filename);
        let output_path = if self.variant_count(filename) == 0 {
            output_dir.join(report_name)
        } else {
            match strategy {
                ConflictStrategy::SkipConflicts => {
                    debug!(
                        "Skipping conflict: {} (different content, hash: {})",
                        filename, content_hash
                    );
                    self.stats.duplicates_skipped += 1;
                    return None;
                }
                ConflictStrategy::HashSuffix => {
                    let new_name = Self::add_suffix(
                        &report_name,
                        &format!("~{}", Self::short_hash(content_hash)),
                    );
                    info!(
                        "Conflict resolved: {} -> {} (content differs)",
                        report_name, new_name
                    );
                    self.stats.conflicts_renamed += 1;
                    output_dir.join(new_name)
                }
            }
        };

        self.seen
            .entry(filename.to_string())
            .or_default()
            .push((content_hash.to_string(), output_path.clone()));

        Some(output_path)
    }

    /// Add a suffix before the .json extension
    fn add_suffix(filename: &str, suffix: &str) -> String {
        if let Some(stem) = filename.strip_suffix(".json") {
            format!("{}{}.json", stem, suffix)
        } else {
            format!("{}{}", filename, suffix)
        }
    }

    fn print_summary(&self) {
        info!(
            "Summary: {} mapped, {} duplicates skipped, {} conflicts renamed, {} written",
            self.stats.total_found,
            self.stats.duplicates_skipped,
            self.stats.conflicts_renamed,
            self.stats.written
        );
    }
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

    let mapper = build_mapper(&cli)?;

    if let Some(ref file) = cli.input.file {
        process_single_file(&cli, &mapper, file)
    } else if let Some(ref directory) = cli.input.directory {
        process_directory(&cli, &mapper, directory)
    } else {
        bail!("Either --file or --directory must be specified")
    }
}

/// Build the mapper from the command line options
fn build_mapper(cli: &Cli) -> Result<StructureMapper> {
    let mut mapper = StructureMapper::with_config(MappingConfig::new().max_depth(cli.max_depth));
    if let Some(ref path) = cli.mime_table {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read mime table: {}", path.display()))?;
        let table = MimeTable::from_json(&json)
            .with_context(|| format!("Invalid mime table: {}", path.display()))?;
        debug!("Loaded {} mime types from {}", table.len(), path.display());
        mapper = mapper.with_mime_table(table);
    }
    Ok(mapper)
}

/// Process a single input file
fn process_single_file(cli: &Cli, mapper: &StructureMapper, file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("Input file does not exist: {}", file.display());
    }
    if !file.is_file() {
        bail!("Input path is not a file: {}", file.display());
    }

    let mut registry = ReportRegistry::new();
    process_file(cli, mapper, file, &mut registry)?;

    if cli.format != OutputFormat::Summary {
        registry.print_summary();
    }

    Ok(())
}

/// Process every visible file of a directory
fn process_directory(cli: &Cli, mapper: &StructureMapper, directory: &Path) -> Result<()> {
    if !directory.exists() {
        bail!("Directory does not exist: {}", directory.display());
    }
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());

    let mut registry = ReportRegistry::new();
    let mut files_processed = 0;

    let max_depth = if cli.recursive { usize::MAX } else { 1 };
    for entry in WalkDir::new(directory)
        .follow_links(false)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        // Skip hidden files
        if is_hidden(path) {
            trace!("Skipping hidden file: {}", path.display());
            continue;
        }

        debug!("Processing file: {}", path.display());
        if let Err(e) = process_file(cli, mapper, path, &mut registry) {
            // Log error but continue with other files
            warn!("Error processing {}: {:#}", path.display(), e);
        }
        files_processed += 1;
    }

    info!("Processed {} files", files_processed);

    if cli.format != OutputFormat::Summary {
        registry.print_summary();
    }

    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Map one file and emit its report
fn process_file(
    cli: &Cli,
    mapper: &StructureMapper,
    path: &Path,
    registry: &mut ReportRegistry,
) -> Result<()> {
    trace!("Reading {}", path.display());
    let data =
        fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))?;
    let content_hash = blake3::hash(&data).to_hex().to_string();
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();

    let sections = mapper
        .map(&data)
        .with_context(|| format!("Failed to map file: {}", path.display()))?;

    debug!(
        "Mapped {} section(s) in {}",
        sections.len(),
        path.display()
    );

    if cli.format == OutputFormat::Summary {
        print_summary(&filename, &sections);
        return Ok(());
    }

    let Some(output_path) =
        registry.register(&filename, &content_hash, &cli.output, cli.conflict_strategy)
    else {
        return Ok(());
    };

    let report = Report {
        meta: ReportMeta {
            file: FileMeta {
                name: &filename,
                size: data.len(),
                blake3: &content_hash,
            },
            mapping: MappingMeta {
                max_depth: mapper.config().max_depth,
                sections: sections.len(),
            },
        },
        sections: &sections,
    };
    let content = render_report(&report, cli.format == OutputFormat::Pretty)?;

    match write_report(&output_path, &content, cli.force) {
        Ok(()) => {
            println!("Wrote {}", output_path.display());
            registry.stats.written += 1;
        }
        Err(e) => {
            error!("Failed to write {}: {:#}", output_path.display(), e);
        }
    }

    Ok(())
}

fn render_report(report: &Report<'_>, pretty: bool) -> Result<String> {
    let content = if pretty {
        serde_json::to_string_pretty(report)
    } else {
        serde_json::to_string(report)
    };
    content.context("Failed to serialize report")
}

/// Print one line per section
fn print_summary(filename: &str, sections: &[Section]) {
    println!("{}", filename);
    for section in sections {
        let uncovered: usize = section
            .segment(UNCOVERED_KEY)
            .map(|s| s.fragments().iter().map(|f| f.length).sum())
            .unwrap_or(0);
        let length = section
            .length()
            .map_or_else(|| "?".to_string(), |l| l.to_string());
        println!(
            "{:indent$}{} at {} ({} bytes, {} segments, {} uncovered)",
            "",
            section.mime_type(),
            section.position(),
            length,
            section.segments().count(),
            uncovered,
            indent = 2 * (section.analysis_depth() + 1)
        );
    }
}

/// Write a report to disk
fn write_report(output_path: &Path, content: &str, force: bool) -> Result<()> {
    // Create parent directories
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    // Check if file exists
    if output_path.exists() && !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            output_path.display()
        );
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;

    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}
