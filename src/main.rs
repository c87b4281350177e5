//! lw - stream large files line by line without loading them into memory.
//!
//! Usage:
//!   lw analyze FILE...           Count lines, bytes and chunks
//!   lw search FILE PATTERN       Regex search with line/column positions
//!   lw chunks FILE               Show the chunk layout of a file
//!   lw run DIR                   Analyze a directory tree on a worker pool
//!   lw --help                    Show help

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use regex::Regex;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use linewise_stream::{StreamAnalyzer, StreamConfig};
use linewise_worker::{HandlerTable, PoolConfig, Task, TaskResult, TaskType, WorkerPool};

#[derive(Parser)]
#[command(
    name = "lw",
    version,
    about = "Bounded-memory streaming file analyzer",
    long_about = "lw reads files in fixed-size windows and reassembles lines across \
                  window boundaries, so memory use stays flat no matter how large \
                  the input is."
)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Bytes per raw read (e.g., "64KB", "1MB")
    #[arg(short, long, default_value = "64KB", global = true)]
    chunk_size: String,

    /// Soft memory ceiling in megabytes
    #[arg(long, default_value = "100", global = true)]
    max_memory_mb: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Count lines, bytes and chunks of one or more files
    Analyze {
        /// Files to analyze
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Find regex matches in a file
    Search {
        /// File to search
        file: PathBuf,

        /// Regular expression
        pattern: String,

        /// Maximum number of matches to print
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show how a file is split into chunks
    Chunks {
        /// File to read
        file: PathBuf,

        /// Stop after this many chunks
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Walk a directory and dispatch one task per file to a worker pool
    Run {
        /// Directory to walk
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Number of workers (0 = one per CPU)
        #[arg(short, long, default_value = "0")]
        workers: usize,

        /// Per-task timeout (e.g., "500ms", "30s", "2m")
        #[arg(short, long, default_value = "30s")]
        timeout: String,

        /// Run a detector with these patterns instead of analyzing
        #[arg(short, long = "pattern")]
        patterns: Vec<String>,

        /// Detector name reported in results
        #[arg(short, long, default_value = "cli")]
        detector: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = StreamConfig::builder()
        .chunk_size(parse_size(&cli.chunk_size)?)
        .max_memory_mb(cli.max_memory_mb)
        .build()
        .map_err(|e| eyre!("Invalid configuration: {e}"))?;

    match cli.command {
        Command::Analyze { files, format } => run_analyze(config, &files, format)?,
        Command::Search {
            file,
            pattern,
            limit,
            format,
        } => run_search(config, &file, &pattern, limit, format)?,
        Command::Chunks { file, limit } => run_chunks(config, &file, limit)?,
        Command::Run {
            path,
            workers,
            timeout,
            patterns,
            detector,
            format,
        } => {
            let job = PoolJob {
                root: path,
                workers,
                timeout: parse_duration(&timeout)?,
                patterns,
                detector,
                format,
            };
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(run_pool(config, job))?;
        }
    }

    Ok(())
}

/// Initialize tracing on stderr.
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
        .with_target(verbose >= 2)
        .with_thread_ids(verbose >= 3)
        .with_line_number(verbose >= 3)
        .init();
}

fn run_analyze(config: StreamConfig, files: &[PathBuf], format: OutputFormat) -> Result<()> {
    let analyzer = StreamAnalyzer::with_config(config);
    let results = analyzer.analyze_many(files);

    let mut failures = 0usize;

    match format {
        OutputFormat::Json => {
            let entries: Vec<_> = results
                .iter()
                .map(|(path, result)| match result {
                    Ok(analysis) => serde_json::to_value(analysis).unwrap_or_default(),
                    Err(err) => {
                        failures += 1;
                        json!({ "filePath": path, "error": err.to_string() })
                    }
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            for (path, result) in &results {
                match result {
                    Ok(a) => println!(
                        "{:<40} {:>10} lines {:>10} {:>6} chunks {:>8.1?}  {}/s",
                        truncate(&path.display().to_string(), 40),
                        a.lines,
                        format_size(a.size),
                        a.chunks,
                        a.duration,
                        format_size(a.bytes_per_second() as u64),
                    ),
                    Err(err) => {
                        failures += 1;
                        eprintln!("{}: {}", path.display(), err);
                    }
                }
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} file(s) failed", results.len());
    }
    Ok(())
}

fn run_search(
    config: StreamConfig,
    file: &Path,
    pattern: &str,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let regex = Regex::new(pattern).with_context(|| format!("Invalid pattern '{pattern}'"))?;
    let analyzer = StreamAnalyzer::with_config(config);

    let mut results = analyzer
        .search_file(file, &regex)
        .with_context(|| format!("Search failed for {}", file.display()))?;
    let total = results.len();
    if let Some(limit) = limit {
        results.truncate(limit);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Text => {
            for r in &results {
                println!("{}:{}:{}: {}", file.display(), r.line, r.column, r.text);
            }
            if total > results.len() {
                eprintln!("... and {} more", total - results.len());
            }
        }
    }

    Ok(())
}

fn run_chunks(config: StreamConfig, file: &Path, limit: Option<usize>) -> Result<()> {
    let analyzer = StreamAnalyzer::with_config(config);
    let reader = analyzer
        .read_chunks(file)
        .with_context(|| format!("Cannot open {}", file.display()))?;

    println!("{} ({})", file.display(), format_size(reader.file_size()));

    for chunk in reader.take(limit.unwrap_or(usize::MAX)) {
        let chunk = chunk?;
        println!(
            "  #{:<6} lines {:>8}..{:<8} offset {:>10} read {:>8}",
            chunk.index,
            chunk.start_line,
            chunk.end_line,
            chunk.byte_offset,
            format_size(chunk.size as u64),
        );
    }

    Ok(())
}

struct PoolJob {
    root: PathBuf,
    workers: usize,
    timeout: Duration,
    patterns: Vec<String>,
    detector: String,
    format: OutputFormat,
}

async fn run_pool(config: StreamConfig, job: PoolJob) -> Result<()> {
    for pattern in &job.patterns {
        Regex::new(pattern).with_context(|| format!("Invalid pattern '{pattern}'"))?;
    }

    let files = collect_files(&job.root)?;
    eprintln!("Dispatching {} file(s) from {}...", files.len(), job.root.display());

    let pool_config = PoolConfig::builder()
        .workers(job.workers)
        .default_timeout(job.timeout)
        .build()
        .map_err(|e| eyre!("Invalid configuration: {e}"))?;
    let pool = WorkerPool::start(pool_config, Arc::new(HandlerTable::builtin(config)))
        .context("Failed to start worker pool")?;

    let pending: Vec<_> = files
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let task = if job.patterns.is_empty() {
                Task::new(format!("{i}"), TaskType::AnalyzeFile, json!({ "path": path }))
            } else {
                Task::new(
                    format!("{i}"),
                    TaskType::RunDetector,
                    json!({ "path": path, "detector": job.detector, "patterns": job.patterns }),
                )
            };
            pool.submit(task, None)
        })
        .collect();

    let mut results = Vec::with_capacity(pending.len());
    for pending in pending {
        results.push(pending.await);
    }
    pool.shutdown().await;

    let failures = results.iter().filter(|r| !r.success).count();

    match job.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Text => {
            for (path, result) in files.iter().zip(&results) {
                print_result(path, result);
            }
            println!();
            println!("{} task(s), {} failed", results.len(), failures);
        }
    }

    Ok(())
}

fn print_result(path: &Path, result: &TaskResult) {
    let name = truncate(&path.display().to_string(), 50);

    let Some(data) = result.data.as_ref().filter(|_| result.success) else {
        println!(
            "{name:<50} worker {:<3} FAILED {}",
            result.worker_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
        return;
    };

    if let Some(matches) = data.get("matches").and_then(|m| m.as_array()) {
        println!("{name:<50} worker {:<3} {} match(es)", result.worker_id, matches.len());
        for m in matches {
            println!(
                "    {}:{} {}",
                m["line"],
                m["column"],
                m["text"].as_str().unwrap_or_default().trim()
            );
        }
    } else {
        println!(
            "{name:<50} worker {:<3} {:>8} lines {:>10} {:>6.1?}",
            result.worker_id,
            data["lines"],
            format_size(data["size"].as_u64().unwrap_or(0)),
            result.duration,
        );
    }
}

/// Collect regular files under `root`, sorted for stable task ids.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in jwalk::WalkDir::new(root).skip_hidden(true).sort(true) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.path()),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "skipping unreadable entry"),
        }
    }

    if files.is_empty() {
        bail!("No files found under {}", root.display());
    }
    Ok(files)
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to max chars.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

/// Parse a size string (e.g., "512", "64KB", "1MB").
fn parse_size(s: &str) -> Result<usize> {
    let s = s.trim().to_uppercase();
    let digits = s.trim_end_matches(|c: char| !c.is_ascii_digit() && c != '.');
    let unit = &s[digits.len()..];

    let multiplier: f64 = match unit {
        "" | "B" => 1.0,
        "K" | "KB" => 1024.0,
        "M" | "MB" => 1024.0 * 1024.0,
        "G" | "GB" => 1024.0 * 1024.0 * 1024.0,
        other => bail!("Unknown size unit '{other}'"),
    };
    let num: f64 = digits
        .parse()
        .with_context(|| format!("Invalid size '{s}'"))?;

    Ok((num * multiplier) as usize)
}

/// Parse a duration string (e.g., "500ms", "30s", "2m").
fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    let (num, seconds) = if let Some(n) = s.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600.0)
    } else {
        (s.as_str(), 1.0) // Default to seconds
    };

    let num: f64 = num
        .parse()
        .with_context(|| format!("Invalid duration '{s}'"))?;
    if num <= 0.0 || !num.is_finite() {
        bail!("Duration must be positive: '{s}'");
    }

    Ok(Duration::from_secs_f64(num * seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("64KB").unwrap(), 64 * 1024);
        assert_eq!(parse_size("1m").unwrap(), 1024 * 1024);
        assert!(parse_size("3 parsecs").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
        assert!(parse_duration("0s").is_err());
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééé", 3), "éé…");
    }
}
