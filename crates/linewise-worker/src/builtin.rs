//! Built-in handlers for the four task types.
//!
//! File work runs on the blocking pool and checks the task's cancellation
//! token before every raw read, so an abandoned task stops at the next chunk
//! boundary.

use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use linewise_core::{AnalyzeError, ChunkData, StreamConfig, TaskError};
use linewise_stream::{ChunkReader, StreamAnalyzer, search_chunk};

use crate::handler::{HandlerResult, TaskContext};
use crate::worker::panic_message;

/// Default cap for `read-file` content.
pub const DEFAULT_READ_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeFileRequest {
    path: PathBuf,
    #[serde(default)]
    chunk_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadFileRequest {
    path: PathBuf,
    #[serde(default)]
    max_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ParseAstRequest {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RunDetectorRequest {
    path: PathBuf,
    detector: String,
    patterns: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileContent {
    path: PathBuf,
    size: u64,
    lines: usize,
    content: String,
    truncated: bool,
}

/// Bracket-structure summary of a source file.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Outline {
    path: PathBuf,
    lines: usize,
    blank_lines: usize,
    max_depth: usize,
    balanced: bool,
    #[serde(skip)]
    depth: usize,
    #[serde(skip)]
    unmatched: usize,
}

#[derive(Debug, Serialize)]
struct DetectorMatch {
    pattern: String,
    line: usize,
    column: usize,
    #[serde(rename = "match")]
    matched: String,
    text: String,
}

#[derive(Debug, Serialize)]
struct DetectorReport {
    detector: String,
    path: PathBuf,
    matches: Vec<DetectorMatch>,
}

pub(crate) async fn analyze_file(ctx: TaskContext, mut config: StreamConfig) -> HandlerResult {
    let request: AnalyzeFileRequest = ctx.payload()?;
    if let Some(chunk_size) = request.chunk_size {
        if chunk_size == 0 {
            return Err(TaskError::invalid_payload("chunkSize must be greater than zero"));
        }
        config.chunk_size = chunk_size;
    }

    let cancel = ctx.cancel.clone();
    let analysis = blocking(move || {
        StreamAnalyzer::with_config(config)
            .analyze_file_cancellable(&request.path, &cancel)
            .map_err(TaskError::from)
    })
    .await?;

    to_json(&analysis)
}

pub(crate) async fn read_file(ctx: TaskContext, config: StreamConfig) -> HandlerResult {
    let request: ReadFileRequest = ctx.payload()?;
    let limit = request.max_bytes.unwrap_or(DEFAULT_READ_LIMIT);

    let cancel = ctx.cancel.clone();
    let content = blocking(move || {
        let mut reader = ChunkReader::open(&request.path, &config)?;
        let mut out = FileContent {
            path: request.path.clone(),
            size: reader.file_size(),
            lines: 0,
            content: String::new(),
            truncated: false,
        };

        'chunks: while let Some(chunk) = next_chunk(&mut reader, &cancel)? {
            for line in chunk.lines {
                let separator = usize::from(out.lines > 0);
                if out.content.len() + separator + line.len() > limit {
                    out.truncated = true;
                    break 'chunks;
                }
                if separator == 1 {
                    out.content.push('\n');
                }
                out.content.push_str(&line);
                out.lines += 1;
            }
        }

        Ok(out)
    })
    .await?;

    to_json(&content)
}

pub(crate) async fn parse_ast(ctx: TaskContext, config: StreamConfig) -> HandlerResult {
    let request: ParseAstRequest = ctx.payload()?;

    let cancel = ctx.cancel.clone();
    let outline = blocking(move || {
        let mut reader = ChunkReader::open(&request.path, &config)?;
        let mut outline = Outline {
            path: request.path.clone(),
            ..Outline::default()
        };

        while let Some(chunk) = next_chunk(&mut reader, &cancel)? {
            for line in &chunk.lines {
                outline.feed_line(line);
            }
        }

        outline.balanced = outline.depth == 0 && outline.unmatched == 0;
        Ok(outline)
    })
    .await?;

    to_json(&outline)
}

pub(crate) async fn run_detector(ctx: TaskContext, config: StreamConfig) -> HandlerResult {
    let request: RunDetectorRequest = ctx.payload()?;
    if request.patterns.is_empty() {
        return Err(TaskError::invalid_payload("detector has no patterns"));
    }

    let compiled = request
        .patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| TaskError::invalid_payload(format!("invalid pattern '{p}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(
        task_id = %ctx.task_id,
        detector = %request.detector,
        patterns = compiled.len(),
        "running detector"
    );

    let cancel = ctx.cancel.clone();
    let report = blocking(move || {
        let mut reader = ChunkReader::open(&request.path, &config)?;
        let mut matches = Vec::new();

        while let Some(chunk) = next_chunk(&mut reader, &cancel)? {
            for (source, pattern) in request.patterns.iter().zip(&compiled) {
                matches.extend(search_chunk(&chunk, pattern).into_iter().map(|r| {
                    DetectorMatch {
                        pattern: source.clone(),
                        line: r.line,
                        column: r.column,
                        matched: r.matched,
                        text: r.text,
                    }
                }));
            }
        }
        matches.sort_by_key(|m| (m.line, m.column));

        Ok(DetectorReport {
            detector: request.detector,
            path: request.path,
            matches,
        })
    })
    .await?;

    to_json(&report)
}

impl Outline {
    fn feed_line(&mut self, line: &str) {
        self.lines += 1;
        if line.trim().is_empty() {
            self.blank_lines += 1;
            return;
        }

        let mut quote: Option<char> = None;
        let mut escaped = false;
        let mut prev = '\0';

        for c in line.chars() {
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                continue;
            }

            match c {
                '"' | '\'' | '`' => quote = Some(c),
                '/' if prev == '/' => break,
                '{' | '(' | '[' => {
                    self.depth += 1;
                    self.max_depth = self.max_depth.max(self.depth);
                }
                '}' | ')' | ']' => {
                    if self.depth == 0 {
                        self.unmatched += 1;
                    } else {
                        self.depth -= 1;
                    }
                }
                _ => {}
            }
            prev = c;
        }
    }
}

/// Pull the next chunk unless the task was abandoned.
fn next_chunk(
    reader: &mut ChunkReader,
    cancel: &CancellationToken,
) -> Result<Option<ChunkData>, TaskError> {
    if cancel.is_cancelled() {
        return Err(AnalyzeError::Interrupted.into());
    }
    reader.next().transpose().map_err(TaskError::from)
}

/// Run file work on the blocking pool, turning panics into handler errors.
async fn blocking<T, F>(f: F) -> Result<T, TaskError>
where
    F: FnOnce() -> Result<T, TaskError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(TaskError::handler(format!(
            "handler panicked: {}",
            panic_message(&*err.into_panic())
        ))),
        Err(_) => Err(TaskError::handler("handler was cancelled")),
    }
}

fn to_json<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| TaskError::handler(e.to_string()))
}
