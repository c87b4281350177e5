//! Bounded-memory file analyzer built on [`ChunkReader`].

use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use regex::Regex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use linewise_core::{
    AnalyzeError, ChunkData, FileAnalysis, ProcessSampler, SearchResult, StreamConfig,
};

use crate::events::AnalyzerEvent;
use crate::reader::ChunkReader;
use crate::search::search_chunk;

/// Streaming analyzer that never holds more than one read window plus the
/// carry-over line in memory per call.
///
/// Calls share no mutable state; the only shared piece is the event
/// channel, which is safe to publish to from any thread.
#[derive(Clone)]
pub struct StreamAnalyzer {
    config: StreamConfig,
    events_tx: broadcast::Sender<AnalyzerEvent>,
}

impl StreamAnalyzer {
    /// Create an analyzer with default configuration.
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    /// Create an analyzer with custom configuration.
    pub fn with_config(config: StreamConfig) -> Self {
        let (events_tx, _) = broadcast::channel(100);
        Self { config, events_tx }
    }

    /// Active configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Subscribe to telemetry events.
    pub fn subscribe(&self) -> broadcast::Receiver<AnalyzerEvent> {
        self.events_tx.subscribe()
    }

    /// Open a lazy chunk sequence for `path`.
    pub fn read_chunks(&self, path: impl AsRef<Path>) -> Result<ChunkReader, AnalyzeError> {
        ChunkReader::open(path, &self.config)
    }

    /// Drain `path` and return aggregate counters.
    pub fn analyze_file(&self, path: impl AsRef<Path>) -> Result<FileAnalysis, AnalyzeError> {
        self.analyze(path.as_ref(), None)
    }

    /// Like [`analyze_file`](Self::analyze_file), but stops with
    /// [`AnalyzeError::Interrupted`] once `cancel` fires. The token is checked
    /// before every raw read.
    pub fn analyze_file_cancellable(
        &self,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<FileAnalysis, AnalyzeError> {
        self.analyze(path.as_ref(), Some(cancel))
    }

    /// Invoke `handler` once per chunk, in order, collecting its returns.
    pub fn process_file<T, F>(
        &self,
        path: impl AsRef<Path>,
        mut handler: F,
    ) -> Result<Vec<T>, AnalyzeError>
    where
        F: FnMut(ChunkData) -> T,
    {
        self.read_chunks(path)?
            .map(|chunk| chunk.map(&mut handler))
            .collect()
    }

    /// Find every match of `pattern` in `path`, in document order.
    ///
    /// Matching runs line by line over the chunk stream, so a match never
    /// spans a line terminator. Each line is a separate haystack: `^` and `$`
    /// anchor at every line and a pattern containing `\n` never matches.
    pub fn search_file(
        &self,
        path: impl AsRef<Path>,
        pattern: &Regex,
    ) -> Result<Vec<SearchResult>, AnalyzeError> {
        let mut results = Vec::new();

        for chunk in self.read_chunks(path)? {
            results.extend(search_chunk(&chunk?, pattern));
        }

        Ok(results)
    }

    /// Analyze several files concurrently on the rayon pool.
    ///
    /// Results keep the order of `paths`; one failing file does not affect
    /// the others.
    pub fn analyze_many<P>(
        &self,
        paths: &[P],
    ) -> Vec<(PathBuf, Result<FileAnalysis, AnalyzeError>)>
    where
        P: AsRef<Path> + Sync,
    {
        paths
            .par_iter()
            .map(|path| {
                let path = path.as_ref();
                (path.to_path_buf(), self.analyze_file(path))
            })
            .collect()
    }

    fn analyze(
        &self,
        path: &Path,
        cancel: Option<&CancellationToken>,
    ) -> Result<FileAnalysis, AnalyzeError> {
        let start = Instant::now();
        let mut reader = self.read_chunks(path)?;
        let size = reader.file_size();
        let mut monitor = MemoryMonitor::new(&self.config);

        tracing::debug!(path = %path.display(), size, "analyzing file");

        let mut lines = 0usize;
        let mut chunks = 0usize;

        loop {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                tracing::debug!(path = %path.display(), chunks, "analysis interrupted");
                return Err(AnalyzeError::Interrupted);
            }

            let Some(chunk) = reader.next() else {
                break;
            };
            let chunk = chunk?;

            lines += chunk.lines.len();
            chunks += 1;

            if self.has_subscribers() {
                self.emit(AnalyzerEvent::Chunk {
                    path: path.to_path_buf(),
                    index: chunk.index,
                    lines: chunk.lines.len(),
                    bytes: chunk.size,
                });
            }

            if chunk.index % self.config.memory_sample_interval == 0 {
                self.sample_memory(path, &mut monitor);
            }
        }
        self.sample_memory(path, &mut monitor);

        let analysis = FileAnalysis {
            file_path: path.to_path_buf(),
            lines,
            size,
            chunks,
            duration: start.elapsed(),
            memory_used: monitor.growth(),
        };

        tracing::debug!(
            path = %path.display(),
            lines,
            chunks,
            elapsed_ms = analysis.duration.as_millis() as u64,
            "analysis complete"
        );

        self.emit(AnalyzerEvent::Complete(analysis.clone()));
        Ok(analysis)
    }

    fn sample_memory(&self, path: &Path, monitor: &mut MemoryMonitor) {
        let used_bytes = monitor.sample();

        if self.has_subscribers() {
            self.emit(AnalyzerEvent::Memory {
                path: path.to_path_buf(),
                used_bytes,
            });
        }

        if used_bytes > monitor.limit_bytes {
            if !monitor.warned {
                tracing::warn!(
                    path = %path.display(),
                    used_mb = used_bytes / linewise_core::BYTES_PER_MB,
                    limit_mb = self.config.max_memory_mb,
                    "memory above soft ceiling, continuing"
                );
                monitor.warned = true;
            }
            self.emit(AnalyzerEvent::MemoryWarning {
                path: path.to_path_buf(),
                used_bytes,
                limit_bytes: monitor.limit_bytes,
            });
        }
    }

    fn has_subscribers(&self) -> bool {
        self.events_tx.receiver_count() > 0
    }

    fn emit(&self, event: AnalyzerEvent) {
        // No subscribers is not an error.
        let _ = self.events_tx.send(event);
    }
}

impl Default for StreamAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-call memory bookkeeping.
struct MemoryMonitor {
    sampler: ProcessSampler,
    baseline: u64,
    peak: u64,
    limit_bytes: u64,
    warned: bool,
}

impl MemoryMonitor {
    fn new(config: &StreamConfig) -> Self {
        let mut sampler = ProcessSampler::new();
        let baseline = sampler.memory_bytes();
        Self {
            sampler,
            baseline,
            peak: baseline,
            limit_bytes: config.max_memory_bytes(),
            warned: false,
        }
    }

    fn sample(&mut self) -> u64 {
        let used = self.sampler.memory_bytes();
        self.peak = self.peak.max(used);
        used
    }

    fn growth(&self) -> u64 {
        self.peak.saturating_sub(self.baseline)
    }
}
