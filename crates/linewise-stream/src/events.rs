//! Telemetry events emitted while a file is drained.

use std::path::PathBuf;

use linewise_core::FileAnalysis;

/// Out-of-band signal published to analyzer subscribers.
///
/// Events are for observability only. An analysis completes identically
/// whether or not anyone is subscribed.
#[derive(Debug, Clone)]
pub enum AnalyzerEvent {
    /// A chunk was produced.
    Chunk {
        path: PathBuf,
        index: usize,
        lines: usize,
        bytes: usize,
    },
    /// Resident memory was sampled.
    Memory { path: PathBuf, used_bytes: u64 },
    /// A memory sample crossed the soft ceiling. Processing continues.
    MemoryWarning {
        path: PathBuf,
        used_bytes: u64,
        limit_bytes: u64,
    },
    /// The analysis finished.
    Complete(FileAnalysis),
}

impl AnalyzerEvent {
    /// Short name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Memory { .. } => "memory",
            Self::MemoryWarning { .. } => "memoryWarning",
            Self::Complete(_) => "complete",
        }
    }
}
