//! Value types produced by the streaming analyzer.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A line-bounded slice of a file.
///
/// Line numbers are 0-based and `end_line` is exclusive, so consecutive
/// chunks of one traversal satisfy `prev.end_line == next.start_line`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkData {
    /// Position of this chunk in its traversal.
    pub index: usize,
    /// First line contained in this chunk.
    pub start_line: usize,
    /// One past the last line contained in this chunk.
    pub end_line: usize,
    /// Completed logical lines, without terminators.
    pub lines: Vec<String>,
    /// Offset of the raw read that produced this chunk.
    pub byte_offset: u64,
    /// Number of raw bytes read for this chunk.
    pub size: usize,
}

impl ChunkData {
    /// Number of lines in this chunk.
    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line
    }

    /// Check if this chunk carries no complete line.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Aggregate result of analyzing a single file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnalysis {
    /// Path that was analyzed.
    pub file_path: PathBuf,
    /// Number of logical lines.
    pub lines: usize,
    /// File size in bytes.
    pub size: u64,
    /// Number of chunks produced.
    pub chunks: usize,
    /// Wall-clock time spent.
    #[serde(with = "crate::duration_ms")]
    pub duration: Duration,
    /// Peak resident memory growth observed during the call, in bytes.
    pub memory_used: u64,
}

impl FileAnalysis {
    /// Throughput in bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.size as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// A single regex match located in a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// 1-based line number.
    pub line: usize,
    /// 1-based column, counted in characters.
    pub column: usize,
    /// The matched text.
    #[serde(rename = "match")]
    pub matched: String,
    /// The full line containing the match.
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_line_count() {
        let chunk = ChunkData {
            index: 2,
            start_line: 10,
            end_line: 13,
            lines: vec!["a".into(), "b".into(), "c".into()],
            byte_offset: 4096,
            size: 2048,
        };
        assert_eq!(chunk.line_count(), chunk.lines.len());
        assert!(!chunk.is_empty());
    }

    #[test]
    fn test_search_result_serializes_match_field() {
        let result = SearchResult {
            line: 1,
            column: 5,
            matched: "console.log".into(),
            text: "    console.log('x');".into(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["match"], "console.log");
        assert_eq!(json["column"], 5);
    }

    #[test]
    fn test_file_analysis_duration_in_ms() {
        let analysis = FileAnalysis {
            file_path: PathBuf::from("/tmp/a.txt"),
            lines: 3,
            size: 12,
            chunks: 1,
            duration: Duration::from_millis(42),
            memory_used: 0,
        };
        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["duration"], 42);
        assert_eq!(json["filePath"], "/tmp/a.txt");
        assert_eq!(json["memoryUsed"], 0);
    }
}
