//! Bounded-memory file streaming engine for linewise.
//!
//! This crate turns a file on disk into a sequence of line-bounded chunks
//! without ever holding more than one read window plus a carry-over partial
//! line in memory.
//!
//! # Overview
//!
//! - **Carry-over reassembly**: lines that straddle a read boundary are
//!   stitched back together, so every logical line is emitted exactly once
//! - **Three consumption modes**: aggregate analysis, push-callback
//!   processing and lazy pull-based traversal
//! - **Regex search** with 1-based line/column positions
//! - **Soft memory ceiling** reported through broadcast events, never fatal
//!
//! # Example
//!
//! ```rust,no_run
//! use linewise_stream::{StreamAnalyzer, StreamConfig};
//!
//! let analyzer = StreamAnalyzer::with_config(StreamConfig::with_chunk_size(16 * 1024));
//! let analysis = analyzer.analyze_file("/var/log/syslog").unwrap();
//!
//! println!("{} lines in {} chunks", analysis.lines, analysis.chunks);
//! ```
//!
//! # Lazy traversal
//!
//! Chunks are only read when pulled; dropping the reader closes the file:
//!
//! ```rust,no_run
//! use linewise_stream::StreamAnalyzer;
//!
//! let analyzer = StreamAnalyzer::new();
//! for chunk in analyzer.read_chunks("big.log").unwrap().take(5) {
//!     let chunk = chunk.unwrap();
//!     println!("lines {}..{}", chunk.start_line, chunk.end_line);
//! }
//! ```
//!
//! # Telemetry
//!
//! ```rust,no_run
//! use linewise_stream::{AnalyzerEvent, StreamAnalyzer};
//!
//! let analyzer = StreamAnalyzer::new();
//! let mut events = analyzer.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let AnalyzerEvent::MemoryWarning { used_bytes, .. } = event {
//!             eprintln!("high memory: {used_bytes} bytes");
//!         }
//!     }
//! });
//! ```

mod analyzer;
mod events;
mod reader;
mod search;

pub use analyzer::StreamAnalyzer;
pub use events::AnalyzerEvent;
pub use reader::ChunkReader;
pub use search::{search_chunk, search_line};

// Re-export core types for convenience
pub use linewise_core::{
    AnalyzeError, ChunkData, FileAnalysis, SearchResult, StreamConfig, StreamConfigBuilder,
    TextEncoding,
};
