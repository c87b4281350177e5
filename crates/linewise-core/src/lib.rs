//! Core types and traits for linewise.
//!
//! This crate provides the value types shared by the streaming analyzer and
//! the worker runtime: chunks, analyses, search hits, tasks and their
//! results, plus the error taxonomy, configuration builders and the process
//! telemetry sampler.

mod chunk;
mod config;
mod error;
mod task;
mod telemetry;

pub mod duration_ms;

pub use chunk::{ChunkData, FileAnalysis, SearchResult};
pub use config::{
    PoolConfig, PoolConfigBuilder, StreamConfig, StreamConfigBuilder, TextEncoding,
};
pub use error::{AnalyzeError, TaskError};
pub use task::{Task, TaskResult, TaskType, WorkerStats};
pub use telemetry::{ProcessSampler, ResourceSample};

/// Bytes in one megabyte, as used by the soft memory ceiling.
pub const BYTES_PER_MB: u64 = 1024 * 1024;
