//! Analyzer and worker pool configuration types.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::BYTES_PER_MB;

/// Text decoding used for line splitting and search.
///
/// Decoding is always lossy so that line counting never fails on binary
/// input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// UTF-8, invalid sequences replaced with U+FFFD.
    #[default]
    Utf8,
    /// ISO-8859-1, every byte maps to one char.
    Latin1,
}

impl TextEncoding {
    /// Decode a single line of raw bytes.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

/// Configuration for the streaming analyzer.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// Bytes per raw read.
    #[builder(default = "64 * 1024")]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Soft memory ceiling in megabytes; crossing it only emits a warning.
    #[builder(default = "100")]
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,

    /// Decoding used for emitted lines.
    #[builder(default)]
    #[serde(default)]
    pub encoding: TextEncoding,

    /// Number of chunks between memory samples.
    #[builder(default = "16")]
    #[serde(default = "default_memory_sample_interval")]
    pub memory_sample_interval: usize,
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_max_memory_mb() -> u64 {
    100
}

fn default_memory_sample_interval() -> usize {
    16
}

impl StreamConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.chunk_size == Some(0) {
            return Err("Chunk size must be greater than zero".to_string());
        }
        if self.max_memory_mb == Some(0) {
            return Err("Memory ceiling must be greater than zero".to_string());
        }
        if self.memory_sample_interval == Some(0) {
            return Err("Memory sample interval must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl StreamConfig {
    /// Create a new stream config builder.
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }

    /// Create a config with the given chunk size and default everything else.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            ..Self::default()
        }
    }

    /// Soft memory ceiling in bytes.
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(BYTES_PER_MB)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_memory_mb: default_max_memory_mb(),
            encoding: TextEncoding::Utf8,
            memory_sample_interval: default_memory_sample_interval(),
        }
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Number of workers (0 = one per available CPU).
    #[builder(default = "0")]
    #[serde(default)]
    pub workers: usize,

    /// Timeout applied to tasks submitted without one.
    #[builder(default = "Duration::from_secs(30)")]
    #[serde(default = "default_task_timeout", with = "crate::duration_ms")]
    pub default_timeout: Duration,

    /// Interval between worker stats samples.
    #[builder(default = "Duration::from_secs(5)")]
    #[serde(default = "default_stats_interval", with = "crate::duration_ms")]
    pub stats_interval: Duration,

    /// Replace a worker that exits unexpectedly.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub restart_on_exit: bool,
}

fn default_task_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

impl PoolConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.default_timeout == Some(Duration::ZERO) {
            return Err("Default timeout must be finite and non-zero".to_string());
        }
        if self.stats_interval == Some(Duration::ZERO) {
            return Err("Stats interval must be non-zero".to_string());
        }
        Ok(())
    }
}

impl PoolConfig {
    /// Create a new pool config builder.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Create a config with a fixed number of workers.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Resolve the worker count, auto-detecting when set to zero.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            default_timeout: default_task_timeout(),
            stats_interval: default_stats_interval(),
            restart_on_exit: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_builder() {
        let config = StreamConfig::builder()
            .chunk_size(1024usize)
            .max_memory_mb(50u64)
            .encoding(TextEncoding::Latin1)
            .build()
            .unwrap();

        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.max_memory_bytes(), 50 * 1024 * 1024);
        assert_eq!(config.encoding, TextEncoding::Latin1);
        assert_eq!(config.memory_sample_interval, 16);
    }

    #[test]
    fn test_stream_config_rejects_zero_chunk() {
        let result = StreamConfig::builder().chunk_size(0usize).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.stats_interval, Duration::from_secs(5));
        assert!(config.restart_on_exit);
        assert!(config.worker_count() >= 1);
        assert_eq!(PoolConfig::new(3).worker_count(), 3);
    }

    #[test]
    fn test_pool_config_rejects_zero_timeout() {
        let result = PoolConfig::builder().default_timeout(Duration::ZERO).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_never_fails_on_binary() {
        let bytes = [0xff, 0xfe, b'a', 0x00];
        assert_eq!(TextEncoding::Utf8.decode(&bytes).chars().count(), 4);
        assert_eq!(TextEncoding::Latin1.decode(&bytes).chars().count(), 4);
    }

    #[test]
    fn test_stream_config_deserialize_partial() {
        let config: StreamConfig = serde_json::from_str(r#"{"chunkSize": 4096}"#).unwrap();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.max_memory_mb, 100);
    }
}
