//! Task, result and telemetry types exchanged with workers.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::TaskError;

/// The fixed set of task kinds a worker knows how to execute.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TaskType {
    /// Stream a file and return its [`FileAnalysis`](crate::FileAnalysis).
    AnalyzeFile,
    /// Read (a bounded prefix of) a file's text.
    ReadFile,
    /// Produce a structural outline of a source file.
    ParseAst,
    /// Run a named set of regex patterns over a file.
    RunDetector,
}

/// A unit of work dispatched to exactly one worker.
///
/// `task_type` keeps the caller's string so that an unrecognized type still
/// reaches a worker and fails there with [`TaskError::UnknownTaskType`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Caller-assigned unique identifier.
    pub id: String,
    /// Task kind, normally one of the [`TaskType`] strings.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Handler-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Task {
    /// Create a task of a known type.
    pub fn new(id: impl Into<String>, task_type: TaskType, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.to_string(),
            data,
        }
    }

    /// Create a task from a raw type name.
    pub fn with_type_name(
        id: impl Into<String>,
        task_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            data,
        }
    }

    /// Resolve the type name against the known task kinds.
    pub fn kind(&self) -> Result<TaskType, TaskError> {
        TaskType::from_str(&self.task_type).map_err(|_| TaskError::UnknownTaskType {
            task_type: self.task_type.clone(),
        })
    }
}

/// Outcome of one dispatched task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// Id of the task this result belongs to.
    pub task_id: String,
    /// Whether the handler completed successfully.
    pub success: bool,
    /// Handler output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time.
    #[serde(with = "crate::duration_ms")]
    pub duration: Duration,
    /// Worker that produced this result.
    pub worker_id: usize,
}

impl TaskResult {
    /// Create a successful result.
    pub fn ok(
        task_id: impl Into<String>,
        data: serde_json::Value,
        duration: Duration,
        worker_id: usize,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            data: Some(data),
            error: None,
            duration,
            worker_id,
        }
    }

    /// Create a failed result.
    pub fn failed(
        task_id: impl Into<String>,
        error: &TaskError,
        duration: Duration,
        worker_id: usize,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            data: None,
            error: Some(error.to_string()),
            duration,
            worker_id,
        }
    }

    /// Whether the failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().contains("timeout"))
    }
}

/// Periodic resource sample emitted by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    /// Worker that took the sample.
    pub worker_id: usize,
    /// Resident memory in bytes.
    pub memory_used: u64,
    /// CPU seconds consumed by the process so far. Workers share one
    /// process, so this is not per worker.
    pub cpu_seconds: f64,
    /// When the sample was taken.
    pub sampled_at: DateTime<Utc>,
}
