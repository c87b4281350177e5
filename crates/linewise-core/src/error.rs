//! Error types for analysis and task execution.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while streaming a file.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    /// Path does not exist.
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path exists but is not a regular file.
    #[error("Not a file: {path}")]
    NotAFile { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Traversal was cancelled between chunks.
    #[error("Operation interrupted")]
    Interrupted,

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl AnalyzeError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::FileNotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Whether this error means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound { .. })
    }
}

/// Errors produced while executing a task inside a worker.
///
/// These never cross the worker boundary as values: the worker flattens them
/// into [`TaskResult::error`](crate::TaskResult) strings.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task type is not in the worker's handler table.
    #[error("Unknown task type: {task_type}")]
    UnknownTaskType { task_type: String },

    /// Handler did not settle within its budget.
    #[error("Task timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Task data did not match what the handler expects.
    #[error("Invalid task payload: {message}")]
    InvalidPayload { message: String },

    /// The analyzer failed underneath the handler.
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),

    /// Unclassified handler failure (including panics).
    #[error("{message}")]
    Handler { message: String },

    /// Worker exited while the task was in flight.
    #[error("Worker {worker_id} exited unexpectedly")]
    WorkerExited { worker_id: usize },

    /// Another task with the same id is still in flight.
    #[error("Duplicate task id: {task_id}")]
    DuplicateTaskId { task_id: String },

    /// The pool is shutting down and accepts no more work.
    #[error("Worker pool is shut down")]
    PoolShutdown,
}

impl TaskError {
    /// Create an unclassified handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_payload(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_error_io() {
        let err = AnalyzeError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, AnalyzeError::PermissionDenied { .. }));

        let err = AnalyzeError::io(
            "/test/missing",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_timeout_message_mentions_timeout() {
        let err = TaskError::Timeout { timeout_ms: 250 };
        assert_eq!(err.to_string(), "Task timeout after 250ms");
    }

    #[test]
    fn test_analyze_error_is_transparent() {
        let err: TaskError = AnalyzeError::FileNotFound {
            path: PathBuf::from("/nope"),
        }
        .into();
        assert_eq!(err.to_string(), "File not found: /nope");
    }
}
