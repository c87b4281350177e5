//! Handler table mapping task types to async handlers.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use linewise_core::{StreamConfig, TaskError, TaskType};

use crate::builtin;

/// Type alias for boxed futures returned by handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a handler.
pub type HandlerResult = Result<serde_json::Value, TaskError>;

/// A type-erased task handler.
pub type Handler = dyn Fn(TaskContext) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// Everything a handler gets to see about the task it runs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Id of the task being executed.
    pub task_id: String,
    /// Worker executing the task.
    pub worker_id: usize,
    /// Task payload.
    pub data: serde_json::Value,
    /// Cancelled when the task's timeout elapses.
    pub cancel: CancellationToken,
}

impl TaskContext {
    /// Deserialize the payload into a typed request.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        serde_json::from_value(self.data.clone()).map_err(TaskError::from)
    }

    /// Check whether the task has been abandoned.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Fixed mapping from [`TaskType`] to handler.
///
/// Built once and shared read-only between all workers of a pool.
#[derive(Clone)]
pub struct HandlerTable {
    handlers: HashMap<TaskType, Arc<Handler>>,
}

impl HandlerTable {
    /// Start building a table.
    pub fn builder() -> HandlerTableBuilder {
        HandlerTableBuilder::default()
    }

    /// Table with the four built-in handlers using `config` for file
    /// streaming.
    pub fn builtin(config: StreamConfig) -> Self {
        Self::builder().with_builtins(config).build()
    }

    /// Look up the handler for a task type.
    pub fn get(&self, kind: TaskType) -> Option<&Arc<Handler>> {
        self.handlers.get(&kind)
    }

    /// Check if a handler is registered for `kind`.
    pub fn contains(&self, kind: TaskType) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::builtin(StreamConfig::default())
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().map(|k| k.as_ref()).collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerTable").field("handlers", &kinds).finish()
    }
}

/// Builder for [`HandlerTable`]. Later registrations replace earlier ones.
#[derive(Default)]
pub struct HandlerTableBuilder {
    handlers: HashMap<TaskType, Arc<Handler>>,
}

impl HandlerTableBuilder {
    /// Register a handler for `kind`.
    pub fn handler<F, Fut>(mut self, kind: TaskType, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Arc<Handler> =
            Arc::new(move |ctx: TaskContext| -> BoxFuture<'static, HandlerResult> {
                Box::pin(f(ctx))
            });
        self.handlers.insert(kind, handler);
        self
    }

    /// Register the built-in handlers for every [`TaskType`].
    pub fn with_builtins(self, config: StreamConfig) -> Self {
        let analyze = config.clone();
        let read = config.clone();
        let parse = config.clone();
        let detect = config;

        self.handler(TaskType::AnalyzeFile, move |ctx| {
            builtin::analyze_file(ctx, analyze.clone())
        })
        .handler(TaskType::ReadFile, move |ctx| builtin::read_file(ctx, read.clone()))
        .handler(TaskType::ParseAst, move |ctx| builtin::parse_ast(ctx, parse.clone()))
        .handler(TaskType::RunDetector, move |ctx| {
            builtin::run_detector(ctx, detect.clone())
        })
    }

    /// Finish the table.
    pub fn build(self) -> HandlerTable {
        HandlerTable {
            handlers: self.handlers,
        }
    }
}
