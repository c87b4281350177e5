//! Isolated worker runtime for linewise.
//!
//! A [`WorkerPool`] runs tasks on a fixed set of worker threads. Workers share
//! nothing with the coordinator except typed messages; each task gets exactly
//! one [`TaskResult`], and a task that overruns its timeout is reported as
//! failed while its cancellation token is tripped.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use linewise_worker::{HandlerTable, PoolConfig, Task, TaskType, WorkerPool};
//! use serde_json::json;
//!
//! # async fn demo() -> std::io::Result<()> {
//! let pool = WorkerPool::start(PoolConfig::new(4), Arc::new(HandlerTable::default()))?;
//!
//! let task = Task::new("t-1", TaskType::AnalyzeFile, json!({ "path": "app.log" }));
//! let result = pool.run(task, None).await;
//! println!("{}: {:?}", result.task_id, result.data);
//!
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Custom handlers
//!
//! Handlers are async closures over a [`TaskContext`]. Long-running handlers
//! should poll [`TaskContext::is_cancelled`] and stop early once it flips.

mod builtin;
mod handler;
mod message;
mod pool;
mod worker;

pub use builtin::DEFAULT_READ_LIMIT;
pub use handler::{
    BoxFuture, Handler, HandlerResult, HandlerTable, HandlerTableBuilder, TaskContext,
};
pub use message::{WorkerEvent, WorkerMessage};
pub use pool::{COORDINATOR_ID, PendingResult, WorkerPool};
pub use worker::{WorkerHandle, spawn_worker};

// Re-export core types for convenience
pub use linewise_core::{
    PoolConfig, PoolConfigBuilder, Task, TaskError, TaskResult, TaskType, WorkerStats,
};
