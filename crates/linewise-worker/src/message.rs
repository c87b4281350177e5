//! Typed messages exchanged between the coordinator and workers.

use std::time::Duration;

use linewise_core::{Task, TaskResult, WorkerStats};

/// Inbound message to a worker.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Execute a task within `timeout`.
    Task { task: Task, timeout: Duration },
    /// Stop immediately; an in-flight task is abandoned.
    Shutdown,
}

/// Outbound message from a worker.
#[derive(Debug)]
pub enum WorkerEvent {
    /// A task finished, successfully or not.
    Result(TaskResult),
    /// Periodic resource sample.
    Stats(WorkerStats),
    /// The worker thread is gone. `clean` is true only after a shutdown
    /// request.
    Exited { worker_id: usize, clean: bool },
}
