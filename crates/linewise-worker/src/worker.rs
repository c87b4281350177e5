//! A single worker: a dedicated OS thread running a private message loop.
//!
//! Each worker owns a current-thread Tokio runtime, so tasks inside one
//! worker execute one at a time while different workers run in parallel.
//! The only way in or out is the message channels.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use linewise_core::{ProcessSampler, Task, TaskError, TaskResult, WorkerStats};

use crate::handler::{HandlerResult, HandlerTable, TaskContext};
use crate::message::{WorkerEvent, WorkerMessage};

/// Coordinator-side handle to a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    /// Worker identifier, unique within a pool.
    pub id: usize,
    /// Inbox of the worker.
    pub tx: mpsc::UnboundedSender<WorkerMessage>,
    /// OS thread running the worker, if it was spawned as one.
    pub thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Send a message; fails if the worker is gone.
    pub fn send(&self, message: WorkerMessage) -> Result<(), WorkerMessage> {
        self.tx.send(message).map_err(|e| e.0)
    }
}

/// Spawn a worker thread.
///
/// The worker reports results, stats and its own exit on `events`.
pub fn spawn_worker(
    id: usize,
    handlers: Arc<HandlerTable>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    stats_interval: Duration,
) -> std::io::Result<WorkerHandle> {
    let (tx, rx) = mpsc::unbounded_channel();

    let thread = std::thread::Builder::new()
        .name(format!("linewise-worker-{id}"))
        .spawn(move || {
            let mut guard = ExitGuard {
                worker_id: id,
                events: events.clone(),
                clean: false,
            };

            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    tracing::error!(
                        worker_id = id,
                        error = %err,
                        "failed to start worker runtime"
                    );
                    return;
                }
            };

            let worker = Worker::new(id, handlers, events, stats_interval);
            let reason = runtime.block_on(worker.run(rx));
            // Timed-out blocking handlers are left to finish on their own.
            runtime.shutdown_background();

            guard.clean = reason == ExitReason::Shutdown;
        })?;

    Ok(WorkerHandle {
        id,
        tx,
        thread: Some(thread),
    })
}

/// Why a worker loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitReason {
    /// A shutdown message was received.
    Shutdown,
    /// The coordinator dropped its end of a channel.
    Disconnected,
}

/// Reports the worker's exit, including exits by panic.
struct ExitGuard {
    worker_id: usize,
    events: mpsc::UnboundedSender<WorkerEvent>,
    clean: bool,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let clean = self.clean && !std::thread::panicking();
        let _ = self.events.send(WorkerEvent::Exited {
            worker_id: self.worker_id,
            clean,
        });
    }
}

/// Worker state: identifier, handler table and outbound channel.
pub(crate) struct Worker {
    id: usize,
    handlers: Arc<HandlerTable>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    stats_interval: Duration,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        handlers: Arc<HandlerTable>,
        events: mpsc::UnboundedSender<WorkerEvent>,
        stats_interval: Duration,
    ) -> Self {
        Self {
            id,
            handlers,
            events,
            stats_interval,
        }
    }

    /// Message loop. Must run inside a Tokio runtime.
    pub(crate) async fn run(
        self,
        mut inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    ) -> ExitReason {
        let stats = tokio::spawn(emit_stats(self.id, self.events.clone(), self.stats_interval));
        tracing::debug!(worker_id = self.id, "worker started");

        let reason = loop {
            let Some(message) = inbox.recv().await else {
                break ExitReason::Disconnected;
            };

            let (task, timeout) = match message {
                WorkerMessage::Task { task, timeout } => (task, timeout),
                WorkerMessage::Shutdown => break ExitReason::Shutdown,
            };

            // Keep listening while executing so shutdown is immediate. A
            // result that is already ready wins over a queued shutdown.
            let result = tokio::select! {
                biased;
                result = self.execute(task, timeout) => result,
                message = inbox.recv() => match message {
                    Some(WorkerMessage::Shutdown) => break ExitReason::Shutdown,
                    Some(WorkerMessage::Task { task, .. }) => {
                        tracing::warn!(
                            worker_id = self.id,
                            task_id = %task.id,
                            "task sent to busy worker, dropping"
                        );
                        break ExitReason::Disconnected;
                    }
                    None => break ExitReason::Disconnected,
                },
            };

            if self.events.send(WorkerEvent::Result(result)).is_err() {
                break ExitReason::Disconnected;
            }
        };

        stats.abort();
        tracing::debug!(worker_id = self.id, ?reason, "worker stopped");
        reason
    }

    /// Execute one task and always produce exactly one result.
    pub(crate) async fn execute(&self, task: Task, timeout: Duration) -> TaskResult {
        let started = Instant::now();
        let task_id = task.id.clone();

        let outcome = self.dispatch(task, timeout).await;
        let duration = started.elapsed();

        match outcome {
            Ok(data) => TaskResult::ok(task_id, data, duration, self.id),
            Err(err) => {
                tracing::debug!(
                    worker_id = self.id,
                    task_id = %task_id,
                    error = %err,
                    "task failed"
                );
                TaskResult::failed(task_id, &err, duration, self.id)
            }
        }
    }

    async fn dispatch(&self, task: Task, timeout: Duration) -> HandlerResult {
        let kind = task.kind()?;
        let handler = self
            .handlers
            .get(kind)
            .ok_or_else(|| TaskError::UnknownTaskType {
                task_type: task.task_type.clone(),
            })?;

        let cancel = CancellationToken::new();
        let ctx = TaskContext {
            task_id: task.id,
            worker_id: self.id,
            data: task.data,
            cancel: cancel.clone(),
        };

        let call = AssertUnwindSafe(async move { (**handler)(ctx).await }).catch_unwind();

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => {
                let message = panic_message(&*payload);
                tracing::warn!(worker_id = self.id, panic = %message, "handler panicked");
                Err(TaskError::handler(format!("handler panicked: {message}")))
            }
            Err(_) => {
                cancel.cancel();
                Err(TaskError::Timeout {
                    timeout_ms: timeout.as_millis().min(u64::MAX as u128) as u64,
                })
            }
        }
    }
}

async fn emit_stats(
    worker_id: usize,
    events: mpsc::UnboundedSender<WorkerEvent>,
    interval: Duration,
) {
    let mut sampler = ProcessSampler::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let sample = sampler.sample();
        let stats = WorkerStats {
            worker_id,
            memory_used: sample.memory_bytes,
            cpu_seconds: sample.cpu_seconds,
            sampled_at: chrono::Utc::now(),
        };
        if events.send(WorkerEvent::Stats(stats)).is_err() {
            break;
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linewise_core::TaskType;
    use serde_json::json;

    async fn explode(_ctx: TaskContext) -> HandlerResult {
        panic!("detector exploded")
    }

    fn worker_with(table: HandlerTable) -> (Worker, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let worker = Worker::new(7, Arc::new(table), events_tx, Duration::from_secs(60));
        (worker, events_rx)
    }

    #[tokio::test]
    async fn test_unknown_type_fails_immediately() {
        let (worker, _events) = worker_with(HandlerTable::default());
        let task = Task::with_type_name("t1", "transmogrify", json!({}));

        let result = worker.execute(task, Duration::from_secs(5)).await;
        assert!(!result.success);
        assert_eq!(result.worker_id, 7);
        assert!(result.error.unwrap().contains("Unknown task type"));
        assert!(result.duration < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unregistered_known_type_is_unknown() {
        let table = HandlerTable::builder()
            .handler(TaskType::ReadFile, |ctx| async move { Ok(ctx.data) })
            .build();
        let (worker, _events) = worker_with(table);

        let task = Task::new("t2", TaskType::ParseAst, json!({}));
        let result = worker.execute(task, Duration::from_secs(5)).await;
        assert!(result.error.unwrap().contains("parse-ast"));
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let table = HandlerTable::builder()
            .handler(TaskType::RunDetector, explode)
            .build();
        let (worker, _events) = worker_with(table);

        let task = Task::new("t3", TaskType::RunDetector, json!({}));
        let result = worker.execute(task, Duration::from_secs(5)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("detector exploded"));
    }

    #[tokio::test]
    async fn test_timeout_cancels_token() {
        let (seen_tx, seen_rx) = std::sync::mpsc::channel();
        let table = HandlerTable::builder()
            .handler(TaskType::AnalyzeFile, move |ctx| {
                let seen_tx = seen_tx.clone();
                async move {
                    let cancel = ctx.cancel.clone();
                    let _ = seen_tx.send(cancel);
                    std::future::pending::<HandlerResult>().await
                }
            })
            .build();
        let (worker, _events) = worker_with(table);

        let task = Task::new("t4", TaskType::AnalyzeFile, json!({}));
        let result = worker.execute(task, Duration::from_millis(50)).await;

        assert!(result.is_timeout());
        let token = seen_rx.recv().unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let table = HandlerTable::builder()
            .handler(TaskType::ReadFile, |ctx| async move { Ok(ctx.data) })
            .build();
        let (worker, mut events) = worker_with(table);
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(WorkerMessage::Task {
            task: Task::new("t5", TaskType::ReadFile, json!({ "echo": true })),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        tx.send(WorkerMessage::Shutdown).unwrap();
        tx.send(WorkerMessage::Task {
            task: Task::new("t6", TaskType::ReadFile, json!({})),
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        let reason = worker.run(rx).await;
        assert_eq!(reason, ExitReason::Shutdown);

        let mut results = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let WorkerEvent::Result(result) = event {
                results.push(result);
            }
        }
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].task_id, "t5");
        assert_eq!(results[0].data.as_ref().unwrap()["echo"], true);
    }

    #[tokio::test]
    async fn test_ready_result_beats_queued_shutdown() {
        for round in 0..200 {
            let table = HandlerTable::builder()
                .handler(TaskType::ReadFile, |ctx| async move { Ok(ctx.data) })
                .build();
            let (worker, mut events) = worker_with(table);
            let (tx, rx) = mpsc::unbounded_channel();

            tx.send(WorkerMessage::Task {
                task: Task::new(format!("r{round}"), TaskType::ReadFile, json!({})),
                timeout: Duration::from_secs(1),
            })
            .unwrap();
            tx.send(WorkerMessage::Shutdown).unwrap();

            assert_eq!(worker.run(rx).await, ExitReason::Shutdown);

            let delivered = std::iter::from_fn(|| events.try_recv().ok())
                .filter(|e| matches!(e, WorkerEvent::Result(_)))
                .count();
            assert_eq!(delivered, 1, "result lost in round {round}");
        }
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_running_task() {
        let table = HandlerTable::builder()
            .handler(TaskType::RunDetector, |_ctx| {
                std::future::pending::<HandlerResult>()
            })
            .build();
        let (worker, mut events) = worker_with(table);
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(WorkerMessage::Task {
            task: Task::new("stuck", TaskType::RunDetector, json!({})),
            timeout: Duration::from_secs(60),
        })
        .unwrap();
        tx.send(WorkerMessage::Shutdown).unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(5), worker.run(rx))
            .await
            .unwrap();
        assert_eq!(reason, ExitReason::Shutdown);
        assert!(events.try_recv().is_err());
    }
}
