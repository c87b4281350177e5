//! Coordinator that owns the workers and routes tasks to them.
//!
//! All bookkeeping lives in a single dispatcher task, so there is no shared
//! mutable state between the pool handle and the workers: the handle talks to
//! the dispatcher over a command channel and the workers talk to it over an
//! event channel.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};

use linewise_core::{PoolConfig, Task, TaskError, TaskResult, WorkerStats};

use crate::handler::HandlerTable;
use crate::message::{WorkerEvent, WorkerMessage};
use crate::worker::{WorkerHandle, spawn_worker};

/// Worker id stamped on results produced by the coordinator itself, such as
/// duplicate-id rejections and shutdown failures.
pub const COORDINATOR_ID: usize = usize::MAX;

type Spawner = Box<dyn FnMut(usize) -> std::io::Result<WorkerHandle> + Send>;

enum Command {
    Submit {
        task: Task,
        timeout: Duration,
        reply: oneshot::Sender<TaskResult>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// A pool of isolated workers.
///
/// Each submitted task produces exactly one [`TaskResult`]: success,
/// failure, timeout, worker exit or pool shutdown.
#[derive(Debug)]
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<Command>,
    stats_tx: broadcast::Sender<WorkerStats>,
    live: Arc<AtomicUsize>,
    default_timeout: Duration,
}

impl WorkerPool {
    /// Start `config.worker_count()` workers sharing `handlers`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: PoolConfig, handlers: Arc<HandlerTable>) -> std::io::Result<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stats_interval = config.stats_interval;

        let spawner: Spawner = Box::new(move |id| {
            spawn_worker(id, Arc::clone(&handlers), events_tx.clone(), stats_interval)
        });

        Self::with_spawner(config, spawner, events_rx)
    }

    fn with_spawner(
        config: PoolConfig,
        spawner: Spawner,
        events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> std::io::Result<Self> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (stats_tx, _) = broadcast::channel(100);
        let live = Arc::new(AtomicUsize::new(0));

        let dispatcher = Dispatcher::new(&config, spawner, stats_tx.clone(), Arc::clone(&live))?;
        tracing::info!(workers = dispatcher.slots.len(), "worker pool started");
        tokio::spawn(dispatcher.run(commands_rx, events_rx));

        Ok(Self {
            commands: commands_tx,
            stats_tx,
            live,
            default_timeout: config.default_timeout,
        })
    }

    /// Queue a task. `timeout` defaults to the pool's default timeout.
    ///
    /// Returns immediately; await the returned [`PendingResult`] for the
    /// outcome.
    pub fn submit(&self, task: Task, timeout: Option<Duration>) -> PendingResult {
        let (reply, rx) = oneshot::channel();
        let task_id = task.id.clone();

        let command = Command::Submit {
            task,
            timeout: timeout.unwrap_or(self.default_timeout),
            reply,
        };
        // A closed channel drops the reply, which resolves as a shutdown.
        let _ = self.commands.send(command);

        PendingResult { task_id, rx }
    }

    /// Submit a task and wait for its result.
    pub async fn run(&self, task: Task, timeout: Option<Duration>) -> TaskResult {
        self.submit(task, timeout).await
    }

    /// Subscribe to periodic worker stats.
    pub fn subscribe_stats(&self) -> broadcast::Receiver<WorkerStats> {
        self.stats_tx.subscribe()
    }

    /// Number of live workers.
    pub fn size(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Stop every worker and fail outstanding tasks with a shutdown error.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = wait.await;
        }
    }
}

/// Handle to the eventual result of a submitted task.
#[derive(Debug)]
pub struct PendingResult {
    task_id: String,
    rx: oneshot::Receiver<TaskResult>,
}

impl PendingResult {
    /// Id of the task this handle belongs to.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Wait for the result.
    pub async fn result(self) -> TaskResult {
        self.await
    }
}

impl Future for PendingResult {
    type Output = TaskResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                TaskResult::failed(
                    self.task_id.clone(),
                    &TaskError::PoolShutdown,
                    Duration::ZERO,
                    COORDINATOR_ID,
                )
            })
        })
    }
}

struct Slot {
    handle: WorkerHandle,
    busy: bool,
}

struct Queued {
    task: Task,
    timeout: Duration,
    reply: oneshot::Sender<TaskResult>,
}

struct InFlight {
    task_id: String,
    reply: oneshot::Sender<TaskResult>,
}

/// Owns workers, the FIFO queue and the in-flight table.
struct Dispatcher {
    slots: Vec<Slot>,
    queue: VecDeque<Queued>,
    in_flight: HashMap<usize, InFlight>,
    pending_ids: HashSet<String>,
    spawner: Spawner,
    next_id: usize,
    restart_on_exit: bool,
    shutting_down: bool,
    stats_tx: broadcast::Sender<WorkerStats>,
    live: Arc<AtomicUsize>,
}

impl Dispatcher {
    fn new(
        config: &PoolConfig,
        spawner: Spawner,
        stats_tx: broadcast::Sender<WorkerStats>,
        live: Arc<AtomicUsize>,
    ) -> std::io::Result<Self> {
        let mut dispatcher = Self {
            slots: Vec::new(),
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
            pending_ids: HashSet::new(),
            spawner,
            next_id: 0,
            restart_on_exit: config.restart_on_exit,
            shutting_down: false,
            stats_tx,
            live,
        };

        for _ in 0..config.worker_count() {
            dispatcher.spawn()?;
        }

        Ok(dispatcher)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Submit { task, timeout, reply }) => {
                        self.enqueue(task, timeout, reply);
                    }
                    Some(Command::Shutdown { done }) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = events.recv() => self.on_event(event),
            }
        }

        // Late submissions resolve as shutdown once `commands` is dropped.
        tracing::info!("worker pool stopped");
    }

    fn spawn(&mut self) -> std::io::Result<()> {
        let id = self.next_id;
        self.next_id += 1;

        let handle = (self.spawner)(id)?;
        self.slots.push(Slot {
            handle,
            busy: false,
        });
        self.live.store(self.slots.len(), Ordering::Relaxed);
        tracing::debug!(worker_id = id, "worker spawned");
        Ok(())
    }

    fn enqueue(&mut self, task: Task, timeout: Duration, reply: oneshot::Sender<TaskResult>) {
        if self.shutting_down {
            reject(&task.id, &TaskError::PoolShutdown, reply);
            return;
        }
        if !self.pending_ids.insert(task.id.clone()) {
            let err = TaskError::DuplicateTaskId {
                task_id: task.id.clone(),
            };
            reject(&task.id, &err, reply);
            return;
        }

        tracing::trace!(task_id = %task.id, task_type = %task.task_type, "task queued");
        self.queue.push_back(Queued {
            task,
            timeout,
            reply,
        });
        self.pump();
    }

    /// Hand queued tasks to idle workers, oldest first.
    fn pump(&mut self) {
        if self.slots.is_empty() {
            // Nothing will ever pick these up.
            while let Some(queued) = self.queue.pop_front() {
                self.pending_ids.remove(&queued.task.id);
                reject(&queued.task.id, &TaskError::PoolShutdown, queued.reply);
            }
            return;
        }

        while !self.queue.is_empty() {
            let Some(slot) = self.slots.iter_mut().find(|s| !s.busy) else {
                break;
            };
            let Some(queued) = self.queue.pop_front() else {
                break;
            };

            let task_id = queued.task.id.clone();
            let message = WorkerMessage::Task {
                task: queued.task,
                timeout: queued.timeout,
            };

            // Busy either way: a dead worker must not be picked again before
            // its exit event arrives.
            slot.busy = true;

            match slot.handle.send(message) {
                Ok(()) => {
                    tracing::trace!(
                        worker_id = slot.handle.id,
                        task_id = %task_id,
                        "task dispatched"
                    );
                    self.in_flight.insert(
                        slot.handle.id,
                        InFlight {
                            task_id,
                            reply: queued.reply,
                        },
                    );
                }
                Err(WorkerMessage::Task { task, timeout }) => {
                    self.queue.push_front(Queued {
                        task,
                        timeout,
                        reply: queued.reply,
                    });
                }
                Err(WorkerMessage::Shutdown) => {}
            }
        }
    }

    fn on_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Result(result) => self.on_result(result),
            WorkerEvent::Stats(stats) => {
                let _ = self.stats_tx.send(stats);
            }
            WorkerEvent::Exited { worker_id, clean } => self.on_exit(worker_id, clean),
        }
    }

    fn on_result(&mut self, result: TaskResult) {
        let worker_id = result.worker_id;

        if let Some(slot) = self.slots.iter_mut().find(|s| s.handle.id == worker_id) {
            slot.busy = false;
        }

        match self.in_flight.remove(&worker_id) {
            Some(in_flight) if in_flight.task_id == result.task_id => {
                self.pending_ids.remove(&in_flight.task_id);
                let _ = in_flight.reply.send(result);
            }
            Some(in_flight) => {
                tracing::warn!(
                    worker_id,
                    expected = %in_flight.task_id,
                    got = %result.task_id,
                    "result for unexpected task"
                );
                self.in_flight.insert(worker_id, in_flight);
            }
            None => {
                tracing::warn!(
                    worker_id,
                    task_id = %result.task_id,
                    "result without in-flight task"
                );
            }
        }

        self.pump();
    }

    fn on_exit(&mut self, worker_id: usize, clean: bool) {
        let Some(index) = self.slots.iter().position(|s| s.handle.id == worker_id) else {
            return;
        };
        self.slots.remove(index);
        self.live.store(self.slots.len(), Ordering::Relaxed);

        if let Some(in_flight) = self.in_flight.remove(&worker_id) {
            self.pending_ids.remove(&in_flight.task_id);
            reject(
                &in_flight.task_id,
                &TaskError::WorkerExited { worker_id },
                in_flight.reply,
            );
        }

        if clean || self.shutting_down {
            return;
        }

        tracing::warn!(worker_id, "worker exited unexpectedly");
        if self.restart_on_exit {
            if let Err(err) = self.spawn() {
                tracing::error!(error = %err, "failed to restart worker");
            }
        }
        self.pump();
    }

    async fn shutdown(&mut self) {
        self.shutting_down = true;

        for slot in &self.slots {
            let _ = slot.handle.send(WorkerMessage::Shutdown);
        }

        for (worker_id, in_flight) in self.in_flight.drain() {
            tracing::debug!(worker_id, task_id = %in_flight.task_id, "abandoning task");
            reject(&in_flight.task_id, &TaskError::PoolShutdown, in_flight.reply);
        }
        for queued in self.queue.drain(..) {
            reject(&queued.task.id, &TaskError::PoolShutdown, queued.reply);
        }
        self.pending_ids.clear();

        let threads: Vec<_> = self
            .slots
            .drain(..)
            .filter_map(|mut slot| slot.handle.thread.take())
            .collect();
        self.live.store(0, Ordering::Relaxed);

        if !threads.is_empty() {
            let _ = tokio::task::spawn_blocking(move || {
                for thread in threads {
                    let _ = thread.join();
                }
            })
            .await;
        }
    }
}

fn reject(task_id: &str, err: &TaskError, reply: oneshot::Sender<TaskResult>) {
    let _ = reply.send(TaskResult::failed(task_id, err, Duration::ZERO, COORDINATOR_ID));
}

#[cfg(test)]
mod tests {
    use super::*;
    use linewise_core::TaskType;
    use serde_json::json;
    use std::sync::Mutex;

    type Inboxes = Arc<Mutex<Vec<(usize, mpsc::UnboundedReceiver<WorkerMessage>)>>>;

    fn fake_spawner() -> (Spawner, Inboxes) {
        let inboxes: Inboxes = Arc::default();
        let recorded = Arc::clone(&inboxes);
        let spawner: Spawner = Box::new(move |id| {
            let (tx, rx) = mpsc::unbounded_channel();
            recorded.lock().unwrap().push((id, rx));
            Ok(WorkerHandle {
                id,
                tx,
                thread: None,
            })
        });
        (spawner, inboxes)
    }

    fn dispatcher(workers: usize, restart_on_exit: bool) -> (Dispatcher, Inboxes) {
        let (spawner, inboxes) = fake_spawner();
        let config = PoolConfig {
            workers,
            restart_on_exit,
            ..PoolConfig::default()
        };
        let (stats_tx, _) = broadcast::channel(4);
        let dispatcher =
            Dispatcher::new(&config, spawner, stats_tx, Arc::new(AtomicUsize::new(0))).unwrap();
        (dispatcher, inboxes)
    }

    fn submit(d: &mut Dispatcher, id: &str) -> oneshot::Receiver<TaskResult> {
        let (reply, rx) = oneshot::channel();
        let task = Task::new(id, TaskType::ReadFile, json!({}));
        d.enqueue(task, Duration::from_secs(1), reply);
        rx
    }

    fn ok(task_id: &str, worker_id: usize) -> WorkerEvent {
        WorkerEvent::Result(TaskResult::ok(task_id, json!(null), Duration::ZERO, worker_id))
    }

    #[test]
    fn test_queue_waits_for_idle_worker() {
        let (mut d, _inboxes) = dispatcher(1, true);

        let mut first = submit(&mut d, "a");
        let mut second = submit(&mut d, "b");
        assert_eq!(d.queue.len(), 1);
        assert!(d.in_flight.contains_key(&0));

        d.on_event(ok("a", 0));
        assert_eq!(first.try_recv().unwrap().task_id, "a");
        assert!(second.try_recv().is_err());
        assert!(d.queue.is_empty());

        d.on_event(ok("b", 0));
        assert!(second.try_recv().unwrap().success);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (mut d, _inboxes) = dispatcher(1, true);

        let _first = submit(&mut d, "same");
        let mut dup = submit(&mut d, "same");

        let result = dup.try_recv().unwrap();
        assert!(!result.success);
        assert_eq!(result.worker_id, COORDINATOR_ID);
        assert!(result.error.unwrap().contains("Duplicate"));

        // The id is free again once the first finishes.
        d.on_event(ok("same", 0));
        let mut again = submit(&mut d, "same");
        assert!(again.try_recv().is_err());
    }

    #[test]
    fn test_crash_restarts_with_new_id() {
        let (mut d, inboxes) = dispatcher(1, true);
        let mut pending = submit(&mut d, "a");

        d.on_event(WorkerEvent::Exited {
            worker_id: 0,
            clean: false,
        });

        let result = pending.try_recv().unwrap();
        assert!(result.error.unwrap().contains("Worker 0 exited"));

        assert_eq!(d.slots.len(), 1);
        assert_eq!(d.slots[0].handle.id, 1);
        assert_eq!(inboxes.lock().unwrap().len(), 2);

        let mut next = submit(&mut d, "b");
        assert!(d.in_flight.contains_key(&1));
        d.on_event(ok("b", 1));
        assert!(next.try_recv().unwrap().success);
    }

    #[test]
    fn test_crash_without_restart_shrinks_pool() {
        let (mut d, _inboxes) = dispatcher(2, false);

        d.on_event(WorkerEvent::Exited {
            worker_id: 1,
            clean: false,
        });
        assert_eq!(d.slots.len(), 1);
        assert_eq!(d.live.load(Ordering::Relaxed), 1);

        d.on_event(WorkerEvent::Exited {
            worker_id: 0,
            clean: false,
        });
        let mut orphan = submit(&mut d, "x");
        assert!(orphan.try_recv().unwrap().error.unwrap().contains("shut down"));
    }

    #[test]
    fn test_dead_inbox_requeues_task() {
        let (mut d, inboxes) = dispatcher(2, true);
        // Worker 0 disappears without reporting yet.
        inboxes.lock().unwrap().retain(|(id, _)| *id != 0);

        let _pending = submit(&mut d, "a");
        assert!(d.in_flight.contains_key(&1));
        assert!(!d.in_flight.contains_key(&0));
        assert!(d.queue.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_fails_outstanding() {
        let (mut d, _inboxes) = dispatcher(1, true);
        let mut running = submit(&mut d, "a");
        let mut queued = submit(&mut d, "b");

        d.shutdown().await;

        for rx in [&mut running, &mut queued] {
            let result = rx.try_recv().unwrap();
            assert!(result.error.unwrap().contains("shut down"));
        }
        assert!(d.slots.is_empty());

        let mut late = submit(&mut d, "c");
        assert!(!late.try_recv().unwrap().success);
    }
}
