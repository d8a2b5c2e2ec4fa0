//! In-process work queue with a tokio worker pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::queue::{Backoff, EnqueueOptions, QueuedTask, TaskHandler, TaskId, WorkQueue};

#[derive(Debug, Clone)]
struct PendingTask {
    id: TaskId,
    payload: Value,
    priority: i32,
    seq: u64,
    attempt: u32,
    max_attempts: u32,
    backoff: Option<Backoff>,
    dedupe_key: Option<String>,
    ready_at: Instant,
}

/// A task that exhausted its attempts.
#[derive(Debug, Clone)]
pub struct FailedTask {
    pub id: TaskId,
    pub payload: Value,
    pub attempts: u32,
    pub error: String,
}

/// Counters for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingTask>,
    active: HashMap<TaskId, PendingTask>,
    dedupe: HashMap<String, TaskId>,
    completed: u64,
    failed: Vec<FailedTask>,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }
}

enum Take {
    Ready(QueuedTask),
    WaitUntil(Instant),
    Empty,
}

struct Inner {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Notify,
    closed: AtomicBool,
    seq: AtomicU64,
}

impl Inner {
    fn take(&self, queue: &str) -> Take {
        let mut queues = self.queues.lock();
        let Some(state) = queues.get_mut(queue) else {
            return Take::Empty;
        };
        let now = Instant::now();

        let next = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, t)| t.ready_at <= now)
            .max_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(b.seq.cmp(&a.seq)))
            .map(|(index, _)| index);

        match next {
            Some(index) => {
                let task = state.pending.remove(index);
                let delivered = QueuedTask {
                    id: task.id.clone(),
                    queue: queue.to_string(),
                    payload: task.payload.clone(),
                    attempt: task.attempt,
                    max_attempts: task.max_attempts,
                };
                state.active.insert(task.id.clone(), task);
                Take::Ready(delivered)
            }
            None => match state.pending.iter().map(|t| t.ready_at).min() {
                Some(at) => Take::WaitUntil(at),
                None => Take::Empty,
            },
        }
    }

    fn finish(&self, queue: &str, task_id: &str, outcome: anyhow::Result<()>) {
        let mut queues = self.queues.lock();
        let Some(state) = queues.get_mut(queue) else {
            return;
        };
        let Some(mut task) = state.active.remove(task_id) else {
            return;
        };

        match outcome {
            Ok(()) => {
                state.completed += 1;
                release_dedupe(state, &task);
            }
            Err(err) if task.attempt < task.max_attempts => {
                let delay = task
                    .backoff
                    .map(|b| b.delay(task.attempt))
                    .unwrap_or(Duration::ZERO);
                warn!(
                    "Task {} on '{}' failed (attempt {}/{}), retrying in {:?}: {:#}",
                    task.id, queue, task.attempt, task.max_attempts, delay, err
                );
                task.attempt += 1;
                task.ready_at = Instant::now() + delay;
                state.pending.push(task);
            }
            Err(err) => {
                error!(
                    "Task {} on '{}' failed after {} attempts: {:#}",
                    task.id, queue, task.attempt, err
                );
                release_dedupe(state, &task);
                state.failed.push(FailedTask {
                    id: task.id,
                    payload: task.payload,
                    attempts: task.attempt,
                    error: format!("{:#}", err),
                });
            }
        }
    }

    fn all_idle(&self) -> bool {
        self.queues.lock().values().all(QueueState::is_idle)
    }
}

fn release_dedupe(state: &mut QueueState, task: &PendingTask) {
    if let Some(key) = &task.dedupe_key {
        if state.dedupe.get(key) == Some(&task.id) {
            state.dedupe.remove(key);
        }
    }
}

/// In-memory queue shared by producers and consumers.
///
/// Clones share the same queues. Delivery is at-least-once within the
/// process: a failed handler run is retried per the task's `attempts` and
/// `backoff`.
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Start `concurrency` workers delivering tasks from `queue` to `handler`.
    pub fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn TaskHandler>,
        concurrency: usize,
    ) -> Consumer {
        let concurrency = concurrency.max(1);
        info!("Starting {} worker(s) on queue '{}'", concurrency, queue);

        let workers = (0..concurrency)
            .map(|index| {
                let inner = Arc::clone(&self.inner);
                let handler = Arc::clone(&handler);
                let queue = queue.to_string();
                tokio::spawn(async move { worker_loop(inner, queue, handler, index).await })
            })
            .collect();

        Consumer {
            queue: queue.to_string(),
            workers,
        }
    }

    /// Snapshot of tasks waiting on a queue, in delivery order.
    pub fn pending_tasks(&self, queue: &str) -> Vec<QueuedTask> {
        let queues = self.inner.queues.lock();
        let Some(state) = queues.get(queue) else {
            return Vec::new();
        };
        let mut pending = state.pending.clone();
        pending.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        pending
            .into_iter()
            .map(|t| QueuedTask {
                id: t.id,
                queue: queue.to_string(),
                payload: t.payload,
                attempt: t.attempt,
                max_attempts: t.max_attempts,
            })
            .collect()
    }

    /// Tasks on a queue that exhausted their attempts.
    pub fn failed_tasks(&self, queue: &str) -> Vec<FailedTask> {
        self.inner
            .queues
            .lock()
            .get(queue)
            .map(|s| s.failed.clone())
            .unwrap_or_default()
    }

    pub fn stats(&self, queue: &str) -> QueueStats {
        self.inner
            .queues
            .lock()
            .get(queue)
            .map(|s| QueueStats {
                pending: s.pending.len(),
                active: s.active.len(),
                completed: s.completed,
                failed: s.failed.len() as u64,
            })
            .unwrap_or_default()
    }

    /// Wait until every queue has no pending or active tasks.
    pub async fn wait_idle(&self, timeout: Duration) -> QueueResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.all_idle() {
                return Ok(());
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(QueueError::DrainTimeout(timeout.as_millis() as u64));
                }
            }
        }
    }

    /// Stop accepting tasks and wake all workers so they exit.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            info!("Closing work queues");
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Wait for outstanding work, then close.
    pub async fn drain(&self, timeout: Duration) -> QueueResult<()> {
        let result = self.wait_idle(timeout).await;
        self.close();
        result
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(
        &self,
        queue: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> QueueResult<TaskId> {
        if self.is_closed() {
            return Err(QueueError::Closed(queue.to_string()));
        }
        if options.attempts == 0 {
            return Err(QueueError::InvalidOptions(
                "attempts must be at least 1".to_string(),
            ));
        }

        let id = {
            let mut queues = self.inner.queues.lock();
            let state = queues.entry(queue.to_string()).or_default();

            if let Some(existing) = options
                .dedupe_key
                .as_ref()
                .and_then(|key| state.dedupe.get(key))
            {
                debug!("Task deduplicated on '{}' as {}", queue, existing);
                return Ok(existing.clone());
            }

            let id = uuid::Uuid::new_v4().to_string();
            if let Some(key) = &options.dedupe_key {
                state.dedupe.insert(key.clone(), id.clone());
            }
            state.pending.push(PendingTask {
                id: id.clone(),
                payload,
                priority: options.priority,
                seq: self.inner.seq.fetch_add(1, Ordering::SeqCst),
                attempt: 1,
                max_attempts: options.attempts,
                backoff: options.backoff,
                dedupe_key: options.dedupe_key,
                ready_at: Instant::now(),
            });
            id
        };

        debug!("Enqueued task {} on '{}'", id, queue);
        self.inner.notify.notify_waiters();
        Ok(id)
    }
}

async fn worker_loop(inner: Arc<Inner>, queue: String, handler: Arc<dyn TaskHandler>, index: usize) {
    loop {
        let notified = inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if inner.closed.load(Ordering::SeqCst) {
            break;
        }

        match inner.take(&queue) {
            Take::Ready(task) => {
                debug!(
                    "Worker {} on '{}' picked task {} (attempt {})",
                    index, queue, task.id, task.attempt
                );
                let outcome = handler.handle(&task).await;
                inner.finish(&queue, &task.id, outcome);
                inner.notify.notify_waiters();
            }
            Take::WaitUntil(at) => {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep_until(at) => {}
                }
            }
            Take::Empty => notified.await,
        }
    }
    debug!("Worker {} on '{}' stopped", index, queue);
}

/// Handle to the workers of one queue.
pub struct Consumer {
    queue: String,
    workers: Vec<JoinHandle<()>>,
}

impl Consumer {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait for all workers to exit. Call after [`MemoryQueue::close`].
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(err) = worker.await {
                error!("Worker on '{}' panicked: {}", self.queue, err);
            }
        }
    }
}
