//! Batch handle: shared task table, results and progress signalling.

use crate::aggregate::{GenerationResult, ResultAggregator};
use crate::credentials::CredentialSet;
use crate::dispatch::task::{GenerationTask, TaskId, TaskStatus};
use crate::image::{GenerationRequest, RawResult};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

/// Task counts for a batch at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStatus {
    /// Tasks submitted, including re-runs.
    pub total: usize,
    /// Tasks waiting for a worker.
    pub queued: usize,
    /// Tasks with a provider call in flight.
    pub running: usize,
    /// Tasks whose provider call returned.
    pub completed: usize,
    /// Tasks that timed out.
    pub failed: usize,
    /// Tasks canceled before or during their call.
    pub canceled: usize,
}

impl BatchStatus {
    fn from_tasks(tasks: &[GenerationTask]) -> Self {
        let mut status = Self {
            total: tasks.len(),
            ..Self::default()
        };
        for task in tasks {
            match task.status() {
                TaskStatus::Queued => status.queued += 1,
                TaskStatus::Running => status.running += 1,
                TaskStatus::Completed => status.completed += 1,
                TaskStatus::Failed => status.failed += 1,
                TaskStatus::Canceled => status.canceled += 1,
            }
        }
        status
    }

    /// Tasks not yet terminal.
    pub fn active(&self) -> usize {
        self.queued + self.running
    }

    /// Returns true once every task is terminal.
    pub fn is_complete(&self) -> bool {
        self.active() == 0
    }
}

/// Consistent copy of a batch's tasks and results.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    /// Task counts.
    pub status: BatchStatus,
    /// Tasks in submission order.
    pub tasks: Vec<GenerationTask>,
    /// Results in arrival order.
    pub results: Vec<GenerationResult>,
}

pub(crate) struct BatchState {
    pub(crate) tasks: Vec<GenerationTask>,
    pub(crate) results: ResultAggregator,
}

pub(crate) struct BatchInner {
    pub(crate) id: u64,
    pub(crate) request: GenerationRequest,
    pub(crate) arena: bool,
    pub(crate) timeout: Duration,
    pub(crate) max_retries: u32,
    pub(crate) semaphore: Arc<Semaphore>,
    pub(crate) credentials: Arc<CredentialSet>,
    state: Mutex<BatchState>,
    progress: watch::Sender<BatchStatus>,
    cancel: watch::Sender<u64>,
    sink_jobs: watch::Sender<usize>,
}

/// Handle to one submitted batch.
///
/// Cheap to clone; every clone observes the same batch. All methods are safe
/// to call while tasks are running and never wait on task completion,
/// except [`Batch::wait`].
#[derive(Clone)]
pub struct Batch {
    pub(crate) inner: Arc<BatchInner>,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.inner.id)
            .field("prompt", &self.inner.request.prompt)
            .field("status", &self.status())
            .finish()
    }
}

impl Batch {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        request: GenerationRequest,
        arena: bool,
        timeout: Duration,
        max_retries: u32,
        width: usize,
        credentials: Arc<CredentialSet>,
        tasks: Vec<GenerationTask>,
    ) -> Self {
        let status = BatchStatus::from_tasks(&tasks);
        let (progress, _) = watch::channel(status);
        let (cancel, _) = watch::channel(0);
        let (sink_jobs, _) = watch::channel(0);
        Self {
            inner: Arc::new(BatchInner {
                id,
                request,
                arena,
                timeout,
                max_retries,
                semaphore: Arc::new(Semaphore::new(width)),
                credentials,
                state: Mutex::new(BatchState {
                    tasks,
                    results: ResultAggregator::new(),
                }),
                progress,
                cancel,
                sink_jobs,
            }),
        }
    }

    /// Batch identifier, unique per coordinator.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The prompt every task of this batch was given.
    pub fn prompt(&self) -> &str {
        &self.inner.request.prompt
    }

    /// Whether slot labels are positional (arena mode).
    pub fn is_arena(&self) -> bool {
        self.inner.arena
    }

    /// Per-task timeout.
    pub fn task_timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Current task counts.
    pub fn status(&self) -> BatchStatus {
        BatchStatus::from_tasks(&self.lock().tasks)
    }

    /// Returns true once every task is terminal.
    pub fn is_complete(&self) -> bool {
        self.status().is_complete()
    }

    /// Tasks in submission order.
    pub fn tasks(&self) -> Vec<GenerationTask> {
        self.lock().tasks.clone()
    }

    /// Results in arrival order.
    pub fn current_view(&self) -> Vec<GenerationResult> {
        self.lock().results.current_view()
    }

    /// Result currently held for a slot.
    pub fn result(&self, slot_label: &str) -> Option<GenerationResult> {
        self.lock().results.get(slot_label).cloned()
    }

    /// Status, tasks and results taken under one lock.
    pub fn snapshot(&self) -> BatchSnapshot {
        let state = self.lock();
        BatchSnapshot {
            status: BatchStatus::from_tasks(&state.tasks),
            tasks: state.tasks.clone(),
            results: state.results.current_view(),
        }
    }

    /// Streams status updates; the receiver sees every transition's outcome.
    pub fn subscribe(&self) -> watch::Receiver<BatchStatus> {
        self.inner.progress.subscribe()
    }

    /// Subscribes to result revisions (bumped on every insert or replacement).
    pub fn subscribe_results(&self) -> watch::Receiver<u64> {
        self.lock().results.subscribe()
    }

    /// Current result revision.
    pub fn results_revision(&self) -> u64 {
        self.lock().results.revision()
    }

    /// Waits until every task is terminal.
    pub async fn wait(&self) -> BatchStatus {
        let mut rx = self.subscribe();
        let status = match rx.wait_for(BatchStatus::is_complete).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        status
    }

    /// Waits until every result sink call started for this batch returned.
    ///
    /// Sinks run detached from their task, so a complete batch may still be
    /// persisting artifacts. Hosts call this before exiting.
    pub async fn flush_sink(&self) {
        let mut rx = self.inner.sink_jobs.subscribe();
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    /// Number of result sink calls still running.
    pub fn pending_sink_jobs(&self) -> usize {
        *self.inner.sink_jobs.borrow()
    }

    pub(crate) fn sink_started(&self) {
        self.inner.sink_jobs.send_modify(|pending| *pending += 1);
    }

    pub(crate) fn sink_finished(&self) {
        self.inner
            .sink_jobs
            .send_modify(|pending| *pending = pending.saturating_sub(1));
    }

    /// Cancels every task that is not terminal yet.
    ///
    /// Queued tasks never reach their provider. For running tasks the
    /// in-flight call is dropped at its next suspension point; work already
    /// sent to the provider is not recalled. Returns the number of tasks
    /// canceled.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.lock();
        let mut canceled = 0;
        for task in state.tasks.iter_mut() {
            if task.transition(TaskStatus::Canceled) {
                canceled += 1;
                tracing::debug!(batch_id = self.inner.id, task_id = %task.id(), slot = task.slot_label(), "task canceled");
            }
        }
        self.inner.cancel.send_modify(|epoch| *epoch += 1);
        self.publish(&state);
        tracing::info!(batch_id = self.inner.id, canceled, "canceled active generations");
        canceled
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn cancel_epoch(&self) -> u64 {
        *self.inner.cancel.borrow()
    }

    /// Resolves once `cancel_all` is called after `epoch` was observed.
    pub(crate) fn canceled_since(&self, epoch: u64) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.inner.cancel.subscribe();
        async move {
            let signalled = rx.wait_for(|current| *current != epoch).await.is_ok();
            if !signalled {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Appends a task to the table, returning its id.
    pub(crate) fn push_task(&self, build: impl FnOnce(TaskId) -> GenerationTask) -> TaskId {
        let mut state = self.lock();
        let id = TaskId(state.tasks.len() as u64);
        state.tasks.push(build(id));
        self.publish(&state);
        id
    }

    /// Queued -> Running. False if the task was canceled while queued.
    pub(crate) fn start_task(&self, id: TaskId) -> bool {
        let mut state = self.lock();
        let started = state
            .tasks
            .get_mut(id.0 as usize)
            .is_some_and(|task| task.transition(TaskStatus::Running));
        if started {
            self.publish(&state);
        }
        started
    }

    /// Running -> `status`, recording `raw` as the slot's result.
    ///
    /// A task canceled in the meantime keeps its status and the result is
    /// dropped. Returns whether the result was recorded.
    pub(crate) fn finish_task(&self, id: TaskId, status: TaskStatus, raw: RawResult) -> bool {
        let mut state = self.lock();
        let Some(task) = state.tasks.get_mut(id.0 as usize) else {
            return false;
        };
        if !task.transition(status) {
            tracing::debug!(
                batch_id = self.inner.id,
                task_id = %id,
                slot = task.slot_label(),
                current = %task.status(),
                "discarding late result"
            );
            return false;
        }

        let result = GenerationResult::from_raw(task.slot_label(), task.provider(), id, raw);
        state.results.insert(result);
        self.publish(&state);
        true
    }

    fn publish(&self, state: &BatchState) {
        let status = BatchStatus::from_tasks(&state.tasks);
        let was_complete = self.inner.progress.borrow().is_complete();
        self.inner.progress.send_replace(status);
        if status.is_complete() && !was_complete {
            tracing::info!(
                batch_id = self.inner.id,
                completed = status.completed,
                failed = status.failed,
                canceled = status.canceled,
                succeeded = state.results.succeeded(),
                "batch complete"
            );
        }
    }
}
