//! Dispatch coordinator: provider registry, batch submission and task execution.

use crate::aggregate::GenerationResult;
use crate::config::DispatchConfig;
use crate::credentials::CredentialSet;
use crate::dispatch::batch::Batch;
use crate::dispatch::task::{expand_selections, GenerationTask, TaskId, TaskStatus};
use crate::error::{ArenaError, Result};
use crate::image::{GenerationOptions, GenerationRequest, ImageProvider, ImageProviderExt, RawResult};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;

/// Host-side hook run for every completed result once it is recorded.
///
/// Used to persist artifacts. Each call runs on its own task, detached from
/// the generation task, so a slow or panicking sink never holds a task in
/// `Running`. Errors and panics are logged and never change the result.
/// [`Batch::flush_sink`] waits for outstanding calls.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Handles one result of the batch whose prompt is `prompt`.
    async fn accept(&self, prompt: &str, result: &GenerationResult) -> Result<()>;
}

/// One batch submission.
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    prompt: String,
    selections: Vec<(String, u32)>,
    timeout: Option<Duration>,
    options: GenerationOptions,
    arena: bool,
}

impl BatchRequest {
    /// Creates a request for the given prompt with no providers selected.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Selects a provider, run `repeat` times.
    pub fn select(mut self, provider: impl Into<String>, repeat: u32) -> Self {
        self.selections.push((provider.into(), repeat));
        self
    }

    /// Overrides the per-task timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets generation options shared by every task.
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses positional slot labels (`Image 1`, `Image 2`, ...) for blind ranking.
    pub fn arena(mut self, arena: bool) -> Self {
        self.arena = arena;
        self
    }

    /// The prompt.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Selected (provider, repeat) pairs.
    pub fn selections(&self) -> &[(String, u32)] {
        &self.selections
    }
}

/// Builder for DispatchCoordinator.
#[derive(Default)]
pub struct DispatchCoordinatorBuilder {
    providers: Vec<Arc<dyn ImageProvider>>,
    config: DispatchConfig,
    sink: Option<Arc<dyn ResultSink>>,
}

impl DispatchCoordinatorBuilder {
    /// Creates a new builder with default configuration and no providers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under its `name()`.
    pub fn provider(self, provider: impl ImageProvider + 'static) -> Self {
        self.shared_provider(Arc::new(provider))
    }

    /// Registers an already shared provider.
    pub fn shared_provider(mut self, provider: Arc<dyn ImageProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the worker pool width.
    pub fn max_concurrency(mut self, width: usize) -> Self {
        self.config.max_concurrency = width;
        self
    }

    /// Sets the default per-task timeout.
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.config.task_timeout = timeout;
        self
    }

    /// Sets the maximum repeat count per provider.
    pub fn max_repeat(mut self, max_repeat: u32) -> Self {
        self.config.max_repeat = max_repeat;
        self
    }

    /// Sets retries on transient provider errors.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Attaches a result sink.
    pub fn result_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validates the configuration and builds the coordinator.
    pub fn build(self) -> Result<DispatchCoordinator> {
        self.config.validate()?;

        let mut registry = HashMap::new();
        let mut order = Vec::with_capacity(self.providers.len());
        for provider in self.providers {
            let name = provider.name().to_string();
            if registry.insert(name.clone(), provider).is_some() {
                return Err(ArenaError::Config(format!(
                    "provider registered twice: {name}"
                )));
            }
            order.push(name);
        }

        Ok(DispatchCoordinator {
            providers: registry,
            order,
            config: self.config,
            sink: self.sink,
            next_batch_id: AtomicU64::new(1),
        })
    }
}

/// Owns the provider registry and launches batches.
pub struct DispatchCoordinator {
    providers: HashMap<String, Arc<dyn ImageProvider>>,
    order: Vec<String>,
    config: DispatchConfig,
    sink: Option<Arc<dyn ResultSink>>,
    next_batch_id: AtomicU64,
}

impl DispatchCoordinator {
    /// Creates a new `DispatchCoordinatorBuilder`.
    pub fn builder() -> DispatchCoordinatorBuilder {
        DispatchCoordinatorBuilder::new()
    }

    /// Registered provider names, in registration order.
    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Looks up a registered provider.
    pub fn provider(&self, name: &str) -> Option<&Arc<dyn ImageProvider>> {
        self.providers.get(name)
    }

    /// Active configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Validates a request, expands it into tasks and starts them.
    ///
    /// Returns as soon as the tasks are queued; progress is observed through
    /// the returned [`Batch`]. Must be called from within a Tokio runtime.
    pub fn submit_batch(&self, request: BatchRequest, credentials: &CredentialSet) -> Result<Batch> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ArenaError::Config("submit_batch must be called from within a Tokio runtime".into())
        })?;

        let timeout = request.timeout.unwrap_or(self.config.task_timeout);
        self.validate(&request, credentials, timeout)?;

        let slots = expand_selections(&request.selections, request.arena)
            .map_err(|label| ArenaError::Validation(format!("duplicate slot label: {label}")))?;

        let tasks: Vec<GenerationTask> = slots
            .iter()
            .enumerate()
            .map(|(i, (provider, label))| GenerationTask::new(TaskId(i as u64), provider, label))
            .collect();
        let queue: Vec<(TaskId, Arc<dyn ImageProvider>)> = tasks
            .iter()
            .map(|task| (task.id(), Arc::clone(&self.providers[task.provider()])))
            .collect();

        let width = self.config.max_concurrency.min(tasks.len());
        let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let generation = GenerationRequest::new(request.prompt).with_options(request.options);
        let batch = Batch::new(
            id,
            generation,
            request.arena,
            timeout,
            self.config.max_retries,
            width,
            Arc::new(credentials.clone()),
            tasks,
        );

        tracing::info!(
            batch_id = id,
            tasks = queue.len(),
            width,
            timeout_ms = timeout.as_millis() as u64,
            arena = request.arena,
            "submitted batch"
        );

        runtime.spawn(feed(batch.clone(), queue, self.sink.clone()));
        Ok(batch)
    }

    /// Runs one slot again, replacing its result when the new run finishes.
    ///
    /// The slot's latest task must be terminal. The new task gets a fresh id
    /// and the same slot label.
    pub fn rerun_slot(&self, batch: &Batch, slot_label: &str) -> Result<TaskId> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ArenaError::Config("rerun_slot must be called from within a Tokio runtime".into())
        })?;

        let previous = batch
            .tasks()
            .into_iter()
            .rev()
            .find(|task| task.slot_label() == slot_label)
            .ok_or_else(|| ArenaError::Validation(format!("unknown slot: {slot_label}")))?;
        if !previous.status().is_terminal() {
            return Err(ArenaError::Validation(format!(
                "slot {slot_label} is still {}",
                previous.status()
            )));
        }
        let provider = self
            .providers
            .get(previous.provider())
            .cloned()
            .ok_or_else(|| {
                ArenaError::Validation(format!("unknown provider: {}", previous.provider()))
            })?;

        let id = batch.push_task(|id| GenerationTask::retry_of(&previous, id));
        tracing::info!(batch_id = batch.id(), task_id = %id, slot = slot_label, "re-running slot");

        runtime.spawn(feed(batch.clone(), vec![(id, provider)], self.sink.clone()));
        Ok(id)
    }

    fn validate(
        &self,
        request: &BatchRequest,
        credentials: &CredentialSet,
        timeout: Duration,
    ) -> Result<()> {
        if request.prompt.trim().is_empty() {
            return Err(ArenaError::Validation("prompt must not be empty".into()));
        }
        if request.selections.is_empty() {
            return Err(ArenaError::Validation(
                "at least one provider must be selected".into(),
            ));
        }
        if timeout.is_zero() {
            return Err(ArenaError::Validation("task timeout must be positive".into()));
        }

        for (name, repeat) in &request.selections {
            let provider = self
                .providers
                .get(name)
                .ok_or_else(|| ArenaError::Validation(format!("unknown provider: {name}")))?;
            if *repeat == 0 || *repeat > self.config.max_repeat {
                return Err(ArenaError::Validation(format!(
                    "repeat count for {name} must be between 1 and {}",
                    self.config.max_repeat
                )));
            }
            // Fail fast before spawning anything.
            if provider.requires_credential() && !credentials.contains(name) {
                return Err(ArenaError::Validation(format!(
                    "{name} requires an API key"
                )));
            }
        }

        Ok(())
    }
}

/// Starts queued tasks in submission order as pool slots free up.
async fn feed(
    batch: Batch,
    queue: Vec<(TaskId, Arc<dyn ImageProvider>)>,
    sink: Option<Arc<dyn ResultSink>>,
) {
    let epoch = batch.cancel_epoch();
    let semaphore = Arc::clone(&batch.inner.semaphore);

    for (task_id, provider) in queue {
        let permit = tokio::select! {
            biased;
            _ = batch.canceled_since(epoch) => {
                // cancel_all already moved every queued task to Canceled.
                return;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        if !batch.start_task(task_id) {
            continue;
        }

        tokio::spawn(run_task(
            batch.clone(),
            task_id,
            provider,
            epoch,
            permit,
            sink.clone(),
        ));
    }
}

/// Drives one running task to a terminal status.
async fn run_task(
    batch: Batch,
    task_id: TaskId,
    provider: Arc<dyn ImageProvider>,
    epoch: u64,
    _permit: OwnedSemaphorePermit,
    sink: Option<Arc<dyn ResultSink>>,
) {
    let inner = &batch.inner;
    let credential = inner.credentials.get(provider.name());
    tracing::debug!(batch_id = inner.id, task_id = %task_id, provider = provider.name(), "task running");

    let call = provider.invoke(&inner.request, credential, inner.max_retries);
    let outcome = tokio::select! {
        biased;
        _ = batch.canceled_since(epoch) => None,
        result = tokio::time::timeout(inner.timeout, call) => Some(result),
    };

    let (status, raw) = match outcome {
        None => {
            tracing::debug!(batch_id = inner.id, task_id = %task_id, "in-flight call dropped after cancel");
            return;
        }
        Some(Ok(raw)) => (TaskStatus::Completed, raw),
        Some(Err(_)) => {
            tracing::warn!(
                batch_id = inner.id,
                task_id = %task_id,
                provider = provider.name(),
                timeout_ms = inner.timeout.as_millis() as u64,
                "task timed out"
            );
            (
                TaskStatus::Failed,
                RawResult::Failure(format!("timed out after {:?}", inner.timeout)),
            )
        }
    };

    if let RawResult::Failure(message) = &raw {
        tracing::warn!(batch_id = inner.id, task_id = %task_id, provider = provider.name(), "generation failed: {message}");
    }

    // Counted before the result lands so flush_sink never sees a gap.
    let sink = sink.filter(|_| status == TaskStatus::Completed);
    let preview = sink.as_ref().map(|_| {
        let slot = batch
            .lock()
            .tasks
            .get(task_id.0 as usize)
            .map(|task| task.slot_label().to_string())
            .unwrap_or_default();
        batch.sink_started();
        GenerationResult::from_raw(slot, provider.name(), task_id, raw.clone())
    });

    let recorded = batch.finish_task(task_id, status, raw);
    if !recorded && preview.is_some() {
        batch.sink_finished();
    }
    if let (Some(sink), Some(preview), true) = (sink, preview, recorded) {
        tokio::spawn(async move {
            let accepted = AssertUnwindSafe(sink.accept(batch.prompt(), &preview))
                .catch_unwind()
                .await;
            match accepted {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(batch_id = batch.id(), task_id = %task_id, "result sink failed: {e}");
                }
                Err(_) => {
                    tracing::error!(batch_id = batch.id(), task_id = %task_id, "result sink panicked");
                }
            }
            batch.sink_finished();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::image::RawImage;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Script {
        Image(Duration),
        Fail,
        Hang,
    }

    struct Scripted {
        name: String,
        script: Script,
        calls: Arc<AtomicU32>,
        needs_key: bool,
    }

    impl Scripted {
        fn new(name: &str, script: Script) -> Self {
            Self {
                name: name.to_string(),
                script,
                calls: Arc::new(AtomicU32::new(0)),
                needs_key: false,
            }
        }

        fn needs_key(mut self) -> Self {
            self.needs_key = true;
            self
        }
    }

    #[async_trait]
    impl ImageProvider for Scripted {
        async fn generate(
            &self,
            _request: &GenerationRequest,
            _credential: Option<&Credential>,
        ) -> Result<RawImage> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script {
                Script::Image(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(RawImage::Url(format!("https://img.test/{}/{n}.png", self.name)))
                }
                Script::Fail => Err(ArenaError::Api {
                    status: 500,
                    message: "boom".into(),
                }),
                Script::Hang => std::future::pending().await,
            }
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn requires_credential(&self) -> bool {
            self.needs_key
        }
    }

    fn ms(n: u64) -> Script {
        Script::Image(Duration::from_millis(n))
    }

    fn no_keys() -> CredentialSet {
        CredentialSet::new()
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_isolated() {
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("a", ms(30)))
            .provider(Scripted::new("b", ms(10)))
            .provider(Scripted::new("c", ms(20)))
            .provider(Scripted::new("d", Script::Fail))
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox")
            .select("a", 1)
            .select("b", 1)
            .select("c", 1)
            .select("d", 1);

        let batch = coordinator.submit_batch(request, &no_keys()).unwrap();
        let status = batch.wait().await;

        assert_eq!(status.total, 4);
        assert_eq!(status.completed, 4);
        let view = batch.current_view();
        assert_eq!(view.len(), 4);
        assert_eq!(view.iter().filter(|r| r.is_ok()).count(), 3);
        let failed = batch.result("d").unwrap();
        assert_eq!(failed.outcome, Err("API error: 500 - boom".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_arrive_in_completion_order() {
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("slow", ms(50)))
            .provider(Scripted::new("fast", ms(5)))
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox").select("slow", 1).select("fast", 1);

        let batch = coordinator.submit_batch(request, &no_keys()).unwrap();
        batch.wait().await;

        let labels: Vec<_> = batch.current_view().into_iter().map(|r| r.slot_label).collect();
        assert_eq!(labels, ["fast", "slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_slots_are_unique() {
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("a", ms(5)))
            .provider(Scripted::new("b", ms(5)))
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox").select("a", 2).select("b", 1);

        let batch = coordinator.submit_batch(request, &no_keys()).unwrap();
        batch.wait().await;

        let mut labels: Vec<_> = batch.current_view().into_iter().map(|r| r.slot_label).collect();
        labels.sort();
        assert_eq!(labels, ["a (Image 1)", "a (Image 2)", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arena_labels_hide_providers() {
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("a", ms(5)))
            .provider(Scripted::new("b", ms(5)))
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox")
            .select("a", 2)
            .select("b", 1)
            .arena(true);

        let batch = coordinator.submit_batch(request, &no_keys()).unwrap();
        assert!(batch.is_arena());
        batch.wait().await;

        let tasks = batch.tasks();
        let labels: Vec<_> = tasks.iter().map(|t| t.slot_label()).collect();
        assert_eq!(labels, ["Image 1", "Image 2", "Image 3"]);
        assert_eq!(tasks[2].provider(), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_only_the_slow_task() {
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("hang", Script::Hang))
            .provider(Scripted::new("fast", ms(10)))
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox")
            .select("hang", 1)
            .select("fast", 1)
            .with_timeout(Duration::from_secs(1));

        let start = tokio::time::Instant::now();
        let batch = coordinator.submit_batch(request, &no_keys()).unwrap();
        let status = batch.wait().await;

        assert_eq!(status.failed, 1);
        assert_eq!(status.completed, 1);
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(
            batch.result("hang").unwrap().outcome,
            Err("timed out after 1s".to_string())
        );
        assert!(batch.result("fast").unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_skips_queued_tasks() {
        let provider = Scripted::new("hang", Script::Hang);
        let calls = Arc::clone(&provider.calls);
        let coordinator = DispatchCoordinator::builder()
            .provider(provider)
            .max_concurrency(3)
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox").select("hang", 5);

        let batch = coordinator.submit_batch(request, &no_keys()).unwrap();
        let mut rx = batch.subscribe();
        rx.wait_for(|s| s.running == 3).await.unwrap();
        assert_eq!(batch.status().queued, 2);

        assert_eq!(batch.cancel_all(), 5);
        let status = batch.wait().await;
        assert_eq!(status.canceled, 5);
        assert!(status.is_complete());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let never_started = batch
            .tasks()
            .iter()
            .filter(|t| t.started_at().is_none())
            .count();
        assert_eq!(never_started, 2);
        assert!(calls.load(Ordering::SeqCst) <= 3);
        assert!(batch.current_view().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_narrow_pool_still_finishes() {
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("a", ms(10)))
            .max_concurrency(1)
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox").select("a", 4);

        let batch = coordinator.submit_batch(request, &no_keys()).unwrap();
        let status = batch.wait().await;

        assert_eq!(status.completed, 4);
        assert_eq!(batch.current_view().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_replaces_slot_in_place() {
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("a", ms(10)))
            .provider(Scripted::new("b", ms(20)))
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox").select("a", 1).select("b", 1);
        let batch = coordinator.submit_batch(request, &no_keys()).unwrap();
        batch.wait().await;
        let before = batch.current_view();
        let revision = batch.results_revision();

        let task_id = coordinator.rerun_slot(&batch, "a").unwrap();
        assert!(!batch.is_complete());
        let status = batch.wait().await;

        assert_eq!(status.total, 3);
        let after = batch.current_view();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].slot_label, before[0].slot_label);
        assert_eq!(after[0].task_id, task_id);
        assert_ne!(after[0].outcome, before[0].outcome);
        assert!(batch.results_revision() > revision);
        assert_eq!(batch.tasks()[task_id.0 as usize].attempt(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_rejects_running_or_unknown_slot() {
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("hang", Script::Hang))
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox").select("hang", 1);
        let batch = coordinator.submit_batch(request, &no_keys()).unwrap();
        batch.subscribe().wait_for(|s| s.running == 1).await.unwrap();

        assert!(matches!(
            coordinator.rerun_slot(&batch, "hang"),
            Err(ArenaError::Validation(_))
        ));
        assert!(matches!(
            coordinator.rerun_slot(&batch, "nope"),
            Err(ArenaError::Validation(_))
        ));
        batch.cancel_all();
    }

    #[tokio::test]
    async fn test_submit_validation() {
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("a", ms(1)))
            .provider(Scripted::new("keyed", ms(1)).needs_key())
            .build()
            .unwrap();
        let keys = no_keys();

        let cases = [
            BatchRequest::new("   ").select("a", 1),
            BatchRequest::new("a red fox"),
            BatchRequest::new("a red fox").select("missing", 1),
            BatchRequest::new("a red fox").select("a", 0),
            BatchRequest::new("a red fox").select("a", 6),
            BatchRequest::new("a red fox").select("keyed", 1),
            BatchRequest::new("a red fox").select("a", 1).select("a", 1),
            BatchRequest::new("a red fox")
                .select("a", 1)
                .with_timeout(Duration::ZERO),
        ];
        for request in cases {
            let err = coordinator.submit_batch(request.clone(), &keys).unwrap_err();
            assert!(
                matches!(err, ArenaError::Validation(_)),
                "{request:?} gave {err:?}"
            );
        }

        let keys = CredentialSet::new().with("keyed", "sk-test");
        let request = BatchRequest::new("a red fox").select("keyed", 1);
        assert!(coordinator.submit_batch(request, &keys).is_ok());
    }

    #[test]
    fn test_submit_requires_runtime() {
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("a", ms(1)))
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox").select("a", 1);
        assert!(matches!(
            coordinator.submit_batch(request, &no_keys()),
            Err(ArenaError::Config(_))
        ));
    }

    #[test]
    fn test_builder_rejects_duplicates_and_bad_config() {
        let duplicate = DispatchCoordinator::builder()
            .provider(Scripted::new("a", ms(1)))
            .provider(Scripted::new("a", ms(1)))
            .build();
        assert!(matches!(duplicate, Err(ArenaError::Config(_))));

        let zero_width = DispatchCoordinator::builder().max_concurrency(0).build();
        assert!(matches!(zero_width, Err(ArenaError::Config(_))));

        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("b", ms(1)))
            .provider(Scripted::new("a", ms(1)))
            .build()
            .unwrap();
        assert_eq!(coordinator.provider_names().collect::<Vec<_>>(), ["b", "a"]);
        assert!(coordinator.provider("a").is_some());
    }

    struct Recorder(Mutex<Vec<(String, String)>>);

    #[async_trait]
    impl ResultSink for Recorder {
        async fn accept(&self, prompt: &str, result: &GenerationResult) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .push((prompt.to_string(), result.slot_label.clone()));
            Err(ArenaError::Config("disk full".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_sees_every_completed_result() {
        let sink = Arc::new(Recorder(Mutex::new(Vec::new())));
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("a", ms(5)))
            .provider(Scripted::new("d", Script::Fail))
            .result_sink(sink.clone())
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox").select("a", 2).select("d", 1);

        let batch = coordinator.submit_batch(request, &no_keys()).unwrap();
        batch.wait().await;
        batch.flush_sink().await;

        let mut seen = sink.0.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(prompt, _)| prompt == "a red fox"));
        // sink errors never turn a success into a failure
        assert_eq!(batch.current_view().iter().filter(|r| r.is_ok()).count(), 2);
    }

    struct Stalled;

    #[async_trait]
    impl ResultSink for Stalled {
        async fn accept(&self, _prompt: &str, _result: &GenerationResult) -> Result<()> {
            std::future::pending().await
        }
    }

    struct Exploding;

    #[async_trait]
    impl ResultSink for Exploding {
        async fn accept(&self, _prompt: &str, result: &GenerationResult) -> Result<()> {
            panic!("cannot persist {}", result.slot_label);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sink_does_not_block_completion() {
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("a", ms(5)))
            .result_sink(Arc::new(Stalled))
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox").select("a", 1);

        let batch = coordinator.submit_batch(request, &no_keys()).unwrap();
        let status = tokio::time::timeout(Duration::from_secs(60), batch.wait())
            .await
            .unwrap();

        assert_eq!(status.completed, 1);
        assert_eq!(batch.tasks()[0].status(), TaskStatus::Completed);
        assert!(batch.result("a").unwrap().is_ok());
        assert_eq!(batch.pending_sink_jobs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_sink_is_contained() {
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("a", ms(5)))
            .provider(Scripted::new("b", ms(10)))
            .result_sink(Arc::new(Exploding))
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox").select("a", 1).select("b", 1);

        let batch = coordinator.submit_batch(request, &no_keys()).unwrap();
        let status = batch.wait().await;
        batch.flush_sink().await;

        assert_eq!(status.completed, 2);
        assert_eq!(batch.pending_sink_jobs(), 0);
        assert_eq!(batch.current_view().iter().filter(|r| r.is_ok()).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_after_cancel_is_discarded() {
        let coordinator = DispatchCoordinator::builder()
            .provider(Scripted::new("hang", Script::Hang))
            .build()
            .unwrap();
        let request = BatchRequest::new("a red fox").select("hang", 1);
        let batch = coordinator.submit_batch(request, &no_keys()).unwrap();
        batch.subscribe().wait_for(|s| s.running == 1).await.unwrap();

        batch.cancel_all();
        let recorded = batch.finish_task(
            TaskId(0),
            TaskStatus::Completed,
            RawResult::ImageUrl("https://img.test/late.png".into()),
        );

        assert!(!recorded);
        assert!(batch.result("hang").is_none());
        assert_eq!(batch.tasks()[0].status(), TaskStatus::Canceled);
    }
}
