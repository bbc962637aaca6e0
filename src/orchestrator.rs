//! Task lifecycle orchestration: start, poll, cancel, reclaim.
//!
//! ## State machine
//!
//! ```text
//!            start()            background run
//!  (none) ───────────▶ pending ───────────────▶ processing ──┬──▶ completed
//!                         │                        │  ▲       │
//!                         │ cancel()               │  │ poll  └──▶ failed
//!                         └──────────┬─────────────┘  │ (getResult, status
//!                                    ▼                │  providers only)
//!                           failed / cancelled ───────┘
//! ```
//!
//! * `start` never waits for the engine. It validates the request, records a
//!   `pending` task and spawns the work on the tokio runtime.
//! * Engines with the [`StatusProvider`] role hand back a provider task
//!   handle instead of a final result. The task then stays `processing` and
//!   every `get_result` call asks the provider for fresh status. Polling is
//!   caller-driven: no query, no provider traffic.
//! * The first `get_result` that observes a terminal state stamps the
//!   completion time and starts the retention clock. A periodic sweep deletes
//!   tasks older than the retention window and stops itself once there is
//!   nothing left to reclaim.
//!
//! ## Concurrency
//!
//! The task map is a `parking_lot::Mutex` that is held only for short,
//! synchronous updates and never across an `.await`. A background run and a
//! concurrent `get_result` may race; the last writer wins, but a task that has
//! reached a terminal state is never written again.

use crate::capability::FeatureTag;
use crate::config::OrchestratorConfig;
use crate::error::{
    DocflowError, ProcessorError, TaskError, TaskErrorCode, MISSING_PROVIDER_HANDLE,
    MISSING_RESULT,
};
use crate::file::FileDescriptor;
use crate::processor::{ProcessResult, ProcessingContext, Processor, ProviderStatus};
use crate::registry::ProcessorRegistry;
use crate::resolver::{ConfigResolver, MergedConfiguration, Override};
use crate::task::{CancelResponse, StartResponse, Task, TaskResponse, TaskStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle transitions reported to logs and the event callback.
#[derive(Debug)]
enum TaskEvent {
    Processing,
    Deferred(String),
    Progress(TaskStatus, u8),
    Completed,
    Failed(TaskError),
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Tasks deleted by this sweep.
    pub reclaimed: usize,
    /// Finished tasks and tombstones still waiting for their window to pass.
    pub remaining: usize,
}

/// The asynchronous task orchestrator.
///
/// Cheap to clone: all clones share the same registry, resolver and task map.
///
/// # Example
///
/// ```rust,no_run
/// use edgequake_docflow::processors::PlainTextProcessor;
/// use edgequake_docflow::{FeatureTag, FileDescriptor, Orchestrator, OrchestratorConfig};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = OrchestratorConfig::builder()
///     .default_processor(FeatureTag::MarkdownConversion, "local-text")
///     .build()?;
/// let orchestrator = Orchestrator::in_memory(config);
/// orchestrator.install(Arc::new(PlainTextProcessor::new()))?;
///
/// let file = FileDescriptor::from_path("notes.txt").await?;
/// let started = orchestrator.start(file, FeatureTag::MarkdownConversion, None).await?;
/// loop {
///     let status = orchestrator.get_result(&started.request_id).await;
///     if status.is_terminal() {
///         println!("{status:?}");
///         break;
///     }
///     tokio::time::sleep(std::time::Duration::from_millis(200)).await;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    registry: Arc<ProcessorRegistry>,
    resolver: Arc<ConfigResolver>,
    config: OrchestratorConfig,
    tasks: Mutex<HashMap<String, Task>>,
    /// Reclaimed request ids and when they were reclaimed.
    tombstones: Mutex<HashMap<String, Instant>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProcessorRegistry>,
        resolver: Arc<ConfigResolver>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                resolver,
                config,
                tasks: Mutex::new(HashMap::new()),
                tombstones: Mutex::new(HashMap::new()),
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// An orchestrator with a fresh registry and an in-memory override store.
    pub fn in_memory(config: OrchestratorConfig) -> Self {
        Self::new(
            Arc::new(ProcessorRegistry::new()),
            Arc::new(ConfigResolver::in_memory()),
            config,
        )
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.inner.registry
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.inner.resolver
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Register a processor and load its template in one step.
    ///
    /// A template already loaded under the same id (e.g. from presets) is
    /// kept as-is.
    pub fn install(&self, processor: Arc<dyn Processor>) -> Result<(), DocflowError> {
        let id = processor.id().to_string();
        if self.inner.registry.contains(&id) {
            return Err(DocflowError::AlreadyRegistered { id });
        }
        match self.inner.resolver.add_template(processor.template().clone()) {
            Ok(()) | Err(DocflowError::DuplicateTemplate { .. }) => {}
            Err(e) => return Err(e),
        }
        self.inner.registry.register(processor)
    }

    // ── Requests ─────────────────────────────────────────────────────────

    /// Accept a processing request and launch it in the background.
    ///
    /// Returns as soon as the task is recorded; the response status is
    /// always `pending`.
    ///
    /// # Errors
    /// - `Validation`: blank file fields
    /// - `NoDefaultProcessor`: no id given and none configured for `feature`
    /// - `ProcessorNotFound`: the resolved id is not registered
    /// - `UnsupportedFeature`: the processor does not implement `feature`
    /// - `UnsupportedInput`: the declared capability rejects the file
    pub async fn start(
        &self,
        file: FileDescriptor,
        feature: FeatureTag,
        processor_id: Option<&str>,
    ) -> Result<StartResponse, DocflowError> {
        file.validate()?;

        let processor_id = match processor_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self
                .inner
                .config
                .default_for(feature)
                .map(str::to_string)
                .ok_or_else(|| DocflowError::NoDefaultProcessor {
                    feature: feature.to_string(),
                })?,
        };

        let processor = self.inner.registry.get(&processor_id)?;
        if !processor.supports(feature) || !processor.implements(feature) {
            return Err(DocflowError::UnsupportedFeature {
                id: processor_id,
                feature: feature.to_string(),
            });
        }

        let config = match self.inner.resolver.configuration_for(&processor_id).await {
            Ok(config) => config,
            Err(DocflowError::TemplateNotFound { .. }) => {
                debug!(
                    "No template loaded for '{}', using the processor's own",
                    processor_id
                );
                MergedConfiguration::merge(processor.template(), None)
            }
            Err(e) => return Err(e),
        };
        check_input(&processor_id, &file, feature, &config)?;

        let request_id = Uuid::new_v4().to_string();
        let task = Task::new(request_id.clone(), processor_id.clone(), config.clone());
        let token = task.cancel.clone();
        {
            let mut tasks = self.inner.tasks.lock();
            if tasks.contains_key(&request_id) {
                return Err(DocflowError::Internal(format!(
                    "request id collision: {request_id}"
                )));
            }
            tasks.insert(request_id.clone(), task);
        }

        info!(
            "Task {} created: {} via '{}' ({})",
            request_id, feature, processor_id, file.name
        );
        if let Some(cb) = &self.inner.config.event_callback {
            cb.on_task_created(&request_id, &processor_id);
        }

        tokio::spawn(Arc::clone(&self.inner).execute(
            request_id.clone(),
            processor,
            file,
            feature,
            config,
            token,
        ));

        Ok(StartResponse {
            request_id,
            status: TaskStatus::Pending,
        })
    }

    /// Current state of a task.
    ///
    /// Never fails: unknown ids yield a `failed` response with code
    /// `not_found` (or `expired` if the id was recently reclaimed). For a
    /// live task of a status-polling processor that already has a provider
    /// handle, the provider is queried first; a failed query is logged and
    /// the last known state returned.
    pub async fn get_result(&self, request_id: &str) -> TaskResponse {
        let poll = {
            let tasks = self.inner.tasks.lock();
            let Some(task) = tasks.get(request_id) else {
                drop(tasks);
                return self.inner.missing(request_id);
            };
            match (&task.provider_task_id, task.status.is_terminal()) {
                (Some(handle), false) => Some((
                    task.processor_id.clone(),
                    handle.clone(),
                    task.config.clone(),
                )),
                _ => None,
            }
        };

        if let Some((processor_id, handle, config)) = poll {
            self.inner
                .poll_provider(request_id, &processor_id, &handle, &config)
                .await;
        }

        let (response, first_terminal) = {
            let mut tasks = self.inner.tasks.lock();
            let Some(task) = tasks.get_mut(request_id) else {
                drop(tasks);
                return self.inner.missing(request_id);
            };
            let first_terminal = task.status.is_terminal() && task.completed_at.is_none();
            if first_terminal {
                task.completed_at = Some(Instant::now());
            }
            (task.snapshot(), first_terminal)
        };

        if first_terminal {
            debug!(
                "Task {} observed {}; retention clock started",
                request_id, response.status
            );
            Inner::ensure_sweeper(&self.inner);
        }
        response
    }

    /// Cancel a live task.
    ///
    /// Triggers the task's cancellation handle and marks it
    /// `failed/cancelled` immediately, whether or not the engine notices.
    pub fn cancel(&self, request_id: &str) -> CancelResponse {
        let outcome = {
            let mut tasks = self.inner.tasks.lock();
            match tasks.get_mut(request_id) {
                None => Err(format!("Task '{request_id}' not found")),
                Some(task) if task.status.is_terminal() => Err(format!(
                    "Task '{request_id}' already {}",
                    task.status
                )),
                Some(task) => {
                    task.cancel.cancel();
                    let error = TaskError::cancelled();
                    task.fail(error.clone());
                    Ok(error)
                }
            }
        };

        match outcome {
            Ok(error) => {
                self.inner.emit(request_id, TaskEvent::Failed(error));
                CancelResponse::ok(format!("Task '{request_id}' cancelled"))
            }
            Err(message) => {
                debug!("Cancel rejected: {}", message);
                CancelResponse::rejected(message)
            }
        }
    }

    // ── Processors & configuration ───────────────────────────────────────

    /// Effective configurations of the processors available right now,
    /// optionally restricted to those implementing `feature`.
    pub async fn list_processors(&self, feature: Option<FeatureTag>) -> Vec<MergedConfiguration> {
        let available = self.inner.registry.list_available(feature).await;
        let mut configs = Vec::with_capacity(available.len());
        for processor in available {
            match self.inner.resolver.configuration_for(processor.id()).await {
                Ok(config) => configs.push(config),
                Err(DocflowError::TemplateNotFound { .. }) => {
                    configs.push(MergedConfiguration::merge(processor.template(), None))
                }
                Err(e) => warn!("Skipping '{}': {}", processor.id(), e),
            }
        }
        configs
    }

    /// Deep-merge a partial override for `processor_id` and return the new
    /// effective configuration.
    pub async fn update_configuration(
        &self,
        processor_id: &str,
        partial: Override,
    ) -> Result<MergedConfiguration, DocflowError> {
        self.inner.resolver.update(processor_id, partial).await
    }

    // ── Retention ────────────────────────────────────────────────────────

    /// Delete every task whose completion was observed longer ago than the
    /// retention window. Runs periodically on its own; public so hosts can
    /// force a sweep.
    pub fn sweep_expired(&self) -> SweepReport {
        self.inner.sweep()
    }

    /// Whether the background sweep timer is running.
    pub fn is_sweeping(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Number of task records currently held.
    pub fn task_count(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Cancel every live task, stop the sweep timer and dispose processors.
    pub async fn shutdown(&self) {
        let cancelled: Vec<String> = {
            let mut tasks = self.inner.tasks.lock();
            tasks
                .values_mut()
                .filter(|t| !t.status.is_terminal())
                .map(|t| {
                    t.cancel.cancel();
                    t.fail(TaskError::cancelled());
                    t.request_id.clone()
                })
                .collect()
        };
        for id in &cancelled {
            self.inner.emit(id, TaskEvent::Failed(TaskError::cancelled()));
        }
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
        self.inner.registry.dispose_all().await;
        info!(
            "Orchestrator shut down ({} live tasks cancelled)",
            cancelled.len()
        );
    }
}

/// Reject a file the processor's declared capability cannot take.
fn check_input(
    processor_id: &str,
    file: &FileDescriptor,
    feature: FeatureTag,
    config: &MergedConfiguration,
) -> Result<(), DocflowError> {
    let Some(capability) = config.capability(feature) else {
        return Err(DocflowError::UnsupportedFeature {
            id: processor_id.to_string(),
            feature: feature.to_string(),
        });
    };
    let reject = |reason: String| DocflowError::UnsupportedInput {
        id: processor_id.to_string(),
        file: file.name.clone(),
        reason,
    };
    if !capability.input.accepts(file.input_kind()) {
        return Err(reject(format!(
            "expects {:?} input, got {}",
            capability.input, file.mime_type
        )));
    }
    if let (Some(limit), Some(size)) = (capability.settings.max_file_size, file.size) {
        if size > limit {
            return Err(reject(format!("{size} bytes exceeds the {limit} byte limit")));
        }
    }
    Ok(())
}

impl Inner {
    /// Background unit of work for one task.
    async fn execute(
        self: Arc<Self>,
        request_id: String,
        processor: Arc<dyn Processor>,
        file: FileDescriptor,
        feature: FeatureTag,
        config: MergedConfiguration,
        token: CancellationToken,
    ) {
        let started = self.with_live_task(&request_id, |task| {
            (task.status == TaskStatus::Pending).then(|| {
                task.status = TaskStatus::Processing;
                TaskEvent::Processing
            })
        });
        let Some(event) = started else {
            debug!("Task {} no longer pending; skipping run", request_id);
            return;
        };
        self.emit(&request_id, event);

        let ctx = ProcessingContext::new(request_id.clone(), token.clone());
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ProcessorError::Cancelled),
            result = dispatch(processor.as_ref(), feature, &file, &config, &ctx) => result,
        };

        let polling = processor.status_provider().is_some();
        let event = self.with_live_task(&request_id, |task| {
            Some(match outcome {
                Ok(result) if polling => match result.provider_task_id() {
                    Some(handle) => {
                        let handle = handle.to_string();
                        task.defer(handle.clone());
                        TaskEvent::Deferred(handle)
                    }
                    None => {
                        let error = TaskError::new(
                            TaskErrorCode::ProcessingFailed,
                            MISSING_PROVIDER_HANDLE,
                        );
                        task.fail(error.clone());
                        TaskEvent::Failed(error)
                    }
                },
                Ok(result) => {
                    task.complete(result);
                    TaskEvent::Completed
                }
                Err(e) => {
                    let error = TaskError::from_processor(&e, token.is_cancelled());
                    task.fail(error.clone());
                    TaskEvent::Failed(error)
                }
            })
        });

        match event {
            Some(event) => self.emit(&request_id, event),
            None => debug!(
                "Task {} finished after it was cancelled or reclaimed; result discarded",
                request_id
            ),
        }
    }

    /// Ask the provider for fresh status and fold it into the task.
    async fn poll_provider(
        &self,
        request_id: &str,
        processor_id: &str,
        handle: &str,
        config: &MergedConfiguration,
    ) {
        let processor = match self.registry.get(processor_id) {
            Ok(p) => p,
            Err(e) => {
                warn!("Cannot poll task {}: {}", request_id, e);
                return;
            }
        };
        let Some(provider) = processor.status_provider() else {
            return;
        };

        let status = match provider.get_status(handle, config).await {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    "Status query for task {} (provider task {}) failed: {}; keeping last known state",
                    request_id, handle, e
                );
                return;
            }
        };

        let event = self.with_live_task(request_id, |task| Some(apply_status(task, status)));
        if let Some(event) = event {
            self.emit(request_id, event);
        }
    }

    /// Run `f` on a task that still exists and is not terminal.
    fn with_live_task<F>(&self, request_id: &str, f: F) -> Option<TaskEvent>
    where
        F: FnOnce(&mut Task) -> Option<TaskEvent>,
    {
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(request_id)?;
        if task.status.is_terminal() {
            return None;
        }
        f(task)
    }

    fn missing(&self, request_id: &str) -> TaskResponse {
        if self.tombstones.lock().contains_key(request_id) {
            debug!("Task {} requested after expiry", request_id);
            TaskResponse::missing(request_id, TaskError::expired(request_id))
        } else {
            debug!("Task {} not found", request_id);
            TaskResponse::missing(request_id, TaskError::not_found(request_id))
        }
    }

    fn emit(&self, request_id: &str, event: TaskEvent) {
        match &event {
            TaskEvent::Processing => debug!("Task {} processing", request_id),
            TaskEvent::Deferred(handle) => info!(
                "Task {} handed off to provider task {}; awaiting polls",
                request_id, handle
            ),
            TaskEvent::Progress(status, progress) => {
                debug!("Task {} {} ({}%)", request_id, status, progress)
            }
            TaskEvent::Completed => info!("Task {} completed", request_id),
            TaskEvent::Failed(error) if error.code == TaskErrorCode::Cancelled => {
                info!("Task {} cancelled", request_id)
            }
            TaskEvent::Failed(error) => warn!("Task {} failed: {}", request_id, error),
        }

        let Some(cb) = &self.config.event_callback else {
            return;
        };
        match event {
            TaskEvent::Processing => cb.on_task_processing(request_id),
            TaskEvent::Deferred(handle) => cb.on_task_deferred(request_id, &handle),
            TaskEvent::Progress(status, progress) => {
                cb.on_task_progress(request_id, status, progress)
            }
            TaskEvent::Completed => cb.on_task_completed(request_id),
            TaskEvent::Failed(error) => cb.on_task_failed(request_id, &error),
        }
    }

    fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let retention = self.config.retention;
        let expired_since = |at: Instant| now.saturating_duration_since(at) > retention;

        let (reclaimed, remaining_tasks) = {
            let mut tasks = self.tasks.lock();
            let reclaimed: Vec<String> = tasks
                .values()
                .filter(|t| t.completed_at.is_some_and(expired_since))
                .map(|t| t.request_id.clone())
                .collect();
            for id in &reclaimed {
                tasks.remove(id);
            }
            let remaining = tasks.values().filter(|t| t.completed_at.is_some()).count();
            (reclaimed, remaining)
        };

        let remaining_tombstones = {
            let mut tombstones = self.tombstones.lock();
            tombstones.retain(|_, at| !expired_since(*at));
            for id in &reclaimed {
                tombstones.insert(id.clone(), now);
            }
            tombstones.len()
        };

        for id in &reclaimed {
            info!("Task {} expired; reclaimed after {:?}", id, retention);
            if let Some(cb) = &self.config.event_callback {
                cb.on_task_reclaimed(id);
            }
        }

        SweepReport {
            reclaimed: reclaimed.len(),
            remaining: remaining_tasks + remaining_tombstones,
        }
    }

    fn has_reclaimable(&self) -> bool {
        self.tasks.lock().values().any(|t| t.completed_at.is_some())
            || !self.tombstones.lock().is_empty()
    }

    /// Start the sweep timer unless it is already running.
    fn ensure_sweeper(this: &Arc<Self>) {
        let mut sweeper = this.sweeper.lock();
        if sweeper.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let period = this.config.sweep_interval;
        let first_tick = Instant::now() + period;
        debug!("Starting retention sweep every {:?}", period);
        *sweeper = Some(tokio::spawn(sweep_loop(
            Arc::downgrade(this),
            first_tick,
            period,
        )));
    }
}

/// Sweep every `period` from `first_tick` until nothing is left to reclaim.
///
/// `first_tick` is fixed by the caller so the schedule does not shift with
/// the moment the runtime first polls this task.
async fn sweep_loop(inner: Weak<Inner>, first_tick: Instant, period: Duration) {
    let mut ticker = tokio::time::interval_at(first_tick, period);
    loop {
        ticker.tick().await;
        let Some(this) = inner.upgrade() else {
            return;
        };
        let report = this.sweep();
        if report.remaining > 0 {
            continue;
        }
        // Re-check under the sweeper lock: a completion observed between the
        // sweep and here must keep the timer alive.
        let mut sweeper = this.sweeper.lock();
        if !this.has_reclaimable() {
            debug!("Nothing left to reclaim; stopping retention sweep");
            *sweeper = None;
            return;
        }
    }
}

/// Invoke the capability method matching `feature`.
async fn dispatch(
    processor: &dyn Processor,
    feature: FeatureTag,
    file: &FileDescriptor,
    config: &MergedConfiguration,
    ctx: &ProcessingContext,
) -> Result<ProcessResult, ProcessorError> {
    let call = async {
        match feature {
            FeatureTag::TextExtraction => match processor.text_extractor() {
                Some(role) => role.extract_text(file, config, ctx).await,
                None => Err(missing_role(processor, feature)),
            },
            FeatureTag::MarkdownConversion => match processor.markdown_converter() {
                Some(role) => role.convert_to_markdown(file, config, ctx).await,
                None => Err(missing_role(processor, feature)),
            },
        }
    };

    match config.settings(feature).and_then(|s| s.timeout_secs) {
        Some(secs) if secs > 0 => tokio::time::timeout(Duration::from_secs(secs), call)
            .await
            .unwrap_or_else(|_| Err(ProcessorError::Timeout { secs })),
        _ => call.await,
    }
}

fn missing_role(processor: &dyn Processor, feature: FeatureTag) -> ProcessorError {
    ProcessorError::Failed(format!(
        "Processor '{}' does not implement {}",
        processor.id(),
        feature
    ))
}

/// Overwrite a live task with what the provider reported.
fn apply_status(task: &mut Task, status: ProviderStatus) -> TaskEvent {
    match status.status {
        TaskStatus::Completed => match status.result {
            Some(result) => {
                task.complete(result);
                TaskEvent::Completed
            }
            None => {
                let error = TaskError::new(TaskErrorCode::ProcessingFailed, MISSING_RESULT);
                task.fail(error.clone());
                TaskEvent::Failed(error)
            }
        },
        TaskStatus::Failed => {
            let error = status.error.unwrap_or_else(|| {
                TaskError::new(TaskErrorCode::Error, "Provider reported failure")
            });
            task.progress = status.progress.min(100);
            task.fail(error.clone());
            TaskEvent::Failed(error)
        }
        // A provider may still call its job "pending"; locally the task is
        // already past that point.
        TaskStatus::Pending | TaskStatus::Processing => {
            task.status = TaskStatus::Processing;
            task.progress = status.progress.min(100);
            if status.result.is_some() {
                task.result = status.result;
            }
            if status.error.is_some() {
                task.error = status.error;
            }
            TaskEvent::Progress(task.status, task.progress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityDescriptor, InputKind, OutputKind, ProcessorTemplate};

    fn live_task() -> Task {
        let mut t = Task::new(
            "req".into(),
            "remote".into(),
            MergedConfiguration::default(),
        );
        t.defer("job".into());
        t
    }

    #[test]
    fn provider_pending_maps_to_processing() {
        let mut t = live_task();
        let mut status = ProviderStatus::processing(35);
        status.status = TaskStatus::Pending;
        apply_status(&mut t, status);
        assert_eq!(t.status, TaskStatus::Processing);
        assert_eq!(t.progress, 35);
    }

    #[test]
    fn provider_completed_without_result_fails() {
        let mut t = live_task();
        let mut status = ProviderStatus::completed(ProcessResult::default());
        status.result = None;
        apply_status(&mut t, status);
        assert_eq!(t.status, TaskStatus::Failed);
        let err = t.error.unwrap();
        assert_eq!(err.code, TaskErrorCode::ProcessingFailed);
        assert_eq!(err.message, MISSING_RESULT);
    }

    #[test]
    fn provider_failure_keeps_provider_error() {
        let mut t = live_task();
        apply_status(
            &mut t,
            ProviderStatus::failed(TaskError::new(TaskErrorCode::Error, "quota exceeded")),
        );
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.error.unwrap().message, "quota exceeded");
        assert_eq!(t.provider_task_id.as_deref(), Some("job"));
    }

    #[test]
    fn check_input_enforces_kind_and_size() {
        let settings = crate::capability::CapabilitySettings {
            max_file_size: Some(10),
            ..Default::default()
        };
        let capability = CapabilityDescriptor::new(
            FeatureTag::TextExtraction,
            InputKind::Image,
            OutputKind::Text,
        )
        .with_settings(settings);
        let template =
            ProcessorTemplate::new("ocr", Default::default()).with_capability(capability);
        let config = MergedConfiguration::merge(&template, None);

        let pdf = FileDescriptor::new("/tmp/a.pdf", "application/pdf");
        assert!(matches!(
            check_input("ocr", &pdf, FeatureTag::TextExtraction, &config),
            Err(DocflowError::UnsupportedInput { .. })
        ));

        let mut png = FileDescriptor::new("/tmp/a.png", "image/png");
        png.size = Some(5);
        assert!(check_input("ocr", &png, FeatureTag::TextExtraction, &config).is_ok());
        png.size = Some(50);
        assert!(check_input("ocr", &png, FeatureTag::TextExtraction, &config).is_err());
    }
}
