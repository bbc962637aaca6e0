//! Event-callback trait for task lifecycle notifications.
//!
//! Inject an [`Arc<dyn TaskEventCallback>`] via
//! [`crate::config::OrchestratorConfigBuilder::event_callback`] to receive
//! events as tasks move through their lifecycle.
//!
//! Callbacks are invoked synchronously from the orchestrator, possibly from
//! a background tokio task, and never while the task map is locked. Keep them
//! cheap: forward to a channel, bump a counter, tick a progress bar.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docflow::{OrchestratorConfig, TaskEventCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl TaskEventCallback for CountingCallback {
//!     fn on_task_completed(&self, request_id: &str) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{request_id} done");
//!     }
//! }
//!
//! let config = OrchestratorConfig::builder()
//!     .event_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::TaskError;
use crate::task::TaskStatus;

/// Called by the orchestrator as tasks change state.
///
/// All methods have default no-op implementations so implementors only
/// override what they care about.
pub trait TaskEventCallback: Send + Sync {
    /// A task was created in `pending`.
    fn on_task_created(&self, request_id: &str, processor_id: &str) {
        let _ = (request_id, processor_id);
    }

    /// Background work started.
    fn on_task_processing(&self, request_id: &str) {
        let _ = request_id;
    }

    /// The processor handed back a provider handle; completion will be
    /// observed by polling.
    fn on_task_deferred(&self, request_id: &str, provider_task_id: &str) {
        let _ = (request_id, provider_task_id);
    }

    /// A provider poll reported progress.
    fn on_task_progress(&self, request_id: &str, status: TaskStatus, progress: u8) {
        let _ = (request_id, status, progress);
    }

    fn on_task_completed(&self, request_id: &str) {
        let _ = request_id;
    }

    fn on_task_failed(&self, request_id: &str, error: &TaskError) {
        let _ = (request_id, error);
    }

    /// The retention sweep deleted the task.
    fn on_task_reclaimed(&self, request_id: &str) {
        let _ = request_id;
    }
}

/// A no-op implementation for callers that don't need events.
#[derive(Debug, Default)]
pub struct NoopEventCallback;

impl TaskEventCallback for NoopEventCallback {}
