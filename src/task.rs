//! Task records and the response shapes callers see.
//!
//! A [`Task`] is the orchestrator's private, mutable record of one request.
//! Callers never touch it directly; they receive [`TaskResponse`] snapshots
//! from [`crate::orchestrator::Orchestrator::get_result`].

use crate::error::{TaskError, TaskErrorCode};
use crate::processor::ProcessResult;
use crate::resolver::MergedConfiguration;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a task.
///
/// Transitions are monotonic: `Pending → Processing → {Completed | Failed}`,
/// with cancellation jumping straight to `Failed` from either live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created; background work not yet started.
    Pending,
    /// Background work running, or a remote provider is being polled.
    Processing,
    /// Finished with a result.
    Completed,
    /// Finished with an error (including cancellation).
    Failed,
}

impl TaskStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The orchestrator's record of one request.
#[derive(Debug)]
pub struct Task {
    pub request_id: String,
    pub processor_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    /// Set once by the background run; cleared only with the whole task.
    pub provider_task_id: Option<String>,
    pub config: MergedConfiguration,
    pub cancel: CancellationToken,
    pub result: Option<ProcessResult>,
    pub error: Option<TaskError>,
    /// Stamped by the first status query that observes a terminal state.
    pub completed_at: Option<Instant>,
}

impl Task {
    pub(crate) fn new(
        request_id: String,
        processor_id: String,
        config: MergedConfiguration,
    ) -> Self {
        Self {
            request_id,
            processor_id,
            status: TaskStatus::Pending,
            progress: 0,
            provider_task_id: None,
            config,
            cancel: CancellationToken::new(),
            result: None,
            error: None,
            completed_at: None,
        }
    }

    pub(crate) fn complete(&mut self, result: ProcessResult) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.error = None;
    }

    pub(crate) fn fail(&mut self, error: TaskError) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
    }

    /// Record the provider handle and hand completion over to polling.
    pub(crate) fn defer(&mut self, provider_task_id: String) {
        self.provider_task_id = Some(provider_task_id);
        self.status = TaskStatus::Processing;
        self.progress = 0;
    }

    pub(crate) fn snapshot(&self) -> TaskResponse {
        TaskResponse {
            request_id: self.request_id.clone(),
            status: self.status,
            progress: self.progress,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

// ── Responses ────────────────────────────────────────────────────────────

/// Returned by `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub request_id: String,
    pub status: TaskStatus,
}

/// Returned by `get_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub request_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl TaskResponse {
    /// A `failed` response for an id the orchestrator does not hold.
    pub fn missing(request_id: &str, error: TaskError) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: TaskStatus::Failed,
            progress: 0,
            result: None,
            error: Some(error),
        }
    }

    pub fn error_code(&self) -> Option<TaskErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Returned by `cancel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
}

impl CancelResponse {
    pub(crate) fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn missing_response_shape() {
        let r = TaskResponse::missing("abc", TaskError::not_found("abc"));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["requestId"], "abc");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["code"], "not_found");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn defer_resets_progress() {
        let mut t = Task::new(
            "r".into(),
            "remote".into(),
            MergedConfiguration::default(),
        );
        t.progress = 40;
        t.defer("job-1".into());
        assert_eq!(t.status, TaskStatus::Processing);
        assert_eq!(t.progress, 0);
        assert_eq!(t.provider_task_id.as_deref(), Some("job-1"));
    }
}
