//! Error types for the edgequake-docflow library.
//!
//! Three distinct error types reflect three distinct failure modes:
//!
//! * [`DocflowError`]: **Fatal for the call**: the request cannot even be
//!   accepted (blank input, unknown processor, feature not supported).
//!   Returned as `Err(DocflowError)` from `start`, the registry and the
//!   configuration resolver. Never stored in a task.
//!
//! * [`ProcessorError`]: **Engine-level**: returned by a processor's
//!   capability methods while a task runs in the background. The orchestrator
//!   converts it into a [`TaskError`] and records it on the task.
//!
//! * [`TaskError`]: **Recorded**: the serialisable `{code, message}` pair a
//!   caller sees in a status response. Background failures surface only here,
//!   on the next status query, never as a panic or a detached error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Message recorded when a status-polling processor finishes its initial
/// call without handing back a provider task handle.
pub const MISSING_PROVIDER_HANDLE: &str = "Provider task id not found in processing metadata";

/// Message recorded when a provider reports completion but no result.
pub const MISSING_RESULT: &str = "Processing completed but result missing";

/// All fatal errors returned synchronously by the edgequake-docflow library.
#[derive(Debug, Error)]
pub enum DocflowError {
    // ── Request errors ────────────────────────────────────────────────────
    /// A required field was missing or blank.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// No processor id was given and none is configured for the feature.
    #[error("No default processor configured for feature '{feature}'\nPass a processor id or set a default with --default.")]
    NoDefaultProcessor { feature: String },

    /// The resolved processor id is not registered.
    #[error("Processor '{id}' is not registered")]
    ProcessorNotFound { id: String },

    /// The chosen processor does not implement the requested capability.
    #[error("Processor '{id}' does not support feature '{feature}'")]
    UnsupportedFeature { id: String, feature: String },

    /// The processor's declared capability rejects this file up front
    /// (wrong input kind, over the size limit).
    #[error("Processor '{id}' cannot accept '{file}': {reason}")]
    UnsupportedInput {
        id: String,
        file: String,
        reason: String,
    },

    // ── Registry errors ───────────────────────────────────────────────────
    /// A processor with the same id is already registered.
    #[error("Processor '{id}' is already registered")]
    AlreadyRegistered { id: String },

    // ── Configuration errors ──────────────────────────────────────────────
    /// No template exists for the processor id.
    #[error("No configuration template for processor '{id}'")]
    TemplateNotFound { id: String },

    /// A template with the same id was already loaded.
    #[error("Configuration template '{id}' is already loaded")]
    DuplicateTemplate { id: String },

    /// Reading or writing persisted overrides failed.
    #[error("Failed to access override store '{path}': {detail}")]
    OverrideStore { path: PathBuf, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by a processor while it works on a file.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The processor cannot handle this particular file.
    #[error("Unsupported input '{name}': {reason}")]
    UnsupportedInput { name: String, reason: String },

    /// The cancellation handle was triggered at a checkpoint.
    #[error("Processing cancelled")]
    Cancelled,

    /// The engine is not reachable or not installed.
    #[error("Processor '{id}' is unavailable: {reason}")]
    Unavailable { id: String, reason: String },

    /// The call exceeded the capability's configured timeout.
    #[error("Processing timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Generic engine failure.
    #[error("{0}")]
    Failed(String),

    /// HTTP transport or protocol failure talking to a remote engine.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Machine-readable error code stored on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorCode {
    /// The request id was never issued, or its record is long gone.
    NotFound,
    /// The task finished and was reclaimed by the retention sweep.
    Expired,
    /// The task was cancelled before it finished.
    Cancelled,
    /// The engine ran but produced no usable outcome.
    ProcessingFailed,
    /// The engine rejected the file.
    UnsupportedInput,
    /// Any other failure during background execution.
    Error,
}

impl TaskErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::ProcessingFailed => "processing_failed",
            Self::UnsupportedInput => "unsupported_input",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TaskErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `{code, message}` pair recorded on a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: TaskErrorCode,
    pub message: String,
}

impl TaskError {
    pub fn new(code: TaskErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(request_id: &str) -> Self {
        Self::new(
            TaskErrorCode::NotFound,
            format!("Task '{request_id}' not found"),
        )
    }

    pub fn expired(request_id: &str) -> Self {
        Self::new(
            TaskErrorCode::Expired,
            format!("Task '{request_id}' expired and was reclaimed"),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(TaskErrorCode::Cancelled, "Task was cancelled")
    }

    /// Classify a background failure.
    ///
    /// A triggered cancellation handle wins over whatever the processor
    /// returned: engines often surface an aborted request as a transport
    /// error rather than [`ProcessorError::Cancelled`].
    pub fn from_processor(err: &ProcessorError, cancelled: bool) -> Self {
        if cancelled {
            return Self::cancelled();
        }
        match err {
            ProcessorError::Cancelled => Self::cancelled(),
            ProcessorError::UnsupportedInput { .. } => {
                Self::new(TaskErrorCode::UnsupportedInput, err.to_string())
            }
            _ => Self::new(TaskErrorCode::Error, err.to_string()),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_default_processor_display() {
        let e = DocflowError::NoDefaultProcessor {
            feature: "markdown-conversion".into(),
        };
        assert!(e.to_string().contains("markdown-conversion"), "got: {e}");
    }

    #[test]
    fn error_codes_serialise_snake_case() {
        let json = serde_json::to_string(&TaskErrorCode::ProcessingFailed).unwrap();
        assert_eq!(json, "\"processing_failed\"");
        let json = serde_json::to_string(&TaskErrorCode::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }

    #[test]
    fn cancellation_overrides_processor_error() {
        let err = ProcessorError::Failed("connection reset".into());
        assert_eq!(
            TaskError::from_processor(&err, true).code,
            TaskErrorCode::Cancelled
        );
        let generic = TaskError::from_processor(&err, false);
        assert_eq!(generic.code, TaskErrorCode::Error);
        assert_eq!(generic.message, "connection reset");
    }

    #[test]
    fn unsupported_input_keeps_its_code() {
        let err = ProcessorError::UnsupportedInput {
            name: "scan.tiff".into(),
            reason: "not plain text".into(),
        };
        let recorded = TaskError::from_processor(&err, false);
        assert_eq!(recorded.code, TaskErrorCode::UnsupportedInput);
        assert!(recorded.message.contains("scan.tiff"));
    }
}
