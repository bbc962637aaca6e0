//! Processor traits: the unit of work and its optional capability roles.
//!
//! Every engine implements [`Processor`], which answers "who am I" and "am I
//! available right now". The actual work lives in four independent roles:
//!
//! | Role | Trait | Used for |
//! |------|-------|----------|
//! | text extraction | [`TextExtractor`] | `text-extraction` requests |
//! | markdown conversion | [`MarkdownConverter`] | `markdown-conversion` requests |
//! | status polling | [`StatusProvider`] | engines that finish asynchronously |
//! | disposal | [`DisposableResource`] | engines holding sessions, processes, sockets |
//!
//! A processor advertises a role by overriding the matching accessor on
//! [`Processor`] (`text_extractor`, `markdown_converter`, ...) to return
//! `Some(self)`. The orchestrator probes these accessors instead of matching
//! on concrete types, so one engine can satisfy several roles at once.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use edgequake_docflow::capability::*;
//! use edgequake_docflow::processor::*;
//! use edgequake_docflow::{FileDescriptor, MergedConfiguration, ProcessorError};
//!
//! struct EchoOcr {
//!     template: ProcessorTemplate,
//! }
//!
//! #[async_trait]
//! impl Processor for EchoOcr {
//!     fn template(&self) -> &ProcessorTemplate {
//!         &self.template
//!     }
//!
//!     async fn is_available(&self) -> Result<bool, ProcessorError> {
//!         Ok(true)
//!     }
//!
//!     fn text_extractor(&self) -> Option<&dyn TextExtractor> {
//!         Some(self)
//!     }
//! }
//!
//! #[async_trait]
//! impl TextExtractor for EchoOcr {
//!     async fn extract_text(
//!         &self,
//!         file: &FileDescriptor,
//!         _config: &MergedConfiguration,
//!         ctx: &ProcessingContext,
//!     ) -> Result<ProcessResult, ProcessorError> {
//!         ctx.checkpoint()?;
//!         Ok(ProcessResult::text(file.name.clone()))
//!     }
//! }
//! ```

use crate::capability::{FeatureTag, ProcessorTemplate};
use crate::error::{ProcessorError, TaskError};
use crate::file::FileDescriptor;
use crate::resolver::MergedConfiguration;
use crate::task::TaskStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

// ── Context ──────────────────────────────────────────────────────────────

/// Per-request context handed to every capability call.
///
/// Carries the task's cancellation handle. Engines call
/// [`ProcessingContext::checkpoint`] before starting and after each network
/// round-trip; long awaits can race against [`ProcessingContext::cancelled`].
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    request_id: String,
    token: CancellationToken,
}

impl ProcessingContext {
    pub fn new(request_id: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            request_id: request_id.into(),
            token,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `Err(Cancelled)` once the handle has been triggered.
    pub fn checkpoint(&self) -> Result<(), ProcessorError> {
        if self.token.is_cancelled() {
            Err(ProcessorError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the task is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

// ── Results ──────────────────────────────────────────────────────────────

/// Metadata an engine attaches to its result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetadata {
    /// Opaque handle for polling a remote engine. Only meaningful for
    /// processors with the [`StatusProvider`] role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_task_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// What an engine produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,

    /// Files written by the engine (extracted images, archives, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<PathBuf>,

    #[serde(default)]
    pub metadata: ProcessingMetadata,
}

impl ProcessResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn markdown(markdown: impl Into<String>) -> Self {
        Self {
            markdown: Some(markdown.into()),
            ..Default::default()
        }
    }

    /// A placeholder result that only carries a provider task handle.
    pub fn deferred(provider_task_id: impl Into<String>) -> Self {
        Self {
            metadata: ProcessingMetadata {
                provider_task_id: Some(provider_task_id.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn provider_task_id(&self) -> Option<&str> {
        self.metadata
            .provider_task_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }
}

/// What a status-polling engine reports about a deferred task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl ProviderStatus {
    pub fn processing(progress: u8) -> Self {
        Self {
            status: TaskStatus::Processing,
            progress: progress.min(100),
            result: None,
            error: None,
        }
    }

    pub fn completed(result: ProcessResult) -> Self {
        Self {
            status: TaskStatus::Completed,
            progress: 100,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: TaskError) -> Self {
        Self {
            status: TaskStatus::Failed,
            progress: 0,
            result: None,
            error: Some(error),
        }
    }
}

// ── Traits ───────────────────────────────────────────────────────────────

/// A pluggable conversion engine.
///
/// Processors are stored as `Arc<dyn Processor>` in the
/// [`crate::registry::ProcessorRegistry`] and shared with background tasks,
/// so they must be `Send + Sync`.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Static description: identifier, origin and declared capabilities.
    fn template(&self) -> &ProcessorTemplate;

    /// Unique identifier; defaults to the template's id.
    fn id(&self) -> &str {
        &self.template().id
    }

    /// Whether the processor declares `feature` in its template.
    fn supports(&self, feature: FeatureTag) -> bool {
        self.template().supports(feature)
    }

    /// Whether the engine can take work right now. May perform a live
    /// reachability check.
    async fn is_available(&self) -> Result<bool, ProcessorError>;

    fn text_extractor(&self) -> Option<&dyn TextExtractor> {
        None
    }

    fn markdown_converter(&self) -> Option<&dyn MarkdownConverter> {
        None
    }

    fn status_provider(&self) -> Option<&dyn StatusProvider> {
        None
    }

    fn disposable(&self) -> Option<&dyn DisposableResource> {
        None
    }

    /// Whether the processor implements the dispatch role for `feature`.
    fn implements(&self, feature: FeatureTag) -> bool {
        match feature {
            FeatureTag::TextExtraction => self.text_extractor().is_some(),
            FeatureTag::MarkdownConversion => self.markdown_converter().is_some(),
        }
    }
}

/// Image or document → text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(
        &self,
        file: &FileDescriptor,
        config: &MergedConfiguration,
        ctx: &ProcessingContext,
    ) -> Result<ProcessResult, ProcessorError>;
}

/// Document → Markdown.
#[async_trait]
pub trait MarkdownConverter: Send + Sync {
    async fn convert_to_markdown(
        &self,
        file: &FileDescriptor,
        config: &MergedConfiguration,
        ctx: &ProcessingContext,
    ) -> Result<ProcessResult, ProcessorError>;
}

/// Engines that finish asynchronously and must be polled.
///
/// The initial capability call returns a result whose
/// [`ProcessingMetadata::provider_task_id`] is set; completion is then
/// observed through `get_status`.
#[async_trait]
pub trait StatusProvider: Send + Sync {
    async fn get_status(
        &self,
        provider_task_id: &str,
        config: &MergedConfiguration,
    ) -> Result<ProviderStatus, ProcessorError>;
}

/// Engines that hold resources which must be released on shutdown.
#[async_trait]
pub trait DisposableResource: Send + Sync {
    async fn dispose(&self) -> Result<(), ProcessorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_provider_handle_is_absent() {
        let mut r = ProcessResult::deferred("  ");
        assert_eq!(r.provider_task_id(), None);
        r.metadata.provider_task_id = Some("job-42".into());
        assert_eq!(r.provider_task_id(), Some("job-42"));
    }

    #[test]
    fn checkpoint_reports_cancellation() {
        let token = CancellationToken::new();
        let ctx = ProcessingContext::new("req-1", token.clone());
        assert!(ctx.checkpoint().is_ok());
        token.cancel();
        assert!(matches!(ctx.checkpoint(), Err(ProcessorError::Cancelled)));
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn provider_status_progress_is_clamped() {
        assert_eq!(ProviderStatus::processing(250).progress, 100);
    }

    #[test]
    fn result_serialises_camel_case() {
        let r = ProcessResult::deferred("abc");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["metadata"]["providerTaskId"], "abc");
        assert!(json.get("text").is_none());
    }
}
