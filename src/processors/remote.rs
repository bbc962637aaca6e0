//! Generic submit-then-poll HTTP engine.
//!
//! ## Wire protocol
//!
//! ```text
//! GET  {endpoint}/health                      → 2xx when reachable
//! POST {endpoint}/tasks?feature=..&name=..    body: raw file bytes
//!                                             → {"taskId": "..."}
//! GET  {endpoint}/tasks/{taskId}              → {"status": "...", "progress": 0-100,
//!                                                "text"?, "markdown"?, "error"?}
//! ```
//!
//! The endpoint and model come from the capability settings of the merged
//! configuration, so a user override can repoint the engine without a
//! restart. Every request carries a bearer key picked round-robin from the
//! configured API keys.
//!
//! Submission returns immediately with a handle of the form
//! `{feature}/{taskId}`; completion is observed through
//! [`StatusProvider::get_status`], which reads the feature back from the
//! handle to pick the endpoint out of the task's configuration. The
//! processor itself keeps no per-task state.
//!
//! The health probe uses the template endpoint unless the processor was
//! given the resolver ([`RemoteTaskProcessor::with_resolver`]), in which case
//! it probes the endpoint of the current effective configuration.

use crate::capability::{
    CapabilityDescriptor, CapabilitySettings, FeatureTag, InputKind, OriginKind, OutputKind,
    ProcessorTemplate,
};
use crate::error::{ProcessorError, TaskError, TaskErrorCode};
use crate::file::FileDescriptor;
use crate::keys::KeyRotator;
use crate::processor::{
    DisposableResource, MarkdownConverter, ProcessResult, ProcessingContext, Processor,
    ProviderStatus, StatusProvider, TextExtractor,
};
use crate::resolver::{ConfigResolver, MergedConfiguration};
use crate::task::TaskStatus;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-request HTTP timeout used when the capability sets none.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A remote engine reached over HTTP.
pub struct RemoteTaskProcessor {
    template: ProcessorTemplate,
    client: reqwest::Client,
    rotator: Arc<KeyRotator>,
    resolver: Option<Arc<ConfigResolver>>,
    /// Triggered on dispose; aborts in-flight submissions.
    shutdown: CancellationToken,
}

impl std::fmt::Debug for RemoteTaskProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTaskProcessor")
            .field("id", &self.template.id)
            .field("disposed", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl RemoteTaskProcessor {
    /// Wrap `template`; only its text-extraction and markdown-conversion
    /// capabilities are served.
    pub fn new(template: ProcessorTemplate) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            template,
            client,
            rotator: Arc::new(KeyRotator::new()),
            resolver: None,
            shutdown: CancellationToken::new(),
        })
    }

    /// Convenience template: both features served by one endpoint.
    pub fn template_for(id: impl Into<String>, endpoint: impl Into<String>) -> ProcessorTemplate {
        let endpoint = endpoint.into();
        let settings = CapabilitySettings {
            endpoint: Some(endpoint),
            ..Default::default()
        };
        ProcessorTemplate::new(id, OriginKind::RemoteApi)
            .with_capability(
                CapabilityDescriptor::new(
                    FeatureTag::TextExtraction,
                    InputKind::Any,
                    OutputKind::Text,
                )
                .with_settings(settings.clone()),
            )
            .with_capability(
                CapabilityDescriptor::new(
                    FeatureTag::MarkdownConversion,
                    InputKind::Document,
                    OutputKind::Markdown,
                )
                .with_settings(settings),
            )
    }

    /// Share key rotation state with other processors.
    pub fn with_rotator(mut self, rotator: Arc<KeyRotator>) -> Self {
        self.rotator = rotator;
        self
    }

    /// Probe the endpoint of the effective configuration (template plus
    /// stored override) instead of the template's.
    pub fn with_resolver(mut self, resolver: Arc<ConfigResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    async fn probe_config(&self) -> MergedConfiguration {
        let Some(resolver) = &self.resolver else {
            return MergedConfiguration::merge(&self.template, None);
        };
        match resolver.configuration_for(&self.template.id).await {
            Ok(config) => config,
            Err(e) => {
                debug!("No stored configuration for '{}': {}", self.template.id, e);
                MergedConfiguration::merge(&self.template, None)
            }
        }
    }

    fn endpoint(
        &self,
        config: &MergedConfiguration,
        feature: FeatureTag,
    ) -> Result<String, ProcessorError> {
        config
            .settings(feature)
            .and_then(|s| s.endpoint.as_deref())
            .map(|e| e.trim_end_matches('/').to_string())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ProcessorError::Unavailable {
                id: self.template.id.clone(),
                reason: format!("no endpoint configured for {feature}"),
            })
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        config: &MergedConfiguration,
    ) -> reqwest::RequestBuilder {
        match self.rotator.next_key(&self.template.id, &config.api_keys) {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn submit(
        &self,
        feature: FeatureTag,
        file: &FileDescriptor,
        config: &MergedConfiguration,
        ctx: &ProcessingContext,
    ) -> Result<ProcessResult, ProcessorError> {
        ctx.checkpoint()?;
        if self.shutdown.is_cancelled() {
            return Err(self.disposed());
        }
        let endpoint = self.endpoint(config, feature)?;
        let settings = config.settings(feature);
        let timeout = settings
            .and_then(|s| s.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let bytes = tokio::fs::read(&file.path).await?;
        ctx.checkpoint()?;

        let mut query = vec![("feature", feature.to_string()), ("name", file.name.clone())];
        if let Some(model) = settings.and_then(|s| s.model.clone()) {
            query.push(("model", model));
        }
        let request = self
            .client
            .post(format!("{endpoint}/tasks"))
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, file.mime_type.as_str())
            .timeout(timeout)
            .body(bytes);
        let request = self.authorize(request, config);

        let send = async {
            let response = request.send().await?.error_for_status()?;
            Ok::<SubmitResponse, ProcessorError>(response.json().await?)
        };
        let body = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(ProcessorError::Cancelled),
            _ = self.shutdown.cancelled() => return Err(self.disposed()),
            body = send => body?,
        };

        let provider_task_id = body.into_task_id()?;
        info!(
            "Submitted {} to {} as provider task {}",
            file.name, endpoint, provider_task_id
        );
        Ok(ProcessResult::deferred(format!("{feature}/{provider_task_id}")))
    }

    fn disposed(&self) -> ProcessorError {
        ProcessorError::Unavailable {
            id: self.template.id.clone(),
            reason: "processor has been disposed".into(),
        }
    }

    /// Endpoint and provider task id behind a handle. Handles without a
    /// feature prefix go to the first configured endpoint.
    fn status_target<'h>(
        &self,
        handle: &'h str,
        config: &MergedConfiguration,
    ) -> Result<(String, &'h str), ProcessorError> {
        if let Some((prefix, task_id)) = handle.split_once('/') {
            if let Some(&feature) = FeatureTag::ALL.iter().find(|f| f.as_str() == prefix) {
                return Ok((self.endpoint(config, feature)?, task_id));
            }
        }
        Ok((self.first_endpoint(config)?, handle))
    }

    fn first_endpoint(&self, config: &MergedConfiguration) -> Result<String, ProcessorError> {
        FeatureTag::ALL
            .iter()
            .find_map(|&f| self.endpoint(config, f).ok())
            .ok_or_else(|| ProcessorError::Unavailable {
                id: self.template.id.clone(),
                reason: "no endpoint configured".into(),
            })
    }
}

#[async_trait]
impl Processor for RemoteTaskProcessor {
    fn template(&self) -> &ProcessorTemplate {
        &self.template
    }

    /// Live reachability probe of the first configured endpoint.
    async fn is_available(&self) -> Result<bool, ProcessorError> {
        if self.shutdown.is_cancelled() {
            return Ok(false);
        }
        let config = self.probe_config().await;
        let Ok(endpoint) = self.first_endpoint(&config) else {
            return Ok(false);
        };
        match self
            .client
            .get(format!("{endpoint}/health"))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                debug!("Probe of {} failed: {}", endpoint, e);
                Ok(false)
            }
        }
    }

    fn text_extractor(&self) -> Option<&dyn TextExtractor> {
        Some(self)
    }

    fn markdown_converter(&self) -> Option<&dyn MarkdownConverter> {
        Some(self)
    }

    fn status_provider(&self) -> Option<&dyn StatusProvider> {
        Some(self)
    }

    fn disposable(&self) -> Option<&dyn DisposableResource> {
        Some(self)
    }
}

#[async_trait]
impl TextExtractor for RemoteTaskProcessor {
    async fn extract_text(
        &self,
        file: &FileDescriptor,
        config: &MergedConfiguration,
        ctx: &ProcessingContext,
    ) -> Result<ProcessResult, ProcessorError> {
        self.submit(FeatureTag::TextExtraction, file, config, ctx).await
    }
}

#[async_trait]
impl MarkdownConverter for RemoteTaskProcessor {
    async fn convert_to_markdown(
        &self,
        file: &FileDescriptor,
        config: &MergedConfiguration,
        ctx: &ProcessingContext,
    ) -> Result<ProcessResult, ProcessorError> {
        self.submit(FeatureTag::MarkdownConversion, file, config, ctx).await
    }
}

#[async_trait]
impl StatusProvider for RemoteTaskProcessor {
    async fn get_status(
        &self,
        provider_task_id: &str,
        config: &MergedConfiguration,
    ) -> Result<ProviderStatus, ProcessorError> {
        if self.shutdown.is_cancelled() {
            return Err(self.disposed());
        }
        let (endpoint, task_id) = self.status_target(provider_task_id, config)?;
        let request = self
            .client
            .get(format!("{endpoint}/tasks/{task_id}"))
            .timeout(DEFAULT_REQUEST_TIMEOUT);
        let body: RemoteStatus = self
            .authorize(request, config)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        body.into_provider_status()
    }
}

#[async_trait]
impl DisposableResource for RemoteTaskProcessor {
    async fn dispose(&self) -> Result<(), ProcessorError> {
        if !self.shutdown.is_cancelled() {
            debug!("Disposing remote processor '{}'", self.template.id);
        }
        self.shutdown.cancel();
        Ok(())
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    #[serde(default, alias = "task_id", alias = "id")]
    task_id: Option<String>,
}

impl SubmitResponse {
    fn into_task_id(self) -> Result<String, ProcessorError> {
        self.task_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProcessorError::Failed("provider response carried no task id".into()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteStatus {
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl RemoteStatus {
    fn into_provider_status(self) -> Result<ProviderStatus, ProcessorError> {
        let status = match self.status.trim().to_ascii_lowercase().as_str() {
            "queued" | "pending" => TaskStatus::Pending,
            "running" | "processing" | "in_progress" => TaskStatus::Processing,
            "succeeded" | "completed" | "done" => TaskStatus::Completed,
            "failed" | "error" | "cancelled" | "canceled" => TaskStatus::Failed,
            other => {
                return Err(ProcessorError::Failed(format!(
                    "unknown provider status '{other}'"
                )))
            }
        };
        let progress = self.progress.unwrap_or(0.0).clamp(0.0, 100.0).round() as u8;

        Ok(match status {
            TaskStatus::Completed if self.text.is_none() && self.markdown.is_none() => {
                ProviderStatus {
                    status,
                    progress: 100,
                    result: None,
                    error: None,
                }
            }
            TaskStatus::Completed => ProviderStatus::completed(ProcessResult {
                text: self.text,
                markdown: self.markdown,
                ..Default::default()
            }),
            TaskStatus::Failed => ProviderStatus::failed(TaskError::new(
                TaskErrorCode::Error,
                self.error
                    .unwrap_or_else(|| format!("provider reported '{}'", self.status)),
            )),
            _ => ProviderStatus {
                status,
                progress,
                result: None,
                error: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Override;
    use serde_json::json;

    fn status(value: serde_json::Value) -> Result<ProviderStatus, ProcessorError> {
        serde_json::from_value::<RemoteStatus>(value)
            .unwrap()
            .into_provider_status()
    }

    #[test]
    fn submit_response_accepts_aliases() {
        let r: SubmitResponse = serde_json::from_value(json!({"task_id": " job-1 "})).unwrap();
        assert_eq!(r.into_task_id().unwrap(), "job-1");
        let r: SubmitResponse = serde_json::from_value(json!({"id": "job-2"})).unwrap();
        assert_eq!(r.into_task_id().unwrap(), "job-2");
        let r: SubmitResponse = serde_json::from_value(json!({})).unwrap();
        assert!(r.into_task_id().is_err());
    }

    #[test]
    fn running_status_keeps_progress() {
        let s = status(json!({"status": "running", "progress": 42.4})).unwrap();
        assert_eq!(s.status, TaskStatus::Processing);
        assert_eq!(s.progress, 42);
    }

    #[test]
    fn completed_status_carries_result() {
        let s = status(json!({"status": "succeeded", "markdown": "# Hi\n"})).unwrap();
        assert_eq!(s.status, TaskStatus::Completed);
        assert_eq!(s.result.unwrap().markdown.as_deref(), Some("# Hi\n"));
    }

    #[test]
    fn completed_without_content_has_no_result() {
        let s = status(json!({"status": "done"})).unwrap();
        assert_eq!(s.status, TaskStatus::Completed);
        assert!(s.result.is_none());
    }

    #[test]
    fn failed_status_keeps_provider_message() {
        let s = status(json!({"status": "failed", "error": "quota exceeded"})).unwrap();
        assert_eq!(s.status, TaskStatus::Failed);
        assert_eq!(s.error.unwrap().message, "quota exceeded");
    }

    #[test]
    fn unknown_status_is_an_error() {
        assert!(status(json!({"status": "teleporting"})).is_err());
    }

    #[test]
    fn missing_endpoint_is_unavailable() {
        let p = RemoteTaskProcessor::new(ProcessorTemplate::new("bare", OriginKind::RemoteApi))
            .unwrap();
        let config = MergedConfiguration::merge(p.template(), None);
        assert!(matches!(
            p.endpoint(&config, FeatureTag::MarkdownConversion),
            Err(ProcessorError::Unavailable { .. })
        ));
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let p = RemoteTaskProcessor::new(RemoteTaskProcessor::template_for(
            "cloud",
            "https://md.example.com/",
        ))
        .unwrap();
        let config = MergedConfiguration::merge(p.template(), None);
        assert_eq!(
            p.endpoint(&config, FeatureTag::MarkdownConversion).unwrap(),
            "https://md.example.com"
        );
    }

    #[test]
    fn status_goes_to_the_endpoint_of_the_submitted_feature() {
        let p = RemoteTaskProcessor::new(RemoteTaskProcessor::template_for(
            "cloud",
            "https://text.example.com",
        ))
        .unwrap();
        let md = Override::capability(
            FeatureTag::MarkdownConversion,
            CapabilitySettings {
                endpoint: Some("https://md.example.com".into()),
                ..Default::default()
            },
        );
        let config = MergedConfiguration::merge(p.template(), Some(&md));

        let (endpoint, id) = p
            .status_target("markdown-conversion/job-7", &config)
            .unwrap();
        assert_eq!((endpoint.as_str(), id), ("https://md.example.com", "job-7"));

        let (endpoint, id) = p.status_target("text-extraction/job-8", &config).unwrap();
        assert_eq!((endpoint.as_str(), id), ("https://text.example.com", "job-8"));

        // Bare handles go to the first configured endpoint untouched.
        let (endpoint, id) = p.status_target("text/42", &config).unwrap();
        assert_eq!((endpoint.as_str(), id), ("https://text.example.com", "text/42"));
    }

    #[tokio::test]
    async fn disposed_processor_is_unavailable() {
        let p = RemoteTaskProcessor::new(RemoteTaskProcessor::template_for(
            "cloud",
            "http://127.0.0.1:9",
        ))
        .unwrap();
        p.dispose().await.unwrap();
        assert!(!p.is_available().await.unwrap());

        let file = FileDescriptor::new("/nonexistent/a.pdf", "application/pdf");
        let config = MergedConfiguration::merge(p.template(), None);
        let ctx = ProcessingContext::new("req", CancellationToken::new());
        let err = p.convert_to_markdown(&file, &config, &ctx).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Unavailable { .. }));
    }
}
