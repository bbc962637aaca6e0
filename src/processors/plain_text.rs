//! Local engine for plain-text inputs.
//!
//! Reads the file with `tokio::fs`, normalises it and returns either clean
//! text or Markdown. Markdown input is tidied, structured formats (JSON,
//! YAML, XML, TOML, CSV) are wrapped in a fenced block, and anything else
//! textual is rendered as prose. Binary inputs are rejected.

use crate::capability::{
    CapabilityDescriptor, CapabilitySettings, FeatureTag, InputKind, OriginKind, OutputKind,
    ProcessorTemplate,
};
use crate::error::ProcessorError;
use crate::file::FileDescriptor;
use crate::processor::{
    MarkdownConverter, ProcessResult, ProcessingContext, Processor, TextExtractor,
};
use crate::processors::text;
use crate::resolver::MergedConfiguration;
use async_trait::async_trait;
use std::time::Instant;
use tracing::debug;

/// Default upper bound on input size: 10 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// How a textual input is turned into Markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextFlavor {
    Markdown,
    Code(&'static str),
    Prose,
}

/// Text extraction and Markdown conversion for text files.
#[derive(Debug, Clone)]
pub struct PlainTextProcessor {
    template: ProcessorTemplate,
}

impl Default for PlainTextProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PlainTextProcessor {
    pub const ID: &'static str = "local-text";

    pub fn new() -> Self {
        let limits = CapabilitySettings {
            max_file_size: Some(DEFAULT_MAX_FILE_SIZE),
            ..Default::default()
        };
        let template = ProcessorTemplate::new(Self::ID, OriginKind::Local)
            .named("Local plain text")
            .with_capability(
                CapabilityDescriptor::new(
                    FeatureTag::TextExtraction,
                    InputKind::Document,
                    OutputKind::Text,
                )
                .with_settings(limits.clone()),
            )
            .with_capability(
                CapabilityDescriptor::new(
                    FeatureTag::MarkdownConversion,
                    InputKind::Document,
                    OutputKind::Markdown,
                )
                .with_settings(limits),
            );
        Self { template }
    }

    async fn read(
        &self,
        file: &FileDescriptor,
        ctx: &ProcessingContext,
    ) -> Result<(String, TextFlavor), ProcessorError> {
        ctx.checkpoint()?;
        let flavor = flavor_of(&file.mime_type).ok_or_else(|| ProcessorError::UnsupportedInput {
            name: file.name.clone(),
            reason: format!("'{}' is not a text format", file.mime_type),
        })?;

        let bytes = tokio::fs::read(&file.path).await?;
        ctx.checkpoint()?;

        let content = String::from_utf8(bytes).map_err(|e| ProcessorError::UnsupportedInput {
            name: file.name.clone(),
            reason: format!("not valid UTF-8 (byte {})", e.utf8_error().valid_up_to()),
        })?;
        debug!(
            "Read {} ({} bytes, {:?})",
            file.name,
            content.len(),
            flavor
        );
        Ok((content, flavor))
    }
}

#[async_trait]
impl Processor for PlainTextProcessor {
    fn template(&self) -> &ProcessorTemplate {
        &self.template
    }

    async fn is_available(&self) -> Result<bool, ProcessorError> {
        Ok(true)
    }

    fn text_extractor(&self) -> Option<&dyn TextExtractor> {
        Some(self)
    }

    fn markdown_converter(&self) -> Option<&dyn MarkdownConverter> {
        Some(self)
    }
}

#[async_trait]
impl TextExtractor for PlainTextProcessor {
    async fn extract_text(
        &self,
        file: &FileDescriptor,
        _config: &MergedConfiguration,
        ctx: &ProcessingContext,
    ) -> Result<ProcessResult, ProcessorError> {
        let started = Instant::now();
        let (content, _) = self.read(file, ctx).await?;
        let mut result = ProcessResult::text(text::clean_text(&content));
        result.metadata.duration_ms = Some(started.elapsed().as_millis() as u64);
        Ok(result)
    }
}

#[async_trait]
impl MarkdownConverter for PlainTextProcessor {
    async fn convert_to_markdown(
        &self,
        file: &FileDescriptor,
        _config: &MergedConfiguration,
        ctx: &ProcessingContext,
    ) -> Result<ProcessResult, ProcessorError> {
        let started = Instant::now();
        let (content, flavor) = self.read(file, ctx).await?;
        let markdown = match flavor {
            TextFlavor::Markdown => text::clean_markdown(&content),
            TextFlavor::Code(language) => text::fenced(language, &content),
            TextFlavor::Prose => text::prose_to_markdown(&content),
        };
        let mut result = ProcessResult::markdown(markdown);
        result.metadata.duration_ms = Some(started.elapsed().as_millis() as u64);
        Ok(result)
    }
}

/// Classify a MIME type; `None` for anything that is not text.
fn flavor_of(mime_type: &str) -> Option<TextFlavor> {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let flavor = match essence.as_str() {
        "text/markdown" | "text/x-markdown" => TextFlavor::Markdown,
        "application/json" | "application/ld+json" => TextFlavor::Code("json"),
        "application/xml" | "text/xml" => TextFlavor::Code("xml"),
        "application/x-yaml" | "application/yaml" | "text/yaml" | "text/x-yaml" => {
            TextFlavor::Code("yaml")
        }
        "application/toml" | "text/x-toml" => TextFlavor::Code("toml"),
        "text/csv" => TextFlavor::Code("csv"),
        "text/html" => TextFlavor::Code("html"),
        other if other.starts_with("text/") => TextFlavor::Prose,
        _ => return None,
    };
    Some(flavor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::Builder;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ProcessingContext {
        ProcessingContext::new("req", CancellationToken::new())
    }

    fn write_temp(suffix: &str, content: &[u8]) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut f = Builder::new().suffix(suffix).tempfile().unwrap();
        f.write_all(content).unwrap();
        f
    }

    async fn descriptor(f: &tempfile::NamedTempFile) -> FileDescriptor {
        FileDescriptor::from_path(f.path()).await.unwrap()
    }

    #[test]
    fn flavors() {
        assert_eq!(flavor_of("text/markdown"), Some(TextFlavor::Markdown));
        assert_eq!(flavor_of("text/plain; charset=utf-8"), Some(TextFlavor::Prose));
        assert_eq!(flavor_of("application/json"), Some(TextFlavor::Code("json")));
        assert_eq!(flavor_of("application/pdf"), None);
        assert_eq!(flavor_of("image/png"), None);
    }

    #[test]
    fn template_declares_both_features() {
        let p = PlainTextProcessor::new();
        assert_eq!(p.id(), "local-text");
        assert!(p.implements(FeatureTag::TextExtraction));
        assert!(p.implements(FeatureTag::MarkdownConversion));
        assert!(p.status_provider().is_none());
    }

    #[tokio::test]
    async fn extracts_clean_text() {
        let f = write_temp(".txt", b"hello  \r\nworld\n\n\n\n");
        let file = descriptor(&f).await;
        let p = PlainTextProcessor::new();
        let r = p
            .extract_text(&file, &MergedConfiguration::default(), &ctx())
            .await
            .unwrap();
        assert_eq!(r.text.as_deref(), Some("hello\nworld\n"));
        assert!(r.metadata.duration_ms.is_some());
    }

    #[tokio::test]
    async fn converts_json_to_fenced_block() {
        let f = write_temp(".json", br#"{"a": 1}"#);
        let file = descriptor(&f).await;
        let r = PlainTextProcessor::new()
            .convert_to_markdown(&file, &MergedConfiguration::default(), &ctx())
            .await
            .unwrap();
        assert_eq!(r.markdown.as_deref(), Some("```json\n{\"a\": 1}\n```\n"));
    }

    #[tokio::test]
    async fn rejects_binary_mime() {
        let f = write_temp(".pdf", b"%PDF-1.7");
        let file = descriptor(&f).await;
        let err = PlainTextProcessor::new()
            .extract_text(&file, &MergedConfiguration::default(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::UnsupportedInput { .. }));
    }

    #[tokio::test]
    async fn rejects_invalid_utf8() {
        let f = write_temp(".txt", &[0x66, 0x6f, 0xff, 0xfe]);
        let file = descriptor(&f).await;
        let err = PlainTextProcessor::new()
            .extract_text(&file, &MergedConfiguration::default(), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("UTF-8"), "got: {err}");
    }

    #[tokio::test]
    async fn cancelled_before_read() {
        let f = write_temp(".txt", b"text");
        let file = descriptor(&f).await;
        let token = CancellationToken::new();
        token.cancel();
        let err = PlainTextProcessor::new()
            .extract_text(
                &file,
                &MergedConfiguration::default(),
                &ProcessingContext::new("req", token),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Cancelled));
    }
}
