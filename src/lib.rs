//! # edgequake-docflow
//!
//! Asynchronous task orchestration for pluggable OCR and document-to-Markdown
//! engines.
//!
//! ## Why this crate?
//!
//! Document engines are slow and heterogeneous: a local text reader answers in
//! milliseconds, a cloud OCR API takes minutes and reports completion only when
//! asked. This crate puts one small, uniform request lifecycle in front of all
//! of them. Callers `start` a request, get an id back immediately, and poll
//! `get_result` until the task is `completed` or `failed`. Engines plug in
//! behind the [`Processor`] trait and advertise what they can do.
//!
//! ## Architecture
//!
//! ```text
//! start(file, feature, processor?)
//!  │
//!  ├─ 1. Resolve   explicit id or per-feature default → ProcessorRegistry
//!  ├─ 2. Config    template ⊕ user override → MergedConfiguration
//!  ├─ 3. Record    task = pending, id = uuid v4
//!  ├─ 4. Spawn     background run via capability dispatch
//!  │                 ├─ sync engine    → completed / failed
//!  │                 └─ polling engine → processing + provider handle
//!  └─ 5. Return    {requestId, status: pending}
//!
//! get_result(id)   poll provider if needed → snapshot → start retention clock
//! cancel(id)       trigger cancellation → failed/cancelled
//! sweep            reclaim finished tasks after the retention window
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docflow::processors::PlainTextProcessor;
//! use edgequake_docflow::{FeatureTag, FileDescriptor, Orchestrator, OrchestratorConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OrchestratorConfig::builder()
//!         .default_processor(FeatureTag::MarkdownConversion, "local-text")
//!         .build()?;
//!     let orchestrator = Orchestrator::in_memory(config);
//!     orchestrator.install(Arc::new(PlainTextProcessor::new()))?;
//!
//!     let file = FileDescriptor::from_path("notes.txt").await?;
//!     let started = orchestrator
//!         .start(file, FeatureTag::MarkdownConversion, None)
//!         .await?;
//!     let response = orchestrator.get_result(&started.request_id).await;
//!     println!("{}: {}%", response.status, response.progress);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docflow` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docflow = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod capability;
pub mod config;
pub mod error;
pub mod file;
pub mod keys;
pub mod orchestrator;
pub mod processor;
pub mod processors;
pub mod progress;
pub mod registry;
pub mod resolver;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use capability::{
    CapabilityDescriptor, CapabilitySettings, FeatureTag, InputKind, OriginKind, OutputKind,
    ProcessorTemplate,
};
pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};
pub use error::{DocflowError, ProcessorError, TaskError, TaskErrorCode};
pub use file::FileDescriptor;
pub use keys::KeyRotator;
pub use orchestrator::{Orchestrator, SweepReport};
pub use processor::{
    DisposableResource, MarkdownConverter, ProcessResult, ProcessingContext, ProcessingMetadata,
    Processor, ProviderStatus, StatusProvider, TextExtractor,
};
pub use progress::{NoopEventCallback, TaskEventCallback};
pub use registry::ProcessorRegistry;
pub use resolver::{
    ConfigResolver, JsonFileOverrideStore, MemoryOverrideStore, MergedConfiguration, Override,
    OverrideStore,
};
pub use task::{CancelResponse, StartResponse, TaskResponse, TaskStatus};
