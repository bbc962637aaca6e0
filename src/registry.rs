//! Processor registration and discovery.
//!
//! The registry is the only owner of live processor instances. It is an
//! explicitly constructed value: hosts build one at startup and share it
//! (usually inside an [`crate::orchestrator::Orchestrator`]); tests build
//! fresh ones in isolation.
//!
//! # Thread Safety
//!
//! The map sits behind a `parking_lot::RwLock` that is never held across an
//! `.await`. Lookups hand out `Arc` clones so callers can keep using a
//! processor after it has been unregistered.

use crate::capability::FeatureTag;
use crate::error::DocflowError;
use crate::processor::Processor;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Validate a processor id before registration.
///
/// # Rules
///
/// - Id cannot be empty
/// - Id cannot contain whitespace
fn validate_processor_id(id: &str) -> Result<(), DocflowError> {
    if id.is_empty() {
        return Err(DocflowError::Validation(
            "Processor id cannot be empty".to_string(),
        ));
    }
    if id.contains(char::is_whitespace) {
        return Err(DocflowError::Validation(format!(
            "Processor id '{}' cannot contain whitespace",
            id
        )));
    }
    Ok(())
}

/// Catalog of live processors keyed by id.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<String, Arc<dyn Processor>>>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.list())
            .finish()
    }
}

impl ProcessorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor.
    ///
    /// # Errors
    ///
    /// - `Validation` if the id is blank or contains whitespace
    /// - `AlreadyRegistered` if a processor with the same id exists
    pub fn register(&self, processor: Arc<dyn Processor>) -> Result<(), DocflowError> {
        let id = processor.id().to_string();
        validate_processor_id(&id)?;

        let mut processors = self.processors.write();
        if processors.contains_key(&id) {
            return Err(DocflowError::AlreadyRegistered { id });
        }
        processors.insert(id.clone(), processor);
        info!("Registered processor '{}'", id);
        Ok(())
    }

    /// Remove a processor, disposing it if it holds resources.
    ///
    /// Returns whether an entry was removed. Disposal failures are logged.
    pub async fn unregister(&self, id: &str) -> bool {
        let removed = self.processors.write().remove(id);
        let Some(processor) = removed else {
            return false;
        };
        if let Some(disposable) = processor.disposable() {
            if let Err(e) = disposable.dispose().await {
                warn!("Failed to dispose processor '{}': {}", id, e);
            }
        }
        info!("Unregistered processor '{}'", id);
        true
    }

    /// Get a processor by id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Processor>, DocflowError> {
        self.processors
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DocflowError::ProcessorNotFound { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.processors.read().contains_key(id)
    }

    /// List all registered processor ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.processors.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.processors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.read().is_empty()
    }

    /// Processors that are available right now and, when `feature` is given,
    /// implement it.
    ///
    /// Every processor is probed independently and concurrently; a probe
    /// that errors marks only that processor unavailable. Results are sorted
    /// by id.
    pub async fn list_available(&self, feature: Option<FeatureTag>) -> Vec<Arc<dyn Processor>> {
        let candidates: Vec<Arc<dyn Processor>> = self
            .processors
            .read()
            .values()
            .filter(|p| feature.is_none_or(|f| p.supports(f) && p.implements(f)))
            .cloned()
            .collect();

        let probes = candidates.into_iter().map(|processor| async move {
            match processor.is_available().await {
                Ok(true) => Some(processor),
                Ok(false) => {
                    debug!("Processor '{}' reports unavailable", processor.id());
                    None
                }
                Err(e) => {
                    warn!("Availability check failed for '{}': {}", processor.id(), e);
                    None
                }
            }
        });

        let mut available: Vec<Arc<dyn Processor>> =
            join_all(probes).await.into_iter().flatten().collect();
        available.sort_by(|a, b| a.id().cmp(b.id()));
        available
    }

    /// Remove every processor, disposing those that hold resources.
    pub async fn dispose_all(&self) {
        let drained: Vec<(String, Arc<dyn Processor>)> =
            self.processors.write().drain().collect();
        for (id, processor) in drained {
            if let Some(disposable) = processor.disposable() {
                if let Err(e) = disposable.dispose().await {
                    warn!("Failed to dispose processor '{}': {}", id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        CapabilityDescriptor, InputKind, OriginKind, OutputKind, ProcessorTemplate,
    };
    use crate::error::ProcessorError;
    use crate::file::FileDescriptor;
    use crate::processor::{
        DisposableResource, ProcessResult, ProcessingContext, TextExtractor,
    };
    use crate::resolver::MergedConfiguration;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    enum Probe {
        Up,
        Down,
        Broken,
    }

    struct MockProcessor {
        template: ProcessorTemplate,
        probe: Probe,
        disposed: Arc<AtomicBool>,
    }

    impl MockProcessor {
        fn new(id: &str, probe: Probe) -> Self {
            Self {
                template: ProcessorTemplate::new(id, OriginKind::Local).with_capability(
                    CapabilityDescriptor::new(
                        FeatureTag::TextExtraction,
                        InputKind::Any,
                        OutputKind::Text,
                    ),
                ),
                probe,
                disposed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl Processor for MockProcessor {
        fn template(&self) -> &ProcessorTemplate {
            &self.template
        }

        async fn is_available(&self) -> Result<bool, ProcessorError> {
            match self.probe {
                Probe::Up => Ok(true),
                Probe::Down => Ok(false),
                Probe::Broken => Err(ProcessorError::Failed("probe exploded".into())),
            }
        }

        fn text_extractor(&self) -> Option<&dyn TextExtractor> {
            Some(self)
        }

        fn disposable(&self) -> Option<&dyn DisposableResource> {
            Some(self)
        }
    }

    #[async_trait]
    impl TextExtractor for MockProcessor {
        async fn extract_text(
            &self,
            _file: &FileDescriptor,
            _config: &MergedConfiguration,
            _ctx: &ProcessingContext,
        ) -> Result<ProcessResult, ProcessorError> {
            Ok(ProcessResult::text("ok"))
        }
    }

    #[async_trait]
    impl DisposableResource for MockProcessor {
        async fn dispose(&self) -> Result<(), ProcessorError> {
            self.disposed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn register_rejects_duplicates() {
        let registry = ProcessorRegistry::new();
        registry
            .register(Arc::new(MockProcessor::new("tess", Probe::Up)))
            .unwrap();
        let err = registry
            .register(Arc::new(MockProcessor::new("tess", Probe::Up)))
            .unwrap_err();
        assert!(matches!(err, DocflowError::AlreadyRegistered { ref id } if id == "tess"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_rejects_bad_ids() {
        let registry = ProcessorRegistry::new();
        assert!(registry
            .register(Arc::new(MockProcessor::new("", Probe::Up)))
            .is_err());
        assert!(registry
            .register(Arc::new(MockProcessor::new("has space", Probe::Up)))
            .is_err());
    }

    #[test]
    fn get_unknown_is_not_found() {
        let registry = ProcessorRegistry::new();
        assert!(matches!(
            registry.get("ghost"),
            Err(DocflowError::ProcessorNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn unregister_disposes_and_reports() {
        let registry = ProcessorRegistry::new();
        let mock = MockProcessor::new("tess", Probe::Up);
        let disposed = Arc::clone(&mock.disposed);
        registry.register(Arc::new(mock)).unwrap();

        assert!(registry.unregister("tess").await);
        assert!(disposed.load(Ordering::SeqCst));
        assert!(!registry.unregister("tess").await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn list_available_isolates_failing_probes() {
        let registry = ProcessorRegistry::new();
        registry
            .register(Arc::new(MockProcessor::new("a-up", Probe::Up)))
            .unwrap();
        registry
            .register(Arc::new(MockProcessor::new("b-broken", Probe::Broken)))
            .unwrap();
        registry
            .register(Arc::new(MockProcessor::new("c-down", Probe::Down)))
            .unwrap();
        registry
            .register(Arc::new(MockProcessor::new("d-up", Probe::Up)))
            .unwrap();

        let ids: Vec<String> = registry
            .list_available(None)
            .await
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a-up", "d-up"]);
    }

    #[tokio::test]
    async fn list_available_filters_by_feature() {
        let registry = ProcessorRegistry::new();
        registry
            .register(Arc::new(MockProcessor::new("tess", Probe::Up)))
            .unwrap();

        assert_eq!(
            registry
                .list_available(Some(FeatureTag::TextExtraction))
                .await
                .len(),
            1
        );
        assert!(registry
            .list_available(Some(FeatureTag::MarkdownConversion))
            .await
            .is_empty());
    }
}
