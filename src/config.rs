//! Orchestrator configuration.
//!
//! All orchestrator behaviour is controlled through [`OrchestratorConfig`],
//! built via its [`OrchestratorConfigBuilder`]. Per-processor settings are a
//! separate concern handled by [`crate::resolver::ConfigResolver`].

use crate::capability::FeatureTag;
use crate::error::DocflowError;
use crate::progress::TaskEventCallback;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for an [`crate::orchestrator::Orchestrator`].
///
/// # Example
/// ```rust
/// use edgequake_docflow::{FeatureTag, OrchestratorConfig};
/// use std::time::Duration;
///
/// let config = OrchestratorConfig::builder()
///     .retention(Duration::from_secs(600))
///     .sweep_interval(Duration::from_secs(30))
///     .default_processor(FeatureTag::TextExtraction, "local-text")
///     .build()
///     .unwrap();
/// assert_eq!(config.default_for(FeatureTag::TextExtraction), Some("local-text"));
/// ```
#[derive(Clone)]
pub struct OrchestratorConfig {
    /// How long a finished task stays queryable after its completion is first
    /// observed. Default: 5 minutes.
    pub retention: Duration,

    /// Period of the reclamation sweep. Must be shorter than `retention`.
    /// Default: 60 s.
    pub sweep_interval: Duration,

    /// Processor used for a feature when a request names none.
    pub default_processors: BTreeMap<FeatureTag, String>,

    /// Receives lifecycle events for every task.
    pub event_callback: Option<Arc<dyn TaskEventCallback>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
            default_processors: BTreeMap::new(),
            event_callback: None,
        }
    }
}

impl fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("retention", &self.retention)
            .field("sweep_interval", &self.sweep_interval)
            .field("default_processors", &self.default_processors)
            .field(
                "event_callback",
                &self.event_callback.as_ref().map(|_| "<dyn TaskEventCallback>"),
            )
            .finish()
    }
}

impl OrchestratorConfig {
    /// Create a new builder for `OrchestratorConfig`.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn default_for(&self, feature: FeatureTag) -> Option<&str> {
        self.default_processors.get(&feature).map(String::as_str)
    }
}

/// Builder for [`OrchestratorConfig`].
#[derive(Debug)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn default_processor(mut self, feature: FeatureTag, id: impl Into<String>) -> Self {
        self.config.default_processors.insert(feature, id.into());
        self
    }

    pub fn event_callback(mut self, cb: Arc<dyn TaskEventCallback>) -> Self {
        self.config.event_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OrchestratorConfig, DocflowError> {
        let c = &self.config;
        if c.retention.is_zero() {
            return Err(DocflowError::InvalidConfig(
                "Retention window must be > 0".into(),
            ));
        }
        if c.sweep_interval.is_zero() || c.sweep_interval >= c.retention {
            return Err(DocflowError::InvalidConfig(format!(
                "Sweep interval must be > 0 and shorter than the retention window ({:?}), got {:?}",
                c.retention, c.sweep_interval
            )));
        }
        if let Some((feature, _)) = c
            .default_processors
            .iter()
            .find(|(_, id)| id.trim().is_empty())
        {
            return Err(DocflowError::InvalidConfig(format!(
                "Default processor for '{feature}' is blank"
            )));
        }
        Ok(self.config)
    }
}
