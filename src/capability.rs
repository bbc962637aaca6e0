//! Capability descriptor model: static data describing what an engine can do.
//!
//! A [`ProcessorTemplate`] is authored once at startup (from presets or a
//! processor's own description) and never mutated. Each of its
//! [`CapabilityDescriptor`]s names a feature, the input it accepts, the
//! output it produces, and default [`CapabilitySettings`]. User overrides are
//! layered on top of these defaults by [`crate::resolver::ConfigResolver`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

// ── Enums ────────────────────────────────────────────────────────────────

/// A conversion feature a processor may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureTag {
    /// Image or document → plain text (OCR).
    TextExtraction,
    /// Document → Markdown.
    MarkdownConversion,
}

impl FeatureTag {
    pub const ALL: [FeatureTag; 2] = [FeatureTag::TextExtraction, FeatureTag::MarkdownConversion];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextExtraction => "text-extraction",
            Self::MarkdownConversion => "markdown-conversion",
        }
    }
}

impl fmt::Display for FeatureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text-extraction" | "text" | "ocr" => Ok(Self::TextExtraction),
            "markdown-conversion" | "markdown" | "md" => Ok(Self::MarkdownConversion),
            other => Err(format!("Unknown feature: {other}")),
        }
    }
}

/// Where an engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OriginKind {
    /// Bundled binary or OS-native engine on this host.
    #[default]
    Local,
    /// Third-party service reached over the network.
    RemoteApi,
}

/// Kind of file a capability accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputKind {
    Image,
    Document,
    #[default]
    Any,
}

impl InputKind {
    /// Whether a capability declared with `self` accepts a file of `kind`.
    pub fn accepts(&self, kind: InputKind) -> bool {
        matches!(self, InputKind::Any) || *self == kind || kind == InputKind::Any
    }
}

/// Kind of result a capability produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    Text,
    Markdown,
}

// ── Settings ─────────────────────────────────────────────────────────────

/// Capability-specific settings: remote endpoint, model, resource limits.
///
/// The same type serves as a template default and as a sparse override
/// patch; an unset field in a patch means "inherit".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Largest file the engine will accept, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,

    /// Per-call timeout for the engine, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Engine-specific knobs, merged key-by-key.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl CapabilitySettings {
    /// Apply `patch` on top of `self`: every field set in the patch wins,
    /// everything else is inherited.
    pub fn merge(&mut self, patch: &CapabilitySettings) {
        if let Some(endpoint) = &patch.endpoint {
            self.endpoint = Some(endpoint.clone());
        }
        if let Some(model) = &patch.model {
            self.model = Some(model.clone());
        }
        if let Some(size) = patch.max_file_size {
            self.max_file_size = Some(size);
        }
        if let Some(secs) = patch.timeout_secs {
            self.timeout_secs = Some(secs);
        }
        for (key, value) in &patch.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    /// Drop blank strings so they never shadow a template default.
    pub fn normalize(&mut self) {
        self.endpoint = non_blank(self.endpoint.take());
        self.model = non_blank(self.model.take());
        self.extra.retain(|_, v| !is_blank_value(v));
    }

    pub fn is_empty(&self) -> bool {
        self.endpoint.is_none()
            && self.model.is_none()
            && self.max_file_size.is_none()
            && self.timeout_secs.is_none()
            && self.extra.is_empty()
    }
}

/// `None` for absent or whitespace-only strings, trimmed otherwise.
pub(crate) fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub(crate) fn is_blank_value(v: &Value) -> bool {
    matches!(v, Value::String(s) if s.trim().is_empty())
}

// ── Descriptors ──────────────────────────────────────────────────────────

/// One capability of a processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub feature: FeatureTag,
    pub input: InputKind,
    pub output: OutputKind,
    #[serde(default)]
    pub settings: CapabilitySettings,
}

impl CapabilityDescriptor {
    pub fn new(feature: FeatureTag, input: InputKind, output: OutputKind) -> Self {
        Self {
            feature,
            input,
            output,
            settings: CapabilitySettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: CapabilitySettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Immutable description of a processor's identity and default capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorTemplate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub origin: OriginKind,
    /// Ordered; at most one descriptor per feature.
    pub capabilities: Vec<CapabilityDescriptor>,
}

impl ProcessorTemplate {
    pub fn new(id: impl Into<String>, origin: OriginKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            origin,
            capabilities: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a capability, replacing any earlier descriptor for the same feature.
    pub fn with_capability(mut self, capability: CapabilityDescriptor) -> Self {
        self.capabilities.retain(|c| c.feature != capability.feature);
        self.capabilities.push(capability);
        self
    }

    pub fn capability(&self, feature: FeatureTag) -> Option<&CapabilityDescriptor> {
        self.capabilities.iter().find(|c| c.feature == feature)
    }

    pub fn supports(&self, feature: FeatureTag) -> bool {
        self.capability(feature).is_some()
    }
}
