//! Configuration layering: immutable templates + persisted user overrides.
//!
//! Every request runs with a [`MergedConfiguration`] computed fresh from the
//! processor's [`ProcessorTemplate`] and whatever [`Override`] the user has
//! stored for it. Precedence is simple: the newest explicit, non-blank field
//! wins; anything omitted is inherited from the previous override or, failing
//! that, from the template.
//!
//! ```text
//! template ──┐
//!            ├── merge ──▶ MergedConfiguration (per request, never cached)
//! override ──┘
//!    ▲
//!    └── update(partial) deep-merges into the stored override
//! ```
//!
//! Overrides live behind the [`OverrideStore`] trait so the host decides where
//! they persist. [`MemoryOverrideStore`] keeps them in process memory;
//! [`JsonFileOverrideStore`] keeps them in a single JSON document.

use crate::capability::{
    is_blank_value, non_blank, CapabilityDescriptor, CapabilitySettings, FeatureTag, OriginKind,
    ProcessorTemplate,
};
use crate::error::DocflowError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

// ── Override ─────────────────────────────────────────────────────────────

/// A user-authored partial configuration for one processor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Override {
    /// Replaces the stored key list wholesale when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_keys: Option<Vec<String>>,

    /// Sparse per-feature setting patches, merged key-by-key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capabilities: BTreeMap<FeatureTag, CapabilitySettings>,

    /// Free-form options bag, merged key-by-key.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl Override {
    pub fn api_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            api_keys: Some(keys.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn capability(feature: FeatureTag, settings: CapabilitySettings) -> Self {
        let mut capabilities = BTreeMap::new();
        capabilities.insert(feature, settings);
        Self {
            capabilities,
            ..Default::default()
        }
    }

    pub fn option(key: impl Into<String>, value: Value) -> Self {
        let mut options = Map::new();
        options.insert(key.into(), value);
        Self {
            options,
            ..Default::default()
        }
    }

    /// Strip blank strings and empty patches before storage.
    pub fn normalize(&mut self) {
        if let Some(keys) = self.api_keys.take() {
            self.api_keys = Some(
                keys.into_iter()
                    .filter_map(|k| non_blank(Some(k)))
                    .collect(),
            );
        }
        for settings in self.capabilities.values_mut() {
            settings.normalize();
        }
        self.capabilities.retain(|_, s| !s.is_empty());
        self.options.retain(|_, v| !is_blank_value(v));
    }

    /// Deep-merge a newer partial override into this one.
    pub fn merge(&mut self, newer: Override) {
        if let Some(keys) = newer.api_keys {
            self.api_keys = Some(keys);
        }
        for (feature, patch) in newer.capabilities {
            self.capabilities.entry(feature).or_default().merge(&patch);
        }
        for (key, value) in newer.options {
            self.options.insert(key, value);
        }
    }
}

// ── Merged configuration ─────────────────────────────────────────────────

/// Template with the override applied: what a single request runs with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedConfiguration {
    pub id: String,
    pub name: String,
    pub origin: OriginKind,
    #[serde(default)]
    pub api_keys: Vec<String>,
    pub capabilities: Vec<CapabilityDescriptor>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl MergedConfiguration {
    /// Layer `ov` over `template`.
    ///
    /// Every capability in the template survives; override patches for
    /// features the template does not declare are ignored.
    pub fn merge(template: &ProcessorTemplate, ov: Option<&Override>) -> Self {
        let mut capabilities = template.capabilities.clone();
        let mut api_keys = Vec::new();
        let mut options = Map::new();

        if let Some(ov) = ov {
            for cap in capabilities.iter_mut() {
                if let Some(patch) = ov.capabilities.get(&cap.feature) {
                    cap.settings.merge(patch);
                }
            }
            if let Some(keys) = &ov.api_keys {
                api_keys = keys.clone();
            }
            options = ov.options.clone();
        }

        Self {
            id: template.id.clone(),
            name: template.name.clone(),
            origin: template.origin,
            api_keys,
            capabilities,
            options,
        }
    }

    pub fn capability(&self, feature: FeatureTag) -> Option<&CapabilityDescriptor> {
        self.capabilities.iter().find(|c| c.feature == feature)
    }

    pub fn settings(&self, feature: FeatureTag) -> Option<&CapabilitySettings> {
        self.capability(feature).map(|c| &c.settings)
    }

    pub fn supports(&self, feature: FeatureTag) -> bool {
        self.capability(feature).is_some()
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }
}

// ── Stores ───────────────────────────────────────────────────────────────

/// Persistence for user overrides, keyed by processor id.
#[async_trait]
pub trait OverrideStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Override>, DocflowError>;

    async fn save(&self, id: &str, value: &Override) -> Result<(), DocflowError>;
}

/// Keeps overrides in process memory.
#[derive(Debug, Default)]
pub struct MemoryOverrideStore {
    entries: Mutex<HashMap<String, Override>>,
}

impl MemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OverrideStore for MemoryOverrideStore {
    async fn load(&self, id: &str) -> Result<Option<Override>, DocflowError> {
        Ok(self.entries.lock().get(id).cloned())
    }

    async fn save(&self, id: &str, value: &Override) -> Result<(), DocflowError> {
        self.entries.lock().insert(id.to_string(), value.clone());
        Ok(())
    }
}

/// Keeps all overrides in one JSON document: `{ "<processor id>": Override }`.
///
/// Writes are atomic (temp file + rename) so a crash never leaves a
/// half-written document behind.
#[derive(Debug)]
pub struct JsonFileOverrideStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileOverrideStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, Override>, DocflowError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| self.store_error(e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(self.store_error(e)),
        }
    }

    fn store_error(&self, e: impl std::fmt::Display) -> DocflowError {
        DocflowError::OverrideStore {
            path: self.path.clone(),
            detail: e.to_string(),
        }
    }
}

#[async_trait]
impl OverrideStore for JsonFileOverrideStore {
    async fn load(&self, id: &str) -> Result<Option<Override>, DocflowError> {
        Ok(self.read_all().await?.remove(id))
    }

    async fn save(&self, id: &str, value: &Override) -> Result<(), DocflowError> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(id.to_string(), value.clone());
        let json = serde_json::to_vec_pretty(&all).map_err(|e| self.store_error(e))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.store_error(e))?;
            }
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| self.store_error(e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| self.store_error(e))?;
        debug!("Persisted override for '{}' to {}", id, self.path.display());
        Ok(())
    }
}

// ── Resolver ─────────────────────────────────────────────────────────────

/// Merges templates with stored overrides.
pub struct ConfigResolver {
    templates: RwLock<HashMap<String, Arc<ProcessorTemplate>>>,
    store: Arc<dyn OverrideStore>,
    update_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("templates", &self.template_ids())
            .field("store", &"<dyn OverrideStore>")
            .finish()
    }
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn OverrideStore>) -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
            store,
            update_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// A resolver backed by a fresh [`MemoryOverrideStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryOverrideStore::new()))
    }

    /// Load a template. Templates are immutable once loaded.
    pub fn add_template(&self, template: ProcessorTemplate) -> Result<(), DocflowError> {
        if template.id.trim().is_empty() {
            return Err(DocflowError::Validation(
                "template id cannot be empty".into(),
            ));
        }
        let mut templates = self.templates.write();
        if templates.contains_key(&template.id) {
            return Err(DocflowError::DuplicateTemplate { id: template.id });
        }
        debug!("Loaded template '{}'", template.id);
        templates.insert(template.id.clone(), Arc::new(template));
        Ok(())
    }

    pub fn template(&self, id: &str) -> Option<Arc<ProcessorTemplate>> {
        self.templates.read().get(id).cloned()
    }

    pub fn template_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.templates.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Effective configuration for `id`: template merged with its override.
    pub async fn configuration_for(&self, id: &str) -> Result<MergedConfiguration, DocflowError> {
        let template = self
            .template(id)
            .ok_or_else(|| DocflowError::TemplateNotFound { id: id.to_string() })?;
        let stored = self.store.load(id).await?;
        Ok(MergedConfiguration::merge(&template, stored.as_ref()))
    }

    /// Deep-merge `partial` into the stored override, persist it, and return
    /// the new effective configuration.
    pub async fn update(
        &self,
        id: &str,
        mut partial: Override,
    ) -> Result<MergedConfiguration, DocflowError> {
        let template = self
            .template(id)
            .ok_or_else(|| DocflowError::TemplateNotFound { id: id.to_string() })?;

        // Serialise read-modify-write cycles so concurrent partial updates
        // accumulate instead of clobbering each other.
        let _guard = self.update_lock.lock().await;

        partial.normalize();
        let mut stored = self.store.load(id).await?.unwrap_or_default();
        stored.merge(partial);
        stored.normalize();
        self.store.save(id, &stored).await?;

        info!("Updated configuration override for '{}'", id);
        Ok(MergedConfiguration::merge(&template, Some(&stored)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{InputKind, OutputKind};
    use serde_json::json;

    fn template() -> ProcessorTemplate {
        ProcessorTemplate::new("cloud-md", OriginKind::RemoteApi)
            .with_capability(
                CapabilityDescriptor::new(
                    FeatureTag::TextExtraction,
                    InputKind::Image,
                    OutputKind::Text,
                )
                .with_settings(CapabilitySettings {
                    endpoint: Some("https://ocr.example.com".into()),
                    model: Some("ocr-v1".into()),
                    ..Default::default()
                }),
            )
            .with_capability(
                CapabilityDescriptor::new(
                    FeatureTag::MarkdownConversion,
                    InputKind::Document,
                    OutputKind::Markdown,
                )
                .with_settings(CapabilitySettings {
                    endpoint: Some("https://md.example.com".into()),
                    timeout_secs: Some(120),
                    ..Default::default()
                }),
            )
    }

    fn resolver() -> ConfigResolver {
        let r = ConfigResolver::in_memory();
        r.add_template(template()).unwrap();
        r
    }

    #[tokio::test]
    async fn configuration_without_override_is_template() {
        let r = resolver();
        let merged = r.configuration_for("cloud-md").await.unwrap();
        assert_eq!(merged.capabilities, template().capabilities);
        assert!(merged.api_keys.is_empty());
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let r = resolver();
        assert!(matches!(
            r.configuration_for("nope").await,
            Err(DocflowError::TemplateNotFound { .. })
        ));
        assert!(matches!(
            r.update("nope", Override::default()).await,
            Err(DocflowError::TemplateNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn api_keys_only_leaves_settings_at_defaults() {
        let r = resolver();
        let merged = r
            .update("cloud-md", Override::api_keys(["k1", "k2"]))
            .await
            .unwrap();
        assert_eq!(merged.api_keys, vec!["k1", "k2"]);
        assert_eq!(merged.capabilities, template().capabilities);
    }

    #[tokio::test]
    async fn one_capability_leaves_siblings_untouched() {
        let r = resolver();
        r.update("cloud-md", Override::api_keys(["k1"])).await.unwrap();
        let merged = r
            .update(
                "cloud-md",
                Override::capability(
                    FeatureTag::TextExtraction,
                    CapabilitySettings {
                        model: Some("ocr-v2".into()),
                        ..Default::default()
                    },
                ),
            )
            .await
            .unwrap();

        let ocr = merged.settings(FeatureTag::TextExtraction).unwrap();
        assert_eq!(ocr.model.as_deref(), Some("ocr-v2"));
        assert_eq!(ocr.endpoint.as_deref(), Some("https://ocr.example.com"));
        assert_eq!(
            merged.settings(FeatureTag::MarkdownConversion),
            template()
                .capability(FeatureTag::MarkdownConversion)
                .map(|c| &c.settings)
        );
        assert_eq!(merged.api_keys, vec!["k1"]);
    }

    #[tokio::test]
    async fn sequential_partials_accumulate() {
        let r = resolver();
        r.update(
            "cloud-md",
            Override::capability(
                FeatureTag::MarkdownConversion,
                CapabilitySettings {
                    model: Some("md-large".into()),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap();
        let merged = r
            .update(
                "cloud-md",
                Override::capability(
                    FeatureTag::MarkdownConversion,
                    CapabilitySettings {
                        timeout_secs: Some(300),
                        ..Default::default()
                    },
                ),
            )
            .await
            .unwrap();

        let md = merged.settings(FeatureTag::MarkdownConversion).unwrap();
        assert_eq!(md.model.as_deref(), Some("md-large"));
        assert_eq!(md.timeout_secs, Some(300));
        assert_eq!(md.endpoint.as_deref(), Some("https://md.example.com"));
    }

    #[tokio::test]
    async fn blank_strings_never_shadow_defaults() {
        let r = resolver();
        let mut ov = Override::capability(
            FeatureTag::TextExtraction,
            CapabilitySettings {
                endpoint: Some("  ".into()),
                ..Default::default()
            },
        );
        ov.api_keys = Some(vec!["".into(), " key ".into()]);
        ov.options.insert("region".into(), json!(""));
        let merged = r.update("cloud-md", ov).await.unwrap();

        assert_eq!(
            merged
                .settings(FeatureTag::TextExtraction)
                .and_then(|s| s.endpoint.as_deref()),
            Some("https://ocr.example.com")
        );
        assert_eq!(merged.api_keys, vec!["key"]);
        assert!(merged.option("region").is_none());
    }

    #[tokio::test]
    async fn api_key_list_replaces_wholesale() {
        let r = resolver();
        r.update("cloud-md", Override::api_keys(["a", "b", "c"]))
            .await
            .unwrap();
        let merged = r
            .update("cloud-md", Override::api_keys(["z"]))
            .await
            .unwrap();
        assert_eq!(merged.api_keys, vec!["z"]);
    }

    #[test]
    fn override_for_undeclared_feature_is_ignored() {
        let t = ProcessorTemplate::new("ocr-only", OriginKind::Local).with_capability(
            CapabilityDescriptor::new(FeatureTag::TextExtraction, InputKind::Any, OutputKind::Text),
        );
        let ov = Override::capability(
            FeatureTag::MarkdownConversion,
            CapabilitySettings {
                model: Some("x".into()),
                ..Default::default()
            },
        );
        let merged = MergedConfiguration::merge(&t, Some(&ov));
        assert_eq!(merged.capabilities.len(), 1);
        assert!(!merged.supports(FeatureTag::MarkdownConversion));
    }

    #[test]
    fn duplicate_template_rejected() {
        let r = resolver();
        assert!(matches!(
            r.add_template(template()),
            Err(DocflowError::DuplicateTemplate { .. })
        ));
    }

    #[tokio::test]
    async fn json_file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("overrides.json");
        let store = Arc::new(JsonFileOverrideStore::new(&path));

        let r = ConfigResolver::new(store.clone());
        r.add_template(template()).unwrap();
        r.update("cloud-md", Override::option("language", json!("deu")))
            .await
            .unwrap();

        // A second resolver over the same file sees the persisted override.
        let r2 = ConfigResolver::new(Arc::new(JsonFileOverrideStore::new(&path)));
        r2.add_template(template()).unwrap();
        let merged = r2.configuration_for("cloud-md").await.unwrap();
        assert_eq!(merged.option("language"), Some(&json!("deu")));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("cloud-md"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn json_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileOverrideStore::new(dir.path().join("absent.json"));
        assert_eq!(store.load("anything").await.unwrap(), None);
    }
}
