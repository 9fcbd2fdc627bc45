//! Provider metadata: what actions a family of components supports, and
//! how each action is shaped (templates, commands, defaults). Also the
//! in-memory [`ProviderRegistry`] that answers "which actions does
//! provider X expose?" (spec §4.2).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ThinCiError};

/// One step of a `preSteps`/`postSteps` sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
}

/// One action a provider supports (`validate`, `plan`, `apply`, `destroy`,
/// conventionally).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAction {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Informational only (spec §9) — never consulted by the topological
    /// sort or job emission order.
    #[serde(default)]
    pub order: i64,
    /// Order-preserving (spec §4.7: "jobTemplate extras in their insertion
    /// order") — a plain `BTreeMap` would re-sort these keys alphabetically
    /// before `planner.rs` ever copies them into `Job.extra`.
    #[serde(default, rename = "jobTemplate")]
    pub job_template: serde_json::Map<String, Value>,
    #[serde(default, rename = "preSteps")]
    pub pre_steps: Vec<ActionStep>,
    #[serde(default, rename = "postSteps")]
    pub post_steps: Vec<ActionStep>,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
}

/// The `thinCI:` block of a provider document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThinCiBlock {
    #[serde(default)]
    pub actions: Vec<ProviderAction>,
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
    #[serde(default)]
    pub ordering: Vec<String>,
}

/// Fully loaded provider document/metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, rename = "thinCI")]
    pub thin_ci: Option<ThinCiBlock>,
}

impl ProviderMetadata {
    pub fn actions(&self) -> &[ProviderAction] {
        self.thin_ci.as_ref().map(|b| b.actions.as_slice()).unwrap_or(&[])
    }

    pub fn defaults(&self) -> BTreeMap<String, Value> {
        self.thin_ci
            .as_ref()
            .map(|b| b.defaults.clone())
            .unwrap_or_default()
    }

    pub fn action(&self, name: &str) -> Option<&ProviderAction> {
        self.actions().iter().find(|a| a.name == name)
    }

    pub fn supports(&self, name: &str) -> bool {
        self.action(name).is_some()
    }

    fn require_thin_ci(&self) -> Result<()> {
        match &self.thin_ci {
            Some(block) if !block.actions.is_empty() => Ok(()),
            _ => Err(ThinCiError::ProviderMissingThinCi(self.name.clone())),
        }
    }
}

/// Parses a provider document (spec §6 grammar) from YAML.
pub fn load_provider_str(name_hint: &str, yaml: &str) -> Result<ProviderMetadata> {
    let mut metadata: ProviderMetadata = serde_yaml::from_str(yaml)?;
    if metadata.name.trim().is_empty() {
        metadata.name = name_hint.to_string();
    }
    metadata.require_thin_ci()?;
    Ok(metadata)
}

/// Loads `provider.yaml` from a directory previously resolved by a
/// [`crate::fetch::ProviderFetcher`].
pub fn load_provider_document(name_hint: &str, dir: &Path) -> Result<ProviderMetadata> {
    let path = dir.join("provider.yaml");
    let contents = std::fs::read_to_string(&path)?;
    load_provider_str(name_hint, &contents)
}

/// In-memory, immutable-after-load mapping from provider name to metadata.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderMetadata>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites any prior registration under the same name.
    pub fn register(&mut self, metadata: ProviderMetadata) {
        self.providers.insert(metadata.name.clone(), metadata);
    }

    pub fn get(&self, name: &str) -> Result<&ProviderMetadata> {
        self.providers.get(name).ok_or_else(|| ThinCiError::ProviderUnavailable {
            name: name.to_string(),
            available: self.list(),
        })
    }

    /// Sorted sequence of registered provider names — free, since the
    /// registry is backed by a `BTreeMap`.
    pub fn list(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
