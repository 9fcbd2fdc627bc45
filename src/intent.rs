//! Intent documents: Repository + Component + Relationship records.
//!
//! These are the "already-parsed records" an external loader hands to the
//! core (spec §4.1) — this module *is* that loader, supplied so the crate
//! is directly runnable rather than only testable with hand-built fixtures.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ThinCiError};

/// A provider reference as declared under `providers:` in an intent document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRef {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub defaults: Value,
}

/// One component declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: String,
    /// `inputs` is accepted as a legacy alias for `spec` (spec §6).
    #[serde(default, alias = "inputs")]
    pub spec: Value,
}

impl Component {
    /// The provider name, split at the first `.` in `type` (spec §3).
    pub fn provider_name(&self) -> Option<&str> {
        self.component_type.split_once('.').map(|(p, _)| p)
    }
}

/// One `{from, to, type}` relationship triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
}

/// Document metadata block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A fully loaded intent document (repository).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDoc {
    #[serde(default, rename = "apiVersion")]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: RepositoryMetadata,
    #[serde(default)]
    pub providers: std::collections::BTreeMap<String, ProviderRef>,
    /// Legacy single-provider shorthand (spec §6).
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl RepositoryDoc {
    /// Validates the document per spec §4.1: non-empty name, `type` must
    /// contain a `.`, and component names unique within this repository.
    /// Violations are fatal — "malformed intent", never silently skipped.
    pub fn validate(&self) -> Result<()> {
        match self.violations().into_iter().next() {
            Some(message) => Err(ThinCiError::MalformedIntent(message)),
            None => Ok(()),
        }
    }

    /// Every validation violation in this document, in a stable order —
    /// used by `lint`, which reports all of them instead of aborting on the
    /// first (spec §4.1 rules, applied exhaustively rather than
    /// short-circuited).
    pub fn violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.api_version.trim().is_empty() {
            violations.push("apiVersion is required".to_string());
        }
        if self.kind.trim().is_empty() {
            violations.push("kind is required".to_string());
        }
        if self.metadata.name.trim().is_empty() {
            violations.push("metadata.name is required".to_string());
        }

        let mut seen = HashSet::new();
        for component in &self.components {
            if component.name.trim().is_empty() {
                violations.push(format!(
                    "component in repository '{}' is missing a name",
                    self.metadata.name
                ));
                continue;
            }
            if component.component_type.trim().is_empty() {
                violations.push(format!("component '{}' is missing a type", component.name));
            } else if !component.component_type.contains('.') {
                violations.push(format!(
                    "component '{}' has invalid type '{}' (expected '<provider>.<kind>')",
                    component.name, component.component_type
                ));
            }
            if !seen.insert(component.name.clone()) {
                violations.push(format!(
                    "duplicate component name '{}' in repository '{}'",
                    component.name, self.metadata.name
                ));
            }
        }

        violations
    }

    /// All providers referenced by this document: the `providers:` map plus
    /// the legacy single `provider:` shorthand (registered with empty
    /// source/version, i.e. local lookup).
    pub fn referenced_providers(&self) -> std::collections::BTreeMap<String, ProviderRef> {
        let mut providers = self.providers.clone();
        if let Some(name) = &self.provider {
            providers.entry(name.clone()).or_insert_with(|| ProviderRef {
                source: String::new(),
                version: String::new(),
                defaults: Value::Null,
            });
        }
        providers
    }

    pub fn find_component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Parses one YAML intent document from a string without validating it —
/// used by `lint`, which wants to collect every violation rather than abort
/// on the first.
pub fn parse_intent_str(yaml: &str) -> Result<RepositoryDoc> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Parses one YAML intent document from a string, validating it.
pub fn load_intent_str(yaml: &str) -> Result<RepositoryDoc> {
    let doc = parse_intent_str(yaml)?;
    doc.validate()?;
    Ok(doc)
}

/// Loads and validates an intent document from disk.
pub fn load_intent_document(path: &Path) -> Result<RepositoryDoc> {
    let contents = std::fs::read_to_string(path)?;
    load_intent_str(&contents).map_err(|err| match err {
        ThinCiError::MalformedIntent(msg) => {
            ThinCiError::MalformedIntent(format!("{} ({})", msg, path.display()))
        }
        other => other,
    })
}

/// Loads every intent document in `paths`, in order.
pub fn load_intent_documents(paths: &[impl AsRef<Path>]) -> Result<Vec<RepositoryDoc>> {
    paths.iter().map(|p| load_intent_document(p.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
apiVersion: sourceplane.io/v1
kind: Intent
metadata:
  name: acme-platform
providers:
  terraform:
    source: ""
    version: "1.0.0"
components:
  - name: vpc
    type: terraform.network
  - name: eks
    type: terraform.cluster
    spec:
      path: terraform/eks
relationships:
  - from: eks
    to: vpc
    type: depends_on
"#;

    #[test]
    fn parses_minimal_intent() {
        let doc = load_intent_str(MINIMAL).expect("parses");
        assert_eq!(doc.metadata.name, "acme-platform");
        assert_eq!(doc.components.len(), 2);
        assert_eq!(doc.relationships.len(), 1);
        assert_eq!(doc.components[1].provider_name(), Some("terraform"));
    }

    #[test]
    fn rejects_missing_name() {
        let yaml = "apiVersion: sourceplane.io/v1\nkind: Intent\nmetadata: {}\n";
        let err = load_intent_str(yaml).unwrap_err();
        assert!(matches!(err, ThinCiError::MalformedIntent(_)));
    }

    #[test]
    fn rejects_missing_api_version_and_kind() {
        let yaml = "metadata:\n  name: acme\n";
        let doc = parse_intent_str(yaml).unwrap();
        let violations = doc.violations();
        assert!(violations.iter().any(|v| v.contains("apiVersion")));
        assert!(violations.iter().any(|v| v.contains("kind")));
    }

    #[test]
    fn lint_collects_every_violation_not_just_the_first() {
        let yaml = r#"
metadata: { name: "" }
components:
  - name: ""
    type: terraform.network
  - name: a
    type: foo
"#;
        let doc = parse_intent_str(yaml).unwrap();
        let violations = doc.violations();
        assert!(violations.len() >= 4);
    }

    #[test]
    fn rejects_type_without_dot() {
        let yaml = r#"
apiVersion: sourceplane.io/v1
kind: Intent
metadata: { name: x }
components:
  - name: a
    type: foo
"#;
        let err = load_intent_str(yaml).unwrap_err();
        assert!(format!("{err}").contains("expected '<provider>.<kind>'"));
    }

    #[test]
    fn rejects_duplicate_component_names() {
        let yaml = r#"
apiVersion: sourceplane.io/v1
kind: Intent
metadata: { name: x }
components:
  - name: a
    type: terraform.network
  - name: a
    type: terraform.cluster
"#;
        let err = load_intent_str(yaml).unwrap_err();
        assert!(format!("{err}").contains("duplicate component"));
    }

    #[test]
    fn inputs_is_alias_for_spec() {
        let yaml = r#"
apiVersion: sourceplane.io/v1
kind: Intent
metadata: { name: x }
components:
  - name: a
    type: terraform.network
    inputs:
      path: terraform/a
"#;
        let doc = load_intent_str(yaml).expect("parses");
        assert_eq!(
            doc.components[0].spec.get("path").and_then(|v| v.as_str()),
            Some("terraform/a")
        );
    }

    #[test]
    fn legacy_single_provider_shorthand_is_registered() {
        let yaml = r#"
apiVersion: sourceplane.io/v1
kind: Repository
metadata: { name: x }
provider: terraform
components: []
"#;
        let doc = load_intent_str(yaml).expect("parses");
        let providers = doc.referenced_providers();
        assert!(providers.contains_key("terraform"));
    }
}
