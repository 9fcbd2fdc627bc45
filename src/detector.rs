//! Change detector: maps a list of changed file paths onto a set of
//! affected components with reasons (spec §4.4).

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, info_span};

use crate::intent::RepositoryDoc;
use crate::specvalue::lookup_str;

pub const REASON_INTENT_CHANGED: &str = "Intent definition changed";
pub const REASON_COMPONENT_FILES_CHANGED: &str = "Component files changed";
pub const REASON_PROVIDER_CONFIG_CHANGED: &str = "Provider configuration changed";
pub const REASON_SHARED_MODULE_CHANGED: &str = "Shared module changed";

/// One component affected by the current change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentChange {
    pub component_name: String,
    pub provider: String,
    pub component_type: String,
    pub reason: String,
    pub affected_paths: Vec<String>,
}

/// Detects every component affected by `changed_files` across all loaded
/// `intents`. `repo_root` is accepted per the spec §4.4 contract but this
/// implementation's rules operate on the changed-path strings directly, not
/// by touching the filesystem under `repo_root`.
pub fn detect_changes(
    _repo_root: &Path,
    intents: &[RepositoryDoc],
    changed_files: &[String],
) -> Vec<ComponentChange> {
    let span = info_span!("thin_ci.detect", changed_files = changed_files.len());
    let _entered = span.enter();

    let mut changes: Vec<ComponentChange> = Vec::new();
    let mut index_by_name: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for intent in intents {
        for component in &intent.components {
            let Some(provider) = component.provider_name() else {
                continue;
            };
            let provider = provider.to_string();

            let mut affected = Vec::new();
            let mut reason: Option<&'static str> = None;

            let mut record = |hits: Vec<&String>, this_reason: &'static str, affected: &mut Vec<String>, reason: &mut Option<&'static str>| {
                if hits.is_empty() {
                    return;
                }
                for hit in hits {
                    push_unique(affected, hit);
                }
                if reason.is_none() {
                    *reason = Some(this_reason);
                }
            };

            // Rule 1: intent changed.
            let intent_hits: Vec<&String> = changed_files
                .iter()
                .filter(|f| is_intent_file(f))
                .collect();
            record(intent_hits, REASON_INTENT_CHANGED, &mut affected, &mut reason);

            // Rule 2: component-local paths.
            let local_patterns = component_local_patterns(&provider, &component.spec, &component.name);
            let local_hits: Vec<&String> = changed_files
                .iter()
                .filter(|f| local_patterns.iter().any(|pat| path_matches(f, pat)))
                .collect();
            record(local_hits, REASON_COMPONENT_FILES_CHANGED, &mut affected, &mut reason);

            // Rule 3: provider-level paths.
            let provider_patterns = provider_level_patterns(&provider);
            let provider_hits: Vec<&String> = changed_files
                .iter()
                .filter(|f| provider_patterns.iter().any(|pat| path_matches(f, pat)))
                .collect();
            record(provider_hits, REASON_PROVIDER_CONFIG_CHANGED, &mut affected, &mut reason);

            // Rule 4: shared module paths.
            let shared_patterns = shared_module_patterns(&provider, &component.spec);
            let shared_hits: Vec<&String> = changed_files
                .iter()
                .filter(|f| shared_patterns.iter().any(|pat| path_matches(f, pat)))
                .collect();
            record(shared_hits, REASON_SHARED_MODULE_CHANGED, &mut affected, &mut reason);

            let Some(reason) = reason else {
                continue;
            };

            debug!(
                component = %component.name,
                provider = %provider,
                reason = %reason,
                affected_paths = ?affected,
                "component affected by change set"
            );

            if let Some(&idx) = index_by_name.get(&component.name) {
                for path in affected {
                    push_unique(&mut changes[idx].affected_paths, &path);
                }
            } else {
                index_by_name.insert(component.name.clone(), changes.len());
                changes.push(ComponentChange {
                    component_name: component.name.clone(),
                    provider,
                    component_type: component.component_type.clone(),
                    reason: reason.to_string(),
                    affected_paths: affected,
                });
            }
        }
    }

    info!(affected_components = changes.len(), "change detection complete");
    changes
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

fn is_intent_file(path: &str) -> bool {
    matches!(
        Path::new(path).file_name().and_then(|n| n.to_str()),
        Some("intent.yaml") | Some("sourceplane.yaml")
    )
}

/// `F` matches pattern `P` iff `F == P`, `F` begins with `P + "/"`, or `F`
/// matches `P` as a filesystem glob (a pattern that fails to compile is
/// treated as no match, not a fatal error — spec §4.4, §7 Warnings).
fn path_matches(changed: &str, pattern: &str) -> bool {
    if changed == pattern {
        return true;
    }
    if changed.starts_with(&format!("{pattern}/")) {
        return true;
    }
    glob::Pattern::new(pattern)
        .map(|compiled| compiled.matches(changed))
        .unwrap_or(false)
}

fn component_local_patterns(provider: &str, spec: &Value, component_name: &str) -> Vec<String> {
    let mut patterns = Vec::new();
    match provider {
        "terraform" => {
            if let Some(source) = lookup_str(spec, "module.source") {
                if !source.starts_with("terraform-") {
                    patterns.push(source.to_string());
                }
            }
            if let Some(path) = lookup_str(spec, "path") {
                patterns.push(path.to_string());
            }
        }
        "helm" => {
            if let Some(path) = lookup_str(spec, "chart.path") {
                patterns.push(path.to_string());
            }
            if let Some(path) = lookup_str(spec, "chartPath") {
                patterns.push(path.to_string());
            }
            if let Some(path) = lookup_str(spec, "valuesPath") {
                patterns.push(path.to_string());
            }
        }
        _ => {}
    }
    if patterns.is_empty() {
        patterns.push(format!("{provider}/{component_name}"));
    }
    patterns
}

fn provider_level_patterns(provider: &str) -> Vec<String> {
    vec![
        format!("providers/{provider}/provider.yaml"),
        format!("providers/{provider}/schema.yaml"),
        format!(".sourceplane/providers/{provider}"),
    ]
}

fn shared_module_patterns(provider: &str, spec: &Value) -> Vec<String> {
    let mut patterns = Vec::new();
    match provider {
        "terraform" => {
            if let Some(source) = lookup_str(spec, "module.source") {
                if source.starts_with("./") || source.starts_with("../") {
                    patterns.push(source.to_string());
                }
            }
            patterns.push("terraform/modules".to_string());
        }
        "helm" => {
            patterns.push("helm/charts".to_string());
        }
        _ => {}
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::load_intent_str;

    fn scenario_intents() -> Vec<RepositoryDoc> {
        let yaml = r#"
apiVersion: sourceplane.io/v1
kind: Intent
metadata: { name: acme }
providers:
  terraform: { source: "", version: "1.0.0" }
components:
  - name: vpc
    type: terraform.network
  - name: eks
    type: terraform.cluster
relationships:
  - from: eks
    to: vpc
    type: depends_on
"#;
        vec![load_intent_str(yaml).unwrap()]
    }

    #[test]
    fn fallback_convention_matches_provider_slash_component_name() {
        let intents = scenario_intents();
        let changed = vec!["terraform/vpc/main.tf".to_string(), "terraform/eks/main.tf".to_string()];
        let changes = detect_changes(Path::new("."), &intents, &changed);
        assert_eq!(changes.len(), 2);
        let vpc = changes.iter().find(|c| c.component_name == "vpc").unwrap();
        assert_eq!(vpc.reason, REASON_COMPONENT_FILES_CHANGED);
        assert_eq!(vpc.affected_paths, vec!["terraform/vpc/main.tf".to_string()]);
    }

    #[test]
    fn only_changed_component_is_detected() {
        let intents = scenario_intents();
        let changed = vec!["terraform/eks/main.tf".to_string()];
        let changes = detect_changes(Path::new("."), &intents, &changed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].component_name, "eks");
    }

    #[test]
    fn intent_file_change_affects_every_component() {
        let intents = scenario_intents();
        let changed = vec!["intent.yaml".to_string()];
        let changes = detect_changes(Path::new("."), &intents, &changed);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.reason == REASON_INTENT_CHANGED));
    }

    #[test]
    fn provider_config_change_is_detected() {
        let intents = scenario_intents();
        let changed = vec!["providers/terraform/provider.yaml".to_string()];
        let changes = detect_changes(Path::new("."), &intents, &changed);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.reason == REASON_PROVIDER_CONFIG_CHANGED));
    }

    #[test]
    fn shared_module_change_is_detected() {
        let intents = scenario_intents();
        let changed = vec!["terraform/modules/networking/main.tf".to_string()];
        let changes = detect_changes(Path::new("."), &intents, &changed);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.reason == REASON_SHARED_MODULE_CHANGED));
    }

    #[test]
    fn explicit_module_source_path_is_matched_over_fallback() {
        let yaml = r#"
apiVersion: sourceplane.io/v1
kind: Intent
metadata: { name: acme }
components:
  - name: vpc
    type: terraform.network
    spec:
      module:
        source: "./modules/vpc-network"
"#;
        let intents = vec![load_intent_str(yaml).unwrap()];
        let changed = vec!["modules/vpc-network/main.tf".to_string()];
        let changes = detect_changes(Path::new("."), &intents, &changed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].reason, REASON_COMPONENT_FILES_CHANGED);
    }

    #[test]
    fn registry_module_source_is_excluded_from_component_local_patterns() {
        let yaml = r#"
apiVersion: sourceplane.io/v1
kind: Intent
metadata: { name: acme }
components:
  - name: vpc
    type: terraform.network
    spec:
      module:
        source: "terraform-aws-modules/vpc/aws"
"#;
        let intents = vec![load_intent_str(yaml).unwrap()];
        // Falls back to convention since the registry ref is excluded.
        let changed = vec!["terraform/vpc/main.tf".to_string()];
        let changes = detect_changes(Path::new("."), &intents, &changed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].reason, REASON_COMPONENT_FILES_CHANGED);
    }

    #[test]
    fn unrelated_path_is_not_detected() {
        let intents = scenario_intents();
        let changed = vec!["README.md".to_string()];
        let changes = detect_changes(Path::new("."), &intents, &changed);
        assert!(changes.is_empty());
    }

    #[test]
    fn invalid_glob_pattern_is_non_fatal_no_match() {
        let yaml = r#"
apiVersion: sourceplane.io/v1
kind: Intent
metadata: { name: acme }
components:
  - name: weird
    type: terraform.network
    spec:
      path: "terraform/[unterminated"
"#;
        let intents = vec![load_intent_str(yaml).unwrap()];
        let changed = vec!["terraform/anything".to_string()];
        // Must not panic, and must not match since the bracket pattern never compiles.
        let changes = detect_changes(Path::new("."), &intents, &changed);
        assert!(changes.is_empty());
    }

    #[test]
    fn first_matching_reason_wins_but_paths_merge() {
        let yaml = r#"
apiVersion: sourceplane.io/v1
kind: Intent
metadata: { name: acme }
components:
  - name: vpc
    type: terraform.network
"#;
        let intents = vec![load_intent_str(yaml).unwrap()];
        let changed = vec![
            "intent.yaml".to_string(),
            "terraform/vpc/main.tf".to_string(),
        ];
        let changes = detect_changes(Path::new("."), &intents, &changed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].reason, REASON_INTENT_CHANGED);
        assert_eq!(
            changes[0].affected_paths,
            vec!["intent.yaml".to_string(), "terraform/vpc/main.tf".to_string()]
        );
    }
}
