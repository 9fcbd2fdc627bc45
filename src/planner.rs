//! Planner: turns a [`PlanRequest`] plus loaded intents and a populated
//! registry into a fully ordered [`Plan`] (spec §4.5).
//!
//! Four stages, run in sequence: change detection (delegated to
//! [`crate::detector`]), action expansion, dependency-graph construction and
//! topological sort, and job emission. None of the stages retain state
//! across calls — `generate_plan` is pure given its inputs, modulo the
//! wall-clock timestamp stamped onto the output.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, info_span};

use crate::detector::detect_changes;
use crate::error::{Result, ThinCiError};
use crate::intent::RepositoryDoc;
use crate::plan::{Job, Plan, PlanMetadata};
use crate::provider::ProviderRegistry;
use crate::specvalue::{lookup_seq, relationship_target};

const RESERVED_JOB_KEYS: [&str; 5] = ["id", "component", "provider", "action", "dependsOn"];

/// Planner entry-point parameters (spec §6 "Planner entry point").
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub base_ref: String,
    pub head_ref: String,
    pub changed_files: Vec<String>,
    pub repository_path: PathBuf,
    pub intent_files: Vec<PathBuf>,
    pub target: String,
    pub mode: String,
    pub changed_only: bool,
    pub environment: String,
    /// Per-provider override maps (`providerOverrides[N.provider]` in the
    /// Stage 4 inputs merge).
    pub provider_overrides: BTreeMap<String, BTreeMap<String, Value>>,
}

/// One component's planning unit, built by Stage 2 and consumed by Stages 3-4.
#[derive(Debug, Clone)]
struct DependencyNode {
    component_name: String,
    provider: String,
    /// Actions in execution order for this component (already filtered to
    /// what the provider supports).
    actions: Vec<String>,
    /// Raw dependency component names, concatenated from intent-level
    /// relationships then `spec.relationships`, not deduplicated (spec
    /// §4.5.2).
    dependencies: Vec<String>,
}

/// Runs all four planner stages and returns a fully ordered [`Plan`].
pub fn generate_plan(
    request: &PlanRequest,
    intents: &[RepositoryDoc],
    registry: &ProviderRegistry,
) -> Result<Plan> {
    // Stage 1 — change detection.
    let detect_span = info_span!("thin_ci.plan.detect", target = %request.target, mode = %request.mode);
    let changes = {
        let _entered = detect_span.enter();
        let changes = detect_changes(&request.repository_path, intents, &request.changed_files);
        info!(changed_components = changes.len(), "change detection complete");
        changes
    };
    if request.changed_only && changes.is_empty() {
        debug!("no components affected and changed_only set; returning empty plan");
        return Ok(empty_plan(request, intents));
    }

    // Stage 2 — action expansion.
    let expand_span = info_span!("thin_ci.plan.expand");
    let _entered = expand_span.enter();
    let mut nodes = Vec::with_capacity(changes.len());
    for change in &changes {
        let provider = registry.get(&change.provider)?;

        let component = intents
            .iter()
            .find_map(|doc| doc.find_component(&change.component_name))
            .ok_or_else(|| ThinCiError::ComponentMissing(change.component_name.clone()))?;

        let candidate_actions: &[&str] = match request.mode.as_str() {
            "plan" => &["validate", "plan"],
            "apply" => &["validate", "plan", "apply"],
            "destroy" => &["destroy"],
            _ => &[],
        };
        let actions: Vec<String> = candidate_actions
            .iter()
            .filter(|name| provider.supports(name))
            .map(|name| name.to_string())
            .collect();

        let mut dependencies = Vec::new();
        for doc in intents {
            for relationship in &doc.relationships {
                if relationship.from == change.component_name
                    && matches!(relationship.relationship_type.as_str(), "depends_on" | "uses")
                {
                    dependencies.push(relationship.to.clone());
                }
            }
        }
        if let Some(entries) = lookup_seq(&component.spec, "relationships") {
            for entry in entries {
                if let Some(target) = relationship_target(entry) {
                    dependencies.push(target.to_string());
                }
            }
        }

        debug!(
            component = %change.component_name,
            provider = %change.provider,
            actions = ?actions,
            "expanded component into dependency node"
        );

        nodes.push(DependencyNode {
            component_name: change.component_name.clone(),
            provider: change.provider.clone(),
            actions,
            dependencies,
        });
    }
    drop(_entered);

    // Stage 3 — dependency graph + topological sort.
    let sort_span = info_span!("thin_ci.plan.sort", nodes = nodes.len());
    let order = {
        let _entered = sort_span.enter();
        let order = topological_order(&nodes)?;
        info!("topological sort complete");
        order
    };

    // Stage 4 — job emission.
    let emit_span = info_span!("thin_ci.plan.emit");
    let _entered = emit_span.enter();
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.component_name.as_str(), i))
        .collect();

    let mut jobs = Vec::new();
    for &node_idx in &order {
        let node = &nodes[node_idx];
        let provider = registry.get(&node.provider)?;
        let defaults = provider.defaults();

        for (i, action_name) in node.actions.iter().enumerate() {
            let action = provider
                .action(action_name)
                .expect("action name was filtered through provider.supports above");

            let id = format!("{}-{}", node.component_name, action_name);

            let depends_on = if i > 0 {
                vec![format!("{}-{}", node.component_name, node.actions[i - 1])]
            } else {
                node.dependencies
                    .iter()
                    .filter_map(|dep| {
                        let dep_node = &nodes[*index.get(dep.as_str())?];
                        let last = dep_node.actions.last()?;
                        Some(format!("{dep}-{last}"))
                    })
                    .collect()
            };

            let mut inputs = defaults.clone();
            inputs.insert("component".to_string(), Value::String(node.component_name.clone()));
            if !request.environment.is_empty() {
                inputs.insert("environment".to_string(), Value::String(request.environment.clone()));
            }
            if let Some(overrides) = request.provider_overrides.get(&node.provider) {
                for (key, value) in overrides {
                    inputs.insert(key.clone(), value.clone());
                }
            }
            for (key, value) in &action.inputs {
                inputs.entry(key.clone()).or_insert_with(|| value.clone());
            }

            let mut extra = serde_json::Map::new();
            for (key, value) in &action.job_template {
                if !RESERVED_JOB_KEYS.contains(&key.as_str()) {
                    extra.insert(key.clone(), value.clone());
                }
            }
            apply_platform_metadata(&mut extra, &request.target, &node.component_name, &node.provider, action_name);

            debug!(
                component = %node.component_name,
                provider = %node.provider,
                action = %action_name,
                depends_on = ?depends_on,
                "emitted job"
            );

            jobs.push(Job {
                id,
                component: node.component_name.clone(),
                provider: node.provider.clone(),
                action: action_name.clone(),
                depends_on,
                inputs,
                pre_steps: action.pre_steps.clone(),
                post_steps: action.post_steps.clone(),
                commands: action.commands.clone(),
                extra,
            });
        }
    }

    info!(jobs = jobs.len(), "plan generation complete");

    Ok(Plan {
        target: request.target.clone(),
        mode: request.mode.clone(),
        metadata: plan_metadata(request, intents),
        jobs,
    })
}

/// Kahn's-algorithm topological sort over [`DependencyNode`]s, represented
/// arena-style (flat `Vec` + `usize` adjacency, no heap graph). Ties are
/// broken by Stage-2 emission order (a `VecDeque` seeded by a linear scan),
/// not hash-map iteration order, so repeated runs on identical input produce
/// an identical ordering — see `DESIGN.md`.
fn topological_order(nodes: &[DependencyNode]) -> Result<Vec<usize>> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.component_name.as_str(), i))
        .collect();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut indegree: Vec<usize> = vec![0; nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for dep in &node.dependencies {
            if let Some(&j) = index.get(dep.as_str()) {
                adjacency[j].push(i);
                indegree[i] += 1;
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &j in &adjacency[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.push_back(j);
            }
        }
    }

    if order.len() != nodes.len() {
        let remaining = (0..nodes.len())
            .filter(|i| !order.contains(i))
            .map(|i| nodes[i].component_name.clone())
            .collect();
        return Err(ThinCiError::DependencyCycle { remaining });
    }

    Ok(order)
}

/// Computes and nests deterministic CI-platform hints under a `metadata`
/// key, merging with whatever the provider's `jobTemplate` already put
/// there — planner-set keys win on conflict (spec §4.5.4 bullet 5).
fn apply_platform_metadata(
    extra: &mut serde_json::Map<String, Value>,
    target: &str,
    component: &str,
    provider: &str,
    action: &str,
) {
    let env = serde_json::json!({
        "SP_COMPONENT": component,
        "SP_PROVIDER": provider,
        "SP_ACTION": action,
    });

    let mut planner_metadata = serde_json::Map::new();
    match target {
        "github" => {
            planner_metadata.insert("runsOn".to_string(), Value::String("ubuntu-latest".to_string()));
            planner_metadata.insert("permissions".to_string(), serde_json::json!(["id-token", "contents"]));
            planner_metadata.insert("timeout".to_string(), Value::from(30));
            planner_metadata.insert("env".to_string(), env);
        }
        "gitlab" => {
            planner_metadata.insert("runsOn".to_string(), Value::String("docker".to_string()));
            planner_metadata.insert("timeout".to_string(), Value::from(30));
            planner_metadata.insert("env".to_string(), env);
        }
        _ => {
            planner_metadata.insert("env".to_string(), env);
        }
    }

    let merged = match extra.get("metadata").and_then(|v| v.as_object()) {
        Some(existing) => {
            let mut merged = existing.clone();
            for (key, value) in planner_metadata {
                merged.insert(key, value);
            }
            merged
        }
        None => planner_metadata,
    };
    extra.insert("metadata".to_string(), Value::Object(merged));
}

fn plan_metadata(request: &PlanRequest, intents: &[RepositoryDoc]) -> PlanMetadata {
    let repository = intents
        .first()
        .map(|doc| doc.metadata.name.clone())
        .unwrap_or_else(|| request.repository_path.display().to_string());

    PlanMetadata {
        repository,
        base_ref: request.base_ref.clone(),
        head_ref: request.head_ref.clone(),
        changed_files: request.changed_files.clone(),
        timestamp: Utc::now().to_rfc3339(),
        environment: if request.environment.is_empty() {
            None
        } else {
            Some(request.environment.clone())
        },
    }
}

fn empty_plan(request: &PlanRequest, intents: &[RepositoryDoc]) -> Plan {
    Plan {
        target: request.target.clone(),
        mode: request.mode.clone(),
        metadata: plan_metadata(request, intents),
        jobs: Vec::new(),
    }
}
