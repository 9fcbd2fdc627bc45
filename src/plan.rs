//! Plan and Job data types with JSON/YAML codecs (spec §3 "Plan", §4.7).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ThinCiError};
use crate::provider::ActionStep;

/// A concrete `(component, action)` pair emitted in a plan.
///
/// Reserved fields are statically typed; everything a provider's
/// `jobTemplate` contributes lives in `extra`, flattened back out on
/// serialization so canonical JSON interleaves both: planner-controlled
/// fields first, then `jobTemplate` extras in their insertion order (spec
/// §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub component: String,
    pub provider: String,
    pub action: String,
    #[serde(rename = "dependsOn")]
    pub depends_on: Vec<String>,
    pub inputs: BTreeMap<String, Value>,
    #[serde(rename = "preSteps", default)]
    pub pre_steps: Vec<ActionStep>,
    #[serde(rename = "postSteps", default)]
    pub post_steps: Vec<ActionStep>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Plan-level metadata (spec §3 "Plan").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub repository: String,
    #[serde(rename = "baseRef")]
    pub base_ref: String,
    #[serde(rename = "headRef")]
    pub head_ref: String,
    #[serde(rename = "changedFiles")]
    pub changed_files: Vec<String>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub environment: Option<String>,
}

/// The full emitted execution graph for one planning invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub target: String,
    pub mode: String,
    pub metadata: PlanMetadata,
    pub jobs: Vec<Job>,
}

impl Plan {
    pub fn find_job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| ThinCiError::SerializationFailure(err.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|err| ThinCiError::SerializationFailure(err.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| ThinCiError::SerializationFailure(err.to_string()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|err| ThinCiError::SerializationFailure(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> Plan {
        Plan {
            target: "github".to_string(),
            mode: "plan".to_string(),
            metadata: PlanMetadata {
                repository: "acme".to_string(),
                base_ref: "main".to_string(),
                head_ref: "feature".to_string(),
                changed_files: vec!["terraform/vpc/main.tf".to_string()],
                timestamp: "2026-07-29T00:00:00Z".to_string(),
                environment: None,
            },
            jobs: vec![Job {
                id: "vpc-validate".to_string(),
                component: "vpc".to_string(),
                provider: "terraform".to_string(),
                action: "validate".to_string(),
                depends_on: Vec::new(),
                inputs: BTreeMap::new(),
                pre_steps: Vec::new(),
                post_steps: Vec::new(),
                commands: vec!["terraform validate".to_string()],
                extra: serde_json::Map::new(),
            }],
        }
    }

    #[test]
    fn json_round_trips() {
        let plan = sample_plan();
        let json = plan.to_json_pretty().unwrap();
        let decoded = Plan::from_json(&json).unwrap();
        assert_eq!(decoded.jobs.len(), plan.jobs.len());
        assert_eq!(decoded.jobs[0].id, "vpc-validate");
    }

    #[test]
    fn yaml_round_trips() {
        let plan = sample_plan();
        let yaml = plan.to_yaml().unwrap();
        let decoded = Plan::from_yaml(&yaml).unwrap();
        assert_eq!(decoded.target, plan.target);
        assert_eq!(decoded.jobs[0].commands, plan.jobs[0].commands);
    }

    #[test]
    fn environment_omitted_when_absent() {
        let plan = sample_plan();
        let json = plan.to_json_pretty().unwrap();
        assert!(!json.contains("\"environment\""));
    }

    #[test]
    fn changed_files_always_present_even_when_empty() {
        let mut plan = sample_plan();
        plan.metadata.changed_files = Vec::new();
        let json = plan.to_json_pretty().unwrap();
        assert!(json.contains("\"changedFiles\": []"));
    }

    #[test]
    fn extra_fields_are_flattened_alongside_reserved_ones() {
        let mut plan = sample_plan();
        plan.jobs[0]
            .extra
            .insert("runsOn".to_string(), Value::String("ubuntu-latest".to_string()));
        let json = plan.to_json_pretty().unwrap();
        let decoded = Plan::from_json(&json).unwrap();
        assert_eq!(
            decoded.jobs[0].extra.get("runsOn").and_then(|v| v.as_str()),
            Some("ubuntu-latest")
        );
    }
}
