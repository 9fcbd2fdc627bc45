//! CLI surface (spec §6): a `clap` derive parser covering `component`,
//! `lint`, `org`, `blueprint` and `execute`. `clap` structs live here;
//! validation/env-fallback builds a request record
//! ([`build_plan_request`]/[`build_execute_request`]) here too, but the
//! request types themselves (`PlanRequest`, `ExecuteRequest`) live with the
//! subsystem that consumes them.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;

use crate::error::{Result, ThinCiError};
use crate::planner::PlanRequest;

#[derive(Debug, Parser)]
#[command(
    name = "thin-ci",
    version,
    about = "Deterministic CI/CD planning engine.",
    long_about = "Turns intent documents plus a changed-file list into an ordered, cycle-free execution plan, and can run individual jobs from that plan locally."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect components declared across one or more intent documents.
    Component {
        #[command(subcommand)]
        command: ComponentCommand,
    },
    /// Validate intent documents, reporting every violation (not just the first).
    Lint(IntentArgs),
    /// Inspect repository-level metadata across intents.
    Org {
        #[command(subcommand)]
        command: OrgCommand,
    },
    /// Plan or apply a change set.
    Blueprint {
        #[command(subcommand)]
        command: BlueprintCommand,
    },
    /// Run a single job from a previously generated plan.
    Execute(ExecuteArgs),
}

#[derive(Debug, Subcommand)]
pub enum ComponentCommand {
    /// List every component across the loaded intents.
    List(IntentArgs),
    /// Print components grouped by provider with their relationships.
    Tree(IntentArgs),
    /// Dump one component's `spec` as pretty JSON.
    Describe(DescribeArgs),
}

#[derive(Debug, Subcommand)]
pub enum OrgCommand {
    /// Print repositories grouped by owner/domain.
    Tree(IntentArgs),
    /// Print a repository/component adjacency summary.
    Graph(IntentArgs),
}

#[derive(Debug, Subcommand)]
pub enum BlueprintCommand {
    /// Generate a plan and print/write it, without executing anything.
    Plan(PlanArgs),
    /// Generate a plan, confirm, then execute its jobs in order.
    Apply(PlanArgs),
}

#[derive(Debug, Args, Clone)]
pub struct IntentArgs {
    /// Path to an intent document. Repeat for multiple repositories.
    #[arg(long = "intent", required = true)]
    pub intent: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub struct DescribeArgs {
    #[command(flatten)]
    pub intents: IntentArgs,
    /// Component name to describe.
    #[arg(long)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PlanFormat {
    Json,
    Yaml,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub intents: IntentArgs,

    #[arg(long, default_value = "")]
    pub base_ref: String,
    #[arg(long, default_value = "HEAD")]
    pub head_ref: String,
    /// A changed file path, relative to the repository root. Repeatable.
    #[arg(long = "changed")]
    pub changed_files: Vec<String>,
    #[arg(long, default_value = ".")]
    pub repository_path: PathBuf,
    #[arg(long, env = "THINCI_TARGET", default_value = "github")]
    pub target: String,
    #[arg(long, default_value = "plan")]
    pub mode: String,
    /// Skip planning entirely (empty plan) when the change set is empty.
    #[arg(long, default_value_t = false)]
    pub changed_only: bool,
    #[arg(long, env = "THINCI_ENV", default_value = "")]
    pub environment: String,
    /// `<provider>.<key>=<value>`. Repeatable.
    #[arg(long = "provider-override")]
    pub provider_overrides: Vec<String>,
    /// Skip the confirmation prompt before `blueprint apply`.
    #[arg(long, default_value_t = false)]
    pub yes: bool,
    #[arg(long, value_enum, default_value = "json")]
    pub format: PlanFormat,
    /// Write the plan here instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct ExecuteArgs {
    /// Path to a previously generated plan document (JSON or YAML).
    #[arg(long)]
    pub plan: PathBuf,
    /// Job id to execute.
    #[arg(long)]
    pub job: String,
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

/// Parses `--provider-override provider.key=value` entries into the nested
/// mapping `generate_plan` expects.
pub fn parse_provider_overrides(raw: &[String]) -> Result<BTreeMap<String, BTreeMap<String, Value>>> {
    let mut overrides: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
    for entry in raw {
        let (selector, value) = entry.split_once('=').ok_or_else(|| {
            ThinCiError::Config(format!(
                "invalid --provider-override '{entry}' (expected <provider>.<key>=<value>)"
            ))
        })?;
        let (provider, key) = selector.split_once('.').ok_or_else(|| {
            ThinCiError::Config(format!(
                "invalid --provider-override '{entry}' (expected <provider>.<key>=<value>)"
            ))
        })?;
        overrides
            .entry(provider.to_string())
            .or_default()
            .insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(overrides)
}

/// Builds a [`PlanRequest`] from parsed CLI args, folding in env-var
/// fallbacks for anything the flags leave unset.
pub fn build_plan_request(args: &PlanArgs) -> Result<PlanRequest> {
    let provider_overrides = parse_provider_overrides(&args.provider_overrides)?;
    Ok(PlanRequest {
        base_ref: args.base_ref.clone(),
        head_ref: args.head_ref.clone(),
        changed_files: args.changed_files.clone(),
        repository_path: args.repository_path.clone(),
        intent_files: args.intents.intent.clone(),
        target: args.target.clone(),
        mode: args.mode.clone(),
        changed_only: args.changed_only,
        environment: args.environment.clone(),
        provider_overrides,
    })
}
