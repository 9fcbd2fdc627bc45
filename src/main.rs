use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use clap::Parser;

use thin_ci::config::{
    BlueprintCommand, Cli, Command, ComponentCommand, DescribeArgs, ExecuteArgs, IntentArgs,
    OrgCommand, PlanArgs, PlanFormat, build_plan_request,
};
use thin_ci::error::{Result, ThinCiError};
use thin_ci::exec::Executor;
use thin_ci::fetch::{GitFetcher, fetch_provider_dir};
use thin_ci::intent::{RepositoryDoc, load_intent_documents, parse_intent_str};
use thin_ci::plan::Plan;
use thin_ci::planner::generate_plan;
use thin_ci::provider::{ProviderRegistry, load_provider_document};
use thin_ci::telemetry;

fn main() {
    telemetry::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Component { command } => match command {
            ComponentCommand::List(args) => cmd_component_list(&args),
            ComponentCommand::Tree(args) => cmd_component_tree(&args),
            ComponentCommand::Describe(args) => cmd_component_describe(&args),
        },
        Command::Lint(args) => cmd_lint(&args),
        Command::Org { command } => match command {
            OrgCommand::Tree(args) => cmd_org_tree(&args),
            OrgCommand::Graph(args) => cmd_org_graph(&args),
        },
        Command::Blueprint { command } => match command {
            BlueprintCommand::Plan(args) => cmd_blueprint_plan(&args),
            BlueprintCommand::Apply(args) => cmd_blueprint_apply(&args),
        },
        Command::Execute(args) => cmd_execute(&args),
    }
}

fn cmd_component_list(args: &IntentArgs) -> Result<()> {
    let intents = load_intent_documents(&args.intent)?;
    for doc in &intents {
        for component in &doc.components {
            println!("{}\t{}\t{}", component.name, component.component_type, doc.metadata.name);
        }
    }
    Ok(())
}

fn cmd_component_tree(args: &IntentArgs) -> Result<()> {
    let intents = load_intent_documents(&args.intent)?;
    let mut by_provider: std::collections::BTreeMap<&str, Vec<&thin_ci::intent::Component>> =
        std::collections::BTreeMap::new();
    for doc in &intents {
        for component in &doc.components {
            let provider = component.provider_name().unwrap_or("unknown");
            by_provider.entry(provider).or_default().push(component);
        }
    }
    for (provider, components) in by_provider {
        println!("{provider}");
        for component in components {
            println!("  {}", component.name);
            for doc in &intents {
                for relationship in &doc.relationships {
                    if relationship.from == component.name {
                        println!(
                            "    {} -> {} ({})",
                            relationship.relationship_type, relationship.to, doc.metadata.name
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn cmd_component_describe(args: &DescribeArgs) -> Result<()> {
    let intents = load_intent_documents(&args.intents.intent)?;
    let component = intents
        .iter()
        .find_map(|doc| doc.find_component(&args.name))
        .ok_or_else(|| ThinCiError::ComponentMissing(args.name.clone()))?;
    println!("{}", serde_json::to_string_pretty(&component.spec)?);
    Ok(())
}

fn cmd_lint(args: &IntentArgs) -> Result<()> {
    let mut total_violations = 0usize;
    for path in &args.intent {
        let contents = std::fs::read_to_string(path)?;
        let doc = parse_intent_str(&contents)?;
        let violations = doc.violations();
        if violations.is_empty() {
            println!("{}: ok", path.display());
        } else {
            for violation in &violations {
                println!("{}: {violation}", path.display());
            }
            total_violations += violations.len();
        }
    }
    if total_violations > 0 {
        return Err(ThinCiError::MalformedIntent(format!(
            "{total_violations} violation(s) found"
        )));
    }
    Ok(())
}

fn cmd_org_tree(args: &IntentArgs) -> Result<()> {
    let intents = load_intent_documents(&args.intent)?;
    let mut by_owner: std::collections::BTreeMap<String, Vec<&RepositoryDoc>> =
        std::collections::BTreeMap::new();
    for doc in &intents {
        let owner = doc.metadata.owner.clone().unwrap_or_else(|| "(no owner)".to_string());
        by_owner.entry(owner).or_default().push(doc);
    }
    for (owner, docs) in by_owner {
        println!("{owner}");
        for doc in docs {
            let domain = doc.metadata.domain.as_deref().unwrap_or("(no domain)");
            println!("  {} [{}] - {} component(s)", doc.metadata.name, domain, doc.components.len());
        }
    }
    Ok(())
}

fn cmd_org_graph(args: &IntentArgs) -> Result<()> {
    let intents = load_intent_documents(&args.intent)?;
    for doc in &intents {
        println!("{}", doc.metadata.name);
        for component in &doc.components {
            println!("  {}", component.name);
        }
        for relationship in &doc.relationships {
            println!("  {} --{}--> {}", relationship.from, relationship.relationship_type, relationship.to);
        }
    }
    Ok(())
}

fn cmd_blueprint_plan(args: &PlanArgs) -> Result<()> {
    let plan = build_plan(args)?;
    emit_plan(&plan, args)
}

fn cmd_blueprint_apply(args: &PlanArgs) -> Result<()> {
    let plan = build_plan(args)?;
    emit_plan(&plan, args)?;

    if !args.yes {
        print!("Apply {} job(s) to target '{}'? [y/N] ", plan.jobs.len(), plan.target);
        use std::io::Write;
        std::io::stdout().flush().ok();
        let mut response = String::new();
        std::io::stdin().read_line(&mut response).ok();
        if !response.trim().eq_ignore_ascii_case("y") {
            println!("aborted");
            return Ok(());
        }
    }

    let executor = Executor::new();
    for job in &plan.jobs {
        println!("==> {}", job.id);
        let duration = executor.execute_job(job, args.verbose, args.dry_run)?;
        println!("    done in {:.2}s", duration.as_secs_f64());
    }
    Ok(())
}

fn cmd_execute(args: &ExecuteArgs) -> Result<()> {
    let contents = std::fs::read_to_string(&args.plan)?;
    let plan = if args
        .plan
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    {
        Plan::from_json(&contents)?
    } else {
        Plan::from_yaml(&contents)?
    };

    let job = plan
        .find_job(&args.job)
        .ok_or_else(|| ThinCiError::ComponentMissing(args.job.clone()))?;

    let executor = Executor::new();
    let duration = executor.execute_job(job, args.verbose, args.dry_run)?;
    println!("{} completed in {:.2}s", job.id, duration.as_secs_f64());
    Ok(())
}

fn build_plan(args: &PlanArgs) -> Result<Plan> {
    let intents = load_intent_documents(&args.intents.intent)?;
    let registry = build_registry(&intents, &args.repository_path)?;
    let request = build_plan_request(args)?;
    generate_plan(&request, &intents, &registry)
}

fn emit_plan(plan: &Plan, args: &PlanArgs) -> Result<()> {
    let rendered = match args.format {
        PlanFormat::Json => plan.to_json_pretty()?,
        PlanFormat::Yaml => plan.to_yaml()?,
    };
    match &args.out {
        Some(path) => std::fs::write(path, rendered)?,
        None => println!("{rendered}"),
    }
    Ok(())
}

/// Loads every provider referenced across `intents`, deduplicated by name,
/// resolving each through the local/git fetcher pair (spec §4.3).
fn build_registry(intents: &[RepositoryDoc], repository_path: &Path) -> Result<ProviderRegistry> {
    let git = GitFetcher::new(GitFetcher::default_cache_root());
    let mut registry = ProviderRegistry::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut names: BTreeSet<String> = BTreeSet::new();

    for doc in intents {
        for name in doc.referenced_providers().keys() {
            names.insert(name.clone());
        }
    }

    for name in names {
        if !seen.insert(name.clone()) {
            continue;
        }
        let reference = intents
            .iter()
            .find_map(|doc| doc.referenced_providers().get(&name).cloned())
            .expect("name was collected from referenced_providers() above");
        let dir = fetch_provider_dir(&name, &reference, repository_path, &git)?;
        let metadata = load_provider_document(&name, &dir)?;
        registry.register(metadata);
    }

    Ok(registry)
}
