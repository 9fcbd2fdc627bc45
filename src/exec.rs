//! Local job executor (spec §4.6). Looks a job up in a deserialised
//! [`crate::plan::Plan`], resolves its `{{.field}}` templates, and runs its
//! pre/main/post steps as shell subprocesses.
//!
//! [`JobCommandRunner`] is the process-invocation seam: the default
//! implementation shells out via `sh -c`, and tests inject a double instead.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::info;

use crate::error::{Result, ThinCiError};
use crate::plan::Job;
use crate::provider::ActionStep;

pub mod template {
    //! A minimal Go-style `{{.field}}` substituter. Intentionally does not
    //! support `{{range}}`/`{{if}}` or anything beyond a flat identifier
    //! lookup — spec §9 explicitly steers away from a full template-engine
    //! dependency for this.

    use std::collections::BTreeMap;

    use crate::error::{Result, ThinCiError};

    /// Replaces every `{{.ident}}` occurrence in `text` with its value from
    /// `context`. An unterminated `{{` or a reference to a key absent from
    /// `context` is a [`ThinCiError::TemplateFailure`].
    pub fn render(text: &str, context: &BTreeMap<String, String>) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("{{.") {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + 3..];
            let Some(end) = after_open.find("}}") else {
                return Err(ThinCiError::TemplateFailure(format!(
                    "unterminated template expression in '{text}'"
                )));
            };
            let ident = after_open[..end].trim();
            let value = context.get(ident).ok_or_else(|| {
                ThinCiError::TemplateFailure(format!("unknown template field '{ident}'"))
            })?;
            out.push_str(value);
            rest = &after_open[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn substitutes_known_fields() {
            let mut ctx = BTreeMap::new();
            ctx.insert("releaseName".to_string(), "my-app".to_string());
            ctx.insert("chartPath".to_string(), "./c".to_string());
            let rendered = render("helm template {{.releaseName}} {{.chartPath}}", &ctx).unwrap();
            assert_eq!(rendered, "helm template my-app ./c");
        }

        #[test]
        fn unknown_field_is_template_failure() {
            let ctx = BTreeMap::new();
            let err = render("{{.missing}}", &ctx).unwrap_err();
            assert!(matches!(err, ThinCiError::TemplateFailure(_)));
        }

        #[test]
        fn unterminated_expression_is_template_failure() {
            let ctx = BTreeMap::new();
            let err = render("echo {{.broken", &ctx).unwrap_err();
            assert!(matches!(err, ThinCiError::TemplateFailure(_)));
        }

        #[test]
        fn text_without_templates_passes_through() {
            let ctx = BTreeMap::new();
            assert_eq!(render("terraform validate", &ctx).unwrap(), "terraform validate");
        }
    }
}

/// Outcome of one rendered command invocation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub status: Option<i32>,
    /// Combined stdout+stderr, populated only in non-verbose mode (verbose
    /// mode streams directly and leaves this empty).
    pub captured: String,
}

/// Runs one resolved shell command. A trait so tests can inject a double
/// without touching a real shell.
pub trait JobCommandRunner: Send + Sync {
    fn run(&self, command: &str, verbose: bool) -> Result<RunOutcome>;
}

/// Invokes `sh -c "<command>"`, inheriting the caller's environment.
pub struct ShellCommandRunner;

impl JobCommandRunner for ShellCommandRunner {
    fn run(&self, command: &str, verbose: bool) -> Result<RunOutcome> {
        if !verbose {
            let output = Command::new("sh").arg("-c").arg(command).output()?;
            let mut captured = String::new();
            captured.push_str(&String::from_utf8_lossy(&output.stdout));
            captured.push_str(&String::from_utf8_lossy(&output.stderr));
            return Ok(RunOutcome {
                success: output.status.success(),
                status: output.status.code(),
                captured,
            });
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let stdout_thread = std::thread::spawn(move || stream_prefixed(stdout));
        let stderr_thread = std::thread::spawn(move || stream_prefixed(stderr));
        let _ = stdout_thread.join();
        let _ = stderr_thread.join();

        let status = child.wait()?;
        Ok(RunOutcome {
            success: status.success(),
            status: status.code(),
            captured: String::new(),
        })
    }
}

fn stream_prefixed(pipe: impl std::io::Read) {
    let reader = BufReader::new(pipe);
    for line in reader.lines().map_while(|l| l.ok()) {
        println!("  │ {line}");
    }
}

/// Runs a job's pre/main/post steps in order, aborting on the first
/// non-zero exit or template failure (spec §4.6 "Execution phases").
pub struct Executor {
    runner: Box<dyn JobCommandRunner>,
}

impl Default for Executor {
    fn default() -> Self {
        Self { runner: Box::new(ShellCommandRunner) }
    }
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runner(runner: Box<dyn JobCommandRunner>) -> Self {
        Self { runner }
    }

    pub fn execute_job(&self, job: &Job, verbose: bool, dry_run: bool) -> Result<Duration> {
        let context = build_template_context(job);
        let start = Instant::now();

        for step in &job.pre_steps {
            self.run_step(job, "pre", step, &context, verbose, dry_run)?;
        }
        for (i, command) in job.commands.iter().enumerate() {
            let rendered = template::render(command, &context)?;
            self.run_command(job, "main", &format!("command[{i}]"), &rendered, verbose, dry_run)?;
        }
        for step in &job.post_steps {
            self.run_step(job, "post", step, &context, verbose, dry_run)?;
        }

        Ok(start.elapsed())
    }

    fn run_step(
        &self,
        job: &Job,
        phase: &str,
        step: &ActionStep,
        context: &BTreeMap<String, String>,
        verbose: bool,
        dry_run: bool,
    ) -> Result<()> {
        let mut step_context = context.clone();
        for (key, value) in &step.inputs {
            step_context.insert(key.clone(), stringify(value));
        }
        let rendered = template::render(&step.command, &step_context)?;
        self.run_command(job, phase, &step.name, &rendered, verbose, dry_run)
    }

    fn run_command(
        &self,
        job: &Job,
        phase: &str,
        step: &str,
        rendered: &str,
        verbose: bool,
        dry_run: bool,
    ) -> Result<()> {
        let component = job.component.as_str();
        let provider = job.provider.as_str();
        let action = job.action.as_str();

        if dry_run {
            info!(component, provider, action, phase, step, command = %rendered, "dry run: command not executed");
            return Ok(());
        }

        info!(component, provider, action, phase, step, command = %rendered, "running step");
        let outcome = self.runner.run(rendered, verbose)?;
        if outcome.success {
            Ok(())
        } else {
            Err(ThinCiError::ExecutionFailure {
                phase: phase.to_string(),
                step: step.to_string(),
                status: outcome.status,
                stderr: outcome.captured,
            })
        }
    }
}

/// Builds the template context per spec §4.6 "Template context": core
/// fields, then `inputs` stringified, then fallback defaults for anything
/// still missing.
fn build_template_context(job: &Job) -> BTreeMap<String, String> {
    let mut context = BTreeMap::new();
    context.insert("id".to_string(), job.id.clone());
    context.insert("component".to_string(), job.component.clone());
    context.insert("provider".to_string(), job.provider.clone());
    context.insert("action".to_string(), job.action.clone());

    for (key, value) in &job.inputs {
        context.insert(key.clone(), stringify(value));
    }

    let defaults: [(&str, &str); 5] = [
        ("releaseName", job.component.as_str()),
        ("namespace", "default"),
        ("chartPath", "."),
        ("valuesPath", "values.yaml"),
        ("timeout", "10m"),
    ];
    for (key, value) in defaults {
        context.entry(key.to_string()).or_insert_with(|| value.to_string());
    }

    context
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct FakeRunner {
        calls: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
    }

    impl JobCommandRunner for FakeRunner {
        fn run(&self, command: &str, _verbose: bool) -> Result<RunOutcome> {
            self.calls.lock().unwrap().push(command.to_string());
            if self.fail_on.as_deref() == Some(command) {
                Ok(RunOutcome { success: false, status: Some(1), captured: "boom".to_string() })
            } else {
                Ok(RunOutcome { success: true, status: Some(0), captured: String::new() })
            }
        }
    }

    fn sample_job() -> Job {
        let mut inputs = BTreeMap::new();
        inputs.insert("releaseName".to_string(), serde_json::Value::String("my-app".to_string()));
        inputs.insert("chartPath".to_string(), serde_json::Value::String("./c".to_string()));
        Job {
            id: "svc-plan".to_string(),
            component: "svc".to_string(),
            provider: "helm".to_string(),
            action: "plan".to_string(),
            depends_on: Vec::new(),
            inputs,
            pre_steps: Vec::new(),
            post_steps: Vec::new(),
            commands: vec!["helm template {{.releaseName}} {{.chartPath}}".to_string()],
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn scenario_5_template_resolution_at_execute_time() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = Executor::with_runner(Box::new(FakeRunner { calls: calls.clone(), fail_on: None }));
        executor.execute_job(&sample_job(), false, false).unwrap();
        assert_eq!(calls.lock().unwrap()[0], "helm template my-app ./c");
    }

    #[test]
    fn missing_release_name_falls_back_to_component() {
        let mut job = sample_job();
        job.inputs.remove("releaseName");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = Executor::with_runner(Box::new(FakeRunner { calls: calls.clone(), fail_on: None }));
        executor.execute_job(&job, false, false).unwrap();
        assert_eq!(calls.lock().unwrap()[0], "helm template svc ./c");
    }

    #[test]
    fn dry_run_never_invokes_the_runner() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = Executor::with_runner(Box::new(FakeRunner { calls: calls.clone(), fail_on: None }));
        executor.execute_job(&sample_job(), false, true).unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_main_command_aborts_before_post_steps() {
        let mut job = sample_job();
        job.post_steps.push(ActionStep {
            name: "notify".to_string(),
            command: "echo done".to_string(),
            inputs: BTreeMap::new(),
        });
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = Executor::with_runner(Box::new(FakeRunner {
            calls: calls.clone(),
            fail_on: Some("helm template my-app ./c".to_string()),
        }));
        let err = executor.execute_job(&job, false, false).unwrap_err();
        assert!(matches!(err, ThinCiError::ExecutionFailure { .. }));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn pre_steps_run_before_main_commands() {
        let mut job = sample_job();
        job.pre_steps.push(ActionStep {
            name: "init".to_string(),
            command: "helm repo update".to_string(),
            inputs: BTreeMap::new(),
        });
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = Executor::with_runner(Box::new(FakeRunner { calls: calls.clone(), fail_on: None }));
        executor.execute_job(&job, false, false).unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(calls[0], "helm repo update");
        assert_eq!(calls[1], "helm template my-app ./c");
    }
}
