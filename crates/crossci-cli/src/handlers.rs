//! Command handlers.

use crate::commands::EventArg;
use crate::config::{CliConfig, OutputFormat};
use anyhow::{Context, Result, bail};
use console::style;
use crossci_core::ids::PlatformId;
use crossci_core::run::{JobOutcome, RunReport, StepStatus};
use crossci_core::validation::WorkflowValidator;
use crossci_core::workflow::WorkflowDefinition;
use crossci_runner::ShellRunner;
use crossci_scheduler::{
    HostProvisioner, JobInstance, MatrixExpansion, Orchestrator, RunOptions, TriggerEvent, plan,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

const DEFAULT_WORKFLOW_PATH: &str = ".crossci/workflow.yaml";

/// Standard workflow locations, in lookup order.
const WORKFLOW_CANDIDATES: &[&str] = &[
    ".crossci/workflow.yaml",
    ".crossci/workflow.yml",
    "crossci.yaml",
    "crossci.yml",
];

/// Find the workflow file: explicit path first, then the configured default,
/// then the standard locations under `base`.
pub fn find_workflow_file(
    base: &Path,
    explicit: Option<&str>,
    config: &CliConfig,
) -> Option<PathBuf> {
    if let Some(p) = explicit.or(config.workflow.as_deref()) {
        return Some(base.join(p));
    }

    WORKFLOW_CANDIDATES
        .iter()
        .map(|candidate| base.join(candidate))
        .find(|path| path.exists())
}

fn load_workflow(config: &CliConfig, explicit: Option<&str>) -> Result<(PathBuf, WorkflowDefinition)> {
    let cwd = std::env::current_dir()?;
    let Some(path) = find_workflow_file(&cwd, explicit, config) else {
        bail!(
            "no workflow file found (looked for {}); run `crossci init` to create one",
            WORKFLOW_CANDIDATES.join(", ")
        );
    };
    let workflow = WorkflowDefinition::load(&path)?;
    Ok((path, workflow))
}

/// Write the default workflow.
pub async fn init(force: bool) -> Result<()> {
    let path = Path::new(DEFAULT_WORKFLOW_PATH);

    if path.exists() && !force {
        println!(
            "{} {} already exists (use --force to overwrite)",
            style("!").yellow(),
            DEFAULT_WORKFLOW_PATH
        );
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let yaml = WorkflowDefinition::cargo_default().to_yaml()?;
    tokio::fs::write(path, yaml).await?;

    println!("{} Created {}", style("✓").green(), DEFAULT_WORKFLOW_PATH);
    Ok(())
}

/// Validate a workflow file.
pub async fn validate(config: &CliConfig, path: Option<&str>) -> Result<bool> {
    let (path, workflow) = load_workflow(config, path)?;
    let issues = WorkflowValidator::new().issues(&workflow);

    if !issues.is_empty() {
        println!(
            "{} {} has {} problem(s)",
            style("✗").red(),
            path.display(),
            issues.len()
        );
        for issue in &issues {
            println!("  - {}", issue);
        }
        return Ok(false);
    }

    println!(
        "{} Workflow \"{}\" is valid",
        style("✓").green(),
        workflow.name
    );
    println!("  Platforms: {}", join_platforms(workflow.matrix.platforms.iter()));
    println!("  Steps: {}", workflow.steps.len());
    if let Some(policy) = &workflow.elevation {
        println!(
            "  Elevation: {} via {} (preserving {})",
            policy.platform,
            policy.program,
            policy.preserve_env.join(", ")
        );
    }
    Ok(true)
}

/// Show which steps every platform would run.
pub async fn plan_workflow(config: &CliConfig, path: Option<&str>, event: EventArg) -> Result<()> {
    let (_, workflow) = load_workflow(config, path)?;
    let event = TriggerEvent::from(event);

    let Some(expansion) = plan(&workflow, &event)? else {
        println!(
            "{} Workflow \"{}\" does not run on {}",
            style("i").blue(),
            workflow.name,
            event.kind()
        );
        return Ok(());
    };

    println!(
        "{} {} job(s), fail-fast {}",
        style(&workflow.name).bold(),
        expansion.jobs.len(),
        if expansion.fail_fast { "on" } else { "off" }
    );
    for job in &expansion.jobs {
        println!("  {}", style(&job.platform).cyan());
        for step in &job.steps {
            if !step.applies_to(&job.platform, job.elevation()) {
                println!("    {} {}", style("-").dim(), style(step.label()).dim());
            } else if step.elevated {
                println!("    {} {} (elevated)", style("▶").yellow(), step.label());
            } else {
                println!("    {} {}", style("▶").green(), step.label());
            }
        }
    }
    Ok(())
}

/// Run the workflow on this machine. Returns whether the run succeeded.
pub async fn run_workflow(
    config: &CliConfig,
    path: Option<&str>,
    event: EventArg,
    platforms: &[String],
    format: Option<OutputFormat>,
    workspace: Option<PathBuf>,
) -> Result<bool> {
    let (path, workflow) = load_workflow(config, path)?;
    let event = TriggerEvent::from(event);
    let format = format.unwrap_or(config.output_format);

    let Some(expansion) = plan(&workflow, &event)? else {
        println!(
            "{} Workflow \"{}\" does not run on {}",
            style("i").blue(),
            workflow.name,
            event.kind()
        );
        return Ok(true);
    };
    let options = RunOptions::from(&expansion);
    let jobs = select_jobs(expansion, platforms)?;

    let root = match workspace {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let orchestrator = Orchestrator::new(
        Arc::new(ShellRunner::new()),
        Arc::new(HostProvisioner::new(root)),
    );

    if format == OutputFormat::Table {
        println!(
            "{} Running {} from {} on {}",
            style("▶").cyan(),
            style(&workflow.name).bold(),
            path.display(),
            event.kind()
        );
    }

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping run");
            let _ = stop.send(true);
        }
    });

    let mut report = orchestrator.run_all(jobs, options, shutdown).await;
    report.trigger = Some(event.kind());

    print_report(&report, format)?;
    Ok(report.success())
}

/// Restrict an expansion to the requested platforms. Empty keeps every job.
fn select_jobs(expansion: MatrixExpansion, platforms: &[String]) -> Result<Vec<JobInstance>> {
    if platforms.is_empty() {
        return Ok(expansion.jobs);
    }

    let wanted: Vec<PlatformId> = platforms.iter().map(|p| PlatformId::new(p.as_str())).collect();
    if let Some(unknown) = wanted
        .iter()
        .find(|p| !expansion.jobs.iter().any(|job| &job.platform == *p))
    {
        bail!("platform '{}' is not part of the workflow matrix", unknown);
    }

    Ok(expansion
        .jobs
        .into_iter()
        .filter(|job| wanted.contains(&job.platform))
        .collect())
}

fn print_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(report)?),
        OutputFormat::Table => {
            println!();
            for job in &report.jobs {
                let mark = match job.outcome {
                    JobOutcome::Succeeded => style("✓").green(),
                    JobOutcome::Failed => style("✗").red(),
                    JobOutcome::Cancelled => style("!").yellow(),
                };
                println!(
                    "{} {:<10} {:<10} {} ms",
                    mark,
                    job.platform.as_str(),
                    job.outcome.to_string(),
                    job.duration_ms
                );
                for step in &job.steps {
                    let status = match step.status {
                        StepStatus::Succeeded => style(step.status).green(),
                        StepStatus::Failed => style(step.status).red(),
                        StepStatus::Cancelled => style(step.status).yellow(),
                        StepStatus::Skipped | StepStatus::NotExecuted => style(step.status).dim(),
                    };
                    println!("    {:<20} {}", step.name, status);
                }
                if let Some(error) = &job.error {
                    println!("    {}", style(error).red());
                }
            }

            println!();
            if report.success() {
                println!("{} Run succeeded in {} ms", style("✓").green(), report.duration_ms);
            } else {
                println!(
                    "{} Run failed on {}",
                    style("✗").red(),
                    join_platforms(report.failed_platforms().into_iter())
                );
            }
        }
    }
    Ok(())
}

fn join_platforms<'a>(platforms: impl Iterator<Item = &'a PlatformId>) -> String {
    platforms
        .map(PlatformId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print the workflow JSON schema.
pub fn schema() -> Result<()> {
    let schema = schemars::schema_for!(WorkflowDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> Result<()> {
    println!("Current configuration:");
    println!(
        "  workflow: {}",
        config.workflow.as_deref().unwrap_or("(auto-detect)")
    );
    println!("  output_format: {:?}", config.output_format);
    println!("  log_level: {}", config.log_level);

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> Result<()> {
    let mut config = CliConfig::or_default(CliConfig::load());
    config.set(key, value).map_err(anyhow::Error::msg)?;
    config.save().context("saving configuration")?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossci_scheduler::MatrixExpander;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_find_standard_location() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("crossci.yaml"), "name: ci").unwrap();

        let found = find_workflow_file(dir.path(), None, &CliConfig::default());
        assert_eq!(found, Some(dir.path().join("crossci.yaml")));
    }

    #[test]
    fn test_find_prefers_dot_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".crossci")).unwrap();
        std::fs::write(dir.path().join(".crossci/workflow.yaml"), "name: ci").unwrap();
        std::fs::write(dir.path().join("crossci.yaml"), "name: ci").unwrap();

        let found = find_workflow_file(dir.path(), None, &CliConfig::default());
        assert_eq!(found, Some(dir.path().join(".crossci/workflow.yaml")));
    }

    #[test]
    fn test_find_explicit_beats_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig {
            workflow: Some("configured.yaml".to_string()),
            ..CliConfig::default()
        };

        assert_eq!(
            find_workflow_file(dir.path(), Some("given.yaml"), &config),
            Some(dir.path().join("given.yaml"))
        );
        assert_eq!(
            find_workflow_file(dir.path(), None, &config),
            Some(dir.path().join("configured.yaml"))
        );
    }

    #[test]
    fn test_find_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_workflow_file(dir.path(), None, &CliConfig::default()), None);
    }

    #[test]
    fn test_select_jobs_filters_platforms() {
        let expansion = MatrixExpander::new().expand_workflow(&WorkflowDefinition::cargo_default());

        let jobs = select_jobs(expansion.clone(), &["macos".to_string()]).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].platform.as_str(), "macos");

        assert_eq!(select_jobs(expansion.clone(), &[]).unwrap().len(), 3);
        assert!(select_jobs(expansion, &["freebsd".to_string()]).is_err());
    }
}
