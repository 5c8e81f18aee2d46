//! Job orchestration: run each platform's job and aggregate the outcomes.
//!
//! Jobs run as independent tasks. Inside a job, steps run strictly in
//! declared order. A failing step stops its own job only; siblings are never
//! cancelled unless the matrix opts into fail-fast. An external stop cancels
//! every job still running.

use crate::matrix::{JobInstance, MatrixExpander, MatrixExpansion};
use crate::provision::{Provisioner, Workspace};
use crate::triggers::{TriggerEvent, TriggerMatcher};
use chrono::Utc;
use crossci_core::ids::RunId;
use crossci_core::interpolation::InterpolationContext;
use crossci_core::run::{JobOutcome, JobReport, RunReport, StepRecord, StepStatus};
use crossci_core::validation::WorkflowValidator;
use crossci_core::workflow::{StepDefinition, WorkflowDefinition};
use crossci_core::{Error, Result};
use crossci_runner::{Elevation, OutputLine, StepContext, StepRunner};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// How long a finished or cancelled step's output may keep draining.
const OUTPUT_DRAIN: Duration = Duration::from_secs(5);

/// How a set of jobs is run together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Cancel the remaining jobs once one fails.
    pub fail_fast: bool,
    /// Upper bound on concurrently running jobs. `None` runs all at once.
    pub max_parallel: Option<u32>,
}

impl From<&MatrixExpansion> for RunOptions {
    fn from(expansion: &MatrixExpansion) -> Self {
        Self {
            fail_fast: expansion.fail_fast,
            max_parallel: expansion.max_parallel,
        }
    }
}

/// Expands workflows into jobs and runs them.
#[derive(Clone)]
pub struct Orchestrator {
    runner: Arc<dyn StepRunner>,
    provisioner: Arc<dyn Provisioner>,
}

impl Orchestrator {
    pub fn new(runner: Arc<dyn StepRunner>, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            runner,
            provisioner,
        }
    }

    /// Handle one trigger event end to end.
    ///
    /// The workflow is validated before any job starts; a configuration error
    /// fails the whole run. Returns `Ok(None)` when the workflow does not
    /// react to the event.
    pub async fn trigger(
        &self,
        workflow: &WorkflowDefinition,
        event: &TriggerEvent,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Option<RunReport>> {
        let Some(expansion) = plan(workflow, event)? else {
            return Ok(None);
        };

        let options = RunOptions::from(&expansion);
        let mut report = self.run_all(expansion.jobs, options, shutdown).await;
        report.trigger = Some(event.kind());
        Ok(Some(report))
    }

    /// Run every job concurrently and collect one report per job, in job order.
    pub async fn run_all(
        &self,
        jobs: Vec<JobInstance>,
        options: RunOptions,
        mut shutdown: watch::Receiver<bool>,
    ) -> RunReport {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            run_id = %run_id,
            jobs = jobs.len(),
            fail_fast = options.fail_fast,
            max_parallel = ?options.max_parallel,
            "Starting run"
        );

        let (cancel_tx, cancel_rx) = watch::channel(*shutdown.borrow_and_update());
        let limiter = options
            .max_parallel
            .map(|n| Arc::new(Semaphore::new(n.max(1) as usize)));

        let mut join_set = JoinSet::new();
        for (slot, job) in jobs.iter().enumerate() {
            let this = self.clone();
            let job = job.clone();
            let cancel = cancel_rx.clone();
            let limiter = limiter.clone();

            join_set.spawn(async move {
                let _permit = match limiter {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                (slot, this.run(&job, cancel).await)
            });
        }

        // Join every job regardless of how its siblings ended.
        let mut reports: Vec<Option<JobReport>> = vec![None; jobs.len()];
        let mut shutdown_open = true;
        loop {
            tokio::select! {
                joined = join_set.join_next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((slot, report)) => {
                            if options.fail_fast && !report.outcome.is_success() && !*cancel_tx.borrow() {
                                warn!(platform = %report.platform, "Job failed, cancelling remaining jobs");
                                let _ = cancel_tx.send(true);
                            }
                            reports[slot] = Some(report);
                        }
                        Err(e) => error!(error = %e, "Job task aborted"),
                    }
                }
                changed = shutdown.changed(), if shutdown_open => {
                    match changed {
                        Ok(()) if *shutdown.borrow() => {
                            warn!(run_id = %run_id, "Run stopped, cancelling all jobs");
                            let _ = cancel_tx.send(true);
                        }
                        Ok(()) => {}
                        Err(_) => shutdown_open = false,
                    }
                }
            }
        }

        // Every declared platform is reported, even if its task died.
        let jobs: Vec<JobReport> = reports
            .into_iter()
            .zip(&jobs)
            .map(|(report, job)| {
                report.unwrap_or_else(|| {
                    job_report(job, JobOutcome::Failed, not_executed(&job.steps), 0)
                        .with_error("job task aborted")
                })
            })
            .collect();

        let report = RunReport {
            run_id,
            trigger: None,
            jobs,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        let failed: Vec<String> = report
            .failed_platforms()
            .iter()
            .map(|p| p.to_string())
            .collect();
        if failed.is_empty() {
            info!(run_id = %run_id, duration_ms = report.duration_ms, "Run succeeded");
        } else {
            warn!(run_id = %run_id, failed = ?failed, duration_ms = report.duration_ms, "Run failed");
        }

        report
    }

    /// Run one job's steps in order until they all finish or one fails.
    pub async fn run(&self, job: &JobInstance, mut cancel: watch::Receiver<bool>) -> JobReport {
        let start = Instant::now();

        if *cancel.borrow() {
            return job_report(job, JobOutcome::Cancelled, not_executed(&job.steps), 0)
                .with_error("cancelled before start");
        }

        info!(job_id = %job.id, platform = %job.platform, steps = job.steps.len(), "Starting job");

        let provisioned = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                return job_report(job, JobOutcome::Cancelled, not_executed(&job.steps), elapsed_ms(start))
                    .with_error("cancelled during provisioning");
            }
            provisioned = self.provisioner.provision(&job.platform) => provisioned,
        };

        let workspace = match provisioned {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!(platform = %job.platform, error = %e, "Provisioning failed");
                return job_report(job, JobOutcome::Failed, not_executed(&job.steps), elapsed_ms(start))
                    .with_error(e.to_string());
            }
        };

        let env = job.overlay.apply_to(&workspace.base_env);
        let mut outcome = JobOutcome::Succeeded;
        let mut records = Vec::with_capacity(job.steps.len());

        for step in &job.steps {
            if outcome == JobOutcome::Succeeded && *cancel.borrow() {
                outcome = JobOutcome::Cancelled;
            }
            if outcome != JobOutcome::Succeeded {
                records.push(StepRecord::new(&step.name, StepStatus::NotExecuted));
                continue;
            }

            if !step.applies_to(&job.platform, job.elevation()) {
                info!(platform = %job.platform, step = %step.name, "Skipping step, condition not met");
                records.push(StepRecord::new(&step.name, StepStatus::Skipped));
                continue;
            }

            let record = self
                .run_step(job, step, &workspace, &env, &mut cancel)
                .await;
            match record.status {
                StepStatus::Failed => outcome = JobOutcome::Failed,
                StepStatus::Cancelled => outcome = JobOutcome::Cancelled,
                _ => {}
            }
            records.push(record);
        }

        let report = job_report(job, outcome, records, elapsed_ms(start));
        info!(
            job_id = %job.id,
            platform = %job.platform,
            outcome = %report.outcome,
            duration_ms = report.duration_ms,
            "Job finished"
        );
        report
    }

    async fn run_step(
        &self,
        job: &JobInstance,
        step: &StepDefinition,
        workspace: &Workspace,
        env: &BTreeMap<String, String>,
        cancel: &mut watch::Receiver<bool>,
    ) -> StepRecord {
        let start = Instant::now();
        let mut record = StepRecord {
            started_at: Some(Utc::now()),
            ..StepRecord::new(&step.name, StepStatus::Failed)
        };

        let ctx = match step_context(job, step, workspace, env) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(platform = %job.platform, step = %step.name, error = %e, "Step could not be prepared");
                record.error = Some(e.to_string());
                return record;
            }
        };

        info!(
            platform = %job.platform,
            step = %step.name,
            elevated = ctx.elevation.is_some(),
            "Running step"
        );

        let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
        let platform = job.platform.clone();
        let step_name = step.name.clone();
        let mut printer = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                info!(
                    target: "crossci::output",
                    platform = %platform,
                    step = %step_name,
                    stream = ?line.stream,
                    "{}",
                    line.content
                );
            }
        });

        let result = tokio::select! {
            biased;
            _ = cancelled(cancel) => None,
            result = self.runner.execute(&ctx, tx) => Some(result),
        };
        if tokio::time::timeout(OUTPUT_DRAIN, &mut printer).await.is_err() {
            warn!(platform = %job.platform, step = %step.name, "Step output did not close, detaching");
            printer.abort();
        }

        record.duration_ms = elapsed_ms(start);
        match result {
            None => {
                warn!(platform = %job.platform, step = %step.name, "Step cancelled");
                record.status = StepStatus::Cancelled;
                record.error = Some("cancelled".to_string());
            }
            Some(Ok(result)) => {
                record.exit_code = Some(result.exit_code);
                if result.success {
                    record.status = StepStatus::Succeeded;
                } else {
                    warn!(
                        platform = %job.platform,
                        step = %step.name,
                        exit_code = result.exit_code,
                        "Step failed"
                    );
                }
            }
            Some(Err(e)) => {
                warn!(platform = %job.platform, step = %step.name, error = %e, "Step errored");
                record.error = Some(e.to_string());
            }
        }
        record
    }
}

/// Validate a workflow and expand it for `event` without running anything.
///
/// Returns `Ok(None)` when the workflow does not react to the event.
pub fn plan(workflow: &WorkflowDefinition, event: &TriggerEvent) -> Result<Option<MatrixExpansion>> {
    WorkflowValidator::new().validate(workflow)?;

    if !TriggerMatcher::new().matches(workflow, event) {
        info!(workflow = %workflow.name, trigger = %event.kind(), "Workflow not triggered by event");
        return Ok(None);
    }

    Ok(Some(MatrixExpander::new().expand_workflow(workflow)))
}

fn step_context(
    job: &JobInstance,
    step: &StepDefinition,
    workspace: &Workspace,
    env: &BTreeMap<String, String>,
) -> Result<StepContext> {
    let interpolation = InterpolationContext::new(&job.platform, &job.overlay);
    let mut step = step.clone();
    step.run = step.run.as_deref().map(|script| interpolation.interpolate(script));

    let elevation = if step.elevated {
        let policy = job.elevation().ok_or_else(|| {
            Error::Internal(format!(
                "step {} is elevated but the workflow has no elevation policy",
                step.name
            ))
        })?;
        Some(Elevation::resolve(policy, &job.overlay, env)?)
    } else {
        None
    };

    Ok(StepContext {
        job_id: job.id,
        platform: job.platform.clone(),
        workspace: workspace.root.clone(),
        env: env.clone(),
        step,
        elevation,
    })
}

/// Resolves once `cancel` reads true. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn not_executed(steps: &[StepDefinition]) -> Vec<StepRecord> {
    steps
        .iter()
        .map(|step| StepRecord::new(&step.name, StepStatus::NotExecuted))
        .collect()
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn job_report(
    job: &JobInstance,
    outcome: JobOutcome,
    steps: Vec<StepRecord>,
    duration_ms: u64,
) -> JobReport {
    JobReport {
        job_id: job.id,
        platform: job.platform.clone(),
        outcome,
        steps,
        duration_ms,
        error: None,
    }
}
