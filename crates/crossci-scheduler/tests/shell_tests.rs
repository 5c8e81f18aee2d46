//! Orchestration against real host processes.

#![cfg(unix)]

use crossci_core::ids::PlatformId;
use crossci_core::run::{JobOutcome, StepStatus};
use crossci_core::workflow::{EnvOverlay, PlatformSet, StepDefinition};
use crossci_runner::ShellRunner;
use crossci_scheduler::{HostProvisioner, JobInstance, JobTemplate, MatrixExpander, Orchestrator, RunOptions};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

fn sh(name: &str, script: &str) -> StepDefinition {
    let mut step = StepDefinition::command(name, script);
    step.shell = "sh".to_string();
    step
}

fn host_jobs(steps: Vec<StepDefinition>) -> Vec<JobInstance> {
    let template = JobTemplate {
        name: "host".to_string(),
        steps,
        overlay: Arc::new(EnvOverlay::default()),
        elevation: None,
    };
    MatrixExpander::new().expand(&PlatformSet::from_iter([PlatformId::host()]), &template)
}

fn statuses(report: &crossci_core::run::JobReport) -> Vec<(String, StepStatus)> {
    report
        .steps
        .iter()
        .map(|step| (step.name.clone(), step.status))
        .collect()
}

#[tokio::test]
async fn test_stop_ends_running_command_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        Arc::new(ShellRunner::new()),
        Arc::new(HostProvisioner::new(dir.path().to_path_buf())),
    );
    let jobs = host_jobs(vec![
        sh("slow", "sleep 8; echo done"),
        sh("after", "echo after"),
    ]);

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = stop.send(true);
    });

    let start = Instant::now();
    let report = orchestrator
        .run_all(jobs, RunOptions::default(), shutdown)
        .await;
    let took = start.elapsed();

    assert!(took < Duration::from_secs(3), "stop took {took:?}");
    let job = &report.jobs[0];
    assert_eq!(job.outcome, JobOutcome::Cancelled);
    assert_eq!(
        statuses(job),
        vec![
            ("slow".to_string(), StepStatus::Cancelled),
            ("after".to_string(), StepStatus::NotExecuted),
        ]
    );
}

#[tokio::test]
async fn test_timed_out_step_fails_its_job() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        Arc::new(ShellRunner::new().with_max_timeout(Duration::from_millis(300))),
        Arc::new(HostProvisioner::new(dir.path().to_path_buf())),
    );
    let jobs = host_jobs(vec![
        sh("first", "true"),
        sh("slow", "sleep 8"),
        sh("after", "echo after"),
    ]);

    let (_stop, shutdown) = watch::channel(false);
    let start = Instant::now();
    let report = orchestrator
        .run_all(jobs, RunOptions::default(), shutdown)
        .await;

    assert!(start.elapsed() < Duration::from_secs(5));
    let job = &report.jobs[0];
    assert_eq!(job.outcome, JobOutcome::Failed);
    assert_eq!(
        statuses(job),
        vec![
            ("first".to_string(), StepStatus::Succeeded),
            ("slow".to_string(), StepStatus::Failed),
            ("after".to_string(), StepStatus::NotExecuted),
        ]
    );
    let slow = job.step("slow").unwrap();
    assert!(slow.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(slow.exit_code, None);
}
