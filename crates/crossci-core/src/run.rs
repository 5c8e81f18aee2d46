//! Run and job outcome types.

use crate::ids::{JobId, PlatformId, RunId};
use crate::workflow::TriggerKind;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// Condition evaluated false for this platform.
    Skipped,
    /// An earlier step failed or the job never got a workspace.
    NotExecuted,
    Cancelled,
}

impl StepStatus {
    pub fn executed(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Cancelled
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Succeeded => write!(f, "succeeded"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
            StepStatus::NotExecuted => write!(f, "not executed"),
            StepStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Succeeded => write!(f, "succeeded"),
            JobOutcome::Failed => write!(f, "failed"),
            JobOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    pub fn new(name: impl Into<String>, status: StepStatus) -> Self {
        Self {
            name: name.into(),
            status,
            exit_code: None,
            started_at: None,
            duration_ms: 0,
            error: None,
        }
    }
}

/// Result of one platform's job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobReport {
    pub job_id: JobId,
    pub platform: PlatformId,
    pub outcome: JobOutcome,
    pub steps: Vec<StepRecord>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobReport {
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Names of the steps that actually ran, in order.
    pub fn executed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status.executed())
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Aggregate of every job in a run, in declared platform order.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerKind>,
    pub jobs: Vec<JobReport>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    /// A run fails iff at least one job did not succeed.
    pub fn success(&self) -> bool {
        self.jobs.iter().all(|job| job.outcome.is_success())
    }

    pub fn outcome_of(&self, platform: &PlatformId) -> Option<JobOutcome> {
        self.job(platform).map(|job| job.outcome)
    }

    pub fn job(&self, platform: &PlatformId) -> Option<&JobReport> {
        self.jobs.iter().find(|job| &job.platform == platform)
    }

    pub fn outcomes(&self) -> Vec<(PlatformId, JobOutcome)> {
        self.jobs
            .iter()
            .map(|job| (job.platform.clone(), job.outcome))
            .collect()
    }

    pub fn failed_platforms(&self) -> Vec<&PlatformId> {
        self.jobs
            .iter()
            .filter(|job| !job.outcome.is_success())
            .map(|job| &job.platform)
            .collect()
    }
}
