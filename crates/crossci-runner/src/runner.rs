//! Core runner trait and types.

use crate::elevation::Elevation;
use async_trait::async_trait;
use crossci_core::Result;
use crossci_core::ids::{JobId, PlatformId};
use crossci_core::workflow::StepDefinition;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Output line from step execution.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Output stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Result of step execution.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn from_exit_code(exit_code: i32, duration_ms: u64) -> Self {
        Self {
            exit_code,
            success: exit_code == 0,
            duration_ms,
        }
    }
}

/// Context for step execution.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub job_id: JobId,
    pub platform: PlatformId,
    pub workspace: PathBuf,
    /// Full environment of the step: the provisioned base with the overlay on top.
    pub env: BTreeMap<String, String>,
    /// The step with its command already interpolated.
    pub step: StepDefinition,
    /// Set for elevated steps.
    pub elevation: Option<Elevation>,
}

/// Trait for step execution.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Execute a step, streaming output to the provided channel.
    ///
    /// `Ok` with an unsuccessful result means the command ran and failed;
    /// `Err` means it could not be run at all.
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult>;
}
