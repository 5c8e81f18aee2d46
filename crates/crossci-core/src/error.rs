//! Error types for crossci.

use crate::validation::ValidationIssue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Workflow errors
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("Workflow validation failed: {}", format_issues(.0))]
    WorkflowValidation(Vec<ValidationIssue>),

    // Provisioning errors
    #[error("Provisioning failed for platform {platform}: {reason}")]
    ProvisioningFailed { platform: String, reason: String },

    // Step errors
    #[error("Step timed out after {limit:?}")]
    StepTimeout { limit: std::time::Duration },

    #[error("Step has no action to execute: {0}")]
    NoAction(String),

    #[error("Variable {name} must be preserved across elevation but is not set")]
    PreservedVariableMissing { name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error denotes an unusable workflow rather than a runtime fault.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidWorkflow(_) | Error::WorkflowValidation(_) | Error::WorkflowNotFound(_)
        )
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::InvalidWorkflow(err.to_string())
    }
}
