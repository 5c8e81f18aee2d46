//! Definition-time checks run before any job starts.

use crate::interpolation::{Reference, references};
use crate::workflow::{StepCondition, WorkflowDefinition};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A single problem found in a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validator for workflow definitions.
pub struct WorkflowValidator;

impl WorkflowValidator {
    pub fn new() -> Self {
        Self
    }

    /// Reject the workflow if any issue is found.
    pub fn validate(&self, workflow: &WorkflowDefinition) -> Result<()> {
        let issues = self.issues(workflow);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::WorkflowValidation(issues))
        }
    }

    /// Collect every issue in the workflow.
    pub fn issues(&self, workflow: &WorkflowDefinition) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        self.check_platforms(workflow, &mut issues);
        self.check_elevation(workflow, &mut issues);
        self.check_env(workflow, &mut issues);
        self.check_steps(workflow, &mut issues);
        issues
    }

    fn check_platforms(&self, workflow: &WorkflowDefinition, issues: &mut Vec<ValidationIssue>) {
        let platforms = &workflow.matrix.platforms;
        if platforms.is_empty() {
            issues.push(ValidationIssue::new(
                "matrix.platforms",
                "at least one platform is required",
            ));
        }

        let mut seen = HashSet::new();
        for (idx, platform) in platforms.iter().enumerate() {
            if platform.as_str().trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("matrix.platforms[{idx}]"),
                    "platform identifier is empty",
                ));
            }
            if !seen.insert(platform) {
                issues.push(ValidationIssue::new(
                    format!("matrix.platforms[{idx}]"),
                    format!("platform '{platform}' is declared more than once"),
                ));
            }
        }

        if workflow.matrix.max_parallel == Some(0) {
            issues.push(ValidationIssue::new(
                "matrix.max_parallel",
                "must be at least 1",
            ));
        }
    }

    fn check_elevation(&self, workflow: &WorkflowDefinition, issues: &mut Vec<ValidationIssue>) {
        let Some(policy) = &workflow.elevation else {
            return;
        };

        if !workflow.matrix.platforms.contains(&policy.platform) {
            issues.push(ValidationIssue::new(
                "elevation.platform",
                format!("platform '{}' is not in matrix.platforms", policy.platform),
            ));
        }
        if policy.program.trim().is_empty() {
            issues.push(ValidationIssue::new(
                "elevation.program",
                "elevation program is empty",
            ));
        }
        for (idx, name) in policy.preserve_env.iter().enumerate() {
            if !is_env_name(name) {
                issues.push(ValidationIssue::new(
                    format!("elevation.preserve_env[{idx}]"),
                    format!("'{name}' is not a valid variable name"),
                ));
            }
        }
    }

    fn check_env(&self, workflow: &WorkflowDefinition, issues: &mut Vec<ValidationIssue>) {
        for name in workflow.env.names() {
            if !is_env_name(name) {
                issues.push(ValidationIssue::new(
                    format!("env.{name}"),
                    "not a valid variable name",
                ));
            }
        }
    }

    fn check_steps(&self, workflow: &WorkflowDefinition, issues: &mut Vec<ValidationIssue>) {
        if workflow.steps.is_empty() {
            issues.push(ValidationIssue::new("steps", "at least one step is required"));
        }

        let mut names = HashSet::new();
        for (idx, step) in workflow.steps.iter().enumerate() {
            let path = format!("steps[{idx}]");

            if step.name.trim().is_empty() {
                issues.push(ValidationIssue::new(&path, "step name is empty"));
            } else if !names.insert(step.name.as_str()) {
                issues.push(ValidationIssue::new(
                    &path,
                    format!("step name '{}' is used more than once", step.name),
                ));
            }

            if step.action().is_err() {
                issues.push(ValidationIssue::new(
                    &path,
                    "exactly one of 'run' or 'uses' must be set",
                ));
            }

            match &step.when {
                Some(StepCondition::Platform(p)) | Some(StepCondition::NotPlatform(p))
                    if !workflow.matrix.platforms.contains(p) =>
                {
                    issues.push(ValidationIssue::new(
                        format!("{path}.when"),
                        format!("platform '{p}' is not in matrix.platforms"),
                    ));
                }
                Some(StepCondition::ElevationPlatform)
                | Some(StepCondition::NotElevationPlatform)
                    if workflow.elevation.is_none() =>
                {
                    issues.push(ValidationIssue::new(
                        format!("{path}.when"),
                        "condition refers to the elevation platform but no elevation is configured",
                    ));
                }
                _ => {}
            }

            if step.elevated {
                self.check_elevated_step(workflow, idx, issues);
            }

            if let Some(script) = &step.run {
                for reference in references(script) {
                    match reference {
                        Reference::Platform => {}
                        Reference::Env(name) if workflow.env.contains(&name) => {}
                        Reference::Env(name) => issues.push(ValidationIssue::new(
                            format!("{path}.run"),
                            format!("'env.{name}' is not declared in env"),
                        )),
                        Reference::Unknown(expr) => issues.push(ValidationIssue::new(
                            format!("{path}.run"),
                            format!("unknown expression '{expr}'"),
                        )),
                    }
                }
            }
        }
    }

    fn check_elevated_step(
        &self,
        workflow: &WorkflowDefinition,
        idx: usize,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let path = format!("steps[{idx}].elevated");
        let Some(policy) = &workflow.elevation else {
            issues.push(ValidationIssue::new(
                path,
                "elevated step requires an 'elevation' section",
            ));
            return;
        };

        // Must run on the elevation platform and nowhere else.
        let step = &workflow.steps[idx];
        let gated = workflow
            .matrix
            .platforms
            .iter()
            .all(|p| step.applies_to(p, Some(policy)) == (p == &policy.platform));
        if !gated {
            issues.push(ValidationIssue::new(
                path,
                format!(
                    "elevated step must run only on the elevation platform '{}'",
                    policy.platform
                ),
            ));
        }
    }
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ElevationPolicy, PlatformSet, StepDefinition};

    fn messages(workflow: &WorkflowDefinition) -> Vec<String> {
        WorkflowValidator::new()
            .issues(workflow)
            .into_iter()
            .map(|i| i.to_string())
            .collect()
    }

    #[test]
    fn test_default_workflow_is_valid() {
        let workflow = WorkflowDefinition::cargo_default();
        assert!(WorkflowValidator::new().validate(&workflow).is_ok());
    }

    #[test]
    fn test_empty_and_duplicate_platforms() {
        let mut workflow = WorkflowDefinition::cargo_default();
        workflow.matrix.platforms = PlatformSet::default();
        workflow.elevation = None;
        workflow.steps.truncate(2);
        assert!(
            messages(&workflow)
                .iter()
                .any(|m| m.contains("at least one platform"))
        );

        workflow.matrix.platforms = PlatformSet::from_iter(["linux", "linux"]);
        assert!(
            messages(&workflow)
                .iter()
                .any(|m| m.contains("declared more than once"))
        );
    }

    #[test]
    fn test_elevation_platform_must_be_declared() {
        let mut workflow = WorkflowDefinition::cargo_default();
        workflow.elevation = Some(ElevationPolicy {
            platform: "freebsd".into(),
            program: "sudo".to_string(),
            preserve_env: vec!["PATH".to_string()],
        });

        let msgs = messages(&workflow);
        assert!(msgs.iter().any(|m| m.starts_with("elevation.platform")));
    }

    #[test]
    fn test_elevation_condition_without_policy() {
        let mut workflow = WorkflowDefinition::cargo_default();
        workflow.elevation = None;

        let msgs = messages(&workflow);
        assert!(msgs.iter().any(|m| m.starts_with("steps[2].when")));
        assert!(msgs.iter().any(|m| m.starts_with("steps[3].elevated")));
    }

    #[test]
    fn test_ungated_elevated_step_rejected() {
        let mut workflow = WorkflowDefinition::cargo_default();
        workflow.steps[3].when = None;

        let msgs = messages(&workflow);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("only on the elevation platform"));
    }

    #[test]
    fn test_platform_gate_equivalent_to_elevation_gate() {
        let mut workflow = WorkflowDefinition::cargo_default();
        workflow.steps[3].when = Some(StepCondition::Platform("macos".into()));

        assert!(WorkflowValidator::new().validate(&workflow).is_ok());
    }

    #[test]
    fn test_undefined_references_rejected() {
        let mut workflow = WorkflowDefinition::cargo_default();
        workflow
            .steps
            .push(StepDefinition::command("report", "echo ${{ env.UNDEFINED }} ${{ matrix.os }}"));

        let msgs = messages(&workflow);
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].contains("env.UNDEFINED"));
        assert!(msgs[1].contains("unknown expression 'matrix.os'"));
    }

    #[test]
    fn test_duplicate_step_names_and_missing_action() {
        let mut workflow = WorkflowDefinition::cargo_default();
        let mut broken = StepDefinition::command("build", "make");
        broken.run = None;
        workflow.steps.push(broken);

        let msgs = messages(&workflow);
        assert!(msgs.iter().any(|m| m.contains("used more than once")));
        assert!(msgs.iter().any(|m| m.contains("exactly one of 'run' or 'uses'")));
    }

    #[test]
    fn test_invalid_preserve_name() {
        let mut workflow = WorkflowDefinition::cargo_default();
        if let Some(policy) = workflow.elevation.as_mut() {
            policy.preserve_env.push("NOT-A-NAME".to_string());
        }

        let err = WorkflowValidator::new().validate(&workflow).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("NOT-A-NAME"));
    }
}
