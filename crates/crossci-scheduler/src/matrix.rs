//! Matrix expansion for parallel job generation.

use crossci_core::ids::{JobId, PlatformId};
use crossci_core::workflow::{
    ElevationPolicy, EnvOverlay, PlatformSet, StepDefinition, WorkflowDefinition,
};
use std::sync::Arc;

/// The job template every platform is bound to.
///
/// Steps are copied into each job; the overlay and elevation policy are
/// shared read-only between all jobs of a run.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub name: String,
    pub steps: Vec<StepDefinition>,
    pub overlay: Arc<EnvOverlay>,
    pub elevation: Option<Arc<ElevationPolicy>>,
}

impl JobTemplate {
    pub fn from_workflow(workflow: &WorkflowDefinition) -> Self {
        Self {
            name: workflow.name.clone(),
            steps: workflow.steps.clone(),
            overlay: Arc::new(workflow.env.clone()),
            elevation: workflow.elevation.clone().map(Arc::new),
        }
    }
}

/// A single job in an expanded matrix.
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub id: JobId,
    pub index: usize,
    pub platform: PlatformId,
    pub display_name: String,
    pub steps: Vec<StepDefinition>,
    pub overlay: Arc<EnvOverlay>,
    pub elevation: Option<Arc<ElevationPolicy>>,
}

impl JobInstance {
    pub fn elevation(&self) -> Option<&ElevationPolicy> {
        self.elevation.as_deref()
    }

    /// Names of the steps whose condition holds on this job's platform, in order.
    pub fn selected_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| step.applies_to(&self.platform, self.elevation()))
            .map(|step| step.name.as_str())
            .collect()
    }
}

/// Result of matrix expansion.
#[derive(Debug, Clone)]
pub struct MatrixExpansion {
    pub jobs: Vec<JobInstance>,
    pub fail_fast: bool,
    pub max_parallel: Option<u32>,
}

/// Expander for platform matrices.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// One job per platform, in declared order, each with its own copy of the steps.
    pub fn expand(&self, platforms: &PlatformSet, template: &JobTemplate) -> Vec<JobInstance> {
        platforms
            .iter()
            .enumerate()
            .map(|(index, platform)| JobInstance {
                id: JobId::new(),
                index,
                platform: platform.clone(),
                display_name: format!("{} ({})", template.name, platform),
                steps: template.steps.clone(),
                overlay: Arc::clone(&template.overlay),
                elevation: template.elevation.clone(),
            })
            .collect()
    }

    /// Expand a whole workflow, carrying its fail-fast and parallelism settings.
    pub fn expand_workflow(&self, workflow: &WorkflowDefinition) -> MatrixExpansion {
        let template = JobTemplate::from_workflow(workflow);
        MatrixExpansion {
            jobs: self.expand(&workflow.matrix.platforms, &template),
            fail_fast: workflow.matrix.fail_fast,
            max_parallel: workflow.matrix.max_parallel,
        }
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn structure(jobs: &[JobInstance]) -> Vec<(String, Vec<String>)> {
        jobs.iter()
            .map(|job| {
                (
                    job.platform.to_string(),
                    job.selected_steps().iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_expand_one_job_per_platform_in_order() {
        let workflow = WorkflowDefinition::cargo_default();
        let expansion = MatrixExpander::new().expand_workflow(&workflow);

        let platforms: Vec<&str> = expansion.jobs.iter().map(|j| j.platform.as_str()).collect();
        assert_eq!(platforms, vec!["linux", "windows", "macos"]);
        assert_eq!(
            expansion.jobs.iter().map(|j| j.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(!expansion.fail_fast);
        assert_eq!(expansion.max_parallel, None);
    }

    #[test]
    fn test_expand_any_size() {
        let template = JobTemplate::from_workflow(&WorkflowDefinition::cargo_default());
        let names = ["a", "b", "c", "d", "e", "f", "g"];

        for n in 0..=names.len() {
            let platforms = PlatformSet::from_iter(names[..n].iter().copied());
            let jobs = MatrixExpander::new().expand(&platforms, &template);

            assert_eq!(jobs.len(), n);
            for (job, expected) in jobs.iter().zip(&names[..n]) {
                assert_eq!(job.platform.as_str(), *expected);
                assert_eq!(job.steps, template.steps);
            }
        }
    }

    #[test]
    fn test_exactly_one_test_step_per_platform() {
        let workflow = WorkflowDefinition::cargo_default();
        let expansion = MatrixExpander::new().expand_workflow(&workflow);

        let expected: Vec<(String, Vec<String>)> = [
            ("linux", ["checkout", "build", "test"]),
            ("windows", ["checkout", "build", "test"]),
            ("macos", ["checkout", "build", "test-elevated"]),
        ]
        .iter()
        .map(|(platform, steps)| {
            (
                platform.to_string(),
                steps.iter().map(|s| s.to_string()).collect(),
            )
        })
        .collect();

        assert_eq!(structure(&expansion.jobs), expected);
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let workflow = WorkflowDefinition::cargo_default();
        let expander = MatrixExpander::new();

        let first = expander.expand_workflow(&workflow);
        let second = expander.expand_workflow(&workflow);

        assert_eq!(structure(&first.jobs), structure(&second.jobs));
    }

    #[test]
    fn test_jobs_share_overlay() {
        let workflow = WorkflowDefinition::cargo_default();
        let expansion = MatrixExpander::new().expand_workflow(&workflow);

        let first = &expansion.jobs[0].overlay;
        assert!(expansion.jobs.iter().all(|j| Arc::ptr_eq(&j.overlay, first)));
        assert_eq!(first.get("CARGO_TERM_COLOR"), Some("always"));
    }
}
