//! Workflow definition types.
//!
//! These types represent the user-authored workflow YAML: which triggers start
//! a run, which platforms the job template is expanded across, the shared
//! environment overlay, the privilege-elevation policy and the ordered steps.

use crate::ids::PlatformId;
use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Event kinds that start a run. Empty means push only.
    #[serde(default)]
    pub on: Vec<TriggerKind>,
    #[serde(default)]
    pub env: EnvOverlay,
    pub matrix: MatrixConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<ElevationPolicy>,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Parse a workflow from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load and parse a workflow file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::WorkflowNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// The stock cross-platform cargo workflow: build and test on linux,
    /// windows and macos, running the macos tests under `sudo` with `PATH`
    /// carried across.
    ///
    /// Every step runs through `bash`, including on windows, where a `bash`
    /// on `PATH` (Git Bash or MSYS2) is required. Set `shell` per step to use
    /// something else.
    pub fn cargo_default() -> Self {
        let test_command = "cargo test --verbose";
        Self {
            name: "ci".to_string(),
            description: None,
            on: vec![TriggerKind::Push, TriggerKind::PullRequest],
            env: EnvOverlay::from_iter([("CARGO_TERM_COLOR", "always")]),
            matrix: MatrixConfig {
                platforms: PlatformSet::from_iter(["linux", "windows", "macos"]),
                fail_fast: false,
                max_parallel: None,
            },
            elevation: Some(ElevationPolicy {
                platform: PlatformId::new("macos"),
                program: default_elevation_program(),
                preserve_env: default_preserve_env(),
            }),
            steps: vec![
                StepDefinition::builtin("checkout", BuiltinAction::Checkout),
                StepDefinition::command("build", "cargo build --all-targets --verbose"),
                StepDefinition::command("test", test_command)
                    .when(StepCondition::NotElevationPlatform),
                StepDefinition::command("test-elevated", test_command)
                    .when(StepCondition::ElevationPlatform)
                    .elevated(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Push => write!(f, "push"),
            TriggerKind::PullRequest => write!(f, "pull_request"),
        }
    }
}

/// Variables visible to every step of every job. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct EnvOverlay(BTreeMap<String, String>);

impl EnvOverlay {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self(vars)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Layer the overlay on top of a base environment.
    pub fn apply_to(&self, base: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut merged = base.clone();
        merged.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvOverlay {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MatrixConfig {
    pub platforms: PlatformSet,
    /// Cancel sibling jobs on the first failure. Off unless asked for.
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<u32>,
}

/// Ordered platforms a run must cover, fixed at definition time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct PlatformSet(Vec<PlatformId>);

impl PlatformSet {
    pub fn new(platforms: Vec<PlatformId>) -> Self {
        Self(platforms)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlatformId> {
        self.0.iter()
    }

    pub fn contains(&self, platform: &PlatformId) -> bool {
        self.0.contains(platform)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<P: Into<PlatformId>> FromIterator<P> for PlatformSet {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a PlatformSet {
    type Item = &'a PlatformId;
    type IntoIter = std::slice::Iter<'a, PlatformId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Which platform runs elevated steps, and what survives the privilege boundary.
///
/// Elevation programs commonly reset the environment. Every overlay variable
/// plus every name in `preserve_env` is passed explicitly to the elevated
/// process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ElevationPolicy {
    pub platform: PlatformId,
    #[serde(default = "default_elevation_program")]
    pub program: String,
    #[serde(default = "default_preserve_env")]
    pub preserve_env: Vec<String>,
}

fn default_elevation_program() -> String {
    "sudo".to_string()
}

fn default_preserve_env() -> Vec<String> {
    vec!["PATH".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<BuiltinAction>,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<StepCondition>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub elevated: bool,
    #[serde(default = "default_step_timeout")]
    pub timeout_minutes: u32,
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_step_timeout() -> u32 {
    60
}

impl StepDefinition {
    /// A step running a shell command.
    pub fn command(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            run: Some(run.into()),
            uses: None,
            shell: default_shell(),
            when: None,
            elevated: false,
            timeout_minutes: default_step_timeout(),
        }
    }

    /// A step invoking a built-in action.
    pub fn builtin(name: impl Into<String>, action: BuiltinAction) -> Self {
        Self {
            run: None,
            uses: Some(action),
            ..Self::command(name, "")
        }
    }

    pub fn when(mut self, condition: StepCondition) -> Self {
        self.when = Some(condition);
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// The single action this step performs.
    pub fn action(&self) -> Result<StepAction<'_>> {
        match (&self.run, self.uses) {
            (Some(script), None) => Ok(StepAction::Run(script)),
            (None, Some(action)) => Ok(StepAction::Builtin(action)),
            _ => Err(Error::NoAction(self.name.clone())),
        }
    }

    /// Whether the step runs on `platform`.
    pub fn applies_to(&self, platform: &PlatformId, elevation: Option<&ElevationPolicy>) -> bool {
        self.when
            .as_ref()
            .is_none_or(|condition| condition.is_satisfied_by(platform, elevation))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction<'a> {
    Run(&'a str),
    Builtin(BuiltinAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinAction {
    /// Make the project source available in the job workspace.
    Checkout,
}

/// Predicate over the platform a job is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    Platform(PlatformId),
    NotPlatform(PlatformId),
    ElevationPlatform,
    NotElevationPlatform,
}

impl StepCondition {
    pub fn is_satisfied_by(
        &self,
        platform: &PlatformId,
        elevation: Option<&ElevationPolicy>,
    ) -> bool {
        let on_elevation_platform = elevation.is_some_and(|policy| &policy.platform == platform);
        match self {
            StepCondition::Platform(expected) => expected == platform,
            StepCondition::NotPlatform(excluded) => excluded != platform,
            StepCondition::ElevationPlatform => on_elevation_platform,
            StepCondition::NotElevationPlatform => !on_elevation_platform,
        }
    }
}
