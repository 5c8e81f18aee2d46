//! Trigger matching.

use crossci_core::workflow::{TriggerKind, WorkflowDefinition};

/// Event that can start a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    Push { git_ref: Option<String> },
    PullRequest { number: Option<u64> },
}

impl TriggerEvent {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerEvent::Push { .. } => TriggerKind::Push,
            TriggerEvent::PullRequest { .. } => TriggerKind::PullRequest,
        }
    }

    pub fn from_kind(kind: TriggerKind) -> Self {
        match kind {
            TriggerKind::Push => TriggerEvent::Push { git_ref: None },
            TriggerKind::PullRequest => TriggerEvent::PullRequest { number: None },
        }
    }
}

/// Matcher for determining if a workflow should run for an event.
pub struct TriggerMatcher;

impl TriggerMatcher {
    pub fn new() -> Self {
        Self
    }

    pub fn matches(&self, workflow: &WorkflowDefinition, event: &TriggerEvent) -> bool {
        if workflow.on.is_empty() {
            // Default: push only
            return event.kind() == TriggerKind::Push;
        }
        workflow.on.contains(&event.kind())
    }
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new()
    }
}
