//! Built-in step actions.

use crate::runner::{StepContext, StepResult};
use crossci_core::Result;
use crossci_core::workflow::BuiltinAction;
use tracing::{info, warn};

pub async fn run_builtin(action: BuiltinAction, ctx: &StepContext) -> Result<StepResult> {
    match action {
        BuiltinAction::Checkout => checkout(ctx).await,
    }
}

/// The provisioner places the source in the workspace; checkout only
/// verifies it is there.
async fn checkout(ctx: &StepContext) -> Result<StepResult> {
    let start = std::time::Instant::now();
    let present = tokio::fs::metadata(&ctx.workspace)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false);
    let duration_ms = start.elapsed().as_millis() as u64;

    if present {
        info!(platform = %ctx.platform, workspace = %ctx.workspace.display(), "Source checked out");
        Ok(StepResult::from_exit_code(0, duration_ms))
    } else {
        warn!(platform = %ctx.platform, workspace = %ctx.workspace.display(), "Workspace is missing");
        Ok(StepResult::from_exit_code(1, duration_ms))
    }
}
