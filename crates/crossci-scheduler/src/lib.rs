//! Matrix expansion and job orchestration for crossci.

pub mod matrix;
pub mod orchestrator;
pub mod provision;
pub mod triggers;

pub use matrix::{JobInstance, JobTemplate, MatrixExpander, MatrixExpansion};
pub use orchestrator::{Orchestrator, RunOptions, plan};
pub use provision::{HostProvisioner, Provisioner, Workspace};
pub use triggers::{TriggerEvent, TriggerMatcher};
