//! Step execution engine for crossci.

pub mod actions;
pub mod elevation;
pub mod process;
pub mod runner;
pub mod shell;

pub use elevation::Elevation;
pub use runner::{OutputLine, OutputStream, StepContext, StepResult, StepRunner};
pub use shell::ShellRunner;
