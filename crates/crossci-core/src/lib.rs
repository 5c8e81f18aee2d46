//! crossci core
//!
//! Core domain types, validation, and error handling for crossci.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates: workflow definitions, platform identifiers,
//! step conditions, and job/run outcomes.

pub mod error;
pub mod ids;
pub mod interpolation;
pub mod run;
pub mod validation;
pub mod workflow;

pub use error::{Error, Result};
pub use ids::*;
