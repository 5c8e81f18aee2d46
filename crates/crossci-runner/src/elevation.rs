//! Privilege elevation with an explicit environment carry-over.
//!
//! Elevation programs such as `sudo` reset the environment (and `PATH` in
//! particular), so the build tool would no longer be found. The values to keep
//! are resolved before the boundary and handed to the elevated process through
//! `env NAME=value ...`.

use crossci_core::workflow::{ElevationPolicy, EnvOverlay};
use crossci_core::{Error, Result};
use std::collections::BTreeMap;

/// A resolved elevation: the program and the exact variables carried across.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Elevation {
    pub program: String,
    pub preserved: BTreeMap<String, String>,
}

impl Elevation {
    /// Resolve which values cross the boundary.
    ///
    /// Every overlay variable is carried along with the policy's
    /// `preserve_env` names. Values come from `env`, the environment the step
    /// would otherwise have seen.
    pub fn resolve(
        policy: &ElevationPolicy,
        overlay: &EnvOverlay,
        env: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut preserved = BTreeMap::new();
        let names = overlay
            .names()
            .chain(policy.preserve_env.iter().map(String::as_str));

        for name in names {
            let value = env
                .get(name)
                .ok_or_else(|| Error::PreservedVariableMissing {
                    name: name.to_string(),
                })?;
            preserved.insert(name.to_string(), value.clone());
        }

        Ok(Self {
            program: policy.program.clone(),
            preserved,
        })
    }

    /// Full argv for running `script` through `shell` with elevated privileges.
    pub fn argv(&self, shell: &str, script: &str) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.preserved.len() + 5);
        argv.push(self.program.clone());
        argv.push("env".to_string());
        argv.extend(self.preserved.iter().map(|(k, v)| format!("{k}={v}")));
        argv.push(shell.to_string());
        argv.push("-c".to_string());
        argv.push(script.to_string());
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossci_core::ids::PlatformId;

    fn policy() -> ElevationPolicy {
        ElevationPolicy {
            platform: PlatformId::new("macos"),
            program: "sudo".to_string(),
            preserve_env: vec!["PATH".to_string()],
        }
    }

    fn env() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("PATH".to_string(), "/Users/ci/.cargo/bin:/usr/bin".to_string()),
            ("HOME".to_string(), "/Users/ci".to_string()),
            ("CARGO_TERM_COLOR".to_string(), "always".to_string()),
        ])
    }

    #[test]
    fn test_resolve_carries_overlay_and_path() {
        let overlay = EnvOverlay::from_iter([("CARGO_TERM_COLOR", "always")]);
        let elevation = Elevation::resolve(&policy(), &overlay, &env()).unwrap();

        assert_eq!(elevation.preserved.len(), 2);
        assert_eq!(elevation.preserved["PATH"], "/Users/ci/.cargo/bin:/usr/bin");
        assert_eq!(elevation.preserved["CARGO_TERM_COLOR"], "always");
        assert!(!elevation.preserved.contains_key("HOME"));
    }

    #[test]
    fn test_missing_preserved_variable_is_error() {
        let mut env = env();
        env.remove("PATH");

        let err = Elevation::resolve(&policy(), &EnvOverlay::default(), &env).unwrap_err();
        assert!(matches!(err, Error::PreservedVariableMissing { name } if name == "PATH"));
    }

    #[test]
    fn test_argv() {
        let elevation = Elevation::resolve(&policy(), &EnvOverlay::default(), &env()).unwrap();

        assert_eq!(
            elevation.argv("bash", "cargo test --verbose"),
            vec![
                "sudo",
                "env",
                "PATH=/Users/ci/.cargo/bin:/usr/bin",
                "bash",
                "-c",
                "cargo test --verbose",
            ]
        );
    }
}
