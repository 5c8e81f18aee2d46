//! CLI configuration management.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Workflow file used when none is given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            workflow: None,
            output_format: OutputFormat::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "crossci=info".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl CliConfig {
    /// Load configuration from file.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::parse(&content).with_context(|| format!("in {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Fall back to the defaults when `loaded` failed, saying why.
    pub fn or_default(loaded: Result<Self>) -> Self {
        loaded.unwrap_or_else(|e| {
            warn!(error = %format!("{e:#}"), "Ignoring unreadable CLI configuration, using defaults");
            Self::default()
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("invalid CLI configuration")
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "crossci", "crossci")
            .context("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "workflow" => self.workflow = Some(value.to_string()),
            "log_level" => self.log_level = value.to_string(),
            "output_format" => {
                self.output_format = OutputFormat::from_str(value, true)
                    .map_err(|_| format!("Invalid output format: {}", value))?;
            }
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_when_empty() {
        let config = CliConfig::parse("{}").unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.log_level, "crossci=info");
    }

    #[test]
    fn test_set_known_keys() {
        let mut config = CliConfig::default();
        config.set("output_format", "json").unwrap();
        config.set("workflow", "ci/crossci.yaml").unwrap();

        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.workflow.as_deref(), Some("ci/crossci.yaml"));
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = CliConfig::default();
        assert!(config.set("output_format", "xml").is_err());
        assert!(config.set("api_url", "http://localhost").is_err());
    }

    #[test]
    fn test_load_from_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from(&dir.path().join("config.yaml")).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn test_load_from_malformed_file_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "output_format: [not, a, format]").unwrap();

        let err = CliConfig::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.yaml"));
        assert_eq!(CliConfig::or_default(Err(err)), CliConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let mut config = CliConfig::default();
        config.set("log_level", "crossci=debug").unwrap();

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert_eq!(CliConfig::parse(&yaml).unwrap(), config);
    }
}
