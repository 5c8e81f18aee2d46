//! Platform provisioning port.

use async_trait::async_trait;
use crossci_core::ids::PlatformId;
use crossci_core::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// An isolated execution environment handed to one job.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    /// Environment the platform starts with, before the overlay.
    pub base_env: BTreeMap<String, String>,
}

/// Supplies a ready environment for a platform before any of its steps run.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, platform: &PlatformId) -> Result<Workspace>;
}

/// Provisions the local machine, which can only stand in for its own platform.
#[derive(Debug, Clone)]
pub struct HostProvisioner {
    root: PathBuf,
    host: PlatformId,
}

impl HostProvisioner {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            host: PlatformId::host(),
        }
    }

    pub fn host(&self) -> &PlatformId {
        &self.host
    }
}

#[async_trait]
impl Provisioner for HostProvisioner {
    async fn provision(&self, platform: &PlatformId) -> Result<Workspace> {
        if platform != &self.host {
            return Err(Error::ProvisioningFailed {
                platform: platform.to_string(),
                reason: format!("this machine only provides '{}'", self.host),
            });
        }

        if !tokio::fs::try_exists(&self.root).await? {
            return Err(Error::ProvisioningFailed {
                platform: platform.to_string(),
                reason: format!("workspace {} does not exist", self.root.display()),
            });
        }

        debug!(platform = %platform, root = %self.root.display(), "Provisioned host workspace");
        Ok(Workspace {
            root: self.root.clone(),
            base_env: std::env::vars().collect(),
        })
    }
}
