//! Hypervisor access through the `virsh` CLI.
//!
//! Used when the crate is built without the `libvirt` feature, or when the
//! config selects `backend = "virsh"`. Each call is one `virsh -c <uri> ...`
//! invocation through a [`CommandRunner`]; there is no connection to hold
//! open.

use async_trait::async_trait;
use tracing::info;

use crate::command::{CommandRunner, ShellCommand, SystemRunner};
use crate::error::{BackupError, Result};
use crate::vm::Hypervisor;

/// A domain known to exist on the connected hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirshDomain {
    pub name: String,
    pub uuid: String,
}

pub struct VirshClient<R = SystemRunner> {
    uri: String,
    runner: R,
}

impl VirshClient {
    /// Verify the hypervisor at `uri` answers before any VM is processed.
    pub async fn connect(uri: &str) -> Result<Self> {
        Self::connect_with(SystemRunner, uri).await
    }
}

impl<R: CommandRunner> VirshClient<R> {
    pub async fn connect_with(runner: R, uri: &str) -> Result<Self> {
        let client = Self {
            uri: uri.to_string(),
            runner,
        };
        let canonical = client
            .virsh(&["uri"])
            .await
            .map_err(|e| BackupError::Connection {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;
        info!(uri = %canonical.trim(), "Connected to hypervisor via virsh");
        Ok(client)
    }

    async fn virsh(&self, args: &[&str]) -> Result<String> {
        let command = ShellCommand::new("virsh")
            .args(["-c", self.uri.as_str()])
            .args(args.iter().copied());
        let output = self.runner.run(&command).await?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}

#[async_trait]
impl<R: CommandRunner> Hypervisor for VirshClient<R> {
    type Domain = VirshDomain;

    async fn lookup(&self, name: &str) -> Result<VirshDomain> {
        let uuid = self
            .virsh(&["domuuid", name])
            .await
            .map_err(|e| BackupError::VmNotFound {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(VirshDomain {
            name: name.to_string(),
            uuid: uuid.trim().to_string(),
        })
    }

    async fn descriptor(&self, domain: &VirshDomain) -> Result<String> {
        // dumpxml by UUID so a rename between lookup and dump is harmless.
        self.virsh(&["dumpxml", domain.uuid.as_str()])
            .await
            .map_err(|e| BackupError::Descriptor {
                reason: format!("{}: {e}", domain.name),
            })
    }
}
