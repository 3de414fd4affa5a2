//! Virtualization client for kvm-disk-backup.
//!
//! Resolves VMs by name on the local hypervisor and lists the host-side
//! storage paths backing their disks. Two backends implement
//! [`Hypervisor`]: a native libvirt connection ([`libvirt::LibvirtClient`],
//! `libvirt` feature) and the `virsh` CLI ([`virsh::VirshClient`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod descriptor;
pub mod libvirt;
pub mod virsh;

/// Default management socket of the system QEMU/KVM daemon.
pub const DEFAULT_URI: &str = "qemu:///system";

/// Lookup and descriptor access on a hypervisor connection.
///
/// The connection lives as long as the implementing value; dropping it
/// releases the connection.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Handle to a resolved VM.
    type Domain: Send + Sync;

    /// Find a defined (running or not) VM by name.
    async fn lookup(&self, name: &str) -> Result<Self::Domain>;

    /// The VM's XML descriptor.
    async fn descriptor(&self, domain: &Self::Domain) -> Result<String>;

    /// Backing source paths of the VM's disks, in descriptor order.
    async fn disk_sources(&self, domain: &Self::Domain) -> Result<Vec<String>> {
        descriptor::disk_sources(&self.descriptor(domain).await?)
    }
}

/// Which [`Hypervisor`] implementation to connect with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Libvirt,
    Virsh,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "libvirt") {
            Backend::Libvirt
        } else {
            Backend::Virsh
        }
    }
}

pub use libvirt::LibvirtClient;
pub use virsh::VirshClient;
