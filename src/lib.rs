//! kvm-disk-backup: point-in-time backups of LVM-backed KVM disks.
//!
//! For each configured VM, every disk's logical volume is snapshotted,
//! streamed through gzip into the backup directory, checked for snapshot
//! overflow and released. See [`backup::Orchestrator`].

pub mod backup;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod vm;
pub mod volume;

pub use backup::{DiskOutcome, Orchestrator, RunReport};
pub use command::{CommandRunner, ShellCommand, SystemRunner};
pub use config::{BackupConfig, ErrorPolicy};
pub use error::{BackupError, Result};
pub use vm::Hypervisor;
pub use volume::{VolumeOps, VolumeRecord};
