//! Backup job configuration.
//!
//! Loaded once at startup from `config.toml` (see [`crate::paths`]) and then
//! overridden by command-line flags. Immutable for the rest of the run.
//!
//! ```toml
//! vms = ["vm-1.example.com", "vm-2.example.com"]
//! backup_dir = "/srv/data/backups/vms_disks"
//! snapshot_size_gb = 1
//! block_size = 4096
//! on_error = "abort"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};
use crate::vm::{Backend, DEFAULT_URI};

/// What the orchestrator does when one disk or VM fails.
///
/// Fatal errors (see [`BackupError::is_fatal`]) abort regardless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop the run at the first failure.
    #[default]
    Abort,
    /// Record the failure and move on to the next disk.
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// VM names, processed in this order.
    pub vms: Vec<String>,
    /// Directory receiving one `<volume>.gz` per disk.
    pub backup_dir: PathBuf,
    /// Copy-on-write space reserved for each snapshot.
    pub snapshot_size_gb: u64,
    /// Free space required in `backup_dir` before snapshotting; defaults to
    /// `snapshot_size_gb`.
    pub min_free_gb: Option<u64>,
    /// `dd` block size in bytes.
    pub block_size: u64,
    pub libvirt_uri: String,
    pub backend: Backend,
    pub on_error: ErrorPolicy,
    /// Hold an advisory lock on `backup_dir` for the run.
    pub lock: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            vms: Vec::new(),
            backup_dir: PathBuf::new(),
            snapshot_size_gb: 1,
            min_free_gb: None,
            block_size: 4096,
            libvirt_uri: DEFAULT_URI.to_string(),
            backend: Backend::default(),
            on_error: ErrorPolicy::default(),
            lock: true,
        }
    }
}

impl BackupConfig {
    pub fn from_toml(s: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load from `path`, or from `default_path` when it exists.
    ///
    /// An explicit `path` must exist; a missing default file yields the
    /// defaults.
    pub fn load(path: Option<&Path>, default_path: Option<&Path>) -> Result<Self> {
        let path = match (path, default_path) {
            (Some(p), _) => p,
            (None, Some(p)) if p.exists() => p,
            _ => return Ok(Self::default()),
        };
        let content = std::fs::read_to_string(path).map_err(|e| BackupError::Config {
            reason: format!("read {}: {e}", path.display()),
        })?;
        Self::from_toml(&content).map_err(|e| BackupError::Config {
            reason: format!("parse {}: {e}", path.display()),
        })
    }

    /// Threshold for the free-space check.
    pub fn min_free_gb(&self) -> u64 {
        self.min_free_gb.unwrap_or(self.snapshot_size_gb)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(BackupError::Config {
                reason: reason.to_string(),
            })
        };
        if self.vms.is_empty() {
            return invalid("no VMs given");
        }
        if self.vms.iter().any(|vm| vm.trim().is_empty()) {
            return invalid("empty VM name");
        }
        if self.backup_dir.as_os_str().is_empty() {
            return invalid("backup_dir is not set");
        }
        if !self.backup_dir.is_dir() {
            return Err(BackupError::Config {
                reason: format!("backup_dir {} is not a directory", self.backup_dir.display()),
            });
        }
        if self.snapshot_size_gb == 0 {
            return invalid("snapshot_size_gb must be at least 1");
        }
        if self.block_size == 0 {
            return invalid("block_size must be positive");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
