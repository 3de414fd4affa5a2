//! Per-run record of what happened to every disk.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Step of the per-disk sequence a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskStage {
    Resolve,
    SpaceCheck,
    Snapshot,
    Copy,
    Verify,
    Cleanup,
}

impl fmt::Display for DiskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiskStage::Resolve => "volume group lookup",
            DiskStage::SpaceCheck => "free space check",
            DiskStage::Snapshot => "snapshot creation",
            DiskStage::Copy => "copy",
            DiskStage::Verify => "snapshot verification",
            DiskStage::Cleanup => "cleanup",
        };
        f.write_str(s)
    }
}

/// How one disk's backup attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DiskOutcome {
    /// Compressed image written and the snapshot did not overflow.
    BackedUp { output: PathBuf, fullness: f64 },
    /// Not enough free space in the backup directory; nothing was touched.
    Skipped { free_gb: u64, required_gb: u64 },
    /// Snapshot overflowed during the copy; the output was deleted.
    RolledBack { fullness: f64 },
    /// Only recorded under `on_error = "continue"`.
    Failed { stage: DiskStage, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskReport {
    pub source: String,
    #[serde(flatten)]
    pub outcome: DiskOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmReport {
    pub name: String,
    pub disks: Vec<DiskReport>,
    /// Set when the VM could not be resolved or its disks listed.
    pub error: Option<String>,
}

impl VmReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            disks: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub vms: Vec<VmReport>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            vms: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn disks(&self) -> impl Iterator<Item = &DiskReport> {
        self.vms.iter().flat_map(|vm| vm.disks.iter())
    }

    fn count(&self, pred: impl Fn(&DiskOutcome) -> bool) -> usize {
        self.disks().filter(|d| pred(&d.outcome)).count()
    }

    pub fn backed_up(&self) -> usize {
        self.count(|o| matches!(o, DiskOutcome::BackedUp { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DiskOutcome::Skipped { .. }))
    }

    pub fn rolled_back(&self) -> usize {
        self.count(|o| matches!(o, DiskOutcome::RolledBack { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DiskOutcome::Failed { .. }))
            + self.vms.iter().filter(|vm| vm.error.is_some()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn log_summary(&self) {
        info!(
            vms = self.vms.len(),
            backed_up = self.backed_up(),
            skipped = self.skipped(),
            rolled_back = self.rolled_back(),
            failed = self.failed(),
            "Backup run finished"
        );
    }
}
