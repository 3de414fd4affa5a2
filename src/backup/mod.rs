//! Backup orchestration.
//!
//! ```text
//! run()
//!   for vm in config.vms
//!     Hypervisor::lookup → disk_sources
//!     for source in disk sources
//!       Resolve     lvdisplay        → VolumeRecord
//!       SpaceCheck  df               → Skipped if free < min_free_gb
//!       Snapshot    lvcreate
//!       Copy        dd | gzip | dd
//!       Verify      lvs data_percent → RolledBack if ≥ 100% (output deleted)
//!       Cleanup     lvremove         (on every path once the snapshot exists)
//! ```
//!
//! Strictly sequential: one VM, one disk, one command at a time. The copy
//! degrades the live volume's I/O while the snapshot exists, so it runs
//! right after the snapshot is created.

pub mod lock;
pub mod report;

use std::io::ErrorKind;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::command::CommandRunner;
use crate::config::{BackupConfig, ErrorPolicy};
use crate::error::{BackupError, Result};
use crate::vm::Hypervisor;
use crate::volume::{VolumeOps, VolumeRecord};

pub use lock::DirLock;
pub use report::{DiskOutcome, DiskReport, DiskStage, RunReport, VmReport};

/// Fullness at which a snapshot's captured data is no longer trustworthy.
pub const SNAPSHOT_FULL_PERCENT: f64 = 100.0;

/// A failure while processing one disk.
#[derive(Debug, Error)]
#[error("{stage} failed for {volume}: {source}")]
pub struct DiskError {
    pub volume: String,
    pub stage: DiskStage,
    #[source]
    pub source: BackupError,
}

fn at(stage: DiskStage, volume: &str) -> impl FnOnce(BackupError) -> DiskError + '_ {
    move |source| DiskError {
        volume: volume.to_string(),
        stage,
        source,
    }
}

/// Drives the snapshot → copy → verify → cleanup sequence for every disk
/// of every configured VM.
///
/// Owns the hypervisor connection; it is released when the orchestrator is
/// dropped, whatever way the run ended.
pub struct Orchestrator<R: CommandRunner, H: Hypervisor> {
    config: BackupConfig,
    runner: R,
    hypervisor: H,
}

impl<R: CommandRunner, H: Hypervisor> Orchestrator<R, H> {
    pub fn new(config: BackupConfig, runner: R, hypervisor: H) -> Self {
        Self {
            config,
            runner,
            hypervisor,
        }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn should_abort(&self, err: &BackupError) -> bool {
        err.is_fatal() || self.config.on_error == ErrorPolicy::Abort
    }

    /// Back up every disk of every configured VM.
    ///
    /// Returns `Err` on a fatal error, or on the first failure under
    /// [`ErrorPolicy::Abort`]. Otherwise failures are recorded in the
    /// report and the run continues.
    pub async fn run(&self) -> Result<RunReport> {
        let _lock = if self.config.lock {
            Some(DirLock::acquire(&self.config.backup_dir)?)
        } else {
            None
        };

        let mut report = RunReport::new();

        for vm in &self.config.vms {
            info!(vm = %vm, "Backing up VM {}", vm);
            let mut vm_report = VmReport::new(vm);

            let sources = match self.disk_sources(vm).await {
                Ok(sources) => sources,
                Err(e) if self.should_abort(&e) => return Err(e),
                Err(e) => {
                    error!(vm = %vm, error = %e, "Cannot list disks; skipping VM");
                    vm_report.error = Some(e.to_string());
                    report.vms.push(vm_report);
                    continue;
                }
            };

            for source in sources {
                info!(vm = %vm, disk = %source, "Backing up disk {}", source);
                let outcome = match self.backup_disk(&source).await {
                    Ok(outcome) => outcome,
                    Err(e) if self.should_abort(&e.source) => {
                        error!(disk = %source, stage = %e.stage, error = %e.source, "Aborting backup run");
                        return Err(e.source);
                    }
                    Err(e) => {
                        error!(disk = %source, stage = %e.stage, error = %e.source, "Disk backup failed");
                        DiskOutcome::Failed {
                            stage: e.stage,
                            error: e.source.to_string(),
                        }
                    }
                };
                vm_report.disks.push(DiskReport { source, outcome });
            }

            report.vms.push(vm_report);
        }

        report.finish();
        report.log_summary();
        Ok(report)
    }

    /// Resolve `vm` and list its backing source paths. The domain handle
    /// does not outlive this call.
    pub async fn disk_sources(&self, vm: &str) -> Result<Vec<String>> {
        let domain = self.hypervisor.lookup(vm).await?;
        self.hypervisor.disk_sources(&domain).await
    }

    /// Run the full sequence for one disk source.
    pub async fn backup_disk(&self, source: &str) -> std::result::Result<DiskOutcome, DiskError> {
        let ops = VolumeOps::new(&self.runner);

        let volume_group = ops
            .resolve_volume_group(source)
            .await
            .map_err(at(DiskStage::Resolve, source))?;
        let volume = VolumeRecord::new(source, &self.config.backup_dir, volume_group);

        let free_gb = ops
            .free_space_gb(&self.config.backup_dir)
            .await
            .map_err(at(DiskStage::SpaceCheck, source))?;
        let required_gb = self.config.min_free_gb();
        if free_gb < required_gb {
            warn!(
                disk = %source,
                free_gb,
                required_gb,
                backup_dir = %self.config.backup_dir.display(),
                "Not enough free space; skipping disk"
            );
            return Ok(DiskOutcome::Skipped {
                free_gb,
                required_gb,
            });
        }

        info!(snapshot = %volume.snapshot_name(), "Creating snapshot {}", volume.snapshot_name());
        ops.create_snapshot(&volume, self.config.snapshot_size_gb)
            .await
            .map_err(at(DiskStage::Snapshot, source))?;

        // From here on the snapshot exists and must be removed on every path.
        let result = self.copy_and_verify(&ops, &volume).await;
        let removal = ops.remove_snapshot(&volume).await;

        match (result, removal) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(at(DiskStage::Cleanup, source)(e)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(removal)) => {
                error!(
                    snapshot = %volume.snapshot_path(),
                    error = %removal,
                    "Failed to remove snapshot after an earlier failure"
                );
                Err(e)
            }
        }
    }

    async fn copy_and_verify(
        &self,
        ops: &VolumeOps<'_, R>,
        volume: &VolumeRecord,
    ) -> std::result::Result<DiskOutcome, DiskError> {
        let source = volume.path();

        info!(
            snapshot = %volume.snapshot_name(),
            output = %volume.output_path().display(),
            "Backing up snapshot {} to {}",
            volume.snapshot_name(),
            volume.output_path().display()
        );
        if let Err(e) = ops.copy_compress(volume, self.config.block_size).await {
            self.discard_output(volume).await;
            // An overflowed snapshot turns invalid and fails reads, which
            // breaks the pipe. That is a rollback, not a copy failure.
            return match ops.snapshot_fullness(volume).await {
                Ok(fullness) if fullness >= SNAPSHOT_FULL_PERCENT => {
                    error!(
                        snapshot = %volume.snapshot_name(),
                        fullness,
                        error = %e,
                        "ERROR: snapshot {} overflowed during copy. Starting rollback",
                        volume.snapshot_name()
                    );
                    Ok(DiskOutcome::RolledBack { fullness })
                }
                _ => Err(at(DiskStage::Copy, source)(e)),
            };
        }

        let fullness = match ops.snapshot_fullness(volume).await {
            Ok(fullness) => fullness,
            Err(e) => {
                // Without a fullness reading the copy cannot be trusted.
                self.discard_output(volume).await;
                return Err(at(DiskStage::Verify, source)(e));
            }
        };

        if fullness >= SNAPSHOT_FULL_PERCENT {
            error!(
                snapshot = %volume.snapshot_name(),
                fullness,
                "ERROR: snapshot {} is full. Starting rollback",
                volume.snapshot_name()
            );
            remove_output(volume)
                .await
                .map_err(at(DiskStage::Cleanup, source))?;
            return Ok(DiskOutcome::RolledBack { fullness });
        }

        info!(snapshot = %volume.snapshot_name(), fullness, "Removing snapshot {}", volume.snapshot_name());
        Ok(DiskOutcome::BackedUp {
            output: volume.output_path().to_path_buf(),
            fullness,
        })
    }

    async fn discard_output(&self, volume: &VolumeRecord) {
        if let Err(e) = remove_output(volume).await {
            warn!(
                output = %volume.output_path().display(),
                error = %e,
                "Failed to delete partial backup"
            );
        }
    }
}

/// Delete the compressed output; a file that was never written is fine.
async fn remove_output(volume: &VolumeRecord) -> Result<()> {
    match tokio::fs::remove_file(volume.output_path()).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
