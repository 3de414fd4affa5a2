//! Volume manager, filesystem and copy commands.
//!
//! One method per external tool invocation:
//!
//! ```text
//! resolve_volume_group  →  lvdisplay <lv>
//! locate                →  lvdisplay
//! create_snapshot       →  lvcreate --snapshot --size <N>G --name <name>_backup <lv>
//! copy_compress         →  dd if=<snap> | gzip -c | dd of=<out>
//! remove_snapshot       →  lvremove -f <snap>
//! snapshot_fullness     →  lvs --noheadings --options data_percent <vg>/<snap>
//! free_space_gb         →  df --block-size=1K --output=avail <dir>
//! ```

use std::path::Path;

use tracing::debug;

use crate::command::{CommandRunner, ShellCommand, shell_quote};
use crate::error::{BackupError, Result};
use crate::volume::parse;
use crate::volume::record::VolumeRecord;

/// Wraps a [`CommandRunner`] with the volume operations.
pub struct VolumeOps<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
}

impl<'a, R: CommandRunner + ?Sized> VolumeOps<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Self { runner }
    }

    async fn run_text(&self, command: ShellCommand) -> Result<String> {
        let output = self.runner.run(&command).await?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Owning volume group of `volume_path`.
    ///
    /// A failed query almost always means missing privileges, so it comes
    /// back as [`BackupError::Privilege`].
    pub async fn resolve_volume_group(&self, volume_path: &str) -> Result<String> {
        let output = self
            .run_text(ShellCommand::new("lvdisplay").arg(volume_path))
            .await
            .map_err(|e| match e {
                e @ BackupError::CommandFailed { .. } => BackupError::privilege(
                    format!("Volume group lookup for {volume_path}"),
                    "probably you need to run this tool as root",
                    e,
                ),
                other => other,
            })?;
        let vg = parse::volume_group(&output)?;
        debug!(volume = volume_path, volume_group = %vg, "Resolved volume group");
        Ok(vg)
    }

    /// Paths of logical volumes whose path contains `hint`, excluding
    /// backup snapshots.
    pub async fn locate(&self, hint: &str) -> Result<Vec<String>> {
        let output = self.run_text(ShellCommand::new("lvdisplay")).await?;
        Ok(parse::volume_paths(&output, hint))
    }

    /// Copy-on-write snapshot of `size_gb` GiB named `<name>_backup`.
    pub async fn create_snapshot(&self, volume: &VolumeRecord, size_gb: u64) -> Result<()> {
        let command = ShellCommand::new("lvcreate")
            .args(["--snapshot", "--size"])
            .arg(format!("{size_gb}G"))
            .arg("--name")
            .arg(volume.snapshot_name())
            .arg(volume.path());
        self.runner.run(&command).await.map_err(|e| match e {
            e @ BackupError::CommandFailed { .. } => BackupError::privilege(
                format!("Snapshot creation of {}", volume.path()),
                format!(
                    "either you are not root or the LV {:?} already exists",
                    volume.snapshot_path()
                ),
                e,
            ),
            other => other,
        })?;
        Ok(())
    }

    /// Stream the snapshot through gzip into the record's output path.
    pub async fn copy_compress(&self, volume: &VolumeRecord, block_size: u64) -> Result<()> {
        let script = format!(
            "dd if={snapshot} bs={block_size} | gzip -c | dd of={output} bs={block_size}",
            snapshot = shell_quote(&volume.snapshot_path()),
            output = shell_quote(&volume.output_path().to_string_lossy()),
        );
        self.runner.run(&ShellCommand::pipeline(script)).await?;
        Ok(())
    }

    pub async fn remove_snapshot(&self, volume: &VolumeRecord) -> Result<()> {
        let command = ShellCommand::new("lvremove")
            .arg("-f")
            .arg(volume.snapshot_path());
        self.runner.run(&command).await?;
        Ok(())
    }

    /// Percentage of the snapshot's copy-on-write space in use.
    pub async fn snapshot_fullness(&self, volume: &VolumeRecord) -> Result<f64> {
        let output = self
            .run_text(
                ShellCommand::new("lvs")
                    .args(["--noheadings", "--options", "data_percent"])
                    .arg(volume.snapshot_spec()),
            )
            .await?;
        parse::data_percent(&output)
    }

    /// Free space of the filesystem holding `path`, in whole GiB.
    pub async fn free_space_gb(&self, path: &Path) -> Result<u64> {
        let output = self
            .run_text(
                ShellCommand::new("df")
                    .args(["--block-size=1K", "--output=avail"])
                    .arg(path.to_string_lossy()),
            )
            .await?;
        parse::available_gb(&output)
    }
}
