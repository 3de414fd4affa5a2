use std::path::{Path, PathBuf};

use serde::Serialize;

/// Suffix appended to a volume's path and name to form its snapshot.
pub const SNAPSHOT_SUFFIX: &str = "_backup";

/// Names derived from a source volume path and a backup directory.
///
/// Pure data: constructing the same record twice from the same inputs yields
/// the same names. Whether the snapshot exists is owned by the volume
/// manager, not tracked here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeRecord {
    path: String,
    name: String,
    volume_group: String,
    output_path: PathBuf,
}

impl VolumeRecord {
    pub fn new(path: impl Into<String>, backup_dir: &Path, volume_group: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        let output_path = backup_dir.join(format!("{name}.gz"));
        Self {
            path,
            name,
            volume_group: volume_group.into(),
            output_path,
        }
    }

    /// Absolute path of the source volume, e.g. `/dev/vg0/lv-vm1`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment, e.g. `lv-vm1`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn volume_group(&self) -> &str {
        &self.volume_group
    }

    /// `/dev/vg0/lv-vm1_backup`
    pub fn snapshot_path(&self) -> String {
        format!("{}{SNAPSHOT_SUFFIX}", self.path)
    }

    /// `lv-vm1_backup`
    pub fn snapshot_name(&self) -> String {
        format!("{}{SNAPSHOT_SUFFIX}", self.name)
    }

    /// `vg0/lv-vm1_backup`, the form `lvs` expects.
    pub fn snapshot_spec(&self) -> String {
        format!("{}/{}", self.volume_group, self.snapshot_name())
    }

    /// `<backup_dir>/lv-vm1.gz`
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}
