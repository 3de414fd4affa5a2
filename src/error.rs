//! Error types for kvm-disk-backup.
//!
//! Capacity skips and snapshot overflow are not errors; they are reported as
//! [`crate::backup::DiskOutcome`] variants.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for backup operations.
pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    // External commands
    #[error("ERROR executing {command:?} (exit {status:?})")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("Failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} failed: {hint}")]
    Privilege {
        operation: String,
        hint: String,
        #[source]
        source: Box<BackupError>,
    },

    #[error("Unexpected {what} output: {output:?}")]
    Parse { what: &'static str, output: String },

    // Virtualization layer
    #[error(
        "Cannot connect to {uri}: {reason}. The user should belong to the libvirt group \
         and this tool must run on the hypervisor host"
    )]
    Connection { uri: String, reason: String },

    #[error("VM not found: {name}: {reason}")]
    VmNotFound { name: String, reason: String },

    #[error("Invalid domain descriptor: {reason}")]
    Descriptor { reason: String },

    // Run setup
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Cannot lock {path:?}: {reason}")]
    Lock { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// Errors that end the whole run no matter the configured policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BackupError::Privilege { .. }
                | BackupError::Connection { .. }
                | BackupError::Lock { .. }
                | BackupError::Config { .. }
        )
    }

    /// Wrap a failed command with a privilege hint.
    pub(crate) fn privilege(operation: impl Into<String>, hint: impl Into<String>, source: BackupError) -> Self {
        BackupError::Privilege {
            operation: operation.into(),
            hint: hint.into(),
            source: Box::new(source),
        }
    }
}
