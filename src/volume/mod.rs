//! Logical volumes backing VM disks.
//!
//! [`VolumeRecord`] holds the names derived from one source volume path;
//! [`VolumeOps`] issues the volume manager, filesystem and copy commands
//! against it. Nothing here caches external state: snapshot existence and
//! fullness are always a fresh round-trip to the tool.

pub mod ops;
pub mod parse;
pub mod record;

pub use ops::VolumeOps;
pub use record::VolumeRecord;
