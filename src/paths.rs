//! Standard locations for kvm-disk-backup.
//!
//! - Config: `$XDG_CONFIG_HOME/kvm-disk-backup/config.toml`
//!   (`~/.config/kvm-disk-backup/config.toml`)
//! - Logs:   `$XDG_DATA_HOME/kvm-disk-backup/logs/`
//!   (`~/.local/share/kvm-disk-backup/logs/`)
//!
//! When run as root without `HOME`, `/etc` and `/var/log` are used.

use std::path::{Path, PathBuf};

const APP_NAME: &str = "kvm-disk-backup";
const CONFIG_FILE: &str = "config.toml";

/// Name of the advisory lock file created inside the backup directory.
pub const LOCK_FILE: &str = ".kvm-disk-backup.lock";

#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Default config file (may not exist).
    pub config_file: PathBuf,
    /// Directory for the optional file log.
    pub logs: PathBuf,
}

impl AppPaths {
    /// Resolve from the environment. Does not create anything.
    pub fn resolve() -> Self {
        match std::env::var("HOME").ok().map(PathBuf::from) {
            Some(home) => Self {
                config_file: resolve_config_dir(&home).join(CONFIG_FILE),
                logs: resolve_log_dir(&home),
            },
            None => Self {
                config_file: PathBuf::from("/etc").join(APP_NAME).join(CONFIG_FILE),
                logs: PathBuf::from("/var/log").join(APP_NAME),
            },
        }
    }
}

fn resolve_config_dir(home: &Path) -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join(APP_NAME)
    } else {
        home.join(".config").join(APP_NAME)
    }
}

fn resolve_log_dir(home: &Path) -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg).join(APP_NAME).join("logs")
    } else {
        home.join(".local").join("share").join(APP_NAME).join("logs")
    }
}
