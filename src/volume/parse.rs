//! Parsers for the human-oriented output of `lvdisplay`, `lvs` and `df`.
//!
//! Each parser accepts exactly one output shape and returns
//! [`BackupError::Parse`] when the tool prints something else, so format
//! drift surfaces as an error instead of a wrong number.

use crate::error::{BackupError, Result};

const KIB_PER_GIB: u64 = 1024 * 1024;

fn parse_error(what: &'static str, output: &str) -> BackupError {
    BackupError::Parse {
        what,
        output: output.trim().to_string(),
    }
}

/// Value of the `VG Name` line in `lvdisplay <lv>` output.
pub fn volume_group(output: &str) -> Result<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("VG Name"))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| parse_error("lvdisplay VG Name", output))
}

/// `LV Path` values from `lvdisplay` whose path contains `hint`, skipping
/// backup snapshots.
pub fn volume_paths(output: &str, hint: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("LV Path"))
        .map(str::trim)
        .filter(|path| path.contains(hint) && !path.contains("backup"))
        .map(str::to_string)
        .collect()
}

/// The single `data_percent` value printed by
/// `lvs --noheadings --options data_percent <vg>/<lv>`.
pub fn data_percent(output: &str) -> Result<f64> {
    let value = output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| parse_error("lvs data_percent", output))?;

    // Some locales print a decimal comma.
    let value = value.trim_end_matches('%').replace(',', ".");
    value
        .parse::<f64>()
        .ok()
        .filter(|percent| percent.is_finite() && *percent >= 0.0)
        .ok_or_else(|| parse_error("lvs data_percent", output))
}

/// Available space in whole GiB from `df --block-size=1K --output=avail <dir>`.
///
/// The first line is the column header; the value below it is in KiB and is
/// rounded down.
pub fn available_gb(output: &str) -> Result<u64> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    match (lines.next(), lines.next()) {
        (Some(header), Some(value)) if header.eq_ignore_ascii_case("avail") => value
            .parse::<u64>()
            .map(|kib| kib / KIB_PER_GIB)
            .map_err(|_| parse_error("df avail", output)),
        _ => Err(parse_error("df avail", output)),
    }
}
