//! Storage usage probing.
//!
//! One probe contract, two interchangeable strategies:
//!
//! - [`StorageStrategy::Volumes`] (default) enumerates the mounted volumes
//!   through sysinfo and sums size/free space across them.
//! - [`StorageStrategy::DiskFree`] shells out to `df -kP` and parses its
//!   tabular output, mapping columns by header name.
//!
//! Both degrade to the all-zero [`StorageStats`] on any failure; this probe
//! never errors.

use std::collections::HashSet;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use sysinfo::Disks;
use tokio::process::Command;
use tracing::debug;

use crate::round2;

/// Mount point queried by the disk-free strategy.
const ROOT_MOUNT: &str = "/";

/// Aggregated storage figures.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StorageStats {
    /// Total storage in bytes
    pub total_bytes: u64,
    /// Used storage in bytes
    pub used_bytes: u64,
    /// Used percentage, rounded to two decimals
    pub used_percent: f64,
}

impl StorageStats {
    /// Build stats from totals, deriving the percentage.
    fn from_totals(total_bytes: u64, used_bytes: u64) -> Self {
        let used_percent = if total_bytes > 0 {
            round2(used_bytes as f64 / total_bytes as f64 * 100.0)
        } else {
            0.0
        };

        Self {
            total_bytes,
            used_bytes,
            used_percent,
        }
    }
}

/// Storage acquisition strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageStrategy {
    /// Enumerate mounted volumes and query each for size and free space.
    #[default]
    Volumes,
    /// Parse the tabular output of `df -kP` for the root mount.
    DiskFree,
}

/// Aggregate total/used storage with the default strategy.
pub async fn storage_usage() -> StorageStats {
    storage_usage_with(StorageStrategy::default()).await
}

/// Aggregate total/used storage with an explicit strategy.
pub async fn storage_usage_with(strategy: StorageStrategy) -> StorageStats {
    let stats = match strategy {
        // When volume enumeration yields nothing, degrade to querying the
        // single well-known root mount before giving up.
        StorageStrategy::Volumes => match volumes_usage() {
            Some(stats) => Some(stats),
            None => disk_free_usage().await,
        },
        StorageStrategy::DiskFree => disk_free_usage().await,
    };

    match stats {
        Some(stats) => stats,
        None => {
            debug!(?strategy, "Storage probe degraded to zeroed default");
            StorageStats::default()
        }
    }
}

/// Sum size and free space across the mounted volumes.
///
/// Mount points are deduplicated: the same filesystem visible under one
/// mount must not count twice.
fn volumes_usage() -> Option<StorageStats> {
    let disks = Disks::new_with_refreshed_list();

    let mut seen = HashSet::new();
    let mut total = 0u64;
    let mut available = 0u64;

    for disk in disks.list() {
        if !seen.insert(disk.mount_point().to_path_buf()) {
            continue;
        }
        total += disk.total_space();
        available += disk.available_space();
    }

    if seen.is_empty() {
        return None;
    }

    Some(StorageStats::from_totals(total, total.saturating_sub(available)))
}

/// Query the root mount through `df -kP`.
async fn disk_free_usage() -> Option<StorageStats> {
    let output = Command::new("df")
        .arg("-kP")
        .stdout(Stdio::piped())
        .output()
        .await;

    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(_) => return None,
        Err(err) => {
            debug!(error = %err, "df invocation failed");
            return None;
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let row = disk_free_row(&stdout, ROOT_MOUNT)?;

    let drive = row.drive_usage();
    debug!(
        total_gb = drive.total_gb,
        used_gb = drive.used_gb,
        used_percent = drive.used_percent,
        "Resolved drive usage from df"
    );

    Some(StorageStats::from_totals(
        row.blocks_kb * 1024,
        row.used_kb * 1024,
    ))
}

/// A data row of `df -kP` output, resolved by header-name column mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DfRow {
    blocks_kb: u64,
    used_kb: u64,
    mounted_on: String,
}

impl DfRow {
    /// Derive the GB-level figures of this row: KB are first ceiled into MB,
    /// GB fields and the percentage are rounded to a single decimal.
    fn drive_usage(&self) -> DriveUsage {
        let total_mb = (self.blocks_kb as f64 / 1024.0).ceil();
        let used_mb = (self.used_kb as f64 / 1024.0).ceil();

        let total_gb = round1(total_mb / 1024.0);
        let used_gb = round1(used_mb / 1024.0);
        let used_percent = if total_gb > 0.0 {
            round1(100.0 * used_gb / total_gb)
        } else {
            0.0
        };

        DriveUsage {
            total_gb,
            used_gb,
            used_percent,
        }
    }
}

/// GB-level drive figures with single-decimal rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DriveUsage {
    total_gb: f64,
    used_gb: f64,
    used_percent: f64,
}

/// Locate the row mounted at `mount` in `df -kP` output.
///
/// The first line is a header defining column names; data-row columns are
/// mapped by those names. When no row matches the queried mount exactly,
/// the row mounted at the filesystem root is used instead.
fn disk_free_row(stdout: &str, mount: &str) -> Option<DfRow> {
    let mut lines = stdout.lines();

    let header = split_columns(lines.next()?, 6);
    let blocks_idx = header
        .iter()
        .position(|c| c == "1K-blocks" || c == "1024-blocks")?;
    let used_idx = header.iter().position(|c| c == "Used")?;
    let mount_idx = header.iter().position(|c| c == "Mounted on")?;

    let mut exact: Option<DfRow> = None;
    let mut root: Option<DfRow> = None;

    for line in lines {
        let fields = split_columns(line, header.len());
        if fields.len() != header.len() {
            continue;
        }

        // A malformed row must not cost us the rows that do parse.
        let (Ok(blocks_kb), Ok(used_kb)) = (
            fields[blocks_idx].parse::<u64>(),
            fields[used_idx].parse::<u64>(),
        ) else {
            continue;
        };

        let row = DfRow {
            blocks_kb,
            used_kb,
            mounted_on: fields[mount_idx].clone(),
        };

        if row.mounted_on == mount {
            exact = Some(row);
        } else if row.mounted_on == ROOT_MOUNT && root.is_none() {
            root = Some(row);
        }
    }

    exact.or(root)
}

/// Split a df line into `count` columns: `count - 1` whitespace-separated
/// fields, with the remainder joined as the final column (mount points may
/// contain spaces).
fn split_columns(line: &str, count: usize) -> Vec<String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < count {
        return tokens.into_iter().map(str::to_string).collect();
    }

    let mut columns: Vec<String> = tokens[..count - 1]
        .iter()
        .map(|t| t.to_string())
        .collect();
    columns.push(tokens[count - 1..].join(" "));
    columns
}

/// Round to a single decimal place.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const DF_OUTPUT: &str = "\
Filesystem 1K-blocks Used Available Use% Mounted on
/dev/sda1 102400 51200 51200 50% /
/dev/sdb1 204800 102400 102400 50% /data
tmpfs 8192 0 8192 0% /run
";

    #[test]
    fn test_from_totals_percentage() {
        let stats = StorageStats::from_totals(1000, 333);
        assert_eq!(stats.used_percent, 33.3);

        let stats = StorageStats::from_totals(3, 1);
        assert_eq!(stats.used_percent, 33.33);
    }

    #[test]
    fn test_from_totals_zero_total() {
        let stats = StorageStats::from_totals(0, 0);
        assert_eq!(stats, StorageStats::default());
        assert_eq!(stats.used_percent, 0.0);
    }

    #[test]
    fn test_disk_free_row_header_mapping() {
        let row = disk_free_row(DF_OUTPUT, "/data").unwrap();
        assert_eq!(row.blocks_kb, 204_800);
        assert_eq!(row.used_kb, 102_400);
        assert_eq!(row.mounted_on, "/data");
    }

    #[test]
    fn test_disk_free_row_falls_back_to_root() {
        let row = disk_free_row(DF_OUTPUT, "/does-not-exist").unwrap();
        assert_eq!(row.mounted_on, "/");
        assert_eq!(row.blocks_kb, 102_400);
    }

    #[test]
    fn test_disk_free_row_alternate_blocks_header() {
        let bsd = "\
Filesystem 1024-blocks Used Available Capacity Mounted on
/dev/wd0a 102400 51200 51200 50% /
";
        let row = disk_free_row(bsd, "/").unwrap();
        assert_eq!(row.blocks_kb, 102_400);
    }

    #[test]
    fn test_disk_free_row_skips_unparsable_rows() {
        // Pseudo-filesystems sometimes report "-" or "none" in the numeric
        // columns; such rows are skipped and must not discard the root row.
        let out = "\
Filesystem 1K-blocks Used Available Use% Mounted on
map auto_home none - - 0% /System/Volumes/Data/home
/dev/sda1 102400 51200 51200 50% /
";
        let row = disk_free_row(out, "/").unwrap();
        assert_eq!(row.mounted_on, "/");
        assert_eq!(row.blocks_kb, 102_400);
        assert_eq!(row.used_kb, 51_200);
    }

    #[test]
    fn test_disk_free_row_rejects_garbage() {
        assert_eq!(disk_free_row("", "/"), None);
        assert_eq!(disk_free_row("no header here\n", "/"), None);
    }

    #[test]
    fn test_drive_usage_conversions() {
        // 102400 KB -> ceil(100 MB) -> round1(0.0976.. GB) = 0.1 GB.
        let row = disk_free_row(DF_OUTPUT, "/").unwrap();
        let usage = row.drive_usage();
        assert_eq!(usage.total_gb, 0.1);
        // 51200 KB used -> 50 MB -> round1(0.0488.. GB) = 0.0 GB.
        assert_eq!(usage.used_gb, 0.0);
        assert_eq!(usage.used_percent, 0.0);
    }

    #[test]
    fn test_drive_usage_full_disk() {
        let full = "\
Filesystem 1K-blocks Used Available Use% Mounted on
/dev/sda1 102400 102400 0 100% /
";
        let usage = disk_free_row(full, "/").unwrap().drive_usage();
        assert_eq!(usage.total_gb, 0.1);
        assert_eq!(usage.used_gb, 0.1);
        assert_eq!(usage.used_percent, 100.0);
    }

    #[test]
    fn test_df_row_into_storage_stats() {
        let row = disk_free_row(DF_OUTPUT, "/").unwrap();
        let stats = StorageStats::from_totals(row.blocks_kb * 1024, row.used_kb * 1024);
        assert_eq!(stats.total_bytes, 102_400 * 1024);
        assert_eq!(stats.used_bytes, 51_200 * 1024);
        assert_eq!(stats.used_percent, 50.0);
    }

    #[test]
    fn test_split_columns_merges_trailing_mount() {
        let cols = split_columns("/dev/sda1 10 5 5 50% /mnt/My Disk", 6);
        assert_eq!(cols.len(), 6);
        assert_eq!(cols[5], "/mnt/My Disk");
    }

    #[tokio::test]
    async fn test_storage_usage_invariants() {
        let stats = storage_usage().await;
        assert!(stats.used_bytes <= stats.total_bytes);
        assert!((0.0..=100.0).contains(&stats.used_percent));
        if stats.total_bytes == 0 {
            assert_eq!(stats.used_percent, 0.0);
        }
    }
}
