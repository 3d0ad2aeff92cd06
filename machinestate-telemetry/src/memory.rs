//! Memory usage probing.
//!
//! Primary source is the head of `/proc/meminfo`; when that is unavailable
//! or malformed the probe falls back to sysinfo's totals, and on macOS the
//! fallback figures are replaced by `sysctl hw.memsize` plus `vm_stat` page
//! accounting. This probe never errors.

use std::process::Stdio;

use serde::{Deserialize, Serialize};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tokio::process::Command;
use tracing::debug;

use crate::round2;

/// Page size assumed for `vm_stat` figures, in bytes.
const DARWIN_PAGE_SIZE: u64 = 4096;

/// Machine memory totals in megabytes, rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Total physical memory in MB
    pub total_mb: f64,
    /// Used memory in MB
    pub used_mb: f64,
}

/// Resolve total/used memory for the host.
pub async fn memory_usage() -> MemoryStats {
    if let Ok(text) = tokio::fs::read_to_string("/proc/meminfo").await {
        if let Some(stats) = parse_meminfo_head(&text) {
            return stats;
        }
        debug!("meminfo head missing expected numeric tokens; falling back");
    }

    if cfg!(target_os = "macos") {
        if let Some(stats) = darwin_memory().await {
            return stats;
        }
    }

    sysinfo_memory()
}

/// Parse the first five lines of `/proc/meminfo`.
///
/// Expects at least five numeric tokens in KB: total, free, available,
/// buffers, cached. Buffers and cached count as reclaimable, so they join
/// free for the effective-free figure.
fn parse_meminfo_head(text: &str) -> Option<MemoryStats> {
    let tokens: Vec<u64> = text
        .lines()
        .take(5)
        .flat_map(|line| line.split_whitespace())
        .filter_map(|field| field.parse().ok())
        .collect();

    if tokens.len() < 5 {
        return None;
    }

    let total_kb = tokens[0];
    let free_kb = tokens[1] + tokens[3] + tokens[4];
    let used_kb = total_kb.saturating_sub(free_kb);

    Some(MemoryStats {
        total_mb: round2(total_kb as f64 / 1024.0),
        used_mb: round2(used_kb as f64 / 1024.0),
    })
}

/// OS-reported totals via sysinfo.
fn sysinfo_memory() -> MemoryStats {
    let sys = System::new_with_specifics(
        RefreshKind::new().with_memory(MemoryRefreshKind::new().with_ram()),
    );

    let total = sys.total_memory();
    let free = sys.free_memory();
    let used = total.saturating_sub(free);

    MemoryStats {
        total_mb: round2(total as f64 / 1024.0 / 1024.0),
        used_mb: round2(used as f64 / 1024.0 / 1024.0),
    }
}

/// macOS memory accounting from `sysctl hw.memsize` and `vm_stat`.
async fn darwin_memory() -> Option<MemoryStats> {
    let total = darwin_physical_memory().await?;
    let vm = parse_vm_stat(&command_output("vm_stat", &[]).await?)?;
    let used = vm.used_bytes();

    Some(MemoryStats {
        total_mb: round2(total as f64 / 1024.0 / 1024.0),
        used_mb: round2(used as f64 / 1024.0 / 1024.0),
    })
}

/// Total physical memory in bytes, from `sysctl hw.memsize`.
async fn darwin_physical_memory() -> Option<u64> {
    let out = command_output("sysctl", &["hw.memsize"]).await?;
    // "hw.memsize: 34359738368"
    out.trim().split_whitespace().nth(1)?.parse().ok()
}

/// Page categories reported by `vm_stat`, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct VmStat {
    app: u64,
    wired: u64,
    active: u64,
    inactive: u64,
    compressed: u64,
}

impl VmStat {
    /// Used memory counts wired, active, and inactive pages.
    fn used_bytes(&self) -> u64 {
        self.wired + self.active + self.inactive
    }
}

/// Parse `vm_stat` output into page-category byte counts.
///
/// Each relevant line has the shape `"Pages active:              620959."`;
/// the count is multiplied by the 4096-byte page size.
fn parse_vm_stat(out: &str) -> Option<VmStat> {
    let mut stat = VmStat::default();
    let mut matched = false;

    for line in out.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let Ok(pages) = value.trim().trim_end_matches('.').parse::<u64>() else {
            continue;
        };
        let bytes = pages * DARWIN_PAGE_SIZE;

        match key.trim() {
            "Anonymous pages" => stat.app = bytes,
            "Pages wired down" => stat.wired = bytes,
            "Pages active" => stat.active = bytes,
            "Pages inactive" => stat.inactive = bytes,
            "Pages occupied by compressor" => stat.compressed = bytes,
            _ => continue,
        }
        matched = true;
    }

    if matched {
        Some(stat)
    } else {
        None
    }
}

/// Run a command and capture stdout; `None` on any failure.
async fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) if !output.stdout.is_empty() => {
            Some(String::from_utf8_lossy(&output.stdout).to_string())
        }
        Ok(_) => None,
        Err(err) => {
            debug!(command = program, error = %err, "Command failed");
            None
        }
    }
}
