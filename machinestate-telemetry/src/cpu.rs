//! Aggregate CPU usage sampling.
//!
//! CPU counters are cumulative since boot, so a single read cannot yield a
//! rate; the sampler takes two tick snapshots exactly one second apart and
//! derives utilization from the idle/total deltas. The one-second wait is an
//! async sleep and does not hold up sibling probes.

use std::time::Duration;

use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::debug;

use crate::round2;

/// Wall-clock window between the two tick snapshots.
const SAMPLE_WINDOW: Duration = Duration::from_millis(1000);

/// Per-instant tick snapshot, averaged over logical cores.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CpuSample {
    avg_idle: f64,
    avg_total: f64,
}

/// Measure aggregate CPU utilization over a one-second window.
///
/// Returns a percentage rounded to two decimals. A degenerate window
/// (no tick progress between the snapshots) yields `0.0`.
pub async fn average_cpu_usage() -> f64 {
    if let Some(start) = read_tick_sample() {
        tokio::time::sleep(SAMPLE_WINDOW).await;
        if let Some(end) = read_tick_sample() {
            let usage = cpu_percentage(start, end);
            debug!(usage_percent = usage, "Sampled CPU usage from tick counters");
            return usage;
        }
    }

    // No tick source on this platform; measure the same window through
    // sysinfo's usage counters instead.
    sysinfo_cpu_usage().await
}

/// Utilization from two tick snapshots:
/// `(10000 - round(10000 * idle_diff / total_diff)) / 100`.
fn cpu_percentage(start: CpuSample, end: CpuSample) -> f64 {
    let idle_diff = end.avg_idle - start.avg_idle;
    let total_diff = end.avg_total - start.avg_total;

    if total_diff == 0.0 {
        return 0.0;
    }

    let scaled = (10000.0 * idle_diff / total_diff).round();
    if !scaled.is_finite() {
        return 0.0;
    }

    (10000.0 - scaled) / 100.0
}

/// Read per-core tick counters from `/proc/stat`.
#[cfg(target_os = "linux")]
fn read_tick_sample() -> Option<CpuSample> {
    let content = std::fs::read_to_string("/proc/stat").ok()?;
    parse_proc_stat(&content)
}

#[cfg(not(target_os = "linux"))]
fn read_tick_sample() -> Option<CpuSample> {
    None
}

/// Parse the per-core `cpuN` lines of `/proc/stat` into an averaged sample.
///
/// Each line holds the time-category tick counters for one core; the idle
/// category is the fourth field.
fn parse_proc_stat(content: &str) -> Option<CpuSample> {
    let mut total_idle = 0u64;
    let mut total_tick = 0u64;
    let mut cores = 0usize;

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else {
            continue;
        };

        // Per-core lines only; the aggregate "cpu" line would double-count.
        if !label.starts_with("cpu") || label == "cpu" {
            continue;
        }

        let ticks: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
        if ticks.len() < 4 {
            continue;
        }

        total_tick += ticks.iter().sum::<u64>();
        total_idle += ticks[3];
        cores += 1;
    }

    if cores == 0 {
        return None;
    }

    Some(CpuSample {
        avg_idle: total_idle as f64 / cores as f64,
        avg_total: total_tick as f64 / cores as f64,
    })
}

/// Fallback sampler built on sysinfo's usage counters over the same window.
async fn sysinfo_cpu_usage() -> f64 {
    let mut sys = System::new_with_specifics(
        RefreshKind::new().with_cpu(CpuRefreshKind::new().with_cpu_usage()),
    );

    tokio::time::sleep(SAMPLE_WINDOW).await;
    sys.refresh_cpu_usage();

    let usage = round2(sys.global_cpu_usage() as f64);
    debug!(usage_percent = usage, "Sampled CPU usage via sysinfo");
    usage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_percentage_matches_formula() {
        let start = CpuSample { avg_idle: 0.0, avg_total: 0.0 };
        let end = CpuSample { avg_idle: 25.0, avg_total: 100.0 };
        // 10000 * 25 / 100 = 2500 -> (10000 - 2500) / 100
        assert_eq!(cpu_percentage(start, end), 75.0);
    }

    #[test]
    fn test_cpu_percentage_rounds_at_four_digit_precision() {
        let start = CpuSample { avg_idle: 0.0, avg_total: 0.0 };
        let end = CpuSample { avg_idle: 1.0, avg_total: 3.0 };
        // 10000 / 3 = 3333.33.. -> round -> 3333 -> 66.67
        assert_eq!(cpu_percentage(start, end), 66.67);
    }

    #[test]
    fn test_cpu_percentage_fully_idle_is_zero() {
        let start = CpuSample { avg_idle: 100.0, avg_total: 400.0 };
        let end = CpuSample { avg_idle: 200.0, avg_total: 500.0 };
        assert_eq!(cpu_percentage(start, end), 0.0);
    }

    #[test]
    fn test_cpu_percentage_never_exceeds_hundred() {
        let start = CpuSample { avg_idle: 0.0, avg_total: 0.0 };
        let end = CpuSample { avg_idle: 0.0, avg_total: 1000.0 };
        assert_eq!(cpu_percentage(start, end), 100.0);
    }

    #[test]
    fn test_cpu_percentage_zero_total_diff() {
        let sample = CpuSample { avg_idle: 42.0, avg_total: 42.0 };
        assert_eq!(cpu_percentage(sample, sample), 0.0);

        // Idle moving with no total progress must not produce a non-finite
        // result either.
        let end = CpuSample { avg_idle: 50.0, avg_total: 42.0 };
        assert_eq!(cpu_percentage(sample, end), 0.0);
    }

    #[test]
    fn test_parse_proc_stat() {
        let content = "\
cpu  200 0 200 600 0 0 0 0 0 0
cpu0 100 0 100 300 0 0 0 0 0 0
cpu1 100 0 100 300 0 0 0 0 0 0
intr 12345
ctxt 6789
";
        let sample = parse_proc_stat(content).unwrap();
        assert_eq!(sample.avg_idle, 300.0);
        assert_eq!(sample.avg_total, 500.0);
    }

    #[test]
    fn test_parse_proc_stat_without_core_lines() {
        assert_eq!(parse_proc_stat("intr 12345\nctxt 6789\n"), None);
        assert_eq!(parse_proc_stat(""), None);
    }
}
