//! # machinestate Telemetry
//!
//! Cross-platform machine-state probes: static machine identity/info and
//! dynamic resource usage (CPU, memory, storage, current-process usage).
//! Heterogeneous OS sources (pseudo-files, platform commands, sysinfo) are
//! normalized into one structured result.
//!
//! ## Important: CPU Usage Measurement
//!
//! CPU counters are cumulative since boot, so [`MachineState::resource_usage_info`]
//! takes about one second: the CPU sampler brackets a fixed window with two
//! counter reads to derive a rate. The sibling probes run concurrently and
//! are not delayed by the window.

pub mod cpu;
pub mod error;
pub mod identity;
pub mod memory;
pub mod os;
pub mod process;
pub mod storage;

use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::debug;

pub use error::{Result, TelemetryError};
pub use identity::machine_id;
pub use memory::MemoryStats;
pub use process::{PidSample, ProcessStats, ProcessUsageSource, SysinfoSource};
pub use storage::{StorageStats, StorageStrategy};

/// Static machine identity and hardware summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralInfo {
    /// Stable machine id derived from the first usable MAC address
    pub machine_id: String,
    /// CPU model name
    pub cpu_model: String,
    /// Number of logical cores
    pub cpu_count: usize,
    /// Platform identifier (e.g. "linux", "macos", "windows")
    pub platform: String,
    /// OS distribution/version
    pub os: String,
}

/// Machine-level resource usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachineUsage {
    /// Storage totals across mounted volumes
    pub storage: StorageStats,
    /// Memory totals in MB
    pub memory: MemoryStats,
    /// Aggregate CPU usage in percent over a one-second window
    pub cpu: f64,
}

/// Full resource-usage snapshot, built fresh on every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsageInfo {
    /// Machine-wide usage
    pub machine: MachineUsage,
    /// Usage of the probed process
    pub process: ProcessStats,
}

/// Entry point for machine-state reports.
///
/// Both operations are read-only and keep no state between calls; the
/// machine id is the only memoized value.
pub struct MachineState;

impl MachineState {
    /// Gather the static identity report: machine id, CPU model and count,
    /// platform tag, and the detected OS name.
    pub async fn general_info() -> GeneralInfo {
        let sys = System::new_with_specifics(
            RefreshKind::new().with_cpu(CpuRefreshKind::everything()),
        );
        let cpus = sys.cpus();

        let cpu_model = cpus
            .first()
            .map(|cpu| cpu.brand().to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        let info = GeneralInfo {
            machine_id: identity::machine_id().to_string(),
            cpu_model,
            cpu_count: cpus.len(),
            platform: std::env::consts::OS.to_string(),
            os: os::os_name().await,
        };

        debug!(
            machine_id = %info.machine_id,
            cpu_count = info.cpu_count,
            os = %info.os,
            "Collected general info"
        );

        info
    }

    /// Gather resource usage for the machine and the current process.
    ///
    /// The four probes run concurrently; storage and memory degrade to
    /// zeroed defaults internally, so only a process-usage failure fails
    /// the call.
    pub async fn resource_usage_info() -> Result<ResourceUsageInfo> {
        Self::resource_usage_info_for(std::process::id()).await
    }

    /// Gather resource usage for the machine and an arbitrary process.
    pub async fn resource_usage_info_for(pid: u32) -> Result<ResourceUsageInfo> {
        let (process, storage, cpu, memory) = tokio::join!(
            process::process_usage(pid),
            storage::storage_usage(),
            cpu::average_cpu_usage(),
            memory::memory_usage(),
        );

        let process = process?;

        debug!(
            pid,
            cpu_percent = cpu,
            memory_used_mb = memory.used_mb,
            storage_used_percent = storage.used_percent,
            "Collected resource usage info"
        );

        Ok(ResourceUsageInfo {
            machine: MachineUsage {
                storage,
                memory,
                cpu,
            },
            process,
        })
    }
}

/// Round to two decimal places.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(33.333333), 33.33);
        assert_eq!(round2(66.666666), 66.67);
        assert_eq!(round2(0.0), 0.0);
    }

    #[tokio::test]
    async fn test_general_info_serializes() {
        let info = MachineState::general_info().await;
        let json = serde_json::to_string(&info).expect("report must serialize");
        assert!(json.contains("\"machine_id\""));
        assert!(json.contains("\"cpu_model\""));

        let back: GeneralInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }

    #[tokio::test]
    async fn test_general_info_machine_id_idempotent() {
        let a = MachineState::general_info().await;
        let b = MachineState::general_info().await;
        assert_eq!(a.machine_id, b.machine_id);
        assert_eq!(a.cpu_count, b.cpu_count);
        assert!(a.cpu_count > 0);
    }
}
