//! Per-process usage probing.
//!
//! The per-process collector is a seam: [`ProcessUsageSource`] supplies raw
//! `{cpu percent, resident bytes}` samples for a pid, and the probe only
//! converts units. This is the single probe that surfaces failures to the
//! caller; there is no sane default for "current process" figures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;

use crate::error::{Result, TelemetryError};

/// Per-process usage figures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessStats {
    /// CPU usage in percent
    pub cpu_percent: f64,
    /// Resident memory in MB (decimal mega, bytes / 1e6)
    pub memory_mb: f64,
}

/// Raw sample delivered by a usage source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidSample {
    /// CPU usage in percent
    pub cpu_percent: f64,
    /// Resident memory in bytes
    pub memory_bytes: f64,
}

/// Supplier of raw per-process usage samples.
#[async_trait]
pub trait ProcessUsageSource: Send + Sync {
    /// Sample CPU and resident memory for `pid`.
    async fn sample(&self, pid: u32) -> Result<PidSample>;
}

/// Default source backed by sysinfo.
///
/// Process CPU usage needs two refreshes with a minimum interval between
/// them; a single snapshot would always read zero.
pub struct SysinfoSource;

#[async_trait]
impl ProcessUsageSource for SysinfoSource {
    async fn sample(&self, pid: u32) -> Result<PidSample> {
        let target = Pid::from_u32(pid);
        let refresh = ProcessRefreshKind::new().with_cpu().with_memory();

        let mut sys = System::new();
        sys.refresh_processes_specifics(ProcessesToUpdate::Some(&[target]), true, refresh);
        if sys.process(target).is_none() {
            return Err(TelemetryError::ProcessNotFound(pid));
        }

        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        sys.refresh_processes_specifics(ProcessesToUpdate::Some(&[target]), true, refresh);

        // The process existed at the first refresh, so losing it here means
        // it exited inside the sampling window.
        let process = sys.process(target).ok_or_else(|| {
            TelemetryError::ProcessSample(format!("pid {pid} exited during the sampling window"))
        })?;

        Ok(PidSample {
            cpu_percent: process.cpu_usage() as f64,
            memory_bytes: process.memory() as f64,
        })
    }
}

/// Sample usage of `pid` through the default sysinfo source.
pub async fn process_usage(pid: u32) -> Result<ProcessStats> {
    process_usage_from(&SysinfoSource, pid).await
}

/// Sample usage of `pid` through an explicit source.
pub async fn process_usage_from(
    source: &dyn ProcessUsageSource,
    pid: u32,
) -> Result<ProcessStats> {
    let sample = source.sample(pid).await?;

    let stats = ProcessStats {
        cpu_percent: sample.cpu_percent,
        memory_mb: sample.memory_bytes / 1e6,
    };
    debug!(
        pid,
        cpu_percent = stats.cpu_percent,
        memory_mb = stats.memory_mb,
        "Sampled process usage"
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(PidSample);

    #[async_trait]
    impl ProcessUsageSource for FixedSource {
        async fn sample(&self, _pid: u32) -> Result<PidSample> {
            Ok(self.0)
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ProcessUsageSource for FailingSource {
        async fn sample(&self, pid: u32) -> Result<PidSample> {
            Err(TelemetryError::ProcessNotFound(pid))
        }
    }

    #[tokio::test]
    async fn test_memory_converts_decimal_mega() {
        let source = FixedSource(PidSample {
            cpu_percent: 12.5,
            memory_bytes: 50_000_000.0,
        });
        let stats = process_usage_from(&source, 1).await.unwrap();
        assert_eq!(stats.cpu_percent, 12.5);
        // Bytes / 1e6, not / 1024^2.
        assert_eq!(stats.memory_mb, 50.0);
    }

    struct VanishingSource;

    #[async_trait]
    impl ProcessUsageSource for VanishingSource {
        async fn sample(&self, pid: u32) -> Result<PidSample> {
            Err(TelemetryError::ProcessSample(format!(
                "pid {pid} exited during the sampling window"
            )))
        }
    }

    #[tokio::test]
    async fn test_source_failure_propagates() {
        let err = process_usage_from(&FailingSource, 4242).await.unwrap_err();
        assert!(matches!(err, TelemetryError::ProcessNotFound(4242)));
    }

    #[tokio::test]
    async fn test_sample_failure_propagates() {
        let err = process_usage_from(&VanishingSource, 7).await.unwrap_err();
        assert!(matches!(err, TelemetryError::ProcessSample(_)));
        assert!(err.to_string().contains("pid 7"));
    }

    #[tokio::test]
    async fn test_sample_own_process() {
        let stats = process_usage(std::process::id()).await.unwrap();
        assert!(stats.cpu_percent >= 0.0);
        assert!(stats.memory_mb > 0.0);
    }

    #[tokio::test]
    async fn test_unknown_pid_is_loud() {
        // Pid::MAX-ish value that cannot exist.
        let err = process_usage(u32::MAX - 1).await.unwrap_err();
        assert!(matches!(err, TelemetryError::ProcessNotFound(_)));
    }
}
