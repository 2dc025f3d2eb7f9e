//! Resource monitoring for the NetChat daemon.
//!
//! Tracks process CPU and memory usage plus the broker's inbound-queue
//! occupancy, providing:
//! - Periodic logging of uptime and resource usage
//! - Warnings when thresholds are exceeded
//! - The operational alarm for inbound-queue saturation

use std::process;
use std::time::{Duration, Instant};

use sysinfo::{Pid, System};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::BrokerHandle;

/// Memory usage warning threshold in MB.
pub const HIGH_MEMORY_THRESHOLD_MB: u64 = 128;

/// CPU usage warning threshold (percentage).
pub const HIGH_CPU_THRESHOLD_PERCENT: f32 = 80.0;

/// Inbound-queue occupancy warning threshold (percentage).
pub const QUEUE_SATURATION_THRESHOLD_PERCENT: usize = 90;

/// How often to sample metrics.
pub const METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// Point-in-time resource usage of the daemon process.
#[derive(Debug, Clone, Default)]
pub struct ResourceUsage {
    /// Memory usage in megabytes
    pub memory_mb: u64,

    /// CPU usage as percentage (0.0 - 100.0+)
    pub cpu_percent: f32,

    /// Whether memory is above threshold
    pub memory_high: bool,

    /// Whether CPU is above threshold
    pub cpu_high: bool,
}

impl ResourceUsage {
    /// Returns true if any metric is above its threshold.
    pub fn is_any_high(&self) -> bool {
        self.memory_high || self.cpu_high
    }
}

/// Samples process metrics via `sysinfo`.
pub struct ResourceMonitor {
    system: System,
    pid: Pid,
    memory_threshold_mb: u64,
    cpu_threshold_percent: f32,
}

impl ResourceMonitor {
    /// Creates a monitor for the current process with default thresholds.
    pub fn new() -> Self {
        Self::with_thresholds(HIGH_MEMORY_THRESHOLD_MB, HIGH_CPU_THRESHOLD_PERCENT)
    }

    /// Creates a monitor with custom thresholds.
    pub fn with_thresholds(memory_threshold_mb: u64, cpu_threshold_percent: f32) -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(process::id()),
            memory_threshold_mb,
            cpu_threshold_percent,
        }
    }

    /// Refreshes process information and returns current usage.
    ///
    /// sysinfo computes CPU usage against the previous refresh, so the
    /// first sample after startup reads 0%; periodic sampling is accurate
    /// from the second refresh on. `refresh_all` is required - refreshing
    /// a single process does not compute CPU%.
    pub fn refresh(&mut self) -> ResourceUsage {
        self.system.refresh_all();

        let (memory_bytes, cpu_percent) = self
            .system
            .process(self.pid)
            .map(|p| (p.memory(), p.cpu_usage()))
            .unwrap_or((0, 0.0));

        let memory_mb = memory_bytes / 1024 / 1024;

        ResourceUsage {
            memory_mb,
            cpu_percent,
            memory_high: memory_mb > self.memory_threshold_mb,
            cpu_high: cpu_percent > self.cpu_threshold_percent,
        }
    }

    pub fn memory_threshold_mb(&self) -> u64 {
        self.memory_threshold_mb
    }

    pub fn cpu_threshold_percent(&self) -> f32 {
        self.cpu_threshold_percent
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the monitoring task.
///
/// Periodically logs uptime, resource usage, and the inbound-queue
/// occupancy, warning when any threshold is exceeded. Uses cooperative
/// shutdown via CancellationToken.
pub fn spawn_monitor_task(
    broker: BrokerHandle,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut monitor = ResourceMonitor::new();
        let started_at = Instant::now();
        let mut tick = interval(METRICS_INTERVAL);

        // Establish the CPU baseline
        let _ = monitor.refresh();

        info!(
            memory_threshold_mb = monitor.memory_threshold_mb(),
            cpu_threshold_percent = monitor.cpu_threshold_percent(),
            interval_secs = METRICS_INTERVAL.as_secs(),
            "resource monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("resource monitor shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let usage = monitor.refresh();
                    let (queued, capacity) = broker.inbound_occupancy();
                    log_sample(&monitor, &usage, started_at.elapsed(), queued, capacity);
                }
            }
        }

        debug!("resource monitor task completed");
    })
}

/// Logs one sample, warning on any exceeded threshold.
fn log_sample(
    monitor: &ResourceMonitor,
    usage: &ResourceUsage,
    uptime: Duration,
    queued: usize,
    capacity: usize,
) {
    let occupancy_percent = if capacity == 0 { 0 } else { queued * 100 / capacity };

    if occupancy_percent >= QUEUE_SATURATION_THRESHOLD_PERCENT {
        // The one condition that should surface as an operational alarm
        warn!(
            queued,
            capacity,
            occupancy_percent,
            "INBOUND QUEUE SATURATED: senders are being throttled"
        );
    }

    if usage.memory_high {
        warn!(
            memory_mb = usage.memory_mb,
            threshold_mb = monitor.memory_threshold_mb(),
            cpu_percent = format!("{:.1}", usage.cpu_percent),
            "HIGH MEMORY: daemon memory usage above threshold"
        );
    } else if usage.cpu_high {
        warn!(
            memory_mb = usage.memory_mb,
            cpu_percent = format!("{:.1}", usage.cpu_percent),
            threshold_percent = monitor.cpu_threshold_percent(),
            "HIGH CPU: daemon CPU usage above threshold"
        );
    } else {
        info!(
            uptime_secs = uptime.as_secs(),
            memory_mb = usage.memory_mb,
            cpu_percent = format!("{:.1}", usage.cpu_percent),
            inbound_queued = queued,
            inbound_capacity = capacity,
            "daemon resource usage"
        );
    }
}
