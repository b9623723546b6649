//! Host health probes and the periodic health monitor.
//!
//! Long-running stages (clean, full load) spawn a [`HealthMonitor`] that runs
//! its [`HealthCheck`]s on a tokio interval, off the transformation path. On
//! the first breach it records the reason and cancels the stage's token; the
//! stage notices at its next check point and takes the rollback path.
//!
//! Probes are external calls: each one runs under a timeout, and a timeout
//! counts as a failure.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{EtlError, EtlResult};

/// Memory figures reported by a [`SystemProbe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    /// Total physical memory.
    pub total_bytes: u64,
    /// Memory available to new allocations.
    pub available_bytes: u64,
}

impl MemoryInfo {
    /// Percentage of memory in use.
    #[allow(clippy::cast_precision_loss)]
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Read-only access to host resources.
#[async_trait]
pub trait SystemProbe: Send + Sync + std::fmt::Debug {
    /// Free bytes on the filesystem that holds `path`.
    async fn free_disk_bytes(&self, path: &Path) -> EtlResult<u64>;

    /// Current memory figures.
    async fn memory(&self) -> EtlResult<MemoryInfo>;
}

/// Probes the local host through `/proc/meminfo` and `df`.
#[derive(Debug, Clone)]
pub struct HostProbe {
    timeout: Duration,
}

impl HostProbe {
    /// Creates a probe whose calls time out after `timeout`.
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl SystemProbe for HostProbe {
    async fn free_disk_bytes(&self, path: &Path) -> EtlResult<u64> {
        let probe_path = nearest_existing(path);
        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new("df")
                .arg("-Pk")
                .arg(&probe_path)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            EtlError::Environment(format!(
                "disk probe timed out after {:?} for {}",
                self.timeout,
                probe_path.display()
            ))
        })?
        .map_err(|e| EtlError::Environment(format!("failed to run df: {e}")))?;

        if !output.status.success() {
            return Err(EtlError::Environment(format!(
                "df exited with {} for {}",
                output.status,
                probe_path.display()
            )));
        }
        parse_df_available(&String::from_utf8_lossy(&output.stdout))
    }

    async fn memory(&self) -> EtlResult<MemoryInfo> {
        let content = tokio::time::timeout(self.timeout, tokio::fs::read_to_string("/proc/meminfo"))
            .await
            .map_err(|_| EtlError::Environment("memory probe timed out".into()))?
            .map_err(|e| EtlError::Environment(format!("cannot read /proc/meminfo: {e}")))?;
        parse_meminfo(&content)
    }
}

/// A probe that returns fixed figures.
#[derive(Debug, Clone)]
pub struct StaticProbe {
    /// Reported free disk bytes; `None` makes the disk probe fail.
    pub free_disk: Option<u64>,
    /// Reported memory; `None` makes the memory probe fail.
    pub memory: Option<MemoryInfo>,
}

impl StaticProbe {
    /// A healthy host: 100 GiB free disk, 16 GiB memory at 25% use.
    pub const fn healthy() -> Self {
        Self {
            free_disk: Some(100 * 1024 * 1024 * 1024),
            memory: Some(MemoryInfo {
                total_bytes: 16 * 1024 * 1024 * 1024,
                available_bytes: 12 * 1024 * 1024 * 1024,
            }),
        }
    }
}

#[async_trait]
impl SystemProbe for StaticProbe {
    async fn free_disk_bytes(&self, path: &Path) -> EtlResult<u64> {
        self.free_disk.ok_or_else(|| {
            EtlError::Environment(format!("disk probe unavailable for {}", path.display()))
        })
    }

    async fn memory(&self) -> EtlResult<MemoryInfo> {
        self.memory
            .ok_or_else(|| EtlError::Environment("memory probe unavailable".into()))
    }
}

/// The closest ancestor of `path` (itself included) that exists.
pub fn nearest_existing(path: &Path) -> PathBuf {
    let mut current = Some(path);
    while let Some(p) = current {
        if p.exists() {
            return p.to_path_buf();
        }
        current = p.parent().filter(|parent| !parent.as_os_str().is_empty());
    }
    PathBuf::from(".")
}

/// Parses the "Available" column (KiB) of `df -Pk` output.
pub fn parse_df_available(output: &str) -> EtlResult<u64> {
    let line = output
        .lines()
        .nth(1)
        .ok_or_else(|| EtlError::Environment("unexpected df output".into()))?;
    let kib: u64 = line
        .split_whitespace()
        .nth(3)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| EtlError::Environment(format!("cannot parse df line: {line}")))?;
    Ok(kib.saturating_mul(1024))
}

/// Parses `MemTotal` and `MemAvailable` out of `/proc/meminfo`.
pub fn parse_meminfo(content: &str) -> EtlResult<MemoryInfo> {
    let field = |name: &str| -> Option<u64> {
        content.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            rest.split_whitespace().next()?.parse::<u64>().ok()
        })
    };
    let total = field("MemTotal")
        .ok_or_else(|| EtlError::Environment("MemTotal missing from /proc/meminfo".into()))?;
    let available = field("MemAvailable")
        .or_else(|| field("MemFree"))
        .ok_or_else(|| EtlError::Environment("MemAvailable missing from /proc/meminfo".into()))?;
    Ok(MemoryInfo {
        total_bytes: total.saturating_mul(1024),
        available_bytes: available.saturating_mul(1024),
    })
}

// ============================================================
// Health checks
// ============================================================

/// Outcome of a single health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Within thresholds.
    Healthy,
    /// Breached, with the reason.
    Unhealthy(String),
}

/// A periodic health check.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Name used in log events.
    fn name(&self) -> &str;

    /// Runs the check once.
    async fn check(&self) -> HealthStatus;
}

/// Abort thresholds for long-running stages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    /// Minimum free disk on the watched filesystem.
    pub min_free_disk_bytes: u64,
    /// Maximum memory usage percentage.
    pub max_memory_percent: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_free_disk_bytes: 1024 * 1024 * 1024,
            max_memory_percent: 90.0,
        }
    }
}

impl HealthThresholds {
    /// Builds thresholds from the clean settings.
    pub const fn from_clean(settings: &crate::settings::CleanSettings) -> Self {
        Self {
            min_free_disk_bytes: settings.min_free_disk_mb.saturating_mul(1024 * 1024),
            max_memory_percent: settings.max_memory_percent,
        }
    }
}

/// Disk headroom and memory pressure for one filesystem path.
#[derive(Debug, Clone)]
pub struct SystemHealthCheck {
    probe: Arc<dyn SystemProbe>,
    path: PathBuf,
    thresholds: HealthThresholds,
}

impl SystemHealthCheck {
    /// Watches the filesystem that holds `path`.
    pub fn new(probe: Arc<dyn SystemProbe>, path: impl Into<PathBuf>, thresholds: HealthThresholds) -> Self {
        Self {
            probe,
            path: path.into(),
            thresholds,
        }
    }
}

#[async_trait]
impl HealthCheck for SystemHealthCheck {
    fn name(&self) -> &str {
        "system"
    }

    async fn check(&self) -> HealthStatus {
        match self.probe.free_disk_bytes(&self.path).await {
            Ok(free) if free < self.thresholds.min_free_disk_bytes => {
                return HealthStatus::Unhealthy(format!(
                    "free disk {} MiB below {} MiB at {}",
                    free / (1024 * 1024),
                    self.thresholds.min_free_disk_bytes / (1024 * 1024),
                    self.path.display()
                ));
            }
            Ok(_) => {}
            Err(e) => return HealthStatus::Unhealthy(e.reason()),
        }
        match self.probe.memory().await {
            Ok(mem) if mem.used_percent() > self.thresholds.max_memory_percent => {
                HealthStatus::Unhealthy(format!(
                    "memory usage {:.1}% above {:.1}%",
                    mem.used_percent(),
                    self.thresholds.max_memory_percent
                ))
            }
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.reason()),
        }
    }
}

// ============================================================
// Monitor
// ============================================================

/// Runs health checks on a timer and cancels a token on the first breach.
#[derive(Debug)]
pub struct HealthMonitor {
    handle: JoinHandle<()>,
    stop: CancellationToken,
    breach: Arc<Mutex<Option<String>>>,
}

impl HealthMonitor {
    /// Spawns the monitor. Each check runs under `timeout`; a timeout is a
    /// breach. On the first breach `target` is cancelled and the monitor exits.
    pub fn spawn(
        checks: Vec<Arc<dyn HealthCheck>>,
        interval: Duration,
        timeout: Duration,
        target: CancellationToken,
    ) -> Self {
        let stop = CancellationToken::new();
        let breach = Arc::new(Mutex::new(None));
        let handle = tokio::spawn(monitor_loop(
            checks,
            interval.max(Duration::from_millis(1)),
            timeout,
            target,
            stop.clone(),
            Arc::clone(&breach),
        ));
        Self {
            handle,
            stop,
            breach,
        }
    }

    /// The recorded breach reason, if any.
    pub fn breach(&self) -> Option<String> {
        self.breach.lock().ok().and_then(|b| b.clone())
    }

    /// Stops the monitor and returns the breach reason, if any.
    pub async fn stop(self) -> Option<String> {
        let Self {
            handle,
            stop,
            breach,
        } = self;
        stop.cancel();
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "health monitor task ended abnormally");
        }
        let reason = breach.lock().ok().and_then(|b| b.clone());
        reason
    }
}

async fn monitor_loop(
    checks: Vec<Arc<dyn HealthCheck>>,
    interval: Duration,
    timeout: Duration,
    target: CancellationToken,
    stop: CancellationToken,
    breach: Arc<Mutex<Option<String>>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = stop.cancelled() => return,
            () = target.cancelled() => return,
            _ = ticker.tick() => {}
        }
        for check in &checks {
            let status = match tokio::time::timeout(timeout, check.check()).await {
                Ok(status) => status,
                Err(_) => HealthStatus::Unhealthy(format!(
                    "health check '{}' timed out after {timeout:?}",
                    check.name()
                )),
            };
            if let HealthStatus::Unhealthy(reason) = status {
                tracing::error!(check = check.name(), reason = %reason, "health threshold breached");
                if let Ok(mut slot) = breach.lock() {
                    *slot = Some(reason);
                }
                target.cancel();
                return;
            }
        }
    }
}
