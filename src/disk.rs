//! Volume capacity sampling and pressure classification.
//!
//! Sampling fails open: if the volume cannot be read the snapshot is zeroed,
//! which classifies as `Normal`. A monitoring outage must never be the thing
//! that triggers an emergency cleanup.

use crate::config::StorageConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, trace};

/// Raw capacity numbers for the volume holding a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Source of volume statistics. The default reads the real filesystem;
/// tests and embedders can supply their own.
pub trait DiskProbe: Send + Sync {
    fn sample(&self, path: &Path) -> io::Result<VolumeStats>;
}

/// Reads capacity through `statvfs`/`GetDiskFreeSpaceEx` via `fs2`.
pub struct Fs2Probe;

impl DiskProbe for Fs2Probe {
    fn sample(&self, path: &Path) -> io::Result<VolumeStats> {
        Ok(VolumeStats {
            total_bytes: fs2::total_space(path)?,
            free_bytes: fs2::free_space(path)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiskSnapshot {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub used_percent: f64,
    pub sampled_at: DateTime<Utc>,
}

impl DiskSnapshot {
    pub fn from_stats(stats: VolumeStats, sampled_at: DateTime<Utc>) -> Self {
        let free_bytes = stats.free_bytes.min(stats.total_bytes);
        let used_bytes = stats.total_bytes - free_bytes;
        let used_percent = if stats.total_bytes == 0 {
            0.0
        } else {
            let raw = used_bytes as f64 / stats.total_bytes as f64 * 100.0;
            ((raw * 100.0).round() / 100.0).clamp(0.0, 100.0)
        };

        Self {
            total_bytes: stats.total_bytes,
            used_bytes,
            free_bytes,
            used_percent,
            sampled_at,
        }
    }

    pub fn zeroed(sampled_at: DateTime<Utc>) -> Self {
        Self {
            total_bytes: 0,
            used_bytes: 0,
            free_bytes: 0,
            used_percent: 0.0,
            sampled_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PressureLevel::Normal => "normal",
            PressureLevel::Warning => "warning",
            PressureLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

pub struct DiskPressureMonitor {
    path: PathBuf,
    probe: Arc<dyn DiskProbe>,
    warn_percent: f64,
    critical_percent: f64,
    info_margin_percent: f64,
}

impl DiskPressureMonitor {
    pub fn new(config: &StorageConfig, probe: Arc<dyn DiskProbe>) -> Self {
        Self {
            path: config.root_path.clone(),
            probe,
            warn_percent: config.warn_percent,
            critical_percent: config.critical_percent,
            info_margin_percent: config.info_margin_percent,
        }
    }

    pub fn warn_percent(&self) -> f64 {
        self.warn_percent
    }

    pub fn critical_percent(&self) -> f64 {
        self.critical_percent
    }

    pub fn snapshot(&self) -> DiskSnapshot {
        let now = Utc::now();
        match self.probe.sample(&self.path) {
            Ok(stats) => {
                let snapshot = DiskSnapshot::from_stats(stats, now);
                trace!(
                    "Disk {}: {:.2}% used ({} of {} bytes)",
                    self.path.display(),
                    snapshot.used_percent,
                    snapshot.used_bytes,
                    snapshot.total_bytes
                );
                snapshot
            }
            Err(err) => {
                error!(
                    "Failed to sample disk usage for {}, reporting no pressure: {}",
                    self.path.display(),
                    err
                );
                DiskSnapshot::zeroed(now)
            }
        }
    }

    pub fn classify(&self, snapshot: &DiskSnapshot) -> PressureLevel {
        if snapshot.used_percent >= self.critical_percent {
            PressureLevel::Critical
        } else if snapshot.used_percent >= self.warn_percent {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    pub fn needs_cleanup(&self, snapshot: &DiskSnapshot) -> bool {
        snapshot.used_percent > self.warn_percent
    }

    /// Below the warning threshold but within the info margin of it.
    pub fn near_warning(&self, snapshot: &DiskSnapshot) -> bool {
        snapshot.used_percent < self.warn_percent
            && snapshot.used_percent >= self.warn_percent - self.info_margin_percent
    }
}
