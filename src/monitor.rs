use crate::cleanup::{CleanupMode, CleanupReport};
use crate::disk::{DiskSnapshot, PressureLevel};
use crate::engine::{DueCleanup, StorageEngine};
use crate::progress::SilentReporter;
use crate::scheduler::DueQueue;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// What one tick saw and did.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub snapshot: DiskSnapshot,
    pub level: PressureLevel,
    pub report: Option<CleanupReport>,
    pub due_cleanups: Vec<(String, DueCleanup)>,
}

/// Periodic pressure check. Holds no state between ticks besides its
/// configuration, so a tick can be skipped or repeated freely.
pub struct MonitoringLoop {
    engine: Arc<StorageEngine>,
    interval: Duration,
    due_queue: Option<Arc<DueQueue>>,
    cleanup_on_warning: bool,
}

impl MonitoringLoop {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        let interval = Duration::from_secs(engine.config().monitor_interval_seconds);
        let cleanup_on_warning = engine.config().auto_cleanup_on_warning;
        Self {
            engine,
            interval,
            due_queue: None,
            cleanup_on_warning,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Drain per-session timers from `queue` on every tick.
    pub fn with_due_queue(mut self, queue: Arc<DueQueue>) -> Self {
        self.due_queue = Some(queue);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn tick(&self) -> TickOutcome {
        let monitor = self.engine.monitor();
        let snapshot = monitor.snapshot();
        let level = monitor.classify(&snapshot);

        let report = match level {
            PressureLevel::Critical => {
                error!(
                    used_percent = snapshot.used_percent,
                    pressure = %level,
                    "Disk usage critical, starting emergency cleanup"
                );
                Some(self.engine.run_cleanup_from(
                    snapshot,
                    CleanupMode::Emergency,
                    &SilentReporter,
                ))
            }
            PressureLevel::Warning => {
                warn!(
                    used_percent = snapshot.used_percent,
                    pressure = %level,
                    "Disk usage above warning threshold"
                );
                if self.cleanup_on_warning && monitor.needs_cleanup(&snapshot) {
                    Some(self.engine.run_cleanup_from(
                        snapshot,
                        CleanupMode::Bounded,
                        &SilentReporter,
                    ))
                } else {
                    None
                }
            }
            PressureLevel::Normal => {
                if monitor.near_warning(&snapshot) {
                    info!(
                        used_percent = snapshot.used_percent,
                        pressure = %level,
                        "Disk usage approaching warning threshold"
                    );
                }
                None
            }
        };

        let due_cleanups = self.process_due();

        TickOutcome {
            snapshot,
            level,
            report,
            due_cleanups,
        }
    }

    fn process_due(&self) -> Vec<(String, DueCleanup)> {
        let Some(queue) = &self.due_queue else {
            return Vec::new();
        };

        queue
            .drain_due(Utc::now())
            .into_iter()
            .filter_map(|session_id| match self.engine.cleanup_if_due(&session_id) {
                Ok(outcome) => Some((session_id, outcome)),
                Err(e) => {
                    error!("Scheduled cleanup of {} failed: {}", session_id, e);
                    None
                }
            })
            .collect()
    }

    /// Tick until `stop` is set, or `max_ticks` ticks have run.
    pub fn run(&self, stop: &AtomicBool, max_ticks: Option<u64>) -> u64 {
        let mut ticks = 0u64;
        info!("Monitoring every {}s", self.interval.as_secs());

        loop {
            self.tick();
            ticks += 1;

            if max_ticks.is_some_and(|max| ticks >= max) || stop.load(Ordering::Relaxed) {
                break;
            }
            if !self.sleep_interval(stop) {
                break;
            }
        }

        ticks
    }

    /// Sleep in short slices so a stop request is noticed promptly. Returns
    /// false if stopped.
    fn sleep_interval(&self, stop: &AtomicBool) -> bool {
        let deadline = Instant::now() + self.interval;
        let slice = Duration::from_millis(250);
        loop {
            if stop.load(Ordering::Relaxed) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}
