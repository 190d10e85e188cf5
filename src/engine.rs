use crate::analysis::{EvictionCandidate, EvictionPrioritizer, ScoringPolicy};
use crate::archive::{ArchiveOutcome, Archiver};
use crate::cleanup::{CleanupExecutor, CleanupMode, CleanupReport};
use crate::config::StorageConfig;
use crate::disk::{DiskPressureMonitor, DiskProbe, DiskSnapshot, Fs2Probe, PressureLevel};
use crate::error::Error;
use crate::paths::PathAllocator;
use crate::progress::{CleanupReporter, SilentReporter};
use crate::registry::{ActiveSessions, LifecycleInfo, RegistrationResult, SessionRegistry};
use crate::scanner::SessionDiscovery;
use crate::scheduler::{CleanupScheduler, NoopScheduler};
use crate::session::{validate_session_id, Category, Session};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a per-session timer firing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DueCleanup {
    Cleaned { bytes_freed: u64 },
    /// Removal ran but some directories are still there.
    Incomplete { bytes_freed: u64, errors: Vec<String> },
    NotDue { due_at: DateTime<Utc> },
    /// Touched inside the activity grace window; rescheduled.
    Deferred { retry_at: DateTime<Utc> },
    /// Nothing left on disk and nothing registered.
    AlreadyGone,
}

/// The storage manager as seen by collaborators. Owns one registry for the
/// life of the process and shares it with every component that needs it.
pub struct StorageEngine {
    config: StorageConfig,
    allocator: PathAllocator,
    registry: Arc<SessionRegistry>,
    monitor: Arc<DiskPressureMonitor>,
    discovery: SessionDiscovery,
    prioritizer: EvictionPrioritizer,
    archiver: Arc<Archiver>,
    executor: CleanupExecutor,
    scheduler: Arc<dyn CleanupScheduler>,
}

impl StorageEngine {
    pub fn new(config: StorageConfig) -> Result<Self, Error> {
        Self::with_probe(config, Arc::new(Fs2Probe))
    }

    /// Build with a custom source of disk statistics.
    pub fn with_probe(config: StorageConfig, probe: Arc<dyn DiskProbe>) -> Result<Self, Error> {
        config.validate()?;

        let allocator = PathAllocator::new(&config.root_path);
        for category in Category::ALL {
            fs::create_dir_all(allocator.category_root(category))?;
        }

        let registry = Arc::new(SessionRegistry::new(allocator.clone(), &config));
        let monitor = Arc::new(DiskPressureMonitor::new(&config, probe));
        let discovery =
            SessionDiscovery::new(allocator.clone(), Arc::clone(&registry), &config.ignore_patterns);
        let prioritizer = EvictionPrioritizer::new(ScoringPolicy::from_config(&config));
        let archiver = Arc::new(Archiver::new(
            allocator.clone(),
            Arc::clone(&registry),
            config.archive_dir(),
        ));

        let mut executor =
            CleanupExecutor::new(allocator.clone(), Arc::clone(&registry), Arc::clone(&monitor))
                .with_activity_grace_minutes(config.activity_grace_minutes);
        if config.archive_before_delete {
            executor = executor.with_archiver(Arc::clone(&archiver));
        }

        info!(
            "Session storage at {} (warn {}%, critical {}%, delay {}h)",
            config.root_path.display(),
            config.warn_percent,
            config.critical_percent,
            config.cleanup_delay_hours
        );

        Ok(Self {
            config,
            allocator,
            registry,
            monitor,
            discovery,
            prioritizer,
            archiver,
            executor,
            scheduler: Arc::new(NoopScheduler),
        })
    }

    /// Receive a cleanup request at `created_at + cleanup_delay_hours` for
    /// every newly registered session.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn CleanupScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<DiskPressureMonitor> {
        &self.monitor
    }

    /// Create (if needed) and return the session's directory for `category`,
    /// registering the session on first use.
    pub fn allocate_path(&self, session_id: &str, category: &str) -> Result<PathBuf, Error> {
        let path = self.allocator.allocate(session_id, category)?;
        self.register(session_id)?;
        Ok(path)
    }

    pub fn register(&self, session_id: &str) -> Result<RegistrationResult, Error> {
        let result = self.registry.register(session_id)?;
        if result.newly_registered {
            self.scheduler.schedule(session_id, result.cleanup_due_at);
        }
        Ok(result)
    }

    pub fn touch(&self, session_id: &str) -> bool {
        self.registry.touch(session_id)
    }

    pub fn lifecycle_info(&self, session_id: &str) -> Result<LifecycleInfo, Error> {
        self.registry.lifecycle_info(session_id)
    }

    pub fn list_active(&self) -> Result<ActiveSessions, Error> {
        self.registry.list_active()
    }

    pub fn disk_snapshot(&self) -> DiskSnapshot {
        self.monitor.snapshot()
    }

    pub fn pressure(&self) -> (DiskSnapshot, PressureLevel) {
        let snapshot = self.monitor.snapshot();
        let level = self.monitor.classify(&snapshot);
        (snapshot, level)
    }

    pub fn archive(&self, session_id: &str) -> Result<ArchiveOutcome, Error> {
        self.archiver.archive(session_id)
    }

    pub fn cleanup_session(&self, session_id: &str) -> Result<bool, Error> {
        self.executor.cleanup_session(session_id)
    }

    pub fn discover(&self) -> Vec<Session> {
        self.discovery.discover_all()
    }

    /// Every session on disk, scored and in eviction order.
    pub fn candidates(&self) -> Vec<EvictionCandidate> {
        let now = Utc::now();
        self.prioritizer
            .prioritize(self.discovery.discover_all_at(now), now)
    }

    pub fn run_cleanup(&self, force_emergency: bool) -> CleanupReport {
        self.run_cleanup_with(force_emergency, &SilentReporter)
    }

    /// Emergency when forced or already critical, bounded otherwise.
    pub fn run_cleanup_with(
        &self,
        force_emergency: bool,
        reporter: &dyn CleanupReporter,
    ) -> CleanupReport {
        let disk_before = self.monitor.snapshot();
        let mode = if force_emergency
            || self.monitor.classify(&disk_before) == PressureLevel::Critical
        {
            CleanupMode::Emergency
        } else {
            CleanupMode::Bounded
        };
        self.run_cleanup_from(disk_before, mode, reporter)
    }

    pub fn run_cleanup_from(
        &self,
        disk_before: DiskSnapshot,
        mode: CleanupMode,
        reporter: &dyn CleanupReporter,
    ) -> CleanupReport {
        let candidates = self.candidates();
        self.executor.run_from(disk_before, mode, candidates, reporter)
    }

    /// Handler for a per-session timer. Deletes the session if its cleanup
    /// delay has passed.
    pub fn cleanup_if_due(&self, session_id: &str) -> Result<DueCleanup, Error> {
        validate_session_id(session_id)?;
        let now = Utc::now();

        if let Some(grace) = self.executor.activity_grace() {
            if self.executor.recently_active(session_id, now) {
                let retry_at = now + grace;
                debug!("Deferring cleanup of active session {} to {}", session_id, retry_at);
                self.scheduler.schedule(session_id, retry_at);
                return Ok(DueCleanup::Deferred { retry_at });
            }
        }

        match self.registry.lifecycle_info(session_id) {
            Ok(info) if !info.cleanup_due => {
                return Ok(DueCleanup::NotDue {
                    due_at: info.cleanup_due_at,
                })
            }
            Ok(_) | Err(Error::SessionNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let on_disk = self
            .allocator
            .session_dirs(session_id)?
            .iter()
            .any(|(_, dir)| dir.exists());
        if !on_disk && !self.registry.contains(session_id) {
            return Ok(DueCleanup::AlreadyGone);
        }

        let removal = self.executor.remove_session(session_id)?;
        info!(
            "Scheduled cleanup of {} freed {} bytes",
            session_id, removal.bytes_freed
        );
        if removal.is_complete() {
            Ok(DueCleanup::Cleaned {
                bytes_freed: removal.bytes_freed,
            })
        } else {
            Ok(DueCleanup::Incomplete {
                bytes_freed: removal.bytes_freed,
                errors: removal.errors,
            })
        }
    }
}
