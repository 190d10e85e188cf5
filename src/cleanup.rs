use crate::analysis::{EvictionCandidate, EvictionReason};
use crate::archive::{ArchiveOutcome, Archiver};
use crate::config::MAX_ACTIVITY_GRACE_MINUTES;
use crate::disk::{DiskPressureMonitor, DiskSnapshot};
use crate::error::Error;
use crate::paths::PathAllocator;
use crate::progress::{CleanupReporter, SilentReporter};
use crate::registry::SessionRegistry;
use crate::scanner::usage::measure_dir;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupMode {
    /// Stop as soon as usage is back at or below the warning threshold.
    Bounded,
    /// Work through every reclaimable candidate regardless of usage.
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Cleaned,
    /// At least one category directory could not be removed.
    Failed,
    SkippedRecentActivity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupRecord {
    pub session_id: String,
    pub reason: EvictionReason,
    pub score: u32,
    pub status: RecordStatus,
    pub bytes_freed: u64,
    pub error: Option<String>,
    /// `None` when archiving is disabled for this run.
    pub archive: Option<ArchiveOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    pub sessions_analyzed: usize,
    pub sessions_cleaned: usize,
    pub sessions_failed: usize,
    pub bytes_freed: u64,
    pub records: Vec<CleanupRecord>,
    pub disk_before: DiskSnapshot,
    pub disk_after: DiskSnapshot,
    pub emergency_mode: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CleanupReport {
    pub fn has_failures(&self) -> bool {
        self.sessions_failed > 0
    }
}

/// What deleting one session's directories achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRemoval {
    pub bytes_freed: u64,
    pub dirs_removed: usize,
    pub errors: Vec<String>,
}

impl SessionRemoval {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct CleanupExecutor {
    allocator: PathAllocator,
    registry: Arc<SessionRegistry>,
    monitor: Arc<DiskPressureMonitor>,
    archiver: Option<Arc<Archiver>>,
    activity_grace: Option<Duration>,
}

impl CleanupExecutor {
    pub fn new(
        allocator: PathAllocator,
        registry: Arc<SessionRegistry>,
        monitor: Arc<DiskPressureMonitor>,
    ) -> Self {
        Self {
            allocator,
            registry,
            monitor,
            archiver: None,
            activity_grace: None,
        }
    }

    /// Archive each session before deleting it.
    pub fn with_archiver(mut self, archiver: Arc<Archiver>) -> Self {
        self.archiver = Some(archiver);
        self
    }

    /// Skip sessions touched within `minutes` of the delete. 0 disables;
    /// values above `MAX_ACTIVITY_GRACE_MINUTES` are clamped.
    pub fn with_activity_grace_minutes(mut self, minutes: u64) -> Self {
        let minutes = minutes.min(MAX_ACTIVITY_GRACE_MINUTES) as i64;
        self.activity_grace = (minutes > 0).then(|| Duration::minutes(minutes));
        self
    }

    pub fn activity_grace(&self) -> Option<Duration> {
        self.activity_grace
    }

    /// Delete every category directory of a session. Already-missing
    /// directories are fine, so a second call returns `true` and frees nothing.
    pub fn cleanup_session(&self, session_id: &str) -> Result<bool, Error> {
        Ok(self.remove_session(session_id)?.is_complete())
    }

    /// Like `cleanup_session`, but reports bytes and per-directory errors.
    /// The registry entry is dropped even on partial failure so the next
    /// discovery re-reads the session's state from disk.
    pub fn remove_session(&self, session_id: &str) -> Result<SessionRemoval, Error> {
        let dirs = self.allocator.session_dirs(session_id)?;
        let mut removal = SessionRemoval::default();

        for (category, dir) in dirs {
            let size = measure_dir(&dir).size_bytes;
            match fs::remove_dir_all(&dir) {
                Ok(()) => {
                    removal.bytes_freed += size;
                    removal.dirs_removed += 1;
                    debug!("Removed {} ({} bytes)", dir.display(), size);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    error!("Failed to remove {}: {}", dir.display(), e);
                    removal.errors.push(format!("{}: {}", category, e));
                }
            }
        }

        self.registry.remove(session_id);
        Ok(removal)
    }

    /// True when the session was touched inside the grace window.
    pub fn recently_active(&self, session_id: &str, now: DateTime<Utc>) -> bool {
        match (self.activity_grace, self.registry.get(session_id)) {
            (Some(grace), Some(entry)) => now - entry.last_accessed < grace,
            _ => false,
        }
    }

    pub fn run(&self, mode: CleanupMode, candidates: Vec<EvictionCandidate>) -> CleanupReport {
        self.run_from(self.monitor.snapshot(), mode, candidates, &SilentReporter)
    }

    /// Run starting from an already-taken snapshot. Candidates must be in
    /// priority order; those without a reclaim reason are counted as analyzed
    /// and left alone.
    pub fn run_from(
        &self,
        disk_before: DiskSnapshot,
        mode: CleanupMode,
        candidates: Vec<EvictionCandidate>,
        reporter: &dyn CleanupReporter,
    ) -> CleanupReport {
        let started_at = Utc::now();
        let sessions_analyzed = candidates.len();
        let reclaimable: Vec<EvictionCandidate> = candidates
            .into_iter()
            .filter(EvictionCandidate::is_reclaimable)
            .collect();
        reporter.on_discovery_complete(sessions_analyzed, reclaimable.len());

        info!(
            "Starting {:?} cleanup at {:.2}% used: {} sessions analyzed, {} reclaimable",
            mode,
            disk_before.used_percent,
            sessions_analyzed,
            reclaimable.len()
        );

        let total = reclaimable.len();
        let mut current = disk_before;
        let mut records = Vec::new();

        for (position, candidate) in reclaimable.into_iter().enumerate() {
            if mode == CleanupMode::Bounded && !self.monitor.needs_cleanup(&current) {
                info!(
                    "Pressure resolved at {:.2}%, stopping with {} candidates left",
                    current.used_percent,
                    total - position
                );
                break;
            }

            reporter.on_session_start(&candidate.session.id, position, total);
            let record = self.process_candidate(&candidate);
            reporter.on_session_complete(&record);

            let deleted = record.status != RecordStatus::SkippedRecentActivity;
            records.push(record);
            if deleted {
                current = self.monitor.snapshot();
            }
        }

        let sessions_cleaned = records
            .iter()
            .filter(|r| r.status == RecordStatus::Cleaned)
            .count();
        let sessions_failed = records
            .iter()
            .filter(|r| r.status == RecordStatus::Failed)
            .count();
        let bytes_freed = records.iter().map(|r| r.bytes_freed).sum();

        let report = CleanupReport {
            sessions_analyzed,
            sessions_cleaned,
            sessions_failed,
            bytes_freed,
            records,
            disk_before,
            disk_after: current,
            emergency_mode: mode == CleanupMode::Emergency,
            started_at,
            finished_at: Utc::now(),
        };

        if report.has_failures() {
            warn!(
                "Partial cleanup failure: {} of {} sessions could not be fully removed",
                report.sessions_failed,
                report.records.len()
            );
        }
        info!(
            "Cleanup finished: {} sessions cleaned, {} bytes freed, {:.2}% -> {:.2}% used",
            report.sessions_cleaned,
            report.bytes_freed,
            report.disk_before.used_percent,
            report.disk_after.used_percent
        );
        reporter.on_run_complete(&report);

        report
    }

    fn process_candidate(&self, candidate: &EvictionCandidate) -> CleanupRecord {
        let session_id = candidate.session.id.clone();

        if self.recently_active(&session_id, Utc::now()) {
            info!("Skipping session {}: touched within grace window", session_id);
            return CleanupRecord {
                session_id,
                reason: candidate.dominant_reason,
                score: candidate.score,
                status: RecordStatus::SkippedRecentActivity,
                bytes_freed: 0,
                error: None,
                archive: None,
            };
        }

        // Archive is phase one; the delete below runs whatever it returned.
        let archive = self
            .archiver
            .as_ref()
            .map(|archiver| match archiver.archive(&session_id) {
                Ok(outcome) => outcome,
                Err(e) => ArchiveOutcome::Failed {
                    error: e.to_string(),
                },
            });

        let (status, bytes_freed, error) = match self.remove_session(&session_id) {
            Ok(removal) if removal.is_complete() => (RecordStatus::Cleaned, removal.bytes_freed, None),
            Ok(removal) => (
                RecordStatus::Failed,
                removal.bytes_freed,
                Some(removal.errors.join("; ")),
            ),
            Err(e) => (RecordStatus::Failed, 0, Some(e.to_string())),
        };

        debug!(
            "Session {} ({}, score {}): {:?}, {} bytes freed",
            session_id, candidate.dominant_reason, candidate.score, status, bytes_freed
        );

        CleanupRecord {
            session_id,
            reason: candidate.dominant_reason,
            score: candidate.score,
            status,
            bytes_freed,
            error,
            archive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::disk::{DiskProbe, VolumeStats};
    use std::path::Path;
    use tempfile::tempdir;

    struct FixedProbe(u64);

    impl DiskProbe for FixedProbe {
        fn sample(&self, _path: &Path) -> io::Result<VolumeStats> {
            Ok(VolumeStats {
                total_bytes: 100,
                free_bytes: 100 - self.0,
            })
        }
    }

    fn executor_for(root: &Path, used_percent: u64) -> (CleanupExecutor, Arc<SessionRegistry>) {
        let config = StorageConfig::with_root(root);
        let allocator = PathAllocator::new(root);
        let registry = Arc::new(SessionRegistry::new(allocator.clone(), &config));
        let monitor = Arc::new(DiskPressureMonitor::new(
            &config,
            Arc::new(FixedProbe(used_percent)),
        ));
        (
            CleanupExecutor::new(allocator, Arc::clone(&registry), monitor),
            registry,
        )
    }

    #[test]
    fn test_cleanup_session_removes_all_categories() {
        let tmp = tempdir().unwrap();
        let (executor, registry) = executor_for(tmp.path(), 50);
        registry.register("session-0001").unwrap();
        for category in ["uploads", "processing", "downloads"] {
            let dir = tmp.path().join(category).join("session-0001");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("f"), vec![0u8; 10]).unwrap();
        }

        let removal = executor.remove_session("session-0001").unwrap();
        assert_eq!(removal.bytes_freed, 30);
        assert_eq!(removal.dirs_removed, 3);
        assert!(removal.is_complete());
        assert!(!registry.contains("session-0001"));
        assert!(tmp.path().join("uploads").is_dir());
        assert!(!tmp.path().join("uploads/session-0001").exists());
    }

    #[test]
    fn test_cleanup_session_twice_is_noop() {
        let tmp = tempdir().unwrap();
        let (executor, _) = executor_for(tmp.path(), 50);
        let dir = tmp.path().join("uploads/session-0001");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("f"), b"abc").unwrap();

        assert!(executor.cleanup_session("session-0001").unwrap());
        let second = executor.remove_session("session-0001").unwrap();
        assert!(second.is_complete());
        assert_eq!(second.bytes_freed, 0);
        assert!(executor.cleanup_session("session-0001").unwrap());
    }

    #[test]
    fn test_cleanup_session_rejects_invalid_id() {
        let tmp = tempdir().unwrap();
        let (executor, _) = executor_for(tmp.path(), 50);
        assert!(matches!(
            executor.cleanup_session("../../root"),
            Err(Error::InvalidSessionId(_))
        ));
    }

    #[test]
    fn test_run_with_no_candidates_returns_report() {
        let tmp = tempdir().unwrap();
        let (executor, _) = executor_for(tmp.path(), 99);
        let report = executor.run(CleanupMode::Emergency, vec![]);
        assert_eq!(report.sessions_analyzed, 0);
        assert_eq!(report.sessions_cleaned, 0);
        assert_eq!(report.bytes_freed, 0);
        assert!(report.emergency_mode);
        assert!(report.records.is_empty());
    }

    #[test]
    fn test_grace_window_skips_recently_touched() {
        let tmp = tempdir().unwrap();
        let (executor, registry) = executor_for(tmp.path(), 50);
        let executor = executor.with_activity_grace_minutes(10);
        registry.register("session-0001").unwrap();
        registry.touch("session-0001");
        assert!(executor.recently_active("session-0001", Utc::now()));
        assert!(!executor.recently_active("session-0002", Utc::now()));
    }

    #[test]
    fn test_grace_window_is_clamped() {
        let tmp = tempdir().unwrap();
        let (executor, _) = executor_for(tmp.path(), 50);
        let executor = executor.with_activity_grace_minutes(u64::MAX);
        assert_eq!(
            executor.activity_grace(),
            Some(Duration::minutes(MAX_ACTIVITY_GRACE_MINUTES as i64))
        );
    }
}
