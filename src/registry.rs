use crate::config::StorageConfig;
use crate::error::Error;
use crate::paths::PathAllocator;
use crate::scanner::usage::{measure_dirs, DirUsage};
use crate::session::{hours_between, registered_status, validate_session_id, SessionStatus};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// In-memory metadata for a session this process has seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEntry {
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub operation_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationResult {
    pub session_id: String,
    /// False when the session was already known and nothing changed.
    pub newly_registered: bool,
    pub created_at: DateTime<Utc>,
    pub cleanup_due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub operation_count: u64,
    pub age_hours: f64,
    pub cleanup_delay_hours: f64,
    pub cleanup_due: bool,
    pub cleanup_due_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub size_bytes: u64,
    pub file_count: u64,
    /// Category directories that exist on disk right now.
    pub directories: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveSessions {
    pub sessions: Vec<LifecycleInfo>,
    pub total_size_bytes: u64,
    pub total_file_count: u64,
}

/// Process-local session cache. Every mutation goes through one mutex; disk
/// measurement always happens after the lock is released.
///
/// Entries expire after `registry_retention_hours` without a touch, and the
/// least recently used entries are dropped once `registry_max_entries` is
/// exceeded. An expired session is still on disk and will be rediscovered as
/// abandoned.
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, SessionEntry>>,
    allocator: PathAllocator,
    cleanup_delay_hours: f64,
    retention_hours: f64,
    max_entries: usize,
}

impl SessionRegistry {
    pub fn new(allocator: PathAllocator, config: &StorageConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            allocator,
            cleanup_delay_hours: config.cleanup_delay_hours,
            retention_hours: config.registry_retention_hours,
            max_entries: config.registry_max_entries.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        // Entries are plain data replaced wholesale, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cleanup_delay_hours(&self) -> f64 {
        self.cleanup_delay_hours
    }

    pub fn register(&self, session_id: &str) -> Result<RegistrationResult, Error> {
        self.register_at(session_id, Utc::now())
    }

    /// Register with an explicit creation time, e.g. when restoring sessions
    /// after a restart. Known sessions are left untouched.
    pub fn register_at(
        &self,
        session_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<RegistrationResult, Error> {
        validate_session_id(session_id)?;

        let mut entries = self.lock();
        self.prune_locked(&mut entries, Utc::now());

        let (entry_created_at, newly_registered) = match entries.get(session_id) {
            Some(entry) => (entry.created_at, false),
            None => {
                entries.insert(
                    session_id.to_string(),
                    SessionEntry {
                        created_at,
                        last_accessed: created_at,
                        operation_count: 0,
                    },
                );
                self.enforce_capacity_locked(&mut entries);
                (created_at, true)
            }
        };
        drop(entries);

        if newly_registered {
            debug!("Registered session {}", session_id);
        }

        Ok(RegistrationResult {
            session_id: session_id.to_string(),
            newly_registered,
            created_at: entry_created_at,
            cleanup_due_at: self.due_at(entry_created_at),
        })
    }

    /// Record activity. Unknown sessions are not created.
    pub fn touch(&self, session_id: &str) -> bool {
        let now = Utc::now();
        let mut entries = self.lock();
        match entries.get_mut(session_id) {
            Some(entry) => {
                entry.last_accessed = now.max(entry.created_at);
                entry.operation_count += 1;
                trace!("Touched session {} ({} ops)", session_id, entry.operation_count);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.lock().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionEntry> {
        self.lock().remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn lifecycle_info(&self, session_id: &str) -> Result<LifecycleInfo, Error> {
        validate_session_id(session_id)?;
        let entry = self
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        self.build_info(session_id, entry, Utc::now())
    }

    /// Lifecycle info for every registered session plus aggregate disk usage.
    pub fn list_active(&self) -> Result<ActiveSessions, Error> {
        let now = Utc::now();
        let mut snapshot: Vec<(String, SessionEntry)> = self
            .lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        snapshot.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then(a.0.cmp(&b.0)));

        let mut sessions = Vec::with_capacity(snapshot.len());
        for (id, entry) in snapshot {
            sessions.push(self.build_info(&id, entry, now)?);
        }

        let total_size_bytes = sessions.iter().map(|s| s.size_bytes).sum();
        let total_file_count = sessions.iter().map(|s| s.file_count).sum();

        Ok(ActiveSessions {
            sessions,
            total_size_bytes,
            total_file_count,
        })
    }

    fn build_info(
        &self,
        session_id: &str,
        entry: SessionEntry,
        now: DateTime<Utc>,
    ) -> Result<LifecycleInfo, Error> {
        let directories: Vec<PathBuf> = self
            .allocator
            .session_dirs(session_id)?
            .into_iter()
            .map(|(_, dir)| dir)
            .filter(|dir| dir.is_dir())
            .collect();
        let usage: DirUsage = measure_dirs(&directories);
        let age_hours = hours_between(entry.created_at, now);

        Ok(LifecycleInfo {
            session_id: session_id.to_string(),
            created_at: entry.created_at,
            last_accessed: entry.last_accessed,
            operation_count: entry.operation_count,
            age_hours,
            cleanup_delay_hours: self.cleanup_delay_hours,
            cleanup_due: age_hours >= self.cleanup_delay_hours,
            cleanup_due_at: self.due_at(entry.created_at),
            status: registered_status(entry.last_accessed, now, self.cleanup_delay_hours),
            size_bytes: usage.size_bytes,
            file_count: usage.file_count,
            directories,
        })
    }

    fn due_at(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        let delay_ms = (self.cleanup_delay_hours.max(0.0) * 3_600_000.0).min(i64::MAX as f64);
        created_at
            .checked_add_signed(Duration::milliseconds(delay_ms as i64))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn prune_locked(&self, entries: &mut HashMap<String, SessionEntry>, now: DateTime<Utc>) {
        let before = entries.len();
        entries.retain(|_, entry| hours_between(entry.last_accessed, now) < self.retention_hours);
        let pruned = before - entries.len();
        if pruned > 0 {
            debug!("Pruned {} expired registry entries", pruned);
        }
    }

    fn enforce_capacity_locked(&self, entries: &mut HashMap<String, SessionEntry>) {
        if entries.len() <= self.max_entries {
            return;
        }
        let mut by_access: Vec<(String, DateTime<Utc>)> = entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.last_accessed))
            .collect();
        by_access.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

        let excess = entries.len() - self.max_entries;
        for (id, _) in by_access.into_iter().take(excess) {
            entries.remove(&id);
        }
        debug!("Registry over capacity, evicted {} entries", excess);
    }
}
