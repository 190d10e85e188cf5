use crate::paths::PathAllocator;
use crate::registry::SessionRegistry;
use crate::scanner::usage::measure_dirs;
use crate::session::{registered_status, validate_session_id, Category, Session, SessionStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Builds the cross-process view of sessions. The filesystem decides which
/// sessions exist; the registry only contributes liveness metadata.
pub struct SessionDiscovery {
    allocator: PathAllocator,
    registry: Arc<SessionRegistry>,
    ignore_patterns: Vec<Pattern>,
}

impl SessionDiscovery {
    pub fn new(
        allocator: PathAllocator,
        registry: Arc<SessionRegistry>,
        ignore_globs: &[String],
    ) -> Self {
        let ignore_patterns = ignore_globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();

        Self {
            allocator,
            registry,
            ignore_patterns,
        }
    }

    pub fn discover_all(&self) -> Vec<Session> {
        self.discover_all_at(Utc::now())
    }

    /// Every session with a directory under any category root, sorted by id.
    pub fn discover_all_at(&self, now: DateTime<Utc>) -> Vec<Session> {
        let found = self.collect_session_ids();

        let mut ids: Vec<(String, Vec<Category>)> = found.into_iter().collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));

        let sessions: Vec<Session> = ids
            .into_par_iter()
            .map(|(id, mut categories)| {
                categories.sort();
                self.build_session(id, categories, now)
            })
            .collect();

        debug!("Discovered {} sessions on disk", sessions.len());
        sessions
    }

    fn collect_session_ids(&self) -> DashMap<String, Vec<Category>> {
        let found: DashMap<String, Vec<Category>> = DashMap::new();

        Category::ALL.par_iter().for_each(|category| {
            let root = self.allocator.category_root(*category);
            let entries = match fs::read_dir(&root) {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return,
                Err(err) => {
                    error!("Error reading category root {}: {}", root.display(), err);
                    return;
                }
            };

            for entry in entries.flatten() {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if self.ignore_patterns.iter().any(|p| p.matches(&name)) {
                    continue;
                }
                if validate_session_id(&name).is_err() {
                    warn!(
                        "Ignoring directory with invalid session id: {}",
                        entry.path().display()
                    );
                    continue;
                }
                found.entry(name).or_default().push(*category);
            }
        });

        found
    }

    fn build_session(&self, id: String, categories: Vec<Category>, now: DateTime<Utc>) -> Session {
        let dirs: Vec<PathBuf> = categories
            .iter()
            .map(|category| self.allocator.category_root(*category).join(&id))
            .collect();
        let usage = measure_dirs(&dirs);

        match self.registry.get(&id) {
            Some(entry) => Session {
                status: registered_status(
                    entry.last_accessed,
                    now,
                    self.registry.cleanup_delay_hours(),
                ),
                id,
                created_at: entry.created_at,
                last_accessed: entry.last_accessed,
                operation_count: entry.operation_count,
                categories,
                size_bytes: usage.size_bytes,
                file_count: usage.file_count,
            },
            None => {
                let created_at = usage
                    .earliest_modified
                    .map(DateTime::<Utc>::from)
                    .unwrap_or(now);
                let last_accessed = usage
                    .latest_modified
                    .map(DateTime::<Utc>::from)
                    .unwrap_or(created_at)
                    .max(created_at);

                Session {
                    id,
                    created_at,
                    last_accessed,
                    operation_count: 0,
                    status: SessionStatus::Abandoned,
                    categories,
                    size_bytes: usage.size_bytes,
                    file_count: usage.file_count,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use tempfile::tempdir;

    fn discovery_for(root: &std::path::Path) -> (SessionDiscovery, Arc<SessionRegistry>) {
        let config = StorageConfig::with_root(root);
        let allocator = PathAllocator::new(root);
        let registry = Arc::new(SessionRegistry::new(allocator.clone(), &config));
        let discovery =
            SessionDiscovery::new(allocator, Arc::clone(&registry), &config.ignore_patterns);
        (discovery, registry)
    }

    #[test]
    fn test_discover_empty_root() {
        let tmp = tempdir().unwrap();
        let (discovery, _) = discovery_for(&tmp.path().join("not-created-yet"));
        assert!(discovery.discover_all().is_empty());
    }

    #[test]
    fn test_union_across_categories() {
        let tmp = tempdir().unwrap();
        let (discovery, registry) = discovery_for(tmp.path());
        fs::create_dir_all(tmp.path().join("uploads/session-aaaa")).unwrap();
        fs::create_dir_all(tmp.path().join("downloads/session-aaaa")).unwrap();
        fs::create_dir_all(tmp.path().join("processing/session-bbbb")).unwrap();
        registry.register("session-bbbb").unwrap();

        let sessions = discovery.discover_all();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "session-aaaa");
        assert_eq!(
            sessions[0].categories,
            vec![Category::Uploads, Category::Downloads]
        );
        assert_eq!(sessions[0].status, SessionStatus::Abandoned);
        assert_eq!(sessions[1].id, "session-bbbb");
        assert_eq!(sessions[1].status, SessionStatus::Active);
    }

    #[test]
    fn test_ignores_files_hidden_and_invalid_names() {
        let tmp = tempdir().unwrap();
        let (discovery, _) = discovery_for(tmp.path());
        let uploads = tmp.path().join("uploads");
        fs::create_dir_all(uploads.join(".staging-area")).unwrap();
        fs::create_dir_all(uploads.join("tiny")).unwrap();
        fs::write(uploads.join("stray-file.txt"), b"x").unwrap();
        fs::create_dir_all(uploads.join("session-cccc")).unwrap();

        let ids: Vec<String> = discovery.discover_all().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["session-cccc".to_string()]);
    }

    #[test]
    fn test_abandoned_session_takes_times_from_disk() {
        let tmp = tempdir().unwrap();
        let (discovery, _) = discovery_for(tmp.path());
        let dir = tmp.path().join("uploads/session-dddd");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("scan.tiff"), vec![0u8; 512]).unwrap();

        let session = discovery.discover_all().remove(0);
        assert_eq!(session.status, SessionStatus::Abandoned);
        assert_eq!(session.size_bytes, 512);
        assert_eq!(session.file_count, 1);
        assert!(session.last_accessed >= session.created_at);
        assert!(session.created_at <= Utc::now());
    }
}
