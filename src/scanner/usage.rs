use serde::Serialize;
use std::io;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, error};
use walkdir::WalkDir;

/// Disk usage of one or more directory trees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirUsage {
    pub size_bytes: u64,
    pub file_count: u64,
    pub earliest_modified: Option<SystemTime>,
    pub latest_modified: Option<SystemTime>,
}

impl DirUsage {
    pub fn merge(&mut self, other: DirUsage) {
        self.size_bytes += other.size_bytes;
        self.file_count += other.file_count;
        self.earliest_modified = min_time(self.earliest_modified, other.earliest_modified);
        self.latest_modified = max_time(self.latest_modified, other.latest_modified);
    }
}

/// Measure every directory in `dirs`. Missing directories count as empty.
pub fn measure_dirs<P: AsRef<Path>>(dirs: &[P]) -> DirUsage {
    let mut usage = DirUsage::default();
    for dir in dirs {
        usage.merge(measure_dir(dir.as_ref()));
    }
    usage
}

/// Walk a single tree. Regular files count towards size; symlinks are not
/// followed or counted. Modification times of directories are included so a
/// tree with no files still has a timestamp.
pub fn measure_dir(dir: &Path) -> DirUsage {
    let mut usage = DirUsage::default();

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                // Trees vanish under us when a concurrent cleanup wins the race.
                match err.io_error().map(|e| e.kind()) {
                    Some(io::ErrorKind::NotFound) => {
                        debug!("Skipping vanished path under {}: {}", dir.display(), err)
                    }
                    _ => error!("Error walking {}: {}", dir.display(), err),
                }
                continue;
            }
        };

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!("Error reading metadata for {}: {}", entry.path().display(), err);
                continue;
            }
        };

        let modified = metadata.modified().ok();
        usage.earliest_modified = min_time(usage.earliest_modified, modified);
        usage.latest_modified = max_time(usage.latest_modified, modified);

        if entry.file_type().is_file() {
            usage.size_bytes += metadata.len();
            usage.file_count += 1;
        }
    }

    usage
}

fn min_time(a: Option<SystemTime>, b: Option<SystemTime>) -> Option<SystemTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn max_time(a: Option<SystemTime>, b: Option<SystemTime>) -> Option<SystemTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
