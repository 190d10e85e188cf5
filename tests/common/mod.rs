#![allow(dead_code)]

use chrono::{Duration, Utc};
use session_janitor::{DiskProbe, StorageConfig, StorageEngine, VolumeStats};
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Replays a list of used percentages on a 100-byte volume, one per sample.
/// The last value repeats once the script runs out.
pub struct ScriptedProbe {
    percents: Mutex<VecDeque<u64>>,
    last: Mutex<u64>,
}

impl ScriptedProbe {
    pub fn new(percents: &[u64]) -> Self {
        Self {
            percents: Mutex::new(percents.iter().copied().collect()),
            last: Mutex::new(percents.last().copied().unwrap_or(0)),
        }
    }
}

impl DiskProbe for ScriptedProbe {
    fn sample(&self, _path: &Path) -> io::Result<VolumeStats> {
        let used = match self.percents.lock().unwrap().pop_front() {
            Some(used) => {
                *self.last.lock().unwrap() = used;
                used
            }
            None => *self.last.lock().unwrap(),
        };
        Ok(VolumeStats {
            total_bytes: 100,
            free_bytes: 100 - used,
        })
    }
}

/// Always fails, as an unmounted volume would.
pub struct FailingProbe;

impl DiskProbe for FailingProbe {
    fn sample(&self, path: &Path) -> io::Result<VolumeStats> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no volume at {}", path.display()),
        ))
    }
}

pub fn engine_with(root: &Path, config: StorageConfig, percents: &[u64]) -> StorageEngine {
    let config = StorageConfig {
        root_path: root.to_path_buf(),
        ..config
    };
    StorageEngine::with_probe(config, Arc::new(ScriptedProbe::new(percents))).unwrap()
}

pub fn engine(root: &Path, percents: &[u64]) -> StorageEngine {
    engine_with(root, StorageConfig::default(), percents)
}

/// Write `bytes` bytes into `<root>/<category>/<session_id>/<name>`.
pub fn write_session_file(
    root: &Path,
    category: &str,
    session_id: &str,
    name: &str,
    bytes: usize,
) -> PathBuf {
    let dir = root.join(category).join(session_id);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, vec![0x5Au8; bytes]).unwrap();
    path
}

/// Register a session created `hours_ago` and give it one upload on disk.
pub fn seed_session(engine: &StorageEngine, root: &Path, session_id: &str, hours_ago: i64) {
    engine
        .registry()
        .register_at(session_id, Utc::now() - Duration::hours(hours_ago))
        .unwrap();
    write_session_file(root, "uploads", session_id, "input.bin", 64);
}

pub fn session_exists(root: &Path, session_id: &str) -> bool {
    ["uploads", "processing", "downloads"]
        .iter()
        .any(|category| root.join(category).join(session_id).exists())
}
