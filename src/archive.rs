//! Best-effort session snapshots taken before deletion.
//!
//! A session is packed into `<archive_root>/<id>-<timestamp>.zip` with one
//! top-level folder per category, plus a `.json` sidecar holding its
//! lifecycle metadata. Failures are logged and reported as
//! `ArchiveOutcome::Failed`; they never stop the caller from deleting.

use crate::error::Error;
use crate::paths::PathAllocator;
use crate::registry::{LifecycleInfo, SessionRegistry};
use crate::scanner::usage::measure_dirs;
use crate::session::{validate_session_id, Category};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveRecord {
    pub session_id: String,
    pub archive_path: PathBuf,
    pub metadata_path: PathBuf,
    /// Size of the written archive file.
    pub size_bytes: u64,
    pub archived_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArchiveOutcome {
    Archived(ArchiveRecord),
    Failed { error: String },
}

impl ArchiveOutcome {
    pub fn record(&self) -> Option<&ArchiveRecord> {
        match self {
            ArchiveOutcome::Archived(record) => Some(record),
            ArchiveOutcome::Failed { .. } => None,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.record().is_some()
    }
}

/// Sidecar written next to each archive
#[derive(Debug, Clone, Serialize)]
struct ArchiveMetadata {
    session_id: String,
    archived_at: DateTime<Utc>,
    /// Present when this process had the session registered.
    lifecycle: Option<LifecycleInfo>,
    source_bytes: u64,
    source_files: u64,
    categories: Vec<Category>,
}

pub struct Archiver {
    allocator: PathAllocator,
    registry: Arc<SessionRegistry>,
    archive_root: PathBuf,
}

impl Archiver {
    pub fn new(
        allocator: PathAllocator,
        registry: Arc<SessionRegistry>,
        archive_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            allocator,
            registry,
            archive_root: archive_root.into(),
        }
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    /// Only a malformed session id is an error; everything else is reported
    /// in the outcome.
    pub fn archive(&self, session_id: &str) -> Result<ArchiveOutcome, Error> {
        validate_session_id(session_id)?;

        match self.archive_internal(session_id) {
            Ok(record) => {
                info!(
                    "Archived session {} to {} ({} bytes)",
                    session_id,
                    record.archive_path.display(),
                    record.size_bytes
                );
                Ok(ArchiveOutcome::Archived(record))
            }
            Err(e) => {
                warn!("Failed to archive session {}: {}", session_id, e);
                Ok(ArchiveOutcome::Failed {
                    error: e.to_string(),
                })
            }
        }
    }

    fn archive_internal(&self, session_id: &str) -> Result<ArchiveRecord, Error> {
        let present: Vec<(Category, PathBuf)> = self
            .allocator
            .session_dirs(session_id)?
            .into_iter()
            .filter(|(_, dir)| dir.is_dir())
            .collect();
        if present.is_empty() {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }

        fs::create_dir_all(&self.archive_root)?;

        let archived_at = Utc::now();
        let stem = format!("{}-{}", session_id, archived_at.format("%Y%m%d-%H%M%S%3f"));
        let archive_path = self.archive_root.join(format!("{}.zip", stem));
        let metadata_path = self.archive_root.join(format!("{}.json", stem));

        if let Err(e) = write_zip(&archive_path, &present) {
            remove_partial(&archive_path);
            return Err(e);
        }

        let dirs: Vec<&PathBuf> = present.iter().map(|(_, dir)| dir).collect();
        let usage = measure_dirs(&dirs);
        let metadata = ArchiveMetadata {
            session_id: session_id.to_string(),
            archived_at,
            lifecycle: self.registry.lifecycle_info(session_id).ok(),
            source_bytes: usage.size_bytes,
            source_files: usage.file_count,
            categories: present.iter().map(|(category, _)| *category).collect(),
        };

        let written = serde_json::to_vec_pretty(&metadata)
            .map_err(Error::from)
            .and_then(|json| fs::write(&metadata_path, json).map_err(Error::from));
        if let Err(e) = written {
            remove_partial(&archive_path);
            remove_partial(&metadata_path);
            return Err(e);
        }

        let size_bytes = fs::metadata(&archive_path)?.len();

        Ok(ArchiveRecord {
            session_id: session_id.to_string(),
            archive_path,
            metadata_path,
            size_bytes,
            archived_at,
        })
    }
}

fn write_zip(archive_path: &Path, dirs: &[(Category, PathBuf)]) -> Result<(), Error> {
    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (category, dir) in dirs {
        add_directory_to_zip(&mut zip, dir, category.as_str(), options)?;
    }

    zip.finish()?;
    Ok(())
}

/// Adds every file under `dir` as `<prefix>/<relative path>`. Files are
/// streamed, never read whole into memory.
fn add_directory_to_zip(
    zip: &mut ZipWriter<File>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<(), Error> {
    zip.add_directory(format!("{}/", prefix), options)?;

    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| Error::Archive(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::Archive(e.to_string()))?;
        let name = format!(
            "{}/{}",
            prefix,
            relative.to_string_lossy().replace('\\', "/")
        );

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        } else if entry.file_type().is_file() {
            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            zip.start_file(name, options.large_file(len >= u32::MAX as u64))?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, zip)?;
        } else {
            debug!("Skipping non-regular file {}", entry.path().display());
        }
    }

    Ok(())
}

fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove partial archive {}: {}", path.display(), e);
        }
    }
}
