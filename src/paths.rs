use crate::error::Error;
use crate::session::{validate_session_id, Category};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Maps `(session id, category)` to `root/category/session_id`.
#[derive(Debug, Clone)]
pub struct PathAllocator {
    root: PathBuf,
}

impl PathAllocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_root(&self, category: Category) -> PathBuf {
        self.root.join(category.as_str())
    }

    /// Path of a session's category directory. Does not touch the filesystem.
    pub fn session_dir(&self, session_id: &str, category: Category) -> Result<PathBuf, Error> {
        validate_session_id(session_id)?;
        Ok(self.category_root(category).join(session_id))
    }

    pub fn session_dirs(&self, session_id: &str) -> Result<Vec<(Category, PathBuf)>, Error> {
        validate_session_id(session_id)?;
        Ok(Category::ALL
            .iter()
            .map(|category| (*category, self.category_root(*category).join(session_id)))
            .collect())
    }

    /// Validate both inputs, then create the directory (and any parents).
    /// An existing directory is not an error.
    pub fn allocate(&self, session_id: &str, category: &str) -> Result<PathBuf, Error> {
        validate_session_id(session_id)?;
        let category: Category = category.parse()?;
        self.allocate_category(session_id, category)
    }

    pub fn allocate_category(&self, session_id: &str, category: Category) -> Result<PathBuf, Error> {
        let dir = self.session_dir(session_id, category)?;
        fs::create_dir_all(&dir)?;
        trace!("Allocated {}", dir.display());
        Ok(dir)
    }
}
