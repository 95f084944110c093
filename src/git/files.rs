use crate::error::{ReleaseError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

/// Read/write access to files of the working tree, by path relative to its root
pub trait FileStore: Send {
    fn read(&self, path: &Path) -> Result<String>;

    fn write(&self, path: &Path, content: &str) -> Result<()>;

    /// Every file in the tree, relative paths, `.git` excluded
    fn list(&self) -> Result<Vec<PathBuf>>;

    /// Like [FileStore::read], but a missing file is `Ok(None)`
    fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        match self.read(path) {
            Ok(content) => Ok(Some(content)),
            Err(ReleaseError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Files of a checkout on disk
#[derive(Debug, Clone)]
pub struct WorktreeFiles {
    root: PathBuf,
}

impl WorktreeFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        WorktreeFiles { root: root.into() }
    }
}

impl FileStore for WorktreeFiles {
    fn read(&self, path: &Path) -> Result<String> {
        Ok(fs::read_to_string(self.root.join(path))?)
    }

    fn write(&self, path: &Path, content: &str) -> Result<()> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, content)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");

        for entry in walker {
            let entry = entry.map_err(|e| ReleaseError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                files.push(relative.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// In-memory file tree; clones share the same contents
#[derive(Debug, Clone, Default)]
pub struct MemoryFiles {
    files: Arc<Mutex<BTreeMap<PathBuf, String>>>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style seeding for tests
    pub fn with_file(self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.entries().insert(path.into(), content.into());
        self
    }

    /// Current content of `path`, if any
    pub fn get(&self, path: impl AsRef<Path>) -> Option<String> {
        self.entries().get(path.as_ref()).cloned()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<PathBuf, String>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FileStore for MemoryFiles {
    fn read(&self, path: &Path) -> Result<String> {
        self.get(path).ok_or_else(|| {
            ReleaseError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ))
        })
    }

    fn write(&self, path: &Path, content: &str) -> Result<()> {
        self.entries().insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    fn list(&self) -> Result<Vec<PathBuf>> {
        Ok(self.entries().keys().cloned().collect())
    }
}
