use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::SemVer;
use crate::error::{ReleaseError, Result};
use crate::publish::PackageIndex;

#[derive(Debug, Default)]
struct IndexState {
    published: HashSet<(String, SemVer)>,
    uploads: Vec<(PathBuf, String)>,
    fail_uploads: bool,
}

/// Mock package index; clones share state
#[derive(Debug, Clone, Default)]
pub struct MockPackageIndex {
    state: Arc<Mutex<IndexState>>,
}

impl MockPackageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pretend `version` of `project` is already on the index
    pub fn mark_published(&self, project: &str, version: SemVer) {
        self.state().published.insert((project.to_string(), version));
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.state().fail_uploads = fail;
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.state().uploads.clone()
    }
}

impl PackageIndex for MockPackageIndex {
    fn is_published(&self, project: &str, version: &SemVer) -> Result<bool> {
        Ok(self
            .state()
            .published
            .contains(&(project.to_string(), *version)))
    }

    fn build_and_upload(&self, checkout_path: &Path, project: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_uploads {
            return Err(ReleaseError::transport("upload refused"));
        }
        state
            .uploads
            .push((checkout_path.to_path_buf(), project.to_string()));
        Ok(())
    }
}
