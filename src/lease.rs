use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{ReleaseError, Result};

/// Exclusive per-checkout lease held by the driving process
///
/// Released when dropped.
#[derive(Debug)]
pub struct CheckoutLease {
    path: PathBuf,
    _file: File,
}

impl CheckoutLease {
    /// Try to take the lease at `path` (non-blocking)
    ///
    /// The lease file lives outside the checkout, which `sync` cleans.
    /// Fails with `Busy` if another process already drives this checkout.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let path = path.to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        file.try_lock_exclusive().map_err(|_| {
            ReleaseError::Busy(format!(
                "{} is held by another release-bot process",
                path.display()
            ))
        })?;

        Ok(CheckoutLease { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_drop() {
        let dir = TempDir::new().unwrap();

        let path = dir.path().join("leases").join("widget.lock");

        let lease = CheckoutLease::acquire(&path).unwrap();
        assert!(lease.path().exists());
        assert!(matches!(
            CheckoutLease::acquire(&path),
            Err(ReleaseError::Busy(_))
        ));

        drop(lease);
        let _again = CheckoutLease::acquire(&path).unwrap();
    }
}
