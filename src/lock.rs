//! Advisory lock guarding a node home against concurrent runs.

use crate::error::SnapshotError;
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held for the whole mutating pipeline; released on drop.
///
/// The lock file itself is never removed. Every run must lock the same inode,
/// so unlinking it could let two runs each hold a lock on a different file.
#[derive(Debug)]
pub struct NodeLock {
    path: PathBuf,
    file: File,
}

impl NodeLock {
    pub fn acquire(lock_path: &Path, purpose: &str) -> Result<Self, SnapshotError> {
        if let Some(dir) = lock_path.parent() {
            fs::create_dir_all(dir).map_err(|e| SnapshotError::fs(dir, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)
            .map_err(|e| SnapshotError::fs(lock_path, e))?;

        if let Err(err) = file.try_lock_exclusive() {
            let holder = fs::read_to_string(lock_path).unwrap_or_default();
            return Err(SnapshotError::Locked {
                path: lock_path.to_path_buf(),
                reason: if holder.trim().is_empty() {
                    err.to_string()
                } else {
                    format!("{}; held by {}", err, holder.trim())
                },
            });
        }

        file.set_len(0).map_err(|e| SnapshotError::fs(lock_path, e))?;
        writeln!(
            &file,
            "pid={};purpose={};started={}",
            std::process::id(),
            purpose,
            Utc::now().to_rfc3339()
        )
        .map_err(|e| SnapshotError::fs(lock_path, e))?;
        debug!("Acquired {}", lock_path.display());

        Ok(Self {
            path: lock_path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NodeLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_released() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".story/.storysnap.lock");

        let first = NodeLock::acquire(&path, "snapshot-apply").unwrap();
        let contents = fs::read_to_string(first.path()).unwrap();
        assert!(contents.contains("purpose=snapshot-apply"));

        let err = NodeLock::acquire(&path, "snapshot-apply").unwrap_err();
        assert!(matches!(err, SnapshotError::Locked { .. }));
        assert!(err.to_string().contains(".storysnap.lock"));

        drop(first);
        assert!(path.exists());
        NodeLock::acquire(&path, "snapshot-apply").unwrap();
    }

    #[test]
    fn waiter_and_newcomer_contend_for_the_same_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".storysnap.lock");

        let first = NodeLock::acquire(&path, "snapshot-apply").unwrap();
        // a run that opened the lock file while it was held
        let waiter = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        assert!(waiter.try_lock_exclusive().is_err());

        drop(first);
        waiter.try_lock_exclusive().unwrap();
        let err = NodeLock::acquire(&path, "snapshot-apply").unwrap_err();
        assert!(matches!(err, SnapshotError::Locked { .. }));

        waiter.unlock().unwrap();
        NodeLock::acquire(&path, "snapshot-apply").unwrap();
    }
}
