//! Single-active-run guard.
//!
//! A run holds an exclusive lock file for its pipeline. The file is created
//! with `create_new`, so a second run against the same directory fails
//! immediately instead of racing on the same artifact path.

use dagline_core::{CoreError, CoreResult, PipelineId};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive lock for one pipeline; released on drop
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Acquire the lock for `pipeline` in `dir`
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if another run holds the lock, or an I/O
    /// error if the lock file cannot be created
    pub fn acquire(dir: &Path, pipeline: &PipelineId) -> CoreResult<Self> {
        fs::create_dir_all(dir).map_err(|e| CoreError::io("create lock directory", &e))?;
        let path = Self::lock_path(dir, pipeline);

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = Self::holder(&path).unwrap_or_else(|| "unknown pid".to_string());
                return Err(CoreError::AlreadyExists {
                    kind: "Active run".to_string(),
                    id: format!("{} (lock {} held by {})", pipeline, path.display(), holder),
                });
            }
            Err(e) => return Err(CoreError::io("acquire run lock", &e)),
        };

        stamp(file, &path)?;
        debug!(path = %path.display(), "run lock acquired");

        Ok(Self { path })
    }

    /// Where the lock file for `pipeline` lives
    #[must_use]
    pub fn lock_path(dir: &Path, pipeline: &PipelineId) -> PathBuf {
        dir.join(format!(".{}.lock", pipeline))
    }

    /// Pid recorded in an existing lock file
    fn holder(path: &Path) -> Option<String> {
        let text = fs::read_to_string(path).ok()?;
        let pid = text.trim();
        (!pid.is_empty()).then(|| format!("pid {}", pid))
    }

    /// Path of the held lock file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a lock left behind by a crashed run; true if one existed
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be removed
    pub fn clear(dir: &Path, pipeline: &PipelineId) -> CoreResult<bool> {
        match fs::remove_file(Self::lock_path(dir, pipeline)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CoreError::io("clear run lock", &e)),
        }
    }
}

/// Record the owner pid in a fresh lock file; the file is removed if the
/// write fails so no stale lock is left behind
fn stamp<W: Write>(mut out: W, path: &Path) -> CoreResult<()> {
    let written = writeln!(out, "{}", std::process::id()).and_then(|()| out.flush());
    drop(out);
    if let Err(e) = written {
        if let Err(remove) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %remove, "failed to remove half-written run lock");
        }
        return Err(CoreError::io("write run lock", &e));
    }
    Ok(())
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> PipelineId {
        PipelineId::new("Airflow_project").unwrap()
    }

    #[test]
    fn test_second_acquire_fails() {
        let dir = tempfile::tempdir().unwrap();
        let lock = RunLock::acquire(dir.path(), &pipeline()).unwrap();
        assert!(lock.path().exists());

        let err = RunLock::acquire(dir.path(), &pipeline()).unwrap_err();
        match err {
            CoreError::AlreadyExists { id, .. } => {
                assert!(id.contains(&lock.path().display().to_string()));
                assert!(id.contains(&format!("pid {}", std::process::id())));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let lock = RunLock::acquire(dir.path(), &pipeline()).unwrap();
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
        assert!(RunLock::acquire(dir.path(), &pipeline()).is_ok());
    }

    #[test]
    fn test_clear_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(RunLock::lock_path(dir.path(), &pipeline()), "123\n").unwrap();

        assert!(RunLock::clear(dir.path(), &pipeline()).unwrap());
        assert!(!RunLock::clear(dir.path(), &pipeline()).unwrap());
        assert!(RunLock::acquire(dir.path(), &pipeline()).is_ok());
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_stamp_removes_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = RunLock::lock_path(dir.path(), &pipeline());
        fs::write(&path, "").unwrap();

        let err = stamp(BrokenWriter, &path).unwrap_err();
        assert!(matches!(err, CoreError::Io { .. }));
        assert!(!path.exists());
        assert!(RunLock::acquire(dir.path(), &pipeline()).is_ok());
    }

    #[test]
    fn test_locks_are_per_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let _a = RunLock::acquire(dir.path(), &pipeline()).unwrap();
        let other = PipelineId::new("Airflow_project_Flask").unwrap();
        assert!(RunLock::acquire(dir.path(), &other).is_ok());
    }
}
