//! Scoped working directories
//!
//! The model backend exchanges audio through files. Each call gets its own
//! directory which is removed when the [`WorkDir`] is dropped, on success and
//! on every error path.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::TempDir;

use crate::error::Result;

/// Temporary directory owned by one synthesis call
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    /// Create under `parent`, or under the system temp dir when `None`
    pub fn create(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("voice-clone-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        debug!("Created working directory {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of `name` inside the directory; the file is not created
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `bytes` to `name` and return its path
    pub async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.file(name);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Remove the directory now and report failures
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Failed to remove working directory {}: {}", path.display(), e);
            return Err(e.into());
        }
        debug!("Removed working directory {}", path.display());
        Ok(())
    }

    /// Remove the directory now; a failure is only logged
    pub fn release(self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_is_removed_on_drop() {
        let path = {
            let work = WorkDir::create(None).unwrap();
            let file = work.write("reference.wav", b"RIFF").await.unwrap();
            assert!(file.exists());
            work.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn close_removes_directory_under_parent() {
        let parent = tempfile::tempdir().unwrap();
        let work = WorkDir::create(Some(&parent.path().join("jobs"))).unwrap();
        assert!(work.path().starts_with(parent.path()));
        work.write("output.wav", b"data").await.unwrap();

        let path = work.path().to_path_buf();
        work.close().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_removal_is_reported_by_close_only() {
        let work = WorkDir::create(None).unwrap();
        std::fs::remove_dir_all(work.path()).unwrap();
        assert!(work.close().is_err());

        let work = WorkDir::create(None).unwrap();
        let path = work.path().to_path_buf();
        std::fs::remove_dir_all(&path).unwrap();
        work.release();
        assert!(!path.exists());
    }
}
