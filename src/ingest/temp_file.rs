//! Staging file for in-flight uploads
//!
//! Bytes are streamed into a uniquely named file under `<root>/.incoming`
//! and only appear under a final name once the commit step publishes them.
//! Staging lives on the same filesystem as the root so publishing never
//! copies data.
//!
//! # Example
//!
//! ```no_run
//! use local_uploadr::ingest::TemporaryArtifact;
//! use std::path::Path;
//! use tokio::io::AsyncWriteExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut artifact = TemporaryArtifact::create(Path::new("uploads/.incoming")).await?;
//! artifact.file_mut()?.write_all(b"partial").await?;
//! println!("staging at {:?}", artifact.path());
//! // Dropped without being published: the staging file is removed.
//! # Ok(())
//! # }
//! ```

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};

use crate::metrics;

/// Staging file owned by one ingestion call
///
/// Automatically removed when dropped (RAII pattern).
#[derive(Debug)]
pub struct TemporaryArtifact {
    path: PathBuf,
    file: Option<File>,
    size: u64,
    published: bool,
}

impl TemporaryArtifact {
    /// Create an empty staging file in `staging_dir`
    pub async fn create(staging_dir: &Path) -> io::Result<Self> {
        let path = staging_dir.join(format!("{}.part", uuid::Uuid::new_v4()));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Some(file),
            size: 0,
            published: false,
        })
    }

    /// Get the path to the staging file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far
    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// Get a mutable reference to the open staging file
    pub fn file_mut(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("staging file already closed"))
    }

    /// Release the file handle ahead of publishing
    pub(crate) fn close(&mut self) {
        self.file.take();
    }

    /// The bytes are now reachable under a final name
    pub(crate) fn mark_published(&mut self) {
        self.published = true;
    }
}

impl Drop for TemporaryArtifact {
    fn drop(&mut self) {
        self.file.take();

        if !self.published {
            metrics::record_staging_discard();
            tracing::debug!(path = %self.path.display(), "Discarding staging file");
        }

        // After a hard-link publish the staging name is still present; after
        // a rename it is already gone.
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to clean up staging file"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_create_staging_file() {
        let dir = TempDir::new().unwrap();
        let artifact = TemporaryArtifact::create(dir.path()).await.unwrap();

        assert!(artifact.path().exists());
        assert!(artifact.path().starts_with(dir.path()));
        assert_eq!(artifact.size(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_on_drop() {
        let dir = TempDir::new().unwrap();
        let path;
        {
            let mut artifact = TemporaryArtifact::create(dir.path()).await.unwrap();
            artifact.file_mut().unwrap().write_all(b"temp data").await.unwrap();
            path = artifact.path().to_path_buf();
            assert!(path.exists());
        }
        // Dropped
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_closed_handle_reports_error() {
        let dir = TempDir::new().unwrap();
        let mut artifact = TemporaryArtifact::create(dir.path()).await.unwrap();
        artifact.close();
        assert!(artifact.file_mut().is_err());
    }

    #[tokio::test]
    async fn test_missing_staging_dir_fails() {
        let dir = TempDir::new().unwrap();
        let result = TemporaryArtifact::create(&dir.path().join("absent")).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
