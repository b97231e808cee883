use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::format::ImageFormat;

/// Local directory holding accepted uploads until a worker processes them.
///
/// The directory must be reachable from both the API and the worker
/// processes. Files are named `{image_id}.{format}`.
#[derive(Debug, Clone)]
pub struct StagingStore {
    dir: PathBuf,
}

impl StagingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the staging directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<(), StagingError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StagingError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;
        info!(dir = %self.dir.display(), "Staging directory ready");
        Ok(())
    }

    pub fn path_for(&self, image_id: Uuid, format: ImageFormat) -> PathBuf {
        self.dir.join(format!("{}.{}", image_id, format))
    }

    /// Write upload bytes for a record and return the staged path.
    pub async fn stage(
        &self,
        image_id: Uuid,
        bytes: &[u8],
        format: ImageFormat,
    ) -> Result<PathBuf, StagingError> {
        let path = self.path_for(image_id, format);
        fs::write(&path, bytes)
            .await
            .map_err(|source| StagingError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Read staged bytes back.
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, StagingError> {
        fs::read(path).await.map_err(|source| StagingError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Remove a staged file. Never fails: an absent file counts as removed
    /// and any other error is logged.
    ///
    /// Returns `true` if a file was actually deleted.
    pub async fn remove(&self, path: &Path) -> bool {
        match fs::remove_file(path).await {
            Ok(()) => {
                info!(path = %path.display(), "Removed staged file");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove staged file");
                false
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Failed to create staging directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write staged file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read staged file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
