//! Staging of remote objects into a local working file.
//!
//! `Stager::stage` downloads the whole object and hands back a `StagedFile`
//! that owns the local path. Release it explicitly with
//! `StagedFile::release` to observe removal errors; if it is dropped
//! unreleased (panic, cancelled task) the file is removed in `Drop`.

use crate::models::ObjectRef;
use crate::services::storage::{ObjectStorage, StorageError};
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("object name `{0}` has no usable file name")]
    InvalidName(String),
    #[error("download failed: {0}")]
    Download(#[source] StorageError),
    #[error("could not write staged file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not remove staged file {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub struct Stager {
    storage: Arc<dyn ObjectStorage>,
    dir: PathBuf,
}

impl Stager {
    pub fn new(storage: Arc<dyn ObjectStorage>, dir: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local path for an object: its basename under the staging directory.
    ///
    /// Directory components of the remote name are discarded so an
    /// untrusted key cannot point outside the staging directory.
    pub fn local_path(&self, name: &str) -> Result<PathBuf, TransferError> {
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| TransferError::InvalidName(name.to_string()))?;
        Ok(self.dir.join(file_name))
    }

    /// Download `object` into its local path, replacing any stale file.
    pub async fn stage(&self, object: &ObjectRef) -> Result<StagedFile, TransferError> {
        let path = self.local_path(&object.name)?;

        let bytes = self
            .storage
            .download(&object.bucket, &object.name)
            .await
            .map_err(TransferError::Download)?;

        write_replacing(&path, &bytes)
            .await
            .map_err(|source| TransferError::Write {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), size = bytes.len(), "staged object");
        Ok(StagedFile {
            path,
            released: false,
        })
    }
}

/// Write through a unique sibling and rename into place so readers never see
/// a partial file.
async fn write_replacing(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;
    let tmp_path = parent.join(format!(".staging-{}", Uuid::new_v4()));

    let result = async {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path).await;
    }
    result
}

/// A local copy owned by exactly one pipeline invocation.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    released: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the staged file. Consumes the handle, so removal happens once.
    pub async fn release(mut self) -> Result<(), TransferError> {
        self.released = true;
        fs::remove_file(&self.path)
            .await
            .map_err(|source| TransferError::Cleanup {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), "removed staged file");
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed abandoned staged file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), error = %err, "could not remove abandoned staged file"),
        }
    }
}
