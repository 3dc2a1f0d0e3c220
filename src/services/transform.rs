//! Runs the rotation capability against a staged file and persists the result.

use crate::models::TransformResult;
use crate::services::rotator::{RotateError, Rotator};
use crate::services::staging::StagedFile;
use bytes::Bytes;
use std::{io, path::PathBuf, sync::Arc};
use thiserror::Error;
use tokio::fs;
use tracing::info;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("could not read staged file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Rotate(#[from] RotateError),
    #[error("could not write rotated image to {path}: {source}")]
    WriteBack {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransformError {
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Rotate(err) if err.is_benign())
    }
}

pub struct TransformInvoker {
    rotator: Arc<dyn Rotator>,
}

impl TransformInvoker {
    pub fn new(rotator: Arc<dyn Rotator>) -> Self {
        Self { rotator }
    }

    /// Rotate the staged image in place.
    pub async fn transform(&self, staged: &StagedFile) -> Result<TransformResult, TransformError> {
        let path = staged.path();
        let input = fs::read(path).await.map_err(|source| TransformError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let rotated = self.rotator.rotate(Bytes::from(input)).await?;
        info!(
            orientation = %rotated.orientation,
            height = rotated.height,
            width = rotated.width,
            "corrected orientation"
        );

        fs::write(path, &rotated.bytes)
            .await
            .map_err(|source| TransformError::WriteBack {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(TransformResult {
            orientation: rotated.orientation,
            height: rotated.height,
            width: rotated.width,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ObjectRef, Orientation};
    use crate::services::rotator::{ExifRotator, test_images::jpeg};
    use crate::services::staging::Stager;
    use crate::services::storage::{
        ObjectStorage, StorageError, StorageResult, StoredObject, UploadRequest,
    };
    use async_trait::async_trait;

    struct Fixed(Bytes);

    #[async_trait]
    impl ObjectStorage for Fixed {
        async fn download(&self, _bucket: &str, _key: &str) -> StorageResult<Bytes> {
            Ok(self.0.clone())
        }

        async fn upload(&self, _request: UploadRequest) -> StorageResult<StoredObject> {
            Err(StorageError::Unsupported("upload"))
        }
    }

    async fn staged(dir: &std::path::Path, content: Vec<u8>) -> StagedFile {
        Stager::new(Arc::new(Fixed(Bytes::from(content))), dir)
            .stage(&ObjectRef::new("b", "photo.jpg", "image/jpeg", 1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn rewrites_staged_file_upright() {
        let dir = tempfile::tempdir().unwrap();
        let file = staged(dir.path(), jpeg(12, 6, Some(8))).await;

        let invoker = TransformInvoker::new(Arc::new(ExifRotator::default()));
        let result = invoker.transform(&file).await.unwrap();
        assert_eq!(result.orientation, Orientation::Rotate270);
        assert_eq!((result.width, result.height), (6, 12));

        let img = image::open(file.path()).unwrap();
        assert_eq!((img.width(), img.height()), (6, 12));
        file.release().await.unwrap();
    }

    #[tokio::test]
    async fn nothing_to_correct_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let original = jpeg(12, 6, Some(1));
        let file = staged(dir.path(), original.clone()).await;

        let invoker = TransformInvoker::new(Arc::new(ExifRotator::default()));
        let err = invoker.transform(&file).await.unwrap_err();
        assert!(err.is_benign());
        assert_eq!(std::fs::read(file.path()).unwrap(), original);
    }

    #[tokio::test]
    async fn garbage_is_not_benign() {
        let dir = tempfile::tempdir().unwrap();
        let file = staged(dir.path(), b"definitely not a jpeg".to_vec()).await;

        let invoker = TransformInvoker::new(Arc::new(ExifRotator::default()));
        let err = invoker.transform(&file).await.unwrap_err();
        assert!(matches!(err, TransformError::Rotate(_)));
    }
}
