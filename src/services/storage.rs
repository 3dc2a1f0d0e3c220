//! Object storage seam used by the pipeline.
//!
//! The pipeline only ever reads an object in full and writes it back in a
//! single shot, so the trait is two calls wide. `GcsStorage` talks to Cloud
//! Storage; `LocalStore` keeps objects on disk for development.

use crate::models::Metadata;
use crate::services::auth::AuthError;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("access to `{bucket}/{key}` denied")]
    Forbidden { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("invalid bucket name `{0}`")]
    InvalidBucketName(String),
    #[error("storage responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A full replacement of an object's bytes and custom metadata.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bucket: String,
    pub key: String,
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub metadata: Metadata,
    /// Resumable sessions keep partial-transfer state; the pipeline never asks for one.
    pub resumable: bool,
}

/// Acknowledgement of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub metageneration: i64,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Read the current bytes of `bucket/key` in full.
    async fn download(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    /// Replace `bucket/key`. Storage bumps the object's metageneration.
    async fn upload(&self, request: UploadRequest) -> StorageResult<StoredObject>;
}
