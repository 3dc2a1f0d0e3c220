//! Recording fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image_autorotate::models::{Metadata, ObjectRef, Orientation};
use image_autorotate::services::notifier::{PublishError, Publisher};
use image_autorotate::services::pipeline::Pipeline;
use image_autorotate::services::rotator::{RotateError, Rotated, Rotator};
use image_autorotate::services::storage::{
    ObjectStorage, StorageError, StorageResult, StoredObject, UploadRequest,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const TOPIC: &str = "projects/test/topics/image-rotated";

/// One externally visible operation, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Download {
        bucket: String,
        key: String,
    },
    Rotate {
        input: Bytes,
    },
    Upload {
        bucket: String,
        key: String,
        bytes: Bytes,
        content_type: Option<String>,
        metadata: Metadata,
        resumable: bool,
    },
    Publish {
        topic: String,
        payload: Bytes,
        /// Whether the staged file still existed when the message went out.
        staged_present: bool,
    },
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

#[derive(Default, Clone, Copy)]
pub struct Failures {
    pub download: bool,
    pub rotate: bool,
    pub upload: bool,
    pub publish: bool,
    /// Leave the staged path unwritable for the write-back after rotation.
    pub write_back: bool,
}

pub struct FakeStorage {
    objects: Mutex<HashMap<(String, String), Bytes>>,
    fail_download: bool,
    fail_upload: bool,
    log: CallLog,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn download(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.log.lock().unwrap().push(Call::Download {
            bucket: bucket.into(),
            key: key.into(),
        });
        if self.fail_download {
            return Err(StorageError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.into(),
                key: key.into(),
            })
    }

    async fn upload(&self, request: UploadRequest) -> StorageResult<StoredObject> {
        self.log.lock().unwrap().push(Call::Upload {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            bytes: request.bytes.clone(),
            content_type: request.content_type.clone(),
            metadata: request.metadata.clone(),
            resumable: request.resumable,
        });
        if self.fail_upload {
            return Err(StorageError::Status {
                status: 500,
                body: "backend error".into(),
            });
        }
        self.objects
            .lock()
            .unwrap()
            .insert((request.bucket.clone(), request.key.clone()), request.bytes);
        Ok(StoredObject {
            bucket: request.bucket,
            key: request.key,
            metageneration: 2,
        })
    }
}

pub struct FakePublisher {
    fail: bool,
    staged_path: PathBuf,
    log: CallLog,
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<String, PublishError> {
        self.log.lock().unwrap().push(Call::Publish {
            topic: topic.into(),
            payload,
            staged_present: self.staged_path.exists(),
        });
        if self.fail {
            return Err(PublishError::NoMessageId(topic.into()));
        }
        Ok("msg-1".into())
    }
}

/// Returns its input unchanged, as if the image had been rotated in place.
pub struct StubRotator {
    fail: bool,
    break_write_back: bool,
    staged_path: PathBuf,
    log: CallLog,
}

impl StubRotator {
    /// Swap the staged file for a symlink into a directory that does not
    /// exist, so writing through it fails while removing it still works.
    #[cfg(unix)]
    fn break_staged_path(&self) {
        std::fs::remove_file(&self.staged_path).unwrap();
        let target = self.staged_path.with_file_name("missing-dir").join("photo.jpg");
        std::os::unix::fs::symlink(target, &self.staged_path).unwrap();
    }

    #[cfg(not(unix))]
    fn break_staged_path(&self) {
        unimplemented!("write-back failures are only simulated on unix")
    }
}

#[async_trait]
impl Rotator for StubRotator {
    async fn rotate(&self, input: Bytes) -> Result<Rotated, RotateError> {
        self.log.lock().unwrap().push(Call::Rotate {
            input: input.clone(),
        });
        if self.fail {
            return Err(RotateError::Worker("rotation blew up".into()));
        }
        if self.break_write_back {
            self.break_staged_path();
        }
        Ok(Rotated {
            bytes: input,
            orientation: Orientation::Rotate90,
            width: 4,
            height: 2,
        })
    }
}

/// A pipeline over recording fakes, staging into its own temp directory.
pub struct Harness {
    pub pipeline: Pipeline,
    pub log: CallLog,
    pub staging: TempDir,
}

impl Harness {
    /// `object` is seeded into storage with `content` when given.
    pub fn new(object: &ObjectRef, content: Option<&[u8]>, failures: Failures) -> Self {
        let staging = tempfile::tempdir().unwrap();
        let log = CallLog::default();

        let mut objects = HashMap::new();
        if let Some(content) = content {
            objects.insert(
                (object.bucket.clone(), object.name.clone()),
                Bytes::copy_from_slice(content),
            );
        }
        let staged_path = Path::new(&object.name)
            .file_name()
            .map(|name| staging.path().join(name))
            .unwrap_or_else(|| staging.path().join("unused"));

        let storage = FakeStorage {
            objects: Mutex::new(objects),
            fail_download: failures.download,
            fail_upload: failures.upload,
            log: log.clone(),
        };
        let publisher = FakePublisher {
            fail: failures.publish,
            staged_path: staged_path.clone(),
            log: log.clone(),
        };
        let rotator = StubRotator {
            fail: failures.rotate,
            break_write_back: failures.write_back,
            staged_path,
            log: log.clone(),
        };

        let pipeline = Pipeline::new(
            Arc::new(storage),
            Arc::new(publisher),
            Arc::new(rotator),
            staging.path(),
            Some(TOPIC.into()),
        )
        .unwrap();

        Self {
            pipeline,
            log,
            staging,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    /// Files left behind in the staging directory.
    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.staging.path()).unwrap().count()
    }
}

/// A small JPEG, with an EXIF Orientation tag spliced in when given.
pub fn jpeg(width: u32, height: u32, orientation: Option<u16>) -> Vec<u8> {
    let mut plain = Vec::new();
    DynamicImage::new_rgb8(width, height)
        .to_rgb8()
        .write_with_encoder(JpegEncoder::new_with_quality(&mut plain, 90))
        .unwrap();

    let Some(value) = orientation else {
        return plain;
    };

    let mut tiff = b"MM\x00\x2a\x00\x00\x00\x08".to_vec();
    tiff.extend_from_slice(&1u16.to_be_bytes());
    tiff.extend_from_slice(&0x0112u16.to_be_bytes());
    tiff.extend_from_slice(&3u16.to_be_bytes());
    tiff.extend_from_slice(&1u32.to_be_bytes());
    tiff.extend_from_slice(&value.to_be_bytes());
    tiff.extend_from_slice(&[0, 0]);
    tiff.extend_from_slice(&0u32.to_be_bytes());

    let mut payload = b"Exif\x00\x00".to_vec();
    payload.extend_from_slice(&tiff);

    let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&plain[2..]);
    out
}
