//! src/services/local_store.rs
//!
//! LocalStore: development stand-in for both the object store and the
//! notification broker. Object payloads live on disk sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`; object rows and published
//! notifications live in SQLite. Every successful write emits a finalize
//! event, the way a storage trigger would, so the pipeline's own replace
//! comes back around as a new event.

use crate::models::{Metadata, Metageneration, ObjectRef};
use crate::services::notifier::{PublishError, Publisher};
use crate::services::storage::{
    ObjectStorage, StorageError, StorageResult, StoredObject, UploadRequest,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::{FromRow, SqlitePool};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::mpsc::UnboundedSender,
};
use tracing::{debug, warn};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");
const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Stored object row. Payload bytes live on disk, not here.
#[derive(Clone, FromRow, Debug)]
pub struct ObjectRow {
    pub id: Uuid,
    pub bucket: String,
    pub key: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    /// Base64 MD5 of the payload, as Cloud Storage reports it.
    pub md5_hash: String,
    pub metageneration: i64,
    /// Custom metadata as a JSON object.
    pub metadata: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ObjectRow {
    /// The finalize event a storage trigger would deliver for this row.
    pub fn to_object_ref(&self) -> StorageResult<ObjectRef> {
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str::<Metadata>)
            .transpose()?;

        let mut extra = Map::new();
        extra.insert("id".into(), Value::String(format!("{}/{}", self.bucket, self.key)));
        extra.insert("size".into(), Value::String(self.size_bytes.to_string()));
        extra.insert("md5Hash".into(), Value::String(self.md5_hash.clone()));
        extra.insert(
            "updated".into(),
            Value::String(self.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        Ok(ObjectRef {
            bucket: self.bucket.clone(),
            name: self.key.clone(),
            content_type: self.content_type.clone().unwrap_or_default(),
            metageneration: Metageneration::from(self.metageneration),
            metadata,
            extra,
        })
    }
}

/// A message recorded by the local broker.
#[derive(Clone, FromRow, Debug)]
pub struct Notification {
    pub id: Uuid,
    pub topic: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LocalStore {
    /// Shared SQLite connection pool used for object rows and notifications.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    finalize: Option<UnboundedSender<ObjectRef>>,
}

impl LocalStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            finalize: None,
        }
    }

    /// Send a finalize event on `events` after every successful write.
    pub fn with_finalize_events(mut self, events: UnboundedSender<ObjectRef>) -> Self {
        self.finalize = Some(events);
        self
    }

    /// Create tables if they do not exist yet.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} schema statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.ends_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// 3–63 characters of lowercase letters, digits, dots, hyphens and
    /// underscores, starting and ending with a letter or digit.
    fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
        let valid_len = (BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&name.len());
        let valid_chars = name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-' | '_'));
        let valid_ends = name
            .chars()
            .next()
            .zip(name.chars().last())
            .is_some_and(|(first, last)| {
                first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric()
            });

        if valid_len && valid_chars && valid_ends && !name.contains("..") {
            Ok(())
        } else {
            Err(StorageError::InvalidBucketName(name.to_string()))
        }
    }

    /// Two-level shard identifiers from MD5(bucket/key), to keep directories small.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.base_path.clone();
        path.push(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectRow> {
        sqlx::query_as::<_, ObjectRow>(
            "SELECT id, bucket, key, content_type, size_bytes, md5_hash,
                    metageneration, metadata, updated_at
             FROM objects WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Write an object and its row. An overwrite bumps `metageneration`.
    ///
    /// Bytes go to a temporary sibling first and are renamed into place
    /// only after the row is committed.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: Option<String>,
        metadata: Option<Metadata>,
    ) -> StorageResult<ObjectRow> {
        Self::ensure_bucket_name_safe(bucket)?;
        Self::ensure_key_safe(key)?;

        let file_path = self.object_path(bucket, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        if let Err(err) = write_synced(&tmp_path, bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let md5_hash = general_purpose::STANDARD.encode(md5::compute(bytes).0);
        let metadata_json = metadata.as_ref().map(serde_json::to_string).transpose()?;

        let upsert = sqlx::query_as::<_, ObjectRow>(
            r#"
            INSERT INTO objects (
                id, bucket, key, content_type, size_bytes, md5_hash,
                metageneration, metadata, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                md5_hash = excluded.md5_hash,
                metageneration = objects.metageneration + 1,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            RETURNING id, bucket, key, content_type, size_bytes, md5_hash,
                      metageneration, metadata, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket)
        .bind(key)
        .bind(content_type)
        .bind(bytes.len() as i64)
        .bind(&md5_hash)
        .bind(metadata_json)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        let row = match upsert {
            Ok(row) => row,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Sqlx(err));
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        debug!(
            bucket,
            key,
            metageneration = row.metageneration,
            "stored object at {}",
            file_path.display()
        );
        self.emit_finalize(&row);
        Ok(row)
    }

    /// Fetch an object row together with its payload.
    pub async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<(ObjectRow, Bytes)> {
        Self::ensure_bucket_name_safe(bucket)?;
        Self::ensure_key_safe(key)?;
        let row = self.fetch_object(bucket, key).await?;

        let file_path = self.object_path(bucket, key);
        let data = fs::read(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((row, Bytes::from(data)))
    }

    /// Notifications published to `topic`, oldest first.
    pub async fn notifications(&self, topic: &str) -> StorageResult<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            "SELECT id, topic, payload, published_at FROM notifications
             WHERE topic = ? ORDER BY rowid ASC",
        )
        .bind(topic)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    fn emit_finalize(&self, row: &ObjectRow) {
        let Some(events) = &self.finalize else {
            return;
        };
        match row.to_object_ref() {
            Ok(object) => {
                if events.send(object).is_err() {
                    debug!("finalize channel closed; event dropped");
                }
            }
            Err(err) => warn!(error = %err, "could not build finalize event"),
        }
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[async_trait]
impl ObjectStorage for LocalStore {
    async fn download(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let (_, data) = self.get_object(bucket, key).await?;
        Ok(data)
    }

    /// Local writes are always single-shot, so `resumable` has no effect.
    async fn upload(&self, request: UploadRequest) -> StorageResult<StoredObject> {
        let row = self
            .put_object(
                &request.bucket,
                &request.key,
                &request.bytes,
                request.content_type,
                Some(request.metadata),
            )
            .await?;
        Ok(StoredObject {
            bucket: row.bucket,
            key: row.key,
            metageneration: row.metageneration,
        })
    }
}

#[async_trait]
impl Publisher for LocalStore {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<String, PublishError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO notifications (id, topic, payload, published_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(topic)
        .bind(payload.to_vec())
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    async fn store() -> (LocalStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = LocalStore::new(Arc::new(pool), dir.path());
        store.migrate().await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn new_object_starts_at_baseline_metageneration() {
        let (store, _dir) = store().await;
        let row = store
            .put_object("photos", "a/b.jpg", b"jpeg", Some("image/jpeg".into()), None)
            .await
            .unwrap();
        assert_eq!(row.metageneration, 1);
        assert_eq!(row.size_bytes, 4);

        let (fetched, data) = store.get_object("photos", "a/b.jpg").await.unwrap();
        assert_eq!(fetched.id, row.id);
        assert_eq!(&data[..], b"jpeg");
    }

    #[tokio::test]
    async fn overwrite_bumps_metageneration_and_replaces_metadata() {
        let (store, _dir) = store().await;
        store
            .put_object("photos", "b.jpg", b"one", Some("image/jpeg".into()), None)
            .await
            .unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("rotated".into(), json!(true));
        let row = store
            .upload(UploadRequest {
                bucket: "photos".into(),
                key: "b.jpg".into(),
                bytes: Bytes::from_static(b"two"),
                content_type: Some("image/jpeg".into()),
                metadata,
                resumable: false,
            })
            .await
            .unwrap();
        assert_eq!(row.metageneration, 2);

        let (fetched, data) = store.get_object("photos", "b.jpg").await.unwrap();
        assert_eq!(&data[..], b"two");
        let object = fetched.to_object_ref().unwrap();
        assert_eq!(object.metadata.unwrap()["rotated"], json!(true));
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (store, _dir) = store().await;
        let err = store.download("photos", "nope.jpg").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unsafe_names_are_rejected() {
        let (store, _dir) = store().await;
        for key in ["", "/abs.jpg", "../up.jpg", "dir/", "a\\b.jpg"] {
            assert!(matches!(
                store.put_object("photos", key, b"x", None, None).await,
                Err(StorageError::InvalidObjectKey)
            ));
        }
        for bucket in ["b", "Photos", "-photos", "pho..tos"] {
            assert!(matches!(
                store.put_object(bucket, "k.jpg", b"x", None, None).await,
                Err(StorageError::InvalidBucketName(_))
            ));
        }
    }

    #[tokio::test]
    async fn writes_emit_finalize_events() {
        let (store, _dir) = store().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let store = store.with_finalize_events(tx);

        store
            .put_object("photos", "c.jpg", b"one", Some("image/jpeg".into()), None)
            .await
            .unwrap();
        store
            .put_object("photos", "c.jpg", b"two", Some("image/jpeg".into()), None)
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.path(), "photos/c.jpg");
        assert_eq!(first.content_type, "image/jpeg");
        assert_eq!(first.metageneration(), 1);
        assert_eq!(second.metageneration(), 2);
        assert_eq!(second.extra["size"], json!("3"));
    }

    #[tokio::test]
    async fn published_messages_are_recorded_per_topic() {
        let (store, _dir) = store().await;
        let id = store
            .publish("image-rotated", Bytes::from_static(b"{\"bucket\":\"b\"}"))
            .await
            .unwrap();
        store
            .publish("other", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        let recorded = store.notifications("image-rotated").await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].id.to_string(), id);
        assert_eq!(recorded[0].payload, b"{\"bucket\":\"b\"}");
    }
}
