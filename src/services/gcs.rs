//! Cloud Storage JSON API client.
//!
//! Downloads use `alt=media`; uploads are single-request `multipart/related`
//! bodies carrying the object resource (name, content type, metadata)
//! followed by the bytes.

use crate::models::{Metadata, Metageneration};
use crate::services::auth::TokenSource;
use crate::services::storage::{
    ObjectStorage, StorageError, StorageResult, StoredObject, UploadRequest,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Clone)]
pub struct GcsStorage {
    client: Client,
    endpoint: String,
    auth: Arc<TokenSource>,
}

/// The subset of the object resource returned by an upload.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    bucket: String,
    name: String,
    metageneration: Metageneration,
}

impl GcsStorage {
    pub fn new(client: Client, endpoint: impl Into<String>, auth: Arc<TokenSource>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    fn media_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}?alt=media",
            self.endpoint,
            urlencoding::encode(bucket),
            urlencoding::encode(key)
        )
    }

    fn upload_url(&self, bucket: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=multipart",
            self.endpoint,
            urlencoding::encode(bucket)
        )
    }
}

#[async_trait]
impl ObjectStorage for GcsStorage {
    async fn download(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let request = self.client.get(self.media_url(bucket, key));
        let response = self.auth.authorize(request).await?.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, bucket, key, body));
        }

        let data = response.bytes().await?;
        debug!(bucket, key, size = data.len(), "downloaded object");
        Ok(data)
    }

    async fn upload(&self, request: UploadRequest) -> StorageResult<StoredObject> {
        if request.resumable {
            return Err(StorageError::Unsupported("resumable upload"));
        }

        let boundary = format!("autorotate-{}", Uuid::new_v4().simple());
        let resource = serde_json::to_vec(&object_resource(&request))?;
        let body = multipart_related_body(
            &boundary,
            &resource,
            request.content_type.as_deref(),
            &request.bytes,
        );

        let http = self
            .client
            .post(self.upload_url(&request.bucket))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);
        let response = self.auth.authorize(http).await?.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &request.bucket, &request.key, body));
        }

        let stored: ObjectResource = response.json().await?;
        Ok(StoredObject {
            bucket: stored.bucket,
            key: stored.name,
            metageneration: stored.metageneration.get(),
        })
    }
}

/// Object resource sent as the first part of a multipart upload.
fn object_resource(request: &UploadRequest) -> Value {
    let mut resource = json!({
        "name": request.key,
        "metadata": stringify_metadata(&request.metadata),
    });
    if let Some(content_type) = &request.content_type {
        resource["contentType"] = Value::String(content_type.clone());
    }
    resource
}

/// Custom metadata values must be strings on the wire.
fn stringify_metadata(metadata: &Metadata) -> Map<String, Value> {
    metadata
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), Value::String(text))
        })
        .collect()
}

fn multipart_related_body(
    boundary: &str,
    resource: &[u8],
    content_type: Option<&str>,
    bytes: &[u8],
) -> Vec<u8> {
    let media_type = content_type.unwrap_or("application/octet-stream");
    let mut body = Vec::with_capacity(resource.len() + bytes.len() + 256);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(resource);
    body.extend_from_slice(format!("\r\n--{boundary}\r\nContent-Type: {media_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn map_status(status: StatusCode, bucket: &str, key: &str, body: String) -> StorageError {
    match status {
        StatusCode::NOT_FOUND => StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            error!(bucket, key, status = %status, "access denied by Cloud Storage");
            StorageError::Forbidden {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }
        }
        status => StorageError::Status {
            status: status.as_u16(),
            body,
        },
    }
}
