//! Replace the remote object with the staged bytes, then announce it.

use crate::errors::PipelineError;
use crate::models::{Metadata, ObjectRef};
use crate::services::notifier::Publisher;
use crate::services::staging::StagedFile;
use crate::services::storage::{ObjectStorage, StorageError, UploadRequest};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tokio::fs;
use tracing::info;

/// Metadata key marking an object as already processed.
pub const ROTATED_FLAG: &str = "rotated";

/// The object's metadata with the rotated flag merged in.
pub fn rotated_metadata(object: &ObjectRef) -> Metadata {
    let mut metadata = object.metadata.clone().unwrap_or_default();
    metadata.insert(ROTATED_FLAG.to_string(), Value::Bool(true));
    metadata
}

pub struct PublishAndReplace {
    storage: Arc<dyn ObjectStorage>,
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl PublishAndReplace {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        publisher: Arc<dyn Publisher>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            publisher,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Upload the staged bytes over `object`, then publish the original record.
    ///
    /// A failed upload publishes nothing. A failed publish leaves the
    /// replaced object in place.
    pub async fn publish(&self, object: &ObjectRef, staged: &StagedFile) -> Result<(), PipelineError> {
        let bytes = fs::read(staged.path())
            .await
            .map_err(|e| PipelineError::Upload(StorageError::Io(e)))?;

        let content_type = Some(object.content_type.clone()).filter(|ct| !ct.is_empty());
        let stored = self
            .storage
            .upload(UploadRequest {
                bucket: object.bucket.clone(),
                key: object.name.clone(),
                bytes: Bytes::from(bytes),
                content_type,
                metadata: rotated_metadata(object),
                resumable: false,
            })
            .await
            .map_err(PipelineError::Upload)?;
        info!(
            metageneration = stored.metageneration,
            "replaced object with rotated image"
        );

        let payload = serde_json::to_vec(object).map_err(PipelineError::Encode)?;
        let message_id = self
            .publisher
            .publish(&self.topic, Bytes::from(payload))
            .await?;
        info!(topic = %self.topic, message_id = %message_id, "published notification");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flag_is_added_to_absent_metadata() {
        let object = ObjectRef::new("b", "photo.jpg", "image/jpeg", 1);
        let metadata = rotated_metadata(&object);
        assert_eq!(Value::Object(metadata), json!({ "rotated": true }));
    }

    #[test]
    fn existing_keys_are_preserved() {
        let mut object = ObjectRef::new("b", "photo.jpg", "image/jpeg", 1);
        let mut existing = Metadata::new();
        existing.insert("owner".into(), json!("alice"));
        existing.insert("rotated".into(), json!(false));
        object.metadata = Some(existing);

        let metadata = rotated_metadata(&object);
        assert_eq!(
            Value::Object(metadata),
            json!({ "owner": "alice", "rotated": true })
        );
        // the event itself is left as it arrived
        assert_eq!(object.metadata.unwrap()["rotated"], json!(false));
    }
}
