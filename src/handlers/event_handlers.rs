//! Trigger endpoint.
//!
//! Accepts either a bare object resource or a Pub/Sub push envelope whose
//! `message.data` is a base64 object resource. Once the body decodes, the
//! response is always 204: pipeline failures are logged, not redelivered.

use crate::{errors::AppError, models::ObjectRef, state::AppState};
use axum::{body::Bytes, extract::State, http::StatusCode};
use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PushMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushMessage {
    data: String,
    #[serde(default)]
    message_id: Option<String>,
}

/// `POST /`
pub async fn receive_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let object = decode_event(&body)?;
    state.pipeline.handle(&object).await;
    Ok(StatusCode::NO_CONTENT)
}

pub fn decode_event(body: &[u8]) -> Result<ObjectRef, AppError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::bad_request(format!("event is not valid JSON: {e}")))?;

    if value.get("message").is_some_and(Value::is_object) {
        let envelope: PushEnvelope = serde_json::from_value(value)
            .map_err(|e| AppError::bad_request(format!("invalid push envelope: {e}")))?;
        tracing::debug!(message_id = ?envelope.message.message_id, "unwrapping push message");

        let data = general_purpose::STANDARD
            .decode(envelope.message.data.trim())
            .map_err(|e| AppError::bad_request(format!("push message data is not base64: {e}")))?;
        return serde_json::from_slice(&data)
            .map_err(|e| AppError::bad_request(format!("invalid object in push message: {e}")));
    }

    serde_json::from_value(value)
        .map_err(|e| AppError::bad_request(format!("invalid object event: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_bare_object() {
        let body = json!({
            "bucket": "b",
            "name": "photo.jpg",
            "contentType": "image/jpeg",
            "metageneration": "1"
        });
        let object = decode_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(object.path(), "b/photo.jpg");
        assert_eq!(object.metageneration(), 1);
    }

    #[test]
    fn unwraps_push_envelope() {
        let inner = json!({
            "bucket": "b",
            "name": "photo.jpg",
            "contentType": "image/jpeg",
            "metageneration": 2
        });
        let body = json!({
            "message": {
                "data": general_purpose::STANDARD.encode(inner.to_string()),
                "messageId": "123",
                "attributes": { "eventType": "OBJECT_FINALIZE" }
            },
            "subscription": "projects/p/subscriptions/s"
        });

        let object = decode_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(object.name, "photo.jpg");
        assert_eq!(object.metageneration(), 2);
    }

    #[test]
    fn rejects_malformed_bodies() {
        for body in [
            "not json".to_string(),
            json!({ "name": "no bucket", "metageneration": 1 }).to_string(),
            json!({ "message": { "data": "%%%" } }).to_string(),
        ] {
            let err = decode_event(body.as_bytes()).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
        }
    }
}
