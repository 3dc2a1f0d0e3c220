//! Pub/Sub REST publisher.

use crate::services::auth::TokenSource;
use crate::services::notifier::{PublishError, Publisher};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";

#[derive(Clone)]
pub struct PubSubPublisher {
    client: Client,
    endpoint: String,
    auth: Arc<TokenSource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

impl PubSubPublisher {
    pub fn new(client: Client, endpoint: impl Into<String>, auth: Arc<TokenSource>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    fn publish_url(&self, topic_path: &str) -> String {
        format!("{}/v1/{}:publish", self.endpoint, topic_path)
    }
}

/// Expand a short topic name to `projects/{project}/topics/{name}`.
///
/// Fully qualified names pass through. A short name with no project cannot
/// be resolved.
pub fn topic_path(topic: &str, project: Option<&str>) -> Option<String> {
    let topic = topic.trim();
    if topic.starts_with("projects/") {
        return Some(topic.to_string());
    }
    project
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|project| format!("projects/{project}/topics/{topic}"))
}

fn publish_body(payload: &[u8]) -> Value {
    json!({
        "messages": [{ "data": general_purpose::STANDARD.encode(payload) }]
    })
}

#[async_trait]
impl Publisher for PubSubPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<String, PublishError> {
        let request = self
            .client
            .post(self.publish_url(topic))
            .json(&publish_body(&payload));
        let response = self.auth.authorize(request).await?.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Status {
                topic: topic.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let ack: PublishResponse = response.json().await?;
        ack.message_ids
            .into_iter()
            .next()
            .ok_or_else(|| PublishError::NoMessageId(topic.to_string()))
    }
}
