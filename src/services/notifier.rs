//! Publish/subscribe seam used to announce processed objects.

use crate::services::auth::AuthError;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish to `{topic}` rejected with status {status}: {body}")]
    Status {
        topic: String,
        status: u16,
        body: String,
    },
    #[error("publish to `{0}` returned no message id")]
    NoMessageId(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one message and return the id assigned by the broker.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<String, PublishError>;
}
