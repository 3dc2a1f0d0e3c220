//! Bearer tokens for the Google Cloud REST APIs.

use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before the server-reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("metadata server token request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metadata server responded with status {0}")]
    Status(u16),
}

pub struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Where request credentials come from.
pub enum TokenSource {
    /// No `Authorization` header, for emulators.
    Anonymous,
    /// A token supplied through configuration.
    Static(String),
    /// The compute metadata server of the instance we run on.
    MetadataServer {
        client: Client,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl TokenSource {
    pub fn metadata_server(client: Client) -> Self {
        Self::MetadataServer {
            client,
            cached: Mutex::new(None),
        }
    }

    /// Current bearer token, if this source provides one.
    pub async fn bearer(&self) -> Result<Option<String>, AuthError> {
        match self {
            Self::Anonymous => Ok(None),
            Self::Static(token) => Ok(Some(token.clone())),
            Self::MetadataServer { client, cached } => {
                let mut guard = cached.lock().await;
                if let Some(token) = guard.as_ref() {
                    if token.expires_at > Utc::now() {
                        return Ok(Some(token.token.clone()));
                    }
                }

                let response = client
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(AuthError::Status(response.status().as_u16()));
                }
                let body: TokenResponse = response.json().await?;
                debug!(expires_in = body.expires_in, "refreshed metadata server token");

                let expires_at =
                    Utc::now() + Duration::seconds(body.expires_in - EXPIRY_MARGIN_SECS);
                let token = body.access_token.clone();
                *guard = Some(CachedToken {
                    token: body.access_token,
                    expires_at,
                });
                Ok(Some(token))
            }
        }
    }

    /// Attach the bearer token to `request` when there is one.
    pub async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, AuthError> {
        Ok(match self.bearer().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }
}
